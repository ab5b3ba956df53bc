/*!
Compiled modules.

A module is a SPIR-V blob plus the descriptor map ([`ModuleSpec`]) produced
alongside it. Loading checks that every kernel in the descriptor map is a
compute entry point of the blob.

```
# use spvcheck::{anyhow::Result, assets::MemoryAssets, device::Device, module::Module};
# fn foo(assets: &MemoryAssets) -> Result<()> {
let device = Device::host();
let module = Module::from_assets(&device, assets, "copy_image")?;
for entry_point in module.entry_points() {
    println!("{entry_point}");
}
# Ok(())
# }
```
*/

use crate::{
    assets::AssetSource,
    device::Device,
    kernel::{error::KernelNotFound, Kernel, WorkgroupDimensions},
};
use anyhow::{Context, Result};
use std::{fmt, io::BufReader, sync::Arc};

pub mod crlf;
pub mod spirv;
pub mod spvmap;

use self::{
    crlf::CrlfFilter,
    spirv::{compute_entry_points, words_from_bytes, InvalidSpirv},
    spvmap::ModuleSpec,
};

/// A loaded module.
#[derive(Clone)]
pub struct Module {
    device: Device,
    spirv: Arc<[u32]>,
    spec: Arc<ModuleSpec>,
}

impl Module {
    /** Loads a module from SPIR-V bytes and its descriptor map.

    **errors**
    - [`InvalidSpirv`] if the bytes are not SPIR-V or do not declare every
      kernel in `spec` as a compute entry point. */
    pub fn load(device: &Device, spirv: &[u8], spec: ModuleSpec) -> Result<Self> {
        let words = words_from_bytes(spirv)?;
        let entry_points = compute_entry_points(&words)?;
        for kernel in spec.kernels() {
            if !entry_points.iter().any(|x| x == kernel.name()) {
                return Err(InvalidSpirv {
                    msg: format!("no compute entry point named {:?}", kernel.name()),
                }
                .into());
            }
        }
        tracing::debug!(
            kernels = spec.kernels().len(),
            words = words.len(),
            "loaded module"
        );
        Ok(Self {
            device: device.clone(),
            spirv: words.into(),
            spec: Arc::new(spec),
        })
    }
    /** Loads `<name>.spvmap` and `<name>.spv` from `assets`.

    The descriptor map is read through a [`CrlfFilter`].

    **errors**
    - An asset is missing or unreadable.
    - The descriptor map does not parse.
    - See [`Module::load`]. */
    pub fn from_assets(device: &Device, assets: &dyn AssetSource, name: &str) -> Result<Self> {
        let spvmap_name = format!("{name}.spvmap");
        let spvmap = assets
            .open(&spvmap_name)
            .with_context(|| format!("cannot open spvmap for {name}"))?;
        let spec = ModuleSpec::parse(BufReader::new(CrlfFilter::new(spvmap)))
            .with_context(|| format!("cannot parse {spvmap_name}"))?;
        let spv = assets
            .read(&format!("{name}.spv"))
            .with_context(|| format!("cannot open spv for {name}"))?;
        Self::load(device, &spv, spec).with_context(|| format!("cannot load module {name}"))
    }
    /// The device.
    pub fn device(&self) -> &Device {
        &self.device
    }
    /// The descriptor map.
    pub fn spec(&self) -> &ModuleSpec {
        &self.spec
    }
    /// The kernel entry points, in descriptor map order.
    pub fn entry_points(&self) -> impl Iterator<Item = &str> + '_ {
        self.spec.kernels().iter().map(|kernel| kernel.name())
    }
    /** Compiles `entry` with `workgroup_size`.

    **errors**
    - [`KernelNotFound`] if `entry` is not in the descriptor map.
    - The workgroup size is zero or over the device limits.
    - The device could not create the kernel. */
    pub fn create_kernel(&self, entry: &str, workgroup_size: WorkgroupDimensions) -> Result<Kernel> {
        let spec = self.spec.kernel(entry).ok_or_else(|| KernelNotFound {
            entry: entry.to_string(),
        })?;
        Kernel::new(&self.device, &self.spirv, spec, workgroup_size)
            .with_context(|| format!("cannot create kernel {entry} with workgroup size {workgroup_size}"))
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Module")
            .field("device", &self.device)
            .field("entry_points", &self.entry_points().collect::<Vec<_>>())
            .finish()
    }
}
