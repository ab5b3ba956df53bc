/*!
Kernels.

A [`Kernel`] is one entry point of a [`Module`](crate::module::Module),
compiled for a fixed [`WorkgroupDimensions`]. Dispatching binds arguments in
descriptor map order, submits, and waits.

```no_run
# use spvcheck::{anyhow::Result, buffer::Buffer, kernel::{Kernel, KernelArg}};
# fn foo(kernel: &Kernel) -> Result<()> {
let dst = Buffer::storage(kernel.device(), 64 * 4)?;
let time = kernel.dispatch([4, 1, 1], &[KernelArg::Buffer(&dst), KernelArg::pod(&7u32)])?;
println!("{:?}", time.cpu_duration);
# Ok(())
# }
```
*/

use crate::{
    buffer::{Buffer, Image},
    device::{Device, KernelDesc, RawKernel},
    module::spvmap::{ArgKind, KernelSpec},
};
use anyhow::Result;
use bytemuck::Pod;
use serde::{Deserialize, Serialize};
use std::{
    fmt::{self, Debug, Display},
    time::{Duration, Instant},
};

/// Errors.
pub mod error {
    use super::WorkgroupDimensions;

    /// The module has no entry point with this name.
    #[derive(Clone, Debug, thiserror::Error)]
    #[error("Kernel {entry:?} not found in module!")]
    pub struct KernelNotFound {
        pub(crate) entry: String,
    }

    /// The workgroup size is zero or exceeds the device limits.
    #[derive(Clone, Debug, thiserror::Error)]
    #[error("Workgroup size {size} is invalid: {reason}")]
    pub struct InvalidWorkgroupSize {
        pub(crate) size: WorkgroupDimensions,
        pub(crate) reason: String,
    }

    /// The arguments do not match the descriptor map.
    #[derive(Clone, Debug, thiserror::Error)]
    #[error("Kernel {entry:?}: {msg}")]
    pub struct KernelArgError {
        pub(crate) entry: String,
        pub(crate) msg: String,
    }
}
use error::*;

/** The local size of a dispatch.

The all zero value is [`WorkgroupDimensions::SKIP`], which registers a kernel
test that is never compiled or run. */
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub struct WorkgroupDimensions {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl WorkgroupDimensions {
    /// Skip the kernel test.
    pub const SKIP: Self = Self::new_3d(0, 0, 0);
    /// A 2D workgroup.
    pub const fn new(x: u32, y: u32) -> Self {
        Self::new_3d(x, y, 1)
    }
    /// A 3D workgroup.
    pub const fn new_3d(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }
    /// Is [`SKIP`](Self::SKIP).
    pub fn is_skip(&self) -> bool {
        *self == Self::SKIP
    }
    /// The number of invocations in one workgroup.
    pub fn invocations(&self) -> u64 {
        self.x as u64 * self.y as u64 * self.z as u64
    }
    /// `[x, y, z]`.
    pub fn to_array(&self) -> [u32; 3] {
        [self.x, self.y, self.z]
    }
}

/// 1 x 1 x 1.
impl Default for WorkgroupDimensions {
    fn default() -> Self {
        Self::new_3d(1, 1, 1)
    }
}

impl Display for WorkgroupDimensions {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}x{}x{}", self.x, self.y, self.z)
    }
}

/// A kernel argument.
#[derive(Clone, Debug)]
pub enum KernelArg<'a> {
    /// For `buffer` arguments.
    Buffer(&'a Buffer),
    /// For `ro_image` and `wo_image` arguments.
    Image(&'a Image),
    /// The bytes of a `pod` or `pod_ubo` argument.
    Pod(Vec<u8>),
}

impl<'a> KernelArg<'a> {
    /// The bytes of `value`.
    pub fn pod<T: Pod>(value: &T) -> Self {
        Self::Pod(bytemuck::bytes_of(value).to_vec())
    }
    fn device(&self) -> Option<&Device> {
        match self {
            Self::Buffer(buffer) => Some(buffer.device()),
            Self::Image(image) => Some(image.device()),
            Self::Pod(_) => None,
        }
    }
    fn describe(&self) -> &'static str {
        match self {
            Self::Buffer(_) => "a buffer",
            Self::Image(_) => "an image",
            Self::Pod(_) => "plain data",
        }
    }
    fn matches(&self, kind: ArgKind) -> bool {
        match self {
            Self::Buffer(_) => kind.is_buffer(),
            Self::Image(_) => kind.is_image(),
            Self::Pod(_) => kind.is_pod(),
        }
    }
}

/// The time taken by a dispatch.
#[derive(Clone, Copy, Default, Debug, PartialEq, Serialize)]
pub struct ExecutionTime {
    /// Wall time on the host from submission until the device finished.
    pub cpu_duration: Duration,
}

/// A compiled entry point.
pub struct Kernel {
    raw: RawKernel,
    device: Device,
    spec: KernelSpec,
    workgroup_size: WorkgroupDimensions,
}

impl Kernel {
    pub(crate) fn new(
        device: &Device,
        spirv: &[u32],
        spec: &KernelSpec,
        workgroup_size: WorkgroupDimensions,
    ) -> Result<Self> {
        let invalid = |reason: String| InvalidWorkgroupSize {
            size: workgroup_size,
            reason,
        };
        if workgroup_size.to_array().contains(&0) {
            return Err(invalid("every dimension must be at least 1".into()).into());
        }
        let info = device.info();
        let max = info.max_workgroup_size();
        if workgroup_size
            .to_array()
            .iter()
            .zip(max)
            .any(|(size, max)| *size > max)
        {
            return Err(invalid(format!("exceeds the maximum of {max:?}")).into());
        }
        if workgroup_size.invocations() > info.max_workgroup_invocations() as u64 {
            return Err(invalid(format!(
                "more than {} invocations",
                info.max_workgroup_invocations()
            ))
            .into());
        }
        let desc = KernelDesc {
            spirv,
            spec,
            workgroup_size,
        };
        let raw = RawKernel::new(device, &desc)?;
        tracing::debug!(entry_point = spec.name(), %workgroup_size, "created kernel");
        Ok(Self {
            raw,
            device: device.clone(),
            spec: spec.clone(),
            workgroup_size,
        })
    }
    /// The device.
    pub fn device(&self) -> &Device {
        &self.device
    }
    /// The entry point name.
    pub fn entry_point(&self) -> &str {
        self.spec.name()
    }
    /// The descriptor map entry.
    pub fn spec(&self) -> &KernelSpec {
        &self.spec
    }
    /// The workgroup size.
    pub fn workgroup_size(&self) -> WorkgroupDimensions {
        self.workgroup_size
    }
    fn check_args(&self, num_workgroups: [u32; 3], args: &[KernelArg]) -> Result<()> {
        let error = |msg: String| KernelArgError {
            entry: self.entry_point().to_string(),
            msg,
        };
        if num_workgroups.contains(&0) {
            return Err(error(format!("can not dispatch {num_workgroups:?} workgroups")).into());
        }
        let spec_args = self.spec.args();
        if args.len() != spec_args.len() {
            return Err(error(format!(
                "expected {} arguments, found {}",
                spec_args.len(),
                args.len()
            ))
            .into());
        }
        for (arg, spec_arg) in args.iter().zip(spec_args) {
            if !arg.matches(spec_arg.kind()) {
                return Err(error(format!(
                    "argument {:?} of kind {} can not be {}",
                    spec_arg.name(),
                    spec_arg.kind(),
                    arg.describe()
                ))
                .into());
            }
            if let Some(device) = arg.device() {
                if device != &self.device {
                    return Err(error(format!(
                        "argument {:?} belongs to a different device",
                        spec_arg.name()
                    ))
                    .into());
                }
            }
        }
        Ok(())
    }
    /** Dispatches `num_workgroups` workgroups and waits for completion.

    **errors**
    - The arguments do not match the descriptor map, or belong to another
      device.
    - `num_workgroups` has a zero dimension.
    - The device failed to run the kernel. */
    pub fn dispatch(&self, num_workgroups: [u32; 3], args: &[KernelArg]) -> Result<ExecutionTime> {
        self.check_args(num_workgroups, args)?;
        let start = Instant::now();
        self.raw.dispatch(num_workgroups, args)?;
        self.device.wait()?;
        Ok(ExecutionTime {
            cpu_duration: start.elapsed(),
        })
    }
}

impl Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("device", &self.device)
            .field("entry_point", &self.entry_point())
            .field("workgroup_size", &self.workgroup_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::spvmap::ModuleSpec;

    fn spec() -> KernelSpec {
        let spec: ModuleSpec =
            "kernel,fill,arg,dst,argOrdinal,0,descriptorSet,0,binding,0,offset,0,argKind,buffer\n\
             kernel,fill,arg,value,argOrdinal,1,descriptorSet,0,binding,1,offset,0,argKind,pod"
                .parse()
                .unwrap();
        spec.kernels()[0].clone()
    }

    fn fill_device() -> Device {
        Device::host_builder()
            .kernel("fill", |invocation| {
                let value = invocation.pod::<u32>(1)?;
                invocation.buffer::<u32>(0)?.fill(value);
                Ok(())
            })
            .build()
    }

    #[test]
    fn workgroup_dimensions() {
        assert!(WorkgroupDimensions::SKIP.is_skip());
        assert!(!WorkgroupDimensions::default().is_skip());
        assert_eq!(WorkgroupDimensions::new(8, 8).invocations(), 64);
        assert_eq!(WorkgroupDimensions::new_3d(2, 3, 4).to_string(), "2x3x4");
    }

    #[test]
    fn dispatch_fill() {
        let device = fill_device();
        let kernel = Kernel::new(&device, &[], &spec(), WorkgroupDimensions::new(4, 1)).unwrap();
        assert_eq!(kernel.entry_point(), "fill");
        let dst = Buffer::storage(&device, 16).unwrap();
        kernel
            .dispatch([1, 1, 1], &[KernelArg::Buffer(&dst), KernelArg::pod(&7u32)])
            .unwrap();
        assert_eq!(*dst.map::<u32>().unwrap(), [7; 4]);
    }

    #[test]
    fn invalid_workgroup_sizes() {
        let device = Device::host_builder()
            .max_workgroup_size([16, 16, 1])
            .kernel("fill", |_| Ok(()))
            .build();
        let spec = spec();
        for size in [
            WorkgroupDimensions::SKIP,
            WorkgroupDimensions::new(0, 4),
            WorkgroupDimensions::new(32, 1),
            WorkgroupDimensions::new_3d(1, 1, 2),
        ] {
            let error = Kernel::new(&device, &[], &spec, size).unwrap_err();
            assert!(
                error.downcast_ref::<InvalidWorkgroupSize>().is_some(),
                "{size}: {error}"
            );
        }
    }

    #[test]
    fn argument_mismatch() {
        let device = fill_device();
        let kernel = Kernel::new(&device, &[], &spec(), WorkgroupDimensions::default()).unwrap();
        let dst = Buffer::storage(&device, 16).unwrap();
        let other = Buffer::storage(&Device::host(), 16).unwrap();
        for args in [
            vec![KernelArg::Buffer(&dst)],
            vec![KernelArg::pod(&7u32), KernelArg::Buffer(&dst)],
            vec![KernelArg::Buffer(&other), KernelArg::pod(&7u32)],
        ] {
            let error = kernel.dispatch([1, 1, 1], &args).unwrap_err();
            assert!(error.downcast_ref::<KernelArgError>().is_some(), "{error}");
        }
        assert!(kernel
            .dispatch([0, 1, 1], &[KernelArg::Buffer(&dst), KernelArg::pod(&7u32)])
            .is_err());
    }
}
