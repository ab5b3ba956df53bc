/*!
Descriptor maps.

A `.spvmap` file lists, for every kernel in a module, where each argument is
bound. Each line is a comma separated record of a tag followed by key / value
pairs:

```text
kernel,fill,arg,dst,argOrdinal,0,descriptorSet,0,binding,0,offset,0,argKind,buffer
kernel,fill,arg,value,argOrdinal,1,descriptorSet,0,binding,1,offset,0,argKind,pod,argSize,4
sampler,18,samplerExpr,"CLK_ADDRESS_CLAMP_TO_EDGE|CLK_FILTER_NEAREST",descriptorSet,1,binding,0
kernel,noargs
```
*/

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt::{self, Display},
    io::BufRead,
    str::FromStr,
};

/// A malformed descriptor map.
#[derive(Clone, Debug, thiserror::Error)]
#[error("spvmap line {line}: {msg}")]
pub struct SpvmapError {
    pub(crate) line: usize,
    pub(crate) msg: String,
}

impl SpvmapError {
    /// The 1-based line number, 0 if the error was not on a specific line.
    pub fn line(&self) -> usize {
        self.line
    }
}

/// How a kernel argument is passed.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub enum ArgKind {
    /// A storage buffer.
    #[serde(rename = "buffer")]
    Buffer,
    /// Plain data in a storage buffer.
    #[serde(rename = "pod")]
    Pod,
    /// Plain data in a uniform buffer.
    #[serde(rename = "pod_ubo")]
    PodUbo,
    /// A sampled image.
    #[serde(rename = "ro_image")]
    ReadOnlyImage,
    /// A storage image.
    #[serde(rename = "wo_image")]
    WriteOnlyImage,
    /// A sampler.
    #[serde(rename = "sampler")]
    Sampler,
    /// Workgroup local memory, sized with a specialization constant.
    #[serde(rename = "local")]
    Local,
}

impl ArgKind {
    /// The name used in descriptor maps.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buffer => "buffer",
            Self::Pod => "pod",
            Self::PodUbo => "pod_ubo",
            Self::ReadOnlyImage => "ro_image",
            Self::WriteOnlyImage => "wo_image",
            Self::Sampler => "sampler",
            Self::Local => "local",
        }
    }
    /// Is bound as a buffer that the caller provides.
    pub fn is_buffer(&self) -> bool {
        *self == Self::Buffer
    }
    /// Is plain data.
    pub fn is_pod(&self) -> bool {
        matches!(self, Self::Pod | Self::PodUbo)
    }
    /// Is an image.
    pub fn is_image(&self) -> bool {
        matches!(self, Self::ReadOnlyImage | Self::WriteOnlyImage)
    }
}

impl FromStr for ArgKind {
    type Err = ();
    fn from_str(input: &str) -> Result<Self, ()> {
        [
            Self::Buffer,
            Self::Pod,
            Self::PodUbo,
            Self::ReadOnlyImage,
            Self::WriteOnlyImage,
            Self::Sampler,
            Self::Local,
        ]
        .into_iter()
        .find(|x| x.as_str() == input)
        .ok_or(())
    }
}

impl Display for ArgKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One kernel argument.
#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct ArgSpec {
    name: String,
    ordinal: u32,
    descriptor_set: u32,
    binding: u32,
    offset: u32,
    kind: ArgKind,
    size: Option<u32>,
}

impl ArgSpec {
    /// The name in the kernel source.
    pub fn name(&self) -> &str {
        &self.name
    }
    /// The position in the kernel signature.
    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }
    /// The descriptor set.
    pub fn descriptor_set(&self) -> u32 {
        self.descriptor_set
    }
    /// The binding within the descriptor set.
    pub fn binding(&self) -> u32 {
        self.binding
    }
    /// The byte offset within the binding.
    pub fn offset(&self) -> u32 {
        self.offset
    }
    /// How the argument is passed.
    pub fn kind(&self) -> ArgKind {
        self.kind
    }
    /// The size of plain data arguments, if recorded.
    pub fn size(&self) -> Option<u32> {
        self.size
    }
}

/// One kernel: its entry point and arguments, sorted by ordinal.
#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct KernelSpec {
    name: String,
    args: Vec<ArgSpec>,
}

impl KernelSpec {
    /// The entry point name.
    pub fn name(&self) -> &str {
        &self.name
    }
    /// The arguments, sorted by ordinal.
    pub fn args(&self) -> &[ArgSpec] {
        &self.args
    }
}

/// A literal sampler.
#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct SamplerSpec {
    value: u32,
    expr: String,
    descriptor_set: u32,
    binding: u32,
}

impl SamplerSpec {
    /// The OpenCL sampler bitmask.
    pub fn value(&self) -> u32 {
        self.value
    }
    /// The source expression.
    pub fn expr(&self) -> &str {
        &self.expr
    }
    /// The descriptor set.
    pub fn descriptor_set(&self) -> u32 {
        self.descriptor_set
    }
    /// The binding within the descriptor set.
    pub fn binding(&self) -> u32 {
        self.binding
    }
}

/// A parsed descriptor map.
#[derive(Clone, Default, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct ModuleSpec {
    kernels: Vec<KernelSpec>,
    samplers: Vec<SamplerSpec>,
}

impl ModuleSpec {
    /** Parses a descriptor map.

    Kernels are kept in order of first appearance.

    **errors**
    - A line is not a `kernel` or `sampler` record.
    - A key is missing or a number does not parse.
    - An argument kind is unknown.
    - A kernel repeats an ordinal or skips one.
    - Reading fails. */
    pub fn parse(reader: impl BufRead) -> Result<Self, SpvmapError> {
        let mut kernels = Vec::<KernelSpec>::new();
        let mut samplers = Vec::new();
        for (i, line) in reader.lines().enumerate() {
            let line_number = i + 1;
            let line = line.map_err(|e| SpvmapError {
                line: line_number,
                msg: e.to_string(),
            })?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let error = |msg: String| SpvmapError {
                line: line_number,
                msg,
            };
            let fields = split_fields(line);
            match fields[0] {
                "kernel" => {
                    let name = fields
                        .get(1)
                        .filter(|name| !name.is_empty())
                        .ok_or_else(|| error("kernel record without a name".into()))?;
                    let index = match kernels.iter().position(|k| k.name == *name) {
                        Some(index) => index,
                        None => {
                            kernels.push(KernelSpec {
                                name: name.to_string(),
                                args: Vec::new(),
                            });
                            kernels.len() - 1
                        }
                    };
                    if fields.len() > 2 {
                        let arg = parse_arg(&fields[2..]).map_err(error)?;
                        kernels[index].args.push(arg);
                    }
                }
                "sampler" => {
                    let sampler = parse_sampler(&fields[1..]).map_err(error)?;
                    samplers.push(sampler);
                }
                tag => return Err(error(format!("unknown record {tag:?}"))),
            }
        }
        for kernel in kernels.iter_mut() {
            kernel.args.sort_by_key(|arg| arg.ordinal);
            for (ordinal, arg) in kernel.args.iter().enumerate() {
                if arg.ordinal as usize != ordinal {
                    return Err(SpvmapError {
                        line: 0,
                        msg: format!(
                            "kernel {:?} argument {:?} has ordinal {}, expected {ordinal}",
                            kernel.name, arg.name, arg.ordinal,
                        ),
                    });
                }
            }
        }
        tracing::trace!(
            kernels = kernels.len(),
            samplers = samplers.len(),
            "parsed spvmap"
        );
        Ok(Self { kernels, samplers })
    }
    /// The kernels, in order of first appearance.
    pub fn kernels(&self) -> &[KernelSpec] {
        &self.kernels
    }
    /// The kernel named `name`.
    pub fn kernel(&self, name: &str) -> Option<&KernelSpec> {
        self.kernels.iter().find(|k| k.name == name)
    }
    /// The literal samplers.
    pub fn samplers(&self) -> &[SamplerSpec] {
        &self.samplers
    }
}

impl FromStr for ModuleSpec {
    type Err = SpvmapError;
    fn from_str(input: &str) -> Result<Self, SpvmapError> {
        Self::parse(input.as_bytes())
    }
}

/// Splits on commas outside of double quotes, stripping the quotes.
fn split_fields(line: &str) -> Vec<&str> {
    let mut fields = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    for (i, c) in line.char_indices() {
        match c {
            '"' => quoted = !quoted,
            ',' if !quoted => {
                fields.push(&line[start..i]);
                start = i + 1;
            }
            _ => (),
        }
    }
    fields.push(&line[start..]);
    fields
        .into_iter()
        .map(|field| field.trim().trim_matches('"'))
        .collect()
}

fn key_values<'a>(fields: &[&'a str]) -> Result<BTreeMap<&'a str, &'a str>, String> {
    if fields.len() % 2 != 0 {
        return Err(format!("key {:?} has no value", fields[fields.len() - 1]));
    }
    Ok(fields
        .chunks_exact(2)
        .map(|pair| (pair[0], pair[1]))
        .collect())
}

fn get<'a>(map: &BTreeMap<&str, &'a str>, key: &str) -> Result<&'a str, String> {
    map.get(key)
        .copied()
        .ok_or_else(|| format!("missing {key:?}"))
}

fn get_u32(map: &BTreeMap<&str, &str>, key: &str) -> Result<u32, String> {
    let value = get(map, key)?;
    value
        .parse()
        .map_err(|_| format!("{key:?} is not a number: {value:?}"))
}

fn get_u32_or_zero(map: &BTreeMap<&str, &str>, key: &str) -> Result<u32, String> {
    if map.contains_key(key) {
        get_u32(map, key)
    } else {
        Ok(0)
    }
}

fn parse_arg(fields: &[&str]) -> Result<ArgSpec, String> {
    let map = key_values(fields)?;
    let kind = get(&map, "argKind")?;
    let kind = kind
        .parse::<ArgKind>()
        .map_err(|_| format!("unknown argKind {kind:?}"))?;
    // local arguments are not bound to a descriptor
    let (descriptor_set, binding, offset) = if kind == ArgKind::Local {
        (
            get_u32_or_zero(&map, "descriptorSet")?,
            get_u32_or_zero(&map, "binding")?,
            get_u32_or_zero(&map, "offset")?,
        )
    } else {
        (
            get_u32(&map, "descriptorSet")?,
            get_u32(&map, "binding")?,
            get_u32_or_zero(&map, "offset")?,
        )
    };
    let size = if map.contains_key("argSize") {
        Some(get_u32(&map, "argSize")?)
    } else {
        None
    };
    Ok(ArgSpec {
        name: get(&map, "arg")?.to_string(),
        ordinal: get_u32(&map, "argOrdinal")?,
        descriptor_set,
        binding,
        offset,
        kind,
        size,
    })
}

fn parse_sampler(fields: &[&str]) -> Result<SamplerSpec, String> {
    let value = fields
        .first()
        .ok_or_else(|| "sampler record without a value".to_string())?;
    let value = value
        .parse()
        .map_err(|_| format!("sampler value is not a number: {value:?}"))?;
    let map = key_values(&fields[1..])?;
    Ok(SamplerSpec {
        value,
        expr: get(&map, "samplerExpr")?.to_string(),
        descriptor_set: get_u32(&map, "descriptorSet")?,
        binding: get_u32(&map, "binding")?,
    })
}
