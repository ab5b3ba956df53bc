//! SPIR-V validation and entry point discovery.

use ::spirv::{ExecutionModel, Op, MAGIC_NUMBER};

/// The bytes are not a SPIR-V module.
#[derive(Clone, Debug, thiserror::Error)]
#[error("invalid SPIR-V: {msg}")]
pub struct InvalidSpirv {
    pub(crate) msg: String,
}

fn invalid(msg: impl Into<String>) -> InvalidSpirv {
    InvalidSpirv { msg: msg.into() }
}

const HEADER_WORDS: usize = 5;

/// Converts `bytes` to words in native order.
///
/// The magic number determines the byte order of the module.
pub(crate) fn words_from_bytes(bytes: &[u8]) -> Result<Vec<u32>, InvalidSpirv> {
    if bytes.len() % 4 != 0 {
        return Err(invalid(format!(
            "length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    if bytes.len() < HEADER_WORDS * 4 {
        return Err(invalid("truncated header"));
    }
    let chunks = bytes.chunks_exact(4).map(|x| [x[0], x[1], x[2], x[3]]);
    let magic = [bytes[0], bytes[1], bytes[2], bytes[3]];
    if u32::from_le_bytes(magic) == MAGIC_NUMBER {
        Ok(chunks.map(u32::from_le_bytes).collect())
    } else if u32::from_be_bytes(magic) == MAGIC_NUMBER {
        Ok(chunks.map(u32::from_be_bytes).collect())
    } else {
        Err(invalid(format!(
            "bad magic number 0x{:08x}",
            u32::from_le_bytes(magic)
        )))
    }
}

/// Decodes a nul terminated literal string.
fn literal_string(words: &[u32]) -> Result<String, InvalidSpirv> {
    let bytes: Vec<u8> = words
        .iter()
        .flat_map(|word| word.to_le_bytes())
        .take_while(|byte| *byte != 0)
        .collect();
    String::from_utf8(bytes).map_err(|_| invalid("entry point name is not utf-8"))
}

/// The names of the `GLCompute` entry points, in declaration order.
pub(crate) fn compute_entry_points(words: &[u32]) -> Result<Vec<String>, InvalidSpirv> {
    let mut entry_points = Vec::new();
    let mut index = HEADER_WORDS;
    while index < words.len() {
        let word = words[index];
        let word_count = (word >> 16) as usize;
        let opcode = word & 0xFFFF;
        if word_count == 0 || index + word_count > words.len() {
            return Err(invalid(format!("malformed instruction at word {index}")));
        }
        if opcode == Op::EntryPoint as u32 {
            let operands = &words[index + 1..index + word_count];
            if operands.len() < 3 {
                return Err(invalid(format!("truncated OpEntryPoint at word {index}")));
            }
            if operands[0] == ExecutionModel::GLCompute as u32 {
                entry_points.push(literal_string(&operands[2..])?);
            }
        } else if opcode == Op::Function as u32 {
            // entry points precede all functions
            break;
        }
        index += word_count;
    }
    Ok(entry_points)
}

fn string_words(name: &str) -> Vec<u32> {
    let mut bytes = name.as_bytes().to_vec();
    bytes.push(0);
    while bytes.len() % 4 != 0 {
        bytes.push(0);
    }
    bytes
        .chunks_exact(4)
        .map(|x| u32::from_le_bytes([x[0], x[1], x[2], x[3]]))
        .collect()
}

fn stub_words(entry_points: &[&str]) -> Vec<u32> {
    let mut words = vec![MAGIC_NUMBER, 0x0001_0000, 0, 100, 0];
    // OpCapability Shader
    words.extend([(2 << 16) | Op::Capability as u32, 1]);
    for (i, name) in entry_points.iter().enumerate() {
        let name = string_words(name);
        let word_count = 3 + name.len() as u32;
        words.push((word_count << 16) | Op::EntryPoint as u32);
        words.push(ExecutionModel::GLCompute as u32);
        words.push(i as u32 + 1);
        words.extend(name);
    }
    words
}

/// A module that declares the compute `entry_points` and has no code.
///
/// The host device only needs the entry points, so this stands in for a
/// compiled module when kernels are implemented on the host.
pub fn stub_module(entry_points: &[&str]) -> Vec<u8> {
    stub_words(entry_points)
        .into_iter()
        .flat_map(u32::to_le_bytes)
        .collect()
}
