// SPDX-License-Identifier: CEPL-1.0
//! Pre-compiled SPIR-V blobs. The contents are opaque to us beyond the header word.

use crate::AssetError;
use std::path::Path;

pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Split a SPIR-V byte stream into words, fixing endianness from the magic number.
pub fn parse_spirv(bytes: &[u8]) -> Result<Vec<u32>, &'static str> {
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return Err("length is not a non-zero multiple of 4");
    }
    let mut words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    if words[0] == SPIRV_MAGIC.swap_bytes() {
        for w in &mut words {
            *w = w.swap_bytes();
        }
    }
    if words[0] != SPIRV_MAGIC {
        return Err("bad magic number");
    }
    Ok(words)
}

pub fn read_shader_blob(path: &Path) -> Result<Vec<u32>, AssetError> {
    let bytes = std::fs::read(path).map_err(|source| AssetError::Io {
        path: path.to_owned(),
        source,
    })?;
    parse_spirv(&bytes).map_err(|reason| AssetError::Shader {
        path: path.to_owned(),
        reason,
    })
}
