// SPDX-License-Identifier: CEPL-1.0
use std::path::PathBuf;
use thiserror::Error;

/// Failures while reading assets from disk.
#[derive(Debug, Error)]
pub enum AssetError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to load texture file {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        source: image::ImageError,
    },

    #[error("failed to import model {}: {source}", path.display())]
    Import {
        path: PathBuf,
        source: tobj::LoadError,
    },

    #[error("invalid shader blob {}: {reason}", path.display())]
    Shader { path: PathBuf, reason: &'static str },
}
