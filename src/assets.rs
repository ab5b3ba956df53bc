/*!
Where module files come from.

A module named `copy_image` is read from the assets `copy_image.spvmap` and
`copy_image.spv`. [`AssetDir`] reads them from a directory, [`MemoryAssets`]
holds them in memory.
*/

use anyhow::{Context, Result};
use std::{
    collections::HashMap,
    fs::File,
    io::{Cursor, Read},
    path::{Path, PathBuf},
};

/// The asset does not exist.
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot open {name}")]
pub struct AssetNotFound {
    pub(crate) name: String,
}

/// A source of named assets.
pub trait AssetSource {
    /// Opens the asset `name`.
    ///
    /// **errors**
    /// [`AssetNotFound`] if there is no such asset.
    fn open(&self, name: &str) -> Result<Box<dyn Read + '_>>;
    /// Reads the whole asset `name`.
    fn read(&self, name: &str) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.open(name)?
            .read_to_end(&mut bytes)
            .with_context(|| format!("cannot read {name}"))?;
        Ok(bytes)
    }
}

/// Assets in a directory.
#[derive(Clone, Debug)]
pub struct AssetDir {
    path: PathBuf,
}

impl AssetDir {
    /// Reads assets from `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
    /// The directory.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AssetSource for AssetDir {
    fn open(&self, name: &str) -> Result<Box<dyn Read + '_>> {
        let path = self.path.join(name);
        match File::open(&path) {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(anyhow::Error::new(
                AssetNotFound {
                    name: name.to_string(),
                },
            )
            .context(path.display().to_string())),
            Err(e) => Err(e).with_context(|| format!("cannot open {}", path.display())),
        }
    }
}

/// Assets held in memory.
#[derive(Clone, Default, Debug)]
pub struct MemoryAssets {
    assets: HashMap<String, Vec<u8>>,
}

impl MemoryAssets {
    /// No assets.
    pub fn new() -> Self {
        Self::default()
    }
    /// Adds or replaces the asset `name`.
    pub fn insert(&mut self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.assets.insert(name.into(), bytes.into());
    }
    /// Adds or replaces the asset `name`.
    pub fn with(mut self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.insert(name, bytes);
        self
    }
}

impl AssetSource for MemoryAssets {
    fn open(&self, name: &str) -> Result<Box<dyn Read + '_>> {
        let bytes = self.assets.get(name).ok_or_else(|| AssetNotFound {
            name: name.to_string(),
        })?;
        Ok(Box::new(Cursor::new(bytes.as_slice())))
    }
}
