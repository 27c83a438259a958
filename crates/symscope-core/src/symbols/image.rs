//! Binary image descriptors and the seam through which image bytes are read.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::Result;

/// Describes a binary image mapped (or about to be mapped) in the debuggee.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageDescriptor
{
    pub path: PathBuf,
    /// Load bias: run-time address minus link-time address.
    pub load_bias: u64,
}

impl ImageDescriptor
{
    pub fn new(path: impl Into<PathBuf>, load_bias: u64) -> Self
    {
        Self {
            path: path.into(),
            load_bias,
        }
    }
}

/// Supplies the bytes of an image file.
///
/// The loader never touches the filesystem directly; tests and remote
/// front-ends substitute their own source.
pub trait ImageSource
{
    /// Read the whole image at `path`.
    ///
    /// ## Errors
    ///
    /// Returns an error if the image cannot be opened or read.
    fn read_image(&self, path: &Path) -> Result<Vec<u8>>;
}

/// Reads images from the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsImageSource;

impl ImageSource for FsImageSource
{
    fn read_image(&self, path: &Path) -> Result<Vec<u8>>
    {
        debug!(path = %path.display(), "reading image");
        Ok(fs::read(path)?)
    }
}
