//! Block device over a host image file.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::device::{check_transfer, BlockDevice};
use crate::error::DeviceError;
use crate::fs_layout::BLOCK_SIZE;

/// An image file accessed with positional reads and writes.
pub struct ImageDevice {
    path: PathBuf,
    // None once closed or failed
    file: Option<File>,
    num_blocks: u32,
}

impl ImageDevice {
    /// Opens an existing image read-write.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DeviceError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let len = file.metadata()?.len();

        // Extra bytes past the last full block are never addressed.
        if len % BLOCK_SIZE as u64 != 0 {
            warn!(
                "image {} is not a multiple of {} bytes",
                path.display(),
                BLOCK_SIZE
            );
        }
        let num_blocks =
            u32::try_from(len / BLOCK_SIZE as u64).map_err(|_| DeviceError::Size)?;
        debug!("opened image {} ({} blocks)", path.display(), num_blocks);

        Ok(Self {
            path,
            file: Some(file),
            num_blocks,
        })
    }

    /// Creates (or truncates) an image of `num_blocks` zeroed blocks.
    pub fn create(path: impl AsRef<Path>, num_blocks: u32) -> Result<Self, DeviceError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        file.set_len(u64::from(num_blocks) * BLOCK_SIZE as u64)?;
        debug!("created image {} ({} blocks)", path.display(), num_blocks);

        Ok(Self {
            path,
            file: Some(file),
            num_blocks,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Forces the device into failure: every later transfer returns
    /// `Unavailable`.
    pub fn fail(&mut self) {
        warn!("image {} forced unavailable", self.path.display());
        self.file = None;
    }

    fn file(&self) -> Result<&File, DeviceError> {
        self.file.as_ref().ok_or(DeviceError::Unavailable)
    }
}

impl BlockDevice for ImageDevice {
    fn num_blocks(&self) -> u32 {
        self.num_blocks
    }

    fn read(&self, first_block: u32, count: u32, buf: &mut [u8]) -> Result<(), DeviceError> {
        let file = self.file()?;
        check_transfer(self.num_blocks, first_block, count, buf.len())?;
        file.read_exact_at(buf, u64::from(first_block) * BLOCK_SIZE as u64)?;
        Ok(())
    }

    fn write(&mut self, first_block: u32, count: u32, buf: &[u8]) -> Result<(), DeviceError> {
        let file = self.file()?;
        check_transfer(self.num_blocks, first_block, count, buf.len())?;
        file.write_all_at(buf, u64::from(first_block) * BLOCK_SIZE as u64)?;
        Ok(())
    }

    fn flush(&mut self, _first_block: u32, _count: u32) -> Result<(), DeviceError> {
        self.file()?.sync_data()?;
        Ok(())
    }

    fn close(&mut self) {
        if self.file.take().is_some() {
            debug!("closed image {}", self.path.display());
        }
    }
}
