//! Block device contract and an in-memory implementation.

use log::warn;

use crate::error::DeviceError;
use crate::fs_layout::BLOCK_SIZE;

/// Fixed-block-size storage the filesystem reads and writes through.
///
/// Transfers address `count` consecutive blocks starting at `first_block`;
/// the buffer must be exactly `count * BLOCK_SIZE` bytes long.
pub trait BlockDevice {
    /// Number of blocks on the device.
    fn num_blocks(&self) -> u32;

    fn read(&self, first_block: u32, count: u32, buf: &mut [u8]) -> Result<(), DeviceError>;

    fn write(&mut self, first_block: u32, count: u32, buf: &[u8]) -> Result<(), DeviceError>;

    /// Forces written blocks in the range to stable storage.
    fn flush(&mut self, first_block: u32, count: u32) -> Result<(), DeviceError>;

    /// Releases the device. Later transfers fail with `Unavailable`.
    fn close(&mut self);
}

/// Validates a transfer against the device size and the buffer length.
pub(crate) fn check_transfer(
    num_blocks: u32,
    first_block: u32,
    count: u32,
    len: usize,
) -> Result<(), DeviceError> {
    if u64::from(first_block) + u64::from(count) > u64::from(num_blocks) {
        return Err(DeviceError::BadAddress);
    }
    if len != count as usize * BLOCK_SIZE {
        return Err(DeviceError::Size);
    }
    Ok(())
}

/// Block device backed by a heap buffer.
pub struct RamDisk {
    data: Vec<u8>,
    num_blocks: u32,
    failed: bool,
}

impl RamDisk {
    pub fn new(num_blocks: u32) -> Self {
        Self {
            data: vec![0u8; num_blocks as usize * BLOCK_SIZE],
            num_blocks,
            failed: false,
        }
    }

    /// Wraps an existing image. Trailing bytes past the last full block are
    /// ignored.
    pub fn from_bytes(mut data: Vec<u8>) -> Self {
        if data.len() % BLOCK_SIZE != 0 {
            warn!("ram disk image is not a multiple of {} bytes", BLOCK_SIZE);
        }
        let num_blocks = (data.len() / BLOCK_SIZE) as u32;
        data.truncate(num_blocks as usize * BLOCK_SIZE);
        Self {
            data,
            num_blocks,
            failed: false,
        }
    }

    /// Makes every later transfer fail with `Unavailable`.
    pub fn fail(&mut self) {
        self.failed = true;
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn block(&self, blkno: u32) -> &[u8] {
        let start = blkno as usize * BLOCK_SIZE;
        &self.data[start..start + BLOCK_SIZE]
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

impl BlockDevice for RamDisk {
    fn num_blocks(&self) -> u32 {
        self.num_blocks
    }

    fn read(&self, first_block: u32, count: u32, buf: &mut [u8]) -> Result<(), DeviceError> {
        if self.failed {
            return Err(DeviceError::Unavailable);
        }
        check_transfer(self.num_blocks, first_block, count, buf.len())?;
        let start = first_block as usize * BLOCK_SIZE;
        buf.copy_from_slice(&self.data[start..start + buf.len()]);
        Ok(())
    }

    fn write(&mut self, first_block: u32, count: u32, buf: &[u8]) -> Result<(), DeviceError> {
        if self.failed {
            return Err(DeviceError::Unavailable);
        }
        check_transfer(self.num_blocks, first_block, count, buf.len())?;
        let start = first_block as usize * BLOCK_SIZE;
        self.data[start..start + buf.len()].copy_from_slice(buf);
        Ok(())
    }

    fn flush(&mut self, _first_block: u32, _count: u32) -> Result<(), DeviceError> {
        if self.failed {
            return Err(DeviceError::Unavailable);
        }
        Ok(())
    }

    fn close(&mut self) {
        self.failed = true;
    }
}
