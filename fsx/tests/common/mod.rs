#![allow(unused)]

use fsx::mkfs::format;
use fsx::{FilesystemMount, RamDisk};

/// Formats a fresh ram disk and mounts it.
pub fn fresh_fs(blocks: u32, inodes: u32) -> FilesystemMount<RamDisk> {
    let mut disk = RamDisk::new(blocks);
    format(&mut disk, inodes).unwrap();
    FilesystemMount::mount(disk).unwrap()
}

/// Deterministic, non-repeating-per-block test data.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + i / 1024) as u8).collect()
}

/// Mounts the same device again, dropping every in-memory structure.
pub fn remount(fs: FilesystemMount<RamDisk>) -> FilesystemMount<RamDisk> {
    FilesystemMount::mount(fs.into_device().unwrap()).unwrap()
}
