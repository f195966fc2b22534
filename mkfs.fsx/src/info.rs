//! fsx_info: inspection utility for fsx images.
//!
//! Mounts the image and prints the superblock, region layout, free counts
//! and the root directory, so mkfs output can be checked without hexdump.

use std::path::Path;

use fsx::fs_layout::{FS_MAGIC, ROOT_INODE};
use fsx::{BlockDevice, FilesystemMount, FsError, ImageDevice};

/// Print a human-friendly summary of an fsx image.
pub fn print_fs_info(path: &Path) -> Result<(), FsError> {
    let fs = FilesystemMount::mount(ImageDevice::open(path)?)?;
    print_mounted(&fs)
}

pub fn print_mounted<D: BlockDevice>(fs: &FilesystemMount<D>) -> Result<(), FsError> {
    let sb = fs.superblock();
    let geo = fs.geometry();
    let stats = fs.statfs();

    println!("====== FSX SUPERBLOCK ======");
    println!(
        "Magic:           {:#010x}{}",
        sb.magic,
        if sb.magic == FS_MAGIC { "" } else { " (bad)" }
    );
    println!("Total blocks:    {}", sb.num_blocks);
    println!("Inode map:       {} block(s) @ {}", geo.inode_map_blocks, geo.inode_map_base);
    println!("Block map:       {} block(s) @ {}", geo.block_map_blocks, geo.block_map_base);
    println!("Inode table:     {} block(s) @ {}", geo.inode_blocks, geo.inode_base);
    println!("Data area @      block {}", geo.data_start);
    println!(
        "Free:            {} of {} data blocks, {} of {} inodes",
        stats.free_blocks, stats.total_blocks, stats.free_inodes, stats.total_inodes
    );

    if let Some(root) = fs.inode(ROOT_INODE) {
        println!("\n====== ROOT INODE (/) ======");
        println!("Mode:            0o{:o}", root.mode);
        println!("Owner:           {}:{}", root.uid, root.gid);
        println!("Direct block[0]: {}", root.direct[0]);
    }

    println!("\n====== ROOT DIRECTORY CONTENT ======");
    for entry in fs.list_directory("/")? {
        let kind = if entry.stat.is_dir() { "dir" } else { "file" };
        println!(
            "- inode {} : {} ({}, {} bytes)",
            entry.stat.inum, entry.name, kind, entry.stat.size
        );
    }
    Ok(())
}
