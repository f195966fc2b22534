//! Formatting: writes a fresh, empty filesystem onto a device.
//!
//! The resulting image holds:
//!   1. the superblock in block 0
//!   2. an inode bitmap with inodes 0 and 1 reserved
//!   3. a block bitmap with every metadata block and the root directory block
//!      marked allocated
//!   4. an inode table that is empty except for the root directory
//!   5. the root directory's zeroed entry block, right after the inode table

use log::{debug, info};

use crate::bitmap::BitSet;
use crate::device::BlockDevice;
use crate::error::{FsError, Result};
use crate::fs_layout::{
    Geometry, Inode, Superblock, BITS_PER_BLOCK, BLOCK_SIZE, FS_MAGIC, INODES_PER_BLOCK,
    INODE_SIZE, ROOT_INODE, S_IFDIR,
};
use crate::mount::{now, process_owner};

/// Inode count used when none is configured: one per four blocks, at least
/// one table block.
pub fn default_inode_count(total_blocks: u32) -> u32 {
    (total_blocks / 4).max(INODES_PER_BLOCK as u32)
}

/// Computes the region sizes for a device of `total_blocks` holding at least
/// `inode_count` inodes.
pub fn plan(total_blocks: u32, inode_count: u32) -> Result<Superblock> {
    if inode_count == 0 {
        return Err(FsError::InvalidArgument);
    }
    let per_block = INODES_PER_BLOCK as u32;
    let bits = BITS_PER_BLOCK as u32;

    let inode_region_sz = inode_count.div_ceil(per_block);
    let inode_map_sz = (inode_region_sz * per_block).div_ceil(bits);
    let block_map_sz = total_blocks.div_ceil(bits).max(1);

    // Metadata plus the root directory block must fit.
    let metadata = 1 + u64::from(inode_map_sz) + u64::from(block_map_sz) + u64::from(inode_region_sz);
    if metadata >= u64::from(total_blocks) {
        return Err(FsError::InvalidArgument);
    }

    Ok(Superblock {
        magic: FS_MAGIC,
        inode_map_sz,
        inode_region_sz,
        block_map_sz,
        num_blocks: total_blocks,
        root_inode: ROOT_INODE,
    })
}

/// Formats `device` with room for `inode_count` inodes (rounded up to a full
/// inode table block).
pub fn format<D: BlockDevice>(device: &mut D, inode_count: u32) -> Result<Superblock> {
    let sb = plan(device.num_blocks(), inode_count)?;
    let geo = Geometry::from_superblock(&sb);
    let root_block = geo.data_start;
    debug!("mkfs layout: {:?}", geo);

    device.write(0, 1, &sb.encode())?;

    let mut inode_map = BitSet::with_blocks(geo.inode_map_blocks);
    inode_map.set(0);
    inode_map.set(ROOT_INODE);
    device.write(geo.inode_map_base, geo.inode_map_blocks, inode_map.as_bytes())?;

    let mut block_map = BitSet::with_blocks(geo.block_map_blocks);
    for blk in 0..=root_block {
        block_map.set(blk);
    }
    device.write(geo.block_map_base, geo.block_map_blocks, block_map.as_bytes())?;

    let (uid, gid) = process_owner();
    let t = now();
    let mut root = Inode {
        uid,
        gid,
        mode: S_IFDIR | 0o755,
        ctime: t,
        mtime: t,
        ..Inode::empty()
    };
    root.direct[0] = root_block;

    let mut table = vec![0u8; geo.inode_blocks as usize * BLOCK_SIZE];
    let off = ROOT_INODE as usize * INODE_SIZE;
    root.encode_into(&mut table[off..off + INODE_SIZE]);
    device.write(geo.inode_base, geo.inode_blocks, &table)?;

    device.write(root_block, 1, &[0u8; BLOCK_SIZE])?;
    device.flush(0, sb.num_blocks)?;

    info!(
        "formatted {} blocks: {} inodes, data region {}..{}",
        sb.num_blocks, geo.n_inodes, geo.data_start, sb.num_blocks
    );
    Ok(sb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::RamDisk;

    #[test]
    fn plan_rounds_regions_up() {
        let sb = plan(2048, 64).unwrap();
        assert_eq!(sb.inode_region_sz, 4);
        assert_eq!(sb.inode_map_sz, 1);
        assert_eq!(sb.block_map_sz, 1);

        let sb = plan(20_000, 17).unwrap();
        assert_eq!(sb.inode_region_sz, 2);
        assert_eq!(sb.block_map_sz, 3);
    }

    #[test]
    fn plan_rejects_tiny_devices() {
        assert!(matches!(plan(4, 16), Err(FsError::InvalidArgument)));
        assert!(matches!(plan(100, 0), Err(FsError::InvalidArgument)));
        assert!(plan(5, 16).is_ok());
    }

    #[test]
    fn format_marks_metadata_and_root() {
        let mut disk = RamDisk::new(256);
        let sb = format(&mut disk, 32).unwrap();
        let geo = Geometry::from_superblock(&sb);

        assert_eq!(Superblock::decode(disk.block(0)), sb);
        let imap = BitSet::from_bytes(disk.block(geo.inode_map_base).to_vec());
        assert!(imap.get(0) && imap.get(1) && !imap.get(2));

        let bmap = BitSet::from_bytes(disk.block(geo.block_map_base).to_vec());
        assert!((0..=geo.data_start).all(|b| bmap.get(b)));
        assert!(!bmap.get(geo.data_start + 1));

        let table = disk.block(geo.inode_base);
        let root = Inode::decode(&table[INODE_SIZE..2 * INODE_SIZE]);
        assert!(root.is_dir());
        assert_eq!(root.mode & 0o777, 0o755);
        assert_eq!(root.direct[0], geo.data_start);
        assert_eq!(root.size, 0);
    }
}
