//! Directory entries.
//!
//! A directory owns exactly one data block, referenced by its first direct
//! pointer, holding `DIRENTS_PER_BLOCK` fixed-size entries. Directories never
//! grow past that block.

use log::{debug, warn};

use crate::device::BlockDevice;
use crate::error::{FsError, Result};
use crate::fs_layout::{DirEntry, BLOCK_SIZE, DIRENTS_PER_BLOCK, DIRENT_SIZE};
use crate::mount::FilesystemMount;

/// Decoded image of one directory block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirBlock {
    entries: Vec<DirEntry>,
}

impl Default for DirBlock {
    fn default() -> Self {
        Self {
            entries: vec![DirEntry::empty(); DIRENTS_PER_BLOCK],
        }
    }
}

impl DirBlock {
    pub fn decode(buf: &[u8]) -> Self {
        Self {
            entries: buf.chunks_exact(DIRENT_SIZE).map(DirEntry::decode).collect(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; BLOCK_SIZE];
        for (slot, e) in buf.chunks_exact_mut(DIRENT_SIZE).zip(&self.entries) {
            e.encode_into(slot);
        }
        buf
    }

    /// Inode number of the first valid entry named `name`, or 0.
    pub fn find(&self, name: &str) -> u32 {
        self.entries
            .iter()
            .find(|e| e.valid && e.name_eq(name))
            .map_or(0, |e| e.inode)
    }

    pub fn find_free_slot(&self) -> Result<usize> {
        self.entries
            .iter()
            .position(|e| !e.valid)
            .ok_or(FsError::NoSpace)
    }

    pub fn is_empty(&self) -> bool {
        !self.entries.iter().any(|e| e.valid)
    }

    pub fn insert(&mut self, slot: usize, name: &str, inum: u32, is_dir: bool) {
        self.entries[slot] = DirEntry::new(inum, name, is_dir);
    }

    /// Zeroes the first valid entry named `name`. Returns whether one was
    /// found.
    pub fn remove(&mut self, name: &str) -> bool {
        match self.entries.iter_mut().find(|e| e.valid && e.name_eq(name)) {
            Some(e) => {
                *e = DirEntry::empty();
                true
            }
            None => false,
        }
    }

    /// Rewrites the name of the entry called `from` in place.
    pub fn rename(&mut self, from: &str, to: &str) -> bool {
        match self.entries.iter_mut().find(|e| e.valid && e.name_eq(from)) {
            Some(e) => {
                e.set_name(to);
                true
            }
            None => false,
        }
    }

    /// Valid entries in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &DirEntry> {
        self.entries.iter().filter(|e| e.valid)
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }
}

impl<D: BlockDevice> FilesystemMount<D> {
    fn dir_block_of(&self, dir: u32) -> Result<u32> {
        let inode = &self.inodes[dir as usize];
        if !inode.is_dir() {
            return Err(FsError::NotADirectory);
        }
        match inode.direct[0] {
            0 => Err(FsError::Corrupt(format!("directory {} has no block", dir))),
            blk => Ok(blk),
        }
    }

    pub(crate) fn load_dir(&self, dir: u32) -> Result<DirBlock> {
        let blk = self.dir_block_of(dir)?;
        Ok(DirBlock::decode(&self.read_block(blk)?))
    }

    pub(crate) fn store_dir(&mut self, dir: u32, block: &DirBlock) -> Result<()> {
        let blk = self.dir_block_of(dir)?;
        self.write_block(blk, &block.encode())
    }

    /// Adds `name -> inum` to directory `dir`.
    pub(crate) fn add_entry(&mut self, dir: u32, name: &str, inum: u32, is_dir: bool) -> Result<()> {
        let mut block = self.load_dir(dir)?;
        let slot = block.find_free_slot().map_err(|e| {
            warn!("directory {} is full", dir);
            e
        })?;
        block.insert(slot, name, inum, is_dir);
        self.store_dir(dir, &block)?;
        debug!("dir {}: added {} -> {} in slot {}", dir, name, inum, slot);
        Ok(())
    }

    pub(crate) fn remove_entry(&mut self, dir: u32, name: &str) -> Result<()> {
        let mut block = self.load_dir(dir)?;
        if !block.remove(name) {
            return Err(FsError::NotFound);
        }
        self.store_dir(dir, &block)?;
        debug!("dir {}: removed {}", dir, name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_ignores_invalid_entries() {
        let mut block = DirBlock::default();
        block.insert(0, "a", 5, false);
        block.insert(1, "b", 6, true);
        assert_eq!(block.find("b"), 6);
        assert_eq!(block.find("c"), 0);

        assert!(block.remove("a"));
        assert_eq!(block.find("a"), 0);
        assert!(!block.remove("a"));
        assert_eq!(block.find_free_slot().unwrap(), 0);
    }

    #[test]
    fn full_block_has_no_free_slot() {
        let mut block = DirBlock::default();
        for i in 0..DIRENTS_PER_BLOCK {
            let slot = block.find_free_slot().unwrap();
            block.insert(slot, &format!("f{}", i), i as u32 + 2, false);
        }
        assert_eq!(block.len(), DIRENTS_PER_BLOCK);
        assert!(matches!(block.find_free_slot(), Err(FsError::NoSpace)));
    }

    #[test]
    fn removed_entry_is_all_zero_on_disk() {
        let mut block = DirBlock::default();
        assert!(block.is_empty());
        block.insert(3, "gone", 9, false);
        assert!(!block.is_empty());
        block.remove("gone");

        let buf = block.encode();
        assert!(buf[3 * DIRENT_SIZE..4 * DIRENT_SIZE].iter().all(|&b| b == 0));
        assert!(block.is_empty());
    }

    #[test]
    fn rename_keeps_slot_and_inode() {
        let mut block = DirBlock::default();
        block.insert(2, "old", 11, false);
        assert!(block.rename("old", "new"));
        let buf = block.encode();
        let decoded = DirBlock::decode(&buf);
        assert_eq!(decoded.find("new"), 11);
        assert_eq!(decoded.find("old"), 0);
        assert_eq!(decoded.iter().next().map(|e| e.inode), Some(11));
    }
}
