//! Path parsing and resolution.

use crate::device::BlockDevice;
use crate::error::{FsError, Result};
use crate::fs_layout::{MAX_NAME_LEN, ROOT_INODE};
use crate::mount::FilesystemMount;

/// Splits `path` into normalized components.
///
/// Empty and `.` components are dropped and `..` removes the component
/// before it; a `..` at the start of the path is ignored.
pub fn parse(path: &str) -> Result<Vec<String>> {
    let mut names: Vec<String> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                names.pop();
            }
            name if name.len() > MAX_NAME_LEN => return Err(FsError::InvalidArgument),
            name => names.push(name.to_string()),
        }
    }
    Ok(names)
}

impl<D: BlockDevice> FilesystemMount<D> {
    /// Inode number of `name` inside directory `dir`.
    ///
    /// Inode numbers past the end of the table are reported as `Corrupt`.
    pub fn lookup(&self, dir: u32, name: &str) -> Result<u32> {
        match self.load_dir(dir)?.find(name) {
            0 => Err(FsError::NotFound),
            inum if inum as usize >= self.inodes.len() => Err(FsError::Corrupt(format!(
                "entry {} points to inode {}",
                name, inum
            ))),
            inum => Ok(inum),
        }
    }

    fn walk(&self, names: &[String]) -> Result<u32> {
        let mut inum = ROOT_INODE;
        for name in names {
            if !self.inodes[inum as usize].is_dir() {
                return Err(FsError::NotADirectory);
            }
            inum = self.lookup(inum, name)?;
        }
        Ok(inum)
    }

    /// Walks `path` from the root to an inode number.
    pub fn resolve(&self, path: &str) -> Result<u32> {
        let names = parse(path)?;
        self.walk(&names)
    }

    /// Walks all but the last component of `path`. Returns the parent inode
    /// and the leaf name, which need not exist yet.
    pub fn resolve_parent(&self, path: &str) -> Result<(u32, String)> {
        let mut names = parse(path)?;
        let leaf = names.pop().ok_or(FsError::InvalidArgument)?;
        let parent = self.walk(&names)?;
        if !self.inodes[parent as usize].is_dir() {
            return Err(FsError::NotADirectory);
        }
        Ok((parent, leaf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::RamDisk;
    use crate::mkfs::format;

    fn fresh() -> FilesystemMount<RamDisk> {
        let mut disk = RamDisk::new(256);
        format(&mut disk, 32).unwrap();
        FilesystemMount::mount(disk).unwrap()
    }

    // Plants a root entry naming an inode past the end of the table.
    fn plant_bad_entry(fs: &mut FilesystemMount<RamDisk>, name: &str, is_dir: bool) {
        let mut root = fs.load_dir(ROOT_INODE).unwrap();
        let slot = root.find_free_slot().unwrap();
        root.insert(slot, name, 9999, is_dir);
        fs.store_dir(ROOT_INODE, &root).unwrap();
    }

    #[test]
    fn out_of_range_entries_are_corrupt() {
        let mut fs = fresh();
        plant_bad_entry(&mut fs, "f", false);
        plant_bad_entry(&mut fs, "d", true);

        assert!(matches!(fs.lookup(ROOT_INODE, "f"), Err(FsError::Corrupt(_))));
        assert!(matches!(fs.resolve("/d/x"), Err(FsError::Corrupt(_))));
        assert!(matches!(fs.unlink("/f"), Err(FsError::Corrupt(_))));
        assert!(matches!(fs.rmdir("/d"), Err(FsError::Corrupt(_))));
    }

    #[test]
    fn parse_normalizes_components() {
        assert!(parse("/").unwrap().is_empty());
        assert!(parse("").unwrap().is_empty());
        assert_eq!(parse("/a//b/./c/").unwrap(), ["a", "b", "c"]);
        assert_eq!(parse("/a/b/../c").unwrap(), ["a", "c"]);
        assert_eq!(parse("/../a").unwrap(), ["a"]);
        assert_eq!(parse("a/../../b").unwrap(), ["b"]);
    }

    #[test]
    fn parse_rejects_long_names() {
        let ok = format!("/{}", "n".repeat(MAX_NAME_LEN));
        assert_eq!(parse(&ok).unwrap().len(), 1);

        let long = format!("/d/{}", "n".repeat(MAX_NAME_LEN + 1));
        assert!(matches!(parse(&long), Err(FsError::InvalidArgument)));
    }
}
