mod common;

use common::{fresh_fs, remount};
use fsx::fs_layout::{DIRENTS_PER_BLOCK, ROOT_INODE, S_IFDIR, S_IFMT, S_IFREG};
use fsx::FsError;

#[test]
fn test_resolve_root_and_idempotence() {
    let mut fs = fresh_fs(2048, 64);
    assert_eq!(fs.resolve("/").unwrap(), ROOT_INODE);
    assert_eq!(fs.resolve("").unwrap(), ROOT_INODE);

    fs.mkdir("/a", 0o755).unwrap();
    let f = fs.mknod("/a/f", 0o644).unwrap();
    let free = fs.count_free_blocks();
    for _ in 0..3 {
        assert_eq!(fs.resolve("/a/f").unwrap(), f);
        assert_eq!(fs.resolve("/a/./../a//f").unwrap(), f);
    }
    assert_eq!(fs.count_free_blocks(), free);
}

#[test]
fn test_resolve_errors() {
    let mut fs = fresh_fs(2048, 64);
    fs.mknod("/f", 0o644).unwrap();

    assert!(matches!(fs.resolve("/nope"), Err(FsError::NotFound)));
    assert!(matches!(fs.resolve("/f/x"), Err(FsError::NotADirectory)));
    assert!(matches!(fs.resolve_parent("/f/x"), Err(FsError::NotADirectory)));
    assert!(matches!(fs.resolve_parent("/"), Err(FsError::InvalidArgument)));

    let long = format!("/{}", "z".repeat(28));
    assert!(matches!(fs.mknod(&long, 0o644), Err(FsError::InvalidArgument)));
}

#[test]
fn test_mkdir_nested_listing() {
    let mut fs = fresh_fs(2048, 64);
    fs.mkdir("/a", 0o755).unwrap();
    fs.mkdir("/a/b", 0o755).unwrap();

    let listing = fs.list_directory("/a").unwrap();
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0].name, "b");
    assert!(listing[0].stat.is_dir());

    let root: Vec<_> = fs.list_directory("/").unwrap().into_iter().map(|e| e.name).collect();
    assert_eq!(root, ["a"]);
}

#[test]
fn test_create_sets_type_owner_and_times() {
    let mut fs = fresh_fs(2048, 64);
    fs.mknod("/f", 0o640 | S_IFDIR).unwrap();
    fs.mkdir("/d", 0o750).unwrap();

    let f = fs.stat("/f").unwrap();
    assert_eq!(f.mode & S_IFMT, S_IFREG);
    assert_eq!(f.mode & 0o777, 0o640);
    assert_eq!(f.size, 0);
    assert_eq!(f.nlink, 1);
    assert_eq!(f.blksize, 1024);
    assert_eq!(f.ctime, f.mtime);
    assert_eq!(f.atime, f.mtime);

    let d = fs.stat("/d").unwrap();
    assert!(d.is_dir());
    assert_eq!(d.mode & 0o777, 0o750);

    let root = fs.stat("/").unwrap();
    assert_eq!((f.uid, f.gid), (root.uid, root.gid));
}

#[test]
fn test_create_existing_fails() {
    let mut fs = fresh_fs(2048, 64);
    fs.mknod("/f", 0o644).unwrap();
    let inodes = fs.count_free_inodes();
    assert!(matches!(fs.mknod("/f", 0o644), Err(FsError::AlreadyExists)));
    assert!(matches!(fs.mkdir("/f", 0o755), Err(FsError::AlreadyExists)));
    assert!(matches!(fs.mkdir("/", 0o755), Err(FsError::InvalidArgument)));
    assert_eq!(fs.count_free_inodes(), inodes);
}

#[test]
fn test_create_delete_restores_counts() {
    let mut fs = fresh_fs(2048, 64);
    let blocks = fs.count_free_blocks();
    let inodes = fs.count_free_inodes();

    fs.mknod("/f", 0o644).unwrap();
    fs.write("/f", 0, &vec![1u8; 9000]).unwrap();
    fs.mkdir("/d", 0o755).unwrap();
    assert!(fs.count_free_blocks() < blocks);
    assert_eq!(fs.count_free_inodes(), inodes - 2);

    fs.delete("/f").unwrap();
    fs.delete("/d").unwrap();
    assert_eq!(fs.count_free_blocks(), blocks);
    assert_eq!(fs.count_free_inodes(), inodes);
    assert!(fs.list_directory("/").unwrap().is_empty());

    let fs = remount(fs);
    assert_eq!(fs.count_free_blocks(), blocks);
    assert_eq!(fs.count_free_inodes(), inodes);
}

#[test]
fn test_directory_capacity() {
    let mut fs = fresh_fs(2048, 64);
    fs.mkdir("/d", 0o755).unwrap();
    for i in 0..DIRENTS_PER_BLOCK {
        fs.mknod(&format!("/d/f{}", i), 0o644).unwrap();
    }
    let inodes = fs.count_free_inodes();
    let blocks = fs.count_free_blocks();

    assert!(matches!(fs.mknod("/d/extra", 0o644), Err(FsError::NoSpace)));
    assert!(matches!(fs.mkdir("/d/extra", 0o755), Err(FsError::NoSpace)));
    assert_eq!(fs.list_directory("/d").unwrap().len(), DIRENTS_PER_BLOCK);
    assert_eq!(fs.count_free_inodes(), inodes);
    assert_eq!(fs.count_free_blocks(), blocks);

    // A freed slot is reused.
    fs.unlink("/d/f7").unwrap();
    fs.mknod("/d/extra", 0o644).unwrap();
}

#[test]
fn test_inode_exhaustion() {
    // 16 inodes: 0 and 1 reserved, 14 usable.
    let mut fs = fresh_fs(256, 16);
    for i in 0..14 {
        fs.mknod(&format!("/f{}", i), 0o644).unwrap();
    }
    assert_eq!(fs.count_free_inodes(), 0);
    assert!(matches!(fs.mknod("/f14", 0o644), Err(FsError::NoSpace)));
    assert!(matches!(fs.resolve("/f14"), Err(FsError::NotFound)));
}

#[test]
fn test_mkdir_without_blocks_rolls_back() {
    let mut fs = fresh_fs(64, 16);
    fs.mknod("/big", 0o644).unwrap();
    let data = vec![0xaau8; 100_000];
    let n = fs.write("/big", 0, &data).unwrap();
    assert!(n < data.len());
    assert_eq!(fs.count_free_blocks(), 0);

    let inodes = fs.count_free_inodes();
    assert!(matches!(fs.mkdir("/d", 0o755), Err(FsError::NoSpace)));
    assert_eq!(fs.count_free_inodes(), inodes);
    assert!(matches!(fs.resolve("/d"), Err(FsError::NotFound)));
}

#[test]
fn test_rmdir_and_unlink_type_checks() {
    let mut fs = fresh_fs(2048, 64);
    fs.mkdir("/d", 0o755).unwrap();
    fs.mknod("/d/f", 0o644).unwrap();

    assert!(matches!(fs.rmdir("/d"), Err(FsError::NotEmpty)));
    assert!(matches!(fs.delete("/d"), Err(FsError::NotEmpty)));
    assert!(matches!(fs.rmdir("/d/f"), Err(FsError::NotADirectory)));
    assert!(matches!(fs.unlink("/d"), Err(FsError::IsADirectory)));
    assert!(matches!(fs.rmdir("/"), Err(FsError::InvalidArgument)));
    assert!(matches!(fs.delete("/"), Err(FsError::InvalidArgument)));
    assert!(matches!(fs.unlink("/d/missing"), Err(FsError::NotFound)));

    fs.unlink("/d/f").unwrap();
    fs.rmdir("/d").unwrap();
    assert!(matches!(fs.stat("/d"), Err(FsError::NotFound)));
}

#[test]
fn test_rename_in_place() {
    let mut fs = fresh_fs(2048, 64);
    fs.mkdir("/a", 0o755).unwrap();
    let x = fs.mknod("/a/x", 0o644).unwrap();
    fs.write("/a/x", 0, b"payload").unwrap();

    fs.rename("/a/x", "/a/y").unwrap();
    assert_eq!(fs.resolve("/a/y").unwrap(), x);
    assert!(matches!(fs.resolve("/a/x"), Err(FsError::NotFound)));

    let mut buf = [0u8; 7];
    assert_eq!(fs.read("/a/y", 0, &mut buf).unwrap(), 7);
    assert_eq!(&buf, b"payload");

    let fs = remount(fs);
    assert_eq!(fs.resolve("/a/y").unwrap(), x);
}

#[test]
fn test_rename_errors() {
    let mut fs = fresh_fs(2048, 64);
    fs.mkdir("/a", 0o755).unwrap();
    fs.mkdir("/b", 0o755).unwrap();
    fs.mknod("/a/x", 0o644).unwrap();
    fs.mknod("/a/z", 0o644).unwrap();

    assert!(matches!(fs.rename("/a/x", "/b/y"), Err(FsError::InvalidArgument)));
    assert!(matches!(fs.rename("/a/x", "/a/z"), Err(FsError::AlreadyExists)));
    assert!(matches!(fs.rename("/a/missing", "/a/q"), Err(FsError::NotFound)));
    assert!(matches!(fs.rename("/", "/q"), Err(FsError::InvalidArgument)));

    // A destination parent that is missing or is a file is another directory.
    fs.mknod("/f", 0o644).unwrap();
    assert!(matches!(fs.rename("/a/x", "/nope/y"), Err(FsError::InvalidArgument)));
    assert!(matches!(fs.rename("/a/x", "/f/y"), Err(FsError::InvalidArgument)));
    assert!(matches!(fs.rename("/a/missing", "/nope/y"), Err(FsError::NotFound)));
    assert!(fs.resolve("/a/x").is_ok());
}

#[test]
fn test_change_mode_and_time() {
    let mut fs = fresh_fs(2048, 64);
    fs.mknod("/f", 0o644).unwrap();
    fs.mkdir("/d", 0o755).unwrap();

    fs.change_mode("/f", 0o600).unwrap();
    fs.change_mode("/d", S_IFREG | 0o700).unwrap();
    fs.change_time("/f", 1_000_000).unwrap();

    let fs = remount(fs);
    let f = fs.stat("/f").unwrap();
    assert_eq!(f.mode, S_IFREG | 0o600);
    assert_eq!(f.mtime, 1_000_000);
    assert_eq!(fs.stat("/d").unwrap().mode, S_IFDIR | 0o700);
}

#[test]
fn test_open_and_opendir() {
    let mut fs = fresh_fs(2048, 64);
    let f = fs.mknod("/f", 0o644).unwrap();
    fs.mkdir("/d", 0o755).unwrap();

    assert_eq!(fs.open("/f").unwrap(), f);
    fs.release("/f").unwrap();
    assert!(matches!(fs.open("/d"), Err(FsError::IsADirectory)));
    assert!(matches!(fs.opendir("/f"), Err(FsError::NotADirectory)));
    assert_eq!(fs.opendir("/").unwrap(), ROOT_INODE);
    fs.releasedir("/d").unwrap();
    assert!(matches!(fs.open("/missing"), Err(FsError::NotFound)));
    assert!(matches!(fs.list_directory("/f"), Err(FsError::NotADirectory)));
}

#[test]
fn test_statfs() {
    let mut fs = fresh_fs(2048, 64);
    let geo = *fs.geometry();
    let st = fs.statfs();
    assert_eq!(st.block_size, 1024);
    assert_eq!(st.total_blocks, u64::from(2048 - geo.data_start));
    // Only the root directory block is in use.
    assert_eq!(st.free_blocks, st.total_blocks - 1);
    assert_eq!(st.available_blocks, st.free_blocks);
    assert_eq!(st.total_inodes, 64);
    assert_eq!(st.free_inodes, 62);
    assert_eq!(st.max_name_len, 27);

    fs.mkdir("/d", 0o755).unwrap();
    let st2 = fs.statfs();
    assert_eq!(st2.free_blocks, st.free_blocks - 1);
    assert_eq!(st2.free_inodes, st.free_inodes - 1);
}
