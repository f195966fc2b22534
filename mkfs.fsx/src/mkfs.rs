//! mkfs module: creates a brand-new fsx image file.
//!
//! The tool only resolves parameters and creates the file; the on-disk
//! formatting itself is `fsx::mkfs::format`.

use std::fs::create_dir_all;
use std::path::{Path, PathBuf};

use fsx::config::{load_config, ConfigError};
use fsx::fs_layout::INODES_PER_BLOCK;
use fsx::mkfs::{default_inode_count, format};
use fsx::{DeviceError, FsError, ImageDevice};
use log::info;

/// What to create: image location, size and inode count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MkfsParams {
    pub image: PathBuf,
    pub total_blocks: u32,
    pub inode_count: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum MkfsError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cannot create {0}: {1}")]
    Create(PathBuf, std::io::Error),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Format(#[from] FsError),
}

impl MkfsParams {
    pub fn from_config(path: &Path) -> Result<Self, MkfsError> {
        let cfg = load_config(path)?;
        Ok(Self {
            image: cfg.image_path(),
            total_blocks: cfg.total_blocks,
            inode_count: cfg
                .inode_count
                .unwrap_or_else(|| default_inode_count(cfg.total_blocks)),
        })
    }
}

/// Creates (or truncates) the image file and formats it.
pub fn run_mkfs(params: &MkfsParams) -> Result<(), MkfsError> {
    if let Some(dir) = params.image.parent().filter(|d| !d.as_os_str().is_empty()) {
        create_dir_all(dir).map_err(|e| MkfsError::Create(dir.to_path_buf(), e))?;
    }

    let mut device = ImageDevice::create(&params.image, params.total_blocks)?;
    let sb = format(&mut device, params.inode_count)?;

    info!("superblock: {:?}", sb);
    println!(
        "fsx image created at {} ({} blocks, {} inodes)",
        device.path().display(),
        sb.num_blocks,
        sb.inode_region_sz * INODES_PER_BLOCK as u32
    );
    Ok(())
}
