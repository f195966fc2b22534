//! fsx library
//!
//! Core of the fsx filesystem shared by every fsx binary (mkfs, info, mount):
//! on-disk layout, block devices, allocation, directories, path resolution and
//! the tiered block mapper, all driven through [`FilesystemMount`].

pub mod bitmap;
pub mod config;
pub mod device;
pub mod dir;
pub mod error;
pub mod fs_layout;
pub mod image;
pub mod logging;
pub mod mapper;
mod metadata;
pub mod mkfs;
pub mod mount;
pub mod path;

#[cfg(feature = "fuse")]
pub mod mount_fuse;

pub use device::{BlockDevice, RamDisk};
pub use error::{DeviceError, FsError, Result};
pub use image::ImageDevice;
pub use mount::{DirListing, FileStat, FilesystemMount, FsStats};
