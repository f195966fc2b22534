//! Error types shared by every fsx operation.

use thiserror::Error;

/// Failure reported by a block device.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("block address out of range")]
    BadAddress,

    #[error("device unavailable")]
    Unavailable,

    #[error("buffer length does not match the block count")]
    Size,

    #[error("host I/O error: {0}")]
    Host(#[from] std::io::Error),
}

/// Error returned by filesystem operations.
///
/// Everything except `Device` and `Corrupt` is a logical error the caller can
/// recover from. Device errors are never retried.
#[derive(Debug, Error)]
pub enum FsError {
    #[error("no such file or directory")]
    NotFound,

    #[error("not a directory")]
    NotADirectory,

    #[error("is a directory")]
    IsADirectory,

    #[error("file exists")]
    AlreadyExists,

    /// No free inode, data block or directory slot.
    #[error("no space left on filesystem")]
    NoSpace,

    #[error("invalid argument")]
    InvalidArgument,

    #[error("directory not empty")]
    NotEmpty,

    #[error("file too large")]
    FileTooLarge,

    #[error("corrupt filesystem: {0}")]
    Corrupt(String),

    #[error("device error: {0}")]
    Device(#[from] DeviceError),
}

impl FsError {
    /// POSIX errno reported to the host dispatch layer.
    pub fn errno(&self) -> i32 {
        match self {
            FsError::NotFound => libc::ENOENT,
            FsError::NotADirectory => libc::ENOTDIR,
            FsError::IsADirectory => libc::EISDIR,
            FsError::AlreadyExists => libc::EEXIST,
            FsError::NoSpace => libc::ENOSPC,
            FsError::InvalidArgument => libc::EINVAL,
            FsError::NotEmpty => libc::ENOTEMPTY,
            FsError::FileTooLarge => libc::EFBIG,
            FsError::Corrupt(_) | FsError::Device(_) => libc::EIO,
        }
    }
}

pub type Result<T> = std::result::Result<T, FsError>;
