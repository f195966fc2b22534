//! Configuration loader for the fsx tools.
//!
//! A `config.ini` describes the image to create or mount:
//!
//! ```ini
//! [filesystem]
//! total_blocks = 1024
//! inode_count = 64
//!
//! [storage]
//! data_dir = /tmp/fsx
//! image_prefix = disk
//!
//! [logging]
//! level = info
//! ```
//!
//! `inode_count` and the `[logging]` section are optional.

use std::path::{Path, PathBuf};

use configparser::ini::Ini;
use log::LevelFilter;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot load {path}: {reason}")]
    Load { path: String, reason: String },

    #[error("missing {section}.{key}")]
    Missing {
        section: &'static str,
        key: &'static str,
    },

    #[error("invalid {section}.{key}: {reason}")]
    Invalid {
        section: &'static str,
        key: &'static str,
        reason: String,
    },
}

/// Parameters of one fsx image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsxConfig {
    /// Device size in blocks, metadata included.
    pub total_blocks: u32,

    /// Requested inode count; `None` lets mkfs pick one from the size.
    pub inode_count: Option<u32>,

    /// Directory holding the image file.
    pub data_dir: String,

    /// Image file name without extension: `<data_dir>/<image_prefix>.img`.
    pub image_prefix: String,

    pub log_level: Option<LevelFilter>,
}

impl FsxConfig {
    pub fn image_path(&self) -> PathBuf {
        Path::new(&self.data_dir).join(format!("{}.img", self.image_prefix))
    }
}

/// Loads and validates a configuration file.
pub fn load_config(path: impl AsRef<Path>) -> Result<FsxConfig, ConfigError> {
    let path = path.as_ref();
    let mut ini = Ini::new();
    ini.load(path).map_err(|reason| ConfigError::Load {
        path: path.display().to_string(),
        reason,
    })?;
    from_ini(&ini)
}

/// Parses configuration text, as `load_config` does for a file.
pub fn parse_config(text: &str) -> Result<FsxConfig, ConfigError> {
    let mut ini = Ini::new();
    ini.read(text.to_string()).map_err(|reason| ConfigError::Load {
        path: "<string>".to_string(),
        reason,
    })?;
    from_ini(&ini)
}

fn get_str(ini: &Ini, section: &'static str, key: &'static str) -> Result<String, ConfigError> {
    ini.get(section, key)
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing { section, key })
}

fn get_u32(ini: &Ini, section: &'static str, key: &'static str) -> Result<Option<u32>, ConfigError> {
    let Some(raw) = ini.get(section, key) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<u32>()
        .map(Some)
        .map_err(|e| ConfigError::Invalid {
            section,
            key,
            reason: e.to_string(),
        })
}

fn from_ini(ini: &Ini) -> Result<FsxConfig, ConfigError> {
    // [filesystem]
    let total_blocks = get_u32(ini, "filesystem", "total_blocks")?.ok_or(ConfigError::Missing {
        section: "filesystem",
        key: "total_blocks",
    })?;
    let inode_count = get_u32(ini, "filesystem", "inode_count")?;

    // [storage]
    let data_dir = get_str(ini, "storage", "data_dir")?;
    let image_prefix = get_str(ini, "storage", "image_prefix")?;

    // [logging]
    let log_level = match ini.get("logging", "level") {
        None => None,
        Some(raw) => Some(raw.trim().parse::<LevelFilter>().map_err(|e| {
            ConfigError::Invalid {
                section: "logging",
                key: "level",
                reason: e.to_string(),
            }
        })?),
    };

    Ok(FsxConfig {
        total_blocks,
        inode_count,
        data_dir,
        image_prefix,
        log_level,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "
[filesystem]
total_blocks = 2048
inode_count = 64

[storage]
data_dir = /tmp/fsx
image_prefix = disk

[logging]
level = debug
";

    #[test]
    fn parses_all_sections() {
        let cfg = parse_config(SAMPLE).unwrap();
        assert_eq!(cfg.total_blocks, 2048);
        assert_eq!(cfg.inode_count, Some(64));
        assert_eq!(cfg.image_path(), PathBuf::from("/tmp/fsx/disk.img"));
        assert_eq!(cfg.log_level, Some(LevelFilter::Debug));
    }

    #[test]
    fn optional_keys_may_be_absent() {
        let cfg = parse_config(
            "[filesystem]\ntotal_blocks = 100\n[storage]\ndata_dir = d\nimage_prefix = p\n",
        )
        .unwrap();
        assert_eq!(cfg.inode_count, None);
        assert_eq!(cfg.log_level, None);
    }

    #[test]
    fn reports_missing_and_invalid_keys() {
        let err = parse_config("[storage]\ndata_dir = d\nimage_prefix = p\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Missing {
                key: "total_blocks",
                ..
            }
        ));

        let err = parse_config(
            "[filesystem]\ntotal_blocks = lots\n[storage]\ndata_dir = d\nimage_prefix = p\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "total_blocks", .. }));
    }
}
