//! Entry point for the `mkfs_fsx` tool.
//!
//! Formats a new fsx image, either from a `config.ini` or from explicit
//! command-line parameters. The work itself lives in `mkfs.rs`.

mod mkfs;

use std::path::PathBuf;
use std::process::exit;

use clap::Parser;
use fsx::logging;
use fsx::mkfs::default_inode_count;

use crate::mkfs::{run_mkfs, MkfsParams};

/// Usage:
///
/// ```bash
/// mkfs_fsx --config config.ini
/// mkfs_fsx --image disk.img --blocks 2048 [--inodes 128]
/// ```
#[derive(Parser)]
struct Cli {
    /// Configuration file with `[filesystem]` and `[storage]` sections.
    #[arg(short, long, conflicts_with_all = ["image", "blocks", "inodes"])]
    config: Option<PathBuf>,

    /// Image file to create.
    #[arg(short, long, requires = "blocks", required_unless_present = "config")]
    image: Option<PathBuf>,

    /// Image size in 1024-byte blocks.
    #[arg(short, long)]
    blocks: Option<u32>,

    /// Inode count; defaults to one per four blocks.
    #[arg(short = 'n', long)]
    inodes: Option<u32>,

    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let args = Cli::parse();
    let _ = logging::init(logging::level_from_verbosity(args.verbose));

    let params = match (&args.config, &args.image, args.blocks) {
        (Some(config), _, _) => MkfsParams::from_config(config),
        (None, Some(image), Some(blocks)) => Ok(MkfsParams {
            image: image.clone(),
            total_blocks: blocks,
            inode_count: args.inodes.unwrap_or_else(|| default_inode_count(blocks)),
        }),
        _ => unreachable!("clap requires --config or --image with --blocks"),
    };

    if let Err(e) = params.and_then(|p| run_mkfs(&p)) {
        eprintln!("mkfs_fsx: {}", e);
        exit(1);
    }
}
