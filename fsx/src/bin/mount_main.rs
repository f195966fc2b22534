//! Entry point for the `mount_fsx` tool.
//!
//! Usage:
//!     mount_fsx --config config.ini MOUNTPOINT
//!     mount_fsx --image disk.img MOUNTPOINT

use std::path::{Path, PathBuf};
use std::process::exit;

use clap::Parser;
use fsx::config::load_config;
use fsx::logging;
use fsx::mount_fuse::FsxFuse;
use fsx::{FilesystemMount, ImageDevice};

#[derive(Parser)]
struct Cli {
    /// Configuration file naming the image.
    #[arg(short, long, conflicts_with = "image", required_unless_present = "image")]
    config: Option<PathBuf>,

    /// Image file to mount directly.
    #[arg(short, long)]
    image: Option<PathBuf>,

    #[arg(value_name = "MOUNTPOINT")]
    mountpoint: PathBuf,

    /// More output; repeat for more.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let args = Cli::parse();

    let mut level = logging::level_from_verbosity(args.verbose);
    let image_path = match (&args.config, &args.image) {
        (Some(config), _) => match load_config(config) {
            Ok(cfg) => {
                if args.verbose == 0 {
                    level = cfg.log_level.unwrap_or(level);
                }
                cfg.image_path()
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                exit(1);
            }
        },
        (None, Some(image)) => image.clone(),
        (None, None) => unreachable!("clap requires --config or --image"),
    };
    if let Err(e) = logging::init(level) {
        eprintln!("Warning: logger not installed: {}", e);
    }

    if !image_path.exists() {
        eprintln!("Error: Filesystem image not found at {}", image_path.display());
        eprintln!("Please run mkfs_fsx first to create the filesystem.");
        exit(1);
    }
    if !Path::new(&args.mountpoint).exists() {
        eprintln!("Error: Mount point {} does not exist", args.mountpoint.display());
        exit(1);
    }

    let device = match ImageDevice::open(&image_path) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("Error: cannot open {}: {}", image_path.display(), e);
            exit(1);
        }
    };
    let fs = match FilesystemMount::mount(device) {
        Ok(fs) => fs,
        Err(e) => {
            eprintln!("Error: cannot mount {}: {}", image_path.display(), e);
            exit(1);
        }
    };

    println!("Mounting fsx filesystem...");
    println!("  Image: {}", image_path.display());
    println!("  Mount point: {}", args.mountpoint.display());

    let options = vec![
        fuser::MountOption::FSName("fsx".to_string()),
        fuser::MountOption::DefaultPermissions,
    ];

    match fuser::mount2(FsxFuse::new(fs), &args.mountpoint, &options) {
        Ok(()) => println!("Filesystem unmounted"),
        Err(e) => {
            eprintln!("Failed to mount filesystem: {}", e);
            exit(1);
        }
    }
}
