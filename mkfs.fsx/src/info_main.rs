//! CLI entry point for `fsx_info`
//!
//! Usage:
//!     fsx_info <image_file>

mod info;

use std::path::PathBuf;
use std::process::exit;

use clap::Parser;
use fsx::logging;

/// Simple inspection tool for fsx images
#[derive(Parser)]
struct Cli {
    /// Path to the .img file
    image: PathBuf,

    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let args = Cli::parse();
    let _ = logging::init(logging::level_from_verbosity(args.verbose));

    if let Err(e) = info::print_fs_info(&args.image) {
        eprintln!("fsx_info: {}: {}", args.image.display(), e);
        exit(1);
    }
}
