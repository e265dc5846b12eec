#![forbid(unsafe_code)]
//! `fat2ext4`: convert a FAT32 volume to ext4 in place.
//!
//! Exit codes: 0 on success, 1 when the conversion was refused or aborted
//! before any destructive write (the volume still mounts as FAT32), 2 when
//! it failed after the commit began (the volume is in an undefined state).

use anyhow::{Context, Result};
use clap::Parser;
use f2e_core::{convert, ConvertOptions};
use f2e_error::ConvertError;
use f2e_image::FileImage;
use std::os::unix::fs::MetadataExt;
use std::path::PathBuf;
use std::process::Command;
use tracing::warn;

/// Convert a FAT32 volume to ext4 in place, using its own free space as
/// the only scratch storage.
///
/// There is no undo. If the conversion fails after the commit phase has
/// begun, the volume is neither FAT32 nor ext4.
#[derive(Parser)]
#[command(name = "fat2ext4", version)]
struct Cli {
    /// Block device or image file holding the FAT32 volume.
    partition: PathBuf,

    /// Skip the fsck.fat consistency check.
    #[arg(short, long)]
    force: bool,

    /// Plan, relocate and verify, but stop before the destructive commit.
    #[arg(long)]
    dry_run: bool,

    /// Owner uid for all files (default: owner of the partition).
    #[arg(long)]
    uid: Option<u32>,

    /// Owner gid for all files (default: owner of the partition).
    #[arg(long)]
    gid: Option<u32>,

    /// Print the conversion summary as JSON.
    #[arg(long)]
    json: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => {}
        Err(error) => {
            eprintln!("error: {error:#}");
            let code = error
                .downcast_ref::<ConvertError>()
                .map_or(1, |convert_error| convert_error.class().exit_code());
            std::process::exit(code);
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    if !cli.force {
        check_fat_consistency(cli)?;
    }

    let metadata = std::fs::metadata(&cli.partition)
        .with_context(|| format!("cannot stat {}", cli.partition.display()))?;
    let uid = cli.uid.unwrap_or_else(|| metadata.uid());
    let gid = cli.gid.unwrap_or_else(|| metadata.gid());

    let mut image = FileImage::open(&cli.partition)
        .with_context(|| format!("cannot open {}", cli.partition.display()))?;

    let mut options = ConvertOptions::with_owner(uid, gid);
    options.dry_run_only = cli.dry_run;

    let summary = convert(&mut image, &options)?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("serialize summary")?
        );
    } else {
        let state = if summary.committed {
            "converted to ext4"
        } else {
            "dry run only, volume unchanged"
        };
        println!("{}: {state}", cli.partition.display());
        println!(
            "  {} directories, {} files, {} inodes used",
            summary.directories, summary.regular_files, summary.inodes_used
        );
        println!(
            "  {} clusters relocated, {} archive pages, {} block groups",
            summary.relocated_clusters, summary.archive_pages, summary.block_groups
        );
        if summary.dropped_tail_blocks > 0 {
            println!(
                "  note: final {} blocks excluded (undersized trailing block group)",
                summary.dropped_tail_blocks
            );
        }
    }
    Ok(())
}

/// Run `fsck.fat -n` as a preflight check. A missing binary is only a
/// warning; a failing check refuses the conversion.
fn check_fat_consistency(cli: &Cli) -> Result<()> {
    let status = Command::new("fsck.fat")
        .arg("-n")
        .arg(&cli.partition)
        .status();
    match status {
        Ok(status) if status.success() => Ok(()),
        Ok(status) => {
            let code = status.code().unwrap_or(-1);
            Err(ConvertError::FsckFailed { status: code }.into())
        }
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            warn!("fsck.fat not found, skipping consistency check");
            Ok(())
        }
        Err(error) => Err(error).context("failed to run fsck.fat"),
    }
}
