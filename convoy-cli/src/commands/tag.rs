//! Image tag command
//!
//! Computes the tag a run would push without contacting the runner.

use anyhow::{Result, bail};
use clap::Args;
use convoy_core::domain::image::ImageTag;

/// Tag derivation inputs; exactly one must be given
#[derive(Args, Debug)]
pub struct TagArgs {
    /// Commit hash of a VCS source
    #[arg(long, conflicts_with = "build_number")]
    pub commit: Option<String>,

    /// Build number of a registry run
    #[arg(long)]
    pub build_number: Option<u64>,
}

pub fn handle_tag_command(args: TagArgs) -> Result<()> {
    println!("{}", derive_tag(&args)?);
    Ok(())
}

fn derive_tag(args: &TagArgs) -> Result<ImageTag> {
    match (&args.commit, args.build_number) {
        (Some(commit), _) => Ok(ImageTag::from_commit(commit.trim())?),
        (None, Some(number)) => Ok(ImageTag::from_build_number(number)),
        (None, None) => bail!("one of --commit or --build-number is required"),
    }
}
