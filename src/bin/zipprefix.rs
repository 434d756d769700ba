use std::path::PathBuf;

use anyhow::{Context, Result};
use log::*;
use structopt::StructOpt;

use zip_prefixer::{apply_prefixes_to_zip, probe_zip, validate_zip_offsets, Prefix};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "zipprefix",
    about = "Prepends files to a ZIP archive, keeping it readable"
)]
struct Opt {
    /// Pass multiple times for additional verbosity (info, debug, trace)
    #[structopt(short, long, parse(from_occurrences))]
    verbosity: usize,

    /// The ZIP archive to work on. With no prefix files, its offsets
    /// are only validated.
    #[structopt(name("ZIP file"))]
    zip_path: PathBuf,

    /// Files whose bytes go in front of the archive, in order
    #[structopt(name("prefix file"))]
    prefix_paths: Vec<PathBuf>,
}

fn main() -> Result<()> {
    let args = Opt::from_args();

    let mut errlog = stderrlog::new();
    errlog.verbosity(args.verbosity + 1);
    errlog.init()?;

    probe_zip(&args.zip_path)
        .with_context(|| format!("{} doesn't look like a ZIP file", args.zip_path.display()))?;

    if args.prefix_paths.is_empty() {
        validate_zip_offsets(&args.zip_path).context("Couldn't validate ZIP offsets")?;
        info!("validated offsets in {}", args.zip_path.display());
    } else {
        let prefixes: Vec<Prefix> = args
            .prefix_paths
            .iter()
            .map(|path| Prefix::File(path.as_path()))
            .collect();
        let written = apply_prefixes_to_zip(&args.zip_path, &prefixes)
            .context("Couldn't prefix the archive")?;
        info!("prefixed {} bytes on {}", written, args.zip_path.display());
    }
    Ok(())
}
