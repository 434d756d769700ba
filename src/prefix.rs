//! Glues prefix bytes in front of an existing file.
//!
//! The splice never edits the target in place: prefixes and the
//! original are streamed into a sibling temporary file, the offset
//! fix-up runs there, and only a fully adjusted result is renamed
//! over the target. A failure at any point leaves the original
//! exactly as it was.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use log::*;
use tempfile::NamedTempFile;

use crate::offsets::{adjust_zip_offsets, validate_zip_offsets};
use crate::result::*;

/// One chunk of data to place in front of an archive.
#[derive(Debug, Clone, Copy)]
pub enum Prefix<'a> {
    /// Raw bytes, written as given.
    Bytes(&'a [u8]),
    /// A file whose contents are copied verbatim.
    File(&'a Path),
}

impl<'a> From<&'a [u8]> for Prefix<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        Prefix::Bytes(bytes)
    }
}

impl<'a> From<&'a Path> for Prefix<'a> {
    fn from(path: &'a Path) -> Self {
        Prefix::File(path)
    }
}

impl Prefix<'_> {
    /// Streams this prefix into `out`, reporting how many bytes it was.
    fn copy_to(&self, out: &mut impl Write) -> ZipResult<u64> {
        match self {
            Prefix::Bytes(bytes) => {
                out.write_all(bytes)?;
                Ok(bytes.len() as u64)
            }
            Prefix::File(path) => {
                let mut source = File::open(path)?;
                Ok(io::copy(&mut source, out)?)
            }
        }
    }
}

/// Prepends `prefixes`, in order, to the ZIP archive at `target`,
/// adjusting its internal offsets so it stays readable by standard
/// ZIP tools. The archive is validated before anything else happens.
///
/// Returns the total number of prefix bytes written.
pub fn apply_prefixes_to_zip<P: AsRef<Path>>(target: P, prefixes: &[Prefix]) -> ZipResult<u64> {
    let target = target.as_ref();
    validate_zip_offsets(target)?;
    splice_prefixes(target, prefixes, true)
}

/// Prepends `prefixes`, in order, to the file at `target` without
/// caring what the file is: the bytes are mechanically glued
/// together and nothing is adjusted.
///
/// Returns the total number of prefix bytes written.
pub fn apply_prefixes<P: AsRef<Path>>(target: P, prefixes: &[Prefix]) -> ZipResult<u64> {
    splice_prefixes(target.as_ref(), prefixes, false)
}

fn splice_prefixes(target: &Path, prefixes: &[Prefix], adjust: bool) -> ZipResult<u64> {
    // The workfile must be a sibling so the final rename stays on one
    // filesystem and therefore atomic.
    let parent = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut workfile = NamedTempFile::new_in(parent)?;

    let mut prefixes_length: u64 = 0;
    for prefix in prefixes {
        prefixes_length += prefix.copy_to(workfile.as_file_mut())?;
    }
    let mut original = File::open(target)?;
    io::copy(&mut original, workfile.as_file_mut())?;
    workfile.as_file_mut().flush()?;

    if adjust && prefixes_length != 0 {
        let displacement = i64::try_from(prefixes_length).map_err(|_| {
            ZipError::Overflow("prefixes are too long to express as a displacement")
        })?;
        adjust_zip_offsets(workfile.path(), displacement)?;
    }

    debug!(
        "prepending {} bytes to {}",
        prefixes_length,
        target.display()
    );
    workfile
        .persist(target)
        .map_err(|persist| ZipError::Io(persist.error))?;
    Ok(prefixes_length)
}
