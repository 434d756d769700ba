//! zip-prefixer puts arbitrary bytes in front of an existing ZIP
//! archive without rebuilding it:
//!
//! ```no_run
//! use zip_prefixer::{apply_prefixes_to_zip, Prefix};
//!
//! # fn main() -> zip_prefixer::ZipResult<()> {
//! // Turn app.jar into something a shell will happily exec.
//! let stub: &[u8] = b"#!/bin/sh\nexec java -jar \"$0\" \"$@\"\n";
//! apply_prefixes_to_zip("app.jar", &[Prefix::Bytes(stub)])?;
//! # Ok(())
//! # }
//! ```
//!
//! A ZIP archive is read from the back: the End of central directory
//! record names where the central directory starts, and each
//! directory entry names where its file's local header sits. All of
//! those are absolute offsets, so gluing bytes onto the front of the
//! file leaves every one of them stale. Instead of re-encoding the
//! archive (everything else in it is position-independent), this
//! crate walks exactly the offset-bearing records (the EOCDR, the
//! ZIP64 locator and record when present, each central directory
//! entry, and ZIP64 extended information fields) and shifts each
//! stored offset by the prefix length. Entry payloads, names, checksums and
//! comments are never touched.
//!
//! Every offset is located and cross-checked before a single byte is
//! rewritten, and the splice itself happens in a sibling temporary
//! file, so a broken input or a failure along the way leaves the
//! original archive intact.

pub mod offsets;
pub mod prefix;
pub mod result;

mod pattern;

pub use offsets::{adjust_zip_offsets, probe_zip, validate_zip_offsets};
pub use prefix::{apply_prefixes, apply_prefixes_to_zip, Prefix};
pub use result::{ZipError, ZipResult};
