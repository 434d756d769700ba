//! Walks a ZIP archive's structural records and shifts every stored
//! offset by a fixed displacement, in place.
//!
//! We try to keep the nitty gritty of the record layouts here,
//! described as [`PatternSpec`] tables that quote the ZIP spec,
//! [`APPNOTE.TXT`].
//!
//! The walk happens in two strictly separated phases: a read phase
//! that locates and cross-checks every record while staging writes,
//! and a commit phase that only runs once the whole archive has
//! checked out. A broken or stale archive is therefore rejected
//! without a single byte changing.
//!
//! [`APPNOTE.TXT`]: https://pkware.cachefly.net/webdocs/APPNOTE/APPNOTE-6.3.10.TXT

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek};
use std::path::Path;

use log::*;

use crate::pattern::{apply_writes, ByteOrder, FieldSpec, PatternInstance, PatternSpec, Write};
use crate::result::*;

/// The all-ones escape marker in a legacy 16-bit field.
const SENTINEL_U16: u16 = 0xFFFF;
/// The all-ones escape marker in a legacy 32-bit field: the real
/// value lives in a ZIP64 record or extension.
const SENTINEL_U32: u32 = 0xFFFF_FFFF;

/// How far back from EOF we'll look for the EOCDR. The trailing
/// comment caps out at 64 KiB, so this is generous while still
/// bounding the scan on arbitrary non-archive input.
const EOCDR_SEARCH_SPAN: u64 = 512 * 1024;

// 4.3.16  End of central directory record:
//
// end of central dir signature    4 bytes  (0x06054b50)
// number of this disk             2 bytes
// number of the disk with the
// start of the central directory  2 bytes
// total number of entries in
// the central dir on this disk    2 bytes
// total number of entries in
// the central dir                 2 bytes
// size of the central directory   4 bytes
// offset of start of central
// directory with respect to
// the starting disk number        4 bytes
// zipfile comment length          2 bytes
fn eocdr_spec() -> PatternSpec {
    PatternSpec::new(
        ByteOrder::LittleEndian,
        [
            FieldSpec::with_magic(4, "signature", &[0x50, 0x4b, 0x05, 0x06]),
            FieldSpec::new(2, "disk_number"),
            FieldSpec::new(2, "cd_start_disk"),
            FieldSpec::new(2, "entries_on_this_disk"),
            FieldSpec::new(2, "total_entries"),
            FieldSpec::new(4, "cd_size"),
            FieldSpec::new(4, "cd_start_offset"),
            FieldSpec::new(2, "comment_length"),
        ],
    )
}

// 4.3.15 Zip64 end of central directory locator
//
// zip64 end of central dir locator
// signature                       4 bytes  (0x07064b50)
// number of the disk with the
// start of the zip64 end of
// central directory               4 bytes
// relative offset of the zip64
// end of central directory record 8 bytes
// total number of disks           4 bytes
fn zip64_locator_spec() -> PatternSpec {
    PatternSpec::new(
        ByteOrder::LittleEndian,
        [
            FieldSpec::with_magic(4, "signature", &[0x50, 0x4b, 0x06, 0x07]),
            FieldSpec::new(4, "zip64_eocdr_disk"),
            FieldSpec::new(8, "zip64_eocdr_offset"),
            FieldSpec::new(4, "total_disks"),
        ],
    )
}

// 4.3.14  Zip64 end of central directory record
//
// zip64 end of central dir
// signature                       4 bytes  (0x06064b50)
// size of zip64 end of central
// directory record                8 bytes
// version made by                 2 bytes
// version needed to extract       2 bytes
// number of this disk             4 bytes
// number of the disk with the
// start of the central directory  4 bytes
// total number of entries in the
// central directory on this disk  8 bytes
// total number of entries in the
// central directory               8 bytes
// size of the central directory   8 bytes
// offset of start of central
// directory with respect to
// the starting disk number        8 bytes
fn zip64_eocdr_spec() -> PatternSpec {
    PatternSpec::new(
        ByteOrder::LittleEndian,
        [
            FieldSpec::with_magic(4, "signature", &[0x50, 0x4b, 0x06, 0x06]),
            FieldSpec::new(8, "record_size"),
            FieldSpec::new(2, "version_made_by"),
            FieldSpec::new(2, "version_needed"),
            FieldSpec::new(4, "disk_number"),
            FieldSpec::new(4, "cd_start_disk"),
            FieldSpec::new(8, "entries_on_this_disk"),
            FieldSpec::new(8, "total_entries"),
            FieldSpec::new(8, "cd_size"),
            FieldSpec::new(8, "cd_start_offset"),
        ],
    )
}

// 4.3.12  Central directory structure, file header:
//
//   central file header signature   4 bytes  (0x02014b50)
//   version made by                 2 bytes
//   version needed to extract       2 bytes
//   general purpose bit flag        2 bytes
//   compression method              2 bytes
//   last mod file time              2 bytes
//   last mod file date              2 bytes
//   crc-32                          4 bytes
//   compressed size                 4 bytes
//   uncompressed size               4 bytes
//   file name length                2 bytes
//   extra field length              2 bytes
//   file comment length             2 bytes
//   disk number start               2 bytes
//   internal file attributes        2 bytes
//   external file attributes        4 bytes
//   relative offset of local header 4 bytes
fn cfh_spec() -> PatternSpec {
    PatternSpec::new(
        ByteOrder::LittleEndian,
        [
            FieldSpec::with_magic(4, "signature", &[0x50, 0x4b, 0x01, 0x02]),
            FieldSpec::new(2, "version_made_by"),
            FieldSpec::new(2, "version_needed"),
            FieldSpec::new(2, "flags"),
            FieldSpec::new(2, "compression_method"),
            FieldSpec::new(2, "mod_time"),
            FieldSpec::new(2, "mod_date"),
            FieldSpec::new(4, "crc32"),
            FieldSpec::new(4, "compressed_size"),
            FieldSpec::new(4, "uncompressed_size"),
            FieldSpec::new(2, "file_name_length"),
            FieldSpec::new(2, "extra_field_length"),
            FieldSpec::new(2, "file_comment_length"),
            FieldSpec::new(2, "disk_number_start"),
            FieldSpec::new(2, "internal_attributes"),
            FieldSpec::new(4, "external_attributes"),
            FieldSpec::new(4, "local_header_offset"),
        ],
    )
}

// 4.3.7  Local file header:
//
// local file header signature     4 bytes  (0x04034b50)
// version needed to extract       2 bytes
// general purpose bit flag        2 bytes
// compression method              2 bytes
// last mod file time              2 bytes
// last mod file date              2 bytes
// crc-32                          4 bytes
// compressed size                 4 bytes
// uncompressed size               4 bytes
// file name length                2 bytes
// extra field length              2 bytes
fn lfh_spec() -> PatternSpec {
    PatternSpec::new(
        ByteOrder::LittleEndian,
        [
            FieldSpec::with_magic(4, "signature", &[0x50, 0x4b, 0x03, 0x04]),
            FieldSpec::new(2, "version_needed"),
            FieldSpec::new(2, "flags"),
            FieldSpec::new(2, "compression_method"),
            FieldSpec::new(2, "mod_time"),
            FieldSpec::new(2, "mod_date"),
            FieldSpec::new(4, "crc32"),
            FieldSpec::new(4, "compressed_size"),
            FieldSpec::new(4, "uncompressed_size"),
            FieldSpec::new(2, "file_name_length"),
            FieldSpec::new(2, "extra_field_length"),
        ],
    )
}

/// The ZIP64 extended information field this particular CFH must be
/// carrying, reconstructed from its sentinel markers.
///
/// 4.5.3: each 8-byte value appears iff the corresponding 32-bit
/// field holds the all-ones escape, in a fixed order (uncompressed
/// size, compressed size, local header offset, disk start). We only
/// build this when the offset is escaped, so that field is always
/// last in the expectation.
fn zip64_extra_field_spec(cfh: &PatternInstance) -> PatternSpec {
    let mut fields = vec![
        FieldSpec::with_magic(2, "header_id", &[0x01, 0x00]),
        FieldSpec::new(2, "data_size"),
    ];
    if cfh.get_u32("uncompressed_size") == SENTINEL_U32 {
        fields.push(FieldSpec::new(8, "uncompressed_size"));
    }
    if cfh.get_u32("compressed_size") == SENTINEL_U32 {
        fields.push(FieldSpec::new(8, "compressed_size"));
    }
    fields.push(FieldSpec::new(8, "local_header_offset"));
    PatternSpec::new(ByteOrder::LittleEndian, fields)
}

/// Shifts a stored offset by the displacement. While adjusting, this
/// is also where a record actually sits: the prepend already moved
/// the whole archive, so stored + displacement = current position.
fn displaced(offset: u64, adjustment: i64) -> ZipResult<u64> {
    offset
        .checked_add_signed(adjustment)
        .ok_or(ZipError::InvalidArchive(
            "a displaced offset leaves the file entirely",
        ))
}

/// Narrows a displaced offset back into a legacy 4-byte field.
/// `0xFFFFFFFF` is not a value here, it's the ZIP64 escape, so the
/// last offset a non-ZIP64 archive can express is one below it.
fn narrowed(offset: u64) -> ZipResult<u32> {
    if offset >= u64::from(u32::MAX) {
        return Err(ZipError::Overflow(
            "the archive would need ZIP64 to hold offsets at or past 4 GiB",
        ));
    }
    Ok(offset as u32)
}

fn locate_eocdr<'a, R: Read + Seek>(
    spec: &'a PatternSpec,
    channel: &mut R,
) -> ZipResult<PatternInstance<'a>> {
    spec.seek_back(channel, EOCDR_SEARCH_SPAN)?
        .ok_or(ZipError::NotAnArchive(
            "no End of central directory record near the end of the file",
        ))
}

/// Quick, cheap check that this could be some kind of ZIP file:
/// does an EOCDR exist near the end?
pub fn probe_zip<P: AsRef<Path>>(path: P) -> ZipResult<()> {
    let mut channel = File::open(path)?;
    locate_eocdr(&eocdr_spec(), &mut channel)?;
    Ok(())
}

/// Validates that every stored offset points at the record it claims
/// to, without modifying anything.
pub fn validate_zip_offsets<P: AsRef<Path>>(path: P) -> ZipResult<()> {
    adjust_zip_offsets(path, 0)
}

/// Shifts every offset stored in the archive by `adjustment` bytes.
///
/// The file's contents must already have moved by that amount (i.e.
/// the prefix bytes are in place); this fixes up the bookkeeping.
/// An `adjustment` of 0 validates without writing.
///
/// All offsets are checked before any is rewritten, so structural
/// errors and overflows leave the file untouched.
pub fn adjust_zip_offsets<P: AsRef<Path>>(path: P, adjustment: i64) -> ZipResult<()> {
    let path = path.as_ref();
    let writes = {
        let mut channel = File::open(path)?;
        analyse_offsets(&mut channel, adjustment)?
    };
    if !writes.is_empty() {
        let mut channel = OpenOptions::new().write(true).open(path)?;
        apply_writes(writes, &mut channel)?;
    }
    Ok(())
}

/// The read phase: locates every offset-bearing record, cross-checks
/// it, and stages the writes that an adjustment needs. Produces no
/// writes at all when `adjustment` is 0.
pub(crate) fn analyse_offsets<R: Read + Seek>(
    channel: &mut R,
    adjustment: i64,
) -> ZipResult<Vec<Write>> {
    let adjusting = adjustment != 0;
    let mut writes = Vec::new();

    let eocdr_spec = eocdr_spec();
    let eocdr = locate_eocdr(&eocdr_spec, channel)?;
    debug!("EOCDR found at offset 0x{:08x}", eocdr.position());

    let mut requires_zip64 = false;

    let stored_cd_offset = eocdr.get_u32("cd_start_offset");
    let mut cd_offset = u64::from(stored_cd_offset);
    if stored_cd_offset != SENTINEL_U32 {
        if adjusting {
            cd_offset = displaced(cd_offset, adjustment)?;
            writes.push(eocdr.write_u32("cd_start_offset", narrowed(cd_offset)?));
        }
    } else {
        requires_zip64 = true;
    }

    let mut cd_entries = u64::from(eocdr.get_u16("entries_on_this_disk"));
    if cd_entries == u64::from(SENTINEL_U16) {
        requires_zip64 = true;
    }

    // A ZIP64 locator, if there is one, sits immediately before the
    // EOCDR. Look for it whether or not the EOCDR says it must exist.
    let locator_spec = zip64_locator_spec();
    let locator = match eocdr.position().checked_sub(locator_spec.size() as u64) {
        Some(position) => locator_spec.read(channel, position)?,
        None => None,
    };

    let zip64_eocdr_spec = zip64_eocdr_spec();
    match locator {
        None if requires_zip64 => {
            return Err(ZipError::InvalidArchive(
                "the EOCDR requires ZIP64, but there is no ZIP64 locator before it",
            ));
        }
        None => {}
        Some(locator) => {
            // From here on this is definitely a ZIP64 directory.
            debug!("ZIP64 locator found at offset 0x{:08x}", locator.position());

            let mut zip64_eocdr_offset = locator.get_u64("zip64_eocdr_offset");
            if adjusting {
                zip64_eocdr_offset = displaced(zip64_eocdr_offset, adjustment)?;
                writes.push(locator.write_u64("zip64_eocdr_offset", zip64_eocdr_offset));
            }

            let zip64_eocdr = zip64_eocdr_spec
                .read(channel, zip64_eocdr_offset)?
                .ok_or(ZipError::InvalidArchive(
                    "no ZIP64 End of central directory record where the locator points",
                ))?;
            debug!("ZIP64 EOCDR found at offset 0x{:08x}", zip64_eocdr.position());

            cd_offset = zip64_eocdr.get_u64("cd_start_offset");
            if adjusting {
                cd_offset = displaced(cd_offset, adjustment)?;
                writes.push(zip64_eocdr.write_u64("cd_start_offset", cd_offset));
            }

            cd_entries = zip64_eocdr.get_u64("entries_on_this_disk");
        }
    }

    walk_central_directory(channel, adjustment, cd_offset, cd_entries, &mut writes)?;
    Ok(writes)
}

/// Enumerates the central directory sequentially, resolving each
/// entry's local header offset (directly or through its ZIP64 extra
/// field) and verifying an LFH actually sits there.
fn walk_central_directory<R: Read + Seek>(
    channel: &mut R,
    adjustment: i64,
    cd_offset: u64,
    cd_entries: u64,
    writes: &mut Vec<Write>,
) -> ZipResult<()> {
    let adjusting = adjustment != 0;
    let cfh_spec = cfh_spec();
    let lfh_spec = lfh_spec();
    let mut cfh_buffer = Vec::with_capacity(cfh_spec.size());
    let mut lfh_buffer = Vec::with_capacity(lfh_spec.size());

    let mut sequential_offset = cd_offset;
    for _ in 0..cd_entries {
        let cfh = cfh_spec
            .read_into(channel, sequential_offset, &mut cfh_buffer)?
            .ok_or(ZipError::InvalidArchive(
                "a central file header is not where the directory says it is",
            ))?;
        trace!("CFH found at offset 0x{:08x}", cfh.position());

        // Skip over the file name so the cursor sits on the extra fields.
        sequential_offset += cfh_spec.size() as u64 + u64::from(cfh.get_u16("file_name_length"));
        let extra_field_length = u64::from(cfh.get_u16("extra_field_length"));

        let stored_lfh_offset = cfh.get_u32("local_header_offset");
        let lfh_offset;
        if stored_lfh_offset != SENTINEL_U32 {
            if adjusting {
                let shifted = displaced(u64::from(stored_lfh_offset), adjustment)?;
                writes.push(cfh.write_u32("local_header_offset", narrowed(shifted)?));
                lfh_offset = shifted;
            } else {
                lfh_offset = u64::from(stored_lfh_offset);
            }
        } else {
            // The real offset is escaped into the entry's ZIP64
            // extended information field. Sub-records are laid out as
            // header-id (2) | size (2) | data, so a failed match
            // advances by 4 + size to the next one.
            let extra_spec = zip64_extra_field_spec(&cfh);
            let extra = extra_spec
                .seek_forward(
                    channel,
                    sequential_offset,
                    sequential_offset,
                    sequential_offset + extra_field_length,
                    |sub| u64::from(sub.get_u16("data_size")) + 4,
                )?
                .ok_or(ZipError::InvalidArchive(
                    "an entry escapes its local header offset, but has no ZIP64 extra field",
                ))?;

            // The declared size must cover every 8-byte value the
            // sentinels promise (all fields except id and size).
            let needed = (extra_spec.field_count() - 2) * 8;
            if usize::from(extra.get_u16("data_size")) < needed {
                return Err(ZipError::InvalidArchive(
                    "the entry's ZIP64 extra field is too small for the values it must hold",
                ));
            }

            let mut offset = extra.get_u64("local_header_offset");
            if adjusting {
                offset = displaced(offset, adjustment)?;
                writes.push(extra.write_u64("local_header_offset", offset));
            }
            lfh_offset = offset;
        }

        lfh_spec
            .read_into(channel, lfh_offset, &mut lfh_buffer)?
            .ok_or(ZipError::InvalidArchive(
                "a local file header is not where its directory entry says it is",
            ))?;

        sequential_offset += extra_field_length + u64::from(cfh.get_u16("file_comment_length"));
    }
    Ok(())
}
