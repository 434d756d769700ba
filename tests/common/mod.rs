//! Hand-assembled test archives.
//!
//! Store-only entries with real CRCs, built byte by byte so the
//! tests know exactly where every record (and every offset field)
//! ends up.

/// Where the interesting records of a built archive sit.
pub struct Layout {
    pub cd_start: usize,
    pub eocdr: usize,
    pub cfh_positions: Vec<usize>,
    pub lfh_positions: Vec<usize>,
    pub zip64_eocdr: Option<usize>,
    pub zip64_locator: Option<usize>,
    /// Absolute position of each entry's 8-byte local-header offset
    /// inside its ZIP64 extended information field.
    pub eief_offset_positions: Vec<usize>,
}

// Offsets of the fields the adjuster rewrites, within their records.
pub const EOCDR_CD_OFFSET_FIELD: usize = 16;
pub const CFH_LFH_OFFSET_FIELD: usize = 42;
pub const LOCATOR_ZIP64_EOCDR_FIELD: usize = 8;
pub const ZIP64_EOCDR_CD_OFFSET_FIELD: usize = 48;

pub fn push_u16(bytes: &mut Vec<u8>, value: u16) {
    bytes.extend_from_slice(&value.to_le_bytes());
}

pub fn push_u32(bytes: &mut Vec<u8>, value: u32) {
    bytes.extend_from_slice(&value.to_le_bytes());
}

pub fn push_u64(bytes: &mut Vec<u8>, value: u64) {
    bytes.extend_from_slice(&value.to_le_bytes());
}

pub fn patch_u32(bytes: &mut [u8], position: usize, value: u32) {
    bytes[position..position + 4].copy_from_slice(&value.to_le_bytes());
}

pub fn patch_u64(bytes: &mut [u8], position: usize, value: u64) {
    bytes[position..position + 8].copy_from_slice(&value.to_le_bytes());
}

pub fn read_u32(bytes: &[u8], position: usize) -> u32 {
    u32::from_le_bytes(bytes[position..position + 4].try_into().unwrap())
}

pub fn read_u64(bytes: &[u8], position: usize) -> u64 {
    u64::from_le_bytes(bytes[position..position + 8].try_into().unwrap())
}

fn push_lfh(bytes: &mut Vec<u8>, name: &str, data: &[u8]) {
    bytes.extend_from_slice(&[0x50, 0x4b, 0x03, 0x04]);
    push_u16(bytes, 20); // version needed
    push_u16(bytes, 0); // flags
    push_u16(bytes, 0); // stored
    push_u16(bytes, 0); // mod time
    push_u16(bytes, 0x21); // mod date: 1980-01-01
    push_u32(bytes, crc32fast::hash(data));
    push_u32(bytes, data.len() as u32);
    push_u32(bytes, data.len() as u32);
    push_u16(bytes, name.len() as u16);
    push_u16(bytes, 0); // extra field length
    bytes.extend_from_slice(name.as_bytes());
    bytes.extend_from_slice(data);
}

/// A vanilla archive: local entries, a central directory, an EOCDR.
pub fn plain_zip(entries: &[(&str, &[u8])], comment: &[u8]) -> (Vec<u8>, Layout) {
    let mut bytes = Vec::new();

    let mut lfh_positions = Vec::new();
    for (name, data) in entries {
        lfh_positions.push(bytes.len());
        push_lfh(&mut bytes, name, data);
    }

    let cd_start = bytes.len();
    let mut cfh_positions = Vec::new();
    for ((name, data), lfh) in entries.iter().zip(&lfh_positions) {
        cfh_positions.push(bytes.len());
        bytes.extend_from_slice(&[0x50, 0x4b, 0x01, 0x02]);
        push_u16(&mut bytes, 20); // version made by
        push_u16(&mut bytes, 20); // version needed
        push_u16(&mut bytes, 0); // flags
        push_u16(&mut bytes, 0); // stored
        push_u16(&mut bytes, 0); // mod time
        push_u16(&mut bytes, 0x21); // mod date
        push_u32(&mut bytes, crc32fast::hash(data));
        push_u32(&mut bytes, data.len() as u32);
        push_u32(&mut bytes, data.len() as u32);
        push_u16(&mut bytes, name.len() as u16);
        push_u16(&mut bytes, 0); // extra field length
        push_u16(&mut bytes, 0); // comment length
        push_u16(&mut bytes, 0); // disk number start
        push_u16(&mut bytes, 0); // internal attributes
        push_u32(&mut bytes, 0); // external attributes
        push_u32(&mut bytes, *lfh as u32);
        bytes.extend_from_slice(name.as_bytes());
    }
    let cd_size = bytes.len() - cd_start;

    let eocdr = bytes.len();
    bytes.extend_from_slice(&[0x50, 0x4b, 0x05, 0x06]);
    push_u16(&mut bytes, 0); // this disk
    push_u16(&mut bytes, 0); // cd start disk
    push_u16(&mut bytes, entries.len() as u16);
    push_u16(&mut bytes, entries.len() as u16);
    push_u32(&mut bytes, cd_size as u32);
    push_u32(&mut bytes, cd_start as u32);
    push_u16(&mut bytes, comment.len() as u16);
    bytes.extend_from_slice(comment);

    (
        bytes,
        Layout {
            cd_start,
            eocdr,
            cfh_positions,
            lfh_positions,
            zip64_eocdr: None,
            zip64_locator: None,
            eief_offset_positions: Vec::new(),
        },
    )
}

/// An archive forced into ZIP64 form: every CFH escapes its sizes
/// and local-header offset into a ZIP64 extended information field,
/// and the EOCDR escapes the directory offset to the ZIP64 record.
///
/// With `junk_extra`, an unrelated extra sub-record precedes each
/// EIEF, so finding it requires stepping through the extra area.
pub fn zip64_zip(entries: &[(&str, &[u8])], junk_extra: bool) -> (Vec<u8>, Layout) {
    let mut bytes = Vec::new();

    let mut lfh_positions = Vec::new();
    for (name, data) in entries {
        lfh_positions.push(bytes.len());
        push_lfh(&mut bytes, name, data);
    }

    let cd_start = bytes.len();
    let mut cfh_positions = Vec::new();
    let mut eief_offset_positions = Vec::new();
    for ((name, data), lfh) in entries.iter().zip(&lfh_positions) {
        cfh_positions.push(bytes.len());
        let eief_size = 24u16; // uncompressed + compressed + offset
        let junk_length: u16 = if junk_extra { 8 } else { 0 };
        let extra_length = junk_length + 4 + eief_size;

        bytes.extend_from_slice(&[0x50, 0x4b, 0x01, 0x02]);
        push_u16(&mut bytes, 45); // version made by
        push_u16(&mut bytes, 45); // version needed
        push_u16(&mut bytes, 0); // flags
        push_u16(&mut bytes, 0); // stored
        push_u16(&mut bytes, 0); // mod time
        push_u16(&mut bytes, 0x21); // mod date
        push_u32(&mut bytes, crc32fast::hash(data));
        push_u32(&mut bytes, 0xFFFF_FFFF); // compressed size: escaped
        push_u32(&mut bytes, 0xFFFF_FFFF); // uncompressed size: escaped
        push_u16(&mut bytes, name.len() as u16);
        push_u16(&mut bytes, extra_length);
        push_u16(&mut bytes, 0); // comment length
        push_u16(&mut bytes, 0); // disk number start
        push_u16(&mut bytes, 0); // internal attributes
        push_u32(&mut bytes, 0); // external attributes
        push_u32(&mut bytes, 0xFFFF_FFFF); // local header offset: escaped
        bytes.extend_from_slice(name.as_bytes());

        if junk_extra {
            push_u16(&mut bytes, 0xC0DE); // some other extra field
            push_u16(&mut bytes, 4);
            push_u32(&mut bytes, 0);
        }
        push_u16(&mut bytes, 0x0001); // ZIP64 extended information
        push_u16(&mut bytes, eief_size);
        push_u64(&mut bytes, data.len() as u64); // uncompressed
        push_u64(&mut bytes, data.len() as u64); // compressed
        eief_offset_positions.push(bytes.len());
        push_u64(&mut bytes, *lfh as u64);
    }
    let cd_size = bytes.len() - cd_start;

    let zip64_eocdr = bytes.len();
    bytes.extend_from_slice(&[0x50, 0x4b, 0x06, 0x06]);
    push_u64(&mut bytes, 44); // size of the remaining record
    push_u16(&mut bytes, 45); // version made by
    push_u16(&mut bytes, 45); // version needed
    push_u32(&mut bytes, 0); // this disk
    push_u32(&mut bytes, 0); // cd start disk
    push_u64(&mut bytes, entries.len() as u64);
    push_u64(&mut bytes, entries.len() as u64);
    push_u64(&mut bytes, cd_size as u64);
    push_u64(&mut bytes, cd_start as u64);

    let zip64_locator = bytes.len();
    bytes.extend_from_slice(&[0x50, 0x4b, 0x06, 0x07]);
    push_u32(&mut bytes, 0); // zip64 eocdr disk
    push_u64(&mut bytes, zip64_eocdr as u64);
    push_u32(&mut bytes, 1); // total disks

    let eocdr = bytes.len();
    bytes.extend_from_slice(&[0x50, 0x4b, 0x05, 0x06]);
    push_u16(&mut bytes, 0); // this disk
    push_u16(&mut bytes, 0); // cd start disk
    push_u16(&mut bytes, entries.len() as u16);
    push_u16(&mut bytes, entries.len() as u16);
    push_u32(&mut bytes, cd_size as u32);
    push_u32(&mut bytes, 0xFFFF_FFFF); // cd offset: escaped
    push_u16(&mut bytes, 0); // comment length

    (
        bytes,
        Layout {
            cd_start,
            eocdr,
            cfh_positions,
            lfh_positions,
            zip64_eocdr: Some(zip64_eocdr),
            zip64_locator: Some(zip64_locator),
            eief_offset_positions,
        },
    )
}
