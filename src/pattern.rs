//! A small toolkit for reading and patching fixed-layout binary records.
//!
//! The idea is to describe a record the way APPNOTE.TXT tables do
//! (an ordered list of named fields, some carrying magic bytes) and
//! then read instances of it at arbitrary file positions.
//! Writes aren't performed directly: each patched field becomes a
//! [`Write`] that is queued up and committed later as a batch,
//! so nothing touches the file until the caller has seen everything
//! it wants to see.
//!
//! Nothing in here knows anything about ZIP; the [`offsets`] module
//! provides the record tables and drives the traversal.
//!
//! [`offsets`]: ../offsets/index.html

use std::borrow::Cow;
use std::io::{Read, Seek, SeekFrom, Write as _};

use log::*;
use memchr::memmem;

use crate::result::*;

/// Byte order of every multi-byte field in a pattern.
///
/// ZIP is little-endian throughout, but the engine doesn't care.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    LittleEndian,
    BigEndian,
}

/// One field of a record: a fixed width, a name to look it up by,
/// and optionally the literal bytes that identify the record kind.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    name: &'static str,
    size: usize,
    magic: Option<&'static [u8]>,
}

impl FieldSpec {
    pub fn new(size: usize, name: &'static str) -> Self {
        assert!(size > 0, "zero-width field {:?}", name);
        Self {
            name,
            size,
            magic: None,
        }
    }

    pub fn with_magic(size: usize, name: &'static str, magic: &'static [u8]) -> Self {
        assert_eq!(magic.len(), size, "magic width mismatch for {:?}", name);
        Self {
            name,
            size,
            magic: Some(magic),
        }
    }
}

/// A field bound to its offset within the record.
#[derive(Debug, Clone)]
struct BoundField {
    spec: FieldSpec,
    offset: usize,
}

/// An ordered sequence of fields plus a byte order; the record layout.
///
/// Field offsets are implied by declaration order, like a packed C
/// struct. Total size is the sum of the field widths.
#[derive(Debug)]
pub struct PatternSpec {
    byte_order: ByteOrder,
    size: usize,
    fields: Vec<BoundField>,
}

impl PatternSpec {
    pub fn new(byte_order: ByteOrder, fields: impl IntoIterator<Item = FieldSpec>) -> Self {
        let mut bound = Vec::new();
        let mut offset = 0;
        for spec in fields {
            let size = spec.size;
            bound.push(BoundField { spec, offset });
            offset += size;
        }
        Self {
            byte_order,
            size: offset,
            fields: bound,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Looking up a field that isn't in the record is a bug in the
    /// caller, not a property of the file, so it panics.
    fn field(&self, name: &str) -> &BoundField {
        self.fields
            .iter()
            .find(|f| f.spec.name == name)
            .unwrap_or_else(|| panic!("no field named {:?} in this pattern", name))
    }

    fn first_magic_field(&self) -> Option<&BoundField> {
        self.fields.iter().find(|f| f.spec.magic.is_some())
    }

    /// Reads an instance at `position` and validates its magic.
    ///
    /// `None` means "the record isn't there": either the magic didn't
    /// match or the record wouldn't fit before EOF.
    pub fn read<'a, R: Read + Seek>(
        &'a self,
        channel: &mut R,
        position: u64,
    ) -> ZipResult<Option<PatternInstance<'a>>> {
        let mut buffer = vec![0u8; self.size];
        if !fill_at(channel, position, &mut buffer)? {
            return Ok(None);
        }
        let instance = PatternInstance {
            spec: self,
            position,
            buffer: Cow::Owned(buffer),
        };
        Ok(if instance.magic_matches() {
            Some(instance)
        } else {
            None
        })
    }

    /// Like [`read`](Self::read), but reuses the caller's buffer
    /// instead of allocating one per record.
    ///
    /// The returned instance borrows the buffer, so it can't be
    /// refilled (and the instance's view of it corrupted) until the
    /// instance is gone.
    pub fn read_into<'a, R: Read + Seek>(
        &'a self,
        channel: &mut R,
        position: u64,
        buffer: &'a mut Vec<u8>,
    ) -> ZipResult<Option<PatternInstance<'a>>> {
        buffer.resize(self.size, 0);
        if !fill_at(channel, position, buffer)? {
            return Ok(None);
        }
        let instance = PatternInstance {
            spec: self,
            position,
            buffer: Cow::Borrowed(&buffer[..]),
        };
        Ok(if instance.magic_matches() {
            Some(instance)
        } else {
            None
        })
    }

    /// Reads an instance at `position` without checking any magic.
    /// Running past EOF is an error here, not absence.
    pub fn read_unvalidated<'a, R: Read + Seek>(
        &'a self,
        channel: &mut R,
        position: u64,
    ) -> ZipResult<PatternInstance<'a>> {
        let mut buffer = vec![0u8; self.size];
        channel.seek(SeekFrom::Start(position))?;
        channel.read_exact(&mut buffer)?;
        Ok(PatternInstance {
            spec: self,
            position,
            buffer: Cow::Owned(buffer),
        })
    }

    /// Searches backward from the end of the channel for the nearest
    /// position whose bytes match this pattern's magic, trying at
    /// most `max_distance` positions.
    ///
    /// The candidate window is loaded in one read and scanned with
    /// [`memmem`]; the first (i.e. last-in-file) full match wins.
    pub fn seek_back<'a, R: Read + Seek>(
        &'a self,
        channel: &mut R,
        max_distance: u64,
    ) -> ZipResult<Option<PatternInstance<'a>>> {
        let file_size = channel.seek(SeekFrom::End(0))?;
        if (self.size as u64) > file_size {
            return Ok(None);
        }
        // Last position the record could start at.
        let top = file_size - self.size as u64;

        let probe = match self.first_magic_field() {
            Some(probe) => probe,
            // No magic to look for; the record at the end trivially matches.
            None => return self.read(channel, top),
        };
        let magic = probe.spec.magic.expect("probe field carries magic");

        let window_start = top.saturating_sub(max_distance);
        let mut window = vec![0u8; (file_size - window_start) as usize];
        channel.seek(SeekFrom::Start(window_start))?;
        channel.read_exact(&mut window)?;

        for hit in memmem::rfind_iter(&window, magic) {
            let start = match hit.checked_sub(probe.offset) {
                Some(start) => start,
                None => continue,
            };
            if start + self.size > window.len() {
                continue;
            }
            let instance = PatternInstance {
                spec: self,
                position: window_start + start as u64,
                buffer: Cow::Owned(window[start..start + self.size].to_vec()),
            };
            if instance.magic_matches() {
                return Ok(Some(instance));
            }
        }
        Ok(None)
    }

    /// Searches forward from `start`, asking `step` how far to
    /// advance after each non-matching read. A step of 0 gives up,
    /// as does leaving `[min, max]` or the end of the channel.
    ///
    /// This is how the walker skips through a CFH's extra-field area,
    /// where each sub-record announces its own length.
    pub fn seek_forward<'a, R, F>(
        &'a self,
        channel: &mut R,
        start: u64,
        min: u64,
        max: u64,
        mut step: F,
    ) -> ZipResult<Option<PatternInstance<'a>>>
    where
        R: Read + Seek,
        F: FnMut(&PatternInstance) -> u64,
    {
        let file_size = channel.seek(SeekFrom::End(0))?;
        if (self.size as u64) > file_size {
            return Ok(None);
        }
        let max = max.min(file_size - self.size as u64);

        let mut position = start;
        while position >= min && position <= max {
            let instance = self.read_unvalidated(channel, position)?;
            if instance.magic_matches() {
                return Ok(Some(instance));
            }
            let advance = step(&instance);
            if advance == 0 {
                break;
            }
            position = match position.checked_add(advance) {
                Some(next) => next,
                None => break,
            };
        }
        Ok(None)
    }
}

/// Positions the channel and fills `buffer` exactly, or reports
/// `false` if EOF arrives first (the record can't be there).
fn fill_at<R: Read + Seek>(channel: &mut R, position: u64, buffer: &mut [u8]) -> ZipResult<bool> {
    channel.seek(SeekFrom::Start(position))?;
    match channel.read_exact(buffer) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// A record read from a particular file position: the spec, the
/// position, and a snapshot of the bytes that were there.
#[derive(Debug)]
pub struct PatternInstance<'a> {
    spec: &'a PatternSpec,
    position: u64,
    buffer: Cow<'a, [u8]>,
}

impl<'a> PatternInstance<'a> {
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn magic_matches(&self) -> bool {
        self.spec.fields.iter().all(|f| match f.spec.magic {
            Some(magic) => self.field_bytes(f) == magic,
            None => true,
        })
    }

    fn field_bytes(&self, field: &BoundField) -> &[u8] {
        &self.buffer[field.offset..field.offset + field.spec.size]
    }

    fn sized_field(&self, name: &str, want: usize) -> &BoundField {
        let field = self.spec.field(name);
        assert!(
            field.spec.size >= want,
            "field {:?} is {} bytes, want {}",
            name,
            field.spec.size,
            want
        );
        field
    }

    pub fn bytes(&self, name: &str) -> &[u8] {
        self.field_bytes(self.spec.field(name))
    }

    pub fn get_u8(&self, name: &str) -> u8 {
        let field = self.sized_field(name, 1);
        self.field_bytes(field)[0]
    }

    pub fn get_u16(&self, name: &str) -> u16 {
        let field = self.sized_field(name, 2);
        let bytes: [u8; 2] = self.field_bytes(field)[..2]
            .try_into()
            .expect("less than two bytes for u16");
        match self.spec.byte_order {
            ByteOrder::LittleEndian => u16::from_le_bytes(bytes),
            ByteOrder::BigEndian => u16::from_be_bytes(bytes),
        }
    }

    pub fn get_u32(&self, name: &str) -> u32 {
        let field = self.sized_field(name, 4);
        let bytes: [u8; 4] = self.field_bytes(field)[..4]
            .try_into()
            .expect("less than four bytes for u32");
        match self.spec.byte_order {
            ByteOrder::LittleEndian => u32::from_le_bytes(bytes),
            ByteOrder::BigEndian => u32::from_be_bytes(bytes),
        }
    }

    pub fn get_u64(&self, name: &str) -> u64 {
        let field = self.sized_field(name, 8);
        let bytes: [u8; 8] = self.field_bytes(field)[..8]
            .try_into()
            .expect("less than eight bytes for u64");
        match self.spec.byte_order {
            ByteOrder::LittleEndian => u64::from_le_bytes(bytes),
            ByteOrder::BigEndian => u64::from_be_bytes(bytes),
        }
    }

    fn stage(&self, name: &str, want: usize, data: Vec<u8>) -> Write {
        let field = self.sized_field(name, want);
        Write {
            position: self.position + field.offset as u64,
            data,
        }
    }

    pub fn write_u8(&self, name: &str, value: u8) -> Write {
        self.stage(name, 1, vec![value])
    }

    pub fn write_u16(&self, name: &str, value: u16) -> Write {
        let data = match self.spec.byte_order {
            ByteOrder::LittleEndian => value.to_le_bytes().to_vec(),
            ByteOrder::BigEndian => value.to_be_bytes().to_vec(),
        };
        self.stage(name, 2, data)
    }

    pub fn write_u32(&self, name: &str, value: u32) -> Write {
        let data = match self.spec.byte_order {
            ByteOrder::LittleEndian => value.to_le_bytes().to_vec(),
            ByteOrder::BigEndian => value.to_be_bytes().to_vec(),
        };
        self.stage(name, 4, data)
    }

    pub fn write_u64(&self, name: &str, value: u64) -> Write {
        let data = match self.spec.byte_order {
            ByteOrder::LittleEndian => value.to_le_bytes().to_vec(),
            ByteOrder::BigEndian => value.to_be_bytes().to_vec(),
        };
        self.stage(name, 8, data)
    }

    pub fn write_bytes(&self, name: &str, data: &[u8]) -> Write {
        let field = self.spec.field(name);
        assert!(
            data.len() <= field.spec.size,
            "{} bytes don't fit field {:?}",
            data.len(),
            name
        );
        Write {
            position: self.position + field.offset as u64,
            data: data.to_vec(),
        }
    }
}

/// A pending patch: `data` belongs at absolute file position
/// `position`. Nothing happens until [`apply_writes`] runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Write {
    position: u64,
    data: Vec<u8>,
}

impl Write {
    pub fn position(&self) -> u64 {
        self.position
    }
}

/// Commits the batch in ascending position order.
pub fn apply_writes<W: std::io::Write + Seek>(
    mut writes: Vec<Write>,
    channel: &mut W,
) -> ZipResult<()> {
    writes.sort_by_key(|w| w.position);
    debug!("committing {} staged writes", writes.len());
    for write in writes {
        channel.seek(SeekFrom::Start(write.position))?;
        channel.write_all(&write.data)?;
        trace!("wrote {} bytes at 0x{:08x}", write.data.len(), write.position);
    }
    channel.flush()?;
    Ok(())
}
