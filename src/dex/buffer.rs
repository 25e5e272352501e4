//! Cursor types over dex bytes.
//!
//! Widths in method names are in bytes, as in the dex format tables:
//! `read_u2` reads an unsigned 16-bit value, `read_s4` a signed 32-bit one.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use cesu8::from_java_cesu8;
use log::warn;

use crate::dex::error::DexError;
use crate::dex::leb::{decode_sleb128, decode_uleb128, decode_uleb128p1, encode_sleb128, encode_uleb128, encode_uleb128p1};

/// Immutable dex image shared by every view decoded from it.
#[derive(Clone)]
pub struct DexBuffer
{
    bytes: Arc<[u8]>,
}

impl DexBuffer
{
    pub fn new(bytes: Vec<u8>) -> Self
    {
        DexBuffer { bytes: Arc::from(bytes) }
    }

    pub fn len(&self) -> usize
    {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.bytes.is_empty()
    }

    pub fn as_slice(&self) -> &[u8]
    {
        &self.bytes
    }

    pub fn reader_at(&self, offset: usize) -> Result<DexReader<'_>, DexError>
    {
        let mut reader = DexReader::new(&self.bytes);
        reader.seek(offset)?;
        Ok(reader)
    }

    pub fn read_u1_at(&self, offset: usize) -> Result<u8, DexError>
    {
        self.reader_at(offset)?.read_u1()
    }

    pub fn read_u2_at(&self, offset: usize) -> Result<u16, DexError>
    {
        self.reader_at(offset)?.read_u2()
    }

    pub fn read_u4_at(&self, offset: usize) -> Result<u32, DexError>
    {
        self.reader_at(offset)?.read_u4()
    }

    /// Reads a u4 that is used as a size or offset and so must fit in an i32.
    pub fn read_small_uint_at(&self, offset: usize) -> Result<u32, DexError>
    {
        let value = self.read_u4_at(offset)?;
        if value > i32::MAX as u32
        {
            fail!("Encountered small uint that is out of range at offset 0x{:x}", offset);
        }
        Ok(value)
    }
}

impl fmt::Debug for DexBuffer
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "DexBuffer({} bytes)", self.bytes.len())
    }
}

/// Random access cursor. Every read advances past what it decoded and fails
/// rather than truncating when the buffer ends.
#[derive(Clone)]
pub struct DexReader<'a>
{
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> DexReader<'a>
{
    pub fn new(bytes: &'a [u8]) -> Self
    {
        DexReader { bytes, offset: 0 }
    }

    pub fn tell(&self) -> usize
    {
        self.offset
    }

    pub fn seek(&mut self, offset: usize) -> Result<(), DexError>
    {
        if offset > self.bytes.len()
        {
            fail!("Seek to offset 0x{:x} is past the end of a {} byte buffer", offset, self.bytes.len());
        }
        self.offset = offset;
        Ok(())
    }

    pub fn skip(&mut self, count: usize) -> Result<(), DexError>
    {
        self.take(count, "skip").map(|_| ())
    }

    pub fn remaining(&self) -> usize
    {
        self.bytes.len() - self.offset
    }

    /// Runs `f` and puts the cursor back where it was, whatever `f` read.
    pub fn peek<T, F>(&mut self, f: F) -> Result<T, DexError>
    where
        F: FnOnce(&mut Self) -> Result<T, DexError>,
    {
        let saved = self.offset;
        let result = f(self);
        self.offset = saved;
        result
    }

    fn take(&mut self, count: usize, what: &str) -> Result<&'a [u8], DexError>
    {
        match self.offset.checked_add(count)
        {
            Some(end) if end <= self.bytes.len() =>
            {
                let slice = &self.bytes[self.offset..end];
                self.offset = end;
                Ok(slice)
            }
            _ => fail!("Unexpected end of stream reading {} at index {}", what, self.offset),
        }
    }

    pub fn read_u1(&mut self) -> Result<u8, DexError>
    {
        Ok(self.take(1, "u1")?[0])
    }

    pub fn read_s1(&mut self) -> Result<i8, DexError>
    {
        Ok(self.read_u1()? as i8)
    }

    pub fn read_u2(&mut self) -> Result<u16, DexError>
    {
        let b = self.take(2, "u2")?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_s2(&mut self) -> Result<i16, DexError>
    {
        Ok(self.read_u2()? as i16)
    }

    pub fn read_u4(&mut self) -> Result<u32, DexError>
    {
        let b = self.take(4, "u4")?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_s4(&mut self) -> Result<i32, DexError>
    {
        Ok(self.read_u4()? as i32)
    }

    pub fn read_u8(&mut self) -> Result<u64, DexError>
    {
        let b = self.take(8, "u8")?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_le_bytes(raw))
    }

    pub fn read_s8(&mut self) -> Result<i64, DexError>
    {
        Ok(self.read_u8()? as i64)
    }

    /// Reads a u4 used as a size or offset; values above `i32::MAX` are rejected.
    pub fn read_small_uint(&mut self) -> Result<u32, DexError>
    {
        let start = self.offset;
        let value = self.read_u4()?;
        if value > i32::MAX as u32
        {
            fail!("Encountered small uint that is out of range at offset 0x{:x}", start);
        }
        Ok(value)
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8], DexError>
    {
        self.take(count, "byte array")
    }

    /// Unsigned LEB128 limited to the non-negative i32 range.
    pub fn read_uleb128(&mut self) -> Result<u32, DexError>
    {
        let start = self.offset;
        let value = self.read_large_uleb128()?;
        if value > i32::MAX as u32
        {
            fail!("Encountered valid uleb128 that is out of range at offset 0x{:x}", start);
        }
        Ok(value)
    }

    /// Unsigned LEB128 over the whole 32-bit range. Index deltas in class data
    /// go through here and are allowed to wrap when accumulated.
    pub fn read_large_uleb128(&mut self) -> Result<u32, DexError>
    {
        let (value, size) = decode_uleb128(&self.bytes[self.offset..])
            .map_err(|e| err!(e, "uleb128 at offset 0x{:x}", self.offset))?;
        self.offset += size;
        Ok(value)
    }

    pub fn read_uleb128p1(&mut self) -> Result<i32, DexError>
    {
        let (value, size) = decode_uleb128p1(&self.bytes[self.offset..])
            .map_err(|e| err!(e, "uleb128p1 at offset 0x{:x}", self.offset))?;
        self.offset += size;
        Ok(value)
    }

    pub fn read_sleb128(&mut self) -> Result<i32, DexError>
    {
        let (value, size) = decode_sleb128(&self.bytes[self.offset..])
            .map_err(|e| err!(e, "sleb128 at offset 0x{:x}", self.offset))?;
        self.offset += size;
        Ok(value)
    }

    pub fn skip_uleb128(&mut self) -> Result<(), DexError>
    {
        self.read_large_uleb128().map(|_| ())
    }

    /// Little-endian integer of `size` bytes, sign extended to 64 bits.
    pub fn read_sized_signed(&mut self, size: usize) -> Result<i64, DexError>
    {
        let raw = self.read_sized_unsigned(size)?;
        let shift = 64 - 8 * size as u32;
        Ok(((raw << shift) as i64) >> shift)
    }

    /// Little-endian integer of `size` bytes, zero extended to 64 bits.
    pub fn read_sized_unsigned(&mut self, size: usize) -> Result<u64, DexError>
    {
        if size == 0 || size > 8
        {
            fail!("Invalid encoded value size {} at offset 0x{:x}", size, self.offset);
        }
        let bytes = self.take(size, "sized value")?;
        Ok(bytes.iter().rev().fold(0u64, |acc, b| (acc << 8) | *b as u64))
    }

    /// Reads `size` bytes holding the high-order bytes of a `width` byte value.
    pub fn read_sized_right_extended(&mut self, size: usize, width: usize) -> Result<u64, DexError>
    {
        if size > width
        {
            fail!("Encoded value of {} bytes does not fit a {} byte value", size, width);
        }
        let raw = self.read_sized_unsigned(size)?;
        Ok(raw << (8 * (width - size)))
    }

    /// Reads a string_data_item: utf16 length then NUL terminated MUTF-8.
    ///
    /// Unpaired surrogates cannot be held in a `String`; each one is read as
    /// U+FFFD, so such a string is not written back byte for byte.
    pub fn read_string_data(&mut self) -> Result<String, DexError>
    {
        let start = self.offset;
        let utf16_size = self.read_uleb128()? as usize;
        let rest = &self.bytes[self.offset..];
        let end = match rest.iter().position(|b| *b == 0)
        {
            Some(end) => end,
            None => fail!("Unterminated string data at offset 0x{:x}", start),
        };
        let decoded = match from_java_cesu8(&rest[..end])
        {
            Ok(s) => s.into_owned(),
            Err(_) => match decode_mutf8_units(&rest[..end])
            {
                Some(units) => {
                    warn!("Replacing unpaired surrogates in the string at offset 0x{:x}", start);
                    String::from_utf16_lossy(&units)
                }
                None => fail!("Invalid MUTF-8 string data at offset 0x{:x}", start),
            },
        };
        let actual = decoded.encode_utf16().count();
        if actual != utf16_size
        {
            fail!("String at offset 0x{:x} declares {} utf-16 units but holds {}", start, utf16_size, actual);
        }
        self.offset += end + 1;
        Ok(decoded)
    }
}

/// Splits MUTF-8 into utf-16 units without pairing surrogates. `None` if a
/// sequence is malformed.
fn decode_mutf8_units(bytes: &[u8]) -> Option<Vec<u16>>
{
    let mut units = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len()
    {
        let lead = bytes[i];
        let (unit, len) = match lead
        {
            0x01..=0x7f => (lead as u16, 1),
            0xc0..=0xdf => {
                let b1 = continuation(bytes, i + 1)?;
                (((lead as u16 & 0x1f) << 6) | b1, 2)
            }
            0xe0..=0xef => {
                let b1 = continuation(bytes, i + 1)?;
                let b2 = continuation(bytes, i + 2)?;
                (((lead as u16 & 0x0f) << 12) | (b1 << 6) | b2, 3)
            }
            _ => return None,
        };
        units.push(unit);
        i += len;
    }
    Some(units)
}

fn continuation(bytes: &[u8], at: usize) -> Option<u16>
{
    match bytes.get(at)
    {
        Some(b) if b & 0xc0 == 0x80 => Some((b & 0x3f) as u16),
        _ => None,
    }
}

/// Append-only output buffer. `position` is absolute within the final file,
/// which lets a section be written before the sections that precede it.
#[derive(Debug, Default)]
pub struct DexWriter
{
    base: u32,
    bytes: Vec<u8>,
}

impl DexWriter
{
    pub fn new() -> Self
    {
        DexWriter { base: 0, bytes: Vec::new() }
    }

    pub fn with_base(base: u32) -> Self
    {
        DexWriter { base, bytes: Vec::new() }
    }

    pub fn position(&self) -> u32
    {
        self.base + self.bytes.len() as u32
    }

    pub fn len(&self) -> usize
    {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.bytes.is_empty()
    }

    pub fn as_slice(&self) -> &[u8]
    {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8>
    {
        self.bytes
    }

    pub fn write_u1(&mut self, val: u8)
    {
        self.bytes.push(val);
    }

    pub fn write_u2(&mut self, val: u16)
    {
        self.bytes.extend_from_slice(&val.to_le_bytes());
    }

    pub fn write_s2(&mut self, val: i16)
    {
        self.write_u2(val as u16);
    }

    pub fn write_u4(&mut self, val: u32)
    {
        self.bytes.extend_from_slice(&val.to_le_bytes());
    }

    pub fn write_s4(&mut self, val: i32)
    {
        self.write_u4(val as u32);
    }

    pub fn write_u8(&mut self, val: u64)
    {
        self.bytes.extend_from_slice(&val.to_le_bytes());
    }

    pub fn write_uleb128(&mut self, val: u32)
    {
        self.bytes.extend(encode_uleb128(val));
    }

    pub fn write_uleb128p1(&mut self, val: i32)
    {
        self.bytes.extend(encode_uleb128p1(val));
    }

    pub fn write_sleb128(&mut self, val: i32)
    {
        self.bytes.extend(encode_sleb128(val));
    }

    pub fn write_bytes(&mut self, val: &[u8])
    {
        self.bytes.extend_from_slice(val);
    }

    /// Writes the low `size` bytes of `val`, little-endian.
    pub fn write_sized(&mut self, val: u64, size: usize)
    {
        self.bytes.extend_from_slice(&val.to_le_bytes()[..size]);
    }

    pub fn write_string_data(&mut self, value: &str)
    {
        self.write_uleb128(value.encode_utf16().count() as u32);
        self.bytes.extend_from_slice(&cesu8::to_java_cesu8(value));
        self.bytes.push(0);
    }

    /// Pads with zeros until `position` is a multiple of `alignment`.
    pub fn align(&mut self, alignment: u32)
    {
        while self.position() % alignment != 0
        {
            self.bytes.push(0);
        }
    }

    /// Overwrites a u4 already written at absolute offset `at`.
    pub fn patch_u4(&mut self, at: u32, val: u32) -> Result<(), DexError>
    {
        let start = match at.checked_sub(self.base)
        {
            Some(start) => start as usize,
            None => fail!("Patch offset 0x{:x} is before the writer base 0x{:x}", at, self.base),
        };
        if start + 4 > self.bytes.len()
        {
            fail!("Patch offset 0x{:x} is past the written data", at);
        }
        self.bytes[start..start + 4].copy_from_slice(&val.to_le_bytes());
        Ok(())
    }
}

/// A derived offset computed on first use. Concurrent first uses may both
/// compute it; they store the same value.
pub(crate) struct OffsetCell(AtomicU32);

impl OffsetCell
{
    pub const UNSET: u32 = u32::MAX;

    pub fn new() -> Self
    {
        OffsetCell(AtomicU32::new(Self::UNSET))
    }

    pub fn get(&self) -> Option<u32>
    {
        match self.0.load(Ordering::Relaxed)
        {
            Self::UNSET => None,
            value => Some(value),
        }
    }

    pub fn get_or_try_init<F>(&self, f: F) -> Result<u32, DexError>
    where
        F: FnOnce() -> Result<u32, DexError>,
    {
        if let Some(value) = self.get()
        {
            return Ok(value);
        }
        let value = f()?;
        self.0.store(value, Ordering::Relaxed);
        Ok(value)
    }
}

impl Default for OffsetCell
{
    fn default() -> Self
    {
        OffsetCell::new()
    }
}

impl Clone for OffsetCell
{
    fn clone(&self) -> Self
    {
        OffsetCell(AtomicU32::new(self.0.load(Ordering::Relaxed)))
    }
}

impl fmt::Debug for OffsetCell
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self.get()
        {
            Some(value) => write!(f, "OffsetCell(0x{:x})", value),
            None => write!(f, "OffsetCell(unset)"),
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn reads_little_endian_and_advances()
    {
        let bytes = [0x01, 0x34, 0x12, 0x78, 0x56, 0x34, 0x12, 0xff];
        let mut reader = DexReader::new(&bytes);
        assert_eq!(reader.read_u1().unwrap(), 1);
        assert_eq!(reader.read_u2().unwrap(), 0x1234);
        assert_eq!(reader.read_u4().unwrap(), 0x12345678);
        assert_eq!(reader.tell(), 7);
        assert_eq!(reader.read_s1().unwrap(), -1);
        assert!(reader.read_u1().is_err());
    }

    #[test]
    fn seek_past_end_fails()
    {
        let bytes = [0u8; 4];
        let mut reader = DexReader::new(&bytes);
        assert!(reader.seek(4).is_ok());
        assert!(reader.seek(5).is_err());
        reader.seek(2).unwrap();
        assert!(reader.read_u4().is_err());
        assert_eq!(reader.tell(), 2);
    }

    #[test]
    fn peek_restores_position()
    {
        let bytes = [0x80, 0x01, 0x05];
        let mut reader = DexReader::new(&bytes);
        let peeked = reader.peek(|r| r.read_uleb128()).unwrap();
        assert_eq!(peeked, 128);
        assert_eq!(reader.tell(), 0);
        assert_eq!(reader.read_uleb128().unwrap(), 128);
        assert_eq!(reader.read_u1().unwrap(), 5);
    }

    #[test]
    fn small_uleb128_rejects_values_above_i32_max()
    {
        let bytes = [0xff, 0xff, 0xff, 0xff, 0x0f];
        assert!(DexReader::new(&bytes).read_uleb128().is_err());
        assert_eq!(DexReader::new(&bytes).read_large_uleb128().unwrap(), u32::MAX);
    }

    #[test]
    fn sized_values_extend_correctly()
    {
        let bytes = [0xff];
        assert_eq!(DexReader::new(&bytes).read_sized_signed(1).unwrap(), -1);
        assert_eq!(DexReader::new(&bytes).read_sized_unsigned(1).unwrap(), 0xff);
        // float 1.0f is 0x3f800000; only the high byte pair is stored
        let bytes = [0x80, 0x3f];
        let bits = DexReader::new(&bytes).read_sized_right_extended(2, 4).unwrap();
        assert_eq!(f32::from_bits(bits as u32), 1.0);
    }

    #[test]
    fn string_data_round_trips_through_writer()
    {
        let mut writer = DexWriter::new();
        writer.write_string_data("h\u{e9}llo \u{1F600}");
        let bytes = writer.into_bytes();
        let mut reader = DexReader::new(&bytes);
        assert_eq!(reader.read_string_data().unwrap(), "h\u{e9}llo \u{1F600}");
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn unpaired_surrogates_still_load()
    {
        // "a", a lone high surrogate, "b"
        let bytes = [0x03, b'a', 0xed, 0xa0, 0x80, b'b', 0x00];
        let mut reader = DexReader::new(&bytes);
        assert_eq!(reader.read_string_data().unwrap(), "a\u{fffd}b");
        assert_eq!(reader.remaining(), 0);

        let bad = [0x01, 0x80, 0x00];
        assert!(DexReader::new(&bad).read_string_data().is_err());
    }

    #[test]
    fn writer_tracks_absolute_position()
    {
        let mut writer = DexWriter::with_base(0x70);
        writer.write_u1(1);
        writer.align(4);
        assert_eq!(writer.position(), 0x74);
        writer.write_u4(0);
        writer.patch_u4(0x74, 0xdeadbeef).unwrap();
        assert_eq!(&writer.as_slice()[4..8], &[0xef, 0xbe, 0xad, 0xde]);
        assert!(writer.patch_u4(0x10, 0).is_err());
    }

    #[test]
    fn offset_cell_memoizes()
    {
        let cell = OffsetCell::new();
        assert_eq!(cell.get(), None);
        assert_eq!(cell.get_or_try_init(|| Ok(0)).unwrap(), 0);
        assert_eq!(cell.get_or_try_init(|| fail!("not called")).unwrap(), 0);
    }
}
