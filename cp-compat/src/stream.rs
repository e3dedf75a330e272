//! Binary stream abstraction: latched-error readers/writers over
//! `std::io`, with the packed-varint and sign-tagged string encodings the
//! rest of the toolkit builds on (§4.C).
//!
//! Grounded on `packing.{hpp,cpp}` (`read_packed_int`/`write_packed_int`,
//! `read_str`/`write_str`) in `original_source/`. The original's exception
//! propagation becomes a latched `Result<T, StreamError>`: the first error
//! a stream hits is cached, and every later call on a poisoned stream
//! returns a clone of it without touching the underlying reader/writer.

use std::io::{self, Read, Seek, SeekFrom, Write};

use bitflags::bitflags;

bitflags! {
    /// Manipulator flags biasing serialization of embedded names (§4.C).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StreamFlags: u8 {
        /// Emit `CName`s as their raw 64-bit hash rather than a resolved
        /// string; the name need not be resolvable when this is set.
        const CNAME_AS_HASH = 0b0000_0001;
    }
}

#[derive(thiserror::Error, Debug, Clone)]
pub enum StreamError {
    #[error("unexpected end of stream")]
    UnexpectedEof,
    #[error("io error: {0}")]
    Io(String),
    #[error("packed varint exceeds the maximum 5-byte encoding")]
    VarintTooLong,
    #[error("string length {0} is negative and too large to hold a usable byte count")]
    StringTooLong(i64),
    #[error("string bytes are not valid UTF-8")]
    InvalidUtf8,
    #[error("string bytes are not valid UTF-16")]
    InvalidUtf16,
}

impl From<io::Error> for StreamError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            StreamError::UnexpectedEof
        } else {
            StreamError::Io(e.to_string())
        }
    }
}

/// Max packed-varint magnitude the 5-byte encoding round-trips, inclusive:
/// `[-2^34, 2^34]` (§4.C Testable Property 4).
const PACKED_INT_MAX: u64 = 1u64 << 34;

/// A latched-error reader over any `Read + Seek`.
pub struct StreamReader<R> {
    inner: R,
    flags: StreamFlags,
    error: Option<StreamError>,
}

impl<R: Read + Seek> StreamReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            flags: StreamFlags::empty(),
            error: None,
        }
    }

    pub fn flags(&self) -> StreamFlags {
        self.flags
    }

    pub fn set_flags(&mut self, flags: StreamFlags) {
        self.flags = flags;
    }

    pub fn error(&self) -> Option<&StreamError> {
        self.error.as_ref()
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    fn fail<T>(&mut self, e: StreamError) -> Result<T, StreamError> {
        self.error = Some(e.clone());
        Err(e)
    }

    fn check_latch(&self) -> Result<(), StreamError> {
        match &self.error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    pub fn tell(&mut self) -> Result<u64, StreamError> {
        self.check_latch()?;
        match self.inner.stream_position() {
            Ok(p) => Ok(p),
            Err(e) => self.fail(e.into()),
        }
    }

    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64, StreamError> {
        self.check_latch()?;
        match self.inner.seek(pos) {
            Ok(p) => Ok(p),
            Err(e) => self.fail(e.into()),
        }
    }

    pub fn read_bytes(&mut self, buf: &mut [u8]) -> Result<(), StreamError> {
        self.check_latch()?;
        match self.inner.read_exact(buf) {
            Ok(()) => Ok(()),
            Err(e) => self.fail(StreamError::from(e)),
        }
    }

    pub fn read_u8(&mut self) -> Result<u8, StreamError> {
        let mut b = [0u8; 1];
        self.read_bytes(&mut b)?;
        Ok(b[0])
    }

    pub fn read_bool(&mut self) -> Result<bool, StreamError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> Result<u16, StreamError> {
        let mut b = [0u8; 2];
        self.read_bytes(&mut b)?;
        Ok(u16::from_le_bytes(b))
    }

    pub fn read_u32(&mut self) -> Result<u32, StreamError> {
        let mut b = [0u8; 4];
        self.read_bytes(&mut b)?;
        Ok(u32::from_le_bytes(b))
    }

    pub fn read_u64(&mut self) -> Result<u64, StreamError> {
        let mut b = [0u8; 8];
        self.read_bytes(&mut b)?;
        Ok(u64::from_le_bytes(b))
    }

    pub fn read_i32(&mut self) -> Result<i32, StreamError> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_i64(&mut self) -> Result<i64, StreamError> {
        Ok(self.read_u64()? as i64)
    }

    pub fn read_f32(&mut self) -> Result<f32, StreamError> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    /// Packed varint: 6 data bits + sign bit + continuation bit in byte 0,
    /// then up to four 7-bit continuation bytes, max 5 bytes total.
    pub fn read_packed_int(&mut self) -> Result<i64, StreamError> {
        self.check_latch()?;
        let a0 = self.read_u8()?;
        let sign = a0 & 0x80 != 0;
        let mut value: u64 = (a0 & 0x3F) as u64;
        if a0 & 0x40 != 0 {
            let a1 = self.read_u8()?;
            value |= ((a1 & 0x7F) as u64) << 6;
            if a1 & 0x80 != 0 {
                let a2 = self.read_u8()?;
                value |= ((a2 & 0x7F) as u64) << 13;
                if a2 & 0x80 != 0 {
                    let a3 = self.read_u8()?;
                    value |= ((a3 & 0x7F) as u64) << 20;
                    if a3 & 0x80 != 0 {
                        let a4 = self.read_u8()?;
                        value |= (a4 as u64) << 27;
                    }
                }
            }
        }
        let value = value as i64;
        Ok(if sign { -value } else { value })
    }

    /// Length-prefixed string. A negative packed-int length means the
    /// payload is `-len` raw UTF-8 bytes; a non-negative length means the
    /// payload is `len` UTF-16 code units (`len * 2` bytes).
    pub fn read_string(&mut self) -> Result<String, StreamError> {
        self.check_latch()?;
        let len = self.read_packed_int()?;
        if len < 0 {
            let n = (-len) as usize;
            let mut buf = vec![0u8; n];
            self.read_bytes(&mut buf)?;
            String::from_utf8(buf).map_err(|_| {
                let e = StreamError::InvalidUtf8;
                self.error = Some(e.clone());
                e
            })
        } else {
            let n = len as usize;
            let mut units = vec![0u16; n];
            for unit in units.iter_mut() {
                *unit = self.read_u16()?;
            }
            String::from_utf16(&units).map_err(|_| {
                let e = StreamError::InvalidUtf16;
                self.error = Some(e.clone());
                e
            })
        }
    }
}

/// A latched-error writer over any `Write + Seek`.
pub struct StreamWriter<W> {
    inner: W,
    flags: StreamFlags,
    error: Option<StreamError>,
}

impl<W: Write + Seek> StreamWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            flags: StreamFlags::empty(),
            error: None,
        }
    }

    pub fn flags(&self) -> StreamFlags {
        self.flags
    }

    pub fn set_flags(&mut self, flags: StreamFlags) {
        self.flags = flags;
    }

    pub fn error(&self) -> Option<&StreamError> {
        self.error.as_ref()
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    fn fail<T>(&mut self, e: StreamError) -> Result<T, StreamError> {
        self.error = Some(e.clone());
        Err(e)
    }

    fn check_latch(&self) -> Result<(), StreamError> {
        match &self.error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    pub fn tell(&mut self) -> Result<u64, StreamError> {
        self.check_latch()?;
        match self.inner.stream_position() {
            Ok(p) => Ok(p),
            Err(e) => self.fail(e.into()),
        }
    }

    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64, StreamError> {
        self.check_latch()?;
        match self.inner.seek(pos) {
            Ok(p) => Ok(p),
            Err(e) => self.fail(e.into()),
        }
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), StreamError> {
        self.check_latch()?;
        match self.inner.write_all(bytes) {
            Ok(()) => Ok(()),
            Err(e) => self.fail(e.into()),
        }
    }

    pub fn write_u8(&mut self, v: u8) -> Result<(), StreamError> {
        self.write_bytes(&[v])
    }

    pub fn write_bool(&mut self, v: bool) -> Result<(), StreamError> {
        self.write_u8(v as u8)
    }

    pub fn write_u16(&mut self, v: u16) -> Result<(), StreamError> {
        self.write_bytes(&v.to_le_bytes())
    }

    pub fn write_u32(&mut self, v: u32) -> Result<(), StreamError> {
        self.write_bytes(&v.to_le_bytes())
    }

    pub fn write_u64(&mut self, v: u64) -> Result<(), StreamError> {
        self.write_bytes(&v.to_le_bytes())
    }

    pub fn write_i32(&mut self, v: i32) -> Result<(), StreamError> {
        self.write_u32(v as u32)
    }

    pub fn write_i64(&mut self, v: i64) -> Result<(), StreamError> {
        self.write_u64(v as u64)
    }

    pub fn write_f32(&mut self, v: f32) -> Result<(), StreamError> {
        self.write_u32(v.to_bits())
    }

    pub fn write_packed_int(&mut self, value: i64) -> Result<(), StreamError> {
        self.check_latch()?;
        if value.unsigned_abs() > PACKED_INT_MAX {
            return self.fail(StreamError::VarintTooLong);
        }

        let mut packed = [0u8; 5];
        let mut count = 1usize;
        let mut tmp: u64 = value.unsigned_abs();
        if value < 0 {
            packed[0] |= 0x80;
        }
        packed[0] |= (tmp & 0x3F) as u8;
        tmp >>= 6;
        if tmp != 0 {
            packed[0] |= 0x40;
            count += 1;
            packed[1] = (tmp & 0x7F) as u8;
            tmp >>= 7;
            if tmp != 0 {
                packed[1] |= 0x80;
                count += 1;
                packed[2] = (tmp & 0x7F) as u8;
                tmp >>= 7;
                if tmp != 0 {
                    packed[2] |= 0x80;
                    count += 1;
                    packed[3] = (tmp & 0x7F) as u8;
                    tmp >>= 7;
                    if tmp != 0 {
                        packed[3] |= 0x80;
                        count += 1;
                        packed[4] = (tmp & 0xFF) as u8;
                    }
                }
            }
        }
        self.write_bytes(&packed[..count])
    }

    /// Always writes the UTF-8 (negative-length) form, matching the
    /// original's `write_str`, which never emits the UTF-16 variant.
    pub fn write_string(&mut self, s: &str) -> Result<(), StreamError> {
        self.check_latch()?;
        self.write_packed_int(-(s.len() as i64))?;
        if !s.is_empty() {
            self.write_bytes(s.as_bytes())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use test_case::test_case;

    fn roundtrip_packed_int(value: i64) -> i64 {
        let mut buf = Vec::new();
        let mut w = StreamWriter::new(Cursor::new(&mut buf));
        w.write_packed_int(value).unwrap();
        let mut r = StreamReader::new(Cursor::new(buf));
        r.read_packed_int().unwrap()
    }

    #[test_case(0)]
    #[test_case(1)]
    #[test_case(-1)]
    #[test_case(63)]
    #[test_case(-63)]
    #[test_case(64)]
    #[test_case(8191)]
    #[test_case(-8191)]
    #[test_case(1_048_575)]
    #[test_case((1i64 << 34) - 1)]
    #[test_case(-((1i64 << 34) - 1))]
    #[test_case(1i64 << 34)]
    #[test_case(-(1i64 << 34))]
    fn packed_int_roundtrips(value: i64) {
        assert_eq!(roundtrip_packed_int(value), value);
    }

    #[test]
    fn packed_int_at_inclusive_bound_fits_five_bytes() {
        let mut buf = Vec::new();
        let mut w = StreamWriter::new(Cursor::new(&mut buf));
        w.write_packed_int(1i64 << 34).unwrap();
        assert_eq!(buf.len(), 5);
    }

    #[test]
    fn packed_int_too_large_is_rejected() {
        let mut buf = Vec::new();
        let mut w = StreamWriter::new(Cursor::new(&mut buf));
        assert!(matches!(
            w.write_packed_int((1i64 << 34) + 1),
            Err(StreamError::VarintTooLong)
        ));
    }

    #[test]
    fn string_roundtrips_as_utf8_negative_length() {
        let mut buf = Vec::new();
        let mut w = StreamWriter::new(Cursor::new(&mut buf));
        w.write_string("hello world").unwrap();

        let mut r = StreamReader::new(Cursor::new(buf));
        assert_eq!(r.read_string().unwrap(), "hello world");
    }

    #[test]
    fn utf16_encoded_string_decodes() {
        let text = "hi";
        let units: Vec<u16> = text.encode_utf16().collect();
        let mut buf = Vec::new();
        let mut w = StreamWriter::new(Cursor::new(&mut buf));
        w.write_packed_int(units.len() as i64).unwrap();
        for u in &units {
            w.write_u16(*u).unwrap();
        }

        let mut r = StreamReader::new(Cursor::new(buf));
        assert_eq!(r.read_string().unwrap(), "hi");
    }

    #[test]
    fn latch_preserves_first_error() {
        let mut r = StreamReader::new(Cursor::new(Vec::<u8>::new()));
        let first = r.read_u8().unwrap_err();
        let second = r.read_u32().unwrap_err();
        assert_eq!(first.to_string(), second.to_string());
    }

    #[test]
    fn cname_as_hash_flag_is_settable() {
        let mut r = StreamReader::new(Cursor::new(Vec::<u8>::new()));
        assert_eq!(r.flags(), StreamFlags::empty());
        r.set_flags(StreamFlags::CNAME_AS_HASH);
        assert!(r.flags().contains(StreamFlags::CNAME_AS_HASH));
    }
}
