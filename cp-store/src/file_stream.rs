//! Seekable read-only byte stream over one file inside an archive (§3.2,
//! §4.H).
//!
//! Grounded on `redx/io/arfile_access.cpp`'s `read_some`: check the small
//! one-segment buffer first, special-case segment 0 (always compressed on
//! disk), then find the segment containing the read position and either
//! buffer it or coalesce forward into one bulk read.

use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

use crate::archive::{Archive, ArchiveError, FileInfo, SegmentDescriptor};

pub struct ArchiveFileStream {
    archive: Arc<Archive>,
    file_info: FileInfo,
    segment_descs: Vec<SegmentDescriptor>,
    pos: u64,
    buffer: Vec<u8>,
    buffer_pos: u64,
}

impl ArchiveFileStream {
    pub fn open(archive: Arc<Archive>, file_index: u32) -> Result<Self, ArchiveError> {
        let file_info = archive.get_file_info(file_index)?;
        let rec = archive.records()[file_index as usize];
        let segment_descs = archive.segments()[rec.segs_irange.beg as usize..rec.segs_irange.end as usize].to_vec();

        Ok(Self {
            archive,
            file_info,
            segment_descs,
            pos: 0,
            buffer: Vec::new(),
            buffer_pos: 0,
        })
    }

    pub fn size(&self) -> u64 {
        self.file_info.size
    }

    /// Serve up to `dst.len()` bytes starting at the current position,
    /// advancing it by the amount actually read. Mirrors `read_some`'s
    /// buffered/bulk decision tree exactly.
    fn read_some(&mut self, dst: &mut [u8]) -> Result<usize, ArchiveError> {
        if dst.is_empty() {
            return Ok(0);
        }

        tracing::debug!(pos = self.pos, len = dst.len(), "reading file stream bytes");

        let pos = self.pos;
        let end = pos + dst.len() as u64;
        if end > self.file_info.size {
            return Err(ArchiveError::DstSizeMismatch {
                dst: dst.len(),
                expected: (self.file_info.size - pos.min(self.file_info.size)) as usize,
            });
        }

        // 1. served entirely from the cached buffer
        if pos >= self.buffer_pos && end <= self.buffer_pos + self.buffer.len() as u64 {
            let start = (pos - self.buffer_pos) as usize;
            let n = dst.len();
            dst.copy_from_slice(&self.buffer[start..start + n]);
            self.pos += n as u64;
            return Ok(n);
        }

        let sd0 = self.segment_descs[0];
        let sd0_size = sd0.size as u64;

        // 2. special case: segment 0 is always compressed on disk
        if pos < sd0_size {
            if pos == 0 && end >= sd0_size {
                self.archive.read_segment(&sd0, &mut dst[..sd0_size as usize], true)?;
                self.pos += sd0_size;
                return Ok(sd0_size as usize);
            }

            self.buffer_pos = 0;
            self.buffer = vec![0u8; sd0_size as usize];
            self.archive.read_segment(&sd0, &mut self.buffer, true)?;

            let read_end = end.min(sd0_size);
            let n = (read_end - pos) as usize;
            let start = pos as usize;
            dst[..n].copy_from_slice(&self.buffer[start..start + n]);
            self.pos += n as u64;
            return Ok(n);
        }

        // 3. locate the segment containing `pos` by linear scan
        let mut seg_offset = sd0_size;
        let mut idx = 1usize;
        while idx < self.segment_descs.len() {
            let seg_end = seg_offset + self.segment_descs[idx].disk_size as u64;
            if pos < seg_end {
                break;
            }
            seg_offset = seg_end;
            idx += 1;
        }
        if idx >= self.segment_descs.len() {
            return Err(ArchiveError::DstSizeMismatch {
                dst: dst.len(),
                expected: 0,
            });
        }

        let seg_end = seg_offset + self.segment_descs[idx].disk_size as u64;

        // 4a. read fits in a single segment but isn't full-segment aligned: buffer it
        if end <= seg_end && (pos != seg_offset || end < seg_end) {
            let sd = self.segment_descs[idx];
            self.buffer_pos = seg_offset;
            self.buffer = vec![0u8; sd.disk_size as usize];
            self.archive.read_segment(&sd, &mut self.buffer, false)?;

            let n = (end - pos) as usize;
            let start = (pos - seg_offset) as usize;
            dst[..n].copy_from_slice(&self.buffer[start..start + n]);
            self.pos += n as u64;
            return Ok(n);
        }

        // 4b. bulk-read forward, coalescing physically contiguous segments
        let mut bulk = self.segment_descs[idx];
        bulk.size = 0;
        if pos > seg_offset {
            let offset_in_seg = (pos - seg_offset) as u32;
            bulk.offset_in_archive += offset_in_seg as u64;
            bulk.disk_size -= offset_in_seg;
        }

        seg_offset += self.segment_descs[idx].disk_size as u64;
        idx += 1;
        while idx < self.segment_descs.len() {
            let sd = self.segment_descs[idx];
            let this_seg_end = seg_offset + sd.disk_size as u64;
            if end <= this_seg_end || sd.offset_in_archive != bulk.end_offset_in_archive() {
                break;
            }
            bulk.disk_size += sd.disk_size;
            seg_offset += sd.disk_size as u64;
            idx += 1;
        }

        let n = bulk.disk_size as usize;
        self.archive.read_segment(&bulk, &mut dst[..n], false)?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl Read for ArchiveFileStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.read_some(buf)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
    }
}

impl Seek for ArchiveFileStream {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(p) => p as i64,
            SeekFrom::End(delta) => self.file_info.size as i64 + delta,
            SeekFrom::Current(delta) => self.pos as i64 + delta,
        };
        if new_pos < 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "seek position underflows zero",
            ));
        }
        self.pos = new_pos as u64;
        Ok(self.pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Seek, SeekFrom, Write};

    fn build_fixture() -> (tempfile::TempDir, Arc<Archive>) {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("f.archive");

        let payload = b"0123456789ABCDEFGHIJ"; // 20 bytes, split into two segments

        let mut buf: Vec<u8> = Vec::new();
        buf.extend_from_slice(&u32::from_le_bytes(*b"RADR").to_le_bytes());
        buf.extend_from_slice(&0u64.to_le_bytes());
        buf.extend_from_slice(&0u64.to_le_bytes());
        buf.extend_from_slice(&1u32.to_le_bytes());

        let metadata_offset = buf.len() as u64;
        buf.extend_from_slice(&0u32.to_le_bytes()); // deps

        let segs: [(u64, u32, u32); 2] = [(1000, 8, 8), (1008, 12, 12)];
        buf.extend_from_slice(&(segs.len() as u32).to_le_bytes());
        for (offset, disk_size, size) in segs {
            buf.extend_from_slice(&offset.to_le_bytes());
            buf.extend_from_slice(&disk_size.to_le_bytes());
            buf.extend_from_slice(&size.to_le_bytes());
        }

        buf.extend_from_slice(&1u32.to_le_bytes()); // records count
        buf.extend_from_slice(&0xDEAD_BEEFu64.to_le_bytes());
        buf.extend_from_slice(&0u64.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&(segs.len() as u32).to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&[0u8; 20]);

        let metadata_size = buf.len() as u64 - metadata_offset;
        buf[4..12].copy_from_slice(&metadata_offset.to_le_bytes());
        buf[12..20].copy_from_slice(&metadata_size.to_le_bytes());

        std::fs::write(&archive_path, &buf).unwrap();

        let mut f = std::fs::OpenOptions::new().write(true).open(&archive_path).unwrap();
        f.seek(SeekFrom::Start(1000)).unwrap();
        f.write_all(payload).unwrap();
        drop(f);

        (dir, Archive::open(&archive_path).unwrap())
    }

    #[test]
    fn reads_full_payload_across_segment_boundary() {
        let (_dir, archive) = build_fixture();
        let mut stream = ArchiveFileStream::open(archive, 0).unwrap();
        let mut out = vec![0u8; 20];
        stream.read_exact(&mut out).unwrap();
        assert_eq!(&out, b"0123456789ABCDEFGHIJ");
    }

    #[test]
    fn seek_and_partial_read_within_second_segment() {
        let (_dir, archive) = build_fixture();
        let mut stream = ArchiveFileStream::open(archive, 0).unwrap();
        stream.seek(SeekFrom::Start(10)).unwrap();
        let mut out = vec![0u8; 4];
        stream.read_exact(&mut out).unwrap();
        assert_eq!(&out, b"ABCD");
    }

    #[test]
    fn repeated_small_reads_reuse_buffer() {
        let (_dir, archive) = build_fixture();
        let mut stream = ArchiveFileStream::open(archive, 0).unwrap();
        stream.seek(SeekFrom::Start(9)).unwrap();
        let mut a = [0u8; 1];
        let mut b = [0u8; 1];
        stream.read_exact(&mut a).unwrap();
        stream.read_exact(&mut b).unwrap();
        assert_eq!(&a, b"9");
        assert_eq!(&b, b"A");
    }
}
