//! CSAV container: header/version block, chunk-compressed node-data stream,
//! node-descriptor footer (§3.4, §4.I, §6.2).
//!
//! Grounded on `node_tree.cpp`'s `serialize_in`/`serialize_out`. Chunk
//! compression here uses `lz4_flex`'s plain block compressor over fixed
//! `XLZ4_CHUNK_SIZE` source windows rather than the original's
//! `LZ4_compress_destSize` (which picks chunk boundaries by how much source
//! fits a fixed *compressed* budget). Loading any chunked-LZ4 CSAV this
//! toolkit didn't write is unaffected — only a save this toolkit writes
//! will have different chunk boundaries than the game's own writer, so
//! byte-identical round-trip against a game-produced save isn't guaranteed.
//! See DESIGN.md.

use std::io::{Read, Seek, SeekFrom, Write};

use cp_compat::compress::lz4::{lz4_compress, lz4_compress_bound, lz4_decompress_safe};
use cp_compat::stream::{StreamError, StreamReader, StreamWriter};

use crate::node::SaveTree;
use crate::serial_tree::{self, SerialNodeDesc, SerialTreeError};

const MAGIC_CSAV: u32 = u32::from_le_bytes(*b"CSAV");
const MAGIC_SAVE: u32 = u32::from_le_bytes(*b"SAVE");
const MAGIC_CLZF: u32 = u32::from_le_bytes(*b"CLZF");
const MAGIC_XLZ4: u32 = u32::from_le_bytes(*b"XLZ4");
const MAGIC_NODE: u32 = u32::from_le_bytes(*b"NODE");
const MAGIC_DONE: u32 = u32::from_le_bytes(*b"DONE");

const XLZ4_CHUNK_SIZE: usize = 0x40000;
/// Minimum distance from the start of the file to where real chunk data
/// begins, matching the original's `0xC21` floor on the reserved
/// chunk-descriptor-table region.
const MIN_CHUNKS_START: usize = 0xC21;

#[derive(thiserror::Error, Debug)]
pub enum CsavError {
    #[error("csav file has the wrong magic")]
    BadMagic,
    #[error("unsupported csav version v1={v1} v2={v2}")]
    UnsupportedVersion { v1: u32, v2: u32 },
    #[error("unsupported csav v3={0}")]
    UnsupportedV3(u32),
    #[error("missing 'DONE' tag")]
    MissingDoneTag,
    #[error("missing 'NODE' tag")]
    MissingNodeTag,
    #[error("missing 'CLZF' tag")]
    MissingClzfTag,
    #[error("missing 'XLZ4' tag on chunk {0}")]
    MissingXlz4Tag(usize),
    #[error("node descriptor table doesn't end where the footer says it should")]
    UnexpectedFooterPosition,
    #[error("chunk {index} data-size prefix {found} differs from its descriptor's {expected}")]
    ChunkDataSizeMismatch { index: usize, found: u32, expected: u32 },
    #[error(transparent)]
    Tree(#[from] SerialTreeError),
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error(transparent)]
    Lz4(#[from] cp_compat::compress::lz4::Lz4Error),
    #[error("no tree to save")]
    EmptySave,
}

/// The version block preceding the node-data stream (§6.2). Supported
/// range: `v1 ∈ [125,193], v2 ∈ [0,9], v3 ≤ 195`; `v1 <= 168 && v2 == 4` is
/// explicitly unsupported, preserved as a distinguishable error rather than
/// silently attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveVersion {
    pub v1: u32,
    pub v2: u32,
    pub suk: String,
    pub uk0: u32,
    pub uk1: u32,
    pub v3: u32,
}

impl SaveVersion {
    fn validate(&self) -> Result<(), CsavError> {
        if self.v1 <= 168 && self.v2 == 4 {
            return Err(CsavError::UnsupportedVersion { v1: self.v1, v2: self.v2 });
        }
        if self.v1 >= 83 && self.v3 > 195 {
            return Err(CsavError::UnsupportedV3(self.v3));
        }
        Ok(())
    }
}

/// A loaded (or about-to-be-saved) CSAV container.
#[derive(Debug, Clone)]
pub struct SaveFile {
    pub version: SaveVersion,
    pub tree: SaveTree,
    /// Set when the file used the PS4 raw-chunk variant (no `'XLZ4'` tag on
    /// its first chunk). Carried through to `save` so a PS4 save round-trips
    /// in the same raw form rather than silently switching to LZ4 framing.
    pub ps4_raw_chunks: bool,
}

#[derive(Debug, Clone, Copy)]
struct ChunkDesc {
    offset: u32,
    size: u32,
    data_size: u32,
}

/// Progress checkpoints a [`load`] caller may observe, in the fixed order
/// they fire (§5).
pub const PROGRESS_CHECKPOINTS: &[f32] = &[0.00, 0.20, 0.25, 0.30, 0.35, 0.40, 0.45, 0.50, 0.80, 0.90, 1.00];

pub fn load<R: Read + Seek>(mut r: R, mut progress: impl FnMut(f32)) -> Result<SaveFile, CsavError> {
    progress(0.00);
    let mut st = StreamReader::new(&mut r);

    let magic = st.read_u32()?;
    if magic != MAGIC_CSAV && magic != MAGIC_SAVE {
        return Err(CsavError::BadMagic);
    }
    progress(0.20);

    let v1 = st.read_u32()?;
    let v2 = st.read_u32()?;
    let suk = st.read_string()?;
    let uk0 = st.read_u32()?;
    let uk1 = st.read_u32()?;
    if v1 <= 168 && v2 == 4 {
        return Err(CsavError::UnsupportedVersion { v1, v2 });
    }
    let mut v3 = 192u32;
    if v1 >= 83 {
        v3 = st.read_u32()?;
        if v3 > 195 {
            return Err(CsavError::UnsupportedV3(v3));
        }
    }
    let version = SaveVersion { v1, v2, suk, uk0, uk1, v3 };
    progress(0.25);

    let chunkdescs_start = st.tell()? as u32;

    st.seek(SeekFrom::End(-8))?;
    let footer_start = st.tell()?;
    let nodedescs_start = st.read_u32()?;
    let magic = st.read_u32()?;
    if magic != MAGIC_DONE {
        return Err(CsavError::MissingDoneTag);
    }
    progress(0.30);

    st.seek(SeekFrom::Start(nodedescs_start as u64))?;
    let magic = st.read_u32()?;
    if magic != MAGIC_NODE {
        return Err(CsavError::MissingNodeTag);
    }
    let nd_cnt = st.read_packed_int()? as usize;
    let mut descs = Vec::with_capacity(nd_cnt);
    for _ in 0..nd_cnt {
        let name = st.read_string()?;
        let next_idx = st.read_i32()?;
        let child_idx = st.read_i32()?;
        let data_offset = st.read_u32()?;
        let data_size = st.read_u32()?;
        descs.push(SerialNodeDesc { name, next_idx, child_idx, data_offset, data_size });
    }
    if st.tell()? != footer_start {
        return Err(CsavError::UnexpectedFooterPosition);
    }
    progress(0.35);

    st.seek(SeekFrom::Start(chunkdescs_start as u64))?;
    let magic = st.read_u32()?;
    if magic != MAGIC_CLZF {
        return Err(CsavError::MissingClzfTag);
    }
    let chunk_cnt = st.read_u32()? as usize;
    let mut chunk_descs = Vec::with_capacity(chunk_cnt);
    for _ in 0..chunk_cnt {
        let offset = st.read_u32()?;
        let size = st.read_u32()?;
        let data_size = st.read_u32()?;
        chunk_descs.push(ChunkDesc { offset, size, data_size });
    }
    chunk_descs.sort_by_key(|c| c.offset);
    progress(0.40);

    let mut chunks_start = 0u32;
    let mut chunk_data_offsets = Vec::with_capacity(chunk_descs.len());
    let mut nodedata_size = 0u64;
    if !chunk_descs.is_empty() {
        chunks_start = chunk_descs[0].offset;
        let mut data_offset = chunks_start;
        for cd in &chunk_descs {
            chunk_data_offsets.push(data_offset);
            data_offset += cd.data_size;
        }
        nodedata_size = data_offset as u64;
    }
    progress(0.45);

    let mut nodedata = vec![0u8; nodedata_size as usize];
    let mut ps4_raw_chunks = false;
    progress(0.50);

    for (i, cd) in chunk_descs.iter().enumerate() {
        tracing::debug!(index = i, offset = cd.offset, size = cd.size, data_size = cd.data_size, "reading chunk");
        st.seek(SeekFrom::Start(cd.offset as u64))?;
        let magic = st.read_u32()?;
        if magic != MAGIC_XLZ4 {
            if i > 0 {
                return Err(CsavError::MissingXlz4Tag(i));
            }
            ps4_raw_chunks = true;
            break;
        }
        let data_size = st.read_u32()?;
        if data_size != cd.data_size {
            return Err(CsavError::ChunkDataSizeMismatch { index: i, found: data_size, expected: cd.data_size });
        }
        let csize = cd.size as usize - 8;
        let mut compressed = vec![0u8; csize];
        st.read_bytes(&mut compressed)?;
        let decompressed = lz4_decompress_safe(&compressed, cd.data_size as usize)?;
        let at = chunk_data_offsets[i] as usize;
        nodedata[at..at + cd.data_size as usize].copy_from_slice(&decompressed);
    }

    if ps4_raw_chunks && !chunk_descs.is_empty() {
        let offset = chunk_descs[0].offset as usize;
        st.seek(SeekFrom::Start(offset as u64))?;
        let mut raw = vec![0u8; nodedata.len() - offset];
        st.read_bytes(&mut raw)?;
        nodedata[offset..].copy_from_slice(&raw);
    }
    progress(0.80);

    let tree = serial_tree::to_tree(&descs, &nodedata, chunks_start)?;
    progress(0.90);

    progress(1.00);
    Ok(SaveFile { version, tree, ps4_raw_chunks })
}

pub fn save<W: Write + Seek>(save_file: &SaveFile, mut w: W) -> Result<(), CsavError> {
    save_file.version.validate()?;

    let mut st = StreamWriter::new(&mut w);
    st.write_u32(MAGIC_CSAV)?;
    st.write_u32(save_file.version.v1)?;
    st.write_u32(save_file.version.v2)?;
    st.write_string(&save_file.version.suk)?;
    st.write_u32(save_file.version.uk0)?;
    st.write_u32(save_file.version.uk1)?;
    if save_file.version.v1 >= 83 {
        st.write_u32(save_file.version.v3)?;
    }

    let chunkdescs_start = st.tell()? as usize;

    // Reserve space for the chunk-descriptor table: worst case is every
    // byte expanding under compression, capped by XLZ4_CHUNK_SIZE-sized
    // source windows, plus one spare chunk's worth of slack.
    let expected_raw_size = save_file.tree.calc_size() as usize;
    let max_chunk_cnt = lz4_compress_bound(expected_raw_size) / XLZ4_CHUNK_SIZE + 2;
    let chunktbl_maxsize = max_chunk_cnt * 12 + 8;
    let reserve = chunktbl_maxsize.max(MIN_CHUNKS_START.saturating_sub(chunkdescs_start));
    st.write_bytes(&vec![0u8; reserve])?;
    let chunks_start = st.tell()? as u32;

    let (descs, nodedata) = serial_tree::from_tree(&save_file.tree, chunks_start)?;

    let mut chunk_descs: Vec<ChunkDesc> = Vec::new();
    let mut cur = chunks_start as usize;
    let end = nodedata.len();
    while cur < end {
        let take = (end - cur).min(XLZ4_CHUNK_SIZE);
        let src = &nodedata[cur..cur + take];
        let offset = st.tell()? as u32;

        let size = if save_file.ps4_raw_chunks {
            st.write_bytes(src)?;
            take as u32
        } else {
            let compressed = lz4_compress(src);
            st.write_u32(MAGIC_XLZ4)?;
            st.write_u32(take as u32)?;
            st.write_bytes(&compressed)?;
            compressed.len() as u32 + 8
        };

        chunk_descs.push(ChunkDesc { offset, size, data_size: take as u32 });
        cur += take;
    }

    let nodedescs_start = st.tell()? as u32;
    st.write_u32(MAGIC_NODE)?;
    st.write_packed_int(descs.len() as i64)?;
    for d in &descs {
        st.write_string(&d.name)?;
        st.write_i32(d.next_idx)?;
        st.write_i32(d.child_idx)?;
        st.write_u32(d.data_offset)?;
        st.write_u32(d.data_size)?;
    }

    st.seek(SeekFrom::Start(chunkdescs_start as u64))?;
    st.write_u32(MAGIC_CLZF)?;
    st.write_u32(chunk_descs.len() as u32)?;
    for cd in &chunk_descs {
        st.write_u32(cd.offset)?;
        st.write_u32(cd.size)?;
        st.write_u32(cd.data_size)?;
    }

    st.seek(SeekFrom::End(0))?;
    st.write_u32(nodedescs_start)?;
    st.write_u32(MAGIC_DONE)?;

    Ok(())
}

/// Copy `path` aside to a `.old` sibling before overwriting it, but only if
/// no such backup exists yet — the oldest backup wins, matching the
/// original's safety rationale.
pub fn backup_before_overwrite(path: &std::path::Path) -> std::io::Result<()> {
    if !path.exists() {
        return Ok(());
    }
    let backup = path.with_extension("old");
    if !backup.exists() {
        std::fs::copy(path, backup)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;
    use std::io::Cursor;

    fn sample_version() -> SaveVersion {
        SaveVersion { v1: 193, v2: 9, suk: "4.0".into(), uk0: 0, uk1: 0, v3: 195 }
    }

    fn sample_tree() -> SaveTree {
        SaveTree {
            children: vec![
                Node::branch("player", vec![Node::leaf("stats", vec![1, 2, 3, 4, 5, 6, 7, 8])]),
                Node::leaf("world", vec![0xAB; 64]),
            ],
        }
    }

    #[test]
    fn saves_and_loads_back_the_same_tree() {
        let save_file = SaveFile { version: sample_version(), tree: sample_tree(), ps4_raw_chunks: false };
        let mut buf = Vec::new();
        save(&save_file, Cursor::new(&mut buf)).unwrap();

        let mut checkpoints = Vec::new();
        let loaded = load(Cursor::new(buf), |p| checkpoints.push(p)).unwrap();

        assert_eq!(loaded.version, save_file.version);
        assert_eq!(loaded.tree, save_file.tree);
        assert_eq!(checkpoints, PROGRESS_CHECKPOINTS);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let buf = vec![0u8; 32];
        assert!(matches!(load(Cursor::new(buf), |_| {}), Err(CsavError::BadMagic)));
    }

    #[test]
    fn unsupported_version_combination_is_rejected() {
        let mut version = sample_version();
        version.v1 = 150;
        version.v2 = 4;
        let save_file = SaveFile { version, tree: sample_tree(), ps4_raw_chunks: false };
        let mut buf = Vec::new();
        assert!(matches!(save(&save_file, Cursor::new(&mut buf)), Err(CsavError::UnsupportedVersion { .. })));
    }

    #[test]
    fn ps4_raw_chunks_round_trip() {
        let save_file = SaveFile { version: sample_version(), tree: sample_tree(), ps4_raw_chunks: true };
        let mut buf = Vec::new();
        save(&save_file, Cursor::new(&mut buf)).unwrap();
        let loaded = load(Cursor::new(buf), |_| {}).unwrap();
        assert!(loaded.ps4_raw_chunks);
        assert_eq!(loaded.tree, save_file.tree);
    }

    #[test]
    fn backup_is_skipped_when_one_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("save.csav");
        let old = dir.path().join("save.old");
        std::fs::write(&path, b"current").unwrap();
        std::fs::write(&old, b"first backup").unwrap();

        backup_before_overwrite(&path).unwrap();

        assert_eq!(std::fs::read(&old).unwrap(), b"first backup");
    }
}
