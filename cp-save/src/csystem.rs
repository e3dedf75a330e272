//! Object/system byte layout: the local string pool, class blueprints, and
//! the field-descriptor-table encoding a node's object graph is stored in
//! (§3.5, §3.6, §4.K).
//!
//! Grounded on `CStringPool.hpp` for the pool's packed offset/length
//! descriptors and its descs-size re-offsetting convention. The top-level
//! framing around the pool (how its own size is announced) and the
//! object-table entry framing aren't in the filtered source pack, so both
//! are a documented completion here (see DESIGN.md): a `{count, pool_size}`
//! header ahead of the descriptor array, and `{class_name_idx, blob_len,
//! blob}` entries in the object table so a blob can be skipped without
//! decoding it.

use std::collections::HashMap;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};

use cp_compat::stream::{StreamError, StreamReader, StreamWriter};
use cp_compat::{CName, TweakDbId};

use crate::property::{
    create_property, parse_type_name, IntKind, Object, Property, PropertyValue, TypeName,
};

/// Sentinel for a null handle/weak handle (§3.5).
pub const NULL_HANDLE: u32 = u32::MAX;

#[derive(thiserror::Error, Debug)]
pub enum CsystemError {
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error(transparent)]
    Pool(#[from] SystemStringPoolError),
    #[error("field {field} data range is out of bounds for its enclosing object")]
    FieldOutOfRange { field: String },
    #[error("handle index {index} is out of range for an object table of {object_count} entries")]
    HandleOutOfRange { index: u32, object_count: usize },
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SystemStringPoolError {
    #[error("string of {0} bytes (plus NUL) exceeds the 255-byte range-descriptor length field")]
    StringTooLong(usize),
    #[error("string pool buffer would exceed the 24-bit range-descriptor offset field")]
    PoolFull,
    #[error("string pool index {0} out of range")]
    OutOfRange(u32),
    #[error("string pool entry {0} is not valid UTF-8")]
    InvalidUtf8(u32),
    #[error("string pool descriptor table is corrupt")]
    Corrupt,
}

/// A system-local interned string table (§4.K). Entries are NUL-terminated
/// in the buffer; a descriptor's length includes that terminator, mirroring
/// `CRangeDesc`. Unlike the original's silent 24-bit/8-bit wraparound on
/// overflow, both caps are enforced at insert time here — a wrapped offset
/// would silently corrupt unrelated strings (§9 REDESIGN FLAG).
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SystemStringPool {
    descs: Vec<(u32, u8)>,
    buffer: Vec<u8>,
    index: HashMap<String, u32>,
}

impl SystemStringPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.descs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descs.is_empty()
    }

    /// Dedup-insert `s`, returning its (possibly pre-existing) index.
    pub fn to_idx(&mut self, s: &str) -> Result<u32, SystemStringPoolError> {
        if let Some(&idx) = self.index.get(s) {
            return Ok(idx);
        }

        let ssize = s.len() + 1;
        if ssize > u8::MAX as usize {
            return Err(SystemStringPoolError::StringTooLong(s.len()));
        }
        let offset = self.buffer.len() as u32;
        if offset > 0x00FF_FFFF {
            return Err(SystemStringPoolError::PoolFull);
        }

        let idx = self.descs.len() as u32;
        self.descs.push((offset, ssize as u8));
        self.buffer.extend_from_slice(s.as_bytes());
        self.buffer.push(0);
        self.index.insert(s.to_string(), idx);
        Ok(idx)
    }

    pub fn from_idx(&self, idx: u32) -> Result<&str, SystemStringPoolError> {
        let &(offset, len) = self
            .descs
            .get(idx as usize)
            .ok_or(SystemStringPoolError::OutOfRange(idx))?;
        let start = offset as usize;
        let end = start + len as usize - 1;
        std::str::from_utf8(&self.buffer[start..end])
            .map_err(|_| SystemStringPoolError::InvalidUtf8(idx))
    }

    pub fn read_from<R: Read + Seek>(st: &mut StreamReader<R>) -> Result<Self, CsystemError> {
        let descs_count = st.read_u32()? as usize;
        let pool_size = st.read_u32()?;
        let descs_size = (descs_count * 4) as u32;

        let mut descs = Vec::with_capacity(descs_count);
        let mut max_end = 0u32;
        for _ in 0..descs_count {
            let raw = st.read_u32()?;
            let raw_offset = raw & 0x00FF_FFFF;
            let len = (raw >> 24) as u8;
            let offset = raw_offset
                .checked_sub(descs_size)
                .ok_or(SystemStringPoolError::Corrupt)?;
            max_end = max_end.max(offset + len as u32);
            descs.push((offset, len));
        }
        if descs_count > 0 && max_end > pool_size {
            return Err(SystemStringPoolError::Corrupt.into());
        }

        let mut buffer = vec![0u8; pool_size as usize];
        st.read_bytes(&mut buffer)?;

        let mut index = HashMap::new();
        for (i, &(offset, len)) in descs.iter().enumerate() {
            if len > 0 {
                let start = offset as usize;
                let end = start + len as usize - 1;
                if let Some(slice) = buffer.get(start..end) {
                    if let Ok(s) = std::str::from_utf8(slice) {
                        index.insert(s.to_string(), i as u32);
                    }
                }
            }
        }

        Ok(Self { descs, buffer, index })
    }

    pub fn write_to<W: Write + Seek>(&self, st: &mut StreamWriter<W>) -> Result<(), StreamError> {
        st.write_u32(self.descs.len() as u32)?;
        st.write_u32(self.buffer.len() as u32)?;
        let descs_size = (self.descs.len() * 4) as u32;
        for &(offset, len) in &self.descs {
            let raw = (offset + descs_size) | ((len as u32) << 24);
            st.write_u32(raw)?;
        }
        st.write_bytes(&self.buffer)
    }
}

/// One field in a class's declared layout (§3.5). Order matters: it's the
/// order fields are instantiated in and, for the last one, the order that
/// determines which field reads greedily to the end of the object.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct ClassBlueprint {
    pub name: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldDescriptor>,
}

/// Class blueprints loaded from a `CObjectBPs.json`-shaped schema (§3.5).
/// An object whose class isn't registered here degrades to opaque bytes
/// rather than failing the whole load (§7).
#[derive(Debug, Default)]
pub struct BlueprintRegistry {
    classes: HashMap<String, ClassBlueprint>,
}

impl BlueprintRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(data: &str) -> Result<Self, serde_json::Error> {
        let classes: Vec<ClassBlueprint> = serde_json::from_str(data)?;
        Ok(Self {
            classes: classes.into_iter().map(|c| (c.name.clone(), c)).collect(),
        })
    }

    pub fn get(&self, class_name: &str) -> Option<&ClassBlueprint> {
        self.classes.get(class_name)
    }

    /// Fields for `class_name`, parent fields first. `None` if the class or
    /// any ancestor isn't registered.
    pub fn all_fields(&self, class_name: &str) -> Option<Vec<FieldDescriptor>> {
        let bp = self.classes.get(class_name)?;
        let mut fields = match &bp.parent {
            Some(parent) => self.all_fields(parent)?,
            None => Vec::new(),
        };
        fields.extend(bp.fields.iter().cloned());
        Some(fields)
    }
}

/// Registered enum type names (`CEnumList` in the original), threaded into
/// `create_property`/parsing as the `is_enum` predicate.
#[derive(Debug, Default)]
pub struct EnumRegistry {
    names: std::collections::HashSet<String>,
}

impl EnumRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(data: &str) -> Result<Self, serde_json::Error> {
        let names: Vec<String> = serde_json::from_str(data)?;
        Ok(Self { names: names.into_iter().collect() })
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.names.contains(name)
    }
}

fn type_name_to_string(t: &TypeName) -> String {
    match t {
        TypeName::FixedArray(n, elt) => format!("[{}]{}", n, type_name_to_string(elt)),
        TypeName::DynArray(elt) => format!("array:{}", type_name_to_string(elt)),
        TypeName::Handle(elt) => format!("handle:{}", type_name_to_string(elt)),
        TypeName::WeakHandle(elt) => format!("whandle:{}", type_name_to_string(elt)),
        TypeName::Bool => "Bool".to_string(),
        TypeName::Int(IntKind::U8) => "Uint8".to_string(),
        TypeName::Int(IntKind::I8) => "Int8".to_string(),
        TypeName::Int(IntKind::U16) => "Uint16".to_string(),
        TypeName::Int(IntKind::I16) => "Int16".to_string(),
        TypeName::Int(IntKind::U32) => "Uint32".to_string(),
        TypeName::Int(IntKind::I32) => "Int32".to_string(),
        TypeName::Int(IntKind::U64) => "Uint64".to_string(),
        TypeName::Int(IntKind::I64) => "Int64".to_string(),
        TypeName::Float => "Float".to_string(),
        TypeName::Double => "Double".to_string(),
        TypeName::TweakDbId => "TweakDBID".to_string(),
        TypeName::CName => "CName".to_string(),
        TypeName::CRUID => "CRUID".to_string(),
        TypeName::NodeRef => "NodeRef".to_string(),
        TypeName::Named(s) | TypeName::UnknownSyntax(s) => s.clone(),
    }
}

/// Write a single field/array-element value. Object-typed and
/// unknown-syntax values recurse without their own length framing — the
/// caller (either the object's field-descriptor bounding, or
/// [`write_array_element`]) is responsible for delimiting them.
fn write_value_out<W: Write + Seek>(
    value: &PropertyValue,
    pool: &mut SystemStringPool,
    st: &mut StreamWriter<W>,
) -> Result<(), CsystemError> {
    match value {
        PropertyValue::Bool(b) => st.write_bool(*b)?,
        PropertyValue::Int { kind, value } => match kind {
            IntKind::U8 | IntKind::I8 => st.write_u8(*value as u8)?,
            IntKind::U16 | IntKind::I16 => st.write_u16(*value as u16)?,
            IntKind::U32 | IntKind::I32 => st.write_u32(*value as u32)?,
            IntKind::U64 | IntKind::I64 => st.write_u64(*value as u64)?,
        },
        PropertyValue::Float(f) => st.write_f32(*f)?,
        PropertyValue::Double(d) => st.write_u64(d.to_bits())?,
        PropertyValue::Enum(c) | PropertyValue::CName(c) => st.write_u64(c.hash())?,
        PropertyValue::TweakDbId(t) => st.write_u64(t.as_u64())?,
        PropertyValue::CRUID(v) => st.write_u64(*v)?,
        PropertyValue::NodeRef(s) => st.write_string(s)?,
        PropertyValue::Object(obj) => serialize_object_out(obj, pool, st)?,
        PropertyValue::Handle(h) | PropertyValue::WeakHandle(h) => {
            st.write_u32(h.unwrap_or(NULL_HANDLE))?
        }
        PropertyValue::FixedArray(items) | PropertyValue::DynArray(items) => {
            if matches!(value, PropertyValue::DynArray(_)) {
                st.write_packed_int(items.len() as i64)?;
            }
            for item in items {
                write_array_element(&item.value, pool, st)?;
            }
        }
        PropertyValue::Unknown(bytes) => st.write_bytes(bytes)?,
    }
    Ok(())
}

/// Array elements of object or unrecognized-syntax type aren't otherwise
/// self-delimiting (unlike a direct object field, nothing externally bounds
/// them), so they get an explicit `u32` byte-length prefix.
fn write_array_element<W: Write + Seek>(
    value: &PropertyValue,
    pool: &mut SystemStringPool,
    st: &mut StreamWriter<W>,
) -> Result<(), CsystemError> {
    match value {
        PropertyValue::Object(_) | PropertyValue::Unknown(_) => {
            let mut buf = Vec::new();
            {
                let mut inner = StreamWriter::new(Cursor::new(&mut buf));
                write_value_out(value, pool, &mut inner)?;
            }
            st.write_u32(buf.len() as u32)?;
            st.write_bytes(&buf)?;
        }
        _ => write_value_out(value, pool, st)?,
    }
    Ok(())
}

fn read_value_from_stream<R: Read + Seek>(
    parsed: &TypeName,
    st: &mut StreamReader<R>,
    pool: &SystemStringPool,
    blueprints: &BlueprintRegistry,
    is_enum: &dyn Fn(&str) -> bool,
) -> Result<PropertyValue, CsystemError> {
    Ok(match parsed {
        TypeName::Bool => PropertyValue::Bool(st.read_bool()?),
        TypeName::Int(kind) => {
            let value = match kind {
                IntKind::U8 => st.read_u8()? as i64,
                IntKind::I8 => st.read_u8()? as i8 as i64,
                IntKind::U16 => st.read_u16()? as i64,
                IntKind::I16 => st.read_u16()? as i16 as i64,
                IntKind::U32 => st.read_u32()? as i64,
                IntKind::I32 => st.read_i32()? as i64,
                IntKind::U64 => st.read_u64()? as i64,
                IntKind::I64 => st.read_i64()?,
            };
            PropertyValue::Int { kind: *kind, value }
        }
        TypeName::Float => PropertyValue::Float(st.read_f32()?),
        TypeName::Double => PropertyValue::Double(f64::from_bits(st.read_u64()?)),
        TypeName::TweakDbId => PropertyValue::TweakDbId(TweakDbId::from_disk_u64(st.read_u64()?)),
        TypeName::CName => PropertyValue::CName(CName::from_hash(st.read_u64()?)),
        TypeName::CRUID => PropertyValue::CRUID(st.read_u64()?),
        TypeName::NodeRef => PropertyValue::NodeRef(st.read_string()?),
        TypeName::Handle(_) => {
            let raw = st.read_u32()?;
            PropertyValue::Handle(if raw == NULL_HANDLE { None } else { Some(raw) })
        }
        TypeName::WeakHandle(_) => {
            let raw = st.read_u32()?;
            PropertyValue::WeakHandle(if raw == NULL_HANDLE { None } else { Some(raw) })
        }
        TypeName::FixedArray(n, elt) => {
            let elt_name = type_name_to_string(elt);
            let mut items = Vec::with_capacity(*n as usize);
            for _ in 0..*n {
                let value = read_array_element(elt, st, pool, blueprints, is_enum)?;
                let mut p = Property::new(elt_name.clone(), value);
                p.mark_serialized_in();
                items.push(p);
            }
            PropertyValue::FixedArray(items)
        }
        TypeName::DynArray(elt) => {
            let count = st.read_packed_int()?.max(0);
            let elt_name = type_name_to_string(elt);
            let mut items = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let value = read_array_element(elt, st, pool, blueprints, is_enum)?;
                let mut p = Property::new(elt_name.clone(), value);
                p.mark_serialized_in();
                items.push(p);
            }
            PropertyValue::DynArray(items)
        }
        TypeName::Named(name) => {
            if is_enum(name) {
                PropertyValue::Enum(CName::from_hash(st.read_u64()?))
            } else {
                let remaining = read_remaining(st)?;
                let object = match blueprints.all_fields(name) {
                    Some(fields) => {
                        serialize_object_in(name, &fields, pool, blueprints, is_enum, &remaining)?
                    }
                    None => {
                        let mut obj = Object::new(name.clone(), Vec::new());
                        obj.raw = Some(remaining);
                        obj
                    }
                };
                PropertyValue::Object(Box::new(object))
            }
        }
        TypeName::UnknownSyntax(_) => PropertyValue::Unknown(read_remaining(st)?),
    })
}

/// Read every byte from the stream's current position to its end — the
/// greedy read a field's own (externally computed) byte range bounds it to.
fn read_remaining<R: Read + Seek>(st: &mut StreamReader<R>) -> Result<Vec<u8>, StreamError> {
    let start = st.tell()?;
    let end = st.seek(SeekFrom::End(0))?;
    st.seek(SeekFrom::Start(start))?;
    let mut buf = vec![0u8; (end - start) as usize];
    st.read_bytes(&mut buf)?;
    Ok(buf)
}

/// Array elements of object/unknown-syntax type are length-prefixed (see
/// [`write_array_element`]); every other element type is self-delimiting.
fn read_array_element<R: Read + Seek>(
    elt: &TypeName,
    st: &mut StreamReader<R>,
    pool: &SystemStringPool,
    blueprints: &BlueprintRegistry,
    is_enum: &dyn Fn(&str) -> bool,
) -> Result<PropertyValue, CsystemError> {
    let needs_prefix = match elt {
        TypeName::Named(name) => !is_enum(name),
        TypeName::UnknownSyntax(_) => true,
        _ => false,
    };

    if needs_prefix {
        let len = st.read_u32()? as usize;
        let mut buf = vec![0u8; len];
        st.read_bytes(&mut buf)?;
        read_value(elt, &buf, pool, blueprints, is_enum)
    } else {
        read_value_from_stream(elt, st, pool, blueprints, is_enum)
    }
}

fn read_value(
    parsed: &TypeName,
    bytes: &[u8],
    pool: &SystemStringPool,
    blueprints: &BlueprintRegistry,
    is_enum: &dyn Fn(&str) -> bool,
) -> Result<PropertyValue, CsystemError> {
    let mut st = StreamReader::new(Cursor::new(bytes));
    read_value_from_stream(parsed, &mut st, pool, blueprints, is_enum)
}

/// Write an object's field-descriptor table and field data (§4.K). Fields
/// that are skippable (never edited away from their default, never read
/// from a file) are omitted entirely. A degraded (`raw`-carrying) object
/// writes its captured bytes back out verbatim.
pub fn serialize_object_out<W: Write + Seek>(
    obj: &Object,
    pool: &mut SystemStringPool,
    st: &mut StreamWriter<W>,
) -> Result<(), CsystemError> {
    if let Some(raw) = &obj.raw {
        st.write_bytes(raw)?;
        return Ok(());
    }

    let written: Vec<&(String, Property)> = obj
        .fields
        .iter()
        .filter(|(_, p)| !p.is_skippable_in_serialization())
        .collect();

    st.write_u16(written.len() as u16)?;

    let desc_pos = st.tell()?;
    for _ in &written {
        st.write_u16(0)?;
        st.write_u16(0)?;
        st.write_u32(0)?;
    }

    let data_start = st.tell()?;
    let mut name_idxs = Vec::with_capacity(written.len());
    let mut type_idxs = Vec::with_capacity(written.len());
    let mut offsets = Vec::with_capacity(written.len());

    for (name, prop) in &written {
        name_idxs.push(pool.to_idx(name)?);
        type_idxs.push(pool.to_idx(&prop.type_name)?);
        offsets.push((st.tell()? - data_start) as u32);
        write_value_out(&prop.value, pool, st)?;
    }

    let end_pos = st.tell()?;
    st.seek(SeekFrom::Start(desc_pos))?;
    for i in 0..written.len() {
        st.write_u16(name_idxs[i] as u16)?;
        st.write_u16(type_idxs[i] as u16)?;
        st.write_u32(offsets[i])?;
    }
    st.seek(SeekFrom::Start(end_pos))?;
    Ok(())
}

/// Instantiate `class_name` from `fields` (all declared fields, in default
/// state) and overlay whatever was actually written in `bytes`. The last
/// written field's range extends to the end of `bytes`; earlier ones are
/// bounded by the next field's `data_offset` (§4.K).
pub fn serialize_object_in(
    class_name: &str,
    fields: &[FieldDescriptor],
    pool: &SystemStringPool,
    blueprints: &BlueprintRegistry,
    is_enum: &dyn Fn(&str) -> bool,
    bytes: &[u8],
) -> Result<Object, CsystemError> {
    let mut st = StreamReader::new(Cursor::new(bytes));
    let field_count = st.read_u16()? as usize;

    struct RawFieldDesc {
        name_idx: u16,
        type_idx: u16,
        data_offset: u32,
    }

    let mut raw = Vec::with_capacity(field_count);
    for _ in 0..field_count {
        let name_idx = st.read_u16()?;
        let type_idx = st.read_u16()?;
        let data_offset = st.read_u32()?;
        raw.push(RawFieldDesc { name_idx, type_idx, data_offset });
    }

    let data_start = st.tell()?;
    let total_len = bytes.len() as u64;

    let mut object = Object::new(
        class_name,
        fields
            .iter()
            .map(|f| (f.name.clone(), create_property(&f.type_name, is_enum)))
            .collect(),
    );

    for (i, d) in raw.iter().enumerate() {
        let name = pool.from_idx(d.name_idx as u32)?.to_string();
        let type_name_str = pool.from_idx(d.type_idx as u32)?.to_string();

        let start = data_start + d.data_offset as u64;
        let end = if i + 1 < raw.len() {
            data_start + raw[i + 1].data_offset as u64
        } else {
            total_len
        };
        if end < start || end > total_len {
            return Err(CsystemError::FieldOutOfRange { field: name });
        }

        let field_bytes = &bytes[start as usize..end as usize];
        let parsed = parse_type_name(&type_name_str);
        let value = read_value(&parsed, field_bytes, pool, blueprints, is_enum)?;

        let mut prop = Property::new(type_name_str, value);
        prop.mark_serialized_in();

        match object.field_mut(&name) {
            Some(existing) => *existing = prop,
            None => object.fields.push((name, prop)),
        }
    }

    Ok(object)
}

/// One entry in a system's object table: a class name plus its
/// length-prefixed, independently-parseable object blob (§4.K).
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectTableEntry {
    pub class_name: String,
    pub object: Object,
}

/// A node's full object graph: a local string pool shared by every object
/// in the table, plus the objects themselves in declaration order. Handles
/// are plain object-table indices, so cycles and forward references need no
/// special handling beyond a post-load bounds check (§3.6).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct System {
    pub pool: SystemStringPool,
    pub objects: Vec<ObjectTableEntry>,
}

impl System {
    /// Check every `Handle`/`WeakHandle` value against the object table's
    /// bounds. Cycles and forward references are valid; only an index past
    /// the end of the table is an error.
    pub fn validate_handles(&self) -> Result<(), CsystemError> {
        for entry in &self.objects {
            validate_object_handles(&entry.object, self.objects.len())?;
        }
        Ok(())
    }
}

fn validate_object_handles(obj: &Object, object_count: usize) -> Result<(), CsystemError> {
    for (_, prop) in &obj.fields {
        validate_value_handles(&prop.value, object_count)?;
    }
    Ok(())
}

fn validate_value_handles(value: &PropertyValue, object_count: usize) -> Result<(), CsystemError> {
    match value {
        PropertyValue::Handle(Some(idx)) | PropertyValue::WeakHandle(Some(idx)) => {
            if *idx as usize >= object_count {
                return Err(CsystemError::HandleOutOfRange { index: *idx, object_count });
            }
            Ok(())
        }
        PropertyValue::Object(obj) => validate_object_handles(obj, object_count),
        PropertyValue::FixedArray(items) | PropertyValue::DynArray(items) => {
            for item in items {
                validate_value_handles(&item.value, object_count)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Write a system: the pool is built by serializing every object into an
/// in-memory buffer first (which populates it with field/type/class names
/// as a side effect), then emitted ahead of the already-built object table.
/// The original defers pool emission until after its single output stream
/// has already received the object table, then patches a header; buffering
/// the table here sidesteps that patch without changing what ends up on
/// disk (pool, then table — matching the read order below).
pub fn serialize_system_out<W: Write + Seek>(
    system: &System,
    st: &mut StreamWriter<W>,
) -> Result<(), CsystemError> {
    let mut pool = SystemStringPool::new();
    let mut table_buf = Vec::new();
    {
        let mut inner = StreamWriter::new(Cursor::new(&mut table_buf));
        for entry in &system.objects {
            let class_idx = pool.to_idx(&entry.class_name)?;
            let mut blob = Vec::new();
            {
                let mut blob_writer = StreamWriter::new(Cursor::new(&mut blob));
                serialize_object_out(&entry.object, &mut pool, &mut blob_writer)?;
            }
            inner.write_u16(class_idx as u16)?;
            inner.write_u32(blob.len() as u32)?;
            inner.write_bytes(&blob)?;
        }
    }

    pool.write_to(st)?;
    st.write_bytes(&table_buf)?;
    Ok(())
}

/// Read a system occupying exactly `total_len` bytes from the stream's
/// current position: the pool first, then object-table entries until the
/// whole region is consumed.
pub fn serialize_system_in<R: Read + Seek>(
    st: &mut StreamReader<R>,
    blueprints: &BlueprintRegistry,
    is_enum: &dyn Fn(&str) -> bool,
    total_len: u64,
) -> Result<System, CsystemError> {
    let region_start = st.tell()?;
    let pool = SystemStringPool::read_from(st)?;

    let mut objects = Vec::new();
    while st.tell()? < region_start + total_len {
        let class_idx = st.read_u16()? as u32;
        let blob_len = st.read_u32()?;
        let mut blob = vec![0u8; blob_len as usize];
        st.read_bytes(&mut blob)?;

        let class_name = pool.from_idx(class_idx)?.to_string();
        let object = match blueprints.all_fields(&class_name) {
            Some(fields) => {
                serialize_object_in(&class_name, &fields, &pool, blueprints, is_enum, &blob)?
            }
            None => {
                let mut obj = Object::new(class_name.clone(), Vec::new());
                obj.raw = Some(blob);
                obj
            }
        };
        objects.push(ObjectTableEntry { class_name, object });
    }

    Ok(System { pool, objects })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::PropertyFlags;

    fn is_enum_none(_: &str) -> bool {
        false
    }

    fn sample_blueprints() -> BlueprintRegistry {
        let json = r#"[
            {"name": "gameStatsData", "fields": [
                {"name": "health", "type": "Float"},
                {"name": "armor", "type": "Float"},
                {"name": "owner", "type": "handle:entEntity"}
            ]},
            {"name": "gameSavedStatsData", "parent": "gameStatsData", "fields": [
                {"name": "tag", "type": "CName"}
            ]}
        ]"#;
        BlueprintRegistry::from_json(json).unwrap()
    }

    #[test]
    fn inherited_fields_come_before_own_fields() {
        let bps = sample_blueprints();
        let fields = bps.all_fields("gameSavedStatsData").unwrap();
        let names: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["health", "armor", "owner", "tag"]);
    }

    #[test]
    fn object_round_trips_through_bytes() {
        let bps = sample_blueprints();
        let fields = bps.all_fields("gameSavedStatsData").unwrap();

        let mut obj = Object::new(
            "gameSavedStatsData",
            fields
                .iter()
                .map(|f| (f.name.clone(), create_property(&f.type_name, &is_enum_none)))
                .collect(),
        );
        obj.field_mut("health").unwrap().edit(PropertyValue::Float(75.0));
        obj.field_mut("owner").unwrap().edit(PropertyValue::Handle(Some(3)));

        let mut pool = SystemStringPool::new();
        let mut buf = Vec::new();
        {
            let mut w = StreamWriter::new(Cursor::new(&mut buf));
            serialize_object_out(&obj, &mut pool, &mut w).unwrap();
        }

        let rebuilt =
            serialize_object_in("gameSavedStatsData", &fields, &pool, &bps, &is_enum_none, &buf)
                .unwrap();

        assert_eq!(rebuilt.field("health").unwrap().value, PropertyValue::Float(75.0));
        assert_eq!(rebuilt.field("owner").unwrap().value, PropertyValue::Handle(Some(3)));
        // `armor` was never edited away from its default, so it wasn't
        // written, and the instantiated default survives untouched.
        assert_eq!(rebuilt.field("armor").unwrap().value, PropertyValue::Float(0.0));
    }

    #[test]
    fn skippable_fields_are_omitted_from_the_wire_form() {
        let bps = sample_blueprints();
        let fields = bps.all_fields("gameStatsData").unwrap();
        let obj = Object::new(
            "gameStatsData",
            fields
                .iter()
                .map(|f| (f.name.clone(), create_property(&f.type_name, &is_enum_none)))
                .collect(),
        );

        let mut pool = SystemStringPool::new();
        let mut buf = Vec::new();
        {
            let mut w = StreamWriter::new(Cursor::new(&mut buf));
            serialize_object_out(&obj, &mut pool, &mut w).unwrap();
        }
        // field_count (u16) with no fields following, since all are fresh.
        assert_eq!(buf, 0u16.to_le_bytes());
    }

    #[test]
    fn unknown_class_degrades_to_opaque_object() {
        let bps = BlueprintRegistry::new();
        let mut pool = SystemStringPool::new();
        let obj = Object { class_name: "Unregistered".into(), fields: vec![], raw: Some(vec![1, 2, 3, 4]) };

        let mut buf = Vec::new();
        {
            let mut w = StreamWriter::new(Cursor::new(&mut buf));
            serialize_object_out(&obj, &mut pool, &mut w).unwrap();
        }
        assert_eq!(buf, vec![1, 2, 3, 4]);
        assert!(bps.all_fields("Unregistered").is_none());
    }

    #[test]
    fn system_round_trips_object_table() {
        let bps = sample_blueprints();
        let fields = bps.all_fields("gameSavedStatsData").unwrap();
        let mut obj = Object::new(
            "gameSavedStatsData",
            fields
                .iter()
                .map(|f| (f.name.clone(), create_property(&f.type_name, &is_enum_none)))
                .collect(),
        );
        obj.field_mut("tag").unwrap().edit(PropertyValue::CName(CName::new("Player")));

        let system = System {
            pool: SystemStringPool::new(),
            objects: vec![ObjectTableEntry { class_name: "gameSavedStatsData".into(), object: obj }],
        };

        let mut buf = Vec::new();
        {
            let mut w = StreamWriter::new(Cursor::new(&mut buf));
            serialize_system_out(&system, &mut w).unwrap();
        }

        let mut r = StreamReader::new(Cursor::new(&buf));
        let rebuilt = serialize_system_in(&mut r, &bps, &is_enum_none, buf.len() as u64).unwrap();

        assert_eq!(rebuilt.objects.len(), 1);
        let tag = rebuilt.objects[0].object.field("tag").unwrap();
        assert_eq!(tag.value, PropertyValue::CName(CName::new("Player")));
        rebuilt.validate_handles().unwrap();
    }

    #[test]
    fn out_of_range_handle_is_rejected() {
        let mut obj = Object::new("gameStatsData", vec![]);
        obj.fields.push((
            "owner".into(),
            Property { type_name: "handle:entEntity".into(), flags: PropertyFlags::default(), value: PropertyValue::Handle(Some(5)) },
        ));
        let system = System { pool: SystemStringPool::new(), objects: vec![ObjectTableEntry { class_name: "gameStatsData".into(), object: obj }] };
        assert!(matches!(system.validate_handles(), Err(CsystemError::HandleOutOfRange { .. })));
    }
}
