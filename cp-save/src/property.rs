//! Type-name parsing and the polymorphic property value model (§3.5, §4.J).
//!
//! Grounded on `CPropertyBase.hpp`/`CPropertyFactory.cpp`: an `EPropertyKind`
//! tag, a skippability state machine driven by edit/serialized-in events,
//! and a factory that classifies a raw type-name string into one of a fixed
//! set of shapes, falling back to an opaque-bytes property for anything it
//! doesn't recognize.

use cp_compat::{CName, TweakDbId};

/// Kind tag mirroring the original's `EPropertyKind`, used for introspection
/// (the variant boundary in [`PropertyValue`] already carries the payload).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    Bool,
    Int,
    Float,
    Double,
    Enum,
    Array,
    DynArray,
    Handle,
    WeakHandle,
    Object,
    TweakDbId,
    CName,
    CRUID,
    NodeRef,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntKind {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
}

/// A type-name string decomposed into its syntactic shape (§4.J). Whether a
/// bare [`TypeName::Named`] is actually an enum or an object class can only
/// be decided against an enum registry, so that distinction is deferred to
/// [`create_property`] rather than baked into parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeName {
    FixedArray(u32, Box<TypeName>),
    DynArray(Box<TypeName>),
    Handle(Box<TypeName>),
    WeakHandle(Box<TypeName>),
    Bool,
    Int(IntKind),
    Float,
    Double,
    TweakDbId,
    CName,
    CRUID,
    NodeRef,
    Named(String),
    /// A colon-containing type name that doesn't match any recognized
    /// prefix — some future/unsupported type scheme. Degrades to an opaque
    /// [`PropertyValue::Unknown`], distinct from [`TypeName::Named`] which
    /// is always either an enum or an object class (§4.J).
    UnknownSyntax(String),
}

pub fn parse_type_name(s: &str) -> TypeName {
    if let Some(rest) = s.strip_prefix('[') {
        if let Some(close) = rest.find(']') {
            if let Ok(len) = rest[..close].parse::<u32>() {
                let elt = parse_type_name(&rest[close + 1..]);
                return TypeName::FixedArray(len, Box::new(elt));
            }
        }
        return TypeName::Named(s.to_string());
    }
    if let Some(rest) = s.strip_prefix("array:") {
        return TypeName::DynArray(Box::new(parse_type_name(rest)));
    }
    for prefix in ["handle:", "rRef:", "raRef:"] {
        if let Some(rest) = s.strip_prefix(prefix) {
            return TypeName::Handle(Box::new(parse_type_name(rest)));
        }
    }
    if let Some(rest) = s.strip_prefix("whandle:") {
        return TypeName::WeakHandle(Box::new(parse_type_name(rest)));
    }
    if s.contains(':') {
        return TypeName::UnknownSyntax(s.to_string());
    }
    match s {
        "Bool" => TypeName::Bool,
        "Uint8" => TypeName::Int(IntKind::U8),
        "Int8" => TypeName::Int(IntKind::I8),
        "Uint16" => TypeName::Int(IntKind::U16),
        "Int16" => TypeName::Int(IntKind::I16),
        "Uint32" => TypeName::Int(IntKind::U32),
        "Int32" => TypeName::Int(IntKind::I32),
        "Uint64" => TypeName::Int(IntKind::U64),
        "Int64" => TypeName::Int(IntKind::I64),
        "Float" => TypeName::Float,
        "Double" => TypeName::Double,
        "TweakDBID" => TypeName::TweakDbId,
        "CName" => TypeName::CName,
        "CRUID" => TypeName::CRUID,
        "NodeRef" => TypeName::NodeRef,
        other => TypeName::Named(other.to_string()),
    }
}

/// An object instance: a class name plus its fields in declaration order
/// (parent fields first). Inline, not a handle — §3.5.
#[derive(Debug, Clone, PartialEq)]
pub struct Object {
    pub class_name: String,
    pub fields: Vec<(String, Property)>,
    /// Present when `class_name` wasn't found in the blueprint registry at
    /// load time: the object degrades to opaque bytes, round-tripped
    /// verbatim with no field-level interpretation — the object-level
    /// analogue of [`PropertyValue::Unknown`] (§3.5).
    pub raw: Option<Vec<u8>>,
}

impl Object {
    pub fn new(class_name: impl Into<String>, fields: Vec<(String, Property)>) -> Self {
        Self { class_name: class_name.into(), fields, raw: None }
    }

    pub fn field(&self, name: &str) -> Option<&Property> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, p)| p)
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut Property> {
        self.fields.iter_mut().find(|(n, _)| n == name).map(|(_, p)| p)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Bool(bool),
    Int { kind: IntKind, value: i64 },
    Float(f32),
    Double(f64),
    Enum(CName),
    CName(CName),
    TweakDbId(TweakDbId),
    CRUID(u64),
    NodeRef(String),
    Object(Box<Object>),
    /// Index into the enclosing system's object table; `None` is a null
    /// handle.
    Handle(Option<u32>),
    WeakHandle(Option<u32>),
    FixedArray(Vec<Property>),
    DynArray(Vec<Property>),
    Unknown(Vec<u8>),
}

impl PropertyValue {
    pub fn kind(&self) -> PropertyKind {
        match self {
            PropertyValue::Bool(_) => PropertyKind::Bool,
            PropertyValue::Int { .. } => PropertyKind::Int,
            PropertyValue::Float(_) => PropertyKind::Float,
            PropertyValue::Double(_) => PropertyKind::Double,
            PropertyValue::Enum(_) => PropertyKind::Enum,
            PropertyValue::CName(_) => PropertyKind::CName,
            PropertyValue::TweakDbId(_) => PropertyKind::TweakDbId,
            PropertyValue::CRUID(_) => PropertyKind::CRUID,
            PropertyValue::NodeRef(_) => PropertyKind::NodeRef,
            PropertyValue::Object(_) => PropertyKind::Object,
            PropertyValue::Handle(_) => PropertyKind::Handle,
            PropertyValue::WeakHandle(_) => PropertyKind::WeakHandle,
            PropertyValue::FixedArray(_) => PropertyKind::Array,
            PropertyValue::DynArray(_) => PropertyKind::DynArray,
            PropertyValue::Unknown(_) => PropertyKind::Unknown,
        }
    }

    /// Whether this value equals the type's default (zero/empty/null).
    /// Unknown-typed values never compare equal to a default — they are
    /// always written verbatim (§4.J).
    pub fn has_default_value(&self) -> bool {
        match self {
            PropertyValue::Bool(b) => !b,
            PropertyValue::Int { value, .. } => *value == 0,
            PropertyValue::Float(f) => *f == 0.0,
            PropertyValue::Double(d) => *d == 0.0,
            PropertyValue::Enum(c) => c.hash() == 0,
            PropertyValue::CName(c) => c.hash() == 0,
            PropertyValue::TweakDbId(t) => t.as_u64() == 0,
            PropertyValue::CRUID(v) => *v == 0,
            PropertyValue::NodeRef(s) => s.is_empty(),
            PropertyValue::Object(_) => false,
            PropertyValue::Handle(h) | PropertyValue::WeakHandle(h) => h.is_none(),
            PropertyValue::FixedArray(items) | PropertyValue::DynArray(items) => items.is_empty(),
            PropertyValue::Unknown(_) => false,
        }
    }
}

/// Two events drive a property's skippability flags (§4.J): an edit
/// (something changed its value) and a serialized-in (it was just read from
/// a file). Neither flag is the property's own business to set; whatever
/// reads or edits the property dispatches the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyEvent {
    DataEdited,
    DataSerializedIn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyFlags {
    freshly_constructed: bool,
    unskippable: bool,
}

impl Default for PropertyFlags {
    fn default() -> Self {
        Self { freshly_constructed: true, unskippable: false }
    }
}

impl PropertyFlags {
    pub fn notify(&mut self, event: PropertyEvent) {
        match event {
            PropertyEvent::DataEdited => {
                self.freshly_constructed = false;
                self.unskippable = false;
            }
            PropertyEvent::DataSerializedIn => {
                self.unskippable = true;
            }
        }
    }

    pub fn is_skippable(&self, has_default_value: bool) -> bool {
        !self.unskippable && (self.freshly_constructed || has_default_value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub type_name: String,
    pub flags: PropertyFlags,
    pub value: PropertyValue,
}

impl Property {
    pub fn new(type_name: impl Into<String>, value: PropertyValue) -> Self {
        Self { type_name: type_name.into(), flags: PropertyFlags::default(), value }
    }

    pub fn is_skippable_in_serialization(&self) -> bool {
        self.flags.is_skippable(self.value.has_default_value())
    }

    pub fn edit(&mut self, value: PropertyValue) {
        self.value = value;
        self.flags.notify(PropertyEvent::DataEdited);
    }

    pub fn mark_serialized_in(&mut self) {
        self.flags.notify(PropertyEvent::DataSerializedIn);
    }
}

/// Default-construct a property for `type_name`, given a predicate telling
/// whether a bare name is a registered enum (vs. an object class name) — the
/// `CEnumList::get().is_registered(...)` check in the original factory.
pub fn default_value_for(type_name: &TypeName, is_enum: &dyn Fn(&str) -> bool) -> PropertyValue {
    match type_name {
        TypeName::FixedArray(len, _) => PropertyValue::FixedArray(Vec::with_capacity(*len as usize)),
        TypeName::DynArray(_) => PropertyValue::DynArray(Vec::new()),
        TypeName::Handle(_) => PropertyValue::Handle(None),
        TypeName::WeakHandle(_) => PropertyValue::WeakHandle(None),
        TypeName::Bool => PropertyValue::Bool(false),
        TypeName::Int(kind) => PropertyValue::Int { kind: *kind, value: 0 },
        TypeName::Float => PropertyValue::Float(0.0),
        TypeName::Double => PropertyValue::Double(0.0),
        TypeName::TweakDbId => PropertyValue::TweakDbId(TweakDbId::from_raw_parts(0, 0)),
        TypeName::CName => PropertyValue::CName(CName::from_hash(0)),
        TypeName::CRUID => PropertyValue::CRUID(0),
        TypeName::NodeRef => PropertyValue::NodeRef(String::new()),
        TypeName::Named(name) => {
            if is_enum(name) {
                PropertyValue::Enum(CName::from_hash(0))
            } else {
                PropertyValue::Object(Box::new(Object::new(name.clone(), Vec::new())))
            }
        }
        TypeName::UnknownSyntax(_) => PropertyValue::Unknown(Vec::new()),
    }
}

pub fn create_property(raw_type_name: &str, is_enum: &dyn Fn(&str) -> bool) -> Property {
    let parsed = parse_type_name(raw_type_name);
    Property::new(raw_type_name, default_value_for(&parsed, is_enum))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("Bool", TypeName::Bool)]
    #[test_case("Uint32", TypeName::Int(IntKind::U32))]
    #[test_case("array:Int32", TypeName::DynArray(Box::new(TypeName::Int(IntKind::I32))))]
    #[test_case("handle:entEntity", TypeName::Handle(Box::new(TypeName::Named("entEntity".into()))))]
    #[test_case("rRef:CMesh", TypeName::Handle(Box::new(TypeName::Named("CMesh".into()))))]
    #[test_case("[4]Float", TypeName::FixedArray(4, Box::new(TypeName::Float)))]
    #[test_case("gameSavedStatsData", TypeName::Named("gameSavedStatsData".into()))]
    fn parses_type_names(input: &str, expected: TypeName) {
        assert_eq!(parse_type_name(input), expected);
    }

    #[test]
    fn fresh_property_is_skippable_until_edited() {
        let prop = create_property("Bool", &|_| false);
        assert!(prop.is_skippable_in_serialization());
    }

    #[test]
    fn edited_non_default_property_is_not_skippable() {
        let mut prop = create_property("Bool", &|_| false);
        prop.edit(PropertyValue::Bool(true));
        assert!(!prop.is_skippable_in_serialization());
    }

    #[test]
    fn serialized_in_property_is_always_unskippable() {
        let mut prop = create_property("Bool", &|_| false);
        prop.mark_serialized_in();
        assert!(!prop.is_skippable_in_serialization());
    }

    #[test]
    fn enum_type_name_yields_enum_value() {
        let prop = create_property("EDamageType", &|name| name == "EDamageType");
        assert_eq!(prop.value.kind(), PropertyKind::Enum);
    }

    #[test]
    fn unrecognized_named_type_yields_object_value() {
        let prop = create_property("gameSavedStatsData", &|_| false);
        assert_eq!(prop.value.kind(), PropertyKind::Object);
    }

    #[test]
    fn unknown_value_is_never_skippable_by_default() {
        assert!(!PropertyValue::Unknown(vec![1, 2, 3]).has_default_value());
    }

    #[test]
    fn unrecognized_colon_syntax_yields_unknown_value() {
        let prop = create_property("future:Widget", &|_| false);
        assert_eq!(prop.value.kind(), PropertyKind::Unknown);
    }
}
