//! CSAV save-container reader/writer: the chunked-and-compressed node tree,
//! and the property/object model stored inside each node's bytes.

pub mod csav;
pub mod csystem;
pub mod node;
pub mod property;
pub mod serial_tree;

pub use csav::{backup_before_overwrite, load, save, CsavError, SaveFile, SaveVersion};
pub use csystem::{
    BlueprintRegistry, ClassBlueprint, CsystemError, EnumRegistry, FieldDescriptor,
    ObjectTableEntry, System, SystemStringPool, SystemStringPoolError,
};
pub use node::{Node, NodePayload, SaveTree};
pub use property::{
    create_property, default_value_for, parse_type_name, IntKind, Object, Property,
    PropertyEvent, PropertyFlags, PropertyKind, PropertyValue, TypeName,
};
pub use serial_tree::{SerialNodeDesc, SerialTreeError};
