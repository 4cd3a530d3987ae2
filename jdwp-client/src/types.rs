// JDWP type definitions
//
// Common types used across the JDWP protocol

use serde::{Deserialize, Serialize};

// Object IDs are 8 bytes in JDWP
pub type ObjectId = u64;
pub type ThreadId = ObjectId;
pub type StringId = ObjectId;

pub type ReferenceTypeId = u64;
pub type ClassId = ReferenceTypeId;

pub type MethodId = u64;
pub type FrameId = u64;

// Event request IDs are assigned by the VM
pub type RequestId = i32;

// Location identifies a code position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub type_tag: u8, // 1=class, 2=interface, 3=array
    pub class_id: ReferenceTypeId,
    pub method_id: MethodId,
    pub index: u64, // bytecode index (PC)
}

impl Location {
    pub fn new(class_id: ReferenceTypeId, method_id: MethodId, index: u64) -> Self {
        Self {
            type_tag: type_tags::CLASS,
            class_id,
            method_id,
            index,
        }
    }

    /// Same method, ignoring the bytecode index
    pub fn same_method(&self, other: &Location) -> bool {
        self.class_id == other.class_id && self.method_id == other.method_id
    }
}

// Reference type tags
pub mod type_tags {
    pub const CLASS: u8 = 1;
    pub const INTERFACE: u8 = 2;
    pub const ARRAY: u8 = 3;
}

// Value tags (JNI signature bytes plus JDWP object kinds)
pub mod tags {
    pub const ARRAY: u8 = b'[';
    pub const BYTE: u8 = b'B';
    pub const CHAR: u8 = b'C';
    pub const OBJECT: u8 = b'L';
    pub const FLOAT: u8 = b'F';
    pub const DOUBLE: u8 = b'D';
    pub const INT: u8 = b'I';
    pub const LONG: u8 = b'J';
    pub const SHORT: u8 = b'S';
    pub const VOID: u8 = b'V';
    pub const BOOLEAN: u8 = b'Z';
    pub const STRING: u8 = b's';
    pub const THREAD: u8 = b't';
    pub const THREAD_GROUP: u8 = b'g';
    pub const CLASS_LOADER: u8 = b'l';
    pub const CLASS_OBJECT: u8 = b'c';

    pub fn is_object(tag: u8) -> bool {
        matches!(
            tag,
            OBJECT | ARRAY | STRING | THREAD | THREAD_GROUP | CLASS_LOADER | CLASS_OBJECT
        )
    }
}

// Class status bits from ClassPrepare events and ClassesBySignature
pub mod class_status {
    pub const VERIFIED: i32 = 1;
    pub const PREPARED: i32 = 2;
    pub const INITIALIZED: i32 = 4;
    pub const ERROR: i32 = 8;
}

// Tagged value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Value {
    pub tag: u8,
    pub data: ValueData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValueData {
    Byte(i8),
    Char(u16),
    Float(f32),
    Double(f64),
    Int(i32),
    Long(i64),
    Short(i16),
    Boolean(bool),
    Object(ObjectId),
    Void,
}

impl Value {
    pub fn void() -> Self {
        Self {
            tag: tags::VOID,
            data: ValueData::Void,
        }
    }

    pub fn int(value: i32) -> Self {
        Self {
            tag: tags::INT,
            data: ValueData::Int(value),
        }
    }

    pub fn object(tag: u8, id: ObjectId) -> Self {
        Self {
            tag,
            data: ValueData::Object(id),
        }
    }

    /// Non-null object id carried by this value
    pub fn object_id(&self) -> Option<ObjectId> {
        match self.data {
            ValueData::Object(id) if id != 0 => Some(id),
            _ => None,
        }
    }

    /// Format value for display
    pub fn format(&self) -> String {
        match &self.data {
            ValueData::Byte(v) => format!("(byte) {}", v),
            ValueData::Char(v) => format!("(char) '{}'", char::from_u32(*v as u32).unwrap_or('?')),
            ValueData::Float(v) => format!("(float) {}", v),
            ValueData::Double(v) => format!("(double) {}", v),
            ValueData::Int(v) => format!("(int) {}", v),
            ValueData::Long(v) => format!("(long) {}", v),
            ValueData::Short(v) => format!("(short) {}", v),
            ValueData::Boolean(v) => format!("(boolean) {}", v),
            ValueData::Object(0) => "(object) null".to_string(),
            ValueData::Object(id) => format!("(object) @{:x}", id),
            ValueData::Void => "(void)".to_string(),
        }
    }
}

/// Convert a JNI class signature ("Lcom/example/Foo;") to a dotted name
pub fn signature_to_class_name(signature: &str) -> String {
    signature
        .strip_prefix('L')
        .and_then(|s| s.strip_suffix(';'))
        .unwrap_or(signature)
        .replace('/', ".")
}

/// Convert a dotted class name to its JNI signature
pub fn class_name_to_signature(class_name: &str) -> String {
    if class_name.starts_with('L') && class_name.ends_with(';') {
        class_name.to_string()
    } else {
        format!("L{};", class_name.replace('.', "/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_conversions() {
        assert_eq!(signature_to_class_name("Lcom/example/Foo$Bar;"), "com.example.Foo$Bar");
        assert_eq!(class_name_to_signature("com.example.Foo"), "Lcom/example/Foo;");
        assert_eq!(class_name_to_signature("Lcom/example/Foo;"), "Lcom/example/Foo;");
    }

    #[test]
    fn test_null_object_has_no_id() {
        assert_eq!(Value::object(tags::OBJECT, 0).object_id(), None);
        assert_eq!(Value::object(tags::STRING, 9).object_id(), Some(9));
        assert_eq!(Value::object(tags::OBJECT, 0).format(), "(object) null");
    }
}
