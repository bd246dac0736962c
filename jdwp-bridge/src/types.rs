// Protocol type definitions
//
// Identifiers handed to the debugger front end, and the records the command
// surface returns

use crate::native::{class_status, thread_state};
use serde::{Deserialize, Serialize};

// Object IDs are 8 bytes; 0 is the null object
pub type ObjectId = u64;
pub type ThreadId = ObjectId;
pub type ThreadGroupId = ObjectId;
pub type StringId = ObjectId;
pub type ClassLoaderId = ObjectId;
pub type ClassObjectId = ObjectId;
pub type ArrayId = ObjectId;

pub type ReferenceTypeId = ObjectId;
pub type ClassId = ReferenceTypeId;
pub type InterfaceId = ReferenceTypeId;
pub type ArrayTypeId = ReferenceTypeId;

// Field and method IDs are the native jfieldID / jmethodID values
pub type MethodId = u64;
pub type FieldId = u64;

// Frame IDs are stack depths, 0 = topmost frame
pub type FrameId = u64;

pub type RequestId = i32;

// Reference type tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum RefTypeTag {
    Class = 1,
    Interface = 2,
    Array = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaggedReferenceTypeId {
    pub type_tag: RefTypeTag,
    pub type_id: ReferenceTypeId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaggedObjectId {
    pub tag: TypeTag,
    pub object_id: ObjectId,
}

// Location identifies a code position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub type_tag: RefTypeTag,
    pub class_id: ReferenceTypeId,
    pub method_id: MethodId,
    pub index: u64, // bytecode index (PC)
}

// Thread status values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum ThreadStatus {
    Zombie = 0,
    Running = 1,
    Sleeping = 2,
    Monitor = 3,
    Wait = 4,
}

impl ThreadStatus {
    /// Collapse a JVMTI thread state bitmask into one status.
    /// Priority: monitor > sleeping > zombie > wait > running.
    pub fn from_native_state(state: i32) -> Self {
        if state & thread_state::BLOCKED_ON_MONITOR_ENTER != 0 {
            ThreadStatus::Monitor
        } else if state & thread_state::SLEEPING != 0 {
            ThreadStatus::Sleeping
        } else if state & thread_state::TERMINATED != 0 {
            ThreadStatus::Zombie
        } else if state & thread_state::WAITING != 0 {
            ThreadStatus::Wait
        } else {
            ThreadStatus::Running
        }
    }
}

// Suspend status values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum SuspendStatus {
    Running = 0,
    Suspended = 1,
}

impl SuspendStatus {
    pub fn from_native_state(state: i32) -> Self {
        if state & thread_state::SUSPENDED != 0 {
            SuspendStatus::Suspended
        } else {
            SuspendStatus::Running
        }
    }
}

/// Class status bits (verified/prepared/initialized/error), low 4 bits of
/// the native class status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ClassStatus(pub i32);

impl ClassStatus {
    pub const VERIFIED: ClassStatus = ClassStatus(class_status::VERIFIED);
    pub const PREPARED: ClassStatus = ClassStatus(class_status::PREPARED);
    pub const INITIALIZED: ClassStatus = ClassStatus(class_status::INITIALIZED);
    pub const ERROR: ClassStatus = ClassStatus(class_status::ERROR);

    pub fn from_native(status: i32) -> Self {
        ClassStatus(status & 0xF)
    }

    pub fn contains(self, other: ClassStatus) -> bool {
        self.0 & other.0 == other.0
    }
}

// Type tags for values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TypeTag {
    Array = 91,        // '['
    Byte = 66,         // 'B'
    Char = 67,         // 'C'
    Object = 76,       // 'L'
    Float = 70,        // 'F'
    Double = 68,       // 'D'
    Int = 73,          // 'I'
    Long = 74,         // 'J'
    Short = 83,        // 'S'
    Void = 86,         // 'V'
    Boolean = 90,      // 'Z'
    String = 115,      // 's'
    Thread = 116,      // 't'
    ThreadGroup = 103, // 'g'
    ClassLoader = 108, // 'l'
    ClassObject = 99,  // 'c'
}

impl TypeTag {
    pub fn is_object(self) -> bool {
        matches!(
            self,
            TypeTag::Array
                | TypeTag::Object
                | TypeTag::String
                | TypeTag::Thread
                | TypeTag::ThreadGroup
                | TypeTag::ClassLoader
                | TypeTag::ClassObject
        )
    }
}

// Tagged value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Value {
    pub tag: TypeTag,
    pub data: ValueData,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
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
    pub fn int(v: i32) -> Self {
        Self { tag: TypeTag::Int, data: ValueData::Int(v) }
    }

    pub fn object(tagged: TaggedObjectId) -> Self {
        Self {
            tag: tagged.tag,
            data: ValueData::Object(tagged.object_id),
        }
    }

    pub fn object_id(&self) -> Option<ObjectId> {
        match self.data {
            ValueData::Object(id) => Some(id),
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
            ValueData::Object(id) => {
                if *id == 0 {
                    "(object) null".to_string()
                } else {
                    format!("(object) @{:x}", id)
                }
            }
            ValueData::Void => "(void)".to_string(),
        }
    }
}

/// One entry of `GetAllClasses` / `GetClassesBySignature`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceTypeData {
    pub type_id: TaggedReferenceTypeId,
    pub signature: String,
    pub generic_signature: Option<String>,
    pub status: ClassStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredFieldData {
    pub field_id: FieldId,
    pub name: String,
    pub signature: String,
    pub generic_signature: Option<String>,
    pub modifiers: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredMethodData {
    pub method_id: MethodId,
    pub name: String,
    pub signature: String,
    pub generic_signature: Option<String>,
    pub modifiers: i32,
}

// Variable information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    pub code_index: u64,
    pub name: String,
    pub signature: String,
    pub generic_signature: Option<String>,
    pub length: u32,
    pub slot: u32,
}

// Stack frame information
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameInfo {
    pub frame_id: FrameId,
    pub location: Location,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmVersion {
    pub description: String,
    pub jdwp_major: i32,
    pub jdwp_minor: i32,
    pub vm_version: String,
    pub vm_name: String,
}

// Line table information
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineEntry {
    pub line_code_index: u64,
    pub line_number: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineTable {
    pub start: u64,
    pub end: u64,
    pub lines: Vec<LineEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableTable {
    /// Words occupied by the arguments, `this` included for instance methods
    pub arg_count: i32,
    pub variables: Vec<Variable>,
}

/// `VirtualMachine.DisposeObjects` entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisposeRequest {
    pub object_id: ObjectId,
    pub ref_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::thread_state::*;

    #[test]
    fn test_sleeping_beats_waiting() {
        let state = ALIVE | SLEEPING | WAITING | WAITING_WITH_TIMEOUT;
        assert_eq!(ThreadStatus::from_native_state(state), ThreadStatus::Sleeping);
    }

    #[test]
    fn test_monitor_beats_everything() {
        let state = ALIVE | BLOCKED_ON_MONITOR_ENTER | SLEEPING | TERMINATED | WAITING;
        assert_eq!(ThreadStatus::from_native_state(state), ThreadStatus::Monitor);
    }

    #[test]
    fn test_terminated_beats_waiting() {
        assert_eq!(
            ThreadStatus::from_native_state(TERMINATED | WAITING),
            ThreadStatus::Zombie
        );
        assert_eq!(ThreadStatus::from_native_state(ALIVE | WAITING), ThreadStatus::Wait);
        assert_eq!(ThreadStatus::from_native_state(ALIVE | RUNNABLE), ThreadStatus::Running);
        assert_eq!(ThreadStatus::from_native_state(0), ThreadStatus::Running);
    }

    #[test]
    fn test_suspend_flag_is_orthogonal() {
        let state = ALIVE | SLEEPING | SUSPENDED;
        assert_eq!(ThreadStatus::from_native_state(state), ThreadStatus::Sleeping);
        assert_eq!(SuspendStatus::from_native_state(state), SuspendStatus::Suspended);
        assert_eq!(SuspendStatus::from_native_state(ALIVE), SuspendStatus::Running);
    }

    #[test]
    fn test_class_status_masks_low_bits() {
        let status = ClassStatus::from_native(
            class_status::VERIFIED | class_status::PREPARED | class_status::ARRAY,
        );
        assert_eq!(status.0, 3);
        assert!(status.contains(ClassStatus::PREPARED));
        assert!(!status.contains(ClassStatus::INITIALIZED));
    }

    #[test]
    fn test_value_format() {
        assert_eq!(Value::int(42).format(), "(int) 42");
        let null = Value::object(TaggedObjectId { tag: TypeTag::Object, object_id: 0 });
        assert_eq!(null.format(), "(object) null");
        assert_eq!(null.object_id(), Some(0));
    }
}
