// Native instrumentation layer
//
// The bridge never talks to the JVMTI/JNI function tables directly. An agent
// supplies an implementation of these traits (the in-crate simulated VM in
// `mock` is the other implementation). Handles are opaque pointer-sized
// values; 0 is the null reference.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type NativeResult<T> = Result<T, JvmtiError>;

/// JVMTI `jlocation`: bytecode index inside a method
pub type JLocation = i64;

/// A JNI reference (local or global). `JObject::NULL` is the null reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct JObject(usize);

pub type JClass = JObject;
pub type JThread = JObject;
pub type JThreadGroup = JObject;
pub type JString = JObject;
pub type JArray = JObject;

impl JObject {
    pub const NULL: JObject = JObject(0);

    pub fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    pub fn as_raw(self) -> usize {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// JNI `jfieldID`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JFieldId(usize);

/// JNI `jmethodID`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JMethodId(usize);

impl JFieldId {
    pub fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    pub fn as_raw(self) -> usize {
        self.0
    }
}

impl JMethodId {
    pub fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    pub fn as_raw(self) -> usize {
        self.0
    }
}

/// Selects the typed JNI getter (`Get<Type>Field`, `Get<Type>ArrayRegion`, ...)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JavaType {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    Object,
}

/// Selects the typed JVMTI local getter (`GetLocalInt`, `GetLocalLong`, ...).
/// Sub-int primitives are read as `Int` and narrowed by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocalType {
    Int,
    Long,
    Float,
    Double,
    Object,
}

/// Raw value returned by a native getter. `Object` carries a local reference
/// that the caller owns.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JValue {
    Boolean(bool),
    Byte(i8),
    Char(u16),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Object(JObject),
}

impl JValue {
    /// Zero value for a getter type, what JNI returns while an exception is pending
    pub fn default_for(ty: JavaType) -> Self {
        match ty {
            JavaType::Boolean => JValue::Boolean(false),
            JavaType::Byte => JValue::Byte(0),
            JavaType::Char => JValue::Char(0),
            JavaType::Short => JValue::Short(0),
            JavaType::Int => JValue::Int(0),
            JavaType::Long => JValue::Long(0),
            JavaType::Float => JValue::Float(0.0),
            JavaType::Double => JValue::Double(0.0),
            JavaType::Object => JValue::Object(JObject::NULL),
        }
    }
}

/// Name, signature and generic signature of a field or method
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberName {
    pub name: String,
    pub signature: String,
    pub generic_signature: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineNumberEntry {
    pub start_location: JLocation,
    pub line_number: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariableEntry {
    pub start_location: JLocation,
    pub length: i32,
    pub name: String,
    pub signature: String,
    pub generic_signature: Option<String>,
    pub slot: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeFrame {
    pub method: JMethodId,
    pub location: JLocation,
}

/// `jvmtiThreadInfo`. `thread_group` and `context_class_loader` are local
/// references owned by the caller.
#[derive(Debug, Clone)]
pub struct NativeThreadInfo {
    pub name: String,
    pub priority: i32,
    pub is_daemon: bool,
    pub thread_group: JThreadGroup,
    pub context_class_loader: JObject,
}

/// Capabilities the bridge asks for at construction (`jvmtiCapabilities` subset)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    pub can_tag_objects: bool,
    pub can_get_synthetic_attribute: bool,
    pub can_get_source_file_name: bool,
    pub can_get_line_numbers: bool,
    pub can_get_source_debug_extension: bool,
    pub can_access_local_variables: bool,
    pub can_generate_single_step_events: bool,
    pub can_generate_exception_events: bool,
    pub can_generate_breakpoint_events: bool,
    pub can_generate_method_entry_events: bool,
    pub can_generate_method_exit_events: bool,
    pub can_get_bytecodes: bool,
    pub can_suspend: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            can_tag_objects: true,
            can_get_synthetic_attribute: true,
            can_get_source_file_name: true,
            can_get_line_numbers: true,
            can_get_source_debug_extension: true,
            can_access_local_variables: true,
            can_generate_single_step_events: true,
            can_generate_exception_events: true,
            can_generate_breakpoint_events: true,
            can_generate_method_entry_events: false,
            can_generate_method_exit_events: false,
            can_get_bytecodes: true,
            can_suspend: true,
        }
    }
}

/// JVMTI event types the bridge enables notification for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum NativeEventType {
    VmDeath = 51,
    ThreadStart = 52,
    ThreadEnd = 53,
    ClassPrepare = 56,
    Exception = 58,
    SingleStep = 60,
    Breakpoint = 62,
    MethodEntry = 65,
    MethodExit = 66,
}

/// A JVMTI callback as delivered to the bridge. Handles are the callback's
/// local references; the VM frees them when the callback returns.
#[derive(Debug, Clone)]
pub enum NativeEvent {
    VmDeath,
    ThreadStart {
        thread: JThread,
    },
    ThreadEnd {
        thread: JThread,
    },
    ClassPrepare {
        thread: JThread,
        class: JClass,
    },
    Breakpoint {
        thread: JThread,
        method: JMethodId,
        location: JLocation,
    },
    SingleStep {
        thread: JThread,
        method: JMethodId,
        location: JLocation,
    },
    Exception {
        thread: JThread,
        method: JMethodId,
        location: JLocation,
        exception: JObject,
        catch_method: Option<JMethodId>,
        catch_location: JLocation,
    },
    MethodEntry {
        thread: JThread,
        method: JMethodId,
    },
    MethodExit {
        thread: JThread,
        method: JMethodId,
        location: JLocation,
    },
}

// JVMTI thread state bits (GetThreadState)
pub mod thread_state {
    pub const ALIVE: i32 = 0x0001;
    pub const TERMINATED: i32 = 0x0002;
    pub const RUNNABLE: i32 = 0x0004;
    pub const WAITING_INDEFINITELY: i32 = 0x0010;
    pub const WAITING_WITH_TIMEOUT: i32 = 0x0020;
    pub const SLEEPING: i32 = 0x0040;
    pub const WAITING: i32 = 0x0080;
    pub const IN_OBJECT_WAIT: i32 = 0x0100;
    pub const PARKED: i32 = 0x0200;
    pub const BLOCKED_ON_MONITOR_ENTER: i32 = 0x0400;
    pub const SUSPENDED: i32 = 0x100000;
    pub const INTERRUPTED: i32 = 0x200000;
    pub const IN_NATIVE: i32 = 0x400000;
}

// JVMTI class status bits (GetClassStatus)
pub mod class_status {
    pub const VERIFIED: i32 = 1;
    pub const PREPARED: i32 = 2;
    pub const INITIALIZED: i32 = 4;
    pub const ERROR: i32 = 8;
    pub const ARRAY: i32 = 16;
    pub const PRIMITIVE: i32 = 32;
}

// JVM access flags
pub mod modifiers {
    pub const PUBLIC: i32 = 0x0001;
    pub const PRIVATE: i32 = 0x0002;
    pub const PROTECTED: i32 = 0x0004;
    pub const STATIC: i32 = 0x0008;
    pub const FINAL: i32 = 0x0010;
    pub const SYNCHRONIZED: i32 = 0x0020;
    pub const NATIVE: i32 = 0x0100;
    pub const INTERFACE: i32 = 0x0200;
    pub const ABSTRACT: i32 = 0x0400;
    pub const SYNTHETIC: i32 = 0x1000;
}

/// `jvmtiError`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum JvmtiError {
    #[error("JVMTI_ERROR_INVALID_THREAD")]
    InvalidThread,
    #[error("JVMTI_ERROR_INVALID_THREAD_GROUP")]
    InvalidThreadGroup,
    #[error("JVMTI_ERROR_INVALID_PRIORITY")]
    InvalidPriority,
    #[error("JVMTI_ERROR_THREAD_NOT_SUSPENDED")]
    ThreadNotSuspended,
    #[error("JVMTI_ERROR_THREAD_SUSPENDED")]
    ThreadSuspended,
    #[error("JVMTI_ERROR_THREAD_NOT_ALIVE")]
    ThreadNotAlive,
    #[error("JVMTI_ERROR_INVALID_OBJECT")]
    InvalidObject,
    #[error("JVMTI_ERROR_INVALID_CLASS")]
    InvalidClass,
    #[error("JVMTI_ERROR_CLASS_NOT_PREPARED")]
    ClassNotPrepared,
    #[error("JVMTI_ERROR_INVALID_METHODID")]
    InvalidMethodId,
    #[error("JVMTI_ERROR_INVALID_LOCATION")]
    InvalidLocation,
    #[error("JVMTI_ERROR_INVALID_FIELDID")]
    InvalidFieldId,
    #[error("JVMTI_ERROR_NO_MORE_FRAMES")]
    NoMoreFrames,
    #[error("JVMTI_ERROR_OPAQUE_FRAME")]
    OpaqueFrame,
    #[error("JVMTI_ERROR_TYPE_MISMATCH")]
    TypeMismatch,
    #[error("JVMTI_ERROR_INVALID_SLOT")]
    InvalidSlot,
    #[error("JVMTI_ERROR_DUPLICATE")]
    Duplicate,
    #[error("JVMTI_ERROR_NOT_FOUND")]
    NotFound,
    #[error("JVMTI_ERROR_INVALID_MONITOR")]
    InvalidMonitor,
    #[error("JVMTI_ERROR_NOT_MONITOR_OWNER")]
    NotMonitorOwner,
    #[error("JVMTI_ERROR_INTERRUPT")]
    Interrupt,
    #[error("JVMTI_ERROR_INVALID_CLASS_FORMAT")]
    InvalidClassFormat,
    #[error("JVMTI_ERROR_CIRCULAR_CLASS_DEFINITION")]
    CircularClassDefinition,
    #[error("JVMTI_ERROR_FAILS_VERIFICATION")]
    FailsVerification,
    #[error("JVMTI_ERROR_UNSUPPORTED_REDEFINITION_METHOD_ADDED")]
    UnsupportedRedefinitionMethodAdded,
    #[error("JVMTI_ERROR_UNSUPPORTED_REDEFINITION_SCHEMA_CHANGED")]
    UnsupportedRedefinitionSchemaChanged,
    #[error("JVMTI_ERROR_INVALID_TYPESTATE")]
    InvalidTypestate,
    #[error("JVMTI_ERROR_UNSUPPORTED_REDEFINITION_HIERARCHY_CHANGED")]
    UnsupportedRedefinitionHierarchyChanged,
    #[error("JVMTI_ERROR_UNSUPPORTED_REDEFINITION_METHOD_DELETED")]
    UnsupportedRedefinitionMethodDeleted,
    #[error("JVMTI_ERROR_UNSUPPORTED_VERSION")]
    UnsupportedVersion,
    #[error("JVMTI_ERROR_NAMES_DONT_MATCH")]
    NamesDontMatch,
    #[error("JVMTI_ERROR_UNSUPPORTED_REDEFINITION_CLASS_MODIFIERS_CHANGED")]
    UnsupportedRedefinitionClassModifiersChanged,
    #[error("JVMTI_ERROR_UNSUPPORTED_REDEFINITION_METHOD_MODIFIERS_CHANGED")]
    UnsupportedRedefinitionMethodModifiersChanged,
    #[error("JVMTI_ERROR_UNMODIFIABLE_CLASS")]
    UnmodifiableClass,
    #[error("JVMTI_ERROR_NOT_AVAILABLE")]
    NotAvailable,
    #[error("JVMTI_ERROR_MUST_POSSESS_CAPABILITY")]
    MustPossessCapability,
    #[error("JVMTI_ERROR_NULL_POINTER")]
    NullPointer,
    #[error("JVMTI_ERROR_ABSENT_INFORMATION")]
    AbsentInformation,
    #[error("JVMTI_ERROR_INVALID_EVENT_TYPE")]
    InvalidEventType,
    #[error("JVMTI_ERROR_ILLEGAL_ARGUMENT")]
    IllegalArgument,
    #[error("JVMTI_ERROR_NATIVE_METHOD")]
    NativeMethod,
    #[error("JVMTI_ERROR_CLASS_LOADER_UNSUPPORTED")]
    ClassLoaderUnsupported,
    #[error("JVMTI_ERROR_OUT_OF_MEMORY")]
    OutOfMemory,
    #[error("JVMTI_ERROR_ACCESS_DENIED")]
    AccessDenied,
    #[error("JVMTI_ERROR_WRONG_PHASE")]
    WrongPhase,
    #[error("JVMTI_ERROR_INTERNAL")]
    Internal,
    #[error("JVMTI_ERROR_UNATTACHED_THREAD")]
    UnattachedThread,
    #[error("JVMTI_ERROR_INVALID_ENVIRONMENT")]
    InvalidEnvironment,
    #[error("unrecognized JVMTI error code {0}")]
    Unknown(u32),
}

/// Non-zero `jint` result of a JNI invocation-interface call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("JNI error code {0}")]
pub struct JniError(pub i32);

/// The virtual machine: owns the process-wide JVMTI environment and hands
/// out per-thread JNI environments.
pub trait JavaVm: Send + Sync + 'static {
    type Jvmti: JvmtiEnv;
    type Jni: JniEnv;

    fn jvmti(&self) -> &Self::Jvmti;

    /// `AttachCurrentThreadAsDaemon`; a no-op for already attached threads
    fn attach_current_thread_as_daemon(&self) -> Result<Self::Jni, JniError>;
}

/// The JVMTI function table. Functions returning handles return local
/// references in the calling thread's frame.
pub trait JvmtiEnv: Send + Sync {
    fn add_capabilities(&self, capabilities: &Capabilities) -> NativeResult<()>;
    fn get_system_property(&self, property: &str) -> NativeResult<String>;

    // Classes
    fn get_loaded_classes(&self) -> NativeResult<Vec<JClass>>;
    fn get_class_signature(&self, class: JClass) -> NativeResult<(String, Option<String>)>;
    fn get_class_status(&self, class: JClass) -> NativeResult<i32>;
    fn get_class_modifiers(&self, class: JClass) -> NativeResult<i32>;
    fn is_interface(&self, class: JClass) -> NativeResult<bool>;
    fn is_array_class(&self, class: JClass) -> NativeResult<bool>;
    fn get_class_fields(&self, class: JClass) -> NativeResult<Vec<JFieldId>>;
    fn get_class_methods(&self, class: JClass) -> NativeResult<Vec<JMethodId>>;
    fn get_implemented_interfaces(&self, class: JClass) -> NativeResult<Vec<JClass>>;
    fn get_source_file_name(&self, class: JClass) -> NativeResult<String>;

    // Fields and methods
    fn get_field_name(&self, class: JClass, field: JFieldId) -> NativeResult<MemberName>;
    fn get_field_modifiers(&self, class: JClass, field: JFieldId) -> NativeResult<i32>;
    fn get_method_name(&self, method: JMethodId) -> NativeResult<MemberName>;
    fn get_method_modifiers(&self, method: JMethodId) -> NativeResult<i32>;
    fn get_method_declaring_class(&self, method: JMethodId) -> NativeResult<JClass>;
    fn get_method_location(&self, method: JMethodId) -> NativeResult<(JLocation, JLocation)>;
    fn get_line_number_table(&self, method: JMethodId) -> NativeResult<Vec<LineNumberEntry>>;
    fn get_local_variable_table(&self, method: JMethodId)
        -> NativeResult<Vec<LocalVariableEntry>>;
    fn get_bytecodes(&self, method: JMethodId) -> NativeResult<Vec<u8>>;

    // Threads
    fn get_all_threads(&self) -> NativeResult<Vec<JThread>>;
    /// The thread object of the calling thread
    fn get_current_thread(&self) -> NativeResult<JThread>;
    fn get_top_thread_groups(&self) -> NativeResult<Vec<JThreadGroup>>;
    fn get_thread_info(&self, thread: JThread) -> NativeResult<NativeThreadInfo>;
    fn get_thread_state(&self, thread: JThread) -> NativeResult<i32>;
    fn suspend_thread(&self, thread: JThread) -> NativeResult<()>;
    fn resume_thread(&self, thread: JThread) -> NativeResult<()>;
    /// Top-level result plus one result per requested thread
    fn suspend_thread_list(&self, threads: &[JThread]) -> NativeResult<Vec<NativeResult<()>>>;
    fn resume_thread_list(&self, threads: &[JThread]) -> NativeResult<Vec<NativeResult<()>>>;

    // Stack frames
    fn get_stack_trace(
        &self,
        thread: JThread,
        start_depth: i32,
        max_frames: i32,
    ) -> NativeResult<Vec<NativeFrame>>;
    fn get_frame_count(&self, thread: JThread) -> NativeResult<i32>;
    fn get_frame_location(&self, thread: JThread, depth: i32)
        -> NativeResult<(JMethodId, JLocation)>;
    fn get_local(&self, thread: JThread, depth: i32, slot: i32, ty: LocalType)
        -> NativeResult<JValue>;

    // Object tags
    fn get_tag(&self, object: JObject) -> NativeResult<i64>;
    fn set_tag(&self, object: JObject, tag: i64) -> NativeResult<()>;

    // Events
    fn set_breakpoint(&self, method: JMethodId, location: JLocation) -> NativeResult<()>;
    fn clear_breakpoint(&self, method: JMethodId, location: JLocation) -> NativeResult<()>;
    fn set_event_notification_mode(
        &self,
        enable: bool,
        event: NativeEventType,
        thread: Option<JThread>,
    ) -> NativeResult<()>;
}

/// The per-thread JNI function table. JNI reports failure through pending
/// exceptions, not return codes.
pub trait JniEnv {
    fn new_local_ref(&self, object: JObject) -> JObject;
    fn delete_local_ref(&self, object: JObject);
    fn new_global_ref(&self, object: JObject) -> JObject;
    fn delete_global_ref(&self, object: JObject);
    fn is_same_object(&self, a: JObject, b: JObject) -> bool;
    fn is_assignable_from(&self, sub: JClass, sup: JClass) -> bool;

    fn get_object_class(&self, object: JObject) -> JClass;
    /// Null for `java.lang.Object` and interfaces
    fn get_superclass(&self, class: JClass) -> JClass;
    fn get_static_field(&self, class: JClass, field: JFieldId, ty: JavaType) -> JValue;
    fn get_field(&self, object: JObject, field: JFieldId, ty: JavaType) -> JValue;

    fn get_array_length(&self, array: JArray) -> i32;
    /// `Get<Type>ArrayRegion` for primitive element types
    fn get_array_region(&self, array: JArray, ty: JavaType, start: i32, len: i32) -> Vec<JValue>;
    fn get_object_array_element(&self, array: JArray, index: i32) -> JObject;

    fn get_string_utf_chars(&self, string: JString) -> Option<String>;

    fn exception_check(&self) -> bool;
    fn exception_clear(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_handle() {
        assert!(JObject::NULL.is_null());
        assert!(!JObject::from_raw(0x10).is_null());
        assert_eq!(JObject::default(), JObject::NULL);
    }
}
