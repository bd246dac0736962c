// Debug protocol error taxonomy
//
// Reference: https://docs.oracle.com/javase/8/docs/platform/jpda/jdwp/jdwp-protocol.html#JDWP_Error
//
// Every native failure reaching the protocol surface goes through the
// `From<JvmtiError>` table below.

use crate::native::JvmtiError;
use thiserror::Error;

pub type ProtocolResult<T> = Result<T, ProtocolError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ProtocolError {
    #[error("INVALID_THREAD")]
    InvalidThread,
    #[error("INVALID_THREAD_GROUP")]
    InvalidThreadGroup,
    #[error("INVALID_PRIORITY")]
    InvalidPriority,
    #[error("THREAD_NOT_SUSPENDED")]
    ThreadNotSuspended,
    #[error("THREAD_SUSPENDED")]
    ThreadSuspended,
    #[error("INVALID_OBJECT")]
    InvalidObject,
    #[error("INVALID_CLASS")]
    InvalidClass,
    #[error("CLASS_NOT_PREPARED")]
    ClassNotPrepared,
    #[error("INVALID_METHODID")]
    InvalidMethodId,
    #[error("INVALID_LOCATION")]
    InvalidLocation,
    #[error("INVALID_FIELDID")]
    InvalidFieldId,
    #[error("INVALID_FRAMEID")]
    InvalidFrameId,
    #[error("NO_MORE_FRAMES")]
    NoMoreFrames,
    #[error("OPAQUE_FRAME")]
    OpaqueFrame,
    #[error("TYPE_MISMATCH")]
    TypeMismatch,
    #[error("INVALID_SLOT")]
    InvalidSlot,
    #[error("DUPLICATE")]
    Duplicate,
    #[error("NOT_FOUND")]
    NotFound,
    #[error("INVALID_MONITOR")]
    InvalidMonitor,
    #[error("NOT_MONITOR_OWNER")]
    NotMonitorOwner,
    #[error("INTERRUPT")]
    Interrupt,
    #[error("INVALID_CLASS_FORMAT")]
    InvalidClassFormat,
    #[error("CIRCULAR_CLASS_DEFINITION")]
    CircularClassDefinition,
    #[error("FAILS_VERIFICATION")]
    FailsVerification,
    #[error("ADD_METHOD_NOT_IMPLEMENTED")]
    AddMethodNotImplemented,
    #[error("SCHEMA_CHANGE_NOT_IMPLEMENTED")]
    SchemaChangeNotImplemented,
    #[error("INVALID_TYPESTATE")]
    InvalidTypestate,
    #[error("HIERARCHY_CHANGE_NOT_IMPLEMENTED")]
    HierarchyChangeNotImplemented,
    #[error("DELETE_METHOD_NOT_IMPLEMENTED")]
    DeleteMethodNotImplemented,
    #[error("UNSUPPORTED_VERSION")]
    UnsupportedVersion,
    #[error("NAMES_DONT_MATCH")]
    NamesDontMatch,
    #[error("CLASS_MODIFIERS_CHANGE_NOT_IMPLEMENTED")]
    ClassModifiersChangeNotImplemented,
    #[error("METHOD_MODIFIERS_CHANGE_NOT_IMPLEMENTED")]
    MethodModifiersChangeNotImplemented,
    #[error("NOT_IMPLEMENTED")]
    NotImplemented,
    #[error("NULL_POINTER")]
    NullPointer,
    #[error("ABSENT_INFORMATION")]
    AbsentInformation,
    #[error("INVALID_EVENT_TYPE")]
    InvalidEventType,
    #[error("ILLEGAL_ARGUMENT")]
    IllegalArgument,
    #[error("OUT_OF_MEMORY")]
    OutOfMemory,
    #[error("ACCESS_DENIED")]
    AccessDenied,
    #[error("VM_DEAD")]
    VmDead,
    #[error("INTERNAL")]
    Internal,
    #[error("UNATTACHED_THREAD")]
    UnattachedThread,
    #[error("INVALID_TAG")]
    InvalidTag,
    #[error("INVALID_INDEX")]
    InvalidIndex,
    #[error("INVALID_LENGTH")]
    InvalidLength,
    #[error("INVALID_STRING")]
    InvalidString,
    #[error("INVALID_CLASS_LOADER")]
    InvalidClassLoader,
    #[error("INVALID_ARRAY")]
    InvalidArray,
    #[error("NATIVE_METHOD")]
    NativeMethod,
}

impl ProtocolError {
    /// JDWP error code of this kind
    pub fn code(&self) -> u16 {
        use ProtocolError::*;
        match self {
            InvalidThread => 10,
            InvalidThreadGroup => 11,
            InvalidPriority => 12,
            ThreadNotSuspended => 13,
            ThreadSuspended => 14,
            InvalidObject => 20,
            InvalidClass => 21,
            ClassNotPrepared => 22,
            InvalidMethodId => 23,
            InvalidLocation => 24,
            InvalidFieldId => 25,
            InvalidFrameId => 30,
            NoMoreFrames => 31,
            OpaqueFrame => 32,
            TypeMismatch => 34,
            InvalidSlot => 35,
            Duplicate => 40,
            NotFound => 41,
            InvalidMonitor => 50,
            NotMonitorOwner => 51,
            Interrupt => 52,
            InvalidClassFormat => 60,
            CircularClassDefinition => 61,
            FailsVerification => 62,
            AddMethodNotImplemented => 63,
            SchemaChangeNotImplemented => 64,
            InvalidTypestate => 65,
            HierarchyChangeNotImplemented => 66,
            DeleteMethodNotImplemented => 67,
            UnsupportedVersion => 68,
            NamesDontMatch => 69,
            ClassModifiersChangeNotImplemented => 70,
            MethodModifiersChangeNotImplemented => 71,
            NotImplemented => 99,
            NullPointer => 100,
            AbsentInformation => 101,
            InvalidEventType => 102,
            IllegalArgument => 103,
            OutOfMemory => 110,
            AccessDenied => 111,
            VmDead => 112,
            Internal => 113,
            UnattachedThread => 115,
            InvalidTag => 500,
            InvalidIndex => 503,
            InvalidLength => 504,
            InvalidString => 506,
            InvalidClassLoader => 507,
            InvalidArray => 508,
            NativeMethod => 511,
        }
    }
}

impl From<JvmtiError> for ProtocolError {
    fn from(error: JvmtiError) -> Self {
        use JvmtiError as N;
        use ProtocolError as P;
        match error {
            N::NullPointer => P::NullPointer,
            N::OutOfMemory => P::OutOfMemory,
            N::AccessDenied => P::AccessDenied,
            N::UnattachedThread => P::UnattachedThread,
            N::InvalidPriority => P::InvalidPriority,
            N::ThreadNotSuspended => P::ThreadNotSuspended,
            N::ThreadSuspended => P::ThreadSuspended,
            N::ClassNotPrepared => P::ClassNotPrepared,
            N::NoMoreFrames => P::NoMoreFrames,
            N::OpaqueFrame => P::OpaqueFrame,
            N::Duplicate => P::Duplicate,
            N::NotFound => P::NotFound,
            N::NotMonitorOwner => P::NotMonitorOwner,
            N::Interrupt => P::Interrupt,
            N::AbsentInformation => P::AbsentInformation,
            N::InvalidEventType => P::InvalidEventType,
            N::NativeMethod => P::NativeMethod,
            N::ClassLoaderUnsupported => P::InvalidClassLoader,
            N::InvalidThread => P::InvalidThread,
            N::InvalidFieldId => P::InvalidFieldId,
            N::InvalidMethodId => P::InvalidMethodId,
            N::InvalidLocation => P::InvalidLocation,
            N::InvalidObject => P::InvalidObject,
            N::InvalidClass => P::InvalidClass,
            N::TypeMismatch => P::TypeMismatch,
            N::InvalidSlot => P::InvalidSlot,
            N::InvalidThreadGroup => P::InvalidThreadGroup,
            N::InvalidMonitor => P::InvalidMonitor,
            N::IllegalArgument => P::IllegalArgument,
            N::InvalidTypestate => P::InvalidTypestate,
            N::UnsupportedVersion => P::UnsupportedVersion,
            N::InvalidClassFormat => P::InvalidClassFormat,
            N::CircularClassDefinition => P::CircularClassDefinition,
            N::FailsVerification => P::FailsVerification,
            N::NamesDontMatch => P::NamesDontMatch,
            N::UnsupportedRedefinitionMethodAdded => P::AddMethodNotImplemented,
            N::UnsupportedRedefinitionSchemaChanged => P::SchemaChangeNotImplemented,
            N::UnsupportedRedefinitionHierarchyChanged => P::HierarchyChangeNotImplemented,
            N::UnsupportedRedefinitionMethodDeleted => P::DeleteMethodNotImplemented,
            N::UnsupportedRedefinitionClassModifiersChanged => {
                P::ClassModifiersChangeNotImplemented
            }
            N::UnsupportedRedefinitionMethodModifiersChanged => {
                P::MethodModifiersChangeNotImplemented
            }
            N::Internal => P::Internal,
            N::MustPossessCapability => P::NotImplemented,
            N::ThreadNotAlive
            | N::InvalidEnvironment
            | N::UnmodifiableClass
            | N::WrongPhase
            | N::NotAvailable
            | N::Unknown(_) => P::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_handle_errors_map_one_to_one() {
        assert_eq!(ProtocolError::from(JvmtiError::InvalidThread), ProtocolError::InvalidThread);
        assert_eq!(ProtocolError::from(JvmtiError::InvalidObject), ProtocolError::InvalidObject);
        assert_eq!(ProtocolError::from(JvmtiError::InvalidSlot), ProtocolError::InvalidSlot);
        assert_eq!(
            ProtocolError::from(JvmtiError::ClassLoaderUnsupported),
            ProtocolError::InvalidClassLoader
        );
    }

    #[test]
    fn test_unmapped_codes_are_internal() {
        for error in [
            JvmtiError::ThreadNotAlive,
            JvmtiError::InvalidEnvironment,
            JvmtiError::UnmodifiableClass,
            JvmtiError::WrongPhase,
            JvmtiError::NotAvailable,
            JvmtiError::Unknown(7777),
        ] {
            assert_eq!(ProtocolError::from(error), ProtocolError::Internal, "{:?}", error);
        }
    }

    #[test]
    fn test_missing_capability_is_not_implemented() {
        assert_eq!(
            ProtocolError::from(JvmtiError::MustPossessCapability),
            ProtocolError::NotImplemented
        );
    }

    #[test]
    fn test_redefinition_errors_stay_distinct() {
        let mapped: HashSet<ProtocolError> = [
            JvmtiError::UnsupportedRedefinitionMethodAdded,
            JvmtiError::UnsupportedRedefinitionSchemaChanged,
            JvmtiError::UnsupportedRedefinitionHierarchyChanged,
            JvmtiError::UnsupportedRedefinitionMethodDeleted,
            JvmtiError::UnsupportedRedefinitionClassModifiersChanged,
            JvmtiError::UnsupportedRedefinitionMethodModifiersChanged,
        ]
        .into_iter()
        .map(ProtocolError::from)
        .collect();

        assert_eq!(mapped.len(), 6);
        assert!(!mapped.contains(&ProtocolError::NotImplemented));
    }

    #[test]
    fn test_codes_match_protocol_numbers() {
        assert_eq!(ProtocolError::InvalidThread.code(), 10);
        assert_eq!(ProtocolError::InvalidFieldId.code(), 25);
        assert_eq!(ProtocolError::Duplicate.code(), 40);
        assert_eq!(ProtocolError::NotImplemented.code(), 99);
        assert_eq!(ProtocolError::Internal.code(), 113);
        assert_eq!(ProtocolError::InvalidClassLoader.code(), 507);
        assert_eq!(ProtocolError::Internal.to_string(), "INTERNAL");
    }
}
