// Event types
//
// Event requests are registered by the debugger; composite event sets are
// delivered on the session channel when a request fires.

use crate::protocol::ProtocolError;
use crate::types::*;
use serde::{Deserialize, Serialize};

/// JDWP event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EventKind {
    SingleStep = 1,
    Breakpoint = 2,
    FramePop = 3,
    Exception = 4,
    UserDefined = 5,
    ThreadStart = 6,
    ThreadDeath = 7,
    ClassPrepare = 8,
    ClassUnload = 9,
    ClassLoad = 10,
    FieldAccess = 20,
    FieldModification = 21,
    ExceptionCatch = 30,
    MethodEntry = 40,
    MethodExit = 41,
    MethodExitWithReturnValue = 42,
    MonitorContendedEnter = 43,
    MonitorContendedEntered = 44,
    MonitorWait = 45,
    MonitorWaited = 46,
    VmStart = 90,
    VmDeath = 99,
}

impl EventKind {
    /// Kinds the bridge can register natively
    pub fn is_supported(self) -> bool {
        matches!(
            self,
            EventKind::SingleStep
                | EventKind::Breakpoint
                | EventKind::Exception
                | EventKind::ThreadStart
                | EventKind::ThreadDeath
                | EventKind::ClassPrepare
                | EventKind::MethodEntry
                | EventKind::MethodExit
                | EventKind::VmDeath
        )
    }
}

impl TryFrom<u8> for EventKind {
    type Error = ProtocolError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        use EventKind::*;
        let kind = match code {
            1 => SingleStep,
            2 => Breakpoint,
            3 => FramePop,
            4 => Exception,
            5 => UserDefined,
            6 => ThreadStart,
            7 => ThreadDeath,
            8 => ClassPrepare,
            9 => ClassUnload,
            10 => ClassLoad,
            20 => FieldAccess,
            21 => FieldModification,
            30 => ExceptionCatch,
            40 => MethodEntry,
            41 => MethodExit,
            42 => MethodExitWithReturnValue,
            43 => MonitorContendedEnter,
            44 => MonitorContendedEntered,
            45 => MonitorWait,
            46 => MonitorWaited,
            90 => VmStart,
            99 => VmDeath,
            _ => return Err(ProtocolError::InvalidEventType),
        };
        Ok(kind)
    }
}

/// Suspend policy for events, weakest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SuspendPolicy {
    None = 0,
    EventThread = 1,
    All = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum StepSize {
    Min = 0,
    Line = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum StepDepth {
    Into = 0,
    Over = 1,
    Out = 2,
}

// Event request modifiers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventModifier {
    Count(i32),
    ThreadOnly(ThreadId),
    ClassOnly(ReferenceTypeId),
    ClassMatch(String),
    ClassExclude(String),
    LocationOnly(Location),
    ExceptionOnly {
        /// 0 reports exceptions of any type
        ref_type: ReferenceTypeId,
        caught: bool,
        uncaught: bool,
    },
    FieldOnly {
        ref_type: ReferenceTypeId,
        field_id: FieldId,
    },
    Step {
        thread: ThreadId,
        size: StepSize,
        depth: StepDepth,
    },
    InstanceOnly(ObjectId),
}

/// Composite event (one or more events sharing a suspend policy)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSet {
    pub suspend_policy: SuspendPolicy,
    pub events: Vec<Event>,
}

/// Single event within an event set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub request_id: RequestId,
    pub details: EventDetails,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventDetails {
    VmDeath,
    ThreadStart {
        thread: ThreadId,
    },
    ThreadDeath {
        thread: ThreadId,
    },
    ClassPrepare {
        thread: ThreadId,
        ref_type: TaggedReferenceTypeId,
        signature: String,
        status: ClassStatus,
    },
    Breakpoint {
        thread: ThreadId,
        location: Location,
    },
    Step {
        thread: ThreadId,
        location: Location,
    },
    Exception {
        thread: ThreadId,
        location: Location,
        exception: TaggedObjectId,
        catch_location: Option<Location>,
    },
    MethodEntry {
        thread: ThreadId,
        location: Location,
    },
    MethodExit {
        thread: ThreadId,
        location: Location,
    },
}

impl EventDetails {
    pub fn thread(&self) -> Option<ThreadId> {
        match self {
            EventDetails::VmDeath => None,
            EventDetails::ThreadStart { thread }
            | EventDetails::ThreadDeath { thread }
            | EventDetails::ClassPrepare { thread, .. }
            | EventDetails::Breakpoint { thread, .. }
            | EventDetails::Step { thread, .. }
            | EventDetails::Exception { thread, .. }
            | EventDetails::MethodEntry { thread, .. }
            | EventDetails::MethodExit { thread, .. } => Some(*thread),
        }
    }

    pub fn location(&self) -> Option<Location> {
        match self {
            EventDetails::Breakpoint { location, .. }
            | EventDetails::Step { location, .. }
            | EventDetails::Exception { location, .. }
            | EventDetails::MethodEntry { location, .. }
            | EventDetails::MethodExit { location, .. } => Some(*location),
            _ => None,
        }
    }
}

/// `ClassMatch` / `ClassExclude` patterns: an exact dotted class name, or one
/// with a leading or trailing `*`
pub fn class_pattern_matches(pattern: &str, class_name: &str) -> bool {
    if pattern == "*" {
        true
    } else if let Some(suffix) = pattern.strip_prefix('*') {
        class_name.ends_with(suffix)
    } else if let Some(prefix) = pattern.strip_suffix('*') {
        class_name.starts_with(prefix)
    } else {
        pattern == class_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_codes() {
        assert_eq!(EventKind::try_from(2), Ok(EventKind::Breakpoint));
        assert_eq!(EventKind::try_from(99), Ok(EventKind::VmDeath));
        assert_eq!(EventKind::try_from(77), Err(ProtocolError::InvalidEventType));
        assert_eq!(EventKind::Breakpoint as u8, 2);
    }

    #[test]
    fn test_supported_kinds() {
        assert!(EventKind::SingleStep.is_supported());
        assert!(EventKind::ThreadDeath.is_supported());
        assert!(!EventKind::FieldAccess.is_supported());
        assert!(!EventKind::MonitorWait.is_supported());
    }

    #[test]
    fn test_suspend_policy_order() {
        assert!(SuspendPolicy::All > SuspendPolicy::EventThread);
        assert!(SuspendPolicy::EventThread > SuspendPolicy::None);
    }

    #[test]
    fn test_class_patterns() {
        assert!(class_pattern_matches("com.example.Foo", "com.example.Foo"));
        assert!(class_pattern_matches("com.example.*", "com.example.Bar"));
        assert!(class_pattern_matches("*.Foo", "org.other.Foo"));
        assert!(class_pattern_matches("*", "anything"));
        assert!(!class_pattern_matches("java.*", "com.example.Foo"));
        assert!(!class_pattern_matches("com.example.Foo", "com.example.FooBar"));
    }
}
