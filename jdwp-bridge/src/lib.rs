// JDWP bridge over JVMTI
//
// Exposes a debug protocol command surface on top of an in-process native
// instrumentation layer:
// - Reference tracking (native handles to protocol identifiers)
// - Class, method, object, thread and stack frame inspection
// - Event requests (breakpoints, stepping, exceptions, lifecycle)
// - Event delivery to a single attached session

pub mod config;
pub mod environment;
pub mod eventloop;
pub mod events;
pub mod mock;
pub mod native;
pub mod protocol;
pub mod reference;
pub mod service;
pub mod signature;
pub mod types;
pub mod values;

pub mod eventrequest;
pub mod method;
pub mod object;
pub mod reftype;
pub mod stackframe;
pub mod thread;
pub mod vm;

pub use config::BridgeConfig;
pub use eventloop::{EventProcessor, SuspendTarget};
pub use events::{
    Event, EventDetails, EventKind, EventModifier, EventSet, StepDepth, StepSize, SuspendPolicy,
};
pub use mock::MockJavaVm;
pub use protocol::{ProtocolError, ProtocolResult};
pub use service::DebugProtocolService;
