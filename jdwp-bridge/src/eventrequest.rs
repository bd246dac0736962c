// EventRequest command implementations
//
// Set up event requests (breakpoints, steps, exceptions, etc.)

use crate::events::{EventKind, EventModifier, SuspendPolicy};
use crate::native::JavaVm;
use crate::protocol::ProtocolResult;
use crate::service::DebugProtocolService;
use crate::types::{Location, RequestId};
use tracing::info;

impl<V: JavaVm> DebugProtocolService<V> {
    /// Register an event request (EventRequest.Set command)
    /// Returns the request ID carried by every event the request fires
    pub fn set_event(
        &self,
        kind: u8,
        suspend_policy: SuspendPolicy,
        modifiers: &[EventModifier],
    ) -> ProtocolResult<RequestId> {
        self.command("EventRequest.Set", |env| {
            let kind = EventKind::try_from(kind)?;
            self.events
                .set_event(env, &self.tracker, kind, suspend_policy, modifiers)
        })
    }

    /// Remove an event request (EventRequest.Clear command)
    pub fn clear_event(&self, kind: u8, request_id: RequestId) -> ProtocolResult<()> {
        self.command("EventRequest.Clear", |env| {
            let kind = EventKind::try_from(kind)?;
            self.events.clear_event(env, kind, request_id)
        })
    }

    /// Remove every breakpoint request (EventRequest.ClearAllBreakpoints command)
    pub fn clear_all_breakpoints(&self) -> ProtocolResult<()> {
        self.command("EventRequest.ClearAllBreakpoints", |env| {
            self.events.clear_all_breakpoints(env);
            Ok(())
        })
    }

    /// Set a breakpoint at a specific location
    pub fn set_breakpoint(
        &self,
        location: Location,
        suspend_policy: SuspendPolicy,
    ) -> ProtocolResult<RequestId> {
        let request_id = self.set_event(
            EventKind::Breakpoint as u8,
            suspend_policy,
            &[EventModifier::LocationOnly(location)],
        )?;
        info!(
            "Breakpoint set at method={:x} index={}, request_id={}",
            location.method_id, location.index, request_id
        );
        Ok(request_id)
    }

    /// Clear a breakpoint by request ID
    pub fn clear_breakpoint(&self, request_id: RequestId) -> ProtocolResult<()> {
        self.clear_event(EventKind::Breakpoint as u8, request_id)
    }
}
