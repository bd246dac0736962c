// StackFrame command implementations
//
// Commands for inspecting stack frame variables. A frame id is the frame's
// depth on its thread's stack.

use crate::native::{modifiers, JValue, JavaVm, JvmtiEnv, LocalType};
use crate::protocol::{ProtocolError, ProtocolResult};
use crate::reference::ScopedLocalRef;
use crate::service::DebugProtocolService;
use crate::types::{FrameId, TaggedObjectId, ThreadId, TypeTag, Value};
use crate::values::read_local;
use tracing::debug;

fn frame_depth(frame_id: FrameId) -> ProtocolResult<i32> {
    i32::try_from(frame_id).map_err(|_| ProtocolError::InvalidFrameId)
}

impl<V: JavaVm> DebugProtocolService<V> {
    /// Get values for variable slots in a frame (StackFrame.GetValues command)
    ///
    /// Each slot's type comes from the method's variable table entry that is
    /// live at the frame's current location.
    pub fn get_values(
        &self,
        thread_id: ThreadId,
        frame_id: FrameId,
        slots: &[i32],
    ) -> ProtocolResult<Vec<Value>> {
        self.command("StackFrame.GetValues", |env| {
            let thread = self.tracker.acquire_thread(env, thread_id).require_alive()?;
            let depth = frame_depth(frame_id)?;

            let (method, location) = env.jvmti.get_frame_location(thread.get(), depth)?;
            let variables = env.jvmti.get_local_variable_table(method)?;

            let mut values = Vec::with_capacity(slots.len());
            for &slot in slots {
                let variable = variables
                    .iter()
                    .find(|v| {
                        v.slot == slot
                            && v.start_location <= location
                            && location < v.start_location + i64::from(v.length)
                    })
                    .ok_or(ProtocolError::InvalidSlot)?;

                let value = read_local(
                    env,
                    &self.tracker,
                    thread.get(),
                    depth,
                    slot,
                    &variable.signature,
                )?;
                debug!("{} (slot {}) = {}", variable.name, slot, value.format());
                values.push(value);
            }
            Ok(values)
        })
    }

    /// The frame's receiver (StackFrame.ThisObject command). `None` for a
    /// static method.
    pub fn get_this_object(
        &self,
        thread_id: ThreadId,
        frame_id: FrameId,
    ) -> ProtocolResult<Option<TaggedObjectId>> {
        self.command("StackFrame.ThisObject", |env| {
            let thread = self.tracker.acquire_thread(env, thread_id).require_alive()?;
            let depth = frame_depth(frame_id)?;

            let (method, _) = env.jvmti.get_frame_location(thread.get(), depth)?;
            if env.jvmti.get_method_modifiers(method)? & modifiers::STATIC != 0 {
                return Ok(None);
            }

            let receiver = match env.jvmti.get_local(thread.get(), depth, 0, LocalType::Object)? {
                JValue::Object(object) => ScopedLocalRef::new(&env.jni, object),
                _ => return Err(ProtocolError::TypeMismatch),
            };
            let tagged = self
                .tracker
                .track_object(env, receiver.get(), TypeTag::Object)?;
            Ok(Some(tagged))
        })
    }

    pub fn set_values(
        &self,
        _thread_id: ThreadId,
        _frame_id: FrameId,
        _values: &[(i32, Value)],
    ) -> ProtocolResult<()> {
        self.command("StackFrame.SetValues", |_| Err(ProtocolError::NotImplemented))
    }

    pub fn pop_frames(&self, _thread_id: ThreadId, _frame_id: FrameId) -> ProtocolResult<()> {
        self.command("StackFrame.PopFrames", |_| Err(ProtocolError::NotImplemented))
    }
}
