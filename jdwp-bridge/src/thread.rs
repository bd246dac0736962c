// ThreadReference command implementations
//
// Commands for working with threads (frames, status, suspend/resume)

use crate::environment::Environment;
use crate::native::{thread_state, JLocation, JMethodId, JavaVm, JvmtiEnv};
use crate::protocol::{ProtocolError, ProtocolResult};
use crate::reference::{ReferenceTracker, ScopedLocalRef};
use crate::service::DebugProtocolService;
use crate::types::{
    FrameId, FrameInfo, Location, ObjectId, SuspendStatus, ThreadGroupId, ThreadId, ThreadStatus,
};

/// Protocol location of a bytecode index in `method`
pub(crate) fn frame_location<V: JavaVm>(
    env: &Environment<'_, V>,
    tracker: &ReferenceTracker,
    method: JMethodId,
    index: JLocation,
) -> ProtocolResult<Location> {
    let class = ScopedLocalRef::new(&env.jni, env.jvmti.get_method_declaring_class(method)?)
        .require(ProtocolError::InvalidMethodId)?;
    let type_id = tracker.track_class(env, class.get())?;
    Ok(Location {
        type_tag: type_id.type_tag,
        class_id: type_id.type_id,
        method_id: method.as_raw() as u64,
        index: index.max(0) as u64,
    })
}

impl<V: JavaVm> DebugProtocolService<V> {
    /// Name of a thread (ThreadReference.Name command)
    pub fn get_thread_name(&self, thread_id: ThreadId) -> ProtocolResult<String> {
        self.command("ThreadReference.Name", |env| {
            let thread = self.tracker.acquire_thread(env, thread_id).require_alive()?;
            let info = env.jvmti.get_thread_info(thread.get())?;
            // the info carries two locals of its own
            let _group = ScopedLocalRef::new(&env.jni, info.thread_group);
            let _loader = ScopedLocalRef::new(&env.jni, info.context_class_loader);
            Ok(info.name)
        })
    }

    /// Suspend one thread (ThreadReference.Suspend command)
    pub fn suspend_thread(&self, thread_id: ThreadId) -> ProtocolResult<()> {
        self.command("ThreadReference.Suspend", |env| {
            let thread = self.tracker.acquire_thread(env, thread_id).require_alive()?;
            Ok(env.jvmti.suspend_thread(thread.get())?)
        })
    }

    /// Resume one thread (ThreadReference.Resume command)
    pub fn resume_thread(&self, thread_id: ThreadId) -> ProtocolResult<()> {
        self.command("ThreadReference.Resume", |env| {
            let thread = self.tracker.acquire_thread(env, thread_id).require_alive()?;
            Ok(env.jvmti.resume_thread(thread.get())?)
        })
    }

    /// Coarse thread status plus suspension (ThreadReference.Status command)
    pub fn get_thread_status(
        &self,
        thread_id: ThreadId,
    ) -> ProtocolResult<(ThreadStatus, SuspendStatus)> {
        self.command("ThreadReference.Status", |env| {
            let thread = self.tracker.acquire_thread(env, thread_id).require_alive()?;
            let state = env.jvmti.get_thread_state(thread.get())?;
            Ok((
                ThreadStatus::from_native_state(state),
                SuspendStatus::from_native_state(state),
            ))
        })
    }

    /// Thread group of a thread (ThreadReference.ThreadGroup command)
    pub fn get_thread_group(&self, thread_id: ThreadId) -> ProtocolResult<ThreadGroupId> {
        self.command("ThreadReference.ThreadGroup", |env| {
            let thread = self.tracker.acquire_thread(env, thread_id).require_alive()?;
            let info = env.jvmti.get_thread_info(thread.get())?;
            let group = ScopedLocalRef::new(&env.jni, info.thread_group);
            let _loader = ScopedLocalRef::new(&env.jni, info.context_class_loader);
            self.tracker.track_new(env, group.get())
        })
    }

    /// Get stack frames for a thread (ThreadReference.Frames command)
    ///
    /// `start_frame` 0 is the topmost frame; `length` -1 returns all
    /// remaining frames. Frame ids are stack depths.
    pub fn get_thread_frames(
        &self,
        thread_id: ThreadId,
        start_frame: i32,
        length: i32,
    ) -> ProtocolResult<Vec<FrameInfo>> {
        self.command("ThreadReference.Frames", |env| {
            let thread = self.tracker.acquire_thread(env, thread_id).require_alive()?;

            let count = env.jvmti.get_frame_count(thread.get())?;
            if start_frame < 0 || start_frame > count {
                return Err(ProtocolError::InvalidIndex);
            }
            let length = match length {
                -1 => count - start_frame,
                n if n < 0 || n > count - start_frame => return Err(ProtocolError::InvalidLength),
                n => n,
            };

            let frames = env.jvmti.get_stack_trace(thread.get(), start_frame, length)?;
            frames
                .iter()
                .enumerate()
                .map(|(offset, frame)| {
                    Ok(FrameInfo {
                        frame_id: (start_frame as usize + offset) as FrameId,
                        location: frame_location(env, &self.tracker, frame.method, frame.location)?,
                    })
                })
                .collect()
        })
    }

    /// Number of frames on a thread's stack (ThreadReference.FrameCount command)
    pub fn get_thread_frame_count(&self, thread_id: ThreadId) -> ProtocolResult<i32> {
        self.command("ThreadReference.FrameCount", |env| {
            let thread = self.tracker.acquire_thread(env, thread_id).require_alive()?;
            Ok(env.jvmti.get_frame_count(thread.get())?)
        })
    }

    /// 0 or 1; native suspensions do not nest
    pub fn get_thread_suspend_count(&self, thread_id: ThreadId) -> ProtocolResult<i32> {
        self.command("ThreadReference.SuspendCount", |env| {
            let thread = self.tracker.acquire_thread(env, thread_id).require_alive()?;
            let state = env.jvmti.get_thread_state(thread.get())?;
            Ok(i32::from(state & thread_state::SUSPENDED != 0))
        })
    }

    pub fn stop_thread(&self, _thread_id: ThreadId, _throwable: ObjectId) -> ProtocolResult<()> {
        self.command("ThreadReference.Stop", |_| Err(ProtocolError::NotImplemented))
    }

    pub fn interrupt_thread(&self, _thread_id: ThreadId) -> ProtocolResult<()> {
        self.command("ThreadReference.Interrupt", |_| Err(ProtocolError::NotImplemented))
    }

    pub fn get_thread_group_name(&self, _group: ThreadGroupId) -> ProtocolResult<String> {
        self.command("ThreadGroupReference.Name", |_| Err(ProtocolError::NotImplemented))
    }

    pub fn get_thread_group_parent(&self, _group: ThreadGroupId) -> ProtocolResult<ThreadGroupId> {
        self.command("ThreadGroupReference.Parent", |_| Err(ProtocolError::NotImplemented))
    }

    /// Child threads and child groups (ThreadGroupReference.Children command)
    pub fn get_thread_group_children(
        &self,
        _group: ThreadGroupId,
    ) -> ProtocolResult<(Vec<ThreadId>, Vec<ThreadGroupId>)> {
        self.command("ThreadGroupReference.Children", |_| Err(ProtocolError::NotImplemented))
    }
}
