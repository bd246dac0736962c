// Event processing and delivery
//
// Native callbacks are matched against the registered requests on the
// callback thread. Fired event sets go over an inbound channel to the
// delivery task, which applies the suspend policy before handing the set to
// the session.

use crate::environment::{get_environment, Environment};
use crate::events::{
    class_pattern_matches, Event, EventDetails, EventKind, EventModifier, EventSet, StepDepth,
    StepSize, SuspendPolicy,
};
use crate::method::native_method;
use crate::native::{
    modifiers, JLocation, JMethodId, JObject, JThread, JValue, JavaVm, JniEnv, JvmtiEnv,
    LocalType, NativeEvent, NativeEventType,
};
use crate::protocol::{ProtocolError, ProtocolResult};
use crate::reference::{ReferenceTracker, ScopedLocalRef};
use crate::signature::class_name;
use crate::types::{
    ClassStatus, Location, ObjectId, ReferenceTypeId, RequestId, ThreadId, TypeTag,
};
use crate::vm::suspend_all;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::{mpsc as std_mpsc, Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Threads to suspend before an event set is delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspendTarget {
    Thread(ThreadId),
    All,
}

/// A fired event set on its way to the delivery task
pub(crate) struct Delivery {
    pub events: EventSet,
    pub suspend: Option<SuspendTarget>,
    /// Signalled once the set has been handed to the session
    pub ack: Option<std_mpsc::SyncSender<()>>,
}

pub(crate) struct Fired {
    pub events: EventSet,
    pub suspend: Option<SuspendTarget>,
}

/// Start the delivery task on `runtime`; returns its inbound channel
pub(crate) fn spawn_delivery<V: JavaVm>(
    runtime: &Handle,
    vm: Arc<V>,
    tracker: Arc<ReferenceTracker>,
    session: mpsc::Sender<EventSet>,
) -> mpsc::UnboundedSender<Delivery> {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    runtime.spawn(delivery_task(vm, tracker, inbound_rx, session));
    inbound_tx
}

async fn delivery_task<V: JavaVm>(
    vm: Arc<V>,
    tracker: Arc<ReferenceTracker>,
    mut inbound: mpsc::UnboundedReceiver<Delivery>,
    session: mpsc::Sender<EventSet>,
) {
    info!("Event delivery started");

    while let Some(delivery) = inbound.recv().await {
        if let Some(target) = delivery.suspend {
            if let Err(e) = apply_suspension(&*vm, &tracker, target) {
                warn!("Failed to apply suspend policy {:?}: {}", target, e);
            }
        }

        debug!(
            "Delivering event set: {} events, suspend_policy={:?}",
            delivery.events.events.len(),
            delivery.events.suspend_policy
        );
        if session.send(delivery.events).await.is_err() {
            warn!("Session channel closed, event set dropped");
        }

        if let Some(ack) = delivery.ack {
            ack.send(()).ok();
        }
    }

    info!("Event delivery shutting down");
}

// Runs on the delivery task; the environment never lives across an await
fn apply_suspension<V: JavaVm>(
    vm: &V,
    tracker: &ReferenceTracker,
    target: SuspendTarget,
) -> ProtocolResult<()> {
    let env = get_environment(vm)?;
    match target {
        SuspendTarget::Thread(id) => {
            let thread = tracker.acquire_thread(&env, id).require_alive()?;
            env.jvmti.suspend_thread(thread.get())?;
            Ok(())
        }
        SuspendTarget::All => suspend_all(&env),
    }
}

type NotificationKey = (NativeEventType, Option<ThreadId>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StepPoint {
    frame_depth: i32,
    method: JMethodId,
    line: Option<i32>,
}

#[derive(Debug, Clone)]
struct StepState {
    thread: ThreadId,
    size: StepSize,
    depth: StepDepth,
    start: StepPoint,
}

impl StepState {
    /// The new position if this native step completes a protocol step. The
    /// caller has already matched the stepping thread.
    fn check<J: JniEnv>(&self, ctx: &EventContext<'_, J>) -> Option<StepPoint> {
        let point = StepPoint {
            frame_depth: ctx.frame_depth?,
            method: ctx.method?,
            line: ctx.line,
        };

        let moved = match self.size {
            StepSize::Min => true,
            // without line information line stepping degrades to min stepping
            StepSize::Line => {
                point.method != self.start.method
                    || point.line.is_none()
                    || point.line != self.start.line
            }
        };

        let start = self.start.frame_depth;
        let fire = match self.depth {
            StepDepth::Out => point.frame_depth < start,
            StepDepth::Over => point.frame_depth < start || (point.frame_depth == start && moved),
            StepDepth::Into => point.frame_depth != start || moved,
        };
        fire.then_some(point)
    }
}

#[derive(Debug, Clone)]
enum Filter {
    Count { remaining: i32 },
    ThreadOnly(ThreadId),
    ClassOnly(ReferenceTypeId),
    ClassMatch(String),
    ClassExclude(String),
    LocationOnly { method: JMethodId, index: JLocation },
    ExceptionOnly { ref_type: ReferenceTypeId, caught: bool, uncaught: bool },
    Step(StepState),
    InstanceOnly(ObjectId),
}

#[derive(Debug, Clone, Copy)]
struct Registration {
    breakpoint: Option<(JMethodId, JLocation)>,
    notification: NotificationKey,
}

#[derive(Debug)]
struct EventRequest {
    id: RequestId,
    kind: EventKind,
    suspend_policy: SuspendPolicy,
    filters: Vec<Filter>,
    registration: Registration,
}

impl EventRequest {
    /// Apply the filters in order. Counts only see events every other filter
    /// accepted. `step_thread` is the reference held by the request's
    /// notification. `Some(expired)` if the request fires.
    fn evaluate<V: JavaVm>(
        &mut self,
        env: &Environment<'_, V>,
        tracker: &ReferenceTracker,
        ctx: &EventContext<'_, V::Jni>,
        step_thread: Option<JObject>,
    ) -> Option<bool> {
        let mut stepped = None;

        for filter in self.filters.iter() {
            let pass = match filter {
                Filter::Count { .. } => true,
                Filter::ThreadOnly(id) => ctx.thread_id == *id,
                Filter::ClassOnly(id) => ctx.class_is_subtype_of(env, tracker, *id),
                Filter::ClassMatch(pattern) => ctx
                    .class_name
                    .as_deref()
                    .map_or(false, |name| class_pattern_matches(pattern, name)),
                Filter::ClassExclude(pattern) => !ctx
                    .class_name
                    .as_deref()
                    .map_or(false, |name| class_pattern_matches(pattern, name)),
                Filter::LocationOnly { method, index } => {
                    ctx.method == Some(*method) && ctx.location == Some(*index)
                }
                Filter::ExceptionOnly {
                    ref_type,
                    caught,
                    uncaught,
                } => ctx.exception_matches(env, tracker, *ref_type, *caught, *uncaught),
                Filter::Step(step) => {
                    let on_thread = step_thread
                        .map_or(false, |thread| env.jni.is_same_object(ctx.thread, thread));
                    match step.check(ctx).filter(|_| on_thread) {
                        Some(point) => {
                            stepped = Some(point);
                            true
                        }
                        None => false,
                    }
                }
                Filter::InstanceOnly(id) => ctx.receiver_is(env, tracker, *id),
            };
            if !pass {
                return None;
            }
        }

        let mut expired = false;
        for filter in self.filters.iter_mut() {
            match filter {
                Filter::Count { remaining } => {
                    *remaining -= 1;
                    expired |= *remaining <= 0;
                }
                Filter::Step(step) => {
                    if let Some(point) = stepped {
                        step.start = point;
                    }
                }
                _ => {}
            }
        }
        Some(expired)
    }
}

/// What the filters need to know about one native callback
struct EventContext<'e, J: JniEnv> {
    thread_id: ThreadId,
    // callback-owned handle, null for VM death
    thread: JThread,
    method: Option<JMethodId>,
    location: Option<JLocation>,
    // declaring class of the location, or the prepared class
    class: Option<ScopedLocalRef<'e, J>>,
    class_name: Option<String>,
    exception_class: Option<ScopedLocalRef<'e, J>>,
    caught: bool,
    frame_depth: Option<i32>,
    line: Option<i32>,
    receiver: Option<ScopedLocalRef<'e, J>>,
    details: EventDetails,
}

impl<'e, J: JniEnv> EventContext<'e, J> {
    fn class_is_subtype_of<V: JavaVm<Jni = J>>(
        &self,
        env: &Environment<'_, V>,
        tracker: &ReferenceTracker,
        class_id: ReferenceTypeId,
    ) -> bool {
        let Some(class) = &self.class else {
            return false;
        };
        match tracker.acquire_class(env, class_id) {
            Ok(filter) => env.jni.is_assignable_from(class.get(), filter.get()),
            Err(_) => false,
        }
    }

    fn exception_matches<V: JavaVm<Jni = J>>(
        &self,
        env: &Environment<'_, V>,
        tracker: &ReferenceTracker,
        ref_type: ReferenceTypeId,
        caught: bool,
        uncaught: bool,
    ) -> bool {
        if !((caught && self.caught) || (uncaught && !self.caught)) {
            return false;
        }
        if ref_type == 0 {
            return true;
        }
        let Some(class) = &self.exception_class else {
            return false;
        };
        match tracker.acquire_class(env, ref_type) {
            Ok(filter) => env.jni.is_assignable_from(class.get(), filter.get()),
            Err(_) => false,
        }
    }

    fn receiver_is<V: JavaVm<Jni = J>>(
        &self,
        env: &Environment<'_, V>,
        tracker: &ReferenceTracker,
        object_id: ObjectId,
    ) -> bool {
        let Some(receiver) = &self.receiver else {
            return false;
        };
        match tracker.acquire_object(env, object_id) {
            Ok(object) => env.jni.is_same_object(receiver.get(), object.get()),
            Err(_) => false,
        }
    }
}

fn empty_context<'e, J: JniEnv>(thread_id: ThreadId, details: EventDetails) -> EventContext<'e, J> {
    EventContext {
        thread_id,
        thread: JObject::NULL,
        method: None,
        location: None,
        class: None,
        class_name: None,
        exception_class: None,
        caught: false,
        frame_depth: None,
        line: None,
        receiver: None,
        details,
    }
}

/// Declaring class of `method` plus the protocol location of `index` in it
fn locate<'e, V: JavaVm>(
    env: &'e Environment<'_, V>,
    tracker: &ReferenceTracker,
    method: JMethodId,
    index: JLocation,
) -> ProtocolResult<(ScopedLocalRef<'e, V::Jni>, Location, String)> {
    let class = ScopedLocalRef::new(&env.jni, env.jvmti.get_method_declaring_class(method)?)
        .require(ProtocolError::InvalidMethodId)?;
    let type_id = tracker.track_class(env, class.get())?;
    let (signature, _) = env.jvmti.get_class_signature(class.get())?;

    let location = Location {
        type_tag: type_id.type_tag,
        class_id: type_id.type_id,
        method_id: method.as_raw() as u64,
        index: index.max(0) as u64,
    };
    Ok((class, location, class_name(&signature)))
}

/// Source line of `location`, from the method's line table
pub(crate) fn line_at<V: JavaVm>(
    env: &Environment<'_, V>,
    method: JMethodId,
    location: JLocation,
) -> Option<i32> {
    let table = env.jvmti.get_line_number_table(method).ok()?;
    table
        .iter()
        .filter(|entry| entry.start_location <= location)
        .max_by_key(|entry| entry.start_location)
        .map(|entry| entry.line_number)
}

fn receiver<'e, V: JavaVm>(
    env: &'e Environment<'_, V>,
    thread: JThread,
    method: JMethodId,
) -> Option<ScopedLocalRef<'e, V::Jni>> {
    let method_modifiers = env.jvmti.get_method_modifiers(method).ok()?;
    if method_modifiers & modifiers::STATIC != 0 {
        return None;
    }
    match env.jvmti.get_local(thread, 0, 0, LocalType::Object).ok()? {
        JValue::Object(this) => Some(ScopedLocalRef::new(&env.jni, this)),
        _ => None,
    }
}

fn capture<'e, V: JavaVm>(
    env: &'e Environment<'_, V>,
    tracker: &ReferenceTracker,
    event: &NativeEvent,
    wants_receiver: bool,
) -> ProtocolResult<EventContext<'e, V::Jni>> {
    let ctx = match *event {
        NativeEvent::VmDeath => empty_context(0, EventDetails::VmDeath),
        NativeEvent::ThreadStart { thread: handle } => {
            let thread = tracker.track_new(env, handle)?;
            let mut ctx = empty_context(thread, EventDetails::ThreadStart { thread });
            ctx.thread = handle;
            ctx
        }
        NativeEvent::ThreadEnd { thread: handle } => {
            let thread = tracker.track_new(env, handle)?;
            let mut ctx = empty_context(thread, EventDetails::ThreadDeath { thread });
            ctx.thread = handle;
            ctx
        }
        NativeEvent::ClassPrepare {
            thread: handle,
            class,
        } => {
            let thread = tracker.track_new(env, handle)?;
            let class = ScopedLocalRef::new(&env.jni, env.jni.new_local_ref(class))
                .require(ProtocolError::InvalidClass)?;
            let ref_type = tracker.track_class(env, class.get())?;
            let (signature, _) = env.jvmti.get_class_signature(class.get())?;
            let status = ClassStatus::from_native(env.jvmti.get_class_status(class.get())?);

            let mut ctx = empty_context(
                thread,
                EventDetails::ClassPrepare {
                    thread,
                    ref_type,
                    signature: signature.clone(),
                    status,
                },
            );
            ctx.thread = handle;
            ctx.class_name = Some(class_name(&signature));
            ctx.class = Some(class);
            ctx
        }
        NativeEvent::Breakpoint {
            thread: handle,
            method,
            location: index,
        } => {
            let thread = tracker.track_new(env, handle)?;
            let (class, location, name) = locate(env, tracker, method, index)?;
            let mut ctx = empty_context(thread, EventDetails::Breakpoint { thread, location });
            ctx.thread = handle;
            ctx.method = Some(method);
            ctx.location = Some(index);
            ctx.class = Some(class);
            ctx.class_name = Some(name);
            if wants_receiver {
                ctx.receiver = receiver(env, handle, method);
            }
            ctx
        }
        NativeEvent::SingleStep {
            thread: handle,
            method,
            location: index,
        } => {
            let thread = tracker.track_new(env, handle)?;
            let (class, location, name) = locate(env, tracker, method, index)?;
            let mut ctx = empty_context(thread, EventDetails::Step { thread, location });
            ctx.thread = handle;
            ctx.method = Some(method);
            ctx.location = Some(index);
            ctx.class = Some(class);
            ctx.class_name = Some(name);
            ctx.frame_depth = env.jvmti.get_frame_count(handle).ok();
            ctx.line = line_at(env, method, index);
            if wants_receiver {
                ctx.receiver = receiver(env, handle, method);
            }
            ctx
        }
        NativeEvent::Exception {
            thread: handle,
            method,
            location: index,
            exception,
            catch_method,
            catch_location,
        } => {
            let thread = tracker.track_new(env, handle)?;
            let (class, location, name) = locate(env, tracker, method, index)?;
            let exception_class = ScopedLocalRef::new(&env.jni, env.jni.get_object_class(exception))
                .require(ProtocolError::InvalidObject)?;
            let exception = tracker.track_object(env, exception, TypeTag::Object)?;
            let catch_location = match catch_method {
                Some(catch_method) => Some(locate(env, tracker, catch_method, catch_location)?.1),
                None => None,
            };

            let mut ctx = empty_context(
                thread,
                EventDetails::Exception {
                    thread,
                    location,
                    exception,
                    catch_location,
                },
            );
            ctx.thread = handle;
            ctx.method = Some(method);
            ctx.location = Some(index);
            ctx.class = Some(class);
            ctx.class_name = Some(name);
            ctx.exception_class = Some(exception_class);
            ctx.caught = catch_method.is_some();
            if wants_receiver {
                ctx.receiver = receiver(env, handle, method);
            }
            ctx
        }
        NativeEvent::MethodEntry {
            thread: handle,
            method,
        } => {
            let thread = tracker.track_new(env, handle)?;
            let (start, _) = env.jvmti.get_method_location(method)?;
            let (class, location, name) = locate(env, tracker, method, start)?;
            let mut ctx = empty_context(thread, EventDetails::MethodEntry { thread, location });
            ctx.thread = handle;
            ctx.method = Some(method);
            ctx.location = Some(start);
            ctx.class = Some(class);
            ctx.class_name = Some(name);
            if wants_receiver {
                ctx.receiver = receiver(env, handle, method);
            }
            ctx
        }
        NativeEvent::MethodExit {
            thread: handle,
            method,
            location: index,
        } => {
            let thread = tracker.track_new(env, handle)?;
            let (class, location, name) = locate(env, tracker, method, index)?;
            let mut ctx = empty_context(thread, EventDetails::MethodExit { thread, location });
            ctx.thread = handle;
            ctx.method = Some(method);
            ctx.location = Some(index);
            ctx.class = Some(class);
            ctx.class_name = Some(name);
            if wants_receiver {
                ctx.receiver = receiver(env, handle, method);
            }
            ctx
        }
    };
    Ok(ctx)
}

fn event_kind(event: &NativeEvent) -> EventKind {
    match event {
        NativeEvent::VmDeath => EventKind::VmDeath,
        NativeEvent::ThreadStart { .. } => EventKind::ThreadStart,
        NativeEvent::ThreadEnd { .. } => EventKind::ThreadDeath,
        NativeEvent::ClassPrepare { .. } => EventKind::ClassPrepare,
        NativeEvent::Breakpoint { .. } => EventKind::Breakpoint,
        NativeEvent::SingleStep { .. } => EventKind::SingleStep,
        NativeEvent::Exception { .. } => EventKind::Exception,
        NativeEvent::MethodEntry { .. } => EventKind::MethodEntry,
        NativeEvent::MethodExit { .. } => EventKind::MethodExit,
    }
}

fn native_event_type(kind: EventKind) -> ProtocolResult<NativeEventType> {
    let native = match kind {
        EventKind::SingleStep => NativeEventType::SingleStep,
        EventKind::Breakpoint => NativeEventType::Breakpoint,
        EventKind::Exception => NativeEventType::Exception,
        EventKind::ThreadStart => NativeEventType::ThreadStart,
        EventKind::ThreadDeath => NativeEventType::ThreadEnd,
        EventKind::ClassPrepare => NativeEventType::ClassPrepare,
        EventKind::MethodEntry => NativeEventType::MethodEntry,
        EventKind::MethodExit => NativeEventType::MethodExit,
        EventKind::VmDeath => NativeEventType::VmDeath,
        _ => return Err(ProtocolError::NotImplemented),
    };
    Ok(native)
}

/// Whether a modifier may be attached to a request of `kind`
fn modifier_applies(kind: EventKind, modifier: &EventModifier) -> bool {
    use EventKind::*;
    match modifier {
        EventModifier::Count(_) => true,
        EventModifier::ThreadOnly(_) => kind != VmDeath,
        EventModifier::ClassOnly(_)
        | EventModifier::ClassMatch(_)
        | EventModifier::ClassExclude(_) => !matches!(kind, ThreadStart | ThreadDeath | VmDeath),
        EventModifier::LocationOnly(_) => matches!(kind, Breakpoint | SingleStep | Exception),
        EventModifier::ExceptionOnly { .. } => kind == Exception,
        EventModifier::FieldOnly { .. } => matches!(kind, FieldAccess | FieldModification),
        EventModifier::Step { .. } => kind == SingleStep,
        EventModifier::InstanceOnly(_) => {
            matches!(kind, Breakpoint | SingleStep | Exception | MethodEntry | MethodExit)
        }
    }
}

fn build_filter<V: JavaVm>(
    env: &Environment<'_, V>,
    tracker: &ReferenceTracker,
    kind: EventKind,
    modifier: &EventModifier,
) -> ProtocolResult<Filter> {
    if !modifier_applies(kind, modifier) {
        return Err(ProtocolError::IllegalArgument);
    }

    let filter = match modifier {
        EventModifier::Count(count) => {
            if *count <= 0 {
                return Err(ProtocolError::IllegalArgument);
            }
            Filter::Count { remaining: *count }
        }
        EventModifier::ThreadOnly(thread) => {
            tracker.acquire_thread(env, *thread).require_alive()?;
            Filter::ThreadOnly(*thread)
        }
        EventModifier::ClassOnly(class) => {
            tracker.acquire_class(env, *class)?;
            Filter::ClassOnly(*class)
        }
        EventModifier::ClassMatch(pattern) => Filter::ClassMatch(pattern.clone()),
        EventModifier::ClassExclude(pattern) => Filter::ClassExclude(pattern.clone()),
        EventModifier::LocationOnly(location) => {
            let method = native_method(location.method_id)?;
            tracker.acquire_class(env, location.class_id)?;
            Filter::LocationOnly {
                method,
                index: location.index as JLocation,
            }
        }
        EventModifier::ExceptionOnly {
            ref_type,
            caught,
            uncaught,
        } => {
            if *ref_type != 0 {
                tracker.acquire_class(env, *ref_type)?;
            }
            Filter::ExceptionOnly {
                ref_type: *ref_type,
                caught: *caught,
                uncaught: *uncaught,
            }
        }
        // field watch kinds are not registered
        EventModifier::FieldOnly { .. } => return Err(ProtocolError::IllegalArgument),
        EventModifier::Step {
            thread,
            size,
            depth,
        } => {
            let handle = tracker.acquire_thread(env, *thread).require_alive()?;
            let frame_depth = env.jvmti.get_frame_count(handle.get())?;
            let (method, location) = env.jvmti.get_frame_location(handle.get(), 0)?;
            Filter::Step(StepState {
                thread: *thread,
                size: *size,
                depth: *depth,
                start: StepPoint {
                    frame_depth,
                    method,
                    line: line_at(env, method, location),
                },
            })
        }
        EventModifier::InstanceOnly(object) => {
            tracker.acquire_object(env, *object)?;
            Filter::InstanceOnly(*object)
        }
    };
    Ok(filter)
}

fn registration(kind: EventKind, filters: &[Filter]) -> ProtocolResult<Registration> {
    let native = native_event_type(kind)?;

    let locations: Vec<(JMethodId, JLocation)> = filters
        .iter()
        .filter_map(|f| match f {
            Filter::LocationOnly { method, index } => Some((*method, *index)),
            _ => None,
        })
        .collect();
    let steps: Vec<ThreadId> = filters
        .iter()
        .filter_map(|f| match f {
            Filter::Step(step) => Some(step.thread),
            _ => None,
        })
        .collect();

    let (breakpoint, thread) = match kind {
        EventKind::Breakpoint => match locations.as_slice() {
            [location] => (Some(*location), None),
            _ => return Err(ProtocolError::IllegalArgument),
        },
        EventKind::SingleStep => match steps.as_slice() {
            [thread] => (None, Some(*thread)),
            _ => return Err(ProtocolError::IllegalArgument),
        },
        _ => (None, None),
    };

    Ok(Registration {
        breakpoint,
        notification: (native, thread),
    })
}

/// An enabled native notification and the requests sharing it
#[derive(Debug)]
struct Notification {
    count: u32,
    // global reference, held until the notification is disabled
    thread: Option<JObject>,
}

#[derive(Debug)]
struct ProcessorState {
    next_id: RequestId,
    requests: BTreeMap<RequestId, EventRequest>,
    // native registrations shared between requests
    breakpoints: HashMap<(JMethodId, JLocation), u32>,
    notifications: HashMap<NotificationKey, Notification>,
}

impl ProcessorState {
    fn enable<V: JavaVm>(
        &mut self,
        env: &Environment<'_, V>,
        tracker: &ReferenceTracker,
        key: NotificationKey,
    ) -> ProtocolResult<()> {
        if let Some(notification) = self.notifications.get_mut(&key) {
            notification.count += 1;
            return Ok(());
        }

        let thread = match key.1 {
            Some(id) => {
                let local = tracker.acquire_thread(env, id).require_alive()?;
                let global = env.jni.new_global_ref(local.get());
                if global.is_null() {
                    return Err(ProtocolError::OutOfMemory);
                }
                Some(global)
            }
            None => None,
        };
        if let Err(e) = env.jvmti.set_event_notification_mode(true, key.0, thread) {
            if let Some(global) = thread {
                env.jni.delete_global_ref(global);
            }
            return Err(e.into());
        }
        debug!("Enabled {:?} notification, thread={:?}", key.0, key.1);
        self.notifications
            .insert(key, Notification { count: 1, thread });
        Ok(())
    }

    fn disable<V: JavaVm>(&mut self, env: &Environment<'_, V>, key: NotificationKey) {
        let notification = match self.notifications.entry(key) {
            Entry::Occupied(mut entry) if entry.get().count > 1 => {
                entry.get_mut().count -= 1;
                return;
            }
            Entry::Occupied(entry) => entry.remove(),
            Entry::Vacant(_) => return,
        };

        match env
            .jvmti
            .set_event_notification_mode(false, key.0, notification.thread)
        {
            Ok(()) => debug!("Disabled {:?} notification, thread={:?}", key.0, key.1),
            Err(e) => debug!("Failed to disable {:?} notification: {}", key.0, e),
        }
        if let Some(global) = notification.thread {
            env.jni.delete_global_ref(global);
        }
    }

    fn release_breakpoint<V: JavaVm>(
        &mut self,
        env: &Environment<'_, V>,
        key: (JMethodId, JLocation),
    ) {
        let remaining = match self.breakpoints.get_mut(&key) {
            Some(count) => {
                *count -= 1;
                *count
            }
            None => return,
        };
        if remaining == 0 {
            self.breakpoints.remove(&key);
            if let Err(e) = env.jvmti.clear_breakpoint(key.0, key.1) {
                warn!("Failed to clear breakpoint at {:?}: {}", key, e);
            }
        }
    }

    fn register<V: JavaVm>(
        &mut self,
        env: &Environment<'_, V>,
        tracker: &ReferenceTracker,
        registration: &Registration,
    ) -> ProtocolResult<()> {
        if let Some(key) = registration.breakpoint {
            if !self.breakpoints.contains_key(&key) {
                env.jvmti.set_breakpoint(key.0, key.1)?;
            }
            *self.breakpoints.entry(key).or_insert(0) += 1;
        }

        if let Err(e) = self.enable(env, tracker, registration.notification) {
            if let Some(key) = registration.breakpoint {
                self.release_breakpoint(env, key);
            }
            return Err(e);
        }
        Ok(())
    }

    fn unregister<V: JavaVm>(&mut self, env: &Environment<'_, V>, registration: &Registration) {
        if let Some(key) = registration.breakpoint {
            self.release_breakpoint(env, key);
        }
        self.disable(env, registration.notification);
    }
}

/// The request table plus native event registration
#[derive(Debug)]
pub struct EventProcessor {
    state: Mutex<ProcessorState>,
}

impl Default for EventProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl EventProcessor {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ProcessorState {
                next_id: 1,
                requests: BTreeMap::new(),
                breakpoints: HashMap::new(),
                notifications: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ProcessorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of registered requests
    pub fn len(&self) -> usize {
        self.lock().requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, request_id: RequestId) -> bool {
        self.lock().requests.contains_key(&request_id)
    }

    /// VM death is reported to the session without a request
    pub(crate) fn enable_vm_death<V: JavaVm>(
        &self,
        env: &Environment<'_, V>,
        tracker: &ReferenceTracker,
    ) -> ProtocolResult<()> {
        self.lock()
            .enable(env, tracker, (NativeEventType::VmDeath, None))
    }

    pub(crate) fn set_event<V: JavaVm>(
        &self,
        env: &Environment<'_, V>,
        tracker: &ReferenceTracker,
        kind: EventKind,
        suspend_policy: SuspendPolicy,
        modifiers: &[EventModifier],
    ) -> ProtocolResult<RequestId> {
        if !kind.is_supported() {
            return Err(ProtocolError::NotImplemented);
        }

        let filters = modifiers
            .iter()
            .map(|m| build_filter(env, tracker, kind, m))
            .collect::<ProtocolResult<Vec<_>>>()?;
        let registration = registration(kind, &filters)?;

        let mut state = self.lock();
        state.register(env, tracker, &registration)?;

        let id = state.next_id;
        state.next_id += 1;
        state.requests.insert(
            id,
            EventRequest {
                id,
                kind,
                suspend_policy,
                filters,
                registration,
            },
        );

        info!(
            "Registered {:?} request id={} suspend_policy={:?}",
            kind, id, suspend_policy
        );
        Ok(id)
    }

    pub(crate) fn clear_event<V: JavaVm>(
        &self,
        env: &Environment<'_, V>,
        kind: EventKind,
        request_id: RequestId,
    ) -> ProtocolResult<()> {
        let mut state = self.lock();
        match state.requests.get(&request_id) {
            Some(request) if request.kind == kind => {}
            _ => return Err(ProtocolError::NotFound),
        }
        if let Some(request) = state.requests.remove(&request_id) {
            state.unregister(env, &request.registration);
        }
        info!("Cleared {:?} request id={}", kind, request_id);
        Ok(())
    }

    pub(crate) fn clear_all_breakpoints<V: JavaVm>(&self, env: &Environment<'_, V>) {
        let mut state = self.lock();
        let ids: Vec<RequestId> = state
            .requests
            .values()
            .filter(|r| r.kind == EventKind::Breakpoint)
            .map(|r| r.id)
            .collect();

        for id in &ids {
            if let Some(request) = state.requests.remove(id) {
                state.unregister(env, &request.registration);
            }
        }
        info!("Cleared {} breakpoint requests", ids.len());
    }

    /// Match a native callback against the registered requests
    pub(crate) fn process<V: JavaVm>(
        &self,
        env: &Environment<'_, V>,
        tracker: &ReferenceTracker,
        event: &NativeEvent,
    ) -> ProtocolResult<Option<Fired>> {
        let kind = event_kind(event);

        let (candidates, wants_receiver) = {
            let state = self.lock();
            let mut candidates = state.requests.values().filter(|r| r.kind == kind).peekable();
            let any = candidates.peek().is_some();
            let wants_receiver = candidates
                .any(|r| r.filters.iter().any(|f| matches!(f, Filter::InstanceOnly(_))));
            (any, wants_receiver)
        };
        if !candidates && kind != EventKind::VmDeath {
            return Ok(None);
        }

        // native lookups happen outside the request table lock
        let ctx = capture(env, tracker, event, wants_receiver)?;

        let mut state = self.lock();
        let mut events = Vec::new();
        let mut policy = SuspendPolicy::None;
        let mut expired = Vec::new();

        if kind == EventKind::VmDeath {
            events.push(Event {
                kind,
                request_id: 0,
                details: EventDetails::VmDeath,
            });
        }

        let ProcessorState {
            requests,
            notifications,
            ..
        } = &mut *state;
        for request in requests.values_mut().filter(|r| r.kind == kind) {
            let step_thread = notifications
                .get(&request.registration.notification)
                .and_then(|n| n.thread);
            let Some(expires) = request.evaluate(env, tracker, &ctx, step_thread) else {
                continue;
            };
            events.push(Event {
                kind,
                request_id: request.id,
                details: ctx.details.clone(),
            });
            policy = policy.max(request.suspend_policy);
            if expires {
                expired.push(request.id);
            }
        }

        for id in expired {
            if let Some(request) = state.requests.remove(&id) {
                state.unregister(env, &request.registration);
                debug!("Request id={} expired", id);
            }
        }
        drop(state);

        if events.is_empty() {
            return Ok(None);
        }

        let suspend = match policy {
            SuspendPolicy::None => None,
            SuspendPolicy::EventThread if ctx.thread_id == 0 => None,
            SuspendPolicy::EventThread => Some(SuspendTarget::Thread(ctx.thread_id)),
            SuspendPolicy::All => Some(SuspendTarget::All),
        };

        Ok(Some(Fired {
            events: EventSet {
                suspend_policy: policy,
                events,
            },
            suspend,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RefTypeTag;

    fn step(depth: StepDepth, size: StepSize, start_depth: i32, line: i32) -> StepState {
        StepState {
            thread: 7,
            size,
            depth,
            start: StepPoint {
                frame_depth: start_depth,
                method: JMethodId::from_raw(0x10),
                line: Some(line),
            },
        }
    }

    fn at(frame_depth: i32, method: usize, line: i32) -> EventContext<'static, crate::mock::MockJni> {
        let location = Location {
            type_tag: RefTypeTag::Class,
            class_id: 1,
            method_id: method as u64,
            index: 0,
        };
        let mut ctx = empty_context(7, EventDetails::Step { thread: 7, location });
        ctx.method = Some(JMethodId::from_raw(method));
        ctx.frame_depth = Some(frame_depth);
        ctx.line = Some(line);
        ctx
    }

    #[test]
    fn test_step_over_skips_callee() {
        let state = step(StepDepth::Over, StepSize::Line, 3, 10);
        assert!(state.check(&at(4, 0x20, 50)).is_none());
        assert!(state.check(&at(3, 0x10, 10)).is_none());
        assert!(state.check(&at(3, 0x10, 11)).is_some());
        assert!(state.check(&at(2, 0x08, 99)).is_some());
    }

    #[test]
    fn test_step_out_waits_for_caller() {
        let state = step(StepDepth::Out, StepSize::Line, 3, 10);
        assert!(state.check(&at(3, 0x10, 11)).is_none());
        assert!(state.check(&at(4, 0x20, 1)).is_none());
        assert_eq!(state.check(&at(2, 0x08, 5)).map(|p| p.frame_depth), Some(2));
    }

    #[test]
    fn test_step_into_enters_callee() {
        let state = step(StepDepth::Into, StepSize::Line, 3, 10);
        assert!(state.check(&at(3, 0x10, 10)).is_none());
        assert!(state.check(&at(4, 0x20, 1)).is_some());
    }

    #[test]
    fn test_min_step_fires_every_instruction() {
        let state = step(StepDepth::Over, StepSize::Min, 3, 10);
        assert!(state.check(&at(3, 0x10, 10)).is_some());
        assert!(state.check(&at(4, 0x20, 10)).is_none());
    }

    #[test]
    fn test_modifier_kinds() {
        assert!(modifier_applies(EventKind::Breakpoint, &EventModifier::Count(1)));
        assert!(!modifier_applies(
            EventKind::ThreadStart,
            &EventModifier::ClassMatch("*".to_string())
        ));
        assert!(!modifier_applies(
            EventKind::Breakpoint,
            &EventModifier::ExceptionOnly {
                ref_type: 0,
                caught: true,
                uncaught: true
            }
        ));
        assert!(modifier_applies(EventKind::ClassPrepare, &EventModifier::ClassExclude("java.*".into())));
    }

    #[test]
    fn test_unsupported_kinds_are_not_implemented() {
        assert_eq!(
            native_event_type(EventKind::FieldAccess),
            Err(ProtocolError::NotImplemented)
        );
        assert_eq!(
            native_event_type(EventKind::ThreadDeath),
            Ok(NativeEventType::ThreadEnd)
        );
    }
}
