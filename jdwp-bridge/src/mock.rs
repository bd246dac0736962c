// Simulated VM
//
// An in-process implementation of the native traits with a small object heap,
// threads with scripted stack frames, JNI handle accounting and event
// delivery. Used by the test suites and by front ends that want to exercise
// the bridge without a live JVM.

use crate::native::{
    class_status, modifiers, thread_state, Capabilities, JArray, JClass, JFieldId, JLocation,
    JMethodId, JObject, JString, JThread, JThreadGroup, JValue, JavaType, JavaVm, JniEnv,
    JniError, JvmtiEnv, JvmtiError, LineNumberEntry, LocalType, LocalVariableEntry, MemberName,
    NativeEvent, NativeEventType, NativeFrame, NativeResult, NativeThreadInfo,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Identity of an object on the simulated heap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HeapId(usize);

/// A stored field, array element or local variable value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MockValue {
    Prim(JValue),
    Ref(Option<HeapId>),
}

impl MockValue {
    pub const NULL: MockValue = MockValue::Ref(None);

    pub fn boolean(v: bool) -> Self {
        MockValue::Prim(JValue::Boolean(v))
    }

    pub fn int(v: i32) -> Self {
        MockValue::Prim(JValue::Int(v))
    }

    pub fn long(v: i64) -> Self {
        MockValue::Prim(JValue::Long(v))
    }

    pub fn double(v: f64) -> Self {
        MockValue::Prim(JValue::Double(v))
    }

    pub fn object(id: HeapId) -> Self {
        MockValue::Ref(Some(id))
    }

    fn default_for_signature(signature: &str) -> Self {
        match signature.chars().next() {
            Some('Z') => MockValue::Prim(JValue::Boolean(false)),
            Some('B') => MockValue::Prim(JValue::Byte(0)),
            Some('C') => MockValue::Prim(JValue::Char(0)),
            Some('S') => MockValue::Prim(JValue::Short(0)),
            Some('I') => MockValue::Prim(JValue::Int(0)),
            Some('J') => MockValue::Prim(JValue::Long(0)),
            Some('F') => MockValue::Prim(JValue::Float(0.0)),
            Some('D') => MockValue::Prim(JValue::Double(0.0)),
            _ => MockValue::NULL,
        }
    }
}

/// Declaration of a method added with `MockJavaVm::add_method`
#[derive(Debug, Clone)]
pub struct MethodSpec {
    name: String,
    signature: String,
    modifiers: i32,
    start: JLocation,
    end: JLocation,
    lines: Vec<LineNumberEntry>,
    variables: Option<Vec<LocalVariableEntry>>,
    bytecodes: Vec<u8>,
}

impl MethodSpec {
    pub fn new(name: &str, signature: &str) -> Self {
        Self {
            name: name.to_string(),
            signature: signature.to_string(),
            modifiers: modifiers::PUBLIC,
            start: 0,
            end: 100,
            lines: Vec::new(),
            variables: Some(Vec::new()),
            bytecodes: vec![0xb1],
        }
    }

    pub fn modifiers(mut self, modifiers: i32) -> Self {
        self.modifiers = modifiers;
        self
    }

    pub fn range(mut self, start: JLocation, end: JLocation) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    pub fn line(mut self, start_location: JLocation, line_number: i32) -> Self {
        self.lines.push(LineNumberEntry {
            start_location,
            line_number,
        });
        self
    }

    pub fn variable(
        mut self,
        name: &str,
        signature: &str,
        start_location: JLocation,
        length: i32,
        slot: i32,
    ) -> Self {
        self.variables
            .get_or_insert_with(Vec::new)
            .push(LocalVariableEntry {
                start_location,
                length,
                name: name.to_string(),
                signature: signature.to_string(),
                generic_signature: None,
                slot,
            });
        self
    }

    /// Method compiled without a local variable table
    pub fn without_variable_table(mut self) -> Self {
        self.variables = None;
        self
    }

    pub fn bytecodes(mut self, bytecodes: Vec<u8>) -> Self {
        self.bytecodes = bytecodes;
        self
    }
}

/// A callback to deliver with `MockJavaVm::deliver`, in heap terms
#[derive(Debug, Clone)]
pub enum MockEvent {
    VmDeath,
    ThreadStart {
        thread: HeapId,
    },
    ThreadEnd {
        thread: HeapId,
    },
    ClassPrepare {
        thread: HeapId,
        class: HeapId,
    },
    Breakpoint {
        thread: HeapId,
        method: JMethodId,
        location: JLocation,
    },
    SingleStep {
        thread: HeapId,
        method: JMethodId,
        location: JLocation,
    },
    Exception {
        thread: HeapId,
        method: JMethodId,
        location: JLocation,
        exception: HeapId,
        catch: Option<(JMethodId, JLocation)>,
    },
    MethodEntry {
        thread: HeapId,
        method: JMethodId,
    },
    MethodExit {
        thread: HeapId,
        method: JMethodId,
        location: JLocation,
    },
}

impl MockEvent {
    fn native_type(&self) -> NativeEventType {
        match self {
            MockEvent::VmDeath => NativeEventType::VmDeath,
            MockEvent::ThreadStart { .. } => NativeEventType::ThreadStart,
            MockEvent::ThreadEnd { .. } => NativeEventType::ThreadEnd,
            MockEvent::ClassPrepare { .. } => NativeEventType::ClassPrepare,
            MockEvent::Breakpoint { .. } => NativeEventType::Breakpoint,
            MockEvent::SingleStep { .. } => NativeEventType::SingleStep,
            MockEvent::Exception { .. } => NativeEventType::Exception,
            MockEvent::MethodEntry { .. } => NativeEventType::MethodEntry,
            MockEvent::MethodExit { .. } => NativeEventType::MethodExit,
        }
    }

    fn thread(&self) -> Option<HeapId> {
        match self {
            MockEvent::VmDeath => None,
            MockEvent::ThreadStart { thread }
            | MockEvent::ThreadEnd { thread }
            | MockEvent::ClassPrepare { thread, .. }
            | MockEvent::Breakpoint { thread, .. }
            | MockEvent::SingleStep { thread, .. }
            | MockEvent::Exception { thread, .. }
            | MockEvent::MethodEntry { thread, .. }
            | MockEvent::MethodExit { thread, .. } => Some(*thread),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandleKind {
    Local,
    Global,
}

#[derive(Debug, Clone, Copy)]
struct Handle {
    target: HeapId,
    kind: HandleKind,
}

#[derive(Debug)]
struct MockClass {
    signature: String,
    generic_signature: Option<String>,
    status: i32,
    modifiers: i32,
    interface: bool,
    array: bool,
    superclass: Option<HeapId>,
    interfaces: Vec<HeapId>,
    fields: Vec<JFieldId>,
    methods: Vec<JMethodId>,
    source_file: Option<String>,
}

#[derive(Debug)]
struct MockFrame {
    method: JMethodId,
    location: JLocation,
    locals: HashMap<i32, MockValue>,
}

#[derive(Debug)]
struct MockThread {
    name: String,
    state: i32,
    daemon: bool,
    group: HeapId,
    // index 0 is the topmost frame
    frames: Vec<MockFrame>,
    suspend_error: Option<JvmtiError>,
}

#[derive(Debug)]
enum Body {
    Class(MockClass),
    Instance(HashMap<JFieldId, MockValue>),
    Array(Vec<MockValue>),
    Str(String),
    Thread(MockThread),
    Group { name: String },
}

#[derive(Debug)]
struct HeapObject {
    class: HeapId,
    tag: i64,
    body: Body,
}

#[derive(Debug)]
struct MockField {
    class: HeapId,
    name: String,
    signature: String,
    modifiers: i32,
    static_value: MockValue,
    poisoned: bool,
}

#[derive(Debug)]
struct MockMethod {
    class: HeapId,
    spec: MethodSpec,
}

#[derive(Debug)]
struct MockState {
    heap: Vec<HeapObject>,
    handles: HashMap<usize, Handle>,
    next_handle: usize,
    fields: HashMap<JFieldId, MockField>,
    next_field: usize,
    methods: HashMap<JMethodId, MockMethod>,
    next_method: usize,
    breakpoints: HashSet<(JMethodId, JLocation)>,
    // threads currently running an event callback
    in_callback: HashSet<HeapId>,
    notifications: HashSet<(NativeEventType, Option<HeapId>)>,
    properties: HashMap<String, String>,
    capabilities: Option<Capabilities>,
    exception_pending: bool,
    field_reads: usize,
    attach_fails: bool,
    // daemon thread objects of attached native threads
    attached: HashMap<std::thread::ThreadId, HeapId>,
    self_suspensions: usize,
    object_class: HeapId,
    class_class: HeapId,
    string_class: HeapId,
    thread_class: HeapId,
    group_class: HeapId,
    system_group: HeapId,
    main_group: HeapId,
    class_loader: HeapId,
}

const OBJECT_CLASS: HeapId = HeapId(0);
const CLASS_CLASS: HeapId = HeapId(1);

impl MockState {
    fn new() -> Self {
        let mut state = MockState {
            heap: Vec::new(),
            handles: HashMap::new(),
            next_handle: 0x1000,
            fields: HashMap::new(),
            next_field: 0x100,
            methods: HashMap::new(),
            next_method: 0x1000,
            breakpoints: HashSet::new(),
            in_callback: HashSet::new(),
            notifications: HashSet::new(),
            properties: HashMap::new(),
            capabilities: None,
            exception_pending: false,
            field_reads: 0,
            attach_fails: false,
            attached: HashMap::new(),
            self_suspensions: 0,
            object_class: OBJECT_CLASS,
            class_class: CLASS_CLASS,
            string_class: OBJECT_CLASS,
            thread_class: OBJECT_CLASS,
            group_class: OBJECT_CLASS,
            system_group: OBJECT_CLASS,
            main_group: OBJECT_CLASS,
            class_loader: OBJECT_CLASS,
        };

        let object = state.add_class("Ljava/lang/Object;", None, false, false);
        let class = state.add_class("Ljava/lang/Class;", Some(object), false, false);
        debug_assert_eq!((object, class), (OBJECT_CLASS, CLASS_CLASS));

        state.string_class = state.add_class("Ljava/lang/String;", Some(object), false, false);
        state.thread_class = state.add_class("Ljava/lang/Thread;", Some(object), false, false);
        state.group_class = state.add_class("Ljava/lang/ThreadGroup;", Some(object), false, false);
        let loader_class = state.add_class("Ljava/lang/ClassLoader;", Some(object), false, false);

        state.system_group = state.alloc(
            state.group_class,
            Body::Group {
                name: "system".to_string(),
            },
        );
        state.main_group = state.alloc(
            state.group_class,
            Body::Group {
                name: "main".to_string(),
            },
        );
        state.class_loader = state.alloc(loader_class, Body::Instance(HashMap::new()));

        state
            .properties
            .insert("java.version".to_string(), "17.0.2".to_string());
        state
            .properties
            .insert("java.vm.name".to_string(), "Simulated VM".to_string());
        state
    }

    fn alloc(&mut self, class: HeapId, body: Body) -> HeapId {
        self.heap.push(HeapObject { class, tag: 0, body });
        HeapId(self.heap.len() - 1)
    }

    fn add_class(
        &mut self,
        signature: &str,
        superclass: Option<HeapId>,
        interface: bool,
        array: bool,
    ) -> HeapId {
        let mut modifiers = modifiers::PUBLIC;
        if interface {
            modifiers |= modifiers::INTERFACE | modifiers::ABSTRACT;
        }
        let mut status = class_status::VERIFIED | class_status::PREPARED | class_status::INITIALIZED;
        if array {
            status |= class_status::ARRAY;
        }
        self.alloc(
            CLASS_CLASS,
            Body::Class(MockClass {
                signature: signature.to_string(),
                generic_signature: None,
                status,
                modifiers,
                interface,
                array,
                superclass,
                interfaces: Vec::new(),
                fields: Vec::new(),
                methods: Vec::new(),
                source_file: None,
            }),
        )
    }

    fn new_handle(&mut self, target: HeapId, kind: HandleKind) -> JObject {
        let raw = self.next_handle;
        self.next_handle += 8;
        self.handles.insert(raw, Handle { target, kind });
        JObject::from_raw(raw)
    }

    fn local(&mut self, target: HeapId) -> JObject {
        self.new_handle(target, HandleKind::Local)
    }

    fn local_value(&mut self, value: MockValue) -> JValue {
        match value {
            MockValue::Prim(v) => v,
            MockValue::Ref(Some(id)) => JValue::Object(self.local(id)),
            MockValue::Ref(None) => JValue::Object(JObject::NULL),
        }
    }

    fn target(&self, handle: JObject) -> Option<HeapId> {
        if handle.is_null() {
            return None;
        }
        self.handles.get(&handle.as_raw()).map(|h| h.target)
    }

    fn object(&self, handle: JObject) -> NativeResult<&HeapObject> {
        let id = self.target(handle).ok_or(JvmtiError::InvalidObject)?;
        Ok(&self.heap[id.0])
    }

    fn class(&self, handle: JClass) -> NativeResult<&MockClass> {
        let id = self.target(handle).ok_or(JvmtiError::InvalidClass)?;
        self.class_at(id).ok_or(JvmtiError::InvalidClass)
    }

    fn class_at(&self, id: HeapId) -> Option<&MockClass> {
        match &self.heap.get(id.0)?.body {
            Body::Class(class) => Some(class),
            _ => None,
        }
    }

    fn class_at_mut(&mut self, id: HeapId) -> &mut MockClass {
        match &mut self.heap[id.0].body {
            Body::Class(class) => class,
            other => panic!("heap object {:?} is not a class: {:?}", id, other),
        }
    }

    fn prepared_class(&self, handle: JClass) -> NativeResult<&MockClass> {
        let class = self.class(handle)?;
        if class.status & class_status::PREPARED == 0 {
            return Err(JvmtiError::ClassNotPrepared);
        }
        Ok(class)
    }

    fn thread_at(&self, id: HeapId) -> Option<&MockThread> {
        match &self.heap.get(id.0)?.body {
            Body::Thread(thread) => Some(thread),
            _ => None,
        }
    }

    fn thread_at_mut(&mut self, id: HeapId) -> &mut MockThread {
        match &mut self.heap[id.0].body {
            Body::Thread(thread) => thread,
            other => panic!("heap object {:?} is not a thread: {:?}", id, other),
        }
    }

    fn thread(&self, handle: JThread) -> NativeResult<&MockThread> {
        let id = self.target(handle).ok_or(JvmtiError::InvalidThread)?;
        self.thread_at(id).ok_or(JvmtiError::InvalidThread)
    }

    fn thread_mut(&mut self, handle: JThread) -> NativeResult<&mut MockThread> {
        let id = self.target(handle).ok_or(JvmtiError::InvalidThread)?;
        match &mut self.heap[id.0].body {
            Body::Thread(thread) => Ok(thread),
            _ => Err(JvmtiError::InvalidThread),
        }
    }

    fn method(&self, method: JMethodId) -> NativeResult<&MockMethod> {
        self.methods.get(&method).ok_or(JvmtiError::InvalidMethodId)
    }

    fn has(&self, capability: impl Fn(&Capabilities) -> bool) -> NativeResult<()> {
        match &self.capabilities {
            Some(caps) if capability(caps) => Ok(()),
            _ => Err(JvmtiError::MustPossessCapability),
        }
    }

    fn assignable(&self, sub: HeapId, sup: HeapId) -> bool {
        if sub == sup || sup == self.object_class {
            return true;
        }
        match self.class_at(sub) {
            Some(class) => {
                class.interfaces.iter().any(|i| self.assignable(*i, sup))
                    || class.superclass.map_or(false, |s| self.assignable(s, sup))
            }
            None => false,
        }
    }

    /// Thread object of the calling native thread, created on first attach
    fn attach_current(&mut self) -> HeapId {
        let os_thread = std::thread::current().id();
        if let Some(id) = self.attached.get(&os_thread) {
            return *id;
        }
        let class = self.thread_class;
        let group = self.system_group;
        let name = format!("jdwp-agent-{}", self.attached.len() + 1);
        let id = self.alloc(
            class,
            Body::Thread(MockThread {
                name,
                state: thread_state::ALIVE | thread_state::RUNNABLE,
                daemon: true,
                group,
                frames: Vec::new(),
                suspend_error: None,
            }),
        );
        self.attached.insert(os_thread, id);
        id
    }

    fn suspend(&mut self, handle: JThread) -> NativeResult<()> {
        let current = self.attached.get(&std::thread::current().id()).copied();
        if current.is_some() && self.target(handle) == current {
            self.self_suspensions += 1;
        }
        let thread = self.thread_mut(handle)?;
        if let Some(error) = thread.suspend_error {
            return Err(error);
        }
        if thread.state & thread_state::TERMINATED != 0 {
            return Err(JvmtiError::ThreadNotAlive);
        }
        if thread.state & thread_state::SUSPENDED != 0 {
            return Err(JvmtiError::ThreadSuspended);
        }
        thread.state |= thread_state::SUSPENDED;
        Ok(())
    }

    fn resume(&mut self, handle: JThread) -> NativeResult<()> {
        let thread = self.thread_mut(handle)?;
        if thread.state & thread_state::TERMINATED != 0 {
            return Err(JvmtiError::ThreadNotAlive);
        }
        if thread.state & thread_state::SUSPENDED == 0 {
            return Err(JvmtiError::ThreadNotSuspended);
        }
        thread.state &= !thread_state::SUSPENDED;
        Ok(())
    }

    fn delivers(&self, event: &MockEvent) -> bool {
        let kind = event.native_type();
        let enabled = self.notifications.contains(&(kind, None))
            || event
                .thread()
                .map_or(false, |t| self.notifications.contains(&(kind, Some(t))));
        match event {
            MockEvent::Breakpoint {
                method, location, ..
            } => enabled && self.breakpoints.contains(&(*method, *location)),
            _ => enabled,
        }
    }
}

fn widen_local(value: MockValue, ty: LocalType) -> Option<MockValue> {
    let widened = match (value, ty) {
        (MockValue::Ref(_), LocalType::Object) => return Some(value),
        (MockValue::Prim(JValue::Boolean(v)), LocalType::Int) => JValue::Int(v as i32),
        (MockValue::Prim(JValue::Byte(v)), LocalType::Int) => JValue::Int(v as i32),
        (MockValue::Prim(JValue::Char(v)), LocalType::Int) => JValue::Int(v as i32),
        (MockValue::Prim(JValue::Short(v)), LocalType::Int) => JValue::Int(v as i32),
        (MockValue::Prim(v @ JValue::Int(_)), LocalType::Int)
        | (MockValue::Prim(v @ JValue::Long(_)), LocalType::Long)
        | (MockValue::Prim(v @ JValue::Float(_)), LocalType::Float)
        | (MockValue::Prim(v @ JValue::Double(_)), LocalType::Double) => v,
        _ => return None,
    };
    Some(MockValue::Prim(widened))
}

type SharedState = Arc<Mutex<MockState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The simulated VM. Builder and inspection methods take `&self`.
#[derive(Debug)]
pub struct MockJavaVm {
    jvmti: MockJvmti,
}

#[derive(Debug)]
pub struct MockJvmti {
    state: SharedState,
}

#[derive(Debug)]
pub struct MockJni {
    state: SharedState,
}

impl Default for MockJavaVm {
    fn default() -> Self {
        Self::new()
    }
}

impl MockJavaVm {
    pub fn new() -> Self {
        Self {
            jvmti: MockJvmti {
                state: Arc::new(Mutex::new(MockState::new())),
            },
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        lock(&self.jvmti.state)
    }

    // Failure injection

    pub fn set_attach_fails(&self, fails: bool) {
        self.state().attach_fails = fails;
    }

    /// Make every read of `field` raise a Java exception
    pub fn poison_field(&self, field: JFieldId) {
        if let Some(f) = self.state().fields.get_mut(&field) {
            f.poisoned = true;
        }
    }

    /// Make suspending `thread` fail with `error`
    pub fn fail_suspend(&self, thread: HeapId, error: JvmtiError) {
        self.state().thread_at_mut(thread).suspend_error = Some(error);
    }

    pub fn set_property(&self, key: &str, value: &str) {
        self.state()
            .properties
            .insert(key.to_string(), value.to_string());
    }

    // Classes

    pub fn object_class(&self) -> HeapId {
        self.state().object_class
    }

    pub fn string_class(&self) -> HeapId {
        self.state().string_class
    }

    pub fn define_class(&self, signature: &str) -> HeapId {
        let mut state = self.state();
        let object = state.object_class;
        state.add_class(signature, Some(object), false, false)
    }

    pub fn define_subclass(&self, signature: &str, superclass: HeapId) -> HeapId {
        self.state()
            .add_class(signature, Some(superclass), false, false)
    }

    pub fn define_interface(&self, signature: &str) -> HeapId {
        let mut state = self.state();
        let object = state.object_class;
        state.add_class(signature, Some(object), true, false)
    }

    pub fn add_interface(&self, class: HeapId, interface: HeapId) {
        self.state().class_at_mut(class).interfaces.push(interface);
    }

    pub fn set_class_status(&self, class: HeapId, status: i32) {
        self.state().class_at_mut(class).status = status;
    }

    pub fn set_class_modifiers(&self, class: HeapId, modifiers: i32) {
        self.state().class_at_mut(class).modifiers = modifiers;
    }

    pub fn set_source_file(&self, class: HeapId, source_file: &str) {
        self.state().class_at_mut(class).source_file = Some(source_file.to_string());
    }

    pub fn set_generic_signature(&self, class: HeapId, generic: &str) {
        self.state().class_at_mut(class).generic_signature = Some(generic.to_string());
    }

    fn add_field(
        &self,
        class: HeapId,
        name: &str,
        signature: &str,
        modifiers: i32,
        static_value: MockValue,
    ) -> JFieldId {
        let mut state = self.state();
        let id = JFieldId::from_raw(state.next_field);
        state.next_field += 1;
        state.fields.insert(
            id,
            MockField {
                class,
                name: name.to_string(),
                signature: signature.to_string(),
                modifiers,
                static_value,
                poisoned: false,
            },
        );
        state.class_at_mut(class).fields.push(id);
        id
    }

    pub fn add_static_field(
        &self,
        class: HeapId,
        name: &str,
        signature: &str,
        value: MockValue,
    ) -> JFieldId {
        self.add_field(
            class,
            name,
            signature,
            modifiers::PUBLIC | modifiers::STATIC,
            value,
        )
    }

    pub fn add_instance_field(&self, class: HeapId, name: &str, signature: &str) -> JFieldId {
        self.add_field(class, name, signature, modifiers::PRIVATE, MockValue::NULL)
    }

    pub fn add_method(&self, class: HeapId, spec: MethodSpec) -> JMethodId {
        let mut state = self.state();
        let id = JMethodId::from_raw(state.next_method);
        state.next_method += 8;
        state.methods.insert(id, MockMethod { class, spec });
        state.class_at_mut(class).methods.push(id);
        id
    }

    // Objects

    pub fn new_object(&self, class: HeapId) -> HeapId {
        self.state().alloc(class, Body::Instance(HashMap::new()))
    }

    pub fn set_field(&self, object: HeapId, field: JFieldId, value: MockValue) {
        if let Body::Instance(fields) = &mut self.state().heap[object.0].body {
            fields.insert(field, value);
        }
    }

    /// Array of type `signature` (`[I`, `[Ljava/lang/String;`, ...); the array
    /// class is created on first use
    pub fn new_array(&self, signature: &str, elements: Vec<MockValue>) -> HeapId {
        let mut state = self.state();
        let existing = state.heap.iter().position(|o| {
            matches!(&o.body, Body::Class(c) if c.array && c.signature == signature)
        });
        let class = match existing {
            Some(index) => HeapId(index),
            None => {
                let object = state.object_class;
                state.add_class(signature, Some(object), false, true)
            }
        };
        state.alloc(class, Body::Array(elements))
    }

    pub fn new_string(&self, value: &str) -> HeapId {
        let mut state = self.state();
        let class = state.string_class;
        state.alloc(class, Body::Str(value.to_string()))
    }

    // Threads

    pub fn spawn_thread(&self, name: &str) -> HeapId {
        let mut state = self.state();
        let class = state.thread_class;
        let group = state.main_group;
        state.alloc(
            class,
            Body::Thread(MockThread {
                name: name.to_string(),
                state: thread_state::ALIVE | thread_state::RUNNABLE,
                daemon: false,
                group,
                frames: Vec::new(),
                suspend_error: None,
            }),
        )
    }

    pub fn main_thread_group(&self) -> HeapId {
        self.state().main_group
    }

    pub fn set_thread_state(&self, thread: HeapId, state: i32) {
        self.state().thread_at_mut(thread).state = state;
    }

    pub fn thread_state(&self, thread: HeapId) -> i32 {
        self.state()
            .thread_at(thread)
            .map_or(0, |t| t.state)
    }

    /// The thread object attached for the calling native thread, if any
    pub fn current_thread(&self) -> Option<HeapId> {
        self.state()
            .attached
            .get(&std::thread::current().id())
            .copied()
    }

    /// Daemon thread objects created for attached native threads
    pub fn attached_threads(&self) -> Vec<HeapId> {
        self.state().attached.values().copied().collect()
    }

    /// Times a thread asked the VM to suspend itself
    pub fn self_suspensions(&self) -> usize {
        self.state().self_suspensions
    }

    pub fn is_suspended(&self, thread: HeapId) -> bool {
        self.thread_state(thread) & thread_state::SUSPENDED != 0
    }

    pub fn terminate_thread(&self, thread: HeapId) {
        let mut state = self.state();
        let thread = state.thread_at_mut(thread);
        thread.state = thread_state::TERMINATED;
        thread.frames.clear();
    }

    /// Push a new topmost frame
    pub fn push_frame(&self, thread: HeapId, method: JMethodId, location: JLocation) {
        self.state().thread_at_mut(thread).frames.insert(
            0,
            MockFrame {
                method,
                location,
                locals: HashMap::new(),
            },
        );
    }

    pub fn pop_frame(&self, thread: HeapId) {
        let mut state = self.state();
        let frames = &mut state.thread_at_mut(thread).frames;
        if !frames.is_empty() {
            frames.remove(0);
        }
    }

    /// Move the topmost frame to `location`
    pub fn set_top_location(&self, thread: HeapId, location: JLocation) {
        if let Some(frame) = self.state().thread_at_mut(thread).frames.first_mut() {
            frame.location = location;
        }
    }

    pub fn set_local(&self, thread: HeapId, depth: usize, slot: i32, value: MockValue) {
        if let Some(frame) = self.state().thread_at_mut(thread).frames.get_mut(depth) {
            frame.locals.insert(slot, value);
        }
    }

    // Handles

    /// A new local reference to `object`, owned by the caller
    pub fn local_ref(&self, object: HeapId) -> JObject {
        self.state().local(object)
    }

    /// The heap object a handle refers to
    pub fn heap_id(&self, handle: JObject) -> Option<HeapId> {
        self.state().target(handle)
    }

    // Inspection

    pub fn outstanding_local_refs(&self) -> usize {
        self.state()
            .handles
            .values()
            .filter(|h| h.kind == HandleKind::Local)
            .count()
    }

    pub fn outstanding_global_refs(&self) -> usize {
        self.state()
            .handles
            .values()
            .filter(|h| h.kind == HandleKind::Global)
            .count()
    }

    /// Number of JNI field reads performed
    pub fn field_reads(&self) -> usize {
        self.state().field_reads
    }

    pub fn exception_pending(&self) -> bool {
        self.state().exception_pending
    }

    pub fn capabilities(&self) -> Option<Capabilities> {
        self.state().capabilities
    }

    pub fn breakpoint_set(&self, method: JMethodId, location: JLocation) -> bool {
        self.state().breakpoints.contains(&(method, location))
    }

    pub fn event_enabled(&self, event: NativeEventType, thread: Option<HeapId>) -> bool {
        self.state().notifications.contains(&(event, thread))
    }

    /// Run `handler` as the VM's callback for `event`, if notification for it
    /// is enabled. The callback's local references are freed when the handler
    /// returns. Returns whether the callback ran.
    pub fn deliver(&self, event: MockEvent, handler: impl FnOnce(NativeEvent)) -> bool {
        let (native, locals, callback_thread) = {
            let mut state = self.state();
            if !state.delivers(&event) {
                return false;
            }

            let mut locals = Vec::new();
            let mut local = |state: &mut MockState, id: HeapId| {
                let handle = state.local(id);
                locals.push(handle);
                handle
            };

            let callback_thread = event.thread();
            let native = match event {
                MockEvent::VmDeath => NativeEvent::VmDeath,
                MockEvent::ThreadStart { thread } => NativeEvent::ThreadStart {
                    thread: local(&mut *state, thread),
                },
                MockEvent::ThreadEnd { thread } => NativeEvent::ThreadEnd {
                    thread: local(&mut *state, thread),
                },
                MockEvent::ClassPrepare { thread, class } => NativeEvent::ClassPrepare {
                    thread: local(&mut *state, thread),
                    class: local(&mut *state, class),
                },
                MockEvent::Breakpoint {
                    thread,
                    method,
                    location,
                } => NativeEvent::Breakpoint {
                    thread: local(&mut *state, thread),
                    method,
                    location,
                },
                MockEvent::SingleStep {
                    thread,
                    method,
                    location,
                } => NativeEvent::SingleStep {
                    thread: local(&mut *state, thread),
                    method,
                    location,
                },
                MockEvent::Exception {
                    thread,
                    method,
                    location,
                    exception,
                    catch,
                } => NativeEvent::Exception {
                    thread: local(&mut *state, thread),
                    method,
                    location,
                    exception: local(&mut *state, exception),
                    catch_method: catch.map(|(m, _)| m),
                    catch_location: catch.map_or(0, |(_, l)| l),
                },
                MockEvent::MethodEntry { thread, method } => NativeEvent::MethodEntry {
                    thread: local(&mut *state, thread),
                    method,
                },
                MockEvent::MethodExit {
                    thread,
                    method,
                    location,
                } => NativeEvent::MethodExit {
                    thread: local(&mut *state, thread),
                    method,
                    location,
                },
            };
            if let Some(thread) = callback_thread {
                state.in_callback.insert(thread);
            }
            (native, locals, callback_thread)
        };

        handler(native);

        let mut state = self.state();
        if let Some(thread) = callback_thread {
            state.in_callback.remove(&thread);
        }
        for handle in locals {
            state.handles.remove(&handle.as_raw());
        }
        true
    }
}

impl JavaVm for MockJavaVm {
    type Jvmti = MockJvmti;
    type Jni = MockJni;

    fn jvmti(&self) -> &MockJvmti {
        &self.jvmti
    }

    fn attach_current_thread_as_daemon(&self) -> Result<MockJni, JniError> {
        let mut state = self.state();
        if state.attach_fails {
            return Err(JniError(-1));
        }
        state.attach_current();
        drop(state);
        Ok(MockJni {
            state: Arc::clone(&self.jvmti.state),
        })
    }
}

impl MockJvmti {
    fn state(&self) -> MutexGuard<'_, MockState> {
        lock(&self.state)
    }

    fn locals(&self, ids: Vec<HeapId>) -> Vec<JObject> {
        let mut state = self.state();
        ids.into_iter().map(|id| state.local(id)).collect()
    }
}

impl JvmtiEnv for MockJvmti {
    fn add_capabilities(&self, capabilities: &Capabilities) -> NativeResult<()> {
        self.state().capabilities = Some(*capabilities);
        Ok(())
    }

    fn get_system_property(&self, property: &str) -> NativeResult<String> {
        self.state()
            .properties
            .get(property)
            .cloned()
            .ok_or(JvmtiError::NotAvailable)
    }

    fn get_loaded_classes(&self) -> NativeResult<Vec<JClass>> {
        let ids: Vec<HeapId> = {
            let state = self.state();
            (0..state.heap.len())
                .map(HeapId)
                .filter(|id| state.class_at(*id).is_some())
                .collect()
        };
        Ok(self.locals(ids))
    }

    fn get_class_signature(&self, class: JClass) -> NativeResult<(String, Option<String>)> {
        let state = self.state();
        let class = state.class(class)?;
        Ok((class.signature.clone(), class.generic_signature.clone()))
    }

    fn get_class_status(&self, class: JClass) -> NativeResult<i32> {
        Ok(self.state().class(class)?.status)
    }

    fn get_class_modifiers(&self, class: JClass) -> NativeResult<i32> {
        Ok(self.state().class(class)?.modifiers)
    }

    fn is_interface(&self, class: JClass) -> NativeResult<bool> {
        Ok(self.state().class(class)?.interface)
    }

    fn is_array_class(&self, class: JClass) -> NativeResult<bool> {
        Ok(self.state().class(class)?.array)
    }

    fn get_class_fields(&self, class: JClass) -> NativeResult<Vec<JFieldId>> {
        Ok(self.state().prepared_class(class)?.fields.clone())
    }

    fn get_class_methods(&self, class: JClass) -> NativeResult<Vec<JMethodId>> {
        Ok(self.state().prepared_class(class)?.methods.clone())
    }

    fn get_implemented_interfaces(&self, class: JClass) -> NativeResult<Vec<JClass>> {
        let ids = self.state().prepared_class(class)?.interfaces.clone();
        Ok(self.locals(ids))
    }

    fn get_source_file_name(&self, class: JClass) -> NativeResult<String> {
        let state = self.state();
        state.has(|c| c.can_get_source_file_name)?;
        state
            .class(class)?
            .source_file
            .clone()
            .ok_or(JvmtiError::AbsentInformation)
    }

    fn get_field_name(&self, class: JClass, field: JFieldId) -> NativeResult<MemberName> {
        let state = self.state();
        let owner = state.target(class).ok_or(JvmtiError::InvalidClass)?;
        state.class(class)?;
        match state.fields.get(&field) {
            Some(f) if f.class == owner => Ok(MemberName {
                name: f.name.clone(),
                signature: f.signature.clone(),
                generic_signature: None,
            }),
            _ => Err(JvmtiError::InvalidFieldId),
        }
    }

    fn get_field_modifiers(&self, class: JClass, field: JFieldId) -> NativeResult<i32> {
        let state = self.state();
        let owner = state.target(class).ok_or(JvmtiError::InvalidClass)?;
        match state.fields.get(&field) {
            Some(f) if f.class == owner => Ok(f.modifiers),
            _ => Err(JvmtiError::InvalidFieldId),
        }
    }

    fn get_method_name(&self, method: JMethodId) -> NativeResult<MemberName> {
        let state = self.state();
        let method = state.method(method)?;
        Ok(MemberName {
            name: method.spec.name.clone(),
            signature: method.spec.signature.clone(),
            generic_signature: None,
        })
    }

    fn get_method_modifiers(&self, method: JMethodId) -> NativeResult<i32> {
        Ok(self.state().method(method)?.spec.modifiers)
    }

    fn get_method_declaring_class(&self, method: JMethodId) -> NativeResult<JClass> {
        let mut state = self.state();
        let class = state.method(method)?.class;
        Ok(state.local(class))
    }

    fn get_method_location(&self, method: JMethodId) -> NativeResult<(JLocation, JLocation)> {
        let state = self.state();
        let method = state.method(method)?;
        if method.spec.modifiers & modifiers::NATIVE != 0 {
            return Ok((-1, -1));
        }
        Ok((method.spec.start, method.spec.end))
    }

    fn get_line_number_table(&self, method: JMethodId) -> NativeResult<Vec<LineNumberEntry>> {
        let state = self.state();
        state.has(|c| c.can_get_line_numbers)?;
        let method = state.method(method)?;
        if method.spec.modifiers & modifiers::NATIVE != 0 {
            return Err(JvmtiError::NativeMethod);
        }
        if method.spec.lines.is_empty() {
            return Err(JvmtiError::AbsentInformation);
        }
        Ok(method.spec.lines.clone())
    }

    fn get_local_variable_table(
        &self,
        method: JMethodId,
    ) -> NativeResult<Vec<LocalVariableEntry>> {
        let state = self.state();
        state.has(|c| c.can_access_local_variables)?;
        let method = state.method(method)?;
        if method.spec.modifiers & modifiers::NATIVE != 0 {
            return Err(JvmtiError::NativeMethod);
        }
        method
            .spec
            .variables
            .clone()
            .ok_or(JvmtiError::AbsentInformation)
    }

    fn get_bytecodes(&self, method: JMethodId) -> NativeResult<Vec<u8>> {
        let state = self.state();
        state.has(|c| c.can_get_bytecodes)?;
        let method = state.method(method)?;
        if method.spec.modifiers & modifiers::NATIVE != 0 {
            return Err(JvmtiError::NativeMethod);
        }
        Ok(method.spec.bytecodes.clone())
    }

    fn get_all_threads(&self) -> NativeResult<Vec<JThread>> {
        let ids: Vec<HeapId> = {
            let state = self.state();
            (0..state.heap.len())
                .map(HeapId)
                .filter(|id| {
                    state
                        .thread_at(*id)
                        .map_or(false, |t| t.state & thread_state::TERMINATED == 0)
                })
                .collect()
        };
        Ok(self.locals(ids))
    }

    fn get_current_thread(&self) -> NativeResult<JThread> {
        let mut state = self.state();
        let id = *state
            .attached
            .get(&std::thread::current().id())
            .ok_or(JvmtiError::UnattachedThread)?;
        Ok(state.local(id))
    }

    fn get_top_thread_groups(&self) -> NativeResult<Vec<JThreadGroup>> {
        let system = self.state().system_group;
        Ok(self.locals(vec![system]))
    }

    fn get_thread_info(&self, thread: JThread) -> NativeResult<NativeThreadInfo> {
        let mut state = self.state();
        let (name, daemon, group) = {
            let thread = state.thread(thread)?;
            (thread.name.clone(), thread.daemon, thread.group)
        };
        let loader = state.class_loader;
        Ok(NativeThreadInfo {
            name,
            priority: 5,
            is_daemon: daemon,
            thread_group: state.local(group),
            context_class_loader: state.local(loader),
        })
    }

    fn get_thread_state(&self, thread: JThread) -> NativeResult<i32> {
        Ok(self.state().thread(thread)?.state)
    }

    fn suspend_thread(&self, thread: JThread) -> NativeResult<()> {
        let mut state = self.state();
        state.has(|c| c.can_suspend)?;
        state.suspend(thread)
    }

    fn resume_thread(&self, thread: JThread) -> NativeResult<()> {
        let mut state = self.state();
        state.has(|c| c.can_suspend)?;
        state.resume(thread)
    }

    fn suspend_thread_list(&self, threads: &[JThread]) -> NativeResult<Vec<NativeResult<()>>> {
        let mut state = self.state();
        state.has(|c| c.can_suspend)?;
        Ok(threads.iter().map(|t| state.suspend(*t)).collect())
    }

    fn resume_thread_list(&self, threads: &[JThread]) -> NativeResult<Vec<NativeResult<()>>> {
        let mut state = self.state();
        state.has(|c| c.can_suspend)?;
        Ok(threads.iter().map(|t| state.resume(*t)).collect())
    }

    fn get_stack_trace(
        &self,
        thread: JThread,
        start_depth: i32,
        max_frames: i32,
    ) -> NativeResult<Vec<NativeFrame>> {
        let state = self.state();
        let thread = state.thread(thread)?;
        if start_depth < 0 || max_frames < 0 || start_depth as usize > thread.frames.len() {
            return Err(JvmtiError::IllegalArgument);
        }
        Ok(thread
            .frames
            .iter()
            .skip(start_depth as usize)
            .take(max_frames as usize)
            .map(|f| NativeFrame {
                method: f.method,
                location: f.location,
            })
            .collect())
    }

    fn get_frame_count(&self, thread: JThread) -> NativeResult<i32> {
        let state = self.state();
        let thread = state.thread(thread)?;
        if thread.state & thread_state::TERMINATED != 0 {
            return Err(JvmtiError::ThreadNotAlive);
        }
        Ok(thread.frames.len() as i32)
    }

    fn get_frame_location(
        &self,
        thread: JThread,
        depth: i32,
    ) -> NativeResult<(JMethodId, JLocation)> {
        let state = self.state();
        let thread = state.thread(thread)?;
        if depth < 0 {
            return Err(JvmtiError::IllegalArgument);
        }
        thread
            .frames
            .get(depth as usize)
            .map(|f| (f.method, f.location))
            .ok_or(JvmtiError::NoMoreFrames)
    }

    fn get_local(
        &self,
        thread: JThread,
        depth: i32,
        slot: i32,
        ty: LocalType,
    ) -> NativeResult<JValue> {
        let mut state = self.state();
        state.has(|c| c.can_access_local_variables)?;
        let value = {
            let id = state.target(thread).ok_or(JvmtiError::InvalidThread)?;
            let current = state.in_callback.contains(&id);
            let thread = state.thread(thread)?;
            if thread.state & thread_state::SUSPENDED == 0 && !current {
                return Err(JvmtiError::ThreadNotSuspended);
            }
            if depth < 0 {
                return Err(JvmtiError::IllegalArgument);
            }
            let frame = thread
                .frames
                .get(depth as usize)
                .ok_or(JvmtiError::NoMoreFrames)?;
            let stored = frame.locals.get(&slot).ok_or(JvmtiError::InvalidSlot)?;
            widen_local(*stored, ty).ok_or(JvmtiError::TypeMismatch)?
        };
        Ok(state.local_value(value))
    }

    fn get_tag(&self, object: JObject) -> NativeResult<i64> {
        let state = self.state();
        state.has(|c| c.can_tag_objects)?;
        Ok(state.object(object)?.tag)
    }

    fn set_tag(&self, object: JObject, tag: i64) -> NativeResult<()> {
        let mut state = self.state();
        state.has(|c| c.can_tag_objects)?;
        let id = state.target(object).ok_or(JvmtiError::InvalidObject)?;
        state.heap[id.0].tag = tag;
        Ok(())
    }

    fn set_breakpoint(&self, method: JMethodId, location: JLocation) -> NativeResult<()> {
        let mut state = self.state();
        state.has(|c| c.can_generate_breakpoint_events)?;
        let spec = &state.method(method)?.spec;
        if location < spec.start || location > spec.end {
            return Err(JvmtiError::InvalidLocation);
        }
        if !state.breakpoints.insert((method, location)) {
            return Err(JvmtiError::Duplicate);
        }
        Ok(())
    }

    fn clear_breakpoint(&self, method: JMethodId, location: JLocation) -> NativeResult<()> {
        let mut state = self.state();
        state.has(|c| c.can_generate_breakpoint_events)?;
        state.method(method)?;
        if !state.breakpoints.remove(&(method, location)) {
            return Err(JvmtiError::NotFound);
        }
        Ok(())
    }

    fn set_event_notification_mode(
        &self,
        enable: bool,
        event: NativeEventType,
        thread: Option<JThread>,
    ) -> NativeResult<()> {
        let mut state = self.state();
        match event {
            NativeEventType::SingleStep => state.has(|c| c.can_generate_single_step_events)?,
            NativeEventType::Exception => state.has(|c| c.can_generate_exception_events)?,
            NativeEventType::Breakpoint => state.has(|c| c.can_generate_breakpoint_events)?,
            NativeEventType::MethodEntry => state.has(|c| c.can_generate_method_entry_events)?,
            NativeEventType::MethodExit => state.has(|c| c.can_generate_method_exit_events)?,
            _ => {}
        }

        let target = match thread {
            Some(handle) => {
                let id = state.target(handle).ok_or(JvmtiError::InvalidThread)?;
                state.thread_at(id).ok_or(JvmtiError::InvalidThread)?;
                Some(id)
            }
            None => None,
        };

        if enable {
            state.notifications.insert((event, target));
        } else {
            state.notifications.remove(&(event, target));
        }
        Ok(())
    }
}

impl MockJni {
    fn state(&self) -> MutexGuard<'_, MockState> {
        lock(&self.state)
    }
}

impl JniEnv for MockJni {
    fn new_local_ref(&self, object: JObject) -> JObject {
        let mut state = self.state();
        match state.target(object) {
            Some(id) => state.local(id),
            None => JObject::NULL,
        }
    }

    fn delete_local_ref(&self, object: JObject) {
        let mut state = self.state();
        let raw = object.as_raw();
        if matches!(state.handles.get(&raw), Some(h) if h.kind == HandleKind::Local) {
            state.handles.remove(&raw);
        }
    }

    fn new_global_ref(&self, object: JObject) -> JObject {
        let mut state = self.state();
        match state.target(object) {
            Some(id) => state.new_handle(id, HandleKind::Global),
            None => JObject::NULL,
        }
    }

    fn delete_global_ref(&self, object: JObject) {
        let mut state = self.state();
        let raw = object.as_raw();
        if matches!(state.handles.get(&raw), Some(h) if h.kind == HandleKind::Global) {
            state.handles.remove(&raw);
        }
    }

    fn is_same_object(&self, a: JObject, b: JObject) -> bool {
        let state = self.state();
        state.target(a) == state.target(b)
    }

    fn is_assignable_from(&self, sub: JClass, sup: JClass) -> bool {
        let state = self.state();
        match (state.target(sub), state.target(sup)) {
            (Some(sub), Some(sup)) => state.assignable(sub, sup),
            _ => false,
        }
    }

    fn get_object_class(&self, object: JObject) -> JClass {
        let mut state = self.state();
        match state.target(object) {
            Some(id) => {
                let class = state.heap[id.0].class;
                state.local(class)
            }
            None => JObject::NULL,
        }
    }

    fn get_superclass(&self, class: JClass) -> JClass {
        let mut state = self.state();
        let superclass = state
            .target(class)
            .and_then(|id| state.class_at(id))
            .filter(|c| !c.interface)
            .and_then(|c| c.superclass);
        match superclass {
            Some(id) => state.local(id),
            None => JObject::NULL,
        }
    }

    fn get_static_field(&self, class: JClass, field: JFieldId, ty: JavaType) -> JValue {
        let mut state = self.state();
        state.field_reads += 1;
        let owner = state.target(class);
        let value = match state.fields.get(&field) {
            Some(f) if Some(f.class) == owner && !f.poisoned => f.static_value,
            _ => {
                state.exception_pending = true;
                return JValue::default_for(ty);
            }
        };
        state.local_value(value)
    }

    fn get_field(&self, object: JObject, field: JFieldId, ty: JavaType) -> JValue {
        let mut state = self.state();
        state.field_reads += 1;
        let (signature, poisoned) = match state.fields.get(&field) {
            Some(f) => (f.signature.clone(), f.poisoned),
            None => (String::new(), true),
        };
        let stored = match state.target(object).map(|id| &state.heap[id.0].body) {
            Some(Body::Instance(fields)) if !poisoned => fields.get(&field).copied(),
            _ => {
                state.exception_pending = true;
                return JValue::default_for(ty);
            }
        };
        let value = stored.unwrap_or_else(|| MockValue::default_for_signature(&signature));
        state.local_value(value)
    }

    fn get_array_length(&self, array: JArray) -> i32 {
        let state = self.state();
        match state.target(array).map(|id| &state.heap[id.0].body) {
            Some(Body::Array(elements)) => elements.len() as i32,
            _ => 0,
        }
    }

    fn get_array_region(&self, array: JArray, ty: JavaType, start: i32, len: i32) -> Vec<JValue> {
        let mut state = self.state();
        let slice: Option<Vec<MockValue>> = match state.target(array).map(|id| &state.heap[id.0].body)
        {
            Some(Body::Array(elements))
                if start >= 0 && len >= 0 && (start + len) as usize <= elements.len() =>
            {
                Some(elements[start as usize..(start + len) as usize].to_vec())
            }
            _ => None,
        };
        match slice {
            Some(values) => values
                .into_iter()
                .map(|v| match v {
                    MockValue::Prim(p) => p,
                    MockValue::Ref(_) => JValue::default_for(ty),
                })
                .collect(),
            None => {
                state.exception_pending = true;
                Vec::new()
            }
        }
    }

    fn get_object_array_element(&self, array: JArray, index: i32) -> JObject {
        let mut state = self.state();
        let element = match state.target(array).map(|id| &state.heap[id.0].body) {
            Some(Body::Array(elements)) if index >= 0 => elements.get(index as usize).copied(),
            _ => None,
        };
        match element {
            Some(MockValue::Ref(Some(id))) => state.local(id),
            Some(_) => JObject::NULL,
            None => {
                state.exception_pending = true;
                JObject::NULL
            }
        }
    }

    fn get_string_utf_chars(&self, string: JString) -> Option<String> {
        let state = self.state();
        match state.target(string).map(|id| &state.heap[id.0].body) {
            Some(Body::Str(value)) => Some(value.clone()),
            _ => None,
        }
    }

    fn exception_check(&self) -> bool {
        self.state().exception_pending
    }

    fn exception_clear(&self) {
        self.state().exception_pending = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vm_with_capabilities() -> MockJavaVm {
        let vm = MockJavaVm::new();
        vm.jvmti().add_capabilities(&Capabilities::default()).unwrap();
        vm
    }

    #[test]
    fn test_local_refs_are_counted() {
        let vm = MockJavaVm::new();
        let jni = vm.attach_current_thread_as_daemon().unwrap();
        let string = vm.new_string("x");

        let local = vm.local_ref(string);
        let copy = jni.new_local_ref(local);
        assert_eq!(vm.outstanding_local_refs(), 2);
        assert!(jni.is_same_object(local, copy));

        jni.delete_local_ref(local);
        jni.delete_local_ref(copy);
        assert_eq!(vm.outstanding_local_refs(), 0);
    }

    #[test]
    fn test_duplicate_breakpoint_rejected() {
        let vm = vm_with_capabilities();
        let class = vm.define_class("LMain;");
        let method = vm.add_method(class, MethodSpec::new("main", "()V"));

        vm.jvmti().set_breakpoint(method, 4).unwrap();
        assert_eq!(vm.jvmti().set_breakpoint(method, 4), Err(JvmtiError::Duplicate));
        vm.jvmti().clear_breakpoint(method, 4).unwrap();
        assert_eq!(vm.jvmti().clear_breakpoint(method, 4), Err(JvmtiError::NotFound));
    }

    #[test]
    fn test_locals_require_suspension() {
        let vm = vm_with_capabilities();
        let class = vm.define_class("LMain;");
        let method = vm.add_method(class, MethodSpec::new("main", "()V"));
        let thread = vm.spawn_thread("main");
        vm.push_frame(thread, method, 0);
        vm.set_local(thread, 0, 1, MockValue::boolean(true));

        let handle = vm.local_ref(thread);
        assert_eq!(
            vm.jvmti().get_local(handle, 0, 1, LocalType::Int),
            Err(JvmtiError::ThreadNotSuspended)
        );
        vm.jvmti().suspend_thread(handle).unwrap();
        assert_eq!(vm.jvmti().get_local(handle, 0, 1, LocalType::Int), Ok(JValue::Int(1)));
        assert_eq!(
            vm.jvmti().get_local(handle, 0, 1, LocalType::Object),
            Err(JvmtiError::TypeMismatch)
        );
    }

    #[test]
    fn test_attached_threads_are_listed() {
        let vm = vm_with_capabilities();
        assert_eq!(vm.jvmti().get_current_thread(), Err(JvmtiError::UnattachedThread));

        let jni = vm.attach_current_thread_as_daemon().unwrap();
        let agent = vm.current_thread().unwrap();
        let current = vm.jvmti().get_current_thread().unwrap();
        assert_eq!(vm.heap_id(current), Some(agent));
        assert_eq!(vm.attached_threads(), vec![agent]);

        let threads = vm.jvmti().get_all_threads().unwrap();
        assert!(threads.iter().any(|t| vm.heap_id(*t) == Some(agent)));
        for thread in threads {
            jni.delete_local_ref(thread);
        }

        vm.jvmti().suspend_thread(current).unwrap();
        assert_eq!(vm.self_suspensions(), 1);
        jni.delete_local_ref(current);
        assert_eq!(vm.outstanding_local_refs(), 0);
    }

    #[test]
    fn test_deliver_requires_enabled_notification() {
        let vm = vm_with_capabilities();
        let thread = vm.spawn_thread("worker");
        let event = MockEvent::ThreadStart { thread };

        assert!(!vm.deliver(event.clone(), |_| panic!("not enabled")));

        vm.jvmti()
            .set_event_notification_mode(true, NativeEventType::ThreadStart, None)
            .unwrap();
        let mut seen = None;
        assert!(vm.deliver(event, |e| seen = Some(e)));
        assert!(matches!(seen, Some(NativeEvent::ThreadStart { .. })));
        assert_eq!(vm.outstanding_local_refs(), 0);
    }
}
