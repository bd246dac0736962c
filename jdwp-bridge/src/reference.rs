// Reference tracking
//
// Native references cross the bridge as protocol identifiers. Each tracked
// object is pinned by one session-scoped global reference and recognised on
// later calls through its JVMTI object tag (tag == identifier). Local
// references only ever live inside a `ScopedLocalRef`.

use crate::environment::Environment;
use crate::native::{thread_state, JClass, JObject, JavaVm, JniEnv, JvmtiEnv};
use crate::protocol::{ProtocolError, ProtocolResult};
use crate::types::{ObjectId, RefTypeTag, TaggedObjectId, TaggedReferenceTypeId, TypeTag};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// A local reference that is deleted when the guard is dropped
pub struct ScopedLocalRef<'a, J: JniEnv> {
    jni: &'a J,
    object: JObject,
}

impl<'a, J: JniEnv> ScopedLocalRef<'a, J> {
    pub fn new(jni: &'a J, object: JObject) -> Self {
        Self { jni, object }
    }

    pub fn get(&self) -> JObject {
        self.object
    }

    pub fn is_null(&self) -> bool {
        self.object.is_null()
    }

    /// Fail with `error` if the reference is null
    pub fn require(self, error: ProtocolError) -> ProtocolResult<Self> {
        if self.is_null() {
            Err(error)
        } else {
            Ok(self)
        }
    }
}

impl<'a, J: JniEnv> Drop for ScopedLocalRef<'a, J> {
    fn drop(&mut self) {
        if !self.object.is_null() {
            self.jni.delete_local_ref(self.object);
        }
    }
}

/// Wrap every handle of a native result list so none can leak
pub fn scope_all<J: JniEnv>(jni: &J, objects: Vec<JObject>) -> Vec<ScopedLocalRef<'_, J>> {
    objects
        .into_iter()
        .map(|object| ScopedLocalRef::new(jni, object))
        .collect()
}

/// Local reference to a thread plus its liveness at acquisition time
pub struct LocalThreadRef<'a, J: JniEnv> {
    reference: ScopedLocalRef<'a, J>,
    alive: bool,
}

impl<'a, J: JniEnv> LocalThreadRef<'a, J> {
    pub fn get(&self) -> JObject {
        self.reference.get()
    }

    /// The handle resolved to a thread that has not terminated
    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn require_alive(self) -> ProtocolResult<Self> {
        if self.alive {
            Ok(self)
        } else {
            Err(ProtocolError::InvalidThread)
        }
    }
}

#[derive(Debug)]
struct TrackedRef {
    global: JObject,
    references: u32,
}

#[derive(Debug)]
struct TrackerState {
    next_id: ObjectId,
    entries: HashMap<ObjectId, TrackedRef>,
}

/// Maps protocol identifiers to global references
#[derive(Debug)]
pub struct ReferenceTracker {
    state: Mutex<TrackerState>,
}

impl Default for ReferenceTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ReferenceTracker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TrackerState {
                next_id: 1,
                entries: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Identifier for `object`, allocating one (and a global reference) the
    /// first time the object is seen. A null handle yields the null id 0.
    /// The caller keeps ownership of `object`.
    pub fn track_new<V: JavaVm>(
        &self,
        env: &Environment<'_, V>,
        object: JObject,
    ) -> ProtocolResult<ObjectId> {
        if object.is_null() {
            return Ok(0);
        }

        // The tag lookup and assignment must not interleave with another
        // thread tracking the same object.
        let mut state = self.lock();

        let tag = env.jvmti.get_tag(object)?;
        if tag > 0 {
            if let Some(entry) = state.entries.get_mut(&(tag as ObjectId)) {
                entry.references += 1;
                return Ok(tag as ObjectId);
            }
        }

        let id = state.next_id;
        env.jvmti.set_tag(object, id as i64)?;
        let global = env.jni.new_global_ref(object);
        if global.is_null() {
            return Err(ProtocolError::OutOfMemory);
        }
        state.next_id += 1;
        state.entries.insert(
            id,
            TrackedRef {
                global,
                references: 1,
            },
        );

        debug!("Tracking object id={}", id);
        Ok(id)
    }

    /// Track an object value, tagged by its runtime class
    pub fn track_object<V: JavaVm>(
        &self,
        env: &Environment<'_, V>,
        object: JObject,
        declared: TypeTag,
    ) -> ProtocolResult<TaggedObjectId> {
        if object.is_null() {
            let tag = if declared == TypeTag::Array {
                TypeTag::Array
            } else {
                TypeTag::Object
            };
            return Ok(TaggedObjectId { tag, object_id: 0 });
        }

        let class = ScopedLocalRef::new(&env.jni, env.jni.get_object_class(object))
            .require(ProtocolError::InvalidObject)?;
        let (signature, _) = env.jvmti.get_class_signature(class.get())?;
        let tag = runtime_tag(&signature);

        let object_id = self.track_new(env, object)?;
        Ok(TaggedObjectId { tag, object_id })
    }

    /// Track a class, tagged class / interface / array
    pub fn track_class<V: JavaVm>(
        &self,
        env: &Environment<'_, V>,
        class: JClass,
    ) -> ProtocolResult<TaggedReferenceTypeId> {
        if class.is_null() {
            return Err(ProtocolError::InvalidClass);
        }

        let type_tag = if env.jvmti.is_array_class(class)? {
            RefTypeTag::Array
        } else if env.jvmti.is_interface(class)? {
            RefTypeTag::Interface
        } else {
            RefTypeTag::Class
        };

        let type_id = self.track_new(env, class)?;
        Ok(TaggedReferenceTypeId { type_tag, type_id })
    }

    /// Global reference behind an identifier
    pub fn resolve(&self, id: ObjectId) -> ProtocolResult<JObject> {
        self.lock()
            .entries
            .get(&id)
            .map(|entry| entry.global)
            .ok_or(ProtocolError::InvalidObject)
    }

    /// Fresh local reference for an identifier; null if the identifier is
    /// unknown or released
    pub fn acquire_local<'e, V: JavaVm>(
        &self,
        env: &'e Environment<'_, V>,
        id: ObjectId,
    ) -> ScopedLocalRef<'e, V::Jni> {
        let state = self.lock();
        let local = match state.entries.get(&id) {
            Some(entry) => env.jni.new_local_ref(entry.global),
            None => JObject::NULL,
        };
        ScopedLocalRef::new(&env.jni, local)
    }

    pub fn acquire_object<'e, V: JavaVm>(
        &self,
        env: &'e Environment<'_, V>,
        id: ObjectId,
    ) -> ProtocolResult<ScopedLocalRef<'e, V::Jni>> {
        self.acquire_local(env, id).require(ProtocolError::InvalidObject)
    }

    pub fn acquire_class<'e, V: JavaVm>(
        &self,
        env: &'e Environment<'_, V>,
        id: ObjectId,
    ) -> ProtocolResult<ScopedLocalRef<'e, V::Jni>> {
        self.acquire_local(env, id).require(ProtocolError::InvalidClass)
    }

    /// Local reference for a thread id. A null or terminated thread is
    /// reported through `is_alive`, not as an error.
    pub fn acquire_thread<'e, V: JavaVm>(
        &self,
        env: &'e Environment<'_, V>,
        id: ObjectId,
    ) -> LocalThreadRef<'e, V::Jni> {
        let reference = self.acquire_local(env, id);
        let alive = !reference.is_null()
            && matches!(
                env.jvmti.get_thread_state(reference.get()),
                Ok(state) if state & thread_state::TERMINATED == 0
            );
        LocalThreadRef { reference, alive }
    }

    /// Delete the global reference behind `id` and forget the identifier
    pub fn release<V: JavaVm>(&self, env: &Environment<'_, V>, id: ObjectId) -> ProtocolResult<()> {
        let entry = self
            .lock()
            .entries
            .remove(&id)
            .ok_or(ProtocolError::InvalidObject)?;
        env.jni.delete_global_ref(entry.global);
        debug!("Released object id={}", id);
        Ok(())
    }

    /// Drop `count` references to `id`; the identifier is released when no
    /// references remain
    pub fn dispose<V: JavaVm>(
        &self,
        env: &Environment<'_, V>,
        id: ObjectId,
        count: u32,
    ) -> ProtocolResult<()> {
        let released = {
            let mut state = self.lock();
            let entry = state
                .entries
                .get_mut(&id)
                .ok_or(ProtocolError::InvalidObject)?;
            entry.references = entry.references.saturating_sub(count);
            if entry.references == 0 {
                state.entries.remove(&id)
            } else {
                None
            }
        };

        if let Some(entry) = released {
            env.jni.delete_global_ref(entry.global);
            debug!("Disposed object id={}", id);
        }
        Ok(())
    }

    /// Number of live identifiers
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn runtime_tag(class_signature: &str) -> TypeTag {
    match class_signature {
        s if s.starts_with('[') => TypeTag::Array,
        "Ljava/lang/String;" => TypeTag::String,
        "Ljava/lang/Thread;" => TypeTag::Thread,
        "Ljava/lang/ThreadGroup;" => TypeTag::ThreadGroup,
        "Ljava/lang/Class;" => TypeTag::ClassObject,
        "Ljava/lang/ClassLoader;" => TypeTag::ClassLoader,
        _ => TypeTag::Object,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::get_environment;
    use crate::mock::MockJavaVm;
    use crate::native::Capabilities;
    use std::sync::Arc;

    fn vm() -> MockJavaVm {
        let vm = MockJavaVm::new();
        vm.jvmti().add_capabilities(&Capabilities::default()).unwrap();
        vm
    }

    #[test]
    fn test_track_then_resolve_round_trip() {
        let vm = vm();
        let class = vm.define_class("Lcom/example/Foo;");
        let object = vm.new_object(class);
        let env = get_environment(&vm).unwrap();
        let tracker = ReferenceTracker::new();

        let local = ScopedLocalRef::new(&env.jni, vm.local_ref(object));
        let id = tracker.track_new(&env, local.get()).unwrap();
        drop(local);

        let global = tracker.resolve(id).unwrap();
        assert_eq!(vm.heap_id(global), Some(object));
        assert_eq!(vm.outstanding_local_refs(), 0);
    }

    #[test]
    fn test_same_object_same_id() {
        let vm = vm();
        let object = vm.new_string("hello");
        let env = get_environment(&vm).unwrap();
        let tracker = ReferenceTracker::new();

        let first = ScopedLocalRef::new(&env.jni, vm.local_ref(object));
        let second = ScopedLocalRef::new(&env.jni, vm.local_ref(object));
        assert_ne!(first.get(), second.get());

        let a = tracker.track_new(&env, first.get()).unwrap();
        let b = tracker.track_new(&env, second.get()).unwrap();
        assert_eq!(a, b);
        assert_eq!(tracker.len(), 1);
        assert_eq!(vm.outstanding_global_refs(), 1);
    }

    #[test]
    fn test_null_tracks_to_null_id() {
        let vm = vm();
        let env = get_environment(&vm).unwrap();
        let tracker = ReferenceTracker::new();

        assert_eq!(tracker.track_new(&env, JObject::NULL).unwrap(), 0);
        assert!(tracker.is_empty());
        assert!(tracker.acquire_local(&env, 0).is_null());
        assert_eq!(
            tracker.acquire_object(&env, 0).err(),
            Some(ProtocolError::InvalidObject)
        );
    }

    #[test]
    fn test_release_invalidates_id() {
        let vm = vm();
        let object = vm.new_string("gone");
        let env = get_environment(&vm).unwrap();
        let tracker = ReferenceTracker::new();

        let local = ScopedLocalRef::new(&env.jni, vm.local_ref(object));
        let id = tracker.track_new(&env, local.get()).unwrap();

        tracker.release(&env, id).unwrap();
        assert_eq!(tracker.resolve(id), Err(ProtocolError::InvalidObject));
        assert_eq!(tracker.release(&env, id), Err(ProtocolError::InvalidObject));
        assert_eq!(vm.outstanding_global_refs(), 0);

        // a stale tag must not resurrect the old id
        let again = tracker.track_new(&env, local.get()).unwrap();
        assert_ne!(again, id);
    }

    #[test]
    fn test_dispose_counts_references() {
        let vm = vm();
        let object = vm.new_string("counted");
        let env = get_environment(&vm).unwrap();
        let tracker = ReferenceTracker::new();

        let local = ScopedLocalRef::new(&env.jni, vm.local_ref(object));
        let id = tracker.track_new(&env, local.get()).unwrap();
        tracker.track_new(&env, local.get()).unwrap();
        tracker.track_new(&env, local.get()).unwrap();

        tracker.dispose(&env, id, 2).unwrap();
        assert!(tracker.resolve(id).is_ok());
        tracker.dispose(&env, id, 1).unwrap();
        assert_eq!(tracker.resolve(id), Err(ProtocolError::InvalidObject));
    }

    #[test]
    fn test_scoped_ref_released_on_early_return() {
        let vm = vm();
        let object = vm.new_string("scoped");
        let env = get_environment(&vm).unwrap();

        fn fails<J: JniEnv>(jni: &J, object: JObject) -> ProtocolResult<()> {
            let _guard = ScopedLocalRef::new(jni, object);
            Err(ProtocolError::Internal)
        }

        assert!(fails(&env.jni, vm.local_ref(object)).is_err());
        assert_eq!(vm.outstanding_local_refs(), 0);
    }

    #[test]
    fn test_track_object_tags_by_runtime_class() {
        let vm = vm();
        let string = vm.new_string("s");
        let array = vm.new_array("[I", Vec::new());
        let env = get_environment(&vm).unwrap();
        let tracker = ReferenceTracker::new();

        let local = ScopedLocalRef::new(&env.jni, vm.local_ref(string));
        let tagged = tracker.track_object(&env, local.get(), TypeTag::Object).unwrap();
        assert_eq!(tagged.tag, TypeTag::String);

        let local = ScopedLocalRef::new(&env.jni, vm.local_ref(array));
        let tagged = tracker.track_object(&env, local.get(), TypeTag::Object).unwrap();
        assert_eq!(tagged.tag, TypeTag::Array);

        let null = tracker.track_object(&env, JObject::NULL, TypeTag::Array).unwrap();
        assert_eq!(null, TaggedObjectId { tag: TypeTag::Array, object_id: 0 });
    }

    #[test]
    fn test_dead_thread_is_not_alive() {
        let vm = vm();
        let thread = vm.spawn_thread("worker");
        let env = get_environment(&vm).unwrap();
        let tracker = ReferenceTracker::new();

        let local = ScopedLocalRef::new(&env.jni, vm.local_ref(thread));
        let id = tracker.track_new(&env, local.get()).unwrap();
        drop(local);

        assert!(tracker.acquire_thread(&env, id).is_alive());
        vm.terminate_thread(thread);
        assert!(!tracker.acquire_thread(&env, id).is_alive());
        assert!(!tracker.acquire_thread(&env, 9999).is_alive());
        assert_eq!(vm.outstanding_local_refs(), 0);
    }

    #[test]
    fn test_concurrent_tracking_has_no_lost_updates() {
        let vm = Arc::new(vm());
        let objects: Vec<_> = (0..32).map(|i| vm.new_string(&format!("s{}", i))).collect();
        let tracker = Arc::new(ReferenceTracker::new());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let vm = Arc::clone(&vm);
                let tracker = Arc::clone(&tracker);
                let objects = objects.clone();
                std::thread::spawn(move || {
                    let env = get_environment(&*vm).unwrap();
                    objects
                        .iter()
                        .map(|object| {
                            let local = ScopedLocalRef::new(&env.jni, vm.local_ref(*object));
                            tracker.track_new(&env, local.get()).unwrap()
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let results: Vec<Vec<ObjectId>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for ids in &results[1..] {
            assert_eq!(ids, &results[0]);
        }
        assert_eq!(tracker.len(), objects.len());
        assert_eq!(vm.outstanding_global_refs(), objects.len());
        assert_eq!(vm.outstanding_local_refs(), 0);
    }
}
