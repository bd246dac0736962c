// VirtualMachine command implementations
//
// Commands that act on the VM as a whole: class and thread enumeration,
// bulk suspend/resume and identifier disposal

use crate::environment::Environment;
use crate::native::{Capabilities, JavaVm, JniEnv, JvmtiEnv, JObject};
use crate::protocol::{ProtocolError, ProtocolResult};
use crate::reference::{scope_all, ReferenceTracker, ScopedLocalRef};
use crate::service::DebugProtocolService;
use crate::types::{
    ClassStatus, DisposeRequest, ReferenceTypeData, ReferenceTypeId, StringId, ThreadGroupId,
    ThreadId, VmVersion,
};
use bytes::Bytes;
use tracing::debug;

/// Suspend every live thread except the calling one. Per-thread failures
/// (already suspended, terminated in between) are discarded.
pub(crate) fn suspend_all<V: JavaVm>(env: &Environment<'_, V>) -> ProtocolResult<()> {
    // SuspendThreadList does not return while the caller is in the list
    let current = match env.jvmti.get_current_thread() {
        Ok(thread) => ScopedLocalRef::new(&env.jni, thread),
        Err(e) => {
            debug!("No current thread to exclude from suspend: {}", e);
            ScopedLocalRef::new(&env.jni, JObject::NULL)
        }
    };
    let threads = scope_all(&env.jni, env.jvmti.get_all_threads()?);
    let handles: Vec<JObject> = threads
        .iter()
        .map(ScopedLocalRef::get)
        .filter(|&thread| current.is_null() || !env.jni.is_same_object(thread, current.get()))
        .collect();

    let results = env.jvmti.suspend_thread_list(&handles)?;
    for (thread, result) in handles.iter().zip(results) {
        if let Err(e) = result {
            debug!("Suspend of thread {:?} discarded: {}", thread, e);
        }
    }
    Ok(())
}

pub(crate) fn resume_all<V: JavaVm>(env: &Environment<'_, V>) -> ProtocolResult<()> {
    let threads = scope_all(&env.jni, env.jvmti.get_all_threads()?);
    let handles: Vec<JObject> = threads.iter().map(ScopedLocalRef::get).collect();

    let results = env.jvmti.resume_thread_list(&handles)?;
    for (thread, result) in handles.iter().zip(results) {
        if let Err(e) = result {
            debug!("Resume of thread {:?} discarded: {}", thread, e);
        }
    }
    Ok(())
}

fn class_data<V: JavaVm>(
    env: &Environment<'_, V>,
    tracker: &ReferenceTracker,
    class: &ScopedLocalRef<'_, V::Jni>,
    signature: String,
    generic_signature: Option<String>,
) -> ProtocolResult<ReferenceTypeData> {
    let type_id = tracker.track_class(env, class.get())?;
    let status = ClassStatus::from_native(env.jvmti.get_class_status(class.get())?);
    Ok(ReferenceTypeData {
        type_id,
        signature,
        generic_signature,
        status,
    })
}

impl<V: JavaVm> DebugProtocolService<V> {
    /// Get VM version information (VirtualMachine.Version command)
    pub fn get_version(&self) -> ProtocolResult<VmVersion> {
        self.command("VirtualMachine.Version", |env| {
            Ok(VmVersion {
                description: self.config.description.clone(),
                jdwp_major: self.config.jdwp_major,
                jdwp_minor: self.config.jdwp_minor,
                vm_version: env.jvmti.get_system_property("java.version")?,
                vm_name: env.jvmti.get_system_property("java.vm.name")?,
            })
        })
    }

    /// All loaded classes (VirtualMachine.AllClassesWithGeneric command)
    pub fn get_all_classes(&self) -> ProtocolResult<Vec<ReferenceTypeData>> {
        self.command("VirtualMachine.AllClasses", |env| {
            let classes = scope_all(&env.jni, env.jvmti.get_loaded_classes()?);

            let mut result = Vec::with_capacity(classes.len());
            for class in &classes {
                let (signature, generic) = env.jvmti.get_class_signature(class.get())?;
                result.push(class_data(env, &self.tracker, class, signature, generic)?);
            }
            Ok(result)
        })
    }

    /// Loaded classes matching a JNI signature, e.g. `Ljava/lang/String;`
    /// (VirtualMachine.ClassesBySignature command)
    pub fn get_classes_by_signature(&self, signature: &str) -> ProtocolResult<Vec<ReferenceTypeData>> {
        self.command("VirtualMachine.ClassesBySignature", |env| {
            let classes = scope_all(&env.jni, env.jvmti.get_loaded_classes()?);

            let mut result = Vec::new();
            for class in &classes {
                let (class_signature, generic) = env.jvmti.get_class_signature(class.get())?;
                if class_signature == signature {
                    result.push(class_data(env, &self.tracker, class, class_signature, generic)?);
                }
            }
            debug!("Found {} classes for {}", result.len(), signature);
            Ok(result)
        })
    }

    /// Get all live threads (VirtualMachine.AllThreads command)
    pub fn get_all_threads(&self) -> ProtocolResult<Vec<ThreadId>> {
        self.command("VirtualMachine.AllThreads", |env| {
            let threads = scope_all(&env.jni, env.jvmti.get_all_threads()?);
            threads
                .iter()
                .map(|thread| self.tracker.track_new(env, thread.get()))
                .collect()
        })
    }

    pub fn get_top_level_thread_groups(&self) -> ProtocolResult<Vec<ThreadGroupId>> {
        self.command("VirtualMachine.TopLevelThreadGroups", |env| {
            let groups = scope_all(&env.jni, env.jvmti.get_top_thread_groups()?);
            groups
                .iter()
                .map(|group| self.tracker.track_new(env, group.get()))
                .collect()
        })
    }

    /// Suspend all threads (VirtualMachine.Suspend command)
    pub fn suspend(&self) -> ProtocolResult<()> {
        self.command("VirtualMachine.Suspend", suspend_all)
    }

    /// Resume all threads (VirtualMachine.Resume command)
    pub fn resume(&self) -> ProtocolResult<()> {
        self.command("VirtualMachine.Resume", resume_all)
    }

    /// Drop references the debugger no longer needs. Unknown identifiers are
    /// skipped.
    pub fn dispose_objects(&self, requests: &[DisposeRequest]) -> ProtocolResult<()> {
        self.command("VirtualMachine.DisposeObjects", |env| {
            for request in requests {
                if let Err(e) = self.tracker.dispose(env, request.object_id, request.ref_count) {
                    debug!("Dispose of id={} skipped: {}", request.object_id, e);
                }
            }
            Ok(())
        })
    }

    /// The capability set requested at construction
    pub fn get_capabilities(&self) -> ProtocolResult<Capabilities> {
        Ok(self.config.capabilities)
    }

    pub fn dispose(&self) -> ProtocolResult<()> {
        self.command("VirtualMachine.Dispose", |_| Err(ProtocolError::NotImplemented))
    }

    pub fn exit(&self, _exit_code: i32) -> ProtocolResult<()> {
        self.command("VirtualMachine.Exit", |_| Err(ProtocolError::NotImplemented))
    }

    pub fn create_string(&self, _value: &str) -> ProtocolResult<StringId> {
        self.command("VirtualMachine.CreateString", |_| Err(ProtocolError::NotImplemented))
    }

    pub fn redefine_classes(&self, _classes: &[(ReferenceTypeId, Bytes)]) -> ProtocolResult<()> {
        self.command("VirtualMachine.RedefineClasses", |_| Err(ProtocolError::NotImplemented))
    }

    pub fn hold_events(&self) -> ProtocolResult<()> {
        self.command("VirtualMachine.HoldEvents", |_| Err(ProtocolError::NotImplemented))
    }

    pub fn release_events(&self) -> ProtocolResult<()> {
        self.command("VirtualMachine.ReleaseEvents", |_| Err(ProtocolError::NotImplemented))
    }
}
