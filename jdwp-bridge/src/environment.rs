// Environment accessor
//
// Every operation re-derives its environment: the calling thread may differ
// between invocations.

use crate::native::JavaVm;
use crate::protocol::{ProtocolError, ProtocolResult};
use tracing::warn;

/// The JVMTI environment plus the calling thread's JNI environment
pub struct Environment<'vm, V: JavaVm> {
    pub jvmti: &'vm V::Jvmti,
    pub jni: V::Jni,
}

/// Attach the calling thread to the VM as a daemon and return its environment
pub fn get_environment<V: JavaVm>(vm: &V) -> ProtocolResult<Environment<'_, V>> {
    let jni = vm.attach_current_thread_as_daemon().map_err(|e| {
        warn!("Failed to attach thread to VM: {}", e);
        ProtocolError::Internal
    })?;

    Ok(Environment {
        jvmti: vm.jvmti(),
        jni,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockJavaVm;

    #[test]
    fn test_attach_failure_is_internal() {
        let vm = MockJavaVm::new();
        assert!(get_environment(&vm).is_ok());

        vm.set_attach_fails(true);
        assert_eq!(get_environment(&vm).err(), Some(ProtocolError::Internal));
    }
}
