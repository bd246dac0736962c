// Debug protocol service
//
// The single shared bridge instance. Command sets add `impl` blocks in their
// own modules (vm, reftype, method, object, thread, stackframe,
// eventrequest). Every command re-derives its environment and runs behind a
// panic boundary.

use crate::config::BridgeConfig;
use crate::environment::{get_environment, Environment};
use crate::eventloop::{spawn_delivery, Delivery, EventProcessor};
use crate::events::EventSet;
use crate::native::{JavaVm, JvmtiEnv, NativeEvent};
use crate::protocol::{ProtocolError, ProtocolResult};
use crate::reference::ReferenceTracker;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc as std_mpsc, Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

struct Session {
    inbound: mpsc::UnboundedSender<Delivery>,
}

pub struct DebugProtocolService<V: JavaVm> {
    pub(crate) vm: Arc<V>,
    pub(crate) tracker: Arc<ReferenceTracker>,
    pub(crate) config: BridgeConfig,
    pub(crate) events: EventProcessor,
    session: Mutex<Option<Session>>,
}

impl<V: JavaVm> DebugProtocolService<V> {
    /// Create the bridge and request the configured capabilities
    pub fn new(vm: Arc<V>, config: BridgeConfig) -> ProtocolResult<Self> {
        vm.jvmti()
            .add_capabilities(&config.capabilities)
            .map_err(|e| {
                warn!("Failed to add capabilities: {}", e);
                ProtocolError::from(e)
            })?;

        info!("Debug protocol service created");
        Ok(Self {
            vm,
            tracker: Arc::new(ReferenceTracker::new()),
            config,
            events: EventProcessor::new(),
            session: Mutex::new(None),
        })
    }

    pub fn vm(&self) -> &V {
        &self.vm
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn tracker(&self) -> &ReferenceTracker {
        &self.tracker
    }

    /// The registered event requests
    pub fn events(&self) -> &EventProcessor {
        &self.events
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one command: attach the calling thread, call `op`, and turn a
    /// panic into `Internal`
    pub(crate) fn command<T>(
        &self,
        name: &'static str,
        op: impl FnOnce(&Environment<'_, V>) -> ProtocolResult<T>,
    ) -> ProtocolResult<T> {
        debug!("{}", name);

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let env = get_environment(&*self.vm)?;
            op(&env)
        }));

        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                debug!("{} failed: {}", name, e);
                Err(e)
            }
            Err(_) => {
                error!("{} panicked", name);
                Err(ProtocolError::Internal)
            }
        }
    }

    /// Register the session's event channel. Must be called from within a
    /// tokio runtime; the event delivery task runs on it.
    pub fn attach(&self, channel: mpsc::Sender<EventSet>) -> ProtocolResult<()> {
        self.command("VirtualMachine.Attach", |env| {
            let mut session = self.lock_session();
            if session.is_some() {
                warn!("Debugger session already attached");
                return Err(ProtocolError::Duplicate);
            }

            let runtime = Handle::try_current().map_err(|e| {
                warn!("Attach outside of a tokio runtime: {}", e);
                ProtocolError::Internal
            })?;

            self.events.enable_vm_death(env, &self.tracker)?;

            let inbound = spawn_delivery(
                &runtime,
                Arc::clone(&self.vm),
                Arc::clone(&self.tracker),
                channel,
            );
            *session = Some(Session { inbound });

            info!("Debugger session attached");
            Ok(())
        })
    }

    pub fn is_attached(&self) -> bool {
        self.lock_session().is_some()
    }

    /// Entry point for the agent's native callbacks. Runs on the VM's
    /// callback thread and blocks it until delivery when the fired requests
    /// asked for a suspension. Must not be called from an async task.
    pub fn on_native_event(&self, event: NativeEvent) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.dispatch_event(&event)));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to process event callback {:?}: {}", event, e),
            Err(_) => error!("Event callback panicked: {:?}", event),
        }
    }

    fn dispatch_event(&self, event: &NativeEvent) -> ProtocolResult<()> {
        let fired = {
            let env = get_environment(&*self.vm)?;
            match self.events.process(&env, &self.tracker, event)? {
                Some(fired) => fired,
                None => return Ok(()),
            }
        };

        let inbound = match self.lock_session().as_ref() {
            Some(session) => session.inbound.clone(),
            None => {
                debug!("No session attached, dropping event set");
                return Ok(());
            }
        };

        let (ack, delivered) = match fired.suspend {
            Some(_) => {
                let (tx, rx) = std_mpsc::sync_channel(1);
                (Some(tx), Some(rx))
            }
            None => (None, None),
        };

        let delivery = Delivery {
            events: fired.events,
            suspend: fired.suspend,
            ack,
        };
        if inbound.send(delivery).is_err() {
            warn!("Event delivery task stopped, dropping event set");
            return Ok(());
        }

        if let Some(delivered) = delivered {
            // Err means the task dropped the acknowledgement; carry on
            delivered.recv().ok();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockJavaVm;

    fn service() -> DebugProtocolService<MockJavaVm> {
        DebugProtocolService::new(Arc::new(MockJavaVm::new()), BridgeConfig::default()).unwrap()
    }

    #[test]
    fn test_new_requests_capabilities() {
        let service = service();
        assert_eq!(
            service.vm().capabilities(),
            Some(BridgeConfig::default().capabilities)
        );
    }

    #[test]
    fn test_panicking_command_is_internal() {
        let service = service();
        let result: ProtocolResult<()> = service.command("Test.Panic", |_| panic!("boom"));
        assert_eq!(result, Err(ProtocolError::Internal));
    }

    #[test]
    fn test_attach_outside_runtime_fails() {
        let service = service();
        let (tx, _rx) = mpsc::channel(1);
        assert_eq!(service.attach(tx), Err(ProtocolError::Internal));
        assert!(!service.is_attached());
    }

    #[tokio::test]
    async fn test_second_attach_is_duplicate() {
        let service = service();
        let (first, _first_rx) = mpsc::channel(1);
        let (second, _second_rx) = mpsc::channel(1);

        service.attach(first).unwrap();
        assert_eq!(service.attach(second), Err(ProtocolError::Duplicate));
        assert!(service.is_attached());
    }
}
