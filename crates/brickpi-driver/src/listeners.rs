use crate::pump::DeviceUpdate;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::warn;

pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// Receives every update the pump produces.
pub trait UpdateListener: Send + Sync {
    fn on_update(&self, update: &DeviceUpdate) -> Result<(), ListenerError>;
}

impl<F> UpdateListener for F
where
    F: Fn(&DeviceUpdate) -> Result<(), ListenerError> + Send + Sync,
{
    fn on_update(&self, update: &DeviceUpdate) -> Result<(), ListenerError> {
        self(update)
    }
}

/// Ordered set of listeners, compared by identity.
///
/// Clones share the same set, so a registry handed to the pump can still be
/// edited from the caller's side.
#[derive(Clone, Default)]
pub struct ListenerRegistry {
    inner: Arc<Mutex<Vec<Arc<dyn UpdateListener>>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<dyn UpdateListener>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `listener` unless it is already registered. Returns whether it was
    /// added.
    pub fn add(&self, listener: Arc<dyn UpdateListener>) -> bool {
        let mut list = self.lock();
        if list.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            return false;
        }
        list.push(listener);
        true
    }

    /// Remove `listener`, returning whether it was registered.
    pub fn remove(&self, listener: &Arc<dyn UpdateListener>) -> bool {
        let mut list = self.lock();
        let before = list.len();
        list.retain(|l| !Arc::ptr_eq(l, listener));
        list.len() != before
    }

    pub fn contains(&self, listener: &Arc<dyn UpdateListener>) -> bool {
        self.lock().iter().any(|l| Arc::ptr_eq(l, listener))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `update` to every listener in registration order.
    ///
    /// A listener that fails or panics is logged and skipped; the rest still
    /// run. Returns how many listeners failed. The set is snapshotted first, so
    /// listeners may add or remove listeners without deadlocking.
    pub fn notify(&self, update: &DeviceUpdate) -> usize {
        let snapshot: Vec<_> = self.lock().clone();
        let mut failures = 0;
        for (index, listener) in snapshot.iter().enumerate() {
            match panic::catch_unwind(AssertUnwindSafe(|| listener.on_update(update))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    warn!(listener = index, port = %update.port(), error = %e, "listener failed");
                }
                Err(_) => {
                    failures += 1;
                    warn!(listener = index, port = %update.port(), "listener panicked");
                }
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pump::DeviceReading;
    use crate::sensors::SensorSample;
    use crate::types::{SensorPort, SensorState, SensorType};
    use time::OffsetDateTime;

    fn update() -> DeviceUpdate {
        DeviceUpdate {
            at: OffsetDateTime::UNIX_EPOCH,
            reading: DeviceReading::Sensor(SensorSample {
                port: SensorPort::S1,
                sensor_type: SensorType::Touch,
                state: SensorState::NoData,
                reading: None,
            }),
        }
    }

    fn recorder(log: &Arc<Mutex<Vec<&'static str>>>, tag: &'static str) -> Arc<dyn UpdateListener> {
        let log = Arc::clone(log);
        Arc::new(move |_: &DeviceUpdate| -> Result<(), ListenerError> {
            log.lock().unwrap().push(tag);
            Ok(())
        })
    }

    #[test]
    fn adding_twice_keeps_one_entry() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let reg = ListenerRegistry::new();
        let a = recorder(&log, "a");
        assert!(reg.add(Arc::clone(&a)));
        assert!(!reg.add(Arc::clone(&a)));
        assert_eq!(reg.len(), 1);

        reg.notify(&update());
        assert_eq!(*log.lock().unwrap(), vec!["a"]);

        assert!(reg.remove(&a));
        assert!(!reg.remove(&a));
        assert!(reg.is_empty());
    }

    #[test]
    fn notification_follows_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let reg = ListenerRegistry::new();
        let b = recorder(&log, "b");
        reg.add(recorder(&log, "a"));
        reg.add(Arc::clone(&b));
        reg.add(recorder(&log, "c"));
        reg.remove(&b);
        reg.add(b);

        assert_eq!(reg.notify(&update()), 0);
        assert_eq!(*log.lock().unwrap(), vec!["a", "c", "b"]);
    }

    #[test]
    fn failing_listeners_do_not_starve_the_rest() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let reg = ListenerRegistry::new();
        reg.add(Arc::new(|_: &DeviceUpdate| -> Result<(), ListenerError> {
            Err("disk full".into())
        }));
        reg.add(Arc::new(|_: &DeviceUpdate| -> Result<(), ListenerError> {
            panic!("listener bug")
        }));
        reg.add(recorder(&log, "last"));

        assert_eq!(reg.notify(&update()), 2);
        assert_eq!(*log.lock().unwrap(), vec!["last"]);
    }

    #[test]
    fn clones_share_membership() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let reg = ListenerRegistry::new();
        let other = reg.clone();
        let a = recorder(&log, "a");
        other.add(Arc::clone(&a));
        assert!(reg.contains(&a));
    }
}
