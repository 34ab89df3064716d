//! Background polling of every configured device.
//!
//! The pump owns two threads. The worker waits on the shared [`Schedule`],
//! reads each configured port through the [`Brick`] and forwards every
//! successful reading over a channel. The notifier drains that channel into
//! the [`ListenerRegistry`], so slow listeners never hold the bus lock.

use crate::brick::Brick;
use crate::listeners::ListenerRegistry;
use crate::motors::MotorStatus;
use crate::sensors::SensorSample;
use crate::types::{MotorPort, Port};
use serde::{Deserialize, Serialize};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

/// What one device read produced.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "device", rename_all = "snake_case")]
pub enum DeviceReading {
    Sensor(SensorSample),
    Motor { port: MotorPort, status: MotorStatus },
}

impl DeviceReading {
    pub fn port(&self) -> Port {
        match self {
            DeviceReading::Sensor(sample) => Port::Sensor(sample.port),
            DeviceReading::Motor { port, .. } => Port::Motor(*port),
        }
    }
}

/// A reading stamped with the time the pump took it.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceUpdate {
    pub at: OffsetDateTime,
    pub reading: DeviceReading,
}

impl DeviceUpdate {
    pub fn new(reading: DeviceReading) -> Self {
        Self {
            at: OffsetDateTime::now_utc(),
            reading,
        }
    }

    pub fn port(&self) -> Port {
        self.reading.port()
    }

    pub fn timestamp(&self) -> String {
        self.at.format(&Rfc3339).unwrap_or_else(|_| self.at.to_string())
    }
}

#[derive(Debug, Default)]
struct ScheduleState {
    interval_ms: i64,
    poked: bool,
    stopping: bool,
}

/// Polling interval plus the wake-ups that go with it.
///
/// Shared between a [`Brick`] (which pokes it when motors are configured) and
/// the pump worker (which waits on it).
#[derive(Debug, Default)]
pub(crate) struct Schedule {
    state: Mutex<ScheduleState>,
    wake: Condvar,
}

impl Schedule {
    pub(crate) fn new(interval_ms: i64) -> Self {
        Self {
            state: Mutex::new(ScheduleState {
                interval_ms,
                ..ScheduleState::default()
            }),
            wake: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ScheduleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn interval_ms(&self) -> i64 {
        self.lock().interval_ms
    }

    /// Takes effect immediately; a waiting worker recomputes its deadline.
    pub(crate) fn set_interval_ms(&self, interval_ms: i64) {
        self.lock().interval_ms = interval_ms;
        self.wake.notify_all();
    }

    /// Run the next tick now. Ignored while paused.
    pub(crate) fn poke(&self) {
        let mut state = self.lock();
        if state.interval_ms > 0 {
            state.poked = true;
            self.wake.notify_all();
        }
    }

    fn request_stop(&self) {
        self.lock().stopping = true;
        self.wake.notify_all();
    }

    fn clear_stop(&self) {
        self.lock().stopping = false;
    }

    /// Block until the next tick is due. Returns `false` once a stop was
    /// requested.
    fn wait_for_tick(&self) -> bool {
        let started = Instant::now();
        let mut state = self.lock();
        loop {
            if state.stopping {
                return false;
            }
            if state.interval_ms <= 0 {
                state.poked = false;
                state = self
                    .wake
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
                continue;
            }
            if state.poked {
                state.poked = false;
                return true;
            }
            let interval = Duration::from_millis(state.interval_ms.unsigned_abs());
            let elapsed = started.elapsed();
            if elapsed >= interval {
                return true;
            }
            state = self
                .wake
                .wait_timeout(state, interval - elapsed)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    ticks: AtomicU64,
    delivered: AtomicU64,
    skipped: AtomicU64,
}

/// Counters since the pump was created.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct PumpStats {
    /// Completed passes over the registry.
    pub ticks: u64,
    /// Readings handed to the notifier.
    pub delivered: u64,
    /// Device reads that failed and were skipped.
    pub skipped: u64,
}

/// Periodic poller that reads every configured device and notifies listeners.
///
/// One pump per [`Brick`]. The pump starts paused when the brick's update
/// interval is zero or negative; see [`Brick::set_update_interval_ms`].
pub struct UpdatePump {
    brick: Brick,
    listeners: ListenerRegistry,
    counters: Arc<Counters>,
    worker: Option<JoinHandle<()>>,
    notifier: Option<JoinHandle<()>>,
}

impl UpdatePump {
    pub fn new(brick: Brick, listeners: ListenerRegistry) -> Self {
        Self {
            brick,
            listeners,
            counters: Arc::default(),
            worker: None,
            notifier: None,
        }
    }

    pub fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }

    pub fn brick(&self) -> &Brick {
        &self.brick
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Spawn the worker and notifier threads. A no-op when already running.
    pub fn start(&mut self) -> io::Result<()> {
        if self.is_running() {
            return Ok(());
        }
        let schedule = self.brick.schedule();
        schedule.clear_stop();

        let (tx, rx) = mpsc::channel::<DeviceUpdate>();
        let listeners = self.listeners.clone();
        let notifier = thread::Builder::new()
            .name("bp-notify".into())
            .spawn(move || {
                for update in rx {
                    listeners.notify(&update);
                }
            })?;

        let brick = self.brick.clone();
        let counters = Arc::clone(&self.counters);
        let worker = thread::Builder::new()
            .name("bp-update-pump".into())
            .spawn(move || {
                while schedule.wait_for_tick() {
                    if !run_tick(&brick, &tx, &counters) {
                        break;
                    }
                }
                debug!("update pump worker exiting");
            });
        let worker = match worker {
            Ok(handle) => handle,
            Err(e) => {
                // Dropping the sender ends the notifier
                let _ = notifier.join();
                return Err(e);
            }
        };

        info!(interval_ms = self.brick.update_interval_ms(), "update pump started");
        self.worker = Some(worker);
        self.notifier = Some(notifier);
        Ok(())
    }

    /// Stop both threads and wait for them. Updates already queued are still
    /// delivered before this returns.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.brick.schedule().request_stop();
        if worker.join().is_err() {
            warn!("update pump worker panicked");
        }
        if let Some(notifier) = self.notifier.take() {
            if notifier.join().is_err() {
                warn!("listener notifier panicked");
            }
        }
        info!("update pump stopped");
    }

    /// Run one pass synchronously on the calling thread, notifying listeners
    /// inline.
    pub fn tick(&self) -> PumpStats {
        let (tx, rx) = mpsc::channel();
        run_tick(&self.brick, &tx, &self.counters);
        drop(tx);
        for update in rx {
            self.listeners.notify(&update);
        }
        self.stats()
    }

    pub fn stats(&self) -> PumpStats {
        PumpStats {
            ticks: self.counters.ticks.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
        }
    }
}

impl Drop for UpdatePump {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Read every configured port once. Returns `false` when nobody is listening
/// on the channel any more.
fn run_tick(brick: &Brick, tx: &Sender<DeviceUpdate>, counters: &Counters) -> bool {
    for port in brick.configured_ports() {
        match brick.read_device(port) {
            Ok(reading) => {
                if tx.send(DeviceUpdate::new(reading)).is_err() {
                    return false;
                }
                counters.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                counters.skipped.fetch_add(1, Ordering::Relaxed);
                if let Some(m) = brick.metrics() {
                    m.skipped_reads.inc();
                }
                warn!(%port, error = %e, "device read skipped");
            }
        }
    }
    counters.ticks.fetch_add(1, Ordering::Relaxed);
    if let Some(m) = brick.metrics() {
        m.pump_ticks.inc();
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrickSettings;
    use crate::listeners::{ListenerError, UpdateListener};
    use crate::types::{SensorPort, SensorType};
    use bus_transport::{MockHandle, MockTransport, TransportError};
    use std::sync::mpsc::Receiver;

    fn touch_brick() -> (Brick, MockHandle) {
        let bus = MockTransport::new();
        let handle = bus.handle();
        let brick = Brick::new(bus, BrickSettings::default());
        brick
            .configure_sensor(SensorPort::S1, SensorType::Touch)
            .unwrap();
        handle.clear_sent();
        (brick, handle)
    }

    fn channel_listener() -> (Arc<dyn UpdateListener>, Receiver<DeviceUpdate>) {
        let (tx, rx) = mpsc::channel();
        let listener: Arc<dyn UpdateListener> =
            Arc::new(move |u: &DeviceUpdate| -> Result<(), ListenerError> {
                tx.send(u.clone())?;
                Ok(())
            });
        (listener, rx)
    }

    #[test]
    fn zero_interval_never_ticks() {
        let (brick, handle) = touch_brick();
        let mut pump = UpdatePump::new(brick.clone(), ListenerRegistry::new());
        pump.start().unwrap();
        thread::sleep(Duration::from_millis(60));
        brick.poke();
        thread::sleep(Duration::from_millis(60));
        pump.stop();
        assert_eq!(pump.stats().ticks, 0);
        assert!(handle.sent().is_empty());
    }

    #[test]
    fn positive_interval_delivers_updates() {
        let (brick, _handle) = touch_brick();
        let listeners = ListenerRegistry::new();
        let (listener, rx) = channel_listener();
        listeners.add(listener);

        let mut pump = UpdatePump::new(brick.clone(), listeners);
        pump.start().unwrap();
        assert!(pump.is_running());
        brick.set_update_interval_ms(5);

        let update = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(update.port(), Port::Sensor(SensorPort::S1));
        assert!(matches!(update.reading, DeviceReading::Sensor(ref s) if s.is_fresh()));

        pump.stop();
        assert!(!pump.is_running());
        assert!(pump.stats().ticks >= 1);
    }

    fn wait_for(pump: &UpdatePump, done: impl Fn(PumpStats) -> bool) -> PumpStats {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let stats = pump.stats();
            if done(stats) || Instant::now() >= deadline {
                return stats;
            }
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn restarts_after_stop_and_pauses_at_zero_interval() {
        let (brick, _handle) = touch_brick();
        brick.set_update_interval_ms(5);
        let mut pump = UpdatePump::new(brick.clone(), ListenerRegistry::new());

        pump.start().unwrap();
        let first = wait_for(&pump, |s| s.ticks >= 2);
        assert!(first.ticks >= 2);
        pump.stop();
        let stopped = pump.stats().ticks;
        thread::sleep(Duration::from_millis(30));
        assert_eq!(pump.stats().ticks, stopped);

        pump.start().unwrap();
        assert!(pump.is_running());
        let resumed = wait_for(&pump, |s| s.ticks >= stopped + 2);
        assert!(resumed.ticks >= stopped + 2);

        brick.set_update_interval_ms(0);
        // Let a pass already under way finish
        thread::sleep(Duration::from_millis(30));
        let paused = pump.stats().ticks;
        thread::sleep(Duration::from_millis(80));
        assert_eq!(pump.stats().ticks, paused);
        assert!(pump.is_running());

        pump.stop();
        assert!(!pump.is_running());
    }

    #[test]
    fn stop_lets_an_in_flight_tick_finish() {
        let (brick, handle) = touch_brick();
        let listeners = ListenerRegistry::new();
        let (listener, rx) = channel_listener();
        listeners.add(listener);
        handle.set_latency(Duration::from_millis(150));
        brick.set_update_interval_ms(5);

        let mut pump = UpdatePump::new(brick, listeners);
        pump.start().unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while handle.sent().is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(pump.stats().ticks, 0);

        pump.stop();
        let stats = pump.stats();
        assert_eq!(stats.ticks, 1);
        assert_eq!(stats.delivered, 1);
        assert_eq!(handle.sent().len(), 1);
        // Delivered before stop returned
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn failed_reads_are_skipped() {
        let (brick, handle) = touch_brick();
        let listeners = ListenerRegistry::new();
        let (listener, rx) = channel_listener();
        listeners.add(listener);
        let pump = UpdatePump::new(brick, listeners);

        handle.push_failure(TransportError::Timeout);
        let stats = pump.tick();
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.delivered, 0);
        assert!(rx.try_recv().is_err());

        let stats = pump.tick();
        assert_eq!(stats.ticks, 2);
        assert_eq!(stats.delivered, 1);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn poke_is_ignored_while_paused() {
        let schedule = Arc::new(Schedule::new(0));
        schedule.poke();
        schedule.set_interval_ms(10_000);
        let waiter = Arc::clone(&schedule);
        let handle = thread::spawn(move || waiter.wait_for_tick());
        thread::sleep(Duration::from_millis(30));
        // Still waiting: the earlier poke did not carry over
        assert!(!handle.is_finished());
        schedule.request_stop();
        assert!(!handle.join().unwrap());
    }

    #[test]
    fn poke_runs_the_next_tick_early() {
        let schedule = Arc::new(Schedule::new(10_000));
        let waiter = Arc::clone(&schedule);
        let started = Instant::now();
        let handle = thread::spawn(move || waiter.wait_for_tick());
        thread::sleep(Duration::from_millis(20));
        schedule.poke();
        assert!(handle.join().unwrap());
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(schedule.interval_ms(), 10_000);
    }

    #[test]
    fn updates_serialize_with_device_tag() {
        let update = DeviceUpdate::new(DeviceReading::Motor {
            port: MotorPort::C,
            status: MotorStatus {
                state: 0,
                power: 10,
                position: 42,
                dps: -3,
            },
        });
        let json = serde_json::to_value(&update.reading).unwrap();
        assert_eq!(json["device"], "motor");
        assert_eq!(json["status"]["position"], 42);
        assert!(update.timestamp().contains('T'));
    }
}
