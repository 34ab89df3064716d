use crate::types::hex;
use crate::{BusInfo, Result, Transport};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

/// Status byte the board places at offset 3 of an accepted reply.
const ACCEPTED: u8 = 0xA5;

#[derive(Debug, Default)]
struct MockState {
    replies: VecDeque<Result<Vec<u8>>>,
    sent: Vec<Vec<u8>>,
    latency: Duration,
}

/// A simple in-process mock bus. Each bus instance is independent.
///
/// Replies are served from a script queued through [`MockHandle`]. Once the
/// script runs dry every request is answered with an all-zero reply of the
/// same length carrying the accepted status, so flows stay testable.
#[derive(Debug)]
pub struct MockTransport {
    name: String,
    state: Arc<Mutex<MockState>>,
}

/// Cloneable view into a [`MockTransport`] that survives moving the transport
/// into a driver.
#[derive(Clone, Debug)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            name: "mock0".to_string(),
            state: Arc::default(),
        }
    }

    pub fn handle(&self) -> MockHandle {
        MockHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHandle {
    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue the bytes returned by the next unanswered exchange.
    pub fn push_reply(&self, reply: impl Into<Vec<u8>>) {
        self.state().replies.push_back(Ok(reply.into()));
    }

    /// Queue a failure for the next unanswered exchange.
    pub fn push_failure(&self, err: crate::TransportError) {
        self.state().replies.push_back(Err(err));
    }

    /// Every request sent so far, oldest first.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.state().sent.clone()
    }

    pub fn clear_sent(&self) {
        self.state().sent.clear();
    }

    /// Delay every later exchange by `latency`, as a slow bus would.
    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = latency;
    }

    /// Number of scripted replies not yet consumed.
    pub fn pending(&self) -> usize {
        self.state().replies.len()
    }
}

impl Transport for MockTransport {
    fn open(name: &str) -> Result<Self> {
        let mut bus = Self::new();
        bus.name = name.to_string();
        Ok(bus)
    }

    fn list() -> Result<Vec<BusInfo>> {
        Ok(vec![BusInfo {
            name: "mock0".to_string(),
            driver: "mock".to_string(),
        }])
    }

    fn exchange(&mut self, request: &[u8], _timeout_ms: Option<u64>) -> Result<Vec<u8>> {
        let (reply, latency) = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.sent.push(request.to_vec());
            let reply = state.replies.pop_front().unwrap_or_else(|| {
                let mut idle = vec![0u8; request.len()];
                if let Some(status) = idle.get_mut(3) {
                    *status = ACCEPTED;
                }
                Ok(idle)
            });
            (reply, state.latency)
        };
        if !latency.is_zero() {
            thread::sleep(latency);
        }
        tracing::trace!(bus = %self.name, tx = %hex(request), "mock exchange");
        reply
    }
}
