//! Process-wide shutdown registry (§4.7). Same `Arc<Mutex<HashMap<K, V>>>`
//! newtype-registry idiom used elsewhere in this codebase for per-name state
//! (`RtmpInputsState`-style), generalized to track arbitrary components
//! instead of just inputs.
//!
//! Priority convention (see DESIGN.md for the reasoning): lower `priority` value
//! means "stopped later". Only `ShutdownKind::StreamThread` is registered in
//! practice (see DESIGN.md for why the HLS writer, MP4 writer and detection
//! pool don't get their own records), so `STREAM_THREAD_PRIORITY` is the only
//! priority constant this crate assigns; the field stays `u8` rather than a
//! single fixed value so a future kind can slot in at a lower number.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::warn;

use crate::prelude::*;

pub const STREAM_THREAD_PRIORITY: u8 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShutdownId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownKind {
    StreamThread,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    Stopping,
    Stopped,
}

#[derive(Debug, Clone)]
struct ComponentRecord {
    name: Arc<str>,
    kind: ShutdownKind,
    priority: u8,
    state: ShutdownState,
}

#[derive(Clone, Default)]
pub struct ShutdownCoordinator {
    inner: Arc<ShutdownInner>,
}

#[derive(Default)]
struct ShutdownInner {
    next_id: AtomicU64,
    initiated: AtomicBool,
    components: Mutex<HashMap<ShutdownId, ComponentRecord>>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: impl Into<Arc<str>>, kind: ShutdownKind, priority: u8) -> ShutdownId {
        let id = ShutdownId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let record = ComponentRecord {
            name: name.into(),
            kind,
            priority,
            state: ShutdownState::Running,
        };
        self.inner.components.lock().unwrap().insert(id, record);
        id
    }

    pub fn update_state(&self, id: ShutdownId, state: ShutdownState) -> Result<(), ShutdownError> {
        let mut guard = self.inner.components.lock().unwrap();
        let record = guard.get_mut(&id).ok_or(ShutdownError::UnknownComponent(id.0))?;
        record.state = state;
        Ok(())
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.inner.initiated.load(Ordering::Acquire)
    }

    pub fn initiate_shutdown(&self) {
        self.inner.initiated.store(true, Ordering::Release);
    }

    /// Blocks (polling) until every registered component reports `Stopped`,
    /// processed in ascending priority order so that the caller can observe
    /// "all producers are down" before the lowest-priority drains (HLS writers)
    /// are expected to finish. Returns once everything is stopped or the
    /// deadline passes.
    pub fn wait_for_all(&self, timeout: Duration) -> Result<(), ShutdownError> {
        let deadline = Instant::now() + timeout;
        loop {
            let mut remaining: Vec<(u8, Arc<str>)> = {
                let guard = self.inner.components.lock().unwrap();
                guard
                    .values()
                    .filter(|r| r.state != ShutdownState::Stopped)
                    .map(|r| (r.priority, r.name.clone()))
                    .collect()
            };
            if remaining.is_empty() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                remaining.sort_by_key(|(priority, _)| *priority);
                let (_, name) = remaining.remove(0);
                warn!(component = %name, "shutdown wait timed out");
                return Err(ShutdownError::WaitTimeout(name.to_string()));
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[cfg(test)]
    fn state_of(&self, id: ShutdownId) -> Option<ShutdownState> {
        self.inner.components.lock().unwrap().get(&id).map(|r| r.state)
    }
}
