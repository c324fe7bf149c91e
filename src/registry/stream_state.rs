//! Stream State Registry (§4.8): named lookup of runtime state and config
//! snapshots. Same `Arc<Mutex<HashMap<...>>>` registry idiom as the shutdown
//! coordinator, with the cheap per-stream flags (`running`, `callbacks_enabled`)
//! split out as atomics so the stream thread's hot-path checks never take a
//! lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamLifecycle {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// The mutable parts of a stream's runtime state. Lifecycle and timestamps live
/// behind a mutex because they change together and are read as a group; the two
/// boolean flags are atomics so the stream thread can poll them every loop
/// iteration without contention.
struct RuntimeStateInner {
    lifecycle: Mutex<StreamLifecycle>,
    last_keyframe: Mutex<Option<Instant>>,
    last_detection: Mutex<Option<Instant>>,
    running: AtomicBool,
    callbacks_enabled: AtomicBool,
}

#[derive(Clone)]
pub struct StreamRuntimeState {
    inner: Arc<RuntimeStateInner>,
}

impl StreamRuntimeState {
    fn new() -> Self {
        Self {
            inner: Arc::new(RuntimeStateInner {
                lifecycle: Mutex::new(StreamLifecycle::Idle),
                last_keyframe: Mutex::new(None),
                last_detection: Mutex::new(None),
                running: AtomicBool::new(true),
                callbacks_enabled: AtomicBool::new(true),
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    pub fn clear_running(&self) {
        self.inner.running.store(false, Ordering::Release);
    }

    pub fn callbacks_enabled(&self) -> bool {
        self.inner.callbacks_enabled.load(Ordering::Acquire)
    }

    pub fn set_callbacks_enabled(&self, enabled: bool) {
        self.inner.callbacks_enabled.store(enabled, Ordering::Release);
    }

    pub fn lifecycle(&self) -> StreamLifecycle {
        *self.inner.lifecycle.lock().unwrap()
    }

    pub fn set_lifecycle(&self, lifecycle: StreamLifecycle) {
        *self.inner.lifecycle.lock().unwrap() = lifecycle;
    }

    pub fn is_stopping(&self) -> bool {
        matches!(self.lifecycle(), StreamLifecycle::Stopping | StreamLifecycle::Stopped)
    }

    pub fn last_keyframe_time(&self) -> Option<Instant> {
        *self.inner.last_keyframe.lock().unwrap()
    }

    /// Updates the last-keyframe timestamp. Called only by the owning stream
    /// thread; monotonic because `Instant::now()` is monotonic and this is the
    /// sole writer.
    pub fn update_keyframe_time(&self, at: Instant) {
        *self.inner.last_keyframe.lock().unwrap() = Some(at);
    }

    pub fn last_detection_time(&self) -> Option<Instant> {
        *self.inner.last_detection.lock().unwrap()
    }

    /// Updates the last-detection timestamp. Must be called only after a
    /// successful submission (invariant #4).
    pub fn update_last_detection_time(&self, at: Instant) {
        *self.inner.last_detection.lock().unwrap() = Some(at);
    }
}

struct StreamEntry {
    config: Arc<StreamConfig>,
    runtime: StreamRuntimeState,
}

#[derive(Clone, Default)]
pub struct StreamStateRegistry {
    streams: Arc<Mutex<HashMap<String, StreamEntry>>>,
}

impl StreamStateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, config: StreamConfig) -> Result<StreamRuntimeState, StreamRegistryError> {
        let mut guard = self.streams.lock().unwrap();
        if guard.contains_key(&config.name) {
            return Err(StreamRegistryError::AlreadyRegistered(config.name));
        }
        let runtime = StreamRuntimeState::new();
        guard.insert(
            config.name.clone(),
            StreamEntry {
                config: Arc::new(config),
                runtime: runtime.clone(),
            },
        );
        Ok(runtime)
    }

    pub fn unregister(&self, name: &str) {
        self.streams.lock().unwrap().remove(name);
    }

    /// Returns the runtime state handle for a stream by name (§4.8
    /// `get_stream_by_name`, minus the opaque C handle -- in Rust the runtime
    /// state handle itself plays that role).
    pub fn get_stream_by_name(&self, name: &str) -> Result<StreamRuntimeState, StreamRegistryError> {
        let guard = self.streams.lock().unwrap();
        guard
            .get(name)
            .map(|entry| entry.runtime.clone())
            .ok_or_else(|| StreamRegistryError::NotFound(name.to_string()))
    }

    /// Returns a consistent snapshot of the stream's configuration as of this
    /// call; concurrent config edits (e.g. toggling `record_audio`) are visible
    /// to the next call, not retroactively to callers holding an earlier
    /// snapshot.
    pub fn get_stream_config(&self, name: &str) -> Result<Arc<StreamConfig>, StreamRegistryError> {
        let guard = self.streams.lock().unwrap();
        guard
            .get(name)
            .map(|entry| entry.config.clone())
            .ok_or_else(|| StreamRegistryError::NotFound(name.to_string()))
    }

    /// Replaces the stored config snapshot for a running stream, e.g. a live
    /// `record_audio` toggle.
    pub fn update_stream_config(&self, name: &str, config: StreamConfig) -> Result<(), StreamRegistryError> {
        let mut guard = self.streams.lock().unwrap();
        let entry = guard
            .get_mut(name)
            .ok_or_else(|| StreamRegistryError::NotFound(name.to_string()))?;
        entry.config = Arc::new(config);
        Ok(())
    }

    pub fn is_stream_state_stopping(&self, state: &StreamRuntimeState) -> bool {
        state.is_stopping()
    }

    pub fn are_stream_callbacks_enabled(&self, state: &StreamRuntimeState) -> bool {
        state.callbacks_enabled()
    }

    pub fn get_detection_interval(&self, name: &str) -> Result<f64, StreamRegistryError> {
        Ok(self.get_stream_config(name)?.detection_interval_secs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config(name: &str) -> StreamConfig {
        StreamConfig {
            name: name.to_string(),
            url: "rtsp://example.invalid/cam".to_string(),
            protocol: None,
            segment_duration: None,
            record_audio: false,
            detection_based_recording: false,
            detection_model: None,
            detection_threshold: None,
            detection_interval: Some(5.0),
            memory_constrained: false,
        }
    }

    #[test]
    fn register_then_lookup_round_trips() {
        let registry = StreamStateRegistry::new();
        registry.register(sample_config("cam-a")).unwrap();
        let state = registry.get_stream_by_name("cam-a").unwrap();
        assert!(state.is_running());
    }

    #[test]
    fn double_registration_is_rejected() {
        let registry = StreamStateRegistry::new();
        registry.register(sample_config("cam-a")).unwrap();
        let err = registry.register(sample_config("cam-a")).unwrap_err();
        assert!(matches!(err, StreamRegistryError::AlreadyRegistered(_)));
    }

    #[test]
    fn unknown_stream_lookup_fails() {
        let registry = StreamStateRegistry::new();
        assert!(matches!(
            registry.get_stream_by_name("ghost"),
            Err(StreamRegistryError::NotFound(_))
        ));
    }

    #[test]
    fn keyframe_time_updates_are_visible_through_clones() {
        let registry = StreamStateRegistry::new();
        registry.register(sample_config("cam-a")).unwrap();
        let state = registry.get_stream_by_name("cam-a").unwrap();
        assert!(state.last_keyframe_time().is_none());
        let now = Instant::now();
        state.update_keyframe_time(now);
        assert_eq!(state.last_keyframe_time(), Some(now));
    }

    #[test]
    fn config_update_is_visible_to_new_snapshots_only() {
        let registry = StreamStateRegistry::new();
        registry.register(sample_config("cam-a")).unwrap();
        let before = registry.get_stream_config("cam-a").unwrap();
        assert!(!before.record_audio);

        let mut updated = sample_config("cam-a");
        updated.record_audio = true;
        registry.update_stream_config("cam-a", updated).unwrap();

        assert!(!before.record_audio, "existing snapshot is unaffected");
        let after = registry.get_stream_config("cam-a").unwrap();
        assert!(after.record_audio);
    }

    #[test]
    fn detection_interval_defaults_when_unset() {
        let registry = StreamStateRegistry::new();
        let mut cfg = sample_config("cam-a");
        cfg.detection_interval = None;
        registry.register(cfg).unwrap();
        assert_eq!(registry.get_detection_interval("cam-a").unwrap(), 1.0);
    }
}
