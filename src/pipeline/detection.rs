//! Detection Dispatcher (§4.5): a fixed-size worker pool fed by a bounded
//! `crossbeam_channel`, built on `InitializableThread` (the same
//! spawn-with-handshake pattern used for other long-lived worker threads). The
//! pool is shared across streams; cadence (how often a given stream is allowed to
//! submit) is the caller's responsibility, enforced against
//! `StreamRuntimeState::last_detection_time`, not this module's.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use tracing::{debug, warn};

use crate::prelude::*;
use crate::thread_utils::InitializableThread;

pub const DEFAULT_WORKER_COUNT: usize = 2;
pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

/// External collaborator that actually runs inference. The dispatcher only
/// hands off decoded task descriptions; it never interprets model output
/// (§4.5).
pub trait DetectionSink: Send + Sync + 'static {
    fn handle(&self, task: DetectionTask);
}

struct PoolState {
    in_flight: AtomicUsize,
    worker_count: usize,
}

/// Handle to the running pool. Cheap to clone; all clones share the same
/// queue and worker threads.
#[derive(Clone)]
pub struct DetectionPool {
    sender: Sender<DetectionTask>,
    state: Arc<PoolState>,
}

impl DetectionPool {
    /// Spawns `worker_count` worker threads reading off a queue bounded at
    /// `queue_capacity`. Workers run until the sender side (and every clone of
    /// this pool) is dropped.
    pub fn start(worker_count: usize, queue_capacity: usize, sink: Arc<dyn DetectionSink>) -> Self {
        let worker_count = worker_count.max(1);
        let (sender, receiver) = crossbeam_channel::bounded(queue_capacity.max(1));
        let state = Arc::new(PoolState {
            in_flight: AtomicUsize::new(0),
            worker_count,
        });

        for worker_id in 0..worker_count {
            let opts = WorkerInitOptions {
                receiver: receiver.clone(),
                sink: sink.clone(),
                state: state.clone(),
            };
            DetectionWorker::spawn(worker_id, opts).expect("detection worker thread never fails to initialize");
        }

        Self { sender, state }
    }

    /// Non-blocking submission (§4.5). Returns `QueueFull` rather than
    /// blocking the stream thread's main loop; returns `PoolClosed` if every
    /// worker has exited.
    pub fn submit(&self, task: DetectionTask) -> Result<(), DetectionSubmitError> {
        match self.sender.try_send(task) {
            Ok(()) => {
                self.state.in_flight.fetch_add(1, Ordering::AcqRel);
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(DetectionSubmitError::QueueFull),
            Err(TrySendError::Disconnected(_)) => Err(DetectionSubmitError::PoolClosed),
        }
    }

    /// True when every worker currently has a task in flight. Used to gate
    /// detection submission on memory-constrained hosts (§4.1 step 6).
    pub fn is_busy(&self) -> bool {
        self.state.in_flight.load(Ordering::Acquire) >= self.state.worker_count
    }
}

struct WorkerInitOptions {
    receiver: Receiver<DetectionTask>,
    sink: Arc<dyn DetectionSink>,
    state: Arc<PoolState>,
}

struct DetectionWorker {
    receiver: Receiver<DetectionTask>,
    sink: Arc<dyn DetectionSink>,
    state: Arc<PoolState>,
}

#[derive(Debug, thiserror::Error)]
#[error("detection worker failed to initialize")]
struct WorkerInitError;

impl InitializableThread for DetectionWorker {
    type InitOptions = WorkerInitOptions;
    type SpawnOutput = ();
    type SpawnError = WorkerInitError;

    fn init(options: Self::InitOptions) -> Result<(Self, Self::SpawnOutput), Self::SpawnError> {
        Ok((
            Self {
                receiver: options.receiver,
                sink: options.sink,
                state: options.state,
            },
            (),
        ))
    }

    fn run(self) {
        for task in self.receiver.iter() {
            let stream_name = task.stream_name.clone();
            self.sink.handle(task);
            self.state.in_flight.fetch_sub(1, Ordering::AcqRel);
            debug!(stream = %stream_name, "detection task handled");
        }
        warn!("detection worker exiting: queue closed");
    }

    fn metadata() -> crate::thread_utils::ThreadMetadata {
        crate::thread_utils::ThreadMetadata {
            thread_name: "Detection worker".to_string(),
            thread_instance_name: "Worker".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MediaKind, OwnedPacket, StreamDescriptor};
    use bytes::Bytes;
    use ffmpeg_next::{codec::Id, Rational};
    use std::sync::Mutex;
    use std::time::Duration;

    struct RecordingSink {
        seen: Mutex<Vec<Arc<str>>>,
    }

    impl DetectionSink for RecordingSink {
        fn handle(&self, task: DetectionTask) {
            std::thread::sleep(Duration::from_millis(20));
            self.seen.lock().unwrap().push(task.stream_name);
        }
    }

    fn task(name: &str) -> DetectionTask {
        DetectionTask {
            stream_name: Arc::from(name),
            packet: OwnedPacket {
                payload: Bytes::from_static(b"frame"),
                pts: Some(0),
                dts: Some(0),
                is_keyframe: true,
            },
            descriptor: StreamDescriptor {
                kind: MediaKind::Video,
                stream_index: 0,
                time_base: Rational::new(1, 90_000),
                codec_id: Id::H264,
                extradata: None,
            },
        }
    }

    #[test]
    fn submitted_tasks_reach_the_sink() {
        let sink = Arc::new(RecordingSink { seen: Mutex::new(Vec::new()) });
        let pool = DetectionPool::start(1, 4, sink.clone());
        pool.submit(task("cam-a")).unwrap();
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(sink.seen.lock().unwrap().as_slice(), &[Arc::from("cam-a")]);
    }

    #[test]
    fn submit_fails_once_queue_is_full() {
        let sink = Arc::new(RecordingSink { seen: Mutex::new(Vec::new()) });
        // A single slow worker and a zero-slack queue lets us force `Full`.
        let pool = DetectionPool::start(1, 1, sink);
        pool.submit(task("cam-a")).unwrap();
        pool.submit(task("cam-a")).unwrap();
        let result = pool.submit(task("cam-a"));
        assert!(matches!(result, Err(DetectionSubmitError::QueueFull)));
    }

    #[test]
    fn is_busy_reflects_in_flight_count_against_worker_count() {
        let sink = Arc::new(RecordingSink { seen: Mutex::new(Vec::new()) });
        let pool = DetectionPool::start(1, 4, sink);
        assert!(!pool.is_busy());
        pool.submit(task("cam-a")).unwrap();
        assert!(pool.is_busy());
        std::thread::sleep(Duration::from_millis(100));
        assert!(!pool.is_busy());
    }
}
