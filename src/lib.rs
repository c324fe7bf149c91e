pub mod config;
pub mod error;
pub mod host;
pub mod logger;
pub mod pipeline;
pub mod registry;
mod thread_utils;
pub mod types;

mod prelude;

pub use config::{PipelineConfig, StreamConfig};
pub use pipeline::detection::{DetectionPool, DetectionSink};
pub use pipeline::mp4::Mp4RecorderRegistry;
pub use pipeline::prebuffer::PreBuffer;
pub use pipeline::stream_thread::{run_stream_thread, StreamThreadContext, StreamThreadHandle};
pub use registry::shutdown::{ShutdownCoordinator, ShutdownKind, ShutdownState};
pub use registry::stream_state::{StreamRuntimeState, StreamStateRegistry};
pub use types::{DetectionTask, OwnedPacket, Packet, StreamDescriptor};
