//! Stream Thread (§4.1): the long-lived per-stream loop that owns the
//! demuxer, flushes to HLS, remuxes into whatever MP4 recorder is currently
//! registered for this stream, feeds the pre-buffer, and gates detection
//! dispatch. Built on the same `InitializableThread` spawn-with-handshake
//! idiom used for `DetectionWorker`, with the same control flow as an RTMP
//! input thread (`input_loop.rs` / `demux.rs`): validate context, open the
//! input, loop reading packets, reconnect on EOF, exit cooperatively on a
//! handful of flags checked at the
//! top of every iteration.
//!
//! Demuxing is abstracted behind `PacketSource`/`InputOpener` so the loop body
//! can be driven by a scripted fake in tests -- a real RTSP/H.264 source
//! cannot be exercised from a unit test.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::host;
use crate::prelude::*;
use crate::registry::shutdown::{ShutdownCoordinator, ShutdownId, ShutdownKind, ShutdownState, STREAM_THREAD_PRIORITY};
use crate::registry::stream_state::{StreamLifecycle, StreamRuntimeState, StreamStateRegistry};
use crate::thread_utils::{InitializableThread, ThreadMetadata};

use super::detection::DetectionPool;
use super::hls::{self, HlsWriter};
use super::input::{find_audio_stream, find_video_stream, open_input_stream};
use super::mp4::Mp4RecorderRegistry;
use super::prebuffer::PreBuffer;

const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);
const MP4_AUDIO_ERROR_LOG_INTERVAL: Duration = Duration::from_secs(10);

/// One packet read off a live input, already classified. An explicit outcome
/// enum instead of bare success/`Eof`/other-error so the orchestrator's
/// reconnect and skip paths are distinguishable from a fake.
pub enum PacketEvent {
    Packet { packet: Packet, kind: MediaKind },
    /// A packet on a stream index this source doesn't track (e.g. a subtitle
    /// or data stream); drop it and keep reading, no reconnect needed.
    Skip,
    /// End-of-stream or a transient read failure; caller backs off, closes
    /// and reopens the input, and re-resolves stream indices from scratch.
    NeedReconnect,
}

/// A live (or faked) demuxed input. Implementors own whatever state is needed
/// to pull the next packet; `video_descriptor`/`audio_descriptor` reflect the
/// streams discovered at open/reconnect time, fixed for this instance's
/// lifetime (§3 Stream Descriptor).
pub trait PacketSource: Send {
    fn read(&mut self) -> Result<PacketEvent, ffmpeg_next::Error>;
    fn video_descriptor(&self) -> &StreamDescriptor;
    fn audio_descriptor(&self) -> Option<&StreamDescriptor>;
}

/// Opens a fresh `PacketSource` for a URL. Stateless across calls (§4.6) --
/// on reconnect the stream thread calls this again rather than retaining
/// opener state.
pub trait InputOpener: Send + Sync + 'static {
    type Source: PacketSource;

    fn open(&self, url: &str, protocol_hint: Option<&str>) -> Result<Self::Source, StreamThreadError>;
}

/// Real `ffmpeg_next`-backed packet source: owns the demuxer and the two
/// resolved stream indices (§4.1 steps 7-9).
pub struct FfmpegPacketSource {
    input: ffmpeg_next::format::context::Input,
    video_index: usize,
    video_descriptor: StreamDescriptor,
    audio_index: Option<usize>,
    audio_descriptor: Option<StreamDescriptor>,
}

impl PacketSource for FfmpegPacketSource {
    fn read(&mut self) -> Result<PacketEvent, ffmpeg_next::Error> {
        let mut packet = Packet::empty();
        match packet.read(&mut self.input) {
            Ok(()) => {
                let index = packet.stream();
                if index == self.video_index {
                    Ok(PacketEvent::Packet { packet, kind: MediaKind::Video })
                } else if Some(index) == self.audio_index {
                    Ok(PacketEvent::Packet { packet, kind: MediaKind::Audio })
                } else {
                    Ok(PacketEvent::Skip)
                }
            }
            Err(ffmpeg_next::Error::Eof) => Ok(PacketEvent::NeedReconnect),
            Err(err) => Err(err),
        }
    }

    fn video_descriptor(&self) -> &StreamDescriptor {
        &self.video_descriptor
    }

    fn audio_descriptor(&self) -> Option<&StreamDescriptor> {
        self.audio_descriptor.as_ref()
    }
}

/// Real opener, grounded on `pipeline::input::open_input_stream` plus the
/// video/audio resolution steps of §4.1's startup sequence. Carries the
/// owning stream's `ShutdownCoordinator` so a hung connect/probe can be cut
/// short by the ffmpeg interrupt callback once shutdown has been initiated,
/// rather than blocking until the transport's own timeout.
#[derive(Clone, Default)]
pub struct FfmpegInputOpener {
    shutdown: ShutdownCoordinator,
}

impl InputOpener for FfmpegInputOpener {
    type Source = FfmpegPacketSource;

    fn open(&self, url: &str, protocol_hint: Option<&str>) -> Result<Self::Source, StreamThreadError> {
        let shutdown = self.shutdown.clone();
        let input = open_input_stream(url, protocol_hint, move || shutdown.is_shutdown_initiated())?;

        let video_descriptor = {
            let stream = find_video_stream(&input).ok_or_else(|| StreamThreadError::NoVideoStream(url.to_string()))?;
            StreamDescriptor::from_ffmpeg_stream(MediaKind::Video, &stream)
        };
        let audio_descriptor =
            find_audio_stream(&input).map(|stream| StreamDescriptor::from_ffmpeg_stream(MediaKind::Audio, &stream));

        Ok(FfmpegPacketSource {
            video_index: video_descriptor.stream_index,
            audio_index: audio_descriptor.as_ref().map(|d| d.stream_index),
            video_descriptor,
            audio_descriptor,
            input,
        })
    }
}

/// Everything the stream thread needs besides the input itself: the shared
/// registries and the owning stream's identity. Construction is the caller's
/// responsibility; `name` must already be registered in `registry` (§4.1 step
/// 2 resolves, it does not create).
pub struct StreamThreadContext {
    pub name: String,
    pub url: String,
    pub protocol_hint: Option<String>,
    pub hls_output_dir: PathBuf,
    pub registry: StreamStateRegistry,
    pub shutdown: ShutdownCoordinator,
    pub mp4_registry: Mp4RecorderRegistry,
    pub prebuffer: PreBuffer,
    pub detection_pool: Option<DetectionPool>,
}

/// Handle returned once the stream thread has completed startup. Fire-and-
/// forget, matching `InitializableThread::spawn` -- lifecycle from here on is
/// observed through the Shutdown Coordinator and the Stream State Registry,
/// not through joining an OS thread.
pub struct StreamThreadHandle {
    name: String,
    shutdown_id: ShutdownId,
}

impl StreamThreadHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shutdown_id(&self) -> ShutdownId {
        self.shutdown_id
    }
}

struct StreamThreadInitOptions<O: InputOpener> {
    context: StreamThreadContext,
    opener: O,
}

pub struct StreamThread<O: InputOpener> {
    name: String,
    runtime: StreamRuntimeState,
    registry: StreamStateRegistry,
    shutdown: ShutdownCoordinator,
    shutdown_id: ShutdownId,
    mp4_registry: Mp4RecorderRegistry,
    prebuffer: PreBuffer,
    detection_pool: Option<DetectionPool>,
    opener: O,
    url: String,
    protocol_hint: Option<String>,
    source: O::Source,
    hls_writer: Option<HlsWriter>,
    last_mp4_audio_error_log: Option<Instant>,
}

impl<O: InputOpener> InitializableThread for StreamThread<O> {
    type InitOptions = StreamThreadInitOptions<O>;
    type SpawnOutput = StreamThreadHandle;
    type SpawnError = StreamThreadError;

    fn init(options: Self::InitOptions) -> Result<(Self, Self::SpawnOutput), Self::SpawnError> {
        let StreamThreadInitOptions { context, opener } = options;
        let name = context.name;

        let runtime = context
            .registry
            .get_stream_by_name(&name)
            .map_err(|_| StreamThreadError::UnknownStream(name.clone()))?;

        if !runtime.is_running() {
            return Err(StreamThreadError::StoppedBeforeStart(name));
        }

        let config = context
            .registry
            .get_stream_config(&name)
            .map_err(|_| StreamThreadError::UnknownStream(name.clone()))?;

        let source = opener.open(&context.url, context.protocol_hint.as_deref())?;

        let hls_writer = HlsWriter::create(
            &context.hls_output_dir,
            &name,
            config.effective_segment_duration_secs(),
            source.video_descriptor(),
            source.audio_descriptor(),
        )?;

        let shutdown_id = context.shutdown.register(name.clone(), ShutdownKind::StreamThread, STREAM_THREAD_PRIORITY);
        runtime.set_lifecycle(StreamLifecycle::Running);

        let handle = StreamThreadHandle { name: name.clone(), shutdown_id };

        let thread = StreamThread {
            name,
            runtime,
            registry: context.registry,
            shutdown: context.shutdown,
            shutdown_id,
            mp4_registry: context.mp4_registry,
            prebuffer: context.prebuffer,
            detection_pool: context.detection_pool,
            opener,
            url: context.url,
            protocol_hint: context.protocol_hint,
            source,
            hls_writer: Some(hls_writer),
            last_mp4_audio_error_log: None,
        };

        Ok((thread, handle))
    }

    fn run(mut self) {
        self.run_loop();
        self.teardown();
    }

    fn metadata() -> ThreadMetadata {
        ThreadMetadata {
            thread_name: "Stream thread".to_string(),
            thread_instance_name: "Stream".to_string(),
        }
    }
}

impl<O: InputOpener> StreamThread<O> {
    fn should_exit(&self) -> bool {
        !self.runtime.is_running()
            || self.shutdown.is_shutdown_initiated()
            || self.runtime.is_stopping()
            || !self.runtime.callbacks_enabled()
    }

    fn run_loop(&mut self) {
        loop {
            if self.should_exit() {
                break;
            }

            match self.source.read() {
                Ok(PacketEvent::Packet { packet, kind }) => {
                    match kind {
                        MediaKind::Video => self.handle_video_packet(packet),
                        MediaKind::Audio => self.handle_audio_packet(packet),
                    }
                }
                Ok(PacketEvent::Skip) => {}
                Ok(PacketEvent::NeedReconnect) => self.reconnect(),
                Err(err) => {
                    warn!(stream = %self.name, %err, "unrecoverable demuxer error, exiting stream thread");
                    break;
                }
            }
        }
    }

    fn reconnect(&mut self) {
        warn!(stream = %self.name, "input exhausted, reconnecting in 1s");
        std::thread::sleep(RECONNECT_BACKOFF);
        match self.opener.open(&self.url, self.protocol_hint.as_deref()) {
            Ok(source) => self.source = source,
            Err(err) => {
                error!(stream = %self.name, %err, "failed to reopen input, retrying");
                std::thread::sleep(RECONNECT_BACKOFF);
            }
        }
    }

    fn handle_video_packet(&mut self, packet: Packet) {
        let is_keyframe = packet.is_key();
        let now = Instant::now();

        if is_keyframe {
            self.runtime.update_keyframe_time(now);
        }

        if let Some(writer) = self.hls_writer.as_mut() {
            match writer.write_packet(&packet, MediaKind::Video) {
                Ok(()) if is_keyframe => writer.flush(),
                Ok(()) => {}
                Err(err) if is_keyframe => warn!(stream = %self.name, %err, "HLS video write failed"),
                Err(_) => {}
            }
        }

        self.prebuffer.push(PreBufferEntry {
            packet: OwnedPacket::from_ffmpeg(&packet),
            descriptor: self.source.video_descriptor().clone(),
            arrived_at: now,
        });

        self.mp4_registry.with_writer_mut(&self.name, |writer| {
            if let Err(err) = writer.write_packet(&packet, MediaKind::Video) {
                if is_keyframe {
                    warn!(stream = %self.name, %err, "MP4 video write failed");
                }
            }
        });

        if is_keyframe {
            self.maybe_submit_detection(&packet, now);
        }
    }

    fn maybe_submit_detection(&mut self, packet: &Packet, now: Instant) {
        let Ok(config) = self.registry.get_stream_config(&self.name) else {
            return;
        };
        if !config.detection_based_recording {
            return;
        }
        let Some(pool) = self.detection_pool.as_ref() else {
            return;
        };

        let due = match self.runtime.last_detection_time() {
            Some(last) => now.duration_since(last).as_secs_f64() >= config.detection_interval_secs(),
            None => true,
        };
        if !due {
            return;
        }

        if host::is_memory_constrained(config.memory_constrained) && pool.is_busy() {
            debug!(stream = %self.name, "dropping keyframe for detection: pool busy on constrained host");
            return;
        }

        let task = DetectionTask {
            stream_name: self.name.as_str().into(),
            packet: OwnedPacket::from_ffmpeg(packet),
            descriptor: self.source.video_descriptor().clone(),
        };

        match pool.submit(task) {
            Ok(()) => self.runtime.update_last_detection_time(now),
            Err(err) => debug!(stream = %self.name, %err, "detection submission rejected"),
        }
    }

    fn handle_audio_packet(&mut self, packet: Packet) {
        let Ok(config) = self.registry.get_stream_config(&self.name) else {
            return;
        };
        if !config.record_audio {
            return;
        }

        let write_result = self.mp4_registry.with_writer_mut(&self.name, |writer| {
            if !writer.has_audio() {
                return Ok(());
            }
            writer.write_packet(&packet, MediaKind::Audio)
        });

        if let Some(Err(err)) = write_result {
            let should_log = match self.last_mp4_audio_error_log {
                Some(last) => last.elapsed() >= MP4_AUDIO_ERROR_LOG_INTERVAL,
                None => true,
            };
            if should_log {
                warn!(stream = %self.name, %err, "MP4 audio write failed");
                self.last_mp4_audio_error_log = Some(Instant::now());
            }
        }
    }

    fn teardown(mut self) {
        hls::close_if_present(&mut self.hls_writer);
        let _ = self.shutdown.update_state(self.shutdown_id, ShutdownState::Stopped);
        self.runtime.set_lifecycle(StreamLifecycle::Stopped);
        info!(stream = %self.name, "stream thread stopped");
    }
}

/// Spawns the stream thread for `context` against a real `ffmpeg_next` input.
/// `context.name` must already be registered in `context.registry` before
/// calling this (§4.1 step 1-2).
pub fn run_stream_thread(context: StreamThreadContext) -> Result<StreamThreadHandle, StreamThreadError> {
    let opener = FfmpegInputOpener {
        shutdown: context.shutdown.clone(),
    };
    spawn_with_opener(context, opener)
}

fn spawn_with_opener<O: InputOpener>(
    context: StreamThreadContext,
    opener: O,
) -> Result<StreamThreadHandle, StreamThreadError> {
    let instance_id = context.name.clone();
    StreamThread::spawn(instance_id, StreamThreadInitOptions { context, opener })
}
