//! MP4 Recorder (§4.3): an `ffmpeg_next` muxer against the `mp4` output
//! format with `movflags faststart`, rename-existing-file-on-collision before
//! opening a new one, and direct `codecpar` field writes for extradata.
//!
//! An encoder-backed mp4 writer would receive already-timestamped chunks on a
//! channel and rebase PTS/DTS from an arbitrary start to zero. This recorder
//! instead remuxes packets straight from the demuxer (no transcoding, §1
//! Non-goals) so there is no PTS rebasing to do; what it adds over a plain
//! muxer wrapper is segment rotation, since a continuously running camera
//! cannot be muxed into a single unbounded mp4 file (§4.3 step on segment
//! rollover).

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use ffmpeg_next::{self as ffmpeg, format::context};
use tracing::{error, warn};

use crate::prelude::*;

pub struct Mp4Writer {
    output_ctx: context::Output,
    video_stream_index: usize,
    audio_stream_index: Option<usize>,
    current_path: PathBuf,
    seen_keyframe: bool,
}

/// Whether a packet should be admitted to the segment given whether a video
/// keyframe has been seen yet. Every packet before the first video keyframe is
/// dropped -- video or audio -- so the segment is playable from its first frame
/// (§4.3).
fn admits_packet(seen_keyframe: bool, kind: MediaKind, is_keyframe: bool) -> bool {
    seen_keyframe || (kind == MediaKind::Video && is_keyframe)
}

fn ensure_directory_writable(dir: &Path) -> Result<(), Mp4WriterError> {
    if !dir.is_dir() {
        return Err(Mp4WriterError::DirectoryNotWritable(dir.to_path_buf()));
    }
    let probe = dir.join(".write_probe");
    match fs::write(&probe, b"") {
        Ok(()) => {
            let _ = fs::remove_file(&probe);
            Ok(())
        }
        Err(_) => Err(Mp4WriterError::DirectoryNotWritable(dir.to_path_buf())),
    }
}

/// Renames an existing file at `path` out of the way instead of overwriting it.
fn make_room_for(path: &Path) {
    if !path.exists() {
        return;
    }
    let mut old_index = 0u32;
    let renamed = loop {
        let candidate = PathBuf::from(format!("{}.old.{}", path.to_string_lossy(), old_index));
        if !candidate.exists() {
            break candidate;
        }
        old_index += 1;
    };
    warn!(path = %path.display(), renamed = %renamed.display(), "mp4 output path already exists, renaming");
    if let Err(err) = fs::rename(path, &renamed) {
        error!(%err, "failed to rename existing mp4 output file");
    }
}

fn segment_path(output_dir: &Path, name: &str, segment_index: u64) -> PathBuf {
    output_dir.join(format!("{name}-{segment_index:06}.mp4"))
}

impl Mp4Writer {
    /// Opens a new mp4 segment file for `name` at `segment_index` inside
    /// `output_dir`. `audio` is only present when the stream's config has
    /// `record_audio` set (§4.3).
    pub fn create(
        output_dir: &Path,
        name: &str,
        segment_index: u64,
        video: &StreamDescriptor,
        audio: Option<&StreamDescriptor>,
    ) -> Result<Self, Mp4WriterError> {
        ensure_directory_writable(output_dir)?;
        let path = segment_path(output_dir, name, segment_index);
        make_room_for(&path);

        let mut output_ctx = ffmpeg::format::output_as(&path, "mp4").map_err(|source| Mp4WriterError::MuxerInit {
            path: path.clone(),
            source,
        })?;

        let video_stream_index = {
            let mut stream = output_ctx.add_stream(video.codec_id).map_err(|source| Mp4WriterError::MuxerInit {
                path: path.clone(),
                source,
            })?;
            stream.set_time_base(video.time_base);
            copy_codec_parameters(&mut stream, video);
            stream.index()
        };

        let audio_stream_index = match audio {
            Some(descriptor) => {
                let mut stream =
                    output_ctx
                        .add_stream(descriptor.codec_id)
                        .map_err(|source| Mp4WriterError::MuxerInit {
                            path: path.clone(),
                            source,
                        })?;
                stream.set_time_base(descriptor.time_base);
                copy_codec_parameters(&mut stream, descriptor);
                Some(stream.index())
            }
            None => None,
        };

        let options = ffmpeg::Dictionary::from_iter([("movflags", "faststart")]);
        output_ctx
            .write_header_with(options)
            .map_err(|source| Mp4WriterError::MuxerInit {
                path: path.clone(),
                source,
            })?;

        Ok(Self {
            output_ctx,
            video_stream_index,
            audio_stream_index,
            current_path: path,
            seen_keyframe: false,
        })
    }

    pub fn current_path(&self) -> &Path {
        &self.current_path
    }

    pub fn has_audio(&self) -> bool {
        self.audio_stream_index.is_some()
    }

    /// Writes one packet, remapping it onto this segment's stream index.
    /// Packets arriving before this segment's first video keyframe are
    /// silently dropped (§4.3) so the segment is playable from its first
    /// frame. Toggling `record_audio` takes effect on the next segment
    /// rollover, not mid-segment, so the caller is expected to check
    /// `has_audio` before calling this with an audio packet (§4.3, §6
    /// `write_packet`).
    pub fn write_packet(&mut self, packet: &Packet, kind: MediaKind) -> Result<(), Mp4WriterError> {
        if !admits_packet(self.seen_keyframe, kind, packet.is_key()) {
            return Ok(());
        }
        self.seen_keyframe = true;

        let stream_index = match kind {
            MediaKind::Video => self.video_stream_index,
            MediaKind::Audio => self.audio_stream_index.ok_or(Mp4WriterError::AudioNotEnabled)?,
        };
        let mut out = packet.clone();
        out.set_stream(stream_index);
        out.write_interleaved(&mut self.output_ctx)
            .map_err(|source| Mp4WriterError::MuxerInit {
                path: self.current_path.clone(),
                source,
            })
    }

    /// Finalizes this segment's moov atom. Errors are logged, not propagated --
    /// a failed trailer write on one segment should not prevent the next
    /// segment from opening (§4.3, §7).
    pub fn close(mut self) {
        if let Err(err) = self.output_ctx.write_trailer() {
            error!(%err, path = %self.current_path.display(), "failed to write mp4 trailer");
        }
    }
}

fn copy_codec_parameters(stream: &mut ffmpeg::format::stream::StreamMut<'_>, descriptor: &StreamDescriptor) {
    let codecpar = unsafe { &mut *(*stream.as_mut_ptr()).codecpar };
    codecpar.codec_id = descriptor.codec_id.into();
    codecpar.codec_type = match descriptor.kind {
        MediaKind::Video => ffmpeg::ffi::AVMediaType::AVMEDIA_TYPE_VIDEO,
        MediaKind::Audio => ffmpeg::ffi::AVMediaType::AVMEDIA_TYPE_AUDIO,
    };
    if let Some(extradata) = &descriptor.extradata {
        unsafe {
            codecpar.extradata = ffmpeg::ffi::av_mallocz(
                extradata.len() + ffmpeg::ffi::AV_INPUT_BUFFER_PADDING_SIZE as usize,
            ) as *mut u8;
            std::ptr::copy(extradata.as_ptr(), codecpar.extradata, extradata.len());
            codecpar.extradata_size = extradata.len() as i32;
        }
    }
}

/// Closes an `Option<Mp4Writer>` in place, leaving `None` behind.
pub fn close_if_present(writer: &mut Option<Mp4Writer>) {
    if let Some(writer) = writer.take() {
        writer.close();
    }
}

/// Externally-synchronized map from stream name to its currently active MP4
/// writer (§5: "the MP4 Writer registry is externally synchronized
/// (`Mutex`-guarded map owned by a `Mp4RecorderRegistry`); Stream Thread only
/// reads the current pointer per packet"). Recording start/stop -- i.e.
/// inserting or removing a writer -- is driven by a controller outside this
/// crate's scope; the stream thread never inserts into this map itself.
#[derive(Clone, Default)]
pub struct Mp4RecorderRegistry {
    writers: Arc<Mutex<HashMap<String, Mp4Writer>>>,
}

impl Mp4RecorderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `writer` as the active recorder for `name`, closing and
    /// replacing whatever was previously registered.
    pub fn install(&self, name: &str, writer: Mp4Writer) {
        let previous = self.writers.lock().unwrap().insert(name.to_string(), writer);
        if let Some(previous) = previous {
            previous.close();
        }
    }

    /// Removes and closes the active recorder for `name`, if any.
    pub fn remove(&self, name: &str) {
        if let Some(writer) = self.writers.lock().unwrap().remove(name) {
            writer.close();
        }
    }

    pub fn has_writer(&self, name: &str) -> bool {
        self.writers.lock().unwrap().contains_key(name)
    }

    /// Runs `f` against the currently active writer for `name`, if any. The
    /// stream thread's only point of contact with this registry -- it never
    /// holds a writer reference across loop iterations.
    pub fn with_writer_mut<R>(&self, name: &str, f: impl FnOnce(&mut Mp4Writer) -> R) -> Option<R> {
        let mut guard = self.writers.lock().unwrap();
        guard.get_mut(name).map(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_path_is_zero_padded_and_stable() {
        let path = segment_path(Path::new("/tmp/nvr"), "cam-a", 3);
        assert_eq!(path, PathBuf::from("/tmp/nvr/cam-a-000003.mp4"));
    }

    #[test]
    fn create_fails_when_directory_missing() {
        let missing = Path::new("/nonexistent/nvr-core-mp4-test-dir");
        let err = ensure_directory_writable(missing).unwrap_err();
        assert!(matches!(err, Mp4WriterError::DirectoryNotWritable(_)));
    }

    #[test]
    fn registry_reports_no_writer_for_an_unknown_stream() {
        let registry = Mp4RecorderRegistry::new();
        assert!(!registry.has_writer("cam-a"));
        assert!(registry.with_writer_mut("cam-a", |_| ()).is_none());
    }

    #[test]
    fn close_if_present_is_a_no_op_on_none() {
        let mut writer: Option<Mp4Writer> = None;
        close_if_present(&mut writer);
        assert!(writer.is_none());
    }

    #[test]
    fn admits_packet_drops_everything_before_the_first_video_keyframe() {
        assert!(!admits_packet(false, MediaKind::Video, false));
        assert!(!admits_packet(false, MediaKind::Audio, false));
        assert!(!admits_packet(false, MediaKind::Audio, true));
        assert!(admits_packet(false, MediaKind::Video, true));
    }

    #[test]
    fn admits_packet_admits_everything_once_a_keyframe_has_been_seen() {
        assert!(admits_packet(true, MediaKind::Video, false));
        assert!(admits_packet(true, MediaKind::Audio, false));
    }
}
