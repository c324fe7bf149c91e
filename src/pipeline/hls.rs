//! HLS Segmenter (§4.2): an `ffmpeg_next` muxer opened against the `hls`
//! output format, configured with `hls_flags delete_segments` so the playlist
//! stays a rolling window, with keyframe-driven flush instead of per-packet
//! flushing to bound latency without a syscall per packet.
//!
//! Unlike an encoder-backed HLS output that receives already-encoded chunks
//! from its own encoder thread, this writer remuxes packets the stream thread
//! already demuxed -- there is no transcoding in this pipeline (Non-goals, §1)
//! -- so `write_packet` takes a borrowed `Packet` straight from the demuxer.

use std::path::{Path, PathBuf};

use ffmpeg_next::{self as ffmpeg, format::context};
use tracing::warn;

use crate::prelude::*;

/// Owns the HLS output directory's muxer state for one stream. Created after the
/// output directory is confirmed writable (§3 invariant #5); destroyed exactly
/// once via `close` (§3 invariant #3).
pub struct HlsWriter {
    output_ctx: context::Output,
    video_stream_index: Option<usize>,
    audio_stream_index: Option<usize>,
}

fn ensure_directory_writable(dir: &Path) -> Result<(), HlsWriterError> {
    if !dir.is_dir() {
        return Err(HlsWriterError::DirectoryNotWritable(dir.to_path_buf()));
    }
    let probe = dir.join(".write_probe");
    match std::fs::write(&probe, b"") {
        Ok(()) => {
            let _ = std::fs::remove_file(&probe);
            Ok(())
        }
        Err(_) => Err(HlsWriterError::DirectoryNotWritable(dir.to_path_buf())),
    }
}

impl HlsWriter {
    /// Constructs the HLS muxer for `name` inside `output_dir`, targeting
    /// `segment_duration_secs` per segment (§4.1 step 5 computes the effective
    /// duration before calling this). `video` is required; `audio` is optional.
    pub fn create(
        output_dir: &Path,
        name: &str,
        segment_duration_secs: f64,
        video: &StreamDescriptor,
        audio: Option<&StreamDescriptor>,
    ) -> Result<Self, HlsWriterError> {
        ensure_directory_writable(output_dir)?;

        let playlist_path: PathBuf = output_dir.join(format!("{name}.m3u8"));

        let mut output_ctx = ffmpeg::format::output_as(&playlist_path, "hls").map_err(|source| {
            HlsWriterError::MuxerInit {
                name: name.to_string(),
                source,
            }
        })?;

        let video_stream_index = {
            let mut stream = output_ctx.add_stream(video.codec_id).map_err(|source| HlsWriterError::MuxerInit {
                name: name.to_string(),
                source,
            })?;
            stream.set_time_base(video.time_base);
            copy_codec_parameters(&mut stream, video);
            Some(stream.index())
        };

        let audio_stream_index = match audio {
            Some(descriptor) => {
                let mut stream =
                    output_ctx
                        .add_stream(descriptor.codec_id)
                        .map_err(|source| HlsWriterError::MuxerInit {
                            name: name.to_string(),
                            source,
                        })?;
                stream.set_time_base(descriptor.time_base);
                copy_codec_parameters(&mut stream, descriptor);
                Some(stream.index())
            }
            None => None,
        };

        let segment_time = format!("{segment_duration_secs}");
        let options = ffmpeg::Dictionary::from_iter([
            ("hls_time", segment_time.as_str()),
            ("hls_flags", "delete_segments+independent_segments"),
            ("hls_list_size", "6"),
            ("hls_segment_type", "mpegts"),
        ]);

        output_ctx
            .write_header_with(options)
            .map_err(|source| HlsWriterError::MuxerInit {
                name: name.to_string(),
                source,
            })?;

        Ok(Self {
            output_ctx,
            video_stream_index,
            audio_stream_index,
        })
    }

    fn stream_index_for(&self, kind: MediaKind) -> Option<usize> {
        match kind {
            MediaKind::Video => self.video_stream_index,
            MediaKind::Audio => self.audio_stream_index,
        }
    }

    /// Writes one packet. A failure here is not fatal to the stream (§4.2,
    /// §7) -- the caller logs and continues.
    pub fn write_packet(&mut self, packet: &Packet, kind: MediaKind) -> Result<(), ffmpeg::Error> {
        let Some(stream_index) = self.stream_index_for(kind) else {
            return Ok(());
        };
        let mut out = packet.clone();
        out.set_stream(stream_index);
        out.write_interleaved(&mut self.output_ctx)
    }

    /// Explicit flush of the muxer's underlying I/O buffer. Called by the stream
    /// thread on every keyframe that was successfully written (§4.1 step 3) --
    /// no separate idle-flush timer is run; a live keyframe cadence is always
    /// fast enough to keep the playlist current (§9 open question 1).
    pub fn flush(&mut self) {
        if let Err(err) = self.output_ctx.flush() {
            warn!(%err, "failed to flush HLS output");
        }
    }

    /// Idempotent close: writes the trailer once. Calling this more than once
    /// on the same writer is a logic error the type system prevents by
    /// consuming `self`; the *pointer* to this writer is what must tolerate a
    /// no-op close when already taken/null (§3 invariant #3), which is handled
    /// by the stream thread holding an `Option<HlsWriter>` and `.take()`-ing it
    /// before calling this.
    pub fn close(mut self) {
        if let Err(err) = self.output_ctx.write_trailer() {
            warn!(%err, "failed to write HLS trailer on close");
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

/// Closes an `Option<HlsWriter>` in place, leaving `None` behind. No-op when
/// already `None` (§3 invariant #3, §8 idempotence property).
pub fn close_if_present(writer: &mut Option<HlsWriter>) {
    if let Some(writer) = writer.take() {
        writer.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_fails_when_directory_missing() {
        let missing = Path::new("/nonexistent/nvr-core-hls-test-dir");
        let err = ensure_directory_writable(missing).unwrap_err();
        assert!(matches!(err, HlsWriterError::DirectoryNotWritable(_)));
    }

    #[test]
    fn close_if_present_is_a_no_op_on_none() {
        let mut writer: Option<HlsWriter> = None;
        close_if_present(&mut writer);
        assert!(writer.is_none());
    }
}
