//! Shared data types that flow between the stream thread and its downstream
//! consumers (HLS, MP4, pre-buffer, detection).

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use ffmpeg_next::Rational;

/// A single demuxed media unit. `ffmpeg_next::Packet` is itself reference-counted
/// under the hood (its `Clone` impl wraps `av_packet_ref`), so handing a clone to
/// each downstream consumer that stays on the same thread (the HLS and MP4
/// writers, both driven synchronously from the stream thread) is cheap and
/// avoids copying the payload; dropping the last reference releases the
/// underlying buffer. This satisfies the "packet released on every exit path"
/// invariant structurally, via RAII, rather than through an explicit release
/// call.
pub type Packet = ffmpeg_next::Packet;

/// An owned, thread-portable copy of a packet's payload and timing, used
/// wherever a packet needs to cross a thread boundary -- the detection worker
/// pool and the pre-buffer's external readers -- instead of handing out the
/// live `ffmpeg_next::Packet`, the same owned-`Bytes`-plus-timing shape used
/// elsewhere in this codebase for anything that travels over a channel.
#[derive(Debug, Clone)]
pub struct OwnedPacket {
    pub payload: Bytes,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    pub is_keyframe: bool,
}

impl OwnedPacket {
    pub fn from_ffmpeg(packet: &Packet) -> Self {
        Self {
            payload: packet.data().map(Bytes::copy_from_slice).unwrap_or_default(),
            pts: packet.pts(),
            dts: packet.dts(),
            is_keyframe: packet.is_key(),
        }
    }
}

/// Which elementary stream inside a container a packet or descriptor belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Video,
    Audio,
}

/// An owned snapshot of one elementary stream's codec parameters, taken from
/// `ffmpeg_next::format::stream::Stream` so it can outlive a demuxer reopen and be
/// handed to consumers (notably the detection dispatcher) that outlive the input.
#[derive(Debug, Clone)]
pub struct StreamDescriptor {
    pub kind: MediaKind,
    pub stream_index: usize,
    pub time_base: Rational,
    pub codec_id: ffmpeg_next::codec::Id,
    pub extradata: Option<Arc<[u8]>>,
}

impl StreamDescriptor {
    pub fn from_ffmpeg_stream(kind: MediaKind, stream: &ffmpeg_next::format::stream::Stream<'_>) -> Self {
        let extradata = unsafe {
            let codecpar = (*stream.as_ptr()).codecpar;
            let size = (*codecpar).extradata_size;
            if size > 0 {
                let slice = std::slice::from_raw_parts((*codecpar).extradata, size as usize);
                Some(Arc::from(slice))
            } else {
                None
            }
        };

        Self {
            kind,
            stream_index: stream.index(),
            time_base: stream.time_base(),
            codec_id: stream.parameters().id(),
            extradata,
        }
    }
}

/// A recent packet retained for event-triggered recordings that want a short
/// look-back window. Single writer (the owning stream thread), many readers —
/// readers may live on a different thread than the writer, so the packet is
/// held as an `OwnedPacket`.
#[derive(Debug, Clone)]
pub struct PreBufferEntry {
    pub packet: OwnedPacket,
    pub descriptor: StreamDescriptor,
    pub arrived_at: Instant,
}

/// One unit of work handed to the detection worker pool. Dropped by the pool on
/// submission failure (queue full) rather than retried — cadence is the caller's
/// responsibility, not the dispatcher's.
#[derive(Debug, Clone)]
pub struct DetectionTask {
    pub stream_name: Arc<str>,
    pub packet: OwnedPacket,
    pub descriptor: StreamDescriptor,
}
