//! Per-component error types, following the same one-enum-per-boundary shape the
//! rest of this crate's ffmpeg-based pipeline code uses.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("stream name \"{0}\" exceeds the maximum length of {1} bytes")]
    NameTooLong(String, usize),

    #[error("stream name must not be empty")]
    EmptyName,

    #[error("stream url must not be empty")]
    EmptyUrl,

    #[error("detection_interval must be positive, got {0}")]
    NonPositiveDetectionInterval(f64),

    #[error("failed to parse configuration JSON")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum InputOpenError {
    #[error("failed to open input \"{url}\"")]
    Ffmpeg {
        url: String,
        #[source]
        source: ffmpeg_next::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum HlsWriterError {
    #[error("HLS output directory \"{0}\" does not exist or is not writable")]
    DirectoryNotWritable(PathBuf),

    #[error("failed to construct HLS muxer for stream \"{name}\"")]
    MuxerInit {
        name: String,
        #[source]
        source: ffmpeg_next::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum Mp4WriterError {
    #[error("MP4 output directory \"{0}\" does not exist or is not writable")]
    DirectoryNotWritable(PathBuf),

    #[error("failed to construct MP4 muxer at \"{path}\"")]
    MuxerInit {
        path: PathBuf,
        #[source]
        source: ffmpeg_next::Error,
    },

    #[error("attempted to write audio packet but this writer was not constructed with audio enabled")]
    AudioNotEnabled,
}

#[derive(Debug, thiserror::Error)]
pub enum DetectionSubmitError {
    #[error("detection worker pool queue is full")]
    QueueFull,

    #[error("detection worker pool has shut down")]
    PoolClosed,
}

#[derive(Debug, thiserror::Error)]
pub enum StreamThreadError {
    #[error("stream \"{0}\" is not registered in the stream state registry")]
    UnknownStream(String),

    #[error("stream \"{0}\" was already stopped before startup completed")]
    StoppedBeforeStart(String),

    #[error(transparent)]
    HlsWriter(#[from] HlsWriterError),

    #[error(transparent)]
    InputOpen(#[from] InputOpenError),

    #[error("no video stream found in input for stream \"{0}\"")]
    NoVideoStream(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ShutdownError {
    #[error("unknown shutdown component id {0}")]
    UnknownComponent(u64),

    #[error("timed out waiting for component \"{0}\" to report stopped")]
    WaitTimeout(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StreamRegistryError {
    #[error("stream \"{0}\" is not registered")]
    NotFound(String),

    #[error("stream \"{0}\" is already registered")]
    AlreadyRegistered(String),
}
