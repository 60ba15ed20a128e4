use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while detecting or parsing an on-disk recording layout.
///
/// None of these are retryable: the directory contents are wrong and will
/// stay wrong until the caller points at different data.
#[derive(Debug, Error)]
pub enum FormatError {
    /// The sidecar metadata document is missing a required field or carries
    /// an invalid/unknown one. `detail` names the offending field.
    #[error("malformed sidecar {path}: {detail}")]
    Sidecar { path: PathBuf, detail: String },

    /// A payload file exists but its size does not match the metadata.
    #[error("payload file {path}: expected {expected} bytes, found {actual}")]
    Payload {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    /// A payload file violates its record layout (bad block marker, odd
    /// record geometry).
    #[error("corrupt data in {path}: {detail}")]
    Corrupt { path: PathBuf, detail: String },

    /// A file the format requires is absent.
    #[error("missing file: {0}")]
    MissingFile(PathBuf),

    /// The directory matches no known format signature.
    #[error("no recognized data format in {0}")]
    UnknownFormat(PathBuf),

    /// The container store rejected an open/read operation.
    #[error("container store {path}: {detail}")]
    Container { path: PathBuf, detail: String },
}

/// A requested sample or channel window falls outside the stream bounds.
/// Rejected before any I/O is performed.
#[derive(Debug, Error)]
pub enum RangeError {
    #[error("sample range {start}..{end} outside stream bounds 0..{len}")]
    Samples {
        start: usize,
        end: usize,
        len: usize,
    },

    #[error("channel index {channel} out of range (stream has {num_channels} channels)")]
    Channel { channel: usize, num_channels: usize },
}

/// Sync-line registry or edge-pairing violations. Synchronization is refused
/// outright; no stream is ever left with a partially applied timebase.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(
        "no events found on line {line} for processor {processor_id}, stream '{stream_name}'"
    )]
    NoEventsOnLine {
        line: i32,
        processor_id: i32,
        stream_name: String,
    },

    #[error("a main sync line is already registered; remove it before adding another")]
    DuplicateMainLine,

    #[error("computing global timestamps requires one main sync line")]
    MissingMainLine,

    #[error("computing global timestamps requires at least one auxiliary sync line")]
    NoAuxiliaryLines,

    #[error(
        "edge count mismatch on stream '{stream_name}': main line has {main_edges} edges, auxiliary has {aux_edges}"
    )]
    EdgeCountMismatch {
        stream_name: String,
        main_edges: usize,
        aux_edges: usize,
    },

    #[error("stream '{stream_name}' has only {found} usable sync edges (need at least 2)")]
    InsufficientEvents { stream_name: String, found: usize },

    #[error("sync edges on stream '{stream_name}' are degenerate (all at one sample number)")]
    DegenerateEdges { stream_name: String },

    #[error("no continuous stream matches processor {processor_id}, stream '{stream_name}'")]
    UnknownStream {
        processor_id: i32,
        stream_name: String,
    },
}

/// Failures talking to the acquisition software's HTTP control endpoint.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("control request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("control endpoint reported unknown mode '{0}'")]
    UnknownMode(String),
}

/// Top-level error type for the toolbox.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Range(#[from] RangeError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Control(#[from] ControlError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
