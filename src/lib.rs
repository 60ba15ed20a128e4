//! Ephys Recording Toolbox - reading and synchronizing multi-stream
//! electrophysiology recordings
//!
//! This crate loads recordings produced by a multi-format acquisition
//! application and exposes them through one uniform interface, regardless of
//! how they were written to disk. It also reconciles the independent sample
//! clocks of different hardware streams into a single global timebase using
//! shared digital (TTL) sync pulses.
//!
//! # Overview
//!
//! A recorded session is a directory tree:
//!
//! ```text
//! session/
//! └── Record Node <id>/        one per recording processor
//!     └── experiment / recording data in one of three formats
//! ```
//!
//! Three on-disk formats are supported transparently:
//!
//! - **Flat binary** - `experiment*/recording*/structure.oebin` JSON sidecar
//!   with raw little-endian payload files; continuous data is memory mapped.
//! - **Container** - one self-describing Zarr v3 store per experiment
//!   (`experiment*.zarr`) with bounded partial reads.
//! - **Legacy flat** - per-channel block-record `.continuous` files with a
//!   `structure.openephys` XML sidecar; whole channels are materialized in
//!   memory, optionally narrowed beforehand with
//!   [`ContinuousStream::set_sample_range`] and
//!   [`ContinuousStream::set_selected_channels`].
//!
//! # Quick Start
//!
//! ```no_run
//! use ephys_recording_toolbox::{Session, SyncLine};
//! use std::path::Path;
//!
//! # fn main() -> ephys_recording_toolbox::Result<()> {
//! let mut session = Session::open(Path::new("/data/session"))?;
//! let recording = &mut session.record_nodes_mut()[0].recordings_mut()[0];
//!
//! // Slice continuous samples (zero-based indices, microvolts).
//! let chunk = recording.continuous_mut()[0].get_samples(0, 30_000, None)?;
//! println!("loaded {} samples × {} channels", chunk.nrows(), chunk.ncols());
//!
//! // Align every stream to the probe's clock via the shared sync pulse.
//! recording.add_sync_line(SyncLine {
//!     line: 1,
//!     processor_id: 100,
//!     stream_name: "probe".into(),
//!     main: true,
//!     ignore_intervals: vec![],
//! })?;
//! recording.add_sync_line(SyncLine {
//!     line: 1,
//!     processor_id: 103,
//!     stream_name: "daq".into(),
//!     main: false,
//!     ignore_intervals: vec![],
//! })?;
//! recording.compute_global_timestamps(false)?;
//! # Ok(())
//! # }
//! ```
//!
//! # Synchronization model
//!
//! Each registered [`SyncLine`] names a TTL line wired to the same physical
//! pulse generator. Exactly one line is the *main* clock; every auxiliary
//! stream gets an affine map fitted by least squares over ordinally paired
//! rising edges. All maps are fitted before anything is mutated, so a
//! failure never leaves a recording partially synchronized. Streams without
//! a sync line keep `global_timestamps == None`.
//!
//! # Remote control
//!
//! [`ControlClient`](control::ControlClient) drives a running acquisition
//! instance (start / record / stop) over its HTTP endpoint.

pub mod continuous;
pub mod control;
pub mod error;
pub mod events;
pub mod formats;
pub mod recording;
pub mod session;
pub mod spikes;
pub mod sync;

pub use continuous::{ContinuousStream, StreamMetadata};
pub use control::{AcquisitionMode, ControlClient};
pub use error::{ControlError, Error, FormatError, RangeError, Result, SyncError};
pub use events::{EventRecord, EventTable, MessageRecord};
pub use formats::RecordingFormat;
pub use recording::Recording;
pub use session::{RecordNode, Session};
pub use spikes::{SpikeMetadata, SpikeSource};
pub use sync::{AffineMap, SyncLine};
