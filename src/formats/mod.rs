//! On-disk recording formats.
//!
//! The set of formats is closed and small, so dispatch goes through the
//! [`RecordingFormat`] enum rather than open-ended dynamic dispatch. Each
//! variant module implements the same three entry points: signature
//! detection, recording enumeration, and a loader producing the uniform
//! in-memory [`RecordingData`].

pub mod container;
pub mod flat_binary;
pub mod legacy_flat;

use std::fmt;
use std::path::{Path, PathBuf};

use crate::continuous::ContinuousStream;
use crate::error::{FormatError, Result};
use crate::events::{EventTable, MessageRecord};
use crate::recording::Recording;
use crate::spikes::SpikeSource;

/// The three supported on-disk layouts. Immutable once detected from a
/// record-node directory's contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingFormat {
    /// Directory of flat binary payloads with a JSON sidecar.
    FlatBinary,
    /// Single self-describing container store per experiment.
    Container,
    /// Legacy per-channel block-record files with an XML sidecar.
    LegacyFlat,
}

impl fmt::Display for RecordingFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordingFormat::FlatBinary => write!(f, "flat-binary"),
            RecordingFormat::Container => write!(f, "container"),
            RecordingFormat::LegacyFlat => write!(f, "legacy-flat"),
        }
    }
}

/// Everything one format loader produces for one recording.
#[derive(Debug)]
pub struct RecordingData {
    pub continuous: Vec<ContinuousStream>,
    pub events: EventTable,
    pub spikes: Vec<SpikeSource>,
    pub messages: Vec<MessageRecord>,
}

/// Detect the data format of a record-node directory from its signature
/// files. Checked in fixed order; the first match wins.
pub fn detect_format(directory: &Path) -> Result<RecordingFormat> {
    if container::detect(directory) {
        Ok(RecordingFormat::Container)
    } else if flat_binary::detect(directory) {
        Ok(RecordingFormat::FlatBinary)
    } else if legacy_flat::detect(directory) {
        Ok(RecordingFormat::LegacyFlat)
    } else {
        Err(FormatError::UnknownFormat(directory.to_path_buf()).into())
    }
}

/// Enumerate the recordings inside a record-node directory for a known
/// format. Indices on the returned recordings are zero-based.
pub fn detect_recordings(directory: &Path, format: RecordingFormat) -> Result<Vec<Recording>> {
    match format {
        RecordingFormat::FlatBinary => flat_binary::detect_recordings(directory),
        RecordingFormat::Container => container::detect_recordings(directory),
        RecordingFormat::LegacyFlat => legacy_flat::detect_recordings(directory),
    }
}

/// Load one recording's data for a known format.
pub(crate) fn load(
    directory: &Path,
    format: RecordingFormat,
    experiment_index: usize,
    recording_index: usize,
) -> Result<RecordingData> {
    match format {
        RecordingFormat::FlatBinary => flat_binary::load(directory),
        RecordingFormat::Container => container::load(directory, experiment_index),
        RecordingFormat::LegacyFlat => legacy_flat::load(directory, experiment_index, recording_index),
    }
}

/// Directory entries whose file name passes `keep`, sorted with embedded
/// integers compared numerically ("experiment10" after "experiment2").
pub(crate) fn matching_entries(
    directory: &Path,
    keep: impl Fn(&str) -> bool,
) -> std::io::Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(directory)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if keep(&name) {
            paths.push(entry.path());
        }
    }
    paths.sort_by(|a, b| {
        let ka = alphanum_key(&a.file_name().unwrap_or_default().to_string_lossy());
        let kb = alphanum_key(&b.file_name().unwrap_or_default().to_string_lossy());
        ka.cmp(&kb)
    });
    Ok(paths)
}

/// Split a name into text/number runs so "a2" sorts before "a10".
pub(crate) fn alphanum_key(name: &str) -> Vec<(String, u64)> {
    let mut key = Vec::new();
    let mut text = String::new();
    let mut digits = String::new();
    for c in name.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
        } else {
            if !digits.is_empty() {
                key.push((std::mem::take(&mut text), digits.parse().unwrap_or(0)));
                digits.clear();
            }
            text.push(c);
        }
    }
    if !digits.is_empty() || !text.is_empty() {
        key.push((text, digits.parse().unwrap_or(0)));
    }
    key
}

/// Parse the trailing integer of a directory name like "experiment3".
/// Returns the source application's one-based number.
pub(crate) fn trailing_number(name: &str) -> Option<usize> {
    let digits: String = name
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    digits.parse().ok()
}
