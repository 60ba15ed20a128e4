//! Continuous sample streams with lazy payload access.
//!
//! A [`ContinuousStream`] owns whatever handle its on-disk format needs: a
//! memory map for flat binary payloads, an open container array for Zarr
//! stores, or the channel-file list for the legacy block format. Sample data
//! is only touched when a slice is requested.

use memmap2::Mmap;
use ndarray::Array2;
use std::path::PathBuf;
use tracing::warn;
use zarrs::array::Array;
use zarrs::array_subset::ArraySubset;
use zarrs::filesystem::FilesystemStore;

use crate::error::{FormatError, RangeError, Result};
use crate::formats::legacy_flat;

/// Descriptive metadata for one continuous stream.
#[derive(Debug, Clone)]
pub struct StreamMetadata {
    pub stream_name: String,
    pub source_processor_id: i32,
    pub source_processor_name: String,
    pub sample_rate: f64,
    pub num_channels: usize,
    pub channel_names: Vec<String>,
    /// Scaling factor per channel: physical microvolts = raw i16 × bit_volts.
    pub bit_volts: Vec<f64>,
}

/// Where the raw samples actually live.
pub(crate) enum SampleSource {
    /// Flat binary payload, sample-major i16 little-endian, memory mapped.
    /// The map is owned here and released with the stream.
    FlatBinary { map: Mmap, path: PathBuf },
    /// Container array supporting bounded partial retrieval.
    Container { array: Array<FilesystemStore> },
    /// Legacy per-channel block files; materialized on first access.
    Legacy(LegacyChannels),
}

impl std::fmt::Debug for SampleSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SampleSource::FlatBinary { path, .. } => {
                f.debug_struct("FlatBinary").field("path", path).finish()
            }
            SampleSource::Container { .. } => f.debug_struct("Container").finish_non_exhaustive(),
            SampleSource::Legacy(ch) => f
                .debug_struct("Legacy")
                .field("files", &ch.files.len())
                .field("sample_range", &ch.sample_range)
                .finish(),
        }
    }
}

/// State for the legacy format's restrict-then-materialize contract.
#[derive(Debug)]
pub(crate) struct LegacyChannels {
    pub files: Vec<PathBuf>,
    pub recording_index: usize,
    /// Addressable window in sample numbers: [start, end).
    pub sample_range: (i64, i64),
    /// Zero-based channel indices to materialize.
    pub selected_channels: Vec<usize>,
    pub window: Option<LegacyWindow>,
}

/// A materialized legacy window (raw, unscaled values).
#[derive(Debug)]
pub(crate) struct LegacyWindow {
    pub raw: Array2<f64>,
    pub sample_numbers: Vec<i64>,
}

/// One data stream's continuous samples within a recording.
#[derive(Debug)]
pub struct ContinuousStream {
    pub metadata: StreamMetadata,
    pub(crate) source: SampleSource,
    /// Local sample numbers, strictly increasing by 1 from the recording's
    /// origin. Length equals the stream's sample count.
    pub sample_numbers: Vec<i64>,
    /// Local timestamps in seconds, derived from the stream's own clock.
    pub timestamps: Vec<f64>,
    /// Populated only by `Recording::compute_global_timestamps`. `None` means
    /// this stream has no global timebase, not zero.
    pub global_timestamps: Option<Vec<f64>>,
}

impl ContinuousStream {
    /// Total number of samples in the recording for this stream.
    pub fn num_samples(&self) -> usize {
        self.sample_numbers.len()
    }

    pub fn num_channels(&self) -> usize {
        self.metadata.num_channels
    }

    pub fn sample_rate(&self) -> f64 {
        self.metadata.sample_rate
    }

    /// Duration of the stream in seconds.
    pub fn duration(&self) -> f64 {
        self.num_samples() as f64 / self.metadata.sample_rate
    }

    /// Return samples scaled to microvolts as a (samples × channels) f64
    /// matrix.
    ///
    /// Indices are zero-based sample indices, `end` exclusive. For a legacy
    /// stream with an active range/channel restriction the indices are
    /// relative to the restricted window and `channels` selects within the
    /// restricted channel set.
    pub fn get_samples(
        &mut self,
        start: usize,
        end: usize,
        channels: Option<&[usize]>,
    ) -> Result<Array2<f64>> {
        match &mut self.source {
            SampleSource::FlatBinary { map, .. } => {
                let num_channels = self.metadata.num_channels;
                let len = self.sample_numbers.len();
                check_sample_range(start, end, len)?;
                let selected = resolve_channels(channels, num_channels)?;

                let mut out = Array2::<f64>::zeros((end - start, selected.len()));
                let bytes: &[u8] = &map[..];
                for (row, sample) in (start..end).enumerate() {
                    for (col, &ch) in selected.iter().enumerate() {
                        let offset = (sample * num_channels + ch) * 2;
                        let raw = i16::from_le_bytes([bytes[offset], bytes[offset + 1]]);
                        out[[row, col]] = raw as f64 * self.metadata.bit_volts[ch];
                    }
                }
                Ok(out)
            }
            SampleSource::Container { array } => {
                let len = self.sample_numbers.len();
                check_sample_range(start, end, len)?;
                let selected = resolve_channels(channels, self.metadata.num_channels)?;

                let mut out = Array2::<f64>::zeros((end - start, selected.len()));
                // One rectangular subset per selected channel keeps retrieval
                // bounded to exactly the requested region.
                for (col, &ch) in selected.iter().enumerate() {
                    let subset = ArraySubset::new_with_ranges(&[
                        start as u64..end as u64,
                        ch as u64..(ch + 1) as u64,
                    ]);
                    let chunk = array
                        .retrieve_array_subset_ndarray::<i16>(&subset)
                        .map_err(|e| FormatError::Container {
                            path: PathBuf::from(array.path().as_str()),
                            detail: e.to_string(),
                        })?;
                    for (row, raw) in chunk.iter().enumerate() {
                        out[[row, col]] = *raw as f64 * self.metadata.bit_volts[ch];
                    }
                }
                Ok(out)
            }
            SampleSource::Legacy(legacy) => {
                if legacy.window.is_none() {
                    legacy.window = Some(legacy_flat::load_window(
                        &legacy.files,
                        legacy.recording_index,
                        legacy.sample_range,
                        &legacy.selected_channels,
                    )?);
                }
                let window = legacy.window.as_ref().unwrap();
                let len = window.sample_numbers.len();
                check_sample_range(start, end, len)?;
                let selected = resolve_channels(channels, legacy.selected_channels.len())?;

                let mut out = Array2::<f64>::zeros((end - start, selected.len()));
                for (col, &c) in selected.iter().enumerate() {
                    let absolute = legacy.selected_channels[c];
                    let scale = self.metadata.bit_volts[absolute];
                    for row in 0..(end - start) {
                        out[[row, col]] = window.raw[[start + row, c]] * scale;
                    }
                }
                Ok(out)
            }
        }
    }

    /// Restrict the addressable sample-number window before materialization.
    ///
    /// Only meaningful for the legacy format, which must load whole channel
    /// files; formats that slice arbitrarily ignore this with a warning. Any
    /// previously materialized window is discarded.
    pub fn set_sample_range(&mut self, start_sample: i64, end_sample: i64) {
        match &mut self.source {
            SampleSource::Legacy(legacy) => {
                legacy.sample_range = (start_sample, end_sample);
                legacy.window = None;
            }
            _ => warn!(
                stream = %self.metadata.stream_name,
                "set_sample_range ignored: this format slices arbitrarily without pre-restriction"
            ),
        }
    }

    /// Restrict the channel subset before materialization (legacy only; see
    /// [`Self::set_sample_range`]).
    pub fn set_selected_channels(&mut self, channels: &[usize]) -> Result<()> {
        match &mut self.source {
            SampleSource::Legacy(legacy) => {
                for &ch in channels {
                    if ch >= self.metadata.num_channels {
                        return Err(RangeError::Channel {
                            channel: ch,
                            num_channels: self.metadata.num_channels,
                        }
                        .into());
                    }
                }
                legacy.selected_channels = channels.to_vec();
                legacy.window = None;
                Ok(())
            }
            _ => {
                warn!(
                    stream = %self.metadata.stream_name,
                    "set_selected_channels ignored: this format slices arbitrarily without pre-restriction"
                );
                Ok(())
            }
        }
    }

    /// Number of samples addressable by `get_samples` right now. Equals
    /// `num_samples` except for a range-restricted legacy stream.
    pub fn window_len(&mut self) -> Result<usize> {
        match &mut self.source {
            SampleSource::Legacy(legacy) => {
                if legacy.window.is_none() {
                    legacy.window = Some(legacy_flat::load_window(
                        &legacy.files,
                        legacy.recording_index,
                        legacy.sample_range,
                        &legacy.selected_channels,
                    )?);
                }
                Ok(legacy.window.as_ref().unwrap().sample_numbers.len())
            }
            _ => Ok(self.sample_numbers.len()),
        }
    }
}

fn check_sample_range(start: usize, end: usize, len: usize) -> Result<()> {
    if start > end || end > len {
        return Err(RangeError::Samples { start, end, len }.into());
    }
    Ok(())
}

fn resolve_channels(channels: Option<&[usize]>, num_channels: usize) -> Result<Vec<usize>> {
    match channels {
        None => Ok((0..num_channels).collect()),
        Some(list) => {
            for &ch in list {
                if ch >= num_channels {
                    return Err(RangeError::Channel {
                        channel: ch,
                        num_channels,
                    }
                    .into());
                }
            }
            Ok(list.to_vec())
        }
    }
}
