//! Container format: one self-describing Zarr v3 store per experiment
//! (`experiment<N>.zarr`), holding every stream of the single recording it
//! contains.
//!
//! Each series lives under `acquisition/<SourceName-ID>.<stream>` with a
//! `series_type` attribute selecting its layout:
//!
//! - `continuous`: `data` [N × C] int16, `sample_numbers` [N] int64,
//!   `timestamps` [N] float64
//! - `ttl`: `states` [M] int16 (signed line number), `sample_numbers`,
//!   `timestamps`
//! - `spikes`: `waveforms` [spikes × C × S] int16, `sample_numbers`,
//!   `electrode_indices`, `clusters`
//!
//! Continuous `data` arrays stay closed until sliced; a slice request only
//! touches the chunks covering it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ndarray::Array3;
use tracing::debug;
use zarrs::array::Array;
use zarrs::array_subset::ArraySubset;
use zarrs::filesystem::FilesystemStore;
use zarrs::storage::{ReadableStorageTraits, StoreKey};

use crate::continuous::{ContinuousStream, SampleSource, StreamMetadata};
use crate::error::{FormatError, Result};
use crate::events::{EventRecord, EventTable};
use crate::formats::{matching_entries, trailing_number, RecordingData, RecordingFormat};
use crate::recording::Recording;
use crate::spikes::{SpikeMetadata, SpikeSource};

const STORE_SUFFIX: &str = ".zarr";

/// True if this record-node directory holds experiment container stores.
pub fn detect(directory: &Path) -> bool {
    matching_entries(directory, |n| {
        n.starts_with("experiment") && n.ends_with(STORE_SUFFIX)
    })
    .map(|stores| stores.iter().any(|p| p.is_dir()))
    .unwrap_or(false)
}

/// One recording per store; the container format never splits an experiment
/// into multiple recordings, so the recording index is always 0.
pub fn detect_recordings(directory: &Path) -> Result<Vec<Recording>> {
    let mut recordings = Vec::new();
    for store in matching_entries(directory, |n| {
        n.starts_with("experiment") && n.ends_with(STORE_SUFFIX)
    })? {
        if !store.is_dir() {
            continue;
        }
        let name = store.file_name().unwrap_or_default().to_string_lossy();
        let stem = name.trim_end_matches(STORE_SUFFIX);
        let exp_index = trailing_number(stem).map(|n| n.saturating_sub(1)).unwrap_or(0);
        recordings.push(Recording::open(
            directory,
            RecordingFormat::Container,
            exp_index,
            0,
        )?);
    }
    Ok(recordings)
}

pub(crate) fn load(directory: &Path, experiment_index: usize) -> Result<RecordingData> {
    let store_path = directory.join(format!("experiment{}{STORE_SUFFIX}", experiment_index + 1));
    if !store_path.is_dir() {
        return Err(FormatError::MissingFile(store_path).into());
    }
    let store = Arc::new(
        FilesystemStore::new(&store_path).map_err(|e| FormatError::Container {
            path: store_path.clone(),
            detail: e.to_string(),
        })?,
    );
    let reader = StoreReader { store, store_path };

    // Group names come from the directory layer; a Zarr store has no cheap
    // child listing of its own.
    let mut groups = Vec::new();
    let acquisition = reader.store_path.join("acquisition");
    if acquisition.is_dir() {
        for entry in matching_entries(&acquisition, |_| true)? {
            if entry.is_dir() {
                groups.push(entry.file_name().unwrap_or_default().to_string_lossy().to_string());
            }
        }
    }

    let mut continuous = Vec::new();
    let mut event_groups = Vec::new();
    let mut spike_groups = Vec::new();
    for name in &groups {
        let attrs = reader.group_attributes(&format!("acquisition/{name}"))?;
        match reader.attr_str(&attrs, name, "series_type")?.as_str() {
            "continuous" => continuous.push(reader.load_continuous(name, &attrs)?),
            "ttl" => event_groups.push((name.clone(), attrs)),
            "spikes" => spike_groups.push((name.clone(), attrs)),
            other => {
                return Err(FormatError::Container {
                    path: reader.store_path.clone(),
                    detail: format!("group '{name}': unknown series_type '{other}'"),
                }
                .into());
            }
        }
    }

    let mut records = Vec::new();
    for (i, (name, attrs)) in event_groups.iter().enumerate() {
        let stream_name = reader.attr_str(attrs, name, "stream_name")?;
        let stream_index = continuous
            .iter()
            .position(|c| c.metadata.stream_name == stream_name)
            .unwrap_or(i);
        reader.load_events(name, attrs, &stream_name, stream_index, &mut records)?;
    }
    let events = EventTable::from_records(records);

    let mut spikes = Vec::new();
    for (name, attrs) in &spike_groups {
        spikes.push(reader.load_spikes(name, attrs)?);
    }

    debug!(
        store = %reader.store_path.display(),
        streams = continuous.len(),
        events = events.len(),
        "loaded container recording"
    );
    Ok(RecordingData {
        continuous,
        events,
        spikes,
        messages: Vec::new(),
    })
}

struct StoreReader {
    store: Arc<FilesystemStore>,
    store_path: PathBuf,
}

impl StoreReader {
    fn container_err(&self, detail: String) -> FormatError {
        FormatError::Container {
            path: self.store_path.clone(),
            detail,
        }
    }

    /// Attributes live in the group's `zarr.json` (Zarr v3).
    fn group_attributes(&self, path: &str) -> Result<serde_json::Value> {
        let key = StoreKey::new(&format!("{}/zarr.json", path.trim_matches('/')))
            .map_err(|e| self.container_err(e.to_string()))?;
        let bytes = self
            .store
            .get(&key)
            .map_err(|e| self.container_err(e.to_string()))?
            .ok_or_else(|| self.container_err(format!("no metadata for group '{path}'")))?;
        let metadata: serde_json::Value =
            serde_json::from_slice(&bytes).map_err(|e| self.container_err(e.to_string()))?;
        Ok(metadata
            .get("attributes")
            .cloned()
            .unwrap_or_else(|| serde_json::json!({})))
    }

    fn attr_str(&self, attrs: &serde_json::Value, group: &str, key: &str) -> Result<String> {
        attrs
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                self.container_err(format!("group '{group}': missing attribute '{key}'"))
                    .into()
            })
    }

    fn attr_f64(&self, attrs: &serde_json::Value, group: &str, key: &str) -> Result<f64> {
        attrs.get(key).and_then(|v| v.as_f64()).ok_or_else(|| {
            self.container_err(format!("group '{group}': missing attribute '{key}'"))
                .into()
        })
    }

    fn attr_i64(&self, attrs: &serde_json::Value, group: &str, key: &str) -> Result<i64> {
        attrs.get(key).and_then(|v| v.as_i64()).ok_or_else(|| {
            self.container_err(format!("group '{group}': missing attribute '{key}'"))
                .into()
        })
    }

    fn attr_string_list(
        &self,
        attrs: &serde_json::Value,
        group: &str,
        key: &str,
    ) -> Result<Vec<String>> {
        let list = attrs.get(key).and_then(|v| v.as_array()).ok_or_else(|| {
            self.container_err(format!("group '{group}': missing attribute '{key}'"))
        })?;
        list.iter()
            .map(|v| {
                v.as_str().map(str::to_string).ok_or_else(|| {
                    self.container_err(format!("group '{group}': attribute '{key}' is not a string list"))
                        .into()
                })
            })
            .collect()
    }

    /// Uniform scalar or per-channel list, matching the flat binary sidecar.
    fn attr_bit_volts(
        &self,
        attrs: &serde_json::Value,
        group: &str,
        num_channels: usize,
    ) -> Result<Vec<f64>> {
        let value = attrs.get("bit_volts").ok_or_else(|| {
            self.container_err(format!("group '{group}': missing attribute 'bit_volts'"))
        })?;
        if let Some(uniform) = value.as_f64() {
            return Ok(vec![uniform; num_channels]);
        }
        let list: Vec<f64> = value
            .as_array()
            .map(|a| a.iter().filter_map(|v| v.as_f64()).collect())
            .unwrap_or_default();
        if list.len() != num_channels {
            return Err(self
                .container_err(format!(
                    "group '{group}': bit_volts has {} entries, expected {num_channels}",
                    list.len()
                ))
                .into());
        }
        Ok(list)
    }

    fn open_array(&self, path: &str) -> Result<Array<FilesystemStore>> {
        Array::open(self.store.clone(), path)
            .map_err(|e| self.container_err(format!("array '{path}': {e}")).into())
    }

    fn read_1d<T: zarrs::array::ElementOwned>(&self, path: &str) -> Result<Vec<T>> {
        let array = self.open_array(path)?;
        let len = array.shape()[0];
        let subset = ArraySubset::new_with_ranges(&[0..len]);
        let data = array
            .retrieve_array_subset_ndarray::<T>(&subset)
            .map_err(|e| self.container_err(format!("array '{path}': {e}")))?;
        Ok(data.into_iter().collect())
    }

    fn load_continuous(&self, group: &str, attrs: &serde_json::Value) -> Result<ContinuousStream> {
        let num_channels = self.attr_i64(attrs, group, "num_channels")? as usize;
        let metadata = StreamMetadata {
            stream_name: self.attr_str(attrs, group, "stream_name")?,
            source_processor_id: self.attr_i64(attrs, group, "source_processor_id")? as i32,
            source_processor_name: self.attr_str(attrs, group, "source_processor_name")?,
            sample_rate: self.attr_f64(attrs, group, "sample_rate")?,
            num_channels,
            channel_names: self.attr_string_list(attrs, group, "channel_names")?,
            bit_volts: self.attr_bit_volts(attrs, group, num_channels)?,
        };

        let base = format!("/acquisition/{group}");
        let sample_numbers: Vec<i64> = self.read_1d(&format!("{base}/sample_numbers"))?;
        let timestamps: Vec<f64> = self.read_1d(&format!("{base}/timestamps"))?;

        let data = self.open_array(&format!("{base}/data"))?;
        let shape = data.shape().to_vec();
        if shape.len() != 2
            || shape[0] != sample_numbers.len() as u64
            || shape[1] != num_channels as u64
        {
            return Err(self
                .container_err(format!(
                    "group '{group}': data shape {shape:?} does not match {} samples × {num_channels} channels",
                    sample_numbers.len()
                ))
                .into());
        }

        Ok(ContinuousStream {
            metadata,
            source: SampleSource::Container { array: data },
            sample_numbers,
            timestamps,
            global_timestamps: None,
        })
    }

    fn load_events(
        &self,
        group: &str,
        attrs: &serde_json::Value,
        stream_name: &str,
        stream_index: usize,
        out: &mut Vec<EventRecord>,
    ) -> Result<()> {
        let processor_id = self.attr_i64(attrs, group, "source_processor_id")? as i32;
        let base = format!("/acquisition/{group}");
        let states: Vec<i16> = self.read_1d(&format!("{base}/states"))?;
        let sample_numbers: Vec<i64> = self.read_1d(&format!("{base}/sample_numbers"))?;
        let timestamps: Vec<f64> = self.read_1d(&format!("{base}/timestamps"))?;
        if states.len() != sample_numbers.len() {
            return Err(self
                .container_err(format!(
                    "group '{group}': states has {} entries, sample_numbers has {}",
                    states.len(),
                    sample_numbers.len()
                ))
                .into());
        }

        for i in 0..states.len() {
            let raw = states[i];
            out.push(EventRecord {
                sample_number: sample_numbers[i],
                timestamp: timestamps.get(i).copied().unwrap_or(-1.0),
                line: i32::from(raw).abs(),
                state: u8::from(raw > 0),
                processor_id,
                stream_index,
                stream_name: stream_name.to_string(),
                global_timestamp: None,
            });
        }
        Ok(())
    }

    fn load_spikes(&self, group: &str, attrs: &serde_json::Value) -> Result<SpikeSource> {
        let num_channels = self.attr_i64(attrs, group, "num_channels")? as usize;
        let samples_per_spike = self.attr_i64(attrs, group, "samples_per_spike")? as usize;
        let sample_rate = self.attr_f64(attrs, group, "sample_rate")?;
        let bit_volts = self.attr_f64(attrs, group, "bit_volts")?;
        let metadata = SpikeMetadata {
            name: self.attr_str(attrs, group, "name")?,
            stream_name: self.attr_str(attrs, group, "stream_name")?,
            source_processor_id: self.attr_i64(attrs, group, "source_processor_id")? as i32,
            sample_rate,
            num_channels,
            samples_per_spike,
        };

        let base = format!("/acquisition/{group}");
        let sample_numbers: Vec<i64> = self.read_1d(&format!("{base}/sample_numbers"))?;
        let num_spikes = sample_numbers.len();

        let waveform_array = self.open_array(&format!("{base}/waveforms"))?;
        let shape = waveform_array.shape().to_vec();
        if shape != [num_spikes as u64, num_channels as u64, samples_per_spike as u64] {
            return Err(self
                .container_err(format!(
                    "group '{group}': waveforms shape {shape:?} does not match {num_spikes} × {num_channels} × {samples_per_spike}"
                ))
                .into());
        }
        let subset = ArraySubset::new_with_ranges(&[
            0..shape[0],
            0..shape[1],
            0..shape[2],
        ]);
        let raw = waveform_array
            .retrieve_array_subset_ndarray::<i16>(&subset)
            .map_err(|e| self.container_err(format!("group '{group}': {e}")))?;
        let mut waveforms = Array3::<f64>::zeros((num_spikes, num_channels, samples_per_spike));
        for ((s, c, t), value) in waveforms.indexed_iter_mut() {
            *value = raw[[s, c, t]] as f64 * bit_volts;
        }

        let electrodes: Vec<u16> = self
            .read_1d::<u16>(&format!("{base}/electrode_indices"))?
            .into_iter()
            .map(|e| e.saturating_sub(1))
            .collect();
        let clusters: Vec<i32> = self.read_1d(&format!("{base}/clusters"))?;
        let timestamps: Vec<f64> = sample_numbers
            .iter()
            .map(|&s| s as f64 / sample_rate)
            .collect();

        Ok(SpikeSource {
            metadata,
            waveforms,
            sample_numbers,
            timestamps,
            electrodes,
            clusters,
            global_timestamps: None,
        })
    }
}
