//! Flat binary format: a directory tree of little-endian payload files
//! described by a `structure.oebin` JSON sidecar.
//!
//! Layout per recording:
//!
//! ```text
//! recording1/
//! ├── structure.oebin
//! ├── continuous/<folder>/continuous.dat      i16, sample-major
//! │                       sample_numbers.dat  i64
//! │                       timestamps.dat      f64
//! ├── events/<folder>/states.dat              i16, signed line number
//! │                   sample_numbers.dat
//! │                   timestamps.dat
//! └── spikes/<folder>/waveforms.dat           i16, spikes × ch × samples
//!                     sample_numbers.dat
//!                     electrode_indices.dat   u16, 1-based on disk
//!                     clusters.dat            i32
//! ```
//!
//! The sidecar is schema-validated before any payload is opened; payload
//! sizes are validated against the sidecar before any sample is interpreted.
//! Continuous payloads are memory mapped, never copied.

use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use ndarray::Array3;
use serde::Deserialize;
use tracing::debug;

use crate::continuous::{ContinuousStream, SampleSource, StreamMetadata};
use crate::error::{FormatError, Result};
use crate::events::{EventRecord, EventTable, MessageRecord};
use crate::formats::{matching_entries, trailing_number, RecordingData, RecordingFormat};
use crate::recording::Recording;
use crate::spikes::{SpikeMetadata, SpikeSource};

pub const SIDECAR_NAME: &str = "structure.oebin";

const MESSAGE_FOLDER: &str = "MessageCenter";

/// The `structure.oebin` document. Unknown keys are rejected so that a
/// sidecar written by a newer, incompatible version fails loudly instead of
/// being half-read.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Sidecar {
    #[allow(dead_code)]
    format_version: String,
    #[serde(default)]
    continuous: Vec<ContinuousInfo>,
    #[serde(default)]
    events: Vec<EventInfo>,
    #[serde(default)]
    spikes: Vec<SpikeInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ContinuousInfo {
    folder_name: String,
    stream_name: String,
    sample_rate: f64,
    num_channels: usize,
    bit_depth: u32,
    channel_names: Vec<String>,
    bit_volts: BitVolts,
    source_processor_id: i32,
    source_processor_name: String,
    #[serde(default)]
    first_sample_number: i64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct EventInfo {
    folder_name: String,
    stream_name: String,
    source_processor_id: i32,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SpikeInfo {
    folder_name: String,
    name: String,
    stream_name: String,
    sample_rate: f64,
    num_channels: usize,
    samples_per_spike: usize,
    bit_volts: f64,
    source_processor_id: i32,
}

/// Either one scale for every channel or an explicit per-channel list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BitVolts {
    Uniform(f64),
    PerChannel(Vec<f64>),
}

impl ContinuousInfo {
    fn validate(&self, sidecar: &Path) -> Result<()> {
        let fail = |detail: String| FormatError::Sidecar {
            path: sidecar.to_path_buf(),
            detail,
        };
        if self.num_channels == 0 {
            return Err(fail(format!(
                "stream '{}': num_channels must be nonzero",
                self.stream_name
            ))
            .into());
        }
        if self.bit_depth != 16 {
            return Err(fail(format!(
                "stream '{}': unsupported bit_depth {} (only 16 is supported)",
                self.stream_name, self.bit_depth
            ))
            .into());
        }
        if self.channel_names.len() != self.num_channels {
            return Err(fail(format!(
                "stream '{}': channel_names has {} entries, num_channels is {}",
                self.stream_name,
                self.channel_names.len(),
                self.num_channels
            ))
            .into());
        }
        if let BitVolts::PerChannel(v) = &self.bit_volts {
            if v.len() != self.num_channels {
                return Err(fail(format!(
                    "stream '{}': bit_volts has {} entries, num_channels is {}",
                    self.stream_name,
                    v.len(),
                    self.num_channels
                ))
                .into());
            }
        }
        Ok(())
    }

    fn bit_volts_vec(&self) -> Vec<f64> {
        match &self.bit_volts {
            BitVolts::Uniform(v) => vec![*v; self.num_channels],
            BitVolts::PerChannel(v) => v.clone(),
        }
    }
}

/// True if this record-node directory holds flat binary recordings.
pub fn detect(directory: &Path) -> bool {
    let Ok(experiments) = matching_entries(directory, |n| n.starts_with("experiment")) else {
        return false;
    };
    experiments.iter().filter(|p| p.is_dir()).any(|exp| {
        matching_entries(exp, |n| n.starts_with("recording"))
            .map(|recs| recs.iter().any(|r| r.join(SIDECAR_NAME).is_file()))
            .unwrap_or(false)
    })
}

/// Enumerate `experiment*/recording*` directories as recordings, converting
/// the on-disk one-based numbering to zero-based indices.
pub fn detect_recordings(directory: &Path) -> Result<Vec<Recording>> {
    let mut recordings = Vec::new();
    for exp in matching_entries(directory, |n| n.starts_with("experiment"))? {
        if !exp.is_dir() {
            continue;
        }
        let exp_index = dir_index(&exp).unwrap_or(0);
        for rec in matching_entries(&exp, |n| n.starts_with("recording"))? {
            if !rec.join(SIDECAR_NAME).is_file() {
                continue;
            }
            let rec_index = dir_index(&rec).unwrap_or(0);
            recordings.push(Recording::open(
                &rec,
                RecordingFormat::FlatBinary,
                exp_index,
                rec_index,
            )?);
        }
    }
    Ok(recordings)
}

fn dir_index(path: &Path) -> Option<usize> {
    trailing_number(&path.file_name()?.to_string_lossy()).map(|n| n.saturating_sub(1))
}

/// Load one recording directory (the one containing `structure.oebin`).
pub(crate) fn load(directory: &Path) -> Result<RecordingData> {
    let sidecar_path = directory.join(SIDECAR_NAME);
    let text = read_file(&sidecar_path)?;
    let sidecar: Sidecar =
        serde_json::from_slice(&text).map_err(|e| FormatError::Sidecar {
            path: sidecar_path.clone(),
            detail: e.to_string(),
        })?;
    for info in &sidecar.continuous {
        info.validate(&sidecar_path)?;
    }

    let mut continuous = Vec::with_capacity(sidecar.continuous.len());
    for info in &sidecar.continuous {
        continuous.push(load_continuous(directory, info)?);
    }

    let mut records = Vec::new();
    for (i, info) in sidecar.events.iter().enumerate() {
        let stream_index = sidecar
            .continuous
            .iter()
            .position(|c| c.stream_name == info.stream_name)
            .unwrap_or(i);
        load_events(directory, info, stream_index, &mut records)?;
    }
    let events = EventTable::from_records(records);

    let mut spikes = Vec::with_capacity(sidecar.spikes.len());
    for info in &sidecar.spikes {
        spikes.push(load_spikes(directory, info)?);
    }

    let messages = load_messages(directory)?;

    debug!(
        directory = %directory.display(),
        streams = continuous.len(),
        events = events.len(),
        "loaded flat binary recording"
    );
    Ok(RecordingData {
        continuous,
        events,
        spikes,
        messages,
    })
}

fn load_continuous(directory: &Path, info: &ContinuousInfo) -> Result<ContinuousStream> {
    let folder = directory.join("continuous").join(trim_folder(&info.folder_name));
    let data_path = folder.join("continuous.dat");
    let file = File::open(&data_path)
        .map_err(|_| FormatError::MissingFile(data_path.clone()))?;
    // Safety: the map is read-only and the file is not expected to be
    // modified while the recording is open.
    let map = unsafe { Mmap::map(&file) }.map_err(|e| FormatError::Corrupt {
        path: data_path.clone(),
        detail: e.to_string(),
    })?;

    let frame = 2 * info.num_channels as u64;
    let actual = map.len() as u64;
    if actual == 0 || actual % frame != 0 {
        return Err(FormatError::Payload {
            path: data_path,
            expected: frame.max(actual - actual % frame),
            actual,
        }
        .into());
    }
    let num_samples = (actual / frame) as usize;

    let numbers_path = folder.join("sample_numbers.dat");
    let sample_numbers = if numbers_path.is_file() {
        let numbers = read_i64(&numbers_path)?;
        if numbers.len() != num_samples {
            return Err(FormatError::Payload {
                path: numbers_path,
                expected: num_samples as u64 * 8,
                actual: numbers.len() as u64 * 8,
            }
            .into());
        }
        numbers
    } else {
        (info.first_sample_number..info.first_sample_number + num_samples as i64).collect()
    };

    let timestamps_path = folder.join("timestamps.dat");
    let timestamps = if timestamps_path.is_file() {
        let stamps = read_f64(&timestamps_path)?;
        if stamps.len() != num_samples {
            return Err(FormatError::Payload {
                path: timestamps_path,
                expected: num_samples as u64 * 8,
                actual: stamps.len() as u64 * 8,
            }
            .into());
        }
        stamps
    } else {
        sample_numbers
            .iter()
            .map(|&s| s as f64 / info.sample_rate)
            .collect()
    };

    Ok(ContinuousStream {
        metadata: StreamMetadata {
            stream_name: info.stream_name.clone(),
            source_processor_id: info.source_processor_id,
            source_processor_name: info.source_processor_name.clone(),
            sample_rate: info.sample_rate,
            num_channels: info.num_channels,
            channel_names: info.channel_names.clone(),
            bit_volts: info.bit_volts_vec(),
        },
        source: SampleSource::FlatBinary {
            map,
            path: data_path,
        },
        sample_numbers,
        timestamps,
        global_timestamps: None,
    })
}

fn load_events(
    directory: &Path,
    info: &EventInfo,
    stream_index: usize,
    out: &mut Vec<EventRecord>,
) -> Result<()> {
    let folder = directory.join("events").join(trim_folder(&info.folder_name));
    let states = read_i16(&folder.join("states.dat"))?;
    let sample_numbers = read_i64(&folder.join("sample_numbers.dat"))?;
    if states.len() != sample_numbers.len() {
        return Err(FormatError::Payload {
            path: folder.join("states.dat"),
            expected: sample_numbers.len() as u64 * 2,
            actual: states.len() as u64 * 2,
        }
        .into());
    }

    let timestamps_path = folder.join("timestamps.dat");
    let timestamps = if timestamps_path.is_file() {
        read_f64(&timestamps_path)?
    } else {
        vec![-1.0; states.len()]
    };

    for i in 0..states.len() {
        // The state file encodes line and polarity together: +line for a
        // rising edge, -line for a falling one.
        let raw = states[i];
        out.push(EventRecord {
            sample_number: sample_numbers[i],
            timestamp: timestamps.get(i).copied().unwrap_or(-1.0),
            line: i32::from(raw).abs(),
            state: u8::from(raw > 0),
            processor_id: info.source_processor_id,
            stream_index,
            stream_name: info.stream_name.clone(),
            global_timestamp: None,
        });
    }
    Ok(())
}

fn load_spikes(directory: &Path, info: &SpikeInfo) -> Result<SpikeSource> {
    let folder = directory.join("spikes").join(trim_folder(&info.folder_name));
    let sample_numbers = read_i64(&folder.join("sample_numbers.dat"))?;
    let num_spikes = sample_numbers.len();

    let check_len = |path: PathBuf, len: usize, width: u64| -> Result<()> {
        if len != num_spikes {
            return Err(FormatError::Payload {
                path,
                expected: num_spikes as u64 * width,
                actual: len as u64 * width,
            }
            .into());
        }
        Ok(())
    };

    let waveforms_path = folder.join("waveforms.dat");
    let raw = read_i16(&waveforms_path)?;
    let per_spike = info.num_channels * info.samples_per_spike;
    if raw.len() != num_spikes * per_spike {
        return Err(FormatError::Payload {
            path: waveforms_path,
            expected: (num_spikes * per_spike) as u64 * 2,
            actual: raw.len() as u64 * 2,
        }
        .into());
    }
    let mut waveforms =
        Array3::<f64>::zeros((num_spikes, info.num_channels, info.samples_per_spike));
    for (flat, value) in raw.iter().enumerate() {
        let s = flat / per_spike;
        let c = (flat % per_spike) / info.samples_per_spike;
        let t = flat % info.samples_per_spike;
        waveforms[[s, c, t]] = *value as f64 * info.bit_volts;
    }

    // On disk the electrode index counts from one.
    let electrodes_path = folder.join("electrode_indices.dat");
    let electrodes_raw = read_u16(&electrodes_path)?;
    check_len(electrodes_path, electrodes_raw.len(), 2)?;
    let electrodes: Vec<u16> = electrodes_raw
        .into_iter()
        .map(|e| e.saturating_sub(1))
        .collect();

    let clusters_path = folder.join("clusters.dat");
    let clusters = read_i32(&clusters_path)?;
    check_len(clusters_path, clusters.len(), 4)?;

    let timestamps_path = folder.join("timestamps.dat");
    let timestamps = if timestamps_path.is_file() {
        let stamps = read_f64(&timestamps_path)?;
        check_len(timestamps_path, stamps.len(), 8)?;
        stamps
    } else {
        sample_numbers
            .iter()
            .map(|&s| s as f64 / info.sample_rate)
            .collect()
    };

    Ok(SpikeSource {
        metadata: SpikeMetadata {
            name: info.name.clone(),
            stream_name: info.stream_name.clone(),
            source_processor_id: info.source_processor_id,
            sample_rate: info.sample_rate,
            num_channels: info.num_channels,
            samples_per_spike: info.samples_per_spike,
        },
        waveforms,
        sample_numbers,
        timestamps,
        electrodes,
        clusters,
        global_timestamps: None,
    })
}

/// Free-text annotations live in a fixed folder that is not listed in the
/// sidecar. Absence simply means no messages were posted.
fn load_messages(directory: &Path) -> Result<Vec<MessageRecord>> {
    let folder = directory.join("events").join(MESSAGE_FOLDER);
    if !folder.is_dir() {
        return Ok(Vec::new());
    }
    let sample_numbers = read_i64(&folder.join("sample_numbers.dat"))?;
    let timestamps_path = folder.join("timestamps.dat");
    let timestamps = if timestamps_path.is_file() {
        read_f64(&timestamps_path)?
    } else {
        vec![-1.0; sample_numbers.len()]
    };
    let text_path = folder.join("text");
    let text = String::from_utf8_lossy(&read_file(&text_path)?).to_string();
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() != sample_numbers.len() {
        return Err(FormatError::Corrupt {
            path: text_path,
            detail: format!(
                "{} message lines for {} sample numbers",
                lines.len(),
                sample_numbers.len()
            ),
        }
        .into());
    }

    Ok(sample_numbers
        .iter()
        .zip(lines)
        .enumerate()
        .map(|(i, (&sample_number, line))| MessageRecord {
            sample_number,
            timestamp: timestamps.get(i).copied().unwrap_or(-1.0),
            message: line.to_string(),
        })
        .collect())
}

/// Sidecar folder names carry a trailing slash.
fn trim_folder(name: &str) -> &str {
    name.trim_end_matches('/')
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            FormatError::MissingFile(path.to_path_buf()).into()
        } else {
            crate::error::Error::Io(e)
        }
    })
}

fn check_width(path: &Path, bytes: &[u8], width: usize) -> Result<()> {
    if bytes.len() % width != 0 {
        return Err(FormatError::Corrupt {
            path: path.to_path_buf(),
            detail: format!(
                "file size {} is not a multiple of the {width}-byte element",
                bytes.len()
            ),
        }
        .into());
    }
    Ok(())
}

pub(crate) fn read_i64(path: &Path) -> Result<Vec<i64>> {
    let bytes = read_file(path)?;
    check_width(path, &bytes, 8)?;
    Ok(bytes
        .chunks_exact(8)
        .map(|c| i64::from_le_bytes(c.try_into().unwrap()))
        .collect())
}

pub(crate) fn read_f64(path: &Path) -> Result<Vec<f64>> {
    let bytes = read_file(path)?;
    check_width(path, &bytes, 8)?;
    Ok(bytes
        .chunks_exact(8)
        .map(|c| f64::from_le_bytes(c.try_into().unwrap()))
        .collect())
}

pub(crate) fn read_i16(path: &Path) -> Result<Vec<i16>> {
    let bytes = read_file(path)?;
    check_width(path, &bytes, 2)?;
    Ok(bytes
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes(c.try_into().unwrap()))
        .collect())
}

pub(crate) fn read_u16(path: &Path) -> Result<Vec<u16>> {
    let bytes = read_file(path)?;
    check_width(path, &bytes, 2)?;
    Ok(bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes(c.try_into().unwrap()))
        .collect())
}

pub(crate) fn read_i32(path: &Path) -> Result<Vec<i32>> {
    let bytes = read_file(path)?;
    check_width(path, &bytes, 4)?;
    Ok(bytes
        .chunks_exact(4)
        .map(|c| i32::from_le_bytes(c.try_into().unwrap()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sidecar_missing_required_field_names_it() {
        let json = r#"{
            "format_version": "0.4",
            "continuous": [{
                "folder_name": "probe/",
                "stream_name": "probe",
                "num_channels": 2,
                "bit_depth": 16,
                "channel_names": ["CH1", "CH2"],
                "bit_volts": 0.195,
                "source_processor_id": 100,
                "source_processor_name": "Probe"
            }]
        }"#;
        let err = serde_json::from_str::<Sidecar>(json).unwrap_err();
        assert!(err.to_string().contains("sample_rate"));
    }

    #[test]
    fn sidecar_unknown_field_is_rejected() {
        let json = r#"{"format_version": "0.4", "not_a_field": 1}"#;
        let err = serde_json::from_str::<Sidecar>(json).unwrap_err();
        assert!(err.to_string().contains("not_a_field"));
    }

    #[test]
    fn bit_volts_accepts_uniform_and_per_channel() {
        let uniform: BitVolts = serde_json::from_str("0.195").unwrap();
        assert!(matches!(uniform, BitVolts::Uniform(v) if v == 0.195));
        let per: BitVolts = serde_json::from_str("[0.1, 0.2]").unwrap();
        assert!(matches!(per, BitVolts::PerChannel(v) if v.len() == 2));
    }

    #[test]
    fn zero_channel_stream_is_rejected() {
        let info = ContinuousInfo {
            folder_name: "probe/".into(),
            stream_name: "probe".into(),
            sample_rate: 30000.0,
            num_channels: 0,
            bit_depth: 16,
            channel_names: vec![],
            bit_volts: BitVolts::Uniform(0.195),
            source_processor_id: 100,
            source_processor_name: "Probe".into(),
            first_sample_number: 0,
        };
        let err = info.validate(Path::new("structure.oebin")).unwrap_err();
        assert!(err.to_string().contains("num_channels"), "{err}");
    }

    #[test]
    fn channel_name_count_must_match() {
        let info = ContinuousInfo {
            folder_name: "probe/".into(),
            stream_name: "probe".into(),
            sample_rate: 30000.0,
            num_channels: 3,
            bit_depth: 16,
            channel_names: vec!["CH1".into()],
            bit_volts: BitVolts::Uniform(0.195),
            source_processor_id: 100,
            source_processor_name: "Probe".into(),
            first_sample_number: 0,
        };
        assert!(info.validate(Path::new("structure.oebin")).is_err());
    }
}
