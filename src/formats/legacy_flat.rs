//! Legacy flat format: one block-record file per channel plus a
//! `structure.openephys` XML sidecar.
//!
//! Every `.continuous` file starts with a 1024-byte ASCII header followed by
//! fixed 2070-byte records:
//!
//! ```text
//! i64 LE   first sample number of the block
//! u16 LE   number of valid samples (≤ 1024)
//! u16 LE   recording index
//! 1024 ×   i16 BIG-endian samples
//! 10 B     record marker [0,1,2,3,4,5,6,7,8,255]
//! ```
//!
//! Only the first `num_valid` samples of a block are real; a partially
//! filled final block contributes exactly its valid samples. Because a block
//! cannot be sliced on disk, this format materializes whole channels in
//! memory. Callers narrow the load with `set_sample_range` and
//! `set_selected_channels` before first access; the unrestricted load is
//! their own risk.

use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use ndarray::{Array2, Array3};
use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::debug;

use crate::continuous::{
    ContinuousStream, LegacyChannels, LegacyWindow, SampleSource, StreamMetadata,
};
use crate::error::{FormatError, RangeError, Result};
use crate::events::{EventRecord, EventTable};
use crate::formats::{matching_entries, RecordingData, RecordingFormat};
use crate::recording::Recording;
use crate::spikes::{SpikeMetadata, SpikeSource};

const HEADER_BYTES: u64 = 1024;
const SAMPLES_PER_BLOCK: usize = 1024;
const BLOCK_HEADER_BYTES: usize = 12;
const RECORD_MARKER: [u8; 10] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 255];
const RECORD_BYTES: u64 =
    (BLOCK_HEADER_BYTES + 2 * SAMPLES_PER_BLOCK + RECORD_MARKER.len()) as u64;

const EVENT_RECORD_BYTES: usize = 16;
const SPIKE_HEADER_BYTES: usize = 42;
/// Raw spike samples are stored unsigned with this midpoint offset.
const SPIKE_SAMPLE_OFFSET: f64 = 32768.0;

/// True if this record-node directory holds legacy flat recordings.
pub fn detect(directory: &Path) -> bool {
    matching_entries(directory, |n| {
        is_structure_file(n) || n.ends_with(".continuous") || n.ends_with(".events")
    })
    .map(|files| !files.is_empty())
    .unwrap_or(false)
}

fn is_structure_file(name: &str) -> bool {
    name.starts_with("structure") && name.ends_with(".openephys")
}

/// `structure.openephys` for the first experiment, `structure_<n>.openephys`
/// (one-based n ≥ 2) thereafter.
fn structure_file(directory: &Path, experiment_index: usize) -> PathBuf {
    if experiment_index == 0 {
        directory.join("structure.openephys")
    } else {
        directory.join(format!("structure_{}.openephys", experiment_index + 1))
    }
}

fn structure_experiment_index(name: &str) -> usize {
    name.strip_prefix("structure_")
        .and_then(|rest| rest.strip_suffix(".openephys"))
        .and_then(|digits| digits.parse::<usize>().ok())
        .map(|n| n.saturating_sub(1))
        .unwrap_or(0)
}

pub fn detect_recordings(directory: &Path) -> Result<Vec<Recording>> {
    let mut recordings = Vec::new();
    for structure in matching_entries(directory, is_structure_file)? {
        let name = structure.file_name().unwrap_or_default().to_string_lossy();
        let exp_index = structure_experiment_index(&name);
        let experiment = parse_structure(&structure)?;
        for rec in &experiment.recordings {
            recordings.push(Recording::open(
                directory,
                RecordingFormat::LegacyFlat,
                exp_index,
                rec.number.saturating_sub(1),
            )?);
        }
    }
    Ok(recordings)
}

pub(crate) fn load(
    directory: &Path,
    experiment_index: usize,
    recording_index: usize,
) -> Result<RecordingData> {
    let structure = structure_file(directory, experiment_index);
    let experiment = parse_structure(&structure)?;
    let recording = experiment
        .recordings
        .iter()
        .find(|r| r.number.saturating_sub(1) == recording_index)
        .ok_or_else(|| FormatError::Sidecar {
            path: structure.clone(),
            detail: format!("no RECORDING element with number {}", recording_index + 1),
        })?;

    let mut continuous = Vec::with_capacity(recording.streams.len());
    let mut records = Vec::new();
    let mut spikes = Vec::new();

    for (stream_index, stream) in recording.streams.iter().enumerate() {
        let files: Vec<PathBuf> = stream
            .channels
            .iter()
            .map(|c| directory.join(&c.filename))
            .collect();

        // Sample numbers come from the block headers alone; the payload is
        // not touched until a slice is requested.
        let sample_numbers = match files.first() {
            Some(first) => scan_sample_numbers(first, recording_index)?,
            None => Vec::new(),
        };
        // This format records no event clock for continuous data.
        let timestamps = sample_numbers
            .iter()
            .map(|&s| s as f64 / stream.sample_rate)
            .collect();

        let num_channels = stream.channels.len();
        continuous.push(ContinuousStream {
            metadata: StreamMetadata {
                stream_name: stream.name.clone(),
                source_processor_id: stream.source_node_id,
                source_processor_name: stream.source_node_name.clone(),
                sample_rate: stream.sample_rate,
                num_channels,
                channel_names: stream.channels.iter().map(|c| c.name.clone()).collect(),
                bit_volts: stream.channels.iter().map(|c| c.bit_volts).collect(),
            },
            source: SampleSource::Legacy(LegacyChannels {
                files,
                recording_index,
                sample_range: (i64::MIN, i64::MAX),
                selected_channels: (0..num_channels).collect(),
                window: None,
            }),
            sample_numbers,
            timestamps,
            global_timestamps: None,
        });

        for events_file in &stream.events_files {
            load_events(
                &directory.join(events_file),
                recording_index,
                stream_index,
                &stream.name,
                &mut records,
            )?;
        }
        for spike_channel in &stream.spike_channels {
            spikes.push(load_spikes(
                &directory.join(&spike_channel.filename),
                spike_channel,
                stream,
                recording_index,
            )?);
        }
    }

    let events = EventTable::from_records(records);
    debug!(
        directory = %directory.display(),
        experiment = experiment_index,
        recording = recording_index,
        streams = continuous.len(),
        "loaded legacy flat recording"
    );
    Ok(RecordingData {
        continuous,
        events,
        spikes,
        messages: Vec::new(),
    })
}

// ---------------------------------------------------------------------------
// XML sidecar

#[derive(Debug)]
struct ExperimentInfo {
    recordings: Vec<RecordingInfo>,
}

#[derive(Debug)]
struct RecordingInfo {
    /// One-based number from the `number` attribute.
    number: usize,
    streams: Vec<StreamInfo>,
}

#[derive(Debug)]
struct StreamInfo {
    name: String,
    sample_rate: f64,
    source_node_id: i32,
    source_node_name: String,
    channels: Vec<ChannelInfo>,
    events_files: Vec<String>,
    spike_channels: Vec<SpikeChannelInfo>,
}

#[derive(Debug)]
struct ChannelInfo {
    name: String,
    bit_volts: f64,
    filename: String,
}

#[derive(Debug)]
struct SpikeChannelInfo {
    name: String,
    filename: String,
    bit_volts: f64,
}

fn parse_structure(path: &Path) -> Result<ExperimentInfo> {
    let text = std::fs::read_to_string(path)
        .map_err(|_| FormatError::MissingFile(path.to_path_buf()))?;
    let sidecar_err = |detail: String| FormatError::Sidecar {
        path: path.to_path_buf(),
        detail,
    };

    let mut reader = Reader::from_str(&text);
    reader.config_mut().trim_text(true);

    let mut recordings: Vec<RecordingInfo> = Vec::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| sidecar_err(e.to_string()))?;
        match event {
            Event::Start(e) | Event::Empty(e) => {
                let attrs = collect_attributes(&e).map_err(&sidecar_err)?;
                match e.name().as_ref() {
                    b"EXPERIMENT" => {}
                    b"RECORDING" => {
                        let number = attr_parse(&attrs, "number").map_err(&sidecar_err)?;
                        recordings.push(RecordingInfo {
                            number,
                            streams: Vec::new(),
                        });
                    }
                    b"STREAM" => {
                        let recording = recordings
                            .last_mut()
                            .ok_or_else(|| sidecar_err("STREAM outside RECORDING".into()))?;
                        recording.streams.push(StreamInfo {
                            name: attr_string(&attrs, "name").map_err(&sidecar_err)?,
                            sample_rate: attr_parse(&attrs, "sample_rate")
                                .map_err(&sidecar_err)?,
                            source_node_id: attr_parse(&attrs, "source_node_id")
                                .map_err(&sidecar_err)?,
                            source_node_name: attr_string(&attrs, "source_node_name")
                                .map_err(&sidecar_err)?,
                            channels: Vec::new(),
                            events_files: Vec::new(),
                            spike_channels: Vec::new(),
                        });
                    }
                    b"CHANNEL" => {
                        let stream = current_stream(&mut recordings)
                            .ok_or_else(|| sidecar_err("CHANNEL outside STREAM".into()))?;
                        stream.channels.push(ChannelInfo {
                            name: attr_string(&attrs, "name").map_err(&sidecar_err)?,
                            bit_volts: attr_parse(&attrs, "bitVolts").map_err(&sidecar_err)?,
                            filename: attr_string(&attrs, "filename").map_err(&sidecar_err)?,
                        });
                    }
                    b"EVENTS" => {
                        let stream = current_stream(&mut recordings)
                            .ok_or_else(|| sidecar_err("EVENTS outside STREAM".into()))?;
                        stream
                            .events_files
                            .push(attr_string(&attrs, "filename").map_err(&sidecar_err)?);
                    }
                    b"SPIKECHANNEL" => {
                        let stream = current_stream(&mut recordings)
                            .ok_or_else(|| sidecar_err("SPIKECHANNEL outside STREAM".into()))?;
                        stream.spike_channels.push(SpikeChannelInfo {
                            name: attr_string(&attrs, "name").map_err(&sidecar_err)?,
                            filename: attr_string(&attrs, "filename").map_err(&sidecar_err)?,
                            bit_volts: attr_parse(&attrs, "bitVolts").map_err(&sidecar_err)?,
                        });
                    }
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if recordings.is_empty() {
        return Err(sidecar_err("no RECORDING elements".into()).into());
    }
    Ok(ExperimentInfo { recordings })
}

fn current_stream(recordings: &mut [RecordingInfo]) -> Option<&mut StreamInfo> {
    recordings.last_mut()?.streams.last_mut()
}

fn collect_attributes(
    e: &quick_xml::events::BytesStart<'_>,
) -> std::result::Result<Vec<(String, String)>, String> {
    let mut attrs = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        let value = attr
            .unescape_value()
            .map_err(|e| e.to_string())?
            .to_string();
        attrs.push((key, value));
    }
    Ok(attrs)
}

fn attr_string(
    attrs: &[(String, String)],
    key: &str,
) -> std::result::Result<String, String> {
    attrs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.clone())
        .ok_or_else(|| format!("missing attribute '{key}'"))
}

fn attr_parse<T: std::str::FromStr>(
    attrs: &[(String, String)],
    key: &str,
) -> std::result::Result<T, String> {
    attr_string(attrs, key)?
        .parse()
        .map_err(|_| format!("attribute '{key}' is not a valid number"))
}

// ---------------------------------------------------------------------------
// .continuous payloads

fn check_record_geometry(path: &Path, len: u64) -> Result<u64> {
    if len < HEADER_BYTES || (len - HEADER_BYTES) % RECORD_BYTES != 0 {
        return Err(FormatError::Payload {
            path: path.to_path_buf(),
            expected: HEADER_BYTES + (len.saturating_sub(HEADER_BYTES) / RECORD_BYTES) * RECORD_BYTES,
            actual: len,
        }
        .into());
    }
    Ok((len - HEADER_BYTES) / RECORD_BYTES)
}

/// Collect the sample numbers stored in one channel file for one recording,
/// reading only the 12-byte block headers.
fn scan_sample_numbers(path: &Path, recording_index: usize) -> Result<Vec<i64>> {
    let file = std::fs::File::open(path)
        .map_err(|_| FormatError::MissingFile(path.to_path_buf()))?;
    let len = file.metadata()?.len();
    let num_records = check_record_geometry(path, len)?;

    let mut reader = BufReader::new(file);
    reader.seek(SeekFrom::Start(HEADER_BYTES))?;

    let mut sample_numbers = Vec::new();
    let mut header = [0u8; BLOCK_HEADER_BYTES];
    for _ in 0..num_records {
        reader.read_exact(&mut header)?;
        let (first, num_valid, rec_index) = parse_block_header(path, &header)?;
        if rec_index == recording_index {
            sample_numbers.extend(first..first + num_valid as i64);
        }
        reader.seek(SeekFrom::Current(
            (RECORD_BYTES as i64) - (BLOCK_HEADER_BYTES as i64),
        ))?;
    }
    Ok(sample_numbers)
}

fn parse_block_header(path: &Path, header: &[u8]) -> Result<(i64, usize, usize)> {
    let first = i64::from_le_bytes(header[0..8].try_into().unwrap());
    let num_valid = u16::from_le_bytes(header[8..10].try_into().unwrap()) as usize;
    let rec_index = u16::from_le_bytes(header[10..12].try_into().unwrap()) as usize;
    if num_valid > SAMPLES_PER_BLOCK {
        return Err(FormatError::Corrupt {
            path: path.to_path_buf(),
            detail: format!(
                "block claims {num_valid} valid samples, maximum is {SAMPLES_PER_BLOCK}"
            ),
        }
        .into());
    }
    Ok((first, num_valid, rec_index))
}

/// Materialize the selected channels of one recording, restricted to the
/// sample-number window `[range.0, range.1)`. Raw values, unscaled.
pub(crate) fn load_window(
    files: &[PathBuf],
    recording_index: usize,
    sample_range: (i64, i64),
    selected_channels: &[usize],
) -> Result<LegacyWindow> {
    let mut sample_numbers: Option<Vec<i64>> = None;
    let mut columns: Vec<Vec<f64>> = Vec::with_capacity(selected_channels.len());

    for &channel in selected_channels {
        let path = files.get(channel).ok_or(RangeError::Channel {
            channel,
            num_channels: files.len(),
        })?;
        let (numbers, values) = load_channel(path, recording_index, sample_range)?;
        match &sample_numbers {
            None => sample_numbers = Some(numbers),
            Some(existing) => {
                if *existing != numbers {
                    return Err(FormatError::Corrupt {
                        path: path.clone(),
                        detail: "channel files disagree on sample numbers".into(),
                    }
                    .into());
                }
            }
        }
        columns.push(values);
    }

    let sample_numbers = sample_numbers.unwrap_or_default();
    let rows = sample_numbers.len();
    let mut raw = Array2::<f64>::zeros((rows, columns.len()));
    for (col, values) in columns.iter().enumerate() {
        for (row, &v) in values.iter().enumerate() {
            raw[[row, col]] = v;
        }
    }
    Ok(LegacyWindow {
        raw,
        sample_numbers,
    })
}

/// Decode every block of one channel file that belongs to the recording and
/// intersects the window.
fn load_channel(
    path: &Path,
    recording_index: usize,
    sample_range: (i64, i64),
) -> Result<(Vec<i64>, Vec<f64>)> {
    let bytes = std::fs::read(path).map_err(|_| FormatError::MissingFile(path.to_path_buf()))?;
    let num_records = check_record_geometry(path, bytes.len() as u64)?;

    let mut sample_numbers = Vec::new();
    let mut values = Vec::new();
    for i in 0..num_records as usize {
        let record = &bytes[HEADER_BYTES as usize + i * RECORD_BYTES as usize..]
            [..RECORD_BYTES as usize];
        let (first, num_valid, rec_index) =
            parse_block_header(path, &record[..BLOCK_HEADER_BYTES])?;
        if rec_index != recording_index {
            continue;
        }
        let marker = &record[RECORD_BYTES as usize - RECORD_MARKER.len()..];
        if marker != RECORD_MARKER {
            return Err(FormatError::Corrupt {
                path: path.to_path_buf(),
                detail: format!("bad record marker in block {i}"),
            }
            .into());
        }
        if first >= sample_range.1 || first + num_valid as i64 <= sample_range.0 {
            continue;
        }
        let payload = &record[BLOCK_HEADER_BYTES..];
        for s in 0..num_valid {
            let sample_number = first + s as i64;
            if sample_number < sample_range.0 || sample_number >= sample_range.1 {
                continue;
            }
            let raw = i16::from_be_bytes([payload[2 * s], payload[2 * s + 1]]);
            sample_numbers.push(sample_number);
            values.push(raw as f64);
        }
    }
    Ok((sample_numbers, values))
}

// ---------------------------------------------------------------------------
// .events payloads

fn load_events(
    path: &Path,
    recording_index: usize,
    stream_index: usize,
    stream_name: &str,
    out: &mut Vec<EventRecord>,
) -> Result<()> {
    let bytes = std::fs::read(path).map_err(|_| FormatError::MissingFile(path.to_path_buf()))?;
    if bytes.len() < HEADER_BYTES as usize
        || (bytes.len() - HEADER_BYTES as usize) % EVENT_RECORD_BYTES != 0
    {
        return Err(FormatError::Payload {
            path: path.to_path_buf(),
            expected: HEADER_BYTES
                + (bytes.len() as u64).saturating_sub(HEADER_BYTES) / EVENT_RECORD_BYTES as u64
                    * EVENT_RECORD_BYTES as u64,
            actual: bytes.len() as u64,
        }
        .into());
    }

    for record in bytes[HEADER_BYTES as usize..].chunks_exact(EVENT_RECORD_BYTES) {
        if record[14] as usize != recording_index {
            continue;
        }
        out.push(EventRecord {
            sample_number: i64::from_le_bytes(record[0..8].try_into().unwrap()),
            // No event clock in this format.
            timestamp: -1.0,
            // Stored zero-based; exposed one-based like the other formats.
            line: i32::from(record[13]) + 1,
            state: record[12],
            processor_id: i32::from(record[11]),
            stream_index,
            stream_name: stream_name.to_string(),
            global_timestamp: None,
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// .spikes payloads

fn load_spikes(
    path: &Path,
    info: &SpikeChannelInfo,
    stream: &StreamInfo,
    recording_index: usize,
) -> Result<SpikeSource> {
    let bytes = std::fs::read(path).map_err(|_| FormatError::MissingFile(path.to_path_buf()))?;
    let payload = &bytes[(HEADER_BYTES as usize).min(bytes.len())..];

    let corrupt = |detail: String| FormatError::Corrupt {
        path: path.to_path_buf(),
        detail,
    };

    if payload.is_empty() {
        return Ok(empty_spike_source(info, stream, 0, 0));
    }
    if payload.len() < SPIKE_HEADER_BYTES {
        return Err(corrupt("truncated spike record header".into()).into());
    }

    // Channel and waveform-length counts sit in the first record's header;
    // every record in one file shares them.
    let num_channels = u16::from_le_bytes(payload[19..21].try_into().unwrap()) as usize;
    let samples_per_spike = u16::from_le_bytes(payload[21..23].try_into().unwrap()) as usize;
    let record_bytes = SPIKE_HEADER_BYTES
        + 2 * num_channels * samples_per_spike
        + 4 * num_channels
        + 2 * num_channels
        + 2;
    if payload.len() % record_bytes != 0 {
        return Err(FormatError::Payload {
            path: path.to_path_buf(),
            expected: HEADER_BYTES + (payload.len() / record_bytes * record_bytes) as u64,
            actual: bytes.len() as u64,
        }
        .into());
    }

    let mut sample_numbers = Vec::new();
    let mut electrodes = Vec::new();
    let mut clusters = Vec::new();
    let mut waveform_rows: Vec<Vec<f64>> = Vec::new();

    for record in payload.chunks_exact(record_bytes) {
        let rec_index =
            u16::from_le_bytes(record[record_bytes - 2..].try_into().unwrap()) as usize;
        if rec_index != recording_index {
            continue;
        }
        sample_numbers.push(i64::from_le_bytes(record[1..9].try_into().unwrap()));
        clusters.push(i32::from(u16::from_le_bytes(record[23..25].try_into().unwrap())));
        electrodes.push(u16::from_le_bytes(record[25..27].try_into().unwrap()));

        let samples = &record[SPIKE_HEADER_BYTES..][..2 * num_channels * samples_per_spike];
        let row: Vec<f64> = samples
            .chunks_exact(2)
            .map(|c| {
                let raw = u16::from_le_bytes(c.try_into().unwrap()) as f64;
                (raw - SPIKE_SAMPLE_OFFSET) * info.bit_volts
            })
            .collect();
        waveform_rows.push(row);
    }

    let num_spikes = sample_numbers.len();
    let mut waveforms = Array3::<f64>::zeros((num_spikes, num_channels, samples_per_spike));
    for (s, row) in waveform_rows.iter().enumerate() {
        for c in 0..num_channels {
            for t in 0..samples_per_spike {
                waveforms[[s, c, t]] = row[c * samples_per_spike + t];
            }
        }
    }

    let timestamps = sample_numbers
        .iter()
        .map(|&s| s as f64 / stream.sample_rate)
        .collect();
    Ok(SpikeSource {
        metadata: SpikeMetadata {
            name: info.name.clone(),
            stream_name: stream.name.clone(),
            source_processor_id: stream.source_node_id,
            sample_rate: stream.sample_rate,
            num_channels,
            samples_per_spike,
        },
        waveforms,
        sample_numbers,
        timestamps,
        electrodes,
        clusters,
        global_timestamps: None,
    })
}

fn empty_spike_source(
    info: &SpikeChannelInfo,
    stream: &StreamInfo,
    num_channels: usize,
    samples_per_spike: usize,
) -> SpikeSource {
    SpikeSource {
        metadata: SpikeMetadata {
            name: info.name.clone(),
            stream_name: stream.name.clone(),
            source_processor_id: stream.source_node_id,
            sample_rate: stream.sample_rate,
            num_channels,
            samples_per_spike,
        },
        waveforms: Array3::zeros((0, num_channels, samples_per_spike)),
        sample_numbers: Vec::new(),
        timestamps: Vec::new(),
        electrodes: Vec::new(),
        clusters: Vec::new(),
        global_timestamps: None,
    }
}
