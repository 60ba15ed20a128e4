//! Fixture builders encoding the same logical recording in each of the
//! three on-disk formats, so the format-transparency tests can compare
//! loaders bit for bit.
#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use ndarray::{Array1, Array2};
use zarrs::array::{ArrayBuilder, DataType, FillValue};
use zarrs::filesystem::FilesystemStore;
use zarrs::group::GroupBuilder;

pub const NUM_SAMPLES: usize = 12;
pub const NUM_CHANNELS: usize = 2;
pub const SAMPLE_RATE: f64 = 1000.0;
pub const BIT_VOLTS: f64 = 0.5;
pub const PROCESSOR_ID: i32 = 100;

/// Rising edges on TTL line 1 shared by every fixture.
pub const RISING_EDGES: [i64; 3] = [2, 6, 10];
/// Falling edges on TTL line 1 shared by every fixture.
pub const FALLING_EDGES: [i64; 2] = [4, 8];

/// Deterministic raw sample value for sample `s`, channel `c`.
pub fn raw_value(s: usize, c: usize) -> i16 {
    (10 * s + c) as i16
}

fn raw_matrix() -> Vec<Vec<i16>> {
    (0..NUM_SAMPLES)
        .map(|s| (0..NUM_CHANNELS).map(|c| raw_value(s, c)).collect())
        .collect()
}

/// Interleaved TTL edge list as (sample_number, signed line) pairs.
fn ttl_edges() -> Vec<(i64, i16)> {
    let mut edges: Vec<(i64, i16)> = RISING_EDGES.iter().map(|&s| (s, 1)).collect();
    edges.extend(FALLING_EDGES.iter().map(|&s| (s, -1)));
    edges.sort_by_key(|&(s, _)| s);
    edges
}

// ---------------------------------------------------------------------------
// Flat binary

pub fn write_flat_binary(node_dir: &Path) -> Result<()> {
    let recording = node_dir.join("experiment1").join("recording1");
    write_flat_binary_stream(
        &recording,
        "probe",
        "Probe",
        PROCESSOR_ID,
        SAMPLE_RATE,
        &raw_matrix(),
        0,
        &ttl_edges(),
    )?;
    write_flat_binary_sidecar(
        &recording,
        &[("probe", "Probe", PROCESSOR_ID, SAMPLE_RATE, NUM_CHANNELS)],
    )
}

/// Two streams sharing one physical sync pulse: the probe sees rising edges
/// at [100, 500, 900], the DAQ sees the same pulses at [50, 450, 850].
pub fn write_flat_binary_two_streams(node_dir: &Path) -> Result<()> {
    let recording = node_dir.join("experiment1").join("recording1");
    let samples: Vec<Vec<i16>> = (0..1000).map(|s| vec![s as i16, (s + 1) as i16]).collect();

    let probe_edges: Vec<(i64, i16)> = [100i64, 500, 900].iter().map(|&s| (s, 1)).collect();
    write_flat_binary_stream(
        &recording, "probe", "Probe", 100, 1000.0, &samples, 0, &probe_edges,
    )?;

    let daq_edges: Vec<(i64, i16)> = [50i64, 450, 850].iter().map(|&s| (s, 1)).collect();
    write_flat_binary_stream(
        &recording, "daq", "DAQ", 103, 1000.0, &samples, 0, &daq_edges,
    )?;

    write_flat_binary_sidecar(
        &recording,
        &[
            ("probe", "Probe", 100, 1000.0, 2),
            ("daq", "DAQ", 103, 1000.0, 2),
        ],
    )
}

pub fn write_flat_binary_stream(
    recording: &Path,
    stream: &str,
    processor_name: &str,
    processor_id: i32,
    sample_rate: f64,
    samples: &[Vec<i16>],
    first_sample_number: i64,
    edges: &[(i64, i16)],
) -> Result<()> {
    let folder = format!("{processor_name}-{processor_id}.{stream}");

    let continuous = recording.join("continuous").join(&folder);
    std::fs::create_dir_all(&continuous)?;
    let mut data = Vec::new();
    for row in samples {
        for &v in row {
            data.extend_from_slice(&v.to_le_bytes());
        }
    }
    std::fs::write(continuous.join("continuous.dat"), &data)?;
    let numbers: Vec<u8> = (first_sample_number..first_sample_number + samples.len() as i64)
        .flat_map(|s| s.to_le_bytes())
        .collect();
    std::fs::write(continuous.join("sample_numbers.dat"), &numbers)?;
    let stamps: Vec<u8> = (first_sample_number..first_sample_number + samples.len() as i64)
        .flat_map(|s| (s as f64 / sample_rate).to_le_bytes())
        .collect();
    std::fs::write(continuous.join("timestamps.dat"), &stamps)?;

    let events = recording.join("events").join(&folder);
    std::fs::create_dir_all(&events)?;
    let states: Vec<u8> = edges.iter().flat_map(|&(_, l)| l.to_le_bytes()).collect();
    std::fs::write(events.join("states.dat"), &states)?;
    let event_numbers: Vec<u8> = edges.iter().flat_map(|&(s, _)| s.to_le_bytes()).collect();
    std::fs::write(events.join("sample_numbers.dat"), &event_numbers)?;
    Ok(())
}

pub fn write_flat_binary_sidecar(
    recording: &Path,
    streams: &[(&str, &str, i32, f64, usize)],
) -> Result<()> {
    let continuous: Vec<serde_json::Value> = streams
        .iter()
        .map(|&(stream, processor_name, processor_id, sample_rate, channels)| {
            serde_json::json!({
                "folder_name": format!("{processor_name}-{processor_id}.{stream}/"),
                "stream_name": stream,
                "sample_rate": sample_rate,
                "num_channels": channels,
                "bit_depth": 16,
                "channel_names": (0..channels).map(|c| format!("CH{}", c + 1)).collect::<Vec<_>>(),
                "bit_volts": BIT_VOLTS,
                "source_processor_id": processor_id,
                "source_processor_name": processor_name,
            })
        })
        .collect();
    let events: Vec<serde_json::Value> = streams
        .iter()
        .map(|&(stream, processor_name, processor_id, _, _)| {
            serde_json::json!({
                "folder_name": format!("{processor_name}-{processor_id}.{stream}/"),
                "stream_name": stream,
                "source_processor_id": processor_id,
            })
        })
        .collect();
    let sidecar = serde_json::json!({
        "format_version": "0.4",
        "continuous": continuous,
        "events": events,
        "spikes": [],
    });
    std::fs::write(
        recording.join("structure.oebin"),
        serde_json::to_vec_pretty(&sidecar)?,
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Container

pub fn write_container(node_dir: &Path) -> Result<()> {
    let store_path = node_dir.join("experiment1.zarr");
    std::fs::create_dir_all(&store_path)?;
    let store = Arc::new(FilesystemStore::new(&store_path)?);

    for path in ["/", "/acquisition"] {
        let group = GroupBuilder::new().build(store.clone(), path)?;
        group.store_metadata()?;
    }

    let group_path = format!("/acquisition/Probe-{PROCESSOR_ID}.probe");
    let mut group = GroupBuilder::new().build(store.clone(), &group_path)?;
    group.attributes_mut().extend([
        ("series_type".to_string(), serde_json::json!("continuous")),
        ("stream_name".to_string(), serde_json::json!("probe")),
        ("sample_rate".to_string(), serde_json::json!(SAMPLE_RATE)),
        ("num_channels".to_string(), serde_json::json!(NUM_CHANNELS)),
        (
            "channel_names".to_string(),
            serde_json::json!(["CH1", "CH2"]),
        ),
        ("bit_volts".to_string(), serde_json::json!(BIT_VOLTS)),
        (
            "source_processor_id".to_string(),
            serde_json::json!(PROCESSOR_ID),
        ),
        (
            "source_processor_name".to_string(),
            serde_json::json!("Probe"),
        ),
    ]);
    group.store_metadata()?;

    let mut data = Array2::<i16>::zeros((NUM_SAMPLES, NUM_CHANNELS));
    for ((s, c), v) in data.indexed_iter_mut() {
        *v = raw_value(s, c);
    }
    let array = ArrayBuilder::new(
        vec![NUM_SAMPLES as u64, NUM_CHANNELS as u64],
        vec![4, NUM_CHANNELS as u64],
        DataType::Int16,
        FillValue::from(0i16),
    )
    .build(store.clone(), &format!("{group_path}/data"))?;
    array.store_metadata()?;
    array.store_array_subset_ndarray::<i16, _>(&[0, 0], data)?;

    let numbers = Array1::<i64>::from_iter(0..NUM_SAMPLES as i64);
    let array = ArrayBuilder::new(
        vec![NUM_SAMPLES as u64],
        vec![NUM_SAMPLES as u64],
        DataType::Int64,
        FillValue::from(0i64),
    )
    .build(store.clone(), &format!("{group_path}/sample_numbers"))?;
    array.store_metadata()?;
    array.store_array_subset_ndarray::<i64, _>(&[0], numbers)?;

    let stamps =
        Array1::<f64>::from_iter((0..NUM_SAMPLES).map(|s| s as f64 / SAMPLE_RATE));
    let array = ArrayBuilder::new(
        vec![NUM_SAMPLES as u64],
        vec![NUM_SAMPLES as u64],
        DataType::Float64,
        FillValue::from(0.0f64),
    )
    .build(store.clone(), &format!("{group_path}/timestamps"))?;
    array.store_metadata()?;
    array.store_array_subset_ndarray::<f64, _>(&[0], stamps)?;

    let ttl_path = format!("/acquisition/Probe-{PROCESSOR_ID}.probe-TTL");
    let mut group = GroupBuilder::new().build(store.clone(), &ttl_path)?;
    group.attributes_mut().extend([
        ("series_type".to_string(), serde_json::json!("ttl")),
        ("stream_name".to_string(), serde_json::json!("probe")),
        (
            "source_processor_id".to_string(),
            serde_json::json!(PROCESSOR_ID),
        ),
    ]);
    group.store_metadata()?;

    let edges = ttl_edges();
    let states = Array1::<i16>::from_iter(edges.iter().map(|&(_, l)| l));
    let array = ArrayBuilder::new(
        vec![edges.len() as u64],
        vec![edges.len() as u64],
        DataType::Int16,
        FillValue::from(0i16),
    )
    .build(store.clone(), &format!("{ttl_path}/states"))?;
    array.store_metadata()?;
    array.store_array_subset_ndarray::<i16, _>(&[0], states)?;

    let numbers = Array1::<i64>::from_iter(edges.iter().map(|&(s, _)| s));
    let array = ArrayBuilder::new(
        vec![edges.len() as u64],
        vec![edges.len() as u64],
        DataType::Int64,
        FillValue::from(0i64),
    )
    .build(store.clone(), &format!("{ttl_path}/sample_numbers"))?;
    array.store_metadata()?;
    array.store_array_subset_ndarray::<i64, _>(&[0], numbers)?;

    let stamps =
        Array1::<f64>::from_iter(edges.iter().map(|&(s, _)| s as f64 / SAMPLE_RATE));
    let array = ArrayBuilder::new(
        vec![edges.len() as u64],
        vec![edges.len() as u64],
        DataType::Float64,
        FillValue::from(0.0f64),
    )
    .build(store.clone(), &format!("{ttl_path}/timestamps"))?;
    array.store_metadata()?;
    array.store_array_subset_ndarray::<f64, _>(&[0], stamps)?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Legacy flat

const LEGACY_MARKER: [u8; 10] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 255];

pub fn write_legacy(node_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(node_dir)?;
    for c in 0..NUM_CHANNELS {
        let samples: Vec<i16> = (0..NUM_SAMPLES).map(|s| raw_value(s, c)).collect();
        write_legacy_channel(
            &node_dir.join(format!("100_CH{}.continuous", c + 1)),
            &[(0, samples, 0)],
        )?;
    }
    write_legacy_events(&node_dir.join("all_channels.events"), &ttl_edges(), 0)?;
    write_legacy_structure(node_dir, NUM_CHANNELS)
}

/// One channel file from explicit blocks of (first sample number, valid
/// samples, recording index).
pub fn write_legacy_channel(path: &Path, blocks: &[(i64, Vec<i16>, u16)]) -> Result<()> {
    let mut bytes = vec![0u8; 1024];
    let header = format!(
        "header.format = 'Open Ephys Data Format'; header.sampleRate = {SAMPLE_RATE}; header.blockLength = 1024; header.bitVolts = {BIT_VOLTS};"
    );
    bytes[..header.len()].copy_from_slice(header.as_bytes());

    for &(first, ref samples, recording_index) in blocks {
        assert!(samples.len() <= 1024);
        bytes.extend_from_slice(&first.to_le_bytes());
        bytes.extend_from_slice(&(samples.len() as u16).to_le_bytes());
        bytes.extend_from_slice(&recording_index.to_le_bytes());
        for &v in samples {
            bytes.extend_from_slice(&v.to_be_bytes());
        }
        for _ in samples.len()..1024 {
            bytes.extend_from_slice(&0i16.to_be_bytes());
        }
        bytes.extend_from_slice(&LEGACY_MARKER);
    }
    std::fs::write(path, bytes)?;
    Ok(())
}

pub fn write_legacy_events(
    path: &Path,
    edges: &[(i64, i16)],
    recording_index: u8,
) -> Result<()> {
    let mut bytes = vec![0u8; 1024];
    for &(sample, signed_line) in edges {
        let mut record = [0u8; 16];
        record[0..8].copy_from_slice(&sample.to_le_bytes());
        record[11] = PROCESSOR_ID as u8;
        record[12] = u8::from(signed_line > 0);
        // Stored zero-based on disk.
        record[13] = (signed_line.unsigned_abs() as u8) - 1;
        record[14] = recording_index;
        bytes.extend_from_slice(&record);
    }
    std::fs::write(path, bytes)?;
    Ok(())
}

pub fn write_legacy_structure(node_dir: &Path, num_channels: usize) -> Result<()> {
    let channels: String = (0..num_channels)
        .map(|c| {
            format!(
                r#"<CHANNEL name="CH{n}" bitVolts="{BIT_VOLTS}" filename="100_CH{n}.continuous"/>"#,
                n = c + 1
            )
        })
        .collect();
    let xml = format!(
        r#"<EXPERIMENT version="0.6" number="1">
    <RECORDING number="1">
        <STREAM name="probe" sample_rate="{SAMPLE_RATE}" source_node_id="{PROCESSOR_ID}" source_node_name="Probe">
            {channels}
            <EVENTS filename="all_channels.events"/>
        </STREAM>
    </RECORDING>
</EXPERIMENT>"#
    );
    std::fs::write(node_dir.join("structure.openephys"), xml)?;
    Ok(())
}
