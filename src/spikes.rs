//! Spike waveform sources (one per electrode group).

use ndarray::{Array3, ArrayView2};

/// Metadata describing one electrode group.
#[derive(Debug, Clone)]
pub struct SpikeMetadata {
    pub name: String,
    pub stream_name: String,
    pub source_processor_id: i32,
    pub sample_rate: f64,
    pub num_channels: usize,
    pub samples_per_spike: usize,
}

/// All spikes detected on one electrode group.
///
/// Waveforms are stored spikes × channels × samples, already scaled to
/// microvolts. Electrode indices are zero-based internally (the on-disk
/// formats number them from one).
#[derive(Debug)]
pub struct SpikeSource {
    pub metadata: SpikeMetadata,
    pub waveforms: Array3<f64>,
    pub sample_numbers: Vec<i64>,
    pub timestamps: Vec<f64>,
    pub electrodes: Vec<u16>,
    pub clusters: Vec<i32>,
    /// Populated only after synchronization against a main sync line.
    pub global_timestamps: Option<Vec<f64>>,
}

impl SpikeSource {
    pub fn num_spikes(&self) -> usize {
        self.sample_numbers.len()
    }

    /// The waveform of one spike as a channels × samples view.
    pub fn waveform(&self, spike_index: usize) -> ArrayView2<'_, f64> {
        self.waveforms.index_axis(ndarray::Axis(0), spike_index)
    }
}
