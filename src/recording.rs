//! One recording: the loaded streams of a single (experiment, recording)
//! pair plus the sync-line registry used to reconcile their clocks.

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::continuous::ContinuousStream;
use crate::error::{Result, SyncError};
use crate::events::{EventTable, MessageRecord};
use crate::formats::{self, RecordingFormat};
use crate::spikes::SpikeSource;
use crate::sync::{fit_affine, rising_edges, AffineMap, SyncLine};

/// A single recording, identified by record node, experiment index, and
/// recording index (zero-based; the acquisition software numbers from one).
///
/// Metadata and event tables are loaded eagerly at open; continuous sample
/// payloads stay lazy until sliced.
#[derive(Debug)]
pub struct Recording {
    directory: PathBuf,
    format: RecordingFormat,
    experiment_index: usize,
    recording_index: usize,
    continuous: Vec<ContinuousStream>,
    events: EventTable,
    spikes: Vec<SpikeSource>,
    messages: Vec<MessageRecord>,
    sync_lines: Vec<SyncLine>,
}

impl Recording {
    pub fn open(
        directory: &Path,
        format: RecordingFormat,
        experiment_index: usize,
        recording_index: usize,
    ) -> Result<Self> {
        let data = formats::load(directory, format, experiment_index, recording_index)?;
        Ok(Self {
            directory: directory.to_path_buf(),
            format,
            experiment_index,
            recording_index,
            continuous: data.continuous,
            events: data.events,
            spikes: data.spikes,
            messages: data.messages,
            sync_lines: Vec::new(),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn format(&self) -> RecordingFormat {
        self.format
    }

    pub fn experiment_index(&self) -> usize {
        self.experiment_index
    }

    pub fn recording_index(&self) -> usize {
        self.recording_index
    }

    pub fn continuous(&self) -> &[ContinuousStream] {
        &self.continuous
    }

    pub fn continuous_mut(&mut self) -> &mut [ContinuousStream] {
        &mut self.continuous
    }

    pub fn events(&self) -> &EventTable {
        &self.events
    }

    pub fn spikes(&self) -> &[SpikeSource] {
        &self.spikes
    }

    pub fn messages(&self) -> &[MessageRecord] {
        &self.messages
    }

    pub fn sync_lines(&self) -> &[SyncLine] {
        &self.sync_lines
    }

    /// Register a TTL line for synchronization.
    ///
    /// The line must actually carry events in this recording. Registering a
    /// line for a (processor, stream) pair that already has one replaces the
    /// old registration. A second `main` line is rejected outright.
    pub fn add_sync_line(&mut self, line: SyncLine) -> Result<()> {
        if self
            .events
            .on_line(line.line, line.processor_id, &line.stream_name)
            .next()
            .is_none()
        {
            return Err(SyncError::NoEventsOnLine {
                line: line.line,
                processor_id: line.processor_id,
                stream_name: line.stream_name.clone(),
            }
            .into());
        }

        let existing = self
            .sync_lines
            .iter()
            .position(|l| l.matches_stream(line.processor_id, &line.stream_name));
        let other_main = self
            .sync_lines
            .iter()
            .enumerate()
            .any(|(i, l)| l.main && Some(i) != existing);
        if line.main && other_main {
            return Err(SyncError::DuplicateMainLine.into());
        }

        match existing {
            Some(i) => {
                warn!(
                    processor_id = line.processor_id,
                    stream = %line.stream_name,
                    old_line = self.sync_lines[i].line,
                    new_line = line.line,
                    "replacing previously registered sync line"
                );
                self.sync_lines[i] = line;
            }
            None => self.sync_lines.push(line),
        }
        Ok(())
    }

    /// Map every synced stream onto the main stream's clock.
    ///
    /// All affine maps are fitted before anything is mutated; any failure
    /// leaves the recording exactly as it was. With `overwrite` the local
    /// timestamps are replaced; otherwise the global sequence is stored
    /// alongside them. Streams without a registered sync line are never
    /// assigned global timestamps.
    pub fn compute_global_timestamps(&mut self, overwrite: bool) -> Result<()> {
        let main = self
            .sync_lines
            .iter()
            .find(|l| l.main)
            .ok_or(SyncError::MissingMainLine)?;
        if self.sync_lines.len() < 2 {
            return Err(SyncError::NoAuxiliaryLines.into());
        }

        let main_stream = self.stream_index(main)?;
        let main_rate = self.continuous[main_stream].metadata.sample_rate;
        let main_edges = rising_edges(&self.events, main);

        // Fit phase. Nothing below may touch recording state.
        let mut maps: Vec<(usize, AffineMap)> = Vec::with_capacity(self.sync_lines.len());
        for line in &self.sync_lines {
            let stream = self.stream_index(line)?;
            let map = if line.main {
                AffineMap::identity(main_rate)
            } else {
                let aux_edges = rising_edges(&self.events, line);
                fit_affine(&aux_edges, &main_edges, main_rate, &line.stream_name)?
            };
            maps.push((stream, map));
        }

        // Commit phase.
        for (line, &(stream_index, map)) in self.sync_lines.iter().zip(maps.iter()) {
            let stream = &mut self.continuous[stream_index];
            let global: Vec<f64> = stream.sample_numbers.iter().map(|&s| map.apply(s)).collect();
            if overwrite {
                stream.timestamps = global.clone();
            }
            stream.global_timestamps = Some(global);

            for record in self.events.iter_mut() {
                if record.processor_id == line.processor_id
                    && record.stream_name == line.stream_name
                {
                    let value = map.apply(record.sample_number);
                    if overwrite {
                        record.timestamp = value;
                    }
                    record.global_timestamp = Some(value);
                }
            }

            for source in &mut self.spikes {
                if source.metadata.source_processor_id == line.processor_id
                    && source.metadata.stream_name == line.stream_name
                {
                    let global: Vec<f64> =
                        source.sample_numbers.iter().map(|&s| map.apply(s)).collect();
                    if overwrite {
                        source.timestamps = global.clone();
                    }
                    source.global_timestamps = Some(global);
                }
            }
        }
        Ok(())
    }

    fn stream_index(&self, line: &SyncLine) -> Result<usize, SyncError> {
        self.continuous
            .iter()
            .position(|s| {
                s.metadata.source_processor_id == line.processor_id
                    && s.metadata.stream_name == line.stream_name
            })
            .ok_or(SyncError::UnknownStream {
                processor_id: line.processor_id,
                stream_name: line.stream_name.clone(),
            })
    }
}
