//! Session discovery: walking a recorded directory tree down to its record
//! nodes and their recordings.
//!
//! This is the only place where the acquisition software's one-based
//! numbering is converted to the zero-based indices used everywhere else.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::Result;
use crate::formats::{self, matching_entries, trailing_number, RecordingFormat};
use crate::recording::Recording;

const RECORD_NODE_PREFIX: &str = "Record Node";

/// One record node directory: a single data format and its recordings.
#[derive(Debug)]
pub struct RecordNode {
    directory: PathBuf,
    /// Node id parsed from the directory name ("Record Node 107" → 107).
    node_id: Option<i32>,
    format: RecordingFormat,
    recordings: Vec<Recording>,
}

impl RecordNode {
    pub fn open(directory: &Path) -> Result<Self> {
        let node_id = directory
            .file_name()
            .map(|n| n.to_string_lossy())
            .filter(|n| n.starts_with(RECORD_NODE_PREFIX))
            .and_then(|n| trailing_number(&n))
            .map(|n| n as i32);
        let format = formats::detect_format(directory)?;
        let recordings = formats::detect_recordings(directory, format)?;
        debug!(
            directory = %directory.display(),
            %format,
            recordings = recordings.len(),
            "opened record node"
        );
        Ok(Self {
            directory: directory.to_path_buf(),
            node_id,
            format,
            recordings,
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn node_id(&self) -> Option<i32> {
        self.node_id
    }

    pub fn format(&self) -> RecordingFormat {
        self.format
    }

    pub fn recordings(&self) -> &[Recording] {
        &self.recordings
    }

    pub fn recordings_mut(&mut self) -> &mut [Recording] {
        &mut self.recordings
    }
}

/// A recorded session directory containing one or more record nodes.
#[derive(Debug)]
pub struct Session {
    directory: PathBuf,
    record_nodes: Vec<RecordNode>,
}

impl Session {
    /// Open a session directory.
    ///
    /// Children named `Record Node <id>` become the session's nodes; a
    /// directory without any becomes a single anonymous node itself.
    pub fn open(directory: &Path) -> Result<Self> {
        let node_dirs = matching_entries(directory, |n| n.starts_with(RECORD_NODE_PREFIX))?;
        let node_dirs: Vec<PathBuf> = node_dirs.into_iter().filter(|p| p.is_dir()).collect();

        let mut record_nodes = Vec::new();
        if node_dirs.is_empty() {
            record_nodes.push(RecordNode::open(directory)?);
        } else {
            for dir in node_dirs {
                record_nodes.push(RecordNode::open(&dir)?);
            }
        }
        Ok(Self {
            directory: directory.to_path_buf(),
            record_nodes,
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn record_nodes(&self) -> &[RecordNode] {
        &self.record_nodes
    }

    pub fn record_nodes_mut(&mut self) -> &mut [RecordNode] {
        &mut self.record_nodes
    }
}
