//! Discrete digital (TTL) events recorded alongside the continuous streams.

/// One digital edge.
///
/// `line` keeps the 1-based numbering used by the acquisition hardware;
/// `stream_index` is the zero-based position of the source stream within the
/// recording. `timestamp` is the local clock in seconds (−1.0 when the format
/// carries no event clock). `global_timestamp` stays `None` until
/// synchronization assigns one.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub sample_number: i64,
    pub timestamp: f64,
    pub line: i32,
    pub state: u8,
    pub processor_id: i32,
    pub stream_index: usize,
    pub stream_name: String,
    pub global_timestamp: Option<f64>,
}

/// Ordered collection of all events in one recording.
///
/// Invariant: rows are sorted ascending by (sample_number, stream_index).
#[derive(Debug, Clone, Default)]
pub struct EventTable {
    records: Vec<EventRecord>,
}

impl EventTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from unsorted rows, restoring the sort invariant.
    pub fn from_records(mut records: Vec<EventRecord>) -> Self {
        records.sort_by_key(|r| (r.sample_number, r.stream_index));
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EventRecord> {
        self.records.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut EventRecord> {
        self.records.iter_mut()
    }

    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    /// Events on one physical TTL line of one stream, in table order.
    pub fn on_line<'a>(
        &'a self,
        line: i32,
        processor_id: i32,
        stream_name: &'a str,
    ) -> impl Iterator<Item = &'a EventRecord> {
        self.records.iter().filter(move |r| {
            r.line == line && r.processor_id == processor_id && r.stream_name == stream_name
        })
    }
}

/// One row of the message table (free-text annotations from the acquisition
/// software).
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRecord {
    pub sample_number: i64,
    pub timestamp: f64,
    pub message: String,
}
