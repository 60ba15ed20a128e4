//! Cross-stream synchronization: edge collection, ordinal pairing, and
//! least-squares fitting of per-stream affine timebase maps.
//!
//! Every registered sync line is wired to the same physical digital input, so
//! its rising edges appear once per pulse on every stream that carries it.
//! Pairing the n-th rising edge of an auxiliary stream with the n-th rising
//! edge of the main stream gives a set of (local sample number, main-clock
//! seconds) points; a least-squares line through those points absorbs both
//! the start offset and any clock drift between the two sample clocks.

use crate::error::SyncError;
use crate::events::EventTable;

/// One TTL line designated for synchronization.
#[derive(Debug, Clone)]
pub struct SyncLine {
    /// 1-based TTL line number, as recorded.
    pub line: i32,
    pub processor_id: i32,
    pub stream_name: String,
    /// Exactly one line per recording is the main clock.
    pub main: bool,
    /// Sample-number intervals (inclusive) whose edges are excluded from
    /// pairing, e.g. periods where a faulty generator pulsed only one line.
    pub ignore_intervals: Vec<(i64, i64)>,
}

impl SyncLine {
    /// Whether this line is the event source of the given (processor, stream).
    pub fn matches_stream(&self, processor_id: i32, stream_name: &str) -> bool {
        self.processor_id == processor_id && self.stream_name == stream_name
    }
}

/// An affine map from local sample numbers to global seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineMap {
    pub slope: f64,
    pub intercept: f64,
}

impl AffineMap {
    /// The main stream's own map: seconds = sample_number / rate.
    pub fn identity(sample_rate: f64) -> Self {
        Self {
            slope: 1.0 / sample_rate,
            intercept: 0.0,
        }
    }

    pub fn apply(&self, sample_number: i64) -> f64 {
        self.slope * sample_number as f64 + self.intercept
    }
}

/// Collect the ordered rising-edge sample numbers on one sync line,
/// excluding any that fall inside the line's ignored intervals.
///
/// Only rising edges are used: falling-edge timing is not guaranteed
/// meaningful across all event sources.
pub fn rising_edges(events: &EventTable, line: &SyncLine) -> Vec<i64> {
    let mut edges: Vec<i64> = events
        .on_line(line.line, line.processor_id, &line.stream_name)
        .filter(|r| r.state == 1)
        .map(|r| r.sample_number)
        .filter(|&s| {
            !line
                .ignore_intervals
                .iter()
                .any(|&(lo, hi)| s >= lo && s <= hi)
        })
        .collect();
    // The table is already ordered, but re-sort in case the original
    // sample numbers were recorded out of order.
    edges.sort_unstable();
    edges
}

/// Fit `global_seconds = slope * aux_sample + intercept` by least squares
/// over ordinally paired main/auxiliary edges.
///
/// The main edges are converted to seconds with the main stream's own rate.
/// Fails if the counts differ (no partial alignment is ever guessed), if
/// fewer than two pairs remain, or if the auxiliary edges are degenerate.
pub fn fit_affine(
    aux_edges: &[i64],
    main_edges: &[i64],
    main_rate: f64,
    stream_name: &str,
) -> Result<AffineMap, SyncError> {
    if aux_edges.len() != main_edges.len() {
        return Err(SyncError::EdgeCountMismatch {
            stream_name: stream_name.to_string(),
            main_edges: main_edges.len(),
            aux_edges: aux_edges.len(),
        });
    }
    if aux_edges.len() < 2 {
        return Err(SyncError::InsufficientEvents {
            stream_name: stream_name.to_string(),
            found: aux_edges.len(),
        });
    }

    let n = aux_edges.len() as f64;
    let x_mean = aux_edges.iter().map(|&s| s as f64).sum::<f64>() / n;
    let y_mean = main_edges.iter().map(|&s| s as f64 / main_rate).sum::<f64>() / n;

    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for (&a, &m) in aux_edges.iter().zip(main_edges.iter()) {
        let x = a as f64;
        let y = m as f64 / main_rate;
        sxx += (x - x_mean) * (x - x_mean);
        sxy += (x - x_mean) * (y - y_mean);
    }

    if sxx == 0.0 {
        return Err(SyncError::DegenerateEdges {
            stream_name: stream_name.to_string(),
        });
    }

    let slope = sxy / sxx;
    let intercept = y_mean - slope * x_mean;
    Ok(AffineMap { slope, intercept })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventRecord;

    fn ttl(sample_number: i64, line: i32, state: u8) -> EventRecord {
        EventRecord {
            sample_number,
            timestamp: sample_number as f64 / 1000.0,
            line,
            state,
            processor_id: 101,
            stream_index: 0,
            stream_name: "probe-a".to_string(),
            global_timestamp: None,
        }
    }

    fn sync_line(ignore: Vec<(i64, i64)>) -> SyncLine {
        SyncLine {
            line: 1,
            processor_id: 101,
            stream_name: "probe-a".to_string(),
            main: true,
            ignore_intervals: ignore,
        }
    }

    #[test]
    fn rising_edges_filters_state_line_and_intervals() {
        let events = EventTable::from_records(vec![
            ttl(100, 1, 1),
            ttl(150, 1, 0), // falling edge dropped
            ttl(300, 2, 1), // other line dropped
            ttl(500, 1, 1),
            ttl(700, 1, 1), // inside ignored interval
            ttl(900, 1, 1),
        ]);

        let edges = rising_edges(&events, &sync_line(vec![(600, 800)]));
        assert_eq!(edges, vec![100, 500, 900]);
    }

    #[test]
    fn affine_fit_recovers_constant_delay() {
        // Same pulses seen 50 samples earlier on the auxiliary clock, i.e. a
        // constant +0.05 s delay at 1 kHz on both sides.
        let main = [100, 500, 900];
        let aux = [50, 450, 850];
        let map = fit_affine(&aux, &main, 1000.0, "aux").unwrap();

        for (&a, &m) in aux.iter().zip(main.iter()) {
            let expected = m as f64 / 1000.0;
            assert!((map.apply(a) - expected).abs() < 1e-9);
        }
        assert!((map.apply(50) - 0.1).abs() < 1e-9);
    }

    #[test]
    fn affine_fit_recovers_drift() {
        // Auxiliary clock running 0.1% fast: aux_sample = 1.001 * main_sample.
        // Round rather than truncate so the fixture stays exactly collinear.
        let main: Vec<i64> = vec![0, 1000, 2000, 3000];
        let aux: Vec<i64> = main
            .iter()
            .map(|&m| (m as f64 * 1.001).round() as i64)
            .collect();
        let map = fit_affine(&aux, &main, 1000.0, "aux").unwrap();

        for (&a, &m) in aux.iter().zip(main.iter()) {
            assert!((map.apply(a) - m as f64 / 1000.0).abs() < 1e-6);
        }
    }

    #[test]
    fn count_mismatch_is_a_hard_failure() {
        let err = fit_affine(&[50, 450], &[100, 500, 900], 1000.0, "aux").unwrap_err();
        match err {
            SyncError::EdgeCountMismatch {
                main_edges,
                aux_edges,
                ..
            } => {
                assert_eq!(main_edges, 3);
                assert_eq!(aux_edges, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn single_edge_is_insufficient() {
        assert!(matches!(
            fit_affine(&[50], &[100], 1000.0, "aux"),
            Err(SyncError::InsufficientEvents { found: 1, .. })
        ));
    }

    #[test]
    fn identity_map_is_sample_over_rate() {
        let map = AffineMap::identity(30000.0);
        assert!((map.apply(30000) - 1.0).abs() < 1e-12);
        assert_eq!(map.apply(0), 0.0);
    }
}
