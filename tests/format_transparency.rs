//! The same logical recording written in each on-disk format must read
//! back identically through the uniform interface.

mod common;

use anyhow::Result;
use ephys_recording_toolbox::{RecordNode, RecordingFormat};

fn fixtures() -> Result<Vec<(RecordingFormat, tempfile::TempDir)>> {
    let flat = tempfile::tempdir()?;
    common::write_flat_binary(flat.path())?;

    let container = tempfile::tempdir()?;
    common::write_container(container.path())?;

    let legacy = tempfile::tempdir()?;
    common::write_legacy(legacy.path())?;

    Ok(vec![
        (RecordingFormat::FlatBinary, flat),
        (RecordingFormat::Container, container),
        (RecordingFormat::LegacyFlat, legacy),
    ])
}

#[test]
fn formats_are_detected_from_directory_signatures() -> Result<()> {
    for (expected, dir) in fixtures()? {
        let node = RecordNode::open(dir.path())?;
        assert_eq!(node.format(), expected);
        assert_eq!(node.recordings().len(), 1);
    }
    Ok(())
}

#[test]
fn sample_numbers_are_identical_across_formats() -> Result<()> {
    let mut all = Vec::new();
    for (format, dir) in fixtures()? {
        let node = RecordNode::open(dir.path())?;
        let stream = &node.recordings()[0].continuous()[0];
        assert_eq!(stream.num_samples(), common::NUM_SAMPLES, "{format}");
        all.push(stream.sample_numbers.clone());
    }
    assert_eq!(all[0], all[1]);
    assert_eq!(all[1], all[2]);
    Ok(())
}

#[test]
fn samples_read_back_scaled_and_shaped() -> Result<()> {
    for (format, dir) in fixtures()? {
        let mut node = RecordNode::open(dir.path())?;
        let stream = &mut node.recordings_mut()[0].continuous_mut()[0];

        let data = stream.get_samples(0, common::NUM_SAMPLES, None)?;
        assert_eq!(data.dim(), (common::NUM_SAMPLES, common::NUM_CHANNELS));
        for s in 0..common::NUM_SAMPLES {
            for c in 0..common::NUM_CHANNELS {
                let expected = common::raw_value(s, c) as f64 * common::BIT_VOLTS;
                assert!(
                    (data[[s, c]] - expected).abs() < 1e-12,
                    "{format}: sample {s} channel {c}: {} != {expected}",
                    data[[s, c]]
                );
            }
        }
    }
    Ok(())
}

#[test]
fn channel_selection_reorders_columns() -> Result<()> {
    for (_, dir) in fixtures()? {
        let mut node = RecordNode::open(dir.path())?;
        let stream = &mut node.recordings_mut()[0].continuous_mut()[0];

        let data = stream.get_samples(2, 5, Some(&[1, 0]))?;
        assert_eq!(data.dim(), (3, 2));
        assert!((data[[0, 0]] - common::raw_value(2, 1) as f64 * common::BIT_VOLTS).abs() < 1e-12);
        assert!((data[[0, 1]] - common::raw_value(2, 0) as f64 * common::BIT_VOLTS).abs() < 1e-12);
    }
    Ok(())
}

#[test]
fn ttl_events_agree_across_formats() -> Result<()> {
    for (format, dir) in fixtures()? {
        let node = RecordNode::open(dir.path())?;
        let recording = &node.recordings()[0];

        let rising: Vec<i64> = recording
            .events()
            .on_line(1, common::PROCESSOR_ID, "probe")
            .filter(|r| r.state == 1)
            .map(|r| r.sample_number)
            .collect();
        assert_eq!(rising, common::RISING_EDGES.to_vec(), "{format}");

        let falling: Vec<i64> = recording
            .events()
            .on_line(1, common::PROCESSOR_ID, "probe")
            .filter(|r| r.state == 0)
            .map(|r| r.sample_number)
            .collect();
        assert_eq!(falling, common::FALLING_EDGES.to_vec(), "{format}");
    }
    Ok(())
}

#[test]
fn out_of_range_requests_are_rejected_before_io() -> Result<()> {
    for (_, dir) in fixtures()? {
        let mut node = RecordNode::open(dir.path())?;
        let stream = &mut node.recordings_mut()[0].continuous_mut()[0];

        assert!(stream.get_samples(0, common::NUM_SAMPLES + 1, None).is_err());
        assert!(stream.get_samples(0, common::NUM_SAMPLES, Some(&[7])).is_err());
    }
    Ok(())
}
