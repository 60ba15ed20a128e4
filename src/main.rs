//! Ephys Inspect - recording session inspection and metadata viewer
//!
//! Walks a recorded session directory and displays its record nodes,
//! recordings, continuous streams, event counts, and spike sources with
//! clean hierarchical output.
//!
//! # Usage
//!
//! ```bash
//! # Inspect the current directory
//! ephys-inspect
//!
//! # Inspect a specific session
//! ephys-inspect /data/2026-08-12_14-30-00
//!
//! # Verbose mode with channel names and per-line event counts
//! ephys-inspect /data/2026-08-12_14-30-00 --verbose
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use ephys_recording_toolbox::Session;

#[derive(Parser)]
#[command(name = "ephys-inspect")]
#[command(about = "Inspect recorded electrophysiology sessions")]
#[command(version)]
struct Args {
    /// Path to the session directory
    #[arg(default_value = ".")]
    directory: PathBuf,

    /// Show channel names and per-line event counts
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();

    println!("╔════════════════════════════════════════════════════════════════╗");
    println!("║              Ephys Recording Session Inspector                 ║");
    println!("╚════════════════════════════════════════════════════════════════╝");
    println!();
    println!("Session:   {}", args.directory.display());
    println!("Inspected: {}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"));
    println!();

    let session = Session::open(&args.directory)?;

    println!("RECORD NODES ({} found)", session.record_nodes().len());
    println!();

    for (node_idx, node) in session.record_nodes().iter().enumerate() {
        let node_last = node_idx + 1 == session.record_nodes().len();
        let node_prefix = if node_last { "  └─" } else { "  ├─" };
        let node_indent = if node_last { "     " } else { "  │  " };

        let name = match node.node_id() {
            Some(id) => format!("Record Node {id}"),
            None => node.directory().display().to_string(),
        };
        println!("{} {} [{}]", node_prefix, name, node.format());

        for (rec_idx, recording) in node.recordings().iter().enumerate() {
            let rec_last = rec_idx + 1 == node.recordings().len();
            let rec_prefix = if rec_last { "└─" } else { "├─" };
            let rec_indent = if rec_last { "   " } else { "│  " };

            println!(
                "{}{} experiment {} / recording {}",
                node_indent,
                rec_prefix,
                recording.experiment_index() + 1,
                recording.recording_index() + 1,
            );

            let indent = format!("{node_indent}{rec_indent}");
            for stream in recording.continuous() {
                println!(
                    "{}├─ {} ({}-{})",
                    indent,
                    stream.metadata.stream_name,
                    stream.metadata.source_processor_name,
                    stream.metadata.source_processor_id,
                );
                println!("{}│  ├─ Channels: {}", indent, stream.num_channels());
                println!("{}│  ├─ Sample rate: {} Hz", indent, stream.sample_rate());
                println!("{}│  ├─ Samples: {}", indent, stream.num_samples());
                println!("{}│  └─ Duration: {:.3} s", indent, stream.duration());
                if args.verbose {
                    println!(
                        "{}│     Channel names: {}",
                        indent,
                        stream.metadata.channel_names.join(", ")
                    );
                }
            }

            for source in recording.spikes() {
                println!(
                    "{}├─ {} ({} spikes, {} channels)",
                    indent,
                    source.metadata.name,
                    source.num_spikes(),
                    source.metadata.num_channels,
                );
            }

            println!("{}├─ Events: {}", indent, recording.events().len());
            if args.verbose && !recording.events().is_empty() {
                let mut per_line: BTreeMap<i32, usize> = BTreeMap::new();
                for record in recording.events().iter() {
                    *per_line.entry(record.line).or_default() += 1;
                }
                for (line, count) in per_line {
                    println!("{}│  ├─ Line {}: {} events", indent, line, count);
                }
            }
            println!("{}└─ Messages: {}", indent, recording.messages().len());
        }
    }

    Ok(())
}
