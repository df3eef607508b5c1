//! PD Log Reader CLI Application
//!
//! Command-line front end for the pd-log-decoder library. It adds:
//! - Replay of recorded captures through the decode worker
//! - Auto-pause thresholds and vendor names from a TOML config
//! - CSV / JSON export of the stored records
//! - CSV import of an earlier export, numbering new records after it

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

mod config;
mod export;
mod replay;

use config::{AppConfig, OutputFormat};
use export::RecordRow;
use pd_log_decoder::header::DataMessage;
use pd_log_decoder::objects::SinkFixedFlags;
use pd_log_decoder::{DataObject, DecodedMessage, MessageType};

/// PD Log Reader - Decode and record USB Power Delivery captures
#[derive(Parser, Debug)]
#[command(name = "pd-log-cli")]
#[command(about = "Decode and record USB-PD captures (JSONL)", long_about = None)]
#[command(version)]
struct Args {
    /// Path to the capture file to replay
    #[arg(short = 'i', long, value_name = "FILE")]
    capture: Option<PathBuf>,

    /// Earlier CSV export to load; new records are numbered after it
    #[arg(long, value_name = "FILE")]
    import: Option<PathBuf>,

    /// Path to configuration file (config.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Output file for exported records (default: stdout)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Export format (overrides the config file)
    #[arg(long, value_enum)]
    format: Option<OutputFormat>,

    /// Vendor name table (TOML, "05AC" = "Apple")
    #[arg(long, value_name = "FILE")]
    vendors: Option<PathBuf>,

    /// Maximum number of frames to replay (for testing)
    #[arg(long, value_name = "COUNT")]
    max_frames: Option<usize>,

    /// Only decode and print each frame, without a capture session
    #[arg(long)]
    decode_only: bool,

    /// Verbosity level (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    log::info!("PD Log Reader CLI v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using decoder library v{}", pd_log_decoder::VERSION);

    if args.capture.is_none() && args.import.is_none() {
        println!("PD Log Reader - No input specified");
        println!("\nQuick Start:");
        println!("  pd-log-cli --capture session.jsonl");
        println!("  pd-log-cli --capture session.jsonl --decode-only");
        println!("\nWith thresholds, vendor names and export:");
        println!("  pd-log-cli -i session.jsonl -c config.toml -o records.csv");
        println!("\nContinue an earlier export:");
        println!("  pd-log-cli --import records.csv -i next.jsonl -o all.csv");
        println!("\nUse --help for more options");
        return Ok(());
    }

    let config = match &args.config {
        Some(path) => {
            log::info!("Loading configuration from: {:?}", path);
            config::load_config(path)?
        }
        None => AppConfig::default(),
    };

    let mut vendors = match &args.vendors {
        Some(path) => config::load_vendor_file(path)?,
        None => pd_log_decoder::VendorTable::new(),
    };
    config.merge_vendors(&mut vendors)?;
    log::debug!("{} vendor names loaded", vendors.len());

    let imported = match &args.import {
        Some(path) => import_records(path)?,
        None => Vec::new(),
    };

    match &args.capture {
        Some(capture) if args.decode_only => {
            decode_only_mode(capture, vendors, args.max_frames, args.quiet)
        }
        Some(capture) => capture_mode(capture, &args, config, vendors, imported),
        None => {
            let format = args.format.unwrap_or(config.output.format);
            let output = args.output.clone().or_else(|| config.output.path.clone());
            write_output(&imported, &[], format, output.as_deref())?;
            if !args.quiet {
                eprintln!("✓ {} imported records re-exported", imported.len());
            }
            Ok(())
        }
    }
}

/// Load rows from an earlier CSV export
fn import_records(path: &Path) -> Result<Vec<RecordRow>> {
    log::info!("Importing records from: {:?}", path);
    let file = File::open(path).with_context(|| format!("Failed to open CSV file: {:?}", path))?;
    export::read_csv(BufReader::new(file)).with_context(|| format!("Failed to import {:?}", path))
}

/// Export to `output`, or stdout when none is set
fn write_output(
    imported: &[RecordRow],
    records: &[std::sync::Arc<pd_log_decoder::CaptureRecord>],
    format: OutputFormat,
    output: Option<&Path>,
) -> Result<()> {
    match output {
        Some(out_path) => {
            let file = File::create(out_path)
                .with_context(|| format!("Failed to create output file: {:?}", out_path))?;
            export::write_records(imported, records, format, BufWriter::new(file))
        }
        None => export::write_records(imported, records, format, io::stdout().lock()),
    }
}

/// Decode every frame and print one line per message
fn decode_only_mode(
    path: &Path,
    vendors: pd_log_decoder::VendorTable,
    max_frames: Option<usize>,
    quiet: bool,
) -> Result<()> {
    use pd_log_decoder::Decoder;
    use std::sync::Arc;

    let mut decoder = Decoder::with_vendors(Arc::new(vendors));
    let limit = max_frames.unwrap_or(usize::MAX);
    let mut malformed = 0usize;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for result in decoder.decode_file(path)?.take(limit) {
        match result {
            Ok((frame, message)) => {
                if quiet {
                    continue;
                }
                writeln!(
                    out,
                    "{} {:<14} {:<6} {:<24} {}",
                    frame.timestamp.format("%H:%M:%S%.3f"),
                    frame.direction.to_string(),
                    frame.sop.to_string(),
                    message.message_type().to_string(),
                    message.summary()
                )?;
                for note in &message.notes {
                    writeln!(out, "    note: {}", note)?;
                }
                if let Some(flags) = sink_flags(&message) {
                    writeln!(out, "    sink: {}", flags)?;
                }
            }
            Err(e) if e.is_malformed() => {
                malformed += 1;
                log::warn!("Skipping frame: {}", e);
            }
            Err(e) => return Err(e).context("Failed to decode capture"),
        }
    }

    log::info!(
        "Decoded {} frames ({} malformed)",
        decoder.frames_decoded(),
        malformed
    );
    Ok(())
}

/// Flags of the vSafe5V PDO in a Sink Capabilities message
fn sink_flags(message: &DecodedMessage) -> Option<SinkFixedFlags> {
    if message.message_type() != MessageType::Data(DataMessage::SinkCapabilities) {
        return None;
    }
    match message.objects.first()? {
        DataObject::Fixed(pdo) => Some(pdo.sink_flags()),
        _ => None,
    }
}

/// Replay through a capture session and export the stored records
fn capture_mode(
    path: &Path,
    args: &Args,
    config: AppConfig,
    vendors: pd_log_decoder::VendorTable,
    imported: Vec<RecordRow>,
) -> Result<()> {
    let format = args.format.unwrap_or(config.output.format);
    let output = args.output.clone().or_else(|| config.output.path.clone());
    let thresholds = config.capture.thresholds;

    if !args.quiet {
        eprintln!("═══════════════════════════════════════════════");
        eprintln!("  PD Log Reader - Capture Replay");
        eprintln!("═══════════════════════════════════════════════\n");
        eprintln!("📄 Capture: {:?}", path);
        eprintln!("  Ring buffer: {} records", config.capture.max_records);
        if thresholds.is_enabled() {
            eprintln!(
                "  Auto-pause:  V on/off {}/{} mV, I on/off {}/{} mA, delay {} ms",
                thresholds.voltage_on_mv,
                thresholds.voltage_off_mv,
                thresholds.current_on_ma,
                thresholds.current_off_ma,
                thresholds.delay_ms
            );
        } else {
            eprintln!("  Auto-pause:  disabled");
        }
    }

    let continue_after = export::last_index(&imported);
    if let Some(index) = continue_after {
        if !args.quiet {
            eprintln!(
                "  Imported:    {} records, numbering continues at {}",
                imported.len(),
                index + 1
            );
        }
    }

    let summary =
        replay::replay_capture(path, config.capture, vendors, args.max_frames, continue_after)?;
    write_output(&imported, &summary.records, format, output.as_deref())?;

    if !args.quiet {
        print_summary(&summary, output.as_deref());
    }
    Ok(())
}

fn print_summary(summary: &replay::ReplaySummary, output: Option<&Path>) {
    let stats = &summary.stats;
    eprintln!("\n📊 Session:");
    eprintln!("  Frames seen:      {}", stats.frames_seen);
    eprintln!("  Records stored:   {}", summary.records.len());
    eprintln!("  Records evicted:  {}", stats.records_evicted);
    eprintln!("  Malformed frames: {}", stats.malformed_frames);
    eprintln!("  Filtered frames:  {}", stats.frames_filtered);
    eprintln!("  While paused:     {}", stats.frames_while_paused);
    eprintln!("  Auto-pauses:      {}", stats.auto_pauses);
    eprintln!("  Batches:          {}", summary.batches);

    if !summary.transitions.is_empty() {
        eprintln!("\n🔁 State changes:");
        for transition in &summary.transitions {
            eprintln!(
                "  {}  {} → {}",
                transition.at.format("%H:%M:%S%.3f"),
                transition.from,
                transition.to
            );
        }
    }

    let live = &summary.live;
    eprintln!("\n⚡ Last bus state:");
    match (live.measurement.voltage_mv, live.measurement.current_ma) {
        (None, None) => eprintln!("  No measurements"),
        (voltage, current) => eprintln!(
            "  {} mV, {} mA",
            voltage.map_or("-".to_string(), |v| v.to_string()),
            current.map_or("-".to_string(), |i| i.to_string())
        ),
    }
    for pdo in &live.source_pdos {
        eprintln!("  PDO #{}: {}", pdo.position, pdo);
    }
    if let Some(cable) = &live.cable {
        eprintln!("  Cable: {}", cable);
    }

    match output {
        Some(path) => eprintln!("\n✓ Records written to {:?}", path),
        None => eprintln!("\n✓ Done ({})", summary.final_state),
    }
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use pd_log_decoder::objects::FixedSupplyPdo;
    use pd_log_decoder::{MessageDecoder, NegotiationContext, Sop, VendorTable};

    fn decode(header: u16, objects: &[u32]) -> DecodedMessage {
        let mut bytes = header.to_le_bytes().to_vec();
        for word in objects {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        MessageDecoder::decode(&bytes, Sop::Sop, &NegotiationContext::new(), &VendorTable::new())
            .unwrap()
    }

    #[test]
    fn test_sink_flags_only_for_sink_capabilities() {
        // Higher capability and FRS 1.5A on the vSafe5V PDO
        let word = FixedSupplyPdo::new(5000, 900).to_word() | 1 << 28 | 0b10 << 23;
        let sink_caps = decode(0x1084, &[word]);
        assert_eq!(sink_caps.message_type(), MessageType::Data(DataMessage::SinkCapabilities));
        assert_eq!(sink_flags(&sink_caps).unwrap().to_string(), "higher-capability, FRS 1.5A");

        let source_caps = decode(0x11A1, &[word]);
        assert!(sink_flags(&source_caps).is_none());
    }
}
