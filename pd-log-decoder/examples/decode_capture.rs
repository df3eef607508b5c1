//! Standalone PD capture decoder
//!
//! Decodes a JSONL capture file message by message and prints the decoded
//! summary plus per-type statistics. No capture session is involved.
//!
//! Usage:
//!   decode_capture <capture.jsonl> [--limit <count>] [--verbose]
//!
//! Example:
//!   cargo run --example decode_capture -- ../pd-log-cli/samples/negotiation.jsonl

use pd_log_decoder::{Decoder, DecodedMessage, RawFrame};
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

struct DecoderStats {
    total_frames: usize,
    malformed: usize,
    best_effort: usize,
    by_type: HashMap<String, usize>,
}

impl DecoderStats {
    fn new() -> Self {
        Self {
            total_frames: 0,
            malformed: 0,
            best_effort: 0,
            by_type: HashMap::new(),
        }
    }

    fn print_summary(&self) {
        println!("\n=== DECODING SUMMARY ===");
        println!("Total frames processed: {}", self.total_frames);
        println!("Malformed frames: {}", self.malformed);
        println!("Best-effort decodes: {}", self.best_effort);

        if !self.by_type.is_empty() {
            println!("\nMessage types:");
            let mut sorted: Vec<_> = self.by_type.iter().collect();
            sorted.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
            for (name, count) in sorted {
                println!("  {}: {}", name, count);
            }
        }
    }
}

fn print_message(frame: &RawFrame, message: &DecodedMessage, verbose: bool) {
    println!(
        "[{}] {} {} {} | {}",
        frame.timestamp.format("%H:%M:%S%.3f"),
        frame.direction,
        frame.sop,
        message.message_type(),
        message.summary()
    );
    if verbose {
        println!("    header: {:?}", message.header);
        println!("    bytes:  {}", hex::encode(&frame.bytes));
        for note in &message.notes {
            println!("    note:   {}", note);
        }
    }
}

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <capture.jsonl> [--limit <count>] [--verbose]", args[0]);
        std::process::exit(1);
    }

    let path = PathBuf::from(&args[1]);
    let mut limit = usize::MAX;
    let mut verbose = false;

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--limit" if i + 1 < args.len() => {
                limit = args[i + 1].parse().unwrap_or(usize::MAX);
                i += 2;
            }
            "--verbose" | "-v" => {
                verbose = true;
                i += 1;
            }
            other => {
                eprintln!("Unknown argument: {}", other);
                std::process::exit(1);
            }
        }
    }

    let mut decoder = Decoder::new();
    let mut stats = DecoderStats::new();

    let iter = match decoder.decode_file(&path) {
        Ok(iter) => iter,
        Err(e) => {
            eprintln!("Failed to open {:?}: {}", path, e);
            std::process::exit(1);
        }
    };

    for result in iter.take(limit) {
        stats.total_frames += 1;
        match result {
            Ok((frame, message)) => {
                if message.is_best_effort() {
                    stats.best_effort += 1;
                }
                *stats
                    .by_type
                    .entry(message.message_type().to_string())
                    .or_insert(0) += 1;
                print_message(&frame, &message, verbose);
            }
            Err(e) => {
                stats.malformed += 1;
                println!("[malformed] {}", e);
            }
        }
    }

    stats.print_summary();
}
