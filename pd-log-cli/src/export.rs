//! Record export (CSV and JSON lines) and CSV import

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use pd_log_decoder::{CaptureRecord, Direction, Measurement, Timestamp};
use serde::{Serialize, Serializer};
use std::io::{BufRead, Write};
use std::sync::Arc;
use std::time::Duration;

use crate::config::OutputFormat;

const CSV_HEADER: &str =
    "index,abs_time,rel_time,direction,message_type,decoded_summary,voltage_mV,current_mA,power_mW";

/// Columns every data row must have; the measurement columns may be empty
const CSV_COLUMNS: usize = 9;

/// One exported row
///
/// Built from a capture record, or read back from a CSV export. Imported
/// rows keep the message only as its type name and summary text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordRow {
    pub index: u64,
    pub abs_time: Timestamp,
    #[serde(serialize_with = "serialize_secs")]
    pub rel_time: Duration,
    pub direction: Direction,
    pub message_type: String,
    pub summary: String,
    pub measurement: Option<Measurement>,
}

impl From<&CaptureRecord> for RecordRow {
    fn from(record: &CaptureRecord) -> Self {
        Self {
            index: record.index,
            abs_time: record.abs_time,
            rel_time: record.rel_time,
            direction: record.direction,
            message_type: record.message_type().to_string(),
            summary: record.summary(),
            measurement: record.measurement,
        }
    }
}

impl RecordRow {
    fn csv_fields(&self) -> [String; CSV_COLUMNS] {
        let measurement = self.measurement.unwrap_or_default();
        [
            self.index.to_string(),
            self.abs_time.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            format!("{:.3}", self.rel_time.as_secs_f64()),
            self.direction.to_string(),
            self.message_type.clone(),
            self.summary.clone(),
            optional(measurement.voltage_mv),
            optional(measurement.current_ma),
            optional(measurement.power_mw()),
        ]
    }

    fn from_csv_fields(fields: &[String]) -> Result<Self> {
        if fields.len() < CSV_COLUMNS {
            bail!("expected {} columns, got {}", CSV_COLUMNS, fields.len());
        }
        let index = fields[0]
            .parse()
            .with_context(|| format!("Invalid index {:?}", fields[0]))?;
        let abs_time = DateTime::parse_from_rfc3339(&fields[1])
            .with_context(|| format!("Invalid timestamp {:?}", fields[1]))?
            .with_timezone(&Utc);
        let secs: f64 = fields[2]
            .parse()
            .with_context(|| format!("Invalid relative time {:?}", fields[2]))?;
        if !secs.is_finite() || secs < 0.0 {
            bail!("Invalid relative time {:?}", fields[2]);
        }
        let direction = parse_direction(&fields[3])?;
        let measurement =
            Measurement::new(parse_optional(&fields[6])?, parse_optional(&fields[7])?);

        Ok(Self {
            index,
            abs_time,
            rel_time: Duration::from_millis((secs * 1000.0).round() as u64),
            direction,
            message_type: fields[4].clone(),
            summary: fields[5].clone(),
            measurement: Some(measurement).filter(|m| !m.is_empty()),
        })
    }
}

/// Write imported rows followed by the session's records
pub fn write_records<W: Write>(
    imported: &[RecordRow],
    records: &[Arc<CaptureRecord>],
    format: OutputFormat,
    out: W,
) -> Result<()> {
    match format {
        OutputFormat::Csv => {
            let rows: Vec<RecordRow> = imported
                .iter()
                .cloned()
                .chain(records.iter().map(|record| RecordRow::from(record.as_ref())))
                .collect();
            write_csv(&rows, out)
        }
        OutputFormat::Json => write_json(imported, records, out),
    }
}

/// CSV with one row per record
pub fn write_csv<W: Write>(rows: &[RecordRow], mut out: W) -> Result<()> {
    writeln!(out, "{}", CSV_HEADER).context("Failed to write CSV header")?;
    for row in rows {
        let line = row
            .csv_fields()
            .iter()
            .map(|field| csv_field(field))
            .collect::<Vec<_>>()
            .join(",");
        writeln!(out, "{}", line).with_context(|| format!("Failed to write record {}", row.index))?;
    }
    out.flush().context("Failed to flush CSV output")?;
    Ok(())
}

/// One JSON object per line; imported rows carry only the CSV columns
pub fn write_json<W: Write>(
    imported: &[RecordRow],
    records: &[Arc<CaptureRecord>],
    mut out: W,
) -> Result<()> {
    for row in imported {
        serde_json::to_writer(&mut out, row)
            .with_context(|| format!("Failed to serialize imported record {}", row.index))?;
        writeln!(out)?;
    }
    for record in records {
        let row = JsonRow {
            message_type: record.message_type().to_string(),
            summary: record.summary(),
            record: record.as_ref(),
        };
        serde_json::to_writer(&mut out, &row)
            .with_context(|| format!("Failed to serialize record {}", record.index))?;
        writeln!(out)?;
    }
    out.flush().context("Failed to flush JSON output")?;
    Ok(())
}

/// Read rows back from a CSV export
///
/// The header line is optional. Rows that do not parse are logged and
/// skipped.
pub fn read_csv<R: BufRead>(reader: R) -> Result<Vec<RecordRow>> {
    let mut rows = Vec::new();
    for (number, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read CSV line {}", number + 1))?;
        let line = line.trim_start_matches('\u{feff}').trim_end_matches('\r');
        if line.is_empty() || (number == 0 && line == CSV_HEADER) {
            continue;
        }
        match split_csv_line(line).and_then(|fields| RecordRow::from_csv_fields(&fields)) {
            Ok(row) => rows.push(row),
            Err(e) => log::warn!("Skipping CSV line {}: {:#}", number + 1, e),
        }
    }
    log::info!("Imported {} records", rows.len());
    Ok(rows)
}

/// Highest index among imported rows, where new numbering continues
pub fn last_index(rows: &[RecordRow]) -> Option<u64> {
    rows.iter().map(|row| row.index).max()
}

#[derive(Serialize)]
struct JsonRow<'a> {
    message_type: String,
    summary: String,
    #[serde(flatten)]
    record: &'a CaptureRecord,
}

fn serialize_secs<S: Serializer>(
    duration: &Duration,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

fn optional<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn parse_optional(field: &str) -> Result<Option<u32>> {
    if field.is_empty() {
        return Ok(None);
    }
    let value = field
        .parse()
        .with_context(|| format!("Invalid measurement {:?}", field))?;
    Ok(Some(value))
}

fn parse_direction(field: &str) -> Result<Direction> {
    [Direction::SourceToSink, Direction::SinkToSource]
        .into_iter()
        .find(|direction| direction.to_string() == field)
        .with_context(|| format!("Invalid direction {:?}", field))
}

/// Quote a field when it contains a separator, quote or line break
fn csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Split one CSV line, undoing the quoting applied by `csv_field`
fn split_csv_line(line: &str) -> Result<Vec<String>> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match (c, quoted) {
            ('"', true) if chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            ('"', true) => quoted = false,
            ('"', false) if current.is_empty() => quoted = true,
            (',', false) => fields.push(std::mem::take(&mut current)),
            (c, _) => current.push(c),
        }
    }
    if quoted {
        bail!("unterminated quoted field");
    }
    fields.push(current);
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pd_log_decoder::{CaptureConfig, CaptureSession, ManualClock, RawFrame, VendorTable};
    use std::io::Cursor;

    fn records() -> Vec<Arc<CaptureRecord>> {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let mut session = CaptureSession::with_clock(
            CaptureConfig::new(),
            Arc::new(VendorTable::new()),
            Arc::new(ManualClock::new(start)),
        );
        session.start().unwrap();
        let caps = RawFrame::new(
            start + chrono::Duration::milliseconds(1250),
            Direction::SourceToSink,
            vec![0xA1, 0x21, 0x2C, 0x91, 0x01, 0x08, 0x2C, 0xD1, 0x02, 0x00],
        )
        .with_measurement(Some(9000), Some(1500));
        session.ingest_frame(&caps);
        let ps_rdy = RawFrame::new(
            start + chrono::Duration::seconds(2),
            Direction::SourceToSink,
            vec![0x46, 0x05],
        );
        session.ingest_frame(&ps_rdy);
        session.records().snapshot()
    }

    fn rows() -> Vec<RecordRow> {
        records().iter().map(|record| RecordRow::from(record.as_ref())).collect()
    }

    #[test]
    fn test_csv_export() {
        let mut out = Vec::new();
        write_csv(&rows(), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], CSV_HEADER);
        assert_eq!(
            lines[1],
            "1,2024-05-01T10:00:01.250Z,1.250,source_to_sink,SourceCapabilities,\
             Fixed 5.00V 3.00A | Fixed 9.00V 3.00A,9000,1500,13500"
        );
        assert_eq!(
            lines[2],
            "2,2024-05-01T10:00:02.000Z,2.000,source_to_sink,PS_RDY,PS_RDY,9000,1500,13500"
        );
    }

    #[test]
    fn test_csv_quoting() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_split_undoes_quoting() {
        let fields = ["plain", "a,b", "say \"hi\"", ""];
        let line = fields.iter().map(|f| csv_field(f)).collect::<Vec<_>>().join(",");
        assert_eq!(split_csv_line(&line).unwrap(), fields);
        assert!(split_csv_line("1,\"open").is_err());
    }

    #[test]
    fn test_export_then_import() {
        let exported = rows();
        let mut out = Vec::new();
        write_csv(&exported, &mut out).unwrap();

        let imported = read_csv(Cursor::new(out)).unwrap();
        assert_eq!(imported, exported);
        assert_eq!(last_index(&imported), Some(2));
    }

    #[test]
    fn test_import_skips_bad_rows() {
        let text = "\u{feff}index,abs_time,rel_time,direction,message_type,decoded_summary,voltage_mV,current_mA,power_mW\r\n\
                    7,2024-05-01T10:00:00.500Z,0.500,sink_to_source,Accept,Accept,,,\r\n\
                    x,2024-05-01T10:00:00.600Z,0.600,sink_to_source,Accept,Accept,,,\r\n\
                    9,2024-05-01T10:00:00.700Z,0.700,upstream,Accept,Accept,,,\r\n\
                    \r\n\
                    12,2024-05-01T10:00:00.800Z,0.800,source_to_sink,PS_RDY,PS_RDY,5000,,\r\n";
        let imported = read_csv(Cursor::new(text)).unwrap();
        let indices: Vec<u64> = imported.iter().map(|row| row.index).collect();
        assert_eq!(indices, vec![7, 12]);
        assert_eq!(imported[0].rel_time, Duration::from_millis(500));
        assert_eq!(imported[0].direction, Direction::SinkToSource);
        assert_eq!(imported[0].measurement, None);
        assert_eq!(imported[1].measurement, Some(Measurement::new(Some(5000), None)));
        assert_eq!(last_index(&imported), Some(12));
    }

    #[test]
    fn test_imported_rows_come_first() {
        let imported = vec![RecordRow {
            index: 40,
            ..rows()[1].clone()
        }];
        let mut out = Vec::new();
        write_records(&imported, &records(), OutputFormat::Csv, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let indices: Vec<&str> = text
            .lines()
            .skip(1)
            .map(|line| line.split(',').next().unwrap())
            .collect();
        assert_eq!(indices, vec!["40", "1", "2"]);
    }

    #[test]
    fn test_json_export() {
        let mut out = Vec::new();
        write_records(&rows()[..1], &records(), OutputFormat::Json, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<serde_json::Value> =
            text.lines().map(|line| serde_json::from_str(line).unwrap()).collect();
        assert_eq!(lines.len(), 3);

        assert_eq!(lines[0]["index"], 1);
        assert_eq!(lines[0]["rel_time"], 1.25);
        assert!(lines[0].get("raw_bytes").is_none());

        assert_eq!(lines[1]["index"], 1);
        assert_eq!(lines[1]["message_type"], "SourceCapabilities");
        assert_eq!(lines[1]["raw_bytes"], "a1212c9101082cd10200");
        assert_eq!(lines[1]["direction"], "source_to_sink");
    }

    #[test]
    fn test_export_to_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        write_records(&[], &records(), OutputFormat::Csv, file.reopen().unwrap()).unwrap();
        let text = std::fs::read_to_string(file.path()).unwrap();
        assert_eq!(text.lines().count(), 3);
    }
}
