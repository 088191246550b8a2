use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::detector::Decision;
use crate::error::{IdsError, Result};
use crate::features::Schema;
use crate::interceptor::Verdict;

const FIXED_COLUMNS: [&str; 8] = [
    "timestamp",
    "src_ip",
    "dst_ip",
    "ip_prot",
    "src_port",
    "dst_port",
    "label",
    "verdict",
];

/// CSV log with one row per verdict, feature columns in schema order.
pub struct DecisionRecorder<W: Write> {
    writer: csv::Writer<W>,
    width: usize,
}

/// Recorder over any sink, as held by the detector.
pub type BoxedRecorder = DecisionRecorder<Box<dyn Write>>;

impl BoxedRecorder {
    pub fn create(path: &Path, schema: &Schema) -> Result<Self> {
        let file = File::create(path)?;
        Self::from_writer(Box::new(file), schema)
    }
}

impl<W: Write> DecisionRecorder<W> {
    pub fn from_writer(inner: W, schema: &Schema) -> Result<Self> {
        let mut writer = csv::Writer::from_writer(inner);
        let header = FIXED_COLUMNS
            .iter()
            .copied()
            .chain(schema.names().iter().map(String::as_str));
        writer.write_record(header)?;
        writer.flush()?;
        Ok(DecisionRecorder {
            writer,
            width: schema.len(),
        })
    }

    pub fn record_decision(&mut self, decision: &Decision) -> Result<()> {
        let ip = &decision.headers.ip;
        let transport = &decision.headers.transport;
        let mut row = vec![
            timestamp(),
            ip.source.to_string(),
            ip.destination.to_string(),
            ip.protocol.to_string(),
            transport.src_port().to_string(),
            transport.dst_port().to_string(),
            decision.label.to_string(),
            decision.verdict.to_string(),
        ];
        row.extend(decision.features.values().iter().map(|v| v.to_string()));
        self.write_row(row)
    }

    /// Row for a packet answered by the fail policy; unknown fields stay empty.
    pub fn record_failure(&mut self, verdict: Verdict) -> Result<()> {
        let mut row = vec![timestamp()];
        row.extend(std::iter::repeat(String::new()).take(5));
        row.push("error".to_string());
        row.push(verdict.to_string());
        row.extend(std::iter::repeat(String::new()).take(self.width));
        self.write_row(row)
    }

    fn write_row(&mut self, row: Vec<String>) -> Result<()> {
        self.writer.write_record(&row)?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| IdsError::IoError(e.to_string()))
    }
}

fn timestamp() -> String {
    chrono::Local::now()
        .format("%Y-%m-%d %H:%M:%S%.3f")
        .to_string()
}
