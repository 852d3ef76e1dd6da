//! Report delivery.

use crate::report::UnifiedReport;
use hf_common::Result;
use std::io::Write;
use std::sync::Mutex;
use tracing::debug;

/// Destination for assembled reports.
pub trait ReportSink: Send + Sync {
    fn deliver(&self, report: &UnifiedReport) -> Result<()>;
}

/// Writes each report as one JSON document on stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonStdoutSink {
    pub pretty: bool,
}

impl JsonStdoutSink {
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }
}

impl ReportSink for JsonStdoutSink {
    fn deliver(&self, report: &UnifiedReport) -> Result<()> {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        write_report(&mut out, report, self.pretty)?;
        out.flush()?;
        Ok(())
    }
}

/// Collects serialized reports in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    documents: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn documents(&self) -> Vec<String> {
        self.documents
            .lock()
            .map(|docs| docs.clone())
            .unwrap_or_default()
    }
}

impl ReportSink for MemorySink {
    fn deliver(&self, report: &UnifiedReport) -> Result<()> {
        let mut buf = Vec::new();
        write_report(&mut buf, report, false)?;
        let text = String::from_utf8_lossy(&buf).trim_end().to_string();
        if let Ok(mut docs) = self.documents.lock() {
            docs.push(text);
        }
        Ok(())
    }
}

/// Serialize `report` followed by a newline.
pub fn write_report<W: Write>(out: &mut W, report: &UnifiedReport, pretty: bool) -> Result<()> {
    if pretty {
        serde_json::to_writer_pretty(&mut *out, report)?;
    } else {
        serde_json::to_writer(&mut *out, report)?;
    }
    writeln!(out)?;
    debug!(
        run_id = %report.metadata.run_id,
        modules = report.module_count(),
        "report written"
    );
    Ok(())
}
