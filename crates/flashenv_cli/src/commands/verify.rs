//! Verify command implementation.

use std::io::Write;

use flashenv_core::{RecordStatus, SectorReport, SectorState};
use serde::Serialize;

use super::{CliResult, ImageArgs};

/// One record as shown by `verify`.
#[derive(Debug, Serialize)]
pub struct RecordLine {
    /// Partition offset.
    pub offset: u32,
    /// Encoded length.
    pub len: u32,
    /// Status name.
    pub status: &'static str,
    /// Key.
    pub key: String,
    /// Value length.
    pub value_len: usize,
}

/// One sector as shown by `verify`.
#[derive(Debug, Serialize)]
pub struct SectorLine {
    /// Sector index.
    pub index: usize,
    /// Partition offset.
    pub offset: u32,
    /// Header state name.
    pub state: &'static str,
    /// Records found.
    pub records: Vec<RecordLine>,
    /// Why the scan stopped.
    pub stop: String,
    /// Whether the scan ended cleanly.
    pub clean: bool,
}

impl From<&SectorReport> for SectorLine {
    fn from(report: &SectorReport) -> Self {
        Self {
            index: report.index,
            offset: report.offset,
            state: state_name(report.state),
            records: report
                .records
                .iter()
                .map(|r| RecordLine {
                    offset: r.offset,
                    len: r.len,
                    status: status_name(r.status),
                    key: r.key.clone(),
                    value_len: r.value_len,
                })
                .collect(),
            stop: report.stop.to_string(),
            clean: report.stop.is_clean(),
        }
    }
}

fn state_name(state: Option<SectorState>) -> &'static str {
    match state {
        None => "unformatted",
        Some(SectorState::Erased) => "erased",
        Some(SectorState::Receiving) => "receiving",
        Some(SectorState::Active) => "active",
        Some(SectorState::Retired) => "retired",
    }
}

fn status_name(status: RecordStatus) -> &'static str {
    match status {
        RecordStatus::PreWrite => "pre-write",
        RecordStatus::Written => "written",
        RecordStatus::Obsolete => "obsolete",
    }
}

/// Runs the verify command. Returns whether the active sector scanned
/// cleanly.
pub fn run(args: &ImageArgs, format: &str, out: &mut impl Write) -> CliResult<bool> {
    let (store, _) = args.open()?;
    let reports = store.verify()?;
    let lines: Vec<SectorLine> = reports.iter().map(SectorLine::from).collect();
    let active = store.usage().active_sector;
    let clean = lines[active].clean;

    match format {
        "json" => writeln!(out, "{}", serde_json::to_string_pretty(&lines)?)?,
        _ => {
            for line in &lines {
                let marker = if line.index == active { " (active)" } else { "" };
                writeln!(
                    out,
                    "Sector {}{} at {:#x}: {}",
                    line.index, marker, line.offset, line.state
                )?;
                for record in &line.records {
                    writeln!(
                        out,
                        "  {:#07x} {:>5} {:<9} {} ({} bytes)",
                        record.offset, record.len, record.status, record.key, record.value_len
                    )?;
                }
                writeln!(out, "  scan: {}", line.stop)?;
            }
            writeln!(out, "{}", if clean { "OK" } else { "DAMAGED" })?;
        }
    }
    Ok(clean)
}
