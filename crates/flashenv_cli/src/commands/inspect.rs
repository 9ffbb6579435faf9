//! Inspect command implementation.

use std::io::Write;

use flashenv_core::{EnvStats, EnvUsage, InitReport};
use serde::Serialize;

use super::{CliResult, ImageArgs};

/// Environment inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Image path.
    pub path: String,
    /// Environment version.
    pub version: u32,
    /// The boot formatted the partition.
    pub formatted: bool,
    /// The boot cut off an unreadable tail.
    pub torn_tail: bool,
    /// Index of the active sector.
    pub active_sector: usize,
    /// Sector size in bytes.
    pub sector_size: u32,
    /// Bytes used in the active sector, header included.
    pub used_bytes: u32,
    /// Bytes left in the active sector.
    pub free_bytes: u32,
    /// Bytes held by live records.
    pub live_bytes: u32,
    /// Bytes held by superseded or deleted records.
    pub dead_bytes: u32,
    /// Number of user keys.
    pub keys: usize,
    /// Flash bytes programmed while booting.
    pub bytes_programmed: u64,
    /// Compactions run while booting.
    pub compactions: u64,
}

impl InspectResult {
    fn new(args: &ImageArgs, report: &InitReport, usage: EnvUsage, stats: EnvStats, keys: usize) -> Self {
        Self {
            path: args.path.display().to_string(),
            version: report.version,
            formatted: report.formatted,
            torn_tail: report.torn_tail,
            active_sector: usage.active_sector,
            sector_size: usage.sector_size,
            used_bytes: usage.used_bytes,
            free_bytes: usage.free_bytes,
            live_bytes: usage.live_bytes,
            dead_bytes: usage.dead_bytes(),
            keys,
            bytes_programmed: stats.bytes_programmed,
            compactions: stats.compactions,
        }
    }
}

/// Runs the inspect command.
pub fn run(args: &ImageArgs, format: &str, out: &mut impl Write) -> CliResult<()> {
    let (store, report) = args.open()?;
    let result = InspectResult::new(args, &report, store.usage(), store.stats(), store.len());

    match format {
        "json" => writeln!(out, "{}", serde_json::to_string_pretty(&result)?)?,
        _ => print_text_output(&result, out)?,
    }
    Ok(())
}

fn print_text_output(result: &InspectResult, out: &mut impl Write) -> CliResult<()> {
    writeln!(out, "flashenv Image Inspection")?;
    writeln!(out, "=========================")?;
    writeln!(out)?;
    writeln!(out, "Path:    {}", result.path)?;
    writeln!(out, "Version: {}", result.version)?;
    if result.formatted {
        writeln!(out, "Note:    image was unformatted and has been formatted")?;
    }
    if result.torn_tail {
        writeln!(out, "Note:    active sector ends in unreadable bytes")?;
    }
    writeln!(out)?;
    writeln!(out, "Active sector {}:", result.active_sector)?;
    writeln!(out, "  Sector size: {}", format_size(result.sector_size))?;
    writeln!(out, "  Used:        {}", format_size(result.used_bytes))?;
    writeln!(out, "  Free:        {}", format_size(result.free_bytes))?;
    writeln!(out, "  Live:        {}", format_size(result.live_bytes))?;
    writeln!(out, "  Dead:        {}", format_size(result.dead_bytes))?;
    writeln!(out)?;
    writeln!(out, "Keys: {}", result.keys)?;
    Ok(())
}

fn format_size(bytes: u32) -> String {
    if bytes < 1024 {
        format!("{bytes} bytes")
    } else {
        format!("{:.1} KB", f64::from(bytes) / 1024.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::{image_args, output};
    use tempfile::TempDir;

    #[test]
    fn inspect_json_reports_usage() {
        let dir = TempDir::new().unwrap();
        let args = image_args(&dir);
        crate::commands::format::run(&args, &mut Vec::new()).unwrap();
        {
            let (mut store, _) = args.open().unwrap();
            store.set("bootdelay", "3").unwrap();
        }

        let mut out = Vec::new();
        run(&args, "json", &mut out).unwrap();
        let json: serde_json::Value = serde_json::from_str(&output(out)).unwrap();
        assert_eq!(json["keys"], 1);
        assert_eq!(json["formatted"], false);
        assert_eq!(json["sector_size"], 4096);
    }

    #[test]
    fn inspect_text_mentions_active_sector() {
        let dir = TempDir::new().unwrap();
        let args = image_args(&dir);
        crate::commands::format::run(&args, &mut Vec::new()).unwrap();

        let mut out = Vec::new();
        run(&args, "text", &mut out).unwrap();
        assert!(output(out).contains("Active sector"));
    }

    #[test]
    fn format_size_units() {
        assert_eq!(format_size(512), "512 bytes");
        assert_eq!(format_size(4096), "4.0 KB");
    }
}
