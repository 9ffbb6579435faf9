//! Compact command implementation.

use std::io::Write;

use super::{CliResult, ImageArgs};

/// Runs the compact command.
pub fn run(args: &ImageArgs, out: &mut impl Write) -> CliResult<()> {
    let (mut store, _) = args.open()?;
    let report = store.compact()?;
    store.flush()?;

    writeln!(
        out,
        "Compacted sector {} into sector {}: {} records, {} -> {} bytes ({} reclaimed)",
        report.from,
        report.to,
        report.records,
        report.bytes_before,
        report.bytes_after,
        report.bytes_saved()
    )?;
    Ok(())
}
