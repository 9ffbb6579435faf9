//! Format command implementation.

use std::io::Write;

use tracing::info;

use super::{CliResult, ImageArgs};

/// Runs the format command: writes an erased image and boots a fresh
/// environment on it.
pub fn run(args: &ImageArgs, out: &mut impl Write) -> CliResult<()> {
    let (store, report) = args.create()?;
    store.flush()?;
    info!(path = %args.path.display(), "formatted image");

    let usage = store.usage();
    writeln!(out, "Formatted {}", args.path.display())?;
    writeln!(
        out,
        "  {} bytes, sectors of {} bytes, environment version {}",
        args.size, usage.sector_size, report.version
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::{image_args, output};
    use tempfile::TempDir;

    #[test]
    fn format_creates_erased_outer_region() {
        let dir = TempDir::new().unwrap();
        let args = image_args(&dir);
        let mut out = Vec::new();
        run(&args, &mut out).unwrap();

        let image = std::fs::read(&args.path).unwrap();
        assert_eq!(image.len(), 16 * 1024);
        // Only the environment partition is touched.
        assert!(image[..8192].iter().all(|&b| b == 0xFF));
        assert!(output(out).contains("Formatted"));
    }

    #[test]
    fn format_replaces_existing_environment() {
        let dir = TempDir::new().unwrap();
        let args = image_args(&dir);
        run(&args, &mut Vec::new()).unwrap();
        {
            let (mut store, _) = args.open().unwrap();
            store.set("ipaddr", "10.0.0.1").unwrap();
        }

        run(&args, &mut Vec::new()).unwrap();
        let (store, report) = args.open().unwrap();
        assert!(!report.formatted);
        assert!(store.is_empty());
    }
}
