//! Key-value commands: list, get, set, delete.

use std::io::Write;

use tracing::info;

use super::{CliResult, ImageArgs};

/// Prints every `key=value` pair, sorted by key.
pub fn list(args: &ImageArgs, out: &mut impl Write) -> CliResult<()> {
    let (store, _) = args.open()?;
    for item in store.iter() {
        let (key, value) = item?;
        writeln!(out, "{key}={}", String::from_utf8_lossy(&value))?;
    }
    Ok(())
}

/// Prints the value of `key`, as text or as hex bytes.
pub fn get(args: &ImageArgs, key: &str, hex: bool, out: &mut impl Write) -> CliResult<()> {
    let (store, _) = args.open()?;
    let value = store.get(key)?;
    if hex {
        let digits: Vec<String> = value.iter().map(|b| format!("{b:02x}")).collect();
        writeln!(out, "{}", digits.join(" "))?;
    } else {
        writeln!(out, "{}", String::from_utf8_lossy(&value))?;
    }
    Ok(())
}

/// Stores `value` under `key`.
pub fn set(args: &ImageArgs, key: &str, value: &str) -> CliResult<()> {
    let (mut store, _) = args.open()?;
    store.set(key, value)?;
    store.flush()?;
    info!(key, "set");
    Ok(())
}

/// Removes `key`.
pub fn delete(args: &ImageArgs, key: &str) -> CliResult<()> {
    let (mut store, _) = args.open()?;
    store.delete(key)?;
    store.flush()?;
    info!(key, "deleted");
    Ok(())
}
