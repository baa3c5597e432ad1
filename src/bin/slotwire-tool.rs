//! Small inspection utility: feed it keys on stdin, get back their cluster
//! slot and hash-tag region. Mirrors the `redis-cli --cluster` slot lookup,
//! minus the cluster connection itself.

use std::io::{self, BufRead, Write};

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    for line in stdin.lock().lines() {
        let line = line?;
        let key = line.trim();
        if key.is_empty() {
            continue;
        }
        let tag = slotwire::hash::tagged(key.as_bytes());
        let slot = slotwire::hash::slot(key.as_bytes());
        writeln!(
            out,
            "{key}\tslot={slot}\ttag={:?}",
            String::from_utf8_lossy(tag)
        )?;
    }
    Ok(())
}
