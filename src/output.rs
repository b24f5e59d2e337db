use std::fs::OpenOptions;
use std::io::{BufWriter as StdBufWriter, Write};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{self, MissedTickBehavior};
use tracing::{info, warn};

use crate::record::Record;

/// How often buffered console output is pushed to the terminal.
pub const FLUSH_INTERVAL: Duration = Duration::from_millis(500);

/// Every record produced during a run, in arrival order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ResultLog {
    records: Vec<Record>,
}

impl ResultLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: Record) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }
}

/// Single writer for the run: prints every record it receives into a buffered
/// console writer and appends it to the result log.
///
/// The buffer is flushed every `flush_every` and once more after the last
/// sender is dropped, at which point the collected log is returned.
pub async fn aggregate<W>(
    mut rx: UnboundedReceiver<Record>,
    writer: W,
    flush_every: Duration,
) -> std::io::Result<ResultLog>
where
    W: AsyncWrite + Unpin,
{
    let mut out = BufWriter::new(writer);
    let mut log = ResultLog::new();
    let mut ticker = time::interval(flush_every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            record = rx.recv() => {
                let Some(record) = record else { break };
                out.write_all(record.to_line().as_bytes()).await?;
                out.write_all(b"\n").await?;
                log.push(record);
            }
            _ = ticker.tick() => {
                out.flush().await?;
            }
        }
    }

    out.flush().await?;
    Ok(log)
}

/// Writes the log to `path`, one record per line.
///
/// Only failing to create the file is an error; a write that fails part way is
/// logged and the rest of the run carries on.
pub fn persist(path: &Path, log: &ResultLog) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .with_context(|| format!("failed creating file: {}", path.display()))?;

    let mut writer = StdBufWriter::new(file);
    for record in log.records() {
        if let Err(e) = writeln!(writer, "{}", record) {
            warn!(path = %path.display(), error = %e, "failed writing result");
            return Ok(());
        }
    }
    if let Err(e) = writer.flush() {
        warn!(path = %path.display(), error = %e, "failed flushing results");
        return Ok(());
    }

    info!("Saved {} results to {}", log.len(), path.display());
    Ok(())
}
