pub mod dispatch;
pub mod input;
pub mod output;
pub mod ranges;
pub mod record;
pub mod resolver;

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncWrite};
use tokio::sync::mpsc;

pub use dispatch::{DispatchOptions, Summary};
pub use input::Targets;
pub use output::{ResultLog, FLUSH_INTERVAL};
pub use ranges::RangeTable;
pub use record::{Record, NO_MATCH};
pub use resolver::{Resolve, SystemResolver};

const RANGES_FILE: &str = "ranges.conf";

/// Where the provider ranges come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeSource {
    Builtin,
    File(PathBuf),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub output: Option<PathBuf>,
    pub quiet: bool,
    pub ranges: RangeSource,
    pub dispatch: DispatchOptions,
}

impl RangeSource {
    /// An explicit path wins; otherwise use the ranges file in the config
    /// directory if there is one, falling back to the built-in table.
    pub fn discover(explicit: Option<PathBuf>) -> Self {
        if let Some(path) = explicit {
            return RangeSource::File(path);
        }

        match get_config_dir() {
            Some(dir) if dir.join(RANGES_FILE).is_file() => RangeSource::File(dir.join(RANGES_FILE)),
            _ => RangeSource::Builtin,
        }
    }

    pub fn load(&self) -> Result<RangeTable> {
        match self {
            RangeSource::Builtin => Ok(RangeTable::builtin()),
            RangeSource::File(path) => {
                let content = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read ranges file {}", path.display()))?;
                RangeTable::from_conf(&content)
                    .with_context(|| format!("Failed to parse ranges file {}", path.display()))
            }
        }
    }
}

fn get_config_dir() -> Option<PathBuf> {
    let home = std::env::var_os("HOME")?;
    Some(PathBuf::from(home).join(".config").join("cdn-classify"))
}

/// Runs the whole pipeline: reads targets from `input`, prints records to
/// `console` and returns everything that was recorded once all targets are done.
pub async fn run_classify<I, W, R>(
    input: I,
    console: W,
    table: RangeTable,
    resolver: R,
    options: DispatchOptions,
) -> Result<(ResultLog, Summary)>
where
    I: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
    R: Resolve + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let aggregator = tokio::spawn(output::aggregate(rx, console, FLUSH_INTERVAL));

    let summary = dispatch::dispatch(
        Targets::new(input),
        Arc::new(table),
        Arc::new(resolver),
        options,
        tx,
    )
    .await;

    // `dispatch` has dropped the last sender by now, so the aggregator is
    // finishing up.
    let log = aggregator.await.context("result aggregator panicked")??;
    Ok((log, summary))
}
