use std::num::NonZeroUsize;
use std::path::PathBuf;

use anyhow::Result;
use cdn_classify::{output, run_classify, Config, DispatchOptions, RangeSource, SystemResolver};
use clap::Parser;
use tokio::io::BufReader;
use tracing::{error, level_filters::LevelFilter};
use tracing_subscriber::{fmt::Layer, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer as _};

#[derive(Parser)]
#[command(name = "cdn-classify")]
#[command(about = "Checks whether hosts read from stdin sit behind a known CDN or WAF provider")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Write every target|ip|provider line to this file once the run is done
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Only print result lines
    #[arg(short, long)]
    quiet: bool,

    /// Input is already a list of IP addresses
    #[arg(short, long)]
    ip: bool,

    /// Load provider ranges from a file of `name|cidr cidr ...` lines
    #[arg(short, long, value_name = "PATH")]
    ranges: Option<PathBuf>,

    /// Maximum number of targets looked up at once, at least 1 (unbounded by default)
    #[arg(short, long, value_name = "N")]
    concurrency: Option<NonZeroUsize>,
}

impl Cli {
    fn into_config(self) -> Config {
        Config {
            output: self.output,
            quiet: self.quiet,
            ranges: RangeSource::discover(self.ranges),
            dispatch: DispatchOptions {
                ip_mode: self.ip,
                concurrency: self.concurrency,
            },
        }
    }
}

fn init_logging(quiet: bool) {
    let filter = if quiet {
        EnvFilter::default().add_directive(LevelFilter::OFF.into())
    } else {
        EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .from_env_lossy()
    };
    let layer = Layer::new()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(filter);
    tracing_subscriber::registry().with(layer).init();
}

fn banner() {
    eprintln!("---------------------------------------------------");
    eprintln!("cdn-classify {}", env!("CARGO_PKG_VERSION"));
    eprintln!("Checks to see if a host is served from a CDN/WAF provider. Reads directly from stdin.");
    eprintln!();
    eprintln!("Run again with -q for cleaner output");
    eprintln!("---------------------------------------------------");
    eprintln!();
}

async fn run(config: Config) -> Result<()> {
    let table = config.ranges.load()?;

    let (log, _summary) = run_classify(
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        table,
        SystemResolver::new(),
        config.dispatch,
    )
    .await?;

    if let Some(path) = &config.output {
        output::persist(path, &log)?;
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let config = Cli::parse().into_config();

    init_logging(config.quiet);
    if !config.quiet {
        banner();
    }

    // Logging is off in quiet mode, so a fatal error there only shows up in the
    // exit status.
    if let Err(e) = run(config).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}
