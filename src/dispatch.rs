use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::io::AsyncBufRead;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::input::Targets;
use crate::ranges::RangeTable;
use crate::record::{self, Record};
use crate::resolver::{self, Resolution, Resolve};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOptions {
    /// Treat every target as an IP literal instead of a hostname.
    pub ip_mode: bool,
    /// Maximum number of targets in flight; `None` spawns one task per target
    /// without limit.
    pub concurrency: Option<NonZeroUsize>,
}

#[derive(Debug, Default)]
pub struct DispatchStats {
    targets: AtomicUsize,
    lookup_failures: AtomicUsize,
    records: AtomicUsize,
    matched: AtomicUsize,
    failed_tasks: AtomicUsize,
    input_truncated: AtomicBool,
}

/// Plain copy of [`DispatchStats`] taken once the run is over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub targets: usize,
    pub lookup_failures: usize,
    pub records: usize,
    pub matched: usize,
    pub failed_tasks: usize,
    /// Reading the input failed before its end; targets read until then were
    /// still processed.
    pub input_truncated: bool,
}

impl Summary {
    pub fn unmatched(&self) -> usize {
        self.records - self.matched
    }
}

impl DispatchStats {
    pub fn summary(&self) -> Summary {
        Summary {
            targets: self.targets.load(Ordering::Relaxed),
            lookup_failures: self.lookup_failures.load(Ordering::Relaxed),
            records: self.records.load(Ordering::Relaxed),
            matched: self.matched.load(Ordering::Relaxed),
            failed_tasks: self.failed_tasks.load(Ordering::Relaxed),
            input_truncated: self.input_truncated.load(Ordering::Relaxed),
        }
    }
}

/// Spawns one task per target and waits for all of them.
///
/// Records go to `sink`; the caller owns the receiving end. Per-target failures
/// never stop the run. A read error on the input stops reading, but tasks
/// already spawned still run to completion.
pub async fn dispatch<I, R>(
    mut targets: Targets<I>,
    table: Arc<RangeTable>,
    resolver: Arc<R>,
    options: DispatchOptions,
    sink: UnboundedSender<Record>,
) -> Summary
where
    I: AsyncBufRead + Unpin,
    R: Resolve + 'static,
{
    let stats = Arc::new(DispatchStats::default());
    let limit = options.concurrency.map(|n| Arc::new(Semaphore::new(n.get())));
    let mut tasks = JoinSet::new();

    loop {
        let target = match targets.next_target().await {
            Ok(Some(target)) => target,
            Ok(None) => break,
            Err(e) => {
                error!(error = %e, "failed reading input, finishing targets already read");
                stats.input_truncated.store(true, Ordering::Relaxed);
                break;
            }
        };
        stats.targets.fetch_add(1, Ordering::Relaxed);

        let permit = match &limit {
            Some(semaphore) => match semaphore.clone().acquire_owned().await {
                Ok(permit) => Some(permit),
                Err(e) => {
                    warn!(error = %e, "concurrency limit unavailable, running unbounded");
                    None
                }
            },
            None => None,
        };

        let table = table.clone();
        let resolver = resolver.clone();
        let stats = stats.clone();
        let sink = sink.clone();
        tasks.spawn(async move {
            let _permit = permit;
            check_target(&target, &table, &*resolver, options.ip_mode, &stats, &sink).await;
        });
    }

    // No new senders after this; the aggregator ends once every task is done.
    drop(sink);

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "target task failed");
            stats.failed_tasks.fetch_add(1, Ordering::Relaxed);
        }
    }

    let summary = stats.summary();
    info!(
        targets = summary.targets,
        lookup_failures = summary.lookup_failures,
        matched = summary.matched,
        unmatched = summary.unmatched(),
        "finished"
    );
    summary
}

async fn check_target<R>(
    target: &str,
    table: &RangeTable,
    resolver: &R,
    ip_mode: bool,
    stats: &DispatchStats,
    sink: &UnboundedSender<Record>,
) where
    R: Resolve + ?Sized,
{
    info!("Checking: {}", target);

    let ips = match resolver::resolve(resolver, target, ip_mode).await {
        Resolution::Found(ips) => ips,
        Resolution::Failed => {
            stats.lookup_failures.fetch_add(1, Ordering::Relaxed);
            return;
        }
    };

    for ip in ips {
        let record = record::classify(table, target, &ip);
        stats.records.fetch_add(1, Ordering::Relaxed);
        if record.provider.is_some() {
            stats.matched.fetch_add(1, Ordering::Relaxed);
        }
        if sink.send(record).is_err() {
            debug!(host = target, "result sink closed, dropping record");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io;
    use std::net::IpAddr;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::io::{AsyncRead, AsyncReadExt, BufReader, ReadBuf};
    use tokio::sync::mpsc;

    /// Reader that fails on every read, standing in for a broken stdin.
    struct Broken;

    impl AsyncRead for Broken {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, "stdin went away")))
        }
    }

    struct Slow {
        hosts: HashMap<&'static str, Vec<IpAddr>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Slow {
        fn new(hosts: &[(&'static str, &str)]) -> Self {
            Self {
                hosts: hosts
                    .iter()
                    .map(|(host, ip)| (*host, vec![ip.parse().unwrap()]))
                    .collect(),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Resolve for Slow {
        async fn lookup(&self, host: &str) -> io::Result<Vec<IpAddr>> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.hosts
                .get(host)
                .cloned()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "nxdomain"))
        }
    }

    async fn run(
        input: &'static [u8],
        resolver: Arc<Slow>,
        options: DispatchOptions,
    ) -> (Summary, Vec<Record>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let summary = dispatch(
            Targets::new(input),
            Arc::new(RangeTable::builtin()),
            resolver,
            options,
            tx,
        )
        .await;

        let mut records = Vec::new();
        while let Some(record) = rx.recv().await {
            records.push(record);
        }
        (summary, records)
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_every_target() {
        let resolver = Arc::new(Slow::new(&[
            ("a.com", "104.16.0.1"),
            ("b.com", "93.184.216.34"),
        ]));
        let (summary, mut records) =
            run(b"a.com\nb.com\nnx.invalid\n", resolver, DispatchOptions::default()).await;

        records.sort_by(|a, b| a.target.cmp(&b.target));
        let lines: Vec<_> = records.iter().map(Record::to_line).collect();
        assert_eq!(lines, vec!["a.com|104.16.0.1|cloudflare", "b.com|93.184.216.34|n/a"]);
        assert_eq!(summary.targets, 3);
        assert_eq!(summary.lookup_failures, 1);
        assert_eq!(summary.matched, 1);
        assert_eq!(summary.unmatched(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_by_default() {
        let resolver = Arc::new(Slow::new(&[]));
        run(b"a\nb\nc\nd\n", resolver.clone(), DispatchOptions::default()).await;
        assert_eq!(resolver.peak.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_limit_caps_in_flight_lookups() {
        let resolver = Arc::new(Slow::new(&[("a", "1.1.1.1"), ("b", "1.1.1.2")]));
        let options = DispatchOptions {
            ip_mode: false,
            concurrency: NonZeroUsize::new(2),
        };
        let (summary, records) = run(b"a\nb\nc\nd\ne\n", resolver.clone(), options).await;

        assert_eq!(resolver.peak.load(Ordering::SeqCst), 2);
        assert_eq!(summary.targets, 5);
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn ip_mode_never_resolves() {
        let resolver = Arc::new(Slow::new(&[]));
        let options = DispatchOptions {
            ip_mode: true,
            concurrency: None,
        };
        let (_, records) = run(b"104.16.0.1\nnot-an-ip\n", resolver.clone(), options).await;

        assert_eq!(resolver.peak.load(Ordering::SeqCst), 0);
        let mut lines: Vec<_> = records.iter().map(Record::to_line).collect();
        lines.sort();
        assert_eq!(lines, vec!["104.16.0.1|104.16.0.1|cloudflare", "not-an-ip|not-an-ip|n/a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn read_error_still_finishes_targets_in_flight() {
        let resolver = Arc::new(Slow::new(&[("a.com", "104.16.0.1")]));
        let input: &'static [u8] = b"a.com\n";
        let (tx, mut rx) = mpsc::unbounded_channel();

        let summary = dispatch(
            Targets::new(BufReader::new(input.chain(Broken))),
            Arc::new(RangeTable::builtin()),
            resolver,
            DispatchOptions::default(),
            tx,
        )
        .await;

        assert!(summary.input_truncated);
        assert_eq!(summary.targets, 1);
        assert_eq!(summary.failed_tasks, 0);

        let record = rx.recv().await.unwrap();
        assert_eq!(record.to_line(), "a.com|104.16.0.1|cloudflare");
        assert!(rx.recv().await.is_none());
    }
}
