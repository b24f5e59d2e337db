//! Forward lookups restricted to IPv4.
//!
//! The [`Resolve`] trait is the seam between the pipeline and the platform
//! resolver, so the dispatcher can be driven by canned answers in tests.

use std::io;
use std::net::IpAddr;

use async_trait::async_trait;
use tracing::debug;

#[async_trait]
pub trait Resolve: Send + Sync {
    async fn lookup(&self, host: &str) -> io::Result<Vec<IpAddr>>;
}

/// Resolver backed by the operating system (`getaddrinfo` through tokio).
#[derive(Clone, Debug, Default)]
pub struct SystemResolver;

impl SystemResolver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Resolve for SystemResolver {
    async fn lookup(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, 0)).await?;
        Ok(addrs.map(|addr| addr.ip()).collect())
    }
}

/// Result of resolving one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Found(Vec<String>),
    Failed,
}

impl Resolution {
    pub fn into_ips(self) -> Vec<String> {
        match self {
            Resolution::Found(ips) => ips,
            Resolution::Failed => Vec::new(),
        }
    }
}

/// Turns a target into the IPv4 addresses to classify.
///
/// In literal mode the target is passed through untouched; it gets validated
/// when classified. Lookup errors are not retried and end up as an empty list.
pub async fn resolve<R>(resolver: &R, target: &str, ip_literal_mode: bool) -> Resolution
where
    R: Resolve + ?Sized,
{
    if ip_literal_mode {
        return Resolution::Found(vec![target.to_string()]);
    }

    match resolver.lookup(target).await {
        Ok(addrs) => {
            let ips: Vec<String> = addrs
                .into_iter()
                .filter(IpAddr::is_ipv4)
                .map(|ip| ip.to_string())
                .collect();
            debug!(host = target, count = ips.len(), "resolved");
            Resolution::Found(ips)
        }
        Err(e) => {
            debug!(host = target, error = %e, "lookup failed");
            Resolution::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::net::{Ipv4Addr, Ipv6Addr};

    struct Canned(HashMap<&'static str, Vec<IpAddr>>);

    #[async_trait]
    impl Resolve for Canned {
        async fn lookup(&self, host: &str) -> io::Result<Vec<IpAddr>> {
            self.0
                .get(host)
                .cloned()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such host"))
        }
    }

    fn canned() -> Canned {
        Canned(HashMap::from([(
            "dual.example",
            vec![
                IpAddr::V6(Ipv6Addr::LOCALHOST),
                IpAddr::V4(Ipv4Addr::new(104, 16, 0, 1)),
                IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34)),
            ],
        )]))
    }

    #[tokio::test]
    async fn keeps_only_ipv4_results() {
        let res = resolve(&canned(), "dual.example", false).await;
        assert_eq!(
            res,
            Resolution::Found(vec!["104.16.0.1".into(), "93.184.216.34".into()])
        );
    }

    #[tokio::test]
    async fn failed_lookup_yields_no_ips() {
        let res = resolve(&canned(), "missing.example", false).await;
        assert_eq!(res, Resolution::Failed);
        assert!(res.into_ips().is_empty());
    }

    #[tokio::test]
    async fn literal_mode_skips_lookup() {
        let res = resolve(&canned(), "not even an ip", true).await;
        assert_eq!(res.into_ips(), vec!["not even an ip".to_string()]);
    }

    #[tokio::test]
    async fn system_resolver_handles_ip_literals() {
        let addrs = SystemResolver::new().lookup("127.0.0.1").await.unwrap();
        assert_eq!(addrs, vec![IpAddr::V4(Ipv4Addr::LOCALHOST)]);
    }
}
