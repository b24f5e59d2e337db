use std::net::Ipv4Addr;
use std::str::FromStr;

use anyhow::Result;
use ipnet::Ipv4Net;
use tracing::{debug, info, warn};

pub const AKAMAI_RANGES: &str = "104.101.221.0/24 184.51.125.0/24 184.51.154.0/24 184.51.157.0/24 184.51.33.0/24 2.16.36.0/24 2.16.37.0/24 2.22.226.0/24 2.22.227.0/24 2.22.60.0/24 23.15.12.0/24 23.15.13.0/24 23.209.105.0/24 23.62.225.0/24 23.74.29.0/24 23.79.224.0/24 23.79.225.0/24 23.79.226.0/24 23.79.227.0/24 23.79.229.0/24 23.79.230.0/24 23.79.231.0/24 23.79.232.0/24 23.79.233.0/24 23.79.235.0/24 23.79.237.0/24 23.79.238.0/24 23.79.239.0/24 63.208.195.0/24 72.246.0.0/24 72.246.1.0/24 72.246.116.0/24 72.246.199.0/24 72.246.2.0/24 72.247.150.0/24 72.247.151.0/24 72.247.216.0/24 72.247.44.0/24 72.247.45.0/24 80.67.64.0/24 80.67.65.0/24 80.67.70.0/24 80.67.73.0/24 88.221.208.0/24 88.221.209.0/24 96.6.114.0/24";
pub const CLOUDFLARE_RANGES: &str = "173.245.48.0/20 103.21.244.0/22 103.22.200.0/22 103.31.4.0/22 141.101.64.0/18 108.162.192.0/18 190.93.240.0/20 188.114.96.0/20 197.234.240.0/22 198.41.128.0/17 162.158.0.0/15 104.16.0.0/12 172.64.0.0/13 131.0.72.0/22";
pub const INCAPSULA_RANGES: &str = "199.83.128.0/21 198.143.32.0/19 149.126.72.0/21 103.28.248.0/22 45.64.64.0/22 185.11.124.0/22 192.230.64.0/18 107.154.0.0/16 45.60.0.0/16 45.223.0.0/16";
pub const SUCURI_RANGES: &str = "185.93.228.0/24 185.93.229.0/24 185.93.230.0/24 185.93.231.0/24 192.124.249.0/24 192.161.0.0/24 192.88.134.0/24 192.88.135.0/24 193.19.224.0/24 193.19.225.0/24 66.248.200.0/24 66.248.201.0/24 66.248.202.0/24 66.248.203.0/24";

/// Built-in providers, highest priority first.
pub const BUILTIN_PROVIDERS: [(&str, &str); 4] = [
    ("akamai", AKAMAI_RANGES),
    ("cloudflare", CLOUDFLARE_RANGES),
    ("incapsula", INCAPSULA_RANGES),
    ("sucuri", SUCURI_RANGES),
];

#[derive(Debug, Clone)]
pub struct ProviderRanges {
    pub name: String,
    pub ranges: Vec<Ipv4Net>,
}

impl ProviderRanges {
    /// Parses a whitespace separated CIDR list. Entries that do not parse are
    /// dropped and reported through the returned count.
    pub fn parse(name: &str, cidrs: &str) -> (Self, usize) {
        let mut ranges = Vec::new();
        let mut invalid = 0;

        for entry in cidrs.split_whitespace() {
            match Ipv4Net::from_str(entry) {
                Ok(net) => ranges.push(net),
                Err(e) => {
                    warn!(provider = name, entry, error = %e, "ignoring malformed CIDR");
                    invalid += 1;
                }
            }
        }

        (
            Self {
                name: name.to_string(),
                ranges,
            },
            invalid,
        )
    }

    pub fn contains(&self, ip: &Ipv4Addr) -> bool {
        self.ranges.iter().any(|range| range.contains(ip))
    }
}

/// Provider range lists in priority order. Read-only once built.
#[derive(Debug, Clone, Default)]
pub struct RangeTable {
    providers: Vec<ProviderRanges>,
    invalid_entries: usize,
}

impl RangeTable {
    pub fn builtin() -> Self {
        Self::from_lists(&BUILTIN_PROVIDERS)
    }

    pub fn from_lists(lists: &[(&str, &str)]) -> Self {
        let mut table = Self::default();
        for (name, cidrs) in lists {
            table.push(name, cidrs);
        }
        table
    }

    /// Parses a ranges file made of `name|cidr cidr ...` lines. Blank lines and
    /// `#` comments are skipped; line order is priority order.
    pub fn from_conf(content: &str) -> Result<Self> {
        let mut table = Self::default();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((name, cidrs)) = line.split_once('|') else {
                anyhow::bail!("Invalid ranges line format: {}", line);
            };
            let name = name.trim();
            if name.is_empty() {
                anyhow::bail!("Missing provider name: {}", line);
            }
            table.push(name, cidrs);
        }

        info!(
            providers = table.providers.len(),
            invalid = table.invalid_entries,
            "loaded provider ranges"
        );
        Ok(table)
    }

    fn push(&mut self, name: &str, cidrs: &str) {
        let (provider, invalid) = ProviderRanges::parse(name, cidrs);
        self.invalid_entries += invalid;
        self.providers.push(provider);
    }

    pub fn ranges_for(&self, provider: &str) -> &[Ipv4Net] {
        self.providers
            .iter()
            .find(|p| p.name == provider)
            .map(|p| p.ranges.as_slice())
            .unwrap_or_default()
    }

    pub fn providers(&self) -> impl Iterator<Item = &str> {
        self.providers.iter().map(|p| p.name.as_str())
    }

    pub fn invalid_entries(&self) -> usize {
        self.invalid_entries
    }

    /// First provider, in priority order, with a block containing `ip`.
    /// Strings that are not IPv4 addresses never match.
    pub fn classify(&self, ip: &str) -> Option<&str> {
        let addr = match Ipv4Addr::from_str(ip) {
            Ok(addr) => addr,
            Err(_) => {
                debug!(ip, "not an IPv4 address, no provider can match");
                return None;
            }
        };

        for provider in &self.providers {
            debug!(%addr, provider = %provider.name, "checking IP in range");
            if provider.contains(&addr) {
                info!("{} exists in {}", addr, provider.name);
                return Some(provider.name.as_str());
            }
        }

        None
    }
}
