use std::fmt;

use anyhow::Result;

use crate::ranges::RangeTable;

/// Label written in place of a provider when no range matched.
pub const NO_MATCH: &str = "n/a";

/// One classification: the target as read, one of its IPs, and the provider
/// owning that IP if any.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Record {
    pub target: String,
    pub ip: String,
    pub provider: Option<String>,
}

impl Record {
    /// Parses a `target|ip|provider` line. Fields are split from the right,
    /// so a target that itself contains `|` is kept whole.
    pub fn from_line(line: &str) -> Result<Self> {
        let parts: Vec<&str> = line.rsplitn(3, '|').collect();
        if parts.len() != 3 {
            anyhow::bail!("Invalid record line format: {}", line);
        }

        Ok(Record {
            target: parts[2].to_string(),
            ip: parts[1].to_string(),
            provider: match parts[0] {
                NO_MATCH => None,
                name => Some(name.to_string()),
            },
        })
    }

    pub fn to_line(&self) -> String {
        self.to_string()
    }

    pub fn provider_label(&self) -> &str {
        self.provider.as_deref().unwrap_or(NO_MATCH)
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.target, self.ip, self.provider_label())
    }
}

/// Classifies a single resolved IP of `target` against the table.
pub fn classify(table: &RangeTable, target: &str, ip: &str) -> Record {
    Record {
        target: target.to_string(),
        ip: ip.to_string(),
        provider: table.classify(ip).map(str::to_string),
    }
}
