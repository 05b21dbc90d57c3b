//! Denylists parsed from comma-separated configuration values.

use ipnet::IpNet;
use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;
use tracing::warn;

/// File extensions that are never relayed, stored dot-prefixed and lowercase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionDenylist(HashSet<String>);

impl ExtensionDenylist {
    /// Parse a list like `pdf, .ZIP`; the leading dot is optional.
    pub fn parse(raw: &str) -> Self {
        let extensions = raw
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty() && *p != ".")
            .map(|p| {
                let p = p.to_lowercase();
                if p.starts_with('.') {
                    p
                } else {
                    format!(".{p}")
                }
            })
            .collect();

        Self(extensions)
    }

    /// `extension` must already be normalized (see [`crate::relay::filter::extension_of`]).
    pub fn contains(&self, extension: &str) -> bool {
        self.0.contains(extension)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ExtensionDenylist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut entries: Vec<&str> = self.0.iter().map(String::as_str).collect();
        entries.sort_unstable();
        write!(f, "[{}]", entries.join(", "))
    }
}

/// Client addresses that are never relayed.
///
/// Entries are single addresses or CIDR networks. Anything else is skipped
/// with a warning when the list is parsed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpDenylist {
    addresses: HashSet<IpAddr>,
    networks: Vec<IpNet>,
}

impl IpDenylist {
    pub fn parse(raw: &str) -> Self {
        let mut list = Self::default();

        for entry in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            if let Ok(ip) = entry.parse::<IpAddr>() {
                list.addresses.insert(ip);
            } else if let Ok(net) = entry.parse::<IpNet>() {
                list.networks.push(net.trunc());
            } else {
                warn!("Ignoring invalid IGNORE_IPS entry '{entry}'");
            }
        }

        list
    }

    /// Check a raw header value against the list.
    pub fn contains(&self, value: &str) -> bool {
        let Ok(ip) = value.trim().parse::<IpAddr>() else {
            return false;
        };

        self.addresses.contains(&ip) || self.networks.iter().any(|net| net.contains(&ip))
    }

    pub fn len(&self) -> usize {
        self.addresses.len() + self.networks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty() && self.networks.is_empty()
    }
}

impl fmt::Display for IpDenylist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut entries: Vec<String> = self.addresses.iter().map(ToString::to_string).collect();
        entries.sort_unstable();
        entries.extend(self.networks.iter().map(ToString::to_string));
        write!(f, "[{}]", entries.join(", "))
    }
}
