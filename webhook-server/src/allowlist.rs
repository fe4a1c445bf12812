//! Source address allowlist.
//!
//! Telegram delivers webhooks only from a small set of published networks.
//! Prefixes are converted to inclusive integer ranges, merged and sorted once
//! at startup, so a lookup is a binary search.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use thiserror::Error;

/// Networks Telegram delivers webhook requests from.
///
/// Reference: https://core.telegram.org/bots/webhooks#the-short-version
pub const TELEGRAM_SUBNETS: &[&str] = &["149.154.160.0/20", "91.108.4.0/22"];

/// Private and loopback networks, for running behind a local proxy or in tests.
pub const PRIVATE_SUBNETS: &[&str] = &[
    "10.0.0.0/8",
    "127.0.0.0/8",
    "172.16.0.0/12",
    "192.168.0.0/16",
    "::1/128",
];

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid network prefix {input:?}: {reason}")]
pub struct PrefixParseError {
    input: String,
    reason: &'static str,
}

/// A single IPv4 or IPv6 network prefix, stored in canonical form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpPrefix {
    network: IpAddr,
    len: u8,
}

impl IpPrefix {
    pub fn new(addr: IpAddr, len: u8) -> Result<Self, PrefixParseError> {
        let max = match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        if len > max {
            return Err(PrefixParseError {
                input: format!("{addr}/{len}"),
                reason: "prefix length out of range",
            });
        }

        // Host bits are cleared so "10.1.2.3/8" means 10.0.0.0/8.
        let network = match addr {
            IpAddr::V4(v4) => IpAddr::V4(Ipv4Addr::from(u32::from(v4) & v4_mask(len))),
            IpAddr::V6(v6) => IpAddr::V6(Ipv6Addr::from(u128::from(v6) & v6_mask(len))),
        };

        Ok(Self { network, len })
    }

    pub fn network(&self) -> IpAddr {
        self.network
    }

    pub fn prefix_len(&self) -> u8 {
        self.len
    }

    pub fn contains(&self, addr: IpAddr) -> bool {
        match (self.network, canonical(addr)) {
            (IpAddr::V4(net), IpAddr::V4(a)) => u32::from(a) & v4_mask(self.len) == u32::from(net),
            (IpAddr::V6(net), IpAddr::V6(a)) => {
                u128::from(a) & v6_mask(self.len) == u128::from(net)
            }
            _ => false,
        }
    }
}

impl FromStr for IpPrefix {
    type Err = PrefixParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let err = |reason| PrefixParseError {
            input: s.to_string(),
            reason,
        };

        let (addr, len) = match s.split_once('/') {
            Some((addr, len)) => {
                let addr: IpAddr = addr.parse().map_err(|_| err("invalid address"))?;
                let len: u8 = len.parse().map_err(|_| err("invalid prefix length"))?;
                (addr, len)
            }
            None => {
                let addr: IpAddr = s.parse().map_err(|_| err("invalid address"))?;
                let len = if addr.is_ipv4() { 32 } else { 128 };
                (addr, len)
            }
        };

        IpPrefix::new(addr, len).map_err(|e| err(e.reason))
    }
}

impl fmt::Display for IpPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.len)
    }
}

/// Read-only set of allowed source networks.
#[derive(Debug, Clone, Default)]
pub struct Allowlist {
    prefixes: Vec<IpPrefix>,
    v4: Vec<(u32, u32)>,
    v6: Vec<(u128, u128)>,
}

impl Allowlist {
    pub fn new(prefixes: impl IntoIterator<Item = IpPrefix>) -> Self {
        let prefixes: Vec<IpPrefix> = prefixes.into_iter().collect();

        let mut v4 = Vec::new();
        let mut v6 = Vec::new();
        for prefix in &prefixes {
            match prefix.network {
                IpAddr::V4(net) => {
                    let start = u32::from(net);
                    v4.push((start, start | !v4_mask(prefix.len)));
                }
                IpAddr::V6(net) => {
                    let start = u128::from(net);
                    v6.push((start, start | !v6_mask(prefix.len)));
                }
            }
        }

        Self {
            prefixes,
            v4: merge(v4),
            v6: merge(v6),
        }
    }

    /// Parse a list of CIDR strings.
    pub fn parse<S: AsRef<str>>(items: &[S]) -> Result<Self, PrefixParseError> {
        let prefixes = items
            .iter()
            .map(|s| s.as_ref().parse())
            .collect::<Result<Vec<IpPrefix>, _>>()?;
        Ok(Self::new(prefixes))
    }

    /// Telegram's published networks, optionally with private ranges.
    pub fn telegram(allow_private_ranges: bool) -> Self {
        let mut items: Vec<&str> = TELEGRAM_SUBNETS.to_vec();
        if allow_private_ranges {
            items.extend_from_slice(PRIVATE_SUBNETS);
        }
        // Constants above are valid prefixes.
        Self::parse(&items).unwrap_or_default()
    }

    /// The prefixes as configured, in configuration order.
    pub fn prefixes(&self) -> &[IpPrefix] {
        &self.prefixes
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    pub fn allows(&self, addr: IpAddr) -> bool {
        match canonical(addr) {
            IpAddr::V4(a) => lookup(&self.v4, u32::from(a)),
            IpAddr::V6(a) => lookup(&self.v6, u128::from(a)),
        }
    }
}

/// Unwrap IPv4-mapped IPv6 addresses, as seen on dual-stack listeners.
pub fn canonical(addr: IpAddr) -> IpAddr {
    match addr {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
        v4 => v4,
    }
}

fn v4_mask(len: u8) -> u32 {
    if len == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(len))
    }
}

fn v6_mask(len: u8) -> u128 {
    if len == 0 {
        0
    } else {
        u128::MAX << (128 - u32::from(len))
    }
}

/// Sort inclusive ranges and merge the ones that overlap or touch.
fn merge<T: Copy + Ord + num_like::Successor>(mut ranges: Vec<(T, T)>) -> Vec<(T, T)> {
    ranges.sort_unstable();
    let mut merged: Vec<(T, T)> = Vec::with_capacity(ranges.len());
    for (start, end) in ranges {
        if let Some(last) = merged.last_mut() {
            if last.1.successor().map_or(true, |next| start <= next) {
                if end > last.1 {
                    last.1 = end;
                }
                continue;
            }
        }
        merged.push((start, end));
    }
    merged
}

fn lookup<T: Copy + Ord>(ranges: &[(T, T)], addr: T) -> bool {
    // First range whose start is greater than addr; the candidate is just before it.
    let idx = ranges.partition_point(|&(start, _)| start <= addr);
    idx > 0 && addr <= ranges[idx - 1].1
}

mod num_like {
    pub trait Successor: Sized {
        fn successor(self) -> Option<Self>;
    }

    impl Successor for u32 {
        fn successor(self) -> Option<Self> {
            self.checked_add(1)
        }
    }

    impl Successor for u128 {
        fn successor(self) -> Option<Self> {
            self.checked_add(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_prefix_canonicalizes_network() {
        let prefix: IpPrefix = "10.1.2.3/8".parse().unwrap();
        assert_eq!(prefix.network(), ip("10.0.0.0"));
        assert_eq!(prefix.prefix_len(), 8);
        assert_eq!(prefix.to_string(), "10.0.0.0/8");
    }

    #[test]
    fn test_parse_prefix_bare_address() {
        let prefix: IpPrefix = "203.0.113.7".parse().unwrap();
        assert_eq!(prefix.prefix_len(), 32);
        assert!(prefix.contains(ip("203.0.113.7")));
        assert!(!prefix.contains(ip("203.0.113.8")));
    }

    #[test]
    fn test_parse_prefix_rejects_garbage() {
        assert!("not-an-ip/8".parse::<IpPrefix>().is_err());
        assert!("10.0.0.0/33".parse::<IpPrefix>().is_err());
        assert!("10.0.0.0/x".parse::<IpPrefix>().is_err());
        assert!("::/129".parse::<IpPrefix>().is_err());
    }

    #[test]
    fn test_telegram_ranges_boundaries() {
        let allowlist = Allowlist::telegram(false);

        // 149.154.160.0/20 spans 149.154.160.0 - 149.154.175.255
        assert!(allowlist.allows(ip("149.154.160.0")));
        assert!(allowlist.allows(ip("149.154.175.255")));
        assert!(!allowlist.allows(ip("149.154.159.255")));
        assert!(!allowlist.allows(ip("149.154.176.0")));

        // 91.108.4.0/22 spans 91.108.4.0 - 91.108.7.255
        assert!(allowlist.allows(ip("91.108.4.0")));
        assert!(allowlist.allows(ip("91.108.7.255")));
        assert!(!allowlist.allows(ip("91.108.3.255")));
        assert!(!allowlist.allows(ip("91.108.8.0")));
    }

    #[test]
    fn test_private_ranges_are_opt_in() {
        assert!(!Allowlist::telegram(false).allows(ip("127.0.0.1")));
        assert!(Allowlist::telegram(true).allows(ip("127.0.0.1")));
        assert!(Allowlist::telegram(true).allows(ip("192.168.1.10")));
        assert!(Allowlist::telegram(true).allows(ip("::1")));
        assert!(!Allowlist::telegram(true).allows(ip("8.8.8.8")));
    }

    #[test]
    fn test_ipv4_mapped_ipv6_is_checked_as_ipv4() {
        let allowlist = Allowlist::telegram(false);
        assert!(allowlist.allows(ip("::ffff:149.154.167.99")));
        assert!(!allowlist.allows(ip("::ffff:8.8.8.8")));
    }

    #[test]
    fn test_ipv6_prefixes() {
        let allowlist = Allowlist::parse(&["2001:db8::/32"]).unwrap();
        assert!(allowlist.allows(ip("2001:db8::")));
        assert!(allowlist.allows(ip("2001:db8:ffff:ffff:ffff:ffff:ffff:ffff")));
        assert!(!allowlist.allows(ip("2001:db9::")));
        assert!(!allowlist.allows(ip("10.0.0.1")));
    }

    #[test]
    fn test_overlapping_and_adjacent_ranges_merge() {
        let allowlist =
            Allowlist::parse(&["10.0.0.0/24", "10.0.1.0/24", "10.0.0.128/25", "10.0.5.0/24"])
                .unwrap();
        assert_eq!(allowlist.v4, vec![
            (u32::from(Ipv4Addr::new(10, 0, 0, 0)), u32::from(Ipv4Addr::new(10, 0, 1, 255))),
            (u32::from(Ipv4Addr::new(10, 0, 5, 0)), u32::from(Ipv4Addr::new(10, 0, 5, 255))),
        ]);
        assert!(allowlist.allows(ip("10.0.1.255")));
        assert!(!allowlist.allows(ip("10.0.2.0")));
        assert!(!allowlist.allows(ip("10.0.4.255")));
        assert_eq!(allowlist.prefixes().len(), 4);
    }

    #[test]
    fn test_full_range_does_not_overflow() {
        let allowlist = Allowlist::parse(&["0.0.0.0/0", "::/0"]).unwrap();
        assert!(allowlist.allows(ip("255.255.255.255")));
        assert!(allowlist.allows(ip("0.0.0.0")));
        assert!(allowlist.allows(ip("ffff::1")));
    }

    #[test]
    fn test_empty_allowlist_denies_everything() {
        let allowlist = Allowlist::default();
        assert!(allowlist.is_empty());
        assert!(!allowlist.allows(ip("149.154.160.1")));
    }
}
