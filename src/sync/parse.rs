//! Parsers for address-list bodies and the crawlers-info page.

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::LazyLock;

use ipnet::IpNet;
use regex::Regex;

use crate::models::address::{NewAddress, SourceType};

static IPV4_CANDIDATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:[0-9]{1,3}\.){3}[0-9]{1,3}\b").expect("static IPv4 pattern is valid")
});

/// Substrings that mark placeholder or reserved addresses on scraped pages.
const SCRAPE_REJECTS: [&str; 3] = ["0.0.0.0", "127.0.0", "255.255.255"];

/// Split a newline-delimited body into distinct trimmed literals.
pub fn parse_address_list(body: &str) -> BTreeSet<String> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Turn a literal into an insertable address, or `None` if it is neither an
/// IP address nor a CIDR network.
pub fn classify_literal(literal: &str) -> Option<NewAddress> {
    if literal.parse::<IpAddr>().is_ok() {
        return Some(NewAddress {
            address: literal.to_string(),
            source_type: SourceType::DirectIp,
            range_start: None,
            range_end: None,
        });
    }

    let net = literal.parse::<IpNet>().ok()?;
    Some(NewAddress {
        address: literal.to_string(),
        source_type: SourceType::Cidr,
        range_start: Some(net.network().to_string()),
        range_end: Some(net.broadcast().to_string()),
    })
}

/// Text between the first `start` marker and the next `end` marker after it.
pub fn extract_section<'a>(page: &'a str, start: &str, end: &str) -> Option<&'a str> {
    let from = page.find(start)?;
    let rest = &page[from..];
    let to = rest[start.len()..].find(end)? + start.len();
    Some(&rest[..to])
}

/// Valid, non-reserved IPv4 literals found in `text`.
pub fn scrape_ipv4(text: &str) -> BTreeSet<String> {
    IPV4_CANDIDATE
        .find_iter(text)
        .map(|m| m.as_str())
        .filter(|ip| ip.parse::<Ipv4Addr>().is_ok())
        .filter(|ip| !SCRAPE_REJECTS.iter().any(|bad| ip.contains(bad)))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_list_trims_and_dedupes() {
        let parsed = parse_address_list("1.2.3.4\n\n  5.6.7.8  \r\n1.2.3.4\n");
        assert_eq!(
            parsed.into_iter().collect::<Vec<_>>(),
            vec!["1.2.3.4".to_string(), "5.6.7.8".to_string()]
        );
        assert!(parse_address_list("\n \n").is_empty());
    }

    #[test]
    fn test_classify_single_addresses() {
        let v4 = classify_literal("20.171.206.7").unwrap();
        assert_eq!(v4.source_type, SourceType::DirectIp);
        assert_eq!(v4.range_start, None);

        let v6 = classify_literal("2603:1030:a02::1").unwrap();
        assert_eq!(v6.source_type, SourceType::DirectIp);
    }

    #[test]
    fn test_classify_network_carries_bounds() {
        let net = classify_literal("20.171.206.0/24").unwrap();
        assert_eq!(net.source_type, SourceType::Cidr);
        assert_eq!(net.range_start.as_deref(), Some("20.171.206.0"));
        assert_eq!(net.range_end.as_deref(), Some("20.171.206.255"));
    }

    #[test]
    fn test_classify_rejects_garbage() {
        for bad in ["not-an-ip", "300.1.1.1", "1.2.3.4/40", "# comment", "1.2.3"] {
            assert!(classify_literal(bad).is_none(), "{bad} accepted");
        }
    }

    #[test]
    fn test_extract_section_between_markers() {
        let page = "<p>Header 9.9.9.9</p>IP addresses: 1.2.3.4, 5.6.7.8 Countries: US 8.8.8.8";
        let section = extract_section(page, "IP addresses:", "Countries:").unwrap();
        assert_eq!(section, "IP addresses: 1.2.3.4, 5.6.7.8 ");
    }

    #[test]
    fn test_extract_section_missing_markers() {
        assert!(extract_section("Countries: US", "IP addresses:", "Countries:").is_none());
        assert!(extract_section("IP addresses: 1.2.3.4", "IP addresses:", "Countries:").is_none());
        // An end marker before the start marker does not count.
        assert!(extract_section("Countries: IP addresses: 1.2.3.4", "IP addresses:", "Countries:").is_none());
    }

    #[test]
    fn test_scrape_filters_invalid_and_reserved() {
        let text = "23.98.142.176 999.1.1.1 127.0.0.1 0.0.0.0 10.255.255.255 13.65.138.112";
        let ips: Vec<_> = scrape_ipv4(text).into_iter().collect();
        assert_eq!(ips, vec!["13.65.138.112".to_string(), "23.98.142.176".to_string()]);
    }
}
