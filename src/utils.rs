use std::net::IpAddr;

use crate::models::UNKNOWN;

pub fn format_cache_key(prefix: &str, key: &str) -> String {
    format!("{}:{}", prefix, key)
}

/// Parse an IP literal and return its canonical textual form
pub fn normalize_ip(raw: &str) -> Option<String> {
    raw.trim().parse::<IpAddr>().ok().map(|ip| ip.to_string())
}

/// Canonical IP, or the `Unknown` sentinel for anything unparseable
pub fn ip_or_unknown(raw: Option<&str>) -> String {
    raw.and_then(normalize_ip).unwrap_or_else(|| UNKNOWN.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_ip() {
        assert_eq!(normalize_ip("1.2.3.4"), Some("1.2.3.4".to_string()));
        assert_eq!(normalize_ip(" 2001:DB8::0:1 "), Some("2001:db8::1".to_string()));
        assert_eq!(normalize_ip("999.1.1.1"), None);
        assert_eq!(normalize_ip("not-an-ip"), None);
    }

    #[test]
    fn test_ip_or_unknown() {
        assert_eq!(ip_or_unknown(None), UNKNOWN);
        assert_eq!(ip_or_unknown(Some("garbage")), UNKNOWN);
        assert_eq!(ip_or_unknown(Some("10.0.0.1")), "10.0.0.1");
    }

    #[test]
    fn test_format_cache_key() {
        assert_eq!(format_cache_key("geo", "1.2.3.4"), "geo:1.2.3.4");
    }
}
