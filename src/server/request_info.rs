use std::fmt;

/// Best-effort metadata about one inbound request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMetadata {
    pub remote_addr: String,
    pub ip: String,
    pub port: String,
    /// Informational only; never trusted for routing.
    pub x_forwarded_for: String,
    pub requested_host: String,
    pub requested_port: String,
}

impl RequestMetadata {
    /// Never fails: pieces that cannot be split are left empty.
    pub fn classify(remote_addr: &str, host: Option<&str>, forwarded_for: Option<&str>) -> Self {
        let (ip, port) = split_host_port(remote_addr)
            .map(|(ip, port)| (ip.to_string(), port.to_string()))
            .unwrap_or_default();

        let (requested_host, requested_port) = match host.map(str::trim) {
            Some(host) if !host.is_empty() => match split_host_port(host) {
                Some((h, p)) => (h.to_string(), p.to_string()),
                // no port in the Host header
                None => (strip_brackets(host).to_string(), String::new()),
            },
            _ => (String::new(), String::new()),
        };

        Self {
            remote_addr: remote_addr.to_string(),
            ip,
            port,
            x_forwarded_for: forwarded_for.unwrap_or_default().to_string(),
            requested_host,
            requested_port,
        }
    }
}

impl fmt::Display for RequestMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<RemoteAddr: {}; IP: {}; Port: {}; X-Forwarded-For: {}>",
            self.remote_addr, self.ip, self.port, self.x_forwarded_for
        )
    }
}

/// Splits `host:port` or `[v6]:port`. Returns `None` when there is no port
/// or the address is malformed.
pub fn split_host_port(addr: &str) -> Option<(&str, &str)> {
    if let Some(rest) = addr.strip_prefix('[') {
        let end = rest.find(']')?;
        let host = &rest[..end];
        let port = rest[end + 1..].strip_prefix(':')?;
        if port.contains([':', '[', ']']) {
            return None;
        }
        return Some((host, port));
    }

    let (host, port) = addr.rsplit_once(':')?;
    if host.contains([':', '[', ']']) || port.contains(']') {
        return None;
    }
    Some((host, port))
}

fn strip_brackets(host: &str) -> &str {
    host.strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_host_port() {
        assert_eq!(split_host_port("127.0.0.1:8080"), Some(("127.0.0.1", "8080")));
        assert_eq!(split_host_port("[::1]:443"), Some(("::1", "443")));
        assert_eq!(split_host_port(":80"), Some(("", "80")));
        assert_eq!(split_host_port("example.com"), None);
        assert_eq!(split_host_port("::1"), None);
        assert_eq!(split_host_port("[::1]"), None);
    }

    #[test]
    fn test_classify_splits_remote_and_host() {
        let meta = RequestMetadata::classify(
            "10.0.0.7:51234",
            Some("localhost.localdomain:80"),
            Some("203.0.113.9"),
        );

        assert_eq!(meta.ip, "10.0.0.7");
        assert_eq!(meta.port, "51234");
        assert_eq!(meta.requested_host, "localhost.localdomain");
        assert_eq!(meta.requested_port, "80");
        assert_eq!(meta.x_forwarded_for, "203.0.113.9");
    }

    #[test]
    fn test_classify_host_without_port() {
        let meta = RequestMetadata::classify("10.0.0.7:1", Some("other.example.com"), None);
        assert_eq!(meta.requested_host, "other.example.com");
        assert_eq!(meta.requested_port, "");

        let meta = RequestMetadata::classify("10.0.0.7:1", Some("[2001:db8::1]"), None);
        assert_eq!(meta.requested_host, "2001:db8::1");
    }

    #[test]
    fn test_malformed_remote_address_degrades() {
        let meta = RequestMetadata::classify("not an address", None, None);
        assert_eq!(meta.remote_addr, "not an address");
        assert_eq!(meta.ip, "");
        assert_eq!(meta.port, "");
        assert_eq!(meta.requested_host, "");
    }

    #[test]
    fn test_display() {
        let meta = RequestMetadata::classify("[::1]:9000", None, Some("1.2.3.4"));
        assert_eq!(
            meta.to_string(),
            "<RemoteAddr: [::1]:9000; IP: ::1; Port: 9000; X-Forwarded-For: 1.2.3.4>"
        );
    }
}
