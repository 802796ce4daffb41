//! SSRF guard for outbound URL fetches.
//!
//! Rejects private, loopback, link-local, multicast and metadata-service
//! addresses — both when the host is an IP literal and after a single DNS
//! resolution (so `evil.example` pointing at 169.254.169.254 is caught).

use std::net::IpAddr;

use tracing::warn;
use url::{Host, Url};

/// Check whether `raw` is safe to fetch. Resolves DNS at most once.
///
/// Returns `Ok(())` when safe, `Err(reason)` otherwise. Callers must not
/// issue any network request when this fails.
pub async fn is_url_safe(raw: &str) -> Result<(), String> {
    let parsed = Url::parse(raw).map_err(|e| format!("invalid URL: {e}"))?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => return Err(format!("scheme '{other}' is not allowed")),
    }

    let host = parsed
        .host()
        .ok_or_else(|| "URL has no host".to_string())?;

    match host {
        Host::Ipv4(ip) => check_ip(IpAddr::V4(ip))?,
        Host::Ipv6(ip) => check_ip(IpAddr::V6(ip))?,
        Host::Domain(domain) => {
            if domain.eq_ignore_ascii_case("localhost") {
                return Err("loopback host is not allowed".to_string());
            }
            let port = parsed.port_or_known_default().unwrap_or(443);
            let addrs = tokio::net::lookup_host((domain, port))
                .await
                .map_err(|e| format!("DNS resolution failed: {e}"))?;
            let mut any = false;
            for addr in addrs {
                any = true;
                if let Err(reason) = check_ip(addr.ip()) {
                    warn!(url = raw, ip = %addr.ip(), reason, "blocked URL after DNS resolution");
                    return Err(reason);
                }
            }
            if !any {
                return Err("host resolved to no addresses".to_string());
            }
        }
    }

    Ok(())
}

fn check_ip(ip: IpAddr) -> Result<(), String> {
    let blocked = match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_multicast()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // Carrier-grade NAT (100.64.0.0/10).
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_multicast()
                || v6.is_unspecified()
                // Unique-local fc00::/7 and link-local fe80::/10.
                || (v6.segments()[0] & 0xFE00) == 0xFC00
                || (v6.segments()[0] & 0xFFC0) == 0xFE80
        }
    };

    if blocked {
        Err(format!("address {ip} is in a blocked range"))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn blocks_metadata_service() {
        let err = is_url_safe("http://169.254.169.254/latest/meta-data/")
            .await
            .unwrap_err();
        assert!(err.contains("blocked range"));
    }

    #[tokio::test]
    async fn blocks_loopback_and_private() {
        assert!(is_url_safe("http://127.0.0.1:8080/admin").await.is_err());
        assert!(is_url_safe("http://localhost/x").await.is_err());
        assert!(is_url_safe("http://10.0.0.5/").await.is_err());
        assert!(is_url_safe("http://192.168.1.1/router").await.is_err());
        assert!(is_url_safe("http://[::1]/").await.is_err());
    }

    #[tokio::test]
    async fn blocks_non_http_schemes() {
        assert!(is_url_safe("file:///etc/passwd").await.is_err());
        assert!(is_url_safe("ftp://example.com/x").await.is_err());
        assert!(is_url_safe("gopher://example.com/").await.is_err());
    }

    #[tokio::test]
    async fn accepts_public_ip_literal() {
        assert!(is_url_safe("http://93.184.216.34/").await.is_ok());
    }
}
