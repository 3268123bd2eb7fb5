use std::net::IpAddr;
use thiserror::Error;
use url::Url;

/// Errors that can occur during URL validation.
///
/// These errors cover both parsing failures and security policy violations
/// designed to prevent SSRF (Server-Side Request Forgery) attacks.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL points to a private/internal IP address.
    #[error("Private IP address not allowed: {0}")]
    PrivateIp(String),
    /// The URL points to localhost.
    #[error("Localhost not allowed")]
    Localhost,
}

/// Validates a user-supplied podcast feed URL before it is subscribed.
///
/// Rejects non-HTTP(S) schemes, localhost and private address ranges. Only
/// URLs entered by the operator go through this check; URLs discovered inside
/// feeds (media, images) are fetched as published.
///
/// # Examples
///
/// ```
/// use podkeeper::util::validate_url;
///
/// assert!(validate_url("https://example.com/feed.xml").is_ok());
/// assert!(validate_url("http://localhost/feed").is_err());
/// assert!(validate_url("http://192.168.1.1/feed").is_err());
/// assert!(validate_url("file:///etc/passwd").is_err());
/// ```
pub fn validate_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let url = Url::parse(url_str.trim())?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }

    if let Some(host) = url.host_str() {
        if host == "localhost" {
            return Err(UrlValidationError::Localhost);
        }

        // Strip brackets from IPv6 addresses for parsing
        let host_for_parse = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);

        if let Ok(ip) = host_for_parse.parse::<IpAddr>() {
            if ip.is_loopback() {
                return Err(UrlValidationError::Localhost);
            }
            if is_private_ip(&ip) {
                return Err(UrlValidationError::PrivateIp(ip.to_string()));
            }
        }
    }

    Ok(url)
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => {
            ipv4.is_private() || ipv4.is_loopback() || ipv4.is_link_local() || ipv4.is_unspecified()
        }
        IpAddr::V6(ipv6) => {
            if ipv6.is_loopback() || ipv6.is_unspecified() {
                return true;
            }
            let segments = ipv6.segments();
            // Unique Local (fc00::/7)
            let is_unique_local = (segments[0] & 0xfe00) == 0xfc00;
            // Link-Local (fe80::/10)
            let is_link_local = (segments[0] & 0xffc0) == 0xfe80;
            is_unique_local || is_link_local
        }
    }
}

/// True for absolute `http`/`https` URLs with a host.
pub fn is_http_url(s: &str) -> bool {
    match Url::parse(s.trim()) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.host_str().is_some(),
        Err(_) => false,
    }
}

/// Lowercased file extension of the URL's last path segment.
///
/// Query strings and fragments are ignored. Returns `None` for URLs that do
/// not parse or whose last segment has no extension.
pub fn url_extension(s: &str) -> Option<String> {
    let url = Url::parse(s.trim()).ok()?;
    let segment = url.path_segments()?.next_back()?;
    let (stem, ext) = segment.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_urls() {
        assert!(validate_url("https://example.com/feed.xml").is_ok());
        assert!(validate_url("  http://podcasts.example.org/rss  ").is_ok());
    }

    #[test]
    fn test_invalid_schemes() {
        assert!(matches!(
            validate_url("ftp://example.com"),
            Err(UrlValidationError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn test_loopback_and_private_rejected() {
        assert!(matches!(
            validate_url("http://127.0.0.1/feed"),
            Err(UrlValidationError::Localhost)
        ));
        assert!(validate_url("http://[::1]/feed").is_err());
        assert!(validate_url("http://10.0.0.1:3000/feed").is_err());
        assert!(validate_url("http://169.254.1.1/feed").is_err());
        assert!(validate_url("http://[fe80::1]/feed").is_err());
    }

    #[test]
    fn test_is_http_url() {
        assert!(is_http_url("https://example.com/ep/1"));
        assert!(!is_http_url("urn:uuid:1234"));
        assert!(!is_http_url("episode-42"));
        assert!(!is_http_url("mailto:host@example.com"));
    }

    #[test]
    fn test_url_extension() {
        assert_eq!(
            url_extension("https://cdn.example.com/a/b/ep1.mp3").as_deref(),
            Some("mp3")
        );
        assert_eq!(
            url_extension("https://cdn.example.com/ep1.M4A?token=abc#t=10").as_deref(),
            Some("m4a")
        );
        assert_eq!(url_extension("https://cdn.example.com/stream"), None);
        assert_eq!(url_extension("https://cdn.example.com/.hidden"), None);
        assert_eq!(url_extension("not a url"), None);
    }
}
