use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use reqwest::header::{
    HeaderMap, CACHE_CONTROL, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED, PRAGMA,
};
use reqwest::redirect::Policy;
use reqwest::StatusCode;
use thiserror::Error;

use super::cadence::analyze;
use super::parser::parse_feed;
use super::types::FeedRecord;
use super::xml::XmlIssue;

const MAX_RETRIES: u32 = 3;
const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB
const MAX_REDIRECTS: usize = 5;

/// Errors that can occur while fetching and parsing a feed.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// HTTP response with a status other than 2xx or 304
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Server returned 429 Too Many Requests after max retries
    #[error("Rate limited after {0} retries")]
    RateLimited(u32),
    /// Response body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// Empty body, or a document without an RSS channel or Atom feed
    #[error("No feed data found")]
    NoFeedData,
    /// The document is not well-formed XML
    #[error("XML parse error: {}", summarize(.issues))]
    XmlParse { issues: Vec<XmlIssue> },
    /// The feed has no item with playable media
    #[error("Feed contains no playable episodes")]
    NoItems,
}

fn summarize(issues: &[XmlIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result of a conditional fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// The server answered 304; the stored record is still current.
    NotModified,
    /// A freshly parsed record with cache validators and cadence filled in.
    Fetched(Box<FeedRecord>),
}

/// Cache validators from a previous response.
#[derive(Debug, Clone, Copy, Default)]
pub struct Validators<'a> {
    pub etag: Option<&'a str>,
    pub last_modified: Option<&'a str>,
}

/// Builds the HTTP client shared by feed and image downloads.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .user_agent(concat!("podkeeper/", env!("CARGO_PKG_VERSION")))
        .redirect(redirect_policy())
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(Duration::from_secs(30))
        .tcp_keepalive(Duration::from_secs(60))
        .timeout(timeout)
        .build()
}

fn redirect_policy() -> Policy {
    Policy::custom(|attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error("Too many redirects");
        }

        let url = attempt.url();
        if attempt.previous().iter().any(|prev| prev.as_str() == url.as_str()) {
            return attempt.error("Redirect loop detected");
        }

        tracing::debug!(
            from = %attempt.previous().last().map(|u| u.as_str()).unwrap_or("initial"),
            to = %url,
            hop = attempt.previous().len() + 1,
            "Following redirect"
        );
        attempt.follow()
    })
}

/// Conditional HTTP retrieval of feed documents.
#[derive(Debug, Clone)]
pub struct FeedFetcher {
    client: reqwest::Client,
    timeout: Duration,
    max_retries: u32,
}

impl FeedFetcher {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self {
            client,
            timeout,
            max_retries: MAX_RETRIES,
        }
    }

    /// Overrides how often 429, 5xx and truncated responses are retried.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Fetches and parses `url`.
    ///
    /// Non-empty validators are sent as `If-None-Match` / `If-Modified-Since`.
    /// A 304 answer returns [`FetchOutcome::NotModified`] without reading the
    /// body. On success the response's `ETag` and `Last-Modified` are stored
    /// on the record and the release cadence is analyzed.
    ///
    /// # Errors
    ///
    /// - [`FetchError::Network`] - Connection or TLS errors
    /// - [`FetchError::Timeout`] - No response within the timeout
    /// - [`FetchError::HttpStatus`] - Any other non-2xx response
    /// - [`FetchError::RateLimited`] - 429 response after max retries
    /// - [`FetchError::ResponseTooLarge`] - Body exceeded 10MB
    /// - [`FetchError::NoFeedData`] - Empty body or no channel element
    /// - [`FetchError::XmlParse`] - Malformed XML, with the parser's issues
    /// - [`FetchError::NoItems`] - No item with playable media
    pub async fn fetch(
        &self,
        url: &str,
        validators: Validators<'_>,
    ) -> Result<FetchOutcome, FetchError> {
        let Some((headers, bytes)) = self.get(url, validators).await? else {
            tracing::debug!(feed = %url, "Feed not modified");
            return Ok(FetchOutcome::NotModified);
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(FetchError::NoFeedData);
        }

        let mut feed = parse_feed(&bytes, url)?;
        feed.etag = header_value(&headers, ETAG.as_str());
        feed.last_modified = header_value(&headers, LAST_MODIFIED.as_str());

        let published: Vec<i64> = feed.items.iter().map(|i| i.published.timestamp).collect();
        analyze(&published, Utc::now()).apply(&mut feed);

        tracing::info!(
            feed = %url,
            episodes = feed.total,
            cache = %feed.cache_duration,
            active = feed.is_active,
            "Fetched feed"
        );
        Ok(FetchOutcome::Fetched(Box::new(feed)))
    }

    /// Downloads a binary resource such as an episode image.
    pub async fn download(&self, url: &str, limit: usize) -> Result<Vec<u8>, FetchError> {
        let response = tokio::time::timeout(self.timeout, self.client.get(url).send())
            .await
            .map_err(|_| FetchError::Timeout)?
            .map_err(FetchError::Network)?;

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }
        read_limited_bytes(response, limit).await
    }

    /// GET with retries. `None` means 304.
    async fn get(
        &self,
        url: &str,
        validators: Validators<'_>,
    ) -> Result<Option<(HeaderMap, Vec<u8>)>, FetchError> {
        let mut retry_count = 0;

        loop {
            let mut request = self
                .client
                .get(url)
                .header(CACHE_CONTROL, "no-cache, must-revalidate, max-age=0")
                .header(PRAGMA, "no-cache");
            if let Some(etag) = validators.etag.filter(|v| !v.trim().is_empty()) {
                request = request.header(IF_NONE_MATCH, etag);
            }
            if let Some(modified) = validators.last_modified.filter(|v| !v.trim().is_empty()) {
                request = request.header(IF_MODIFIED_SINCE, modified);
            }

            let response = tokio::time::timeout(self.timeout, request.send())
                .await
                .map_err(|_| FetchError::Timeout)?
                .map_err(FetchError::Network)?;

            let status = response.status();
            if status == StatusCode::NOT_MODIFIED {
                return Ok(None);
            }

            if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                if retry_count >= self.max_retries {
                    return Err(if status == StatusCode::TOO_MANY_REQUESTS {
                        FetchError::RateLimited(self.max_retries)
                    } else {
                        FetchError::HttpStatus(status.as_u16())
                    });
                }

                let delay_secs = 2u64.pow(retry_count); // 1s, 2s, 4s
                tracing::warn!(
                    feed = %url,
                    status = %status,
                    retry = retry_count,
                    delay_secs = delay_secs,
                    "Server refused request, backing off"
                );
                tokio::time::sleep(Duration::from_secs(delay_secs)).await;
                retry_count += 1;
                continue;
            }

            // 4xx and other non-success statuses fail immediately
            if !status.is_success() {
                return Err(FetchError::HttpStatus(status.as_u16()));
            }

            let headers = response.headers().clone();
            match read_limited_bytes(response, MAX_FEED_SIZE).await {
                Ok(bytes) => return Ok(Some((headers, bytes))),
                Err(FetchError::IncompleteResponse { expected, received })
                    if retry_count < self.max_retries =>
                {
                    let delay_secs = 2u64.pow(retry_count);
                    tracing::debug!(
                        feed = %url,
                        expected = expected,
                        received = received,
                        attempt = retry_count + 1,
                        delay_secs = delay_secs,
                        "Retrying incomplete download"
                    );
                    tokio::time::sleep(Duration::from_secs(delay_secs)).await;
                    retry_count += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    // EDGE-005: A dropped connection can end the stream early.
    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    fn header_str<'a>(req: &'a Request, name: &str) -> Option<&'a str> {
        req.headers.get(name).and_then(|v| v.to_str().ok())
    }

    const VALID_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <title>Test Cast</title>
    <item><guid>1</guid><title>Test</title>
      <enclosure url="https://cdn.example.com/1.mp3" type="audio/mpeg"/></item>
    <item><guid>2</guid><title>Blog post</title></item>
</channel></rss>"#;

    fn fetcher() -> FeedFetcher {
        FeedFetcher::new(reqwest::Client::new(), Duration::from_secs(5)).with_max_retries(0)
    }

    #[tokio::test]
    async fn test_fetch_success_captures_validators() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .and(|req: &Request| {
                header_str(req, "cache-control") == Some("no-cache, must-revalidate, max-age=0")
            })
            .and(header("pragma", "no-cache"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_RSS)
                    .insert_header("Content-Type", "application/xml")
                    .insert_header("ETag", "\"v1\"")
                    .insert_header("Last-Modified", "Tue, 10 Jun 2003 09:00:00 GMT"),
            )
            .mount(&mock_server)
            .await;

        let url = format!("{}/feed", mock_server.uri());
        let outcome = fetcher().fetch(&url, Validators::default()).await.unwrap();
        let FetchOutcome::Fetched(feed) = outcome else {
            panic!("Expected a fetched feed");
        };

        assert_eq!(feed.title, "Test Cast");
        // The item without media is dropped.
        assert_eq!(feed.total, 1);
        assert_eq!(feed.etag.as_deref(), Some("\"v1\""));
        assert_eq!(feed.last_modified.as_deref(), Some("Tue, 10 Jun 2003 09:00:00 GMT"));
        assert_eq!(feed.feed_url, url);
    }

    #[tokio::test]
    async fn test_conditional_headers_and_304() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("if-none-match", "\"v1\""))
            .and(|req: &Request| {
                header_str(req, "if-modified-since") == Some("Tue, 10 Jun 2003 09:00:00 GMT")
            })
            .respond_with(ResponseTemplate::new(304))
            .expect(1)
            .mount(&mock_server)
            .await;

        let url = format!("{}/feed", mock_server.uri());
        let validators = Validators {
            etag: Some("\"v1\""),
            last_modified: Some("Tue, 10 Jun 2003 09:00:00 GMT"),
        };
        let outcome = fetcher().fetch(&url, validators).await.unwrap();
        assert_eq!(outcome, FetchOutcome::NotModified);
    }

    #[tokio::test]
    async fn test_fetch_404_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let url = format!("{}/feed", mock_server.uri());
        match fetcher().fetch(&url, Validators::default()).await {
            Err(FetchError::HttpStatus(404)) => {}
            other => panic!("Expected HttpStatus(404), got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_503_retry_then_success() {
        use wiremock::matchers::any;

        let mock_server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .mount(&mock_server)
            .await;

        let url = format!("{}/feed", mock_server.uri());
        let fetcher = fetcher().with_max_retries(1);
        let outcome = fetcher.fetch(&url, Validators::default()).await.unwrap();
        assert!(matches!(outcome, FetchOutcome::Fetched(_)));
    }

    #[tokio::test]
    async fn test_malformed_feed_reports_issues() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<not valid xml"))
            .mount(&mock_server)
            .await;

        let url = format!("{}/feed", mock_server.uri());
        match fetcher().fetch(&url, Validators::default()).await {
            Err(FetchError::XmlParse { issues }) => {
                assert!(!issues.is_empty());
                assert!(!issues[0].message.is_empty());
            }
            other => panic!("Expected XmlParse, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_body_is_no_feed_data() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("  \n"))
            .mount(&mock_server)
            .await;

        let url = format!("{}/feed", mock_server.uri());
        assert!(matches!(
            fetcher().fetch(&url, Validators::default()).await,
            Err(FetchError::NoFeedData)
        ));
    }

    #[tokio::test]
    async fn test_feed_without_episodes() {
        let empty_rss = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Nothing yet</title></channel></rss>"#;

        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(empty_rss))
            .mount(&mock_server)
            .await;

        let url = format!("{}/feed", mock_server.uri());
        assert!(matches!(
            fetcher().fetch(&url, Validators::default()).await,
            Err(FetchError::NoItems)
        ));
    }

    #[tokio::test]
    async fn test_oversized_download_rejected() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 64]))
            .mount(&mock_server)
            .await;

        let url = format!("{}/image.png", mock_server.uri());
        assert!(matches!(
            fetcher().download(&url, 16).await,
            Err(FetchError::ResponseTooLarge)
        ));
        assert_eq!(fetcher().download(&url, 64).await.unwrap().len(), 64);
    }
}
