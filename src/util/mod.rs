//! Utility functions shared by the feed pipeline and the job queue.
//!
//! - **Hashing**: content hashes used for episode keys, object ids and task ids
//! - **URL helpers**: SSRF-aware validation and extension sniffing for media URLs
//! - **Text processing**: reducing feed markup to plain text or safe HTML
//!
//! # Examples
//!
//! ```
//! use podkeeper::util::{content_hash, url_extension, plain_text};
//!
//! assert_eq!(content_hash("a").len(), 64);
//! assert_eq!(url_extension("https://cdn.example.com/ep1.MP3?x=1").as_deref(), Some("mp3"));
//! assert_eq!(plain_text("<b>Hello</b>  world"), "Hello world");
//! ```

mod hash;
mod text;
mod url_validator;

pub use hash::{content_hash, short_hash};
pub use text::{first_non_empty, plain_text, safe_html};
pub use url_validator::{is_http_url, url_extension, validate_url, UrlValidationError};
