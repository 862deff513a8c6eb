//! Base URL handling shared by the HTTP impls.

use std::time::Duration;

use reqwest::Client;
use thiserror::Error;
use url::Url;

/// A configured endpoint or HTTP client could not be set up.
#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("invalid endpoint {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("failed to create HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Parse an `http(s)` base URL that path segments can be appended to.
pub fn parse_base_url(address: &str) -> Result<Url, EndpointError> {
    let invalid = |reason: &str| EndpointError::InvalidAddress {
        address: address.to_string(),
        reason: reason.to_string(),
    };
    let url = Url::parse(address.trim()).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https"));
    }
    if url.cannot_be_a_base() {
        return Err(invalid("not a base URL"));
    }
    Ok(url)
}

/// Append `segments` to `base`, percent-encoding each one.
pub(crate) fn join_segments(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    // parse_base_url rejects cannot-be-a-base URLs
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

pub(crate) fn http_client(timeout: Duration) -> Result<Client, EndpointError> {
    Ok(Client::builder()
        .timeout(timeout)
        .user_agent(format!("snaprelay/{}", env!("CARGO_PKG_VERSION")))
        .build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("http://localhost:8080", &["fdb", "local", "acct1", "snapshot"], "http://localhost:8080/fdb/local/acct1/snapshot")]
    #[case("https://gw.example.io/api/", &["buckets", "b"], "https://gw.example.io/api/buckets/b")]
    #[case("https://gw.example.io", &["buckets", "b", "objects", "dir/1585578518736.avro"], "https://gw.example.io/buckets/b/objects/dir%2F1585578518736.avro")]
    fn segments_are_appended_and_encoded(
        #[case] base: &str,
        #[case] segments: &[&str],
        #[case] expected: &str,
    ) {
        let base = parse_base_url(base).unwrap();
        assert_eq!(join_segments(&base, segments).as_str(), expected);
    }

    #[rstest]
    #[case("localhost:8080")]
    #[case("ftp://example.io")]
    #[case("not a url")]
    fn rejects_unusable_addresses(#[case] address: &str) {
        assert!(matches!(
            parse_base_url(address),
            Err(EndpointError::InvalidAddress { .. })
        ));
    }
}
