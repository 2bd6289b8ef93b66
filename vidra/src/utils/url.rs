//! URL helpers.

use url::Url;

use crate::{Error, Result};

/// Query parameters that turn a single-video URL into a playlist download.
const PLAYLIST_PARAMS: &[&str] = &["list", "index"];

/// Normalizes a submitted media URL.
///
/// Only absolute http(s) URLs are accepted. Playlist selectors (`list`,
/// `index`) are dropped so that exactly one video is fetched; the remaining
/// query parameters keep their order.
pub fn sanitize_url(raw: &str) -> Result<String> {
    let mut url = Url::parse(raw.trim())
        .map_err(|e| Error::validation(format!("Invalid URL '{}': {}", raw, e)))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::validation(format!(
            "Unsupported URL scheme '{}'",
            url.scheme()
        )));
    }

    let has_playlist_params = url
        .query_pairs()
        .any(|(key, _)| PLAYLIST_PARAMS.contains(&&*key));

    if has_playlist_params {
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| !PLAYLIST_PARAMS.contains(&&**key))
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();

        if kept.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(kept);
        }
    }

    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_playlist_params() {
        assert_eq!(
            sanitize_url("https://www.youtube.com/watch?v=abc&list=PL123&index=4").unwrap(),
            "https://www.youtube.com/watch?v=abc"
        );
    }

    #[test]
    fn drops_empty_query() {
        assert_eq!(
            sanitize_url("https://example.com/video?list=PL1").unwrap(),
            "https://example.com/video"
        );
    }

    #[test]
    fn leaves_plain_urls_untouched() {
        assert_eq!(
            sanitize_url("https://example.com/watch?v=abc&t=10").unwrap(),
            "https://example.com/watch?v=abc&t=10"
        );
    }

    #[test]
    fn rejects_garbage_and_other_schemes() {
        assert!(sanitize_url("not a url").is_err());
        assert!(sanitize_url("ftp://example.com/file").is_err());
    }
}
