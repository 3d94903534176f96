//! Generated-asset URL normalization.
//!
//! Asset links in generated-image (and generation-job) output carry short-lived
//! signature parameters in the query string; the relay strips them so the emitted text
//! is stable.

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

static ASSET_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"https?://[^\s)\]"'<>]+"#).expect("asset URL pattern is valid")
});

/// Strip the query string and fragment of one absolute URL. Non-URLs are returned unchanged.
pub fn normalize_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) if url.query().is_some() || url.fragment().is_some() => {
            url.set_query(None);
            url.set_fragment(None);
            url.to_string()
        }
        _ => raw.to_string(),
    }
}

/// Rewrite every absolute URL embedded in `text`.
pub fn normalize_asset_urls(text: &str) -> String {
    ASSET_URL
        .replace_all(text, |caps: &regex::Captures<'_>| normalize_url(&caps[0]))
        .into_owned()
}

/// Every absolute URL embedded in `text`.
pub fn asset_urls(text: &str) -> Vec<&str> {
    ASSET_URL.find_iter(text).map(|m| m.as_str()).collect()
}

/// Byte offset of a URL that runs to the very end of `text`, i.e. one that may still
/// be growing in the next cumulative record.
pub fn trailing_url_start(text: &str) -> Option<usize> {
    ASSET_URL
        .find_iter(text)
        .last()
        .filter(|m| m.end() == text.len())
        .map(|m| m.start())
}
