//! Share links: `{origin}?{param}={token}`

use anyhow::{Context, Result};
use reqwest::Url;
use sealbox_core::ShareToken;

/// Build the recipient-facing link for a token.
pub fn build_share_link(origin: &str, param: &str, token: &ShareToken) -> Result<String> {
    let mut url =
        Url::parse(origin.trim()).with_context(|| format!("invalid link origin: {origin}"))?;
    url.query_pairs_mut().append_pair(param, token.as_str());
    Ok(url.into())
}

/// Extract a token from either a full share link or a bare token.
///
/// Returns `None` for blank input, or for a URL that lacks the token parameter.
pub fn parse_share_input(input: &str, param: &str) -> Option<ShareToken> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    if input.contains("://") {
        let url = Url::parse(input).ok()?;
        return url
            .query_pairs()
            .find(|(k, _)| k == param)
            .map(|(_, v)| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(ShareToken::new);
    }

    if input.chars().any(char::is_whitespace) {
        return None;
    }
    Some(ShareToken::new(input))
}
