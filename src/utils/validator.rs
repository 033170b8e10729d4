use url::Url;

use crate::core::error::DownloadError;

/// URL 必须能解析，并且同时带有 scheme 和 host
pub fn parse_url(url: &str) -> Result<Url, DownloadError> {
    let trimmed = url.trim();
    let parsed = Url::parse(trimmed).map_err(|_| DownloadError::InvalidUrl(trimmed.to_string()))?;
    match parsed.host_str() {
        Some(host) if !host.is_empty() => Ok(parsed),
        _ => Err(DownloadError::InvalidUrl(trimmed.to_string())),
    }
}

/// 只有 http/https 可以走直链拉取
pub fn is_http_url(url: &str) -> bool {
    parse_url(url)
        .map(|u| matches!(u.scheme(), "http" | "https"))
        .unwrap_or(false)
}
