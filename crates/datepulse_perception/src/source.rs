use anyhow::Result;
use async_trait::async_trait;
use datepulse_core::ContentItem;
use url::Url;

/// A producer of raw content records. Items come back with language
/// `unknown` and no embedding; the pipeline fills both in later.
#[async_trait]
pub trait Source: Send + Sync {
    /// Unique identifier for the source (e.g. "rss:r/dating"). Stored on the
    /// ingestion run record.
    fn name(&self) -> &str;

    async fn fetch(&self) -> Result<Vec<ContentItem>>;
}

/// Only plain HTTP(S) feeds are fetched.
pub fn validate_url(url: &str) -> Result<Url> {
    let parsed = Url::parse(url)?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        anyhow::bail!("Only HTTP/HTTPS schemes are allowed, got {}", parsed.scheme());
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        anyhow::bail!("Feed URL has no host: {}", url);
    }
    Ok(parsed)
}

/// Drop markup from feed descriptions and collapse the whitespace left behind.
pub fn strip_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_tag = false;
    for c in input.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    let decoded = out
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ");
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_url() {
        assert!(validate_url("https://www.reddit.com/r/dating/.rss").is_ok());
        assert!(validate_url("http://localhost:8080/feed").is_ok());
        assert!(validate_url("file:///etc/passwd").is_err());
        assert!(validate_url("not a url").is_err());
    }

    #[test]
    fn test_strip_html() {
        let html = "<p>Ghosted   after <b>three</b> dates &amp; no reply</p>";
        assert_eq!(strip_html(html), "Ghosted after three dates & no reply");
        assert_eq!(strip_html("plain text"), "plain text");
    }
}
