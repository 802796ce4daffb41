//! web_fetch — fetch a URL and extract readable text. SSRF-gated: the URL
//! filter runs before any network I/O, including one DNS resolution.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::warn;

use aster_core::types::AccessLevel;
use aster_guard::is_url_safe;

use super::{arg_i64, arg_str, ToolCtx, ToolEntry, ToolError, ToolHandler};

const DEFAULT_MAX_CHARS: i64 = 4000;

pub fn entry() -> ToolEntry {
    ToolEntry {
        name: "web_fetch".to_string(),
        description: "Fetch a URL and extract readable text content. Use for reading \
                      web pages, articles, documentation."
            .to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "url": { "type": "string", "description": "URL to fetch (http or https)" },
                "max_chars": {
                    "type": "integer",
                    "description": "Maximum characters to return (default 4000)"
                }
            },
            "required": ["url"]
        }),
        required_access_level: AccessLevel::Public,
        handler: Arc::new(WebFetch),
    }
}

struct WebFetch;

#[async_trait]
impl ToolHandler for WebFetch {
    async fn call(&self, args: Map<String, Value>, ctx: &ToolCtx) -> Result<String, ToolError> {
        let url = arg_str(&args, "url")?;
        let max_chars = arg_i64(&args, "max_chars")
            .unwrap_or(DEFAULT_MAX_CHARS)
            .clamp(500, 50_000) as usize;

        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Ok("Error: URL must start with http:// or https://".to_string());
        }

        // The SSRF gate decides before any request goes out.
        if let Err(reason) = is_url_safe(url).await {
            warn!(url, reason, "web_fetch blocked URL");
            return Ok(format!("Error: URL blocked ({reason})"));
        }

        let resp = match ctx
            .agent
            .http
            .get(url)
            .header("user-agent", "Mozilla/5.0 (compatible; AsterBot/0.3)")
            .header(
                "accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) if e.is_timeout() => return Ok("Error: request timed out".to_string()),
            Err(e) if e.is_connect() => {
                return Ok(format!("Error: could not connect to {url}"))
            }
            Err(e) => return Ok(format!("Error: {e}")),
        };

        if resp.status().as_u16() >= 400 {
            return Ok(format!("Error: HTTP {}", resp.status()));
        }

        let content_type = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = match resp.text().await {
            Ok(body) => body,
            Err(e) => return Ok(format!("Error: {e}")),
        };

        let text = if content_type.contains("text/html") || content_type.contains("application/xhtml")
        {
            strip_html(&body)
        } else if content_type.contains("text/") || content_type.contains("application/json") {
            body
        } else {
            return Ok(format!("Error: unsupported content type: {content_type}"));
        };

        let mut text = text;
        if text.len() > max_chars {
            let mut cut = max_chars;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text.truncate(cut);
            text.push_str("\n\n[... truncated ...]");
        }

        Ok(format!("Content from {url}:\n\n{text}"))
    }
}

/// Strip HTML down to readable text: drop script/style/comments, turn block
/// elements into newlines, remove remaining tags, decode common entities.
pub fn strip_html(html: &str) -> String {
    let html = remove_element(html, "script");
    let html = remove_element(&html, "style");
    let html = remove_comments(&html);

    let mut text = String::with_capacity(html.len());
    let mut rest = html.as_str();
    while let Some(open) = rest.find('<') {
        text.push_str(&rest[..open]);
        let after = &rest[open..];
        match after.find('>') {
            Some(close) => {
                let tag = after[1..close].trim_start_matches('/');
                let name: String = tag
                    .chars()
                    .take_while(|c| c.is_ascii_alphanumeric())
                    .collect::<String>()
                    .to_lowercase();
                if matches!(
                    name.as_str(),
                    "p" | "div" | "br" | "li" | "tr" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6"
                ) {
                    text.push('\n');
                }
                rest = &after[close + 1..];
            }
            None => {
                rest = "";
            }
        }
    }
    text.push_str(rest);

    let text = text
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'");

    // Collapse whitespace: runs of spaces to one, 3+ newlines to two.
    let mut out = String::with_capacity(text.len());
    let mut spaces = 0usize;
    let mut newlines = 0usize;
    for ch in text.chars() {
        match ch {
            '\n' => {
                newlines += 1;
                spaces = 0;
                if newlines <= 2 {
                    out.push('\n');
                }
            }
            ' ' | '\t' => {
                spaces += 1;
                if spaces <= 1 && newlines == 0 {
                    out.push(' ');
                }
            }
            other => {
                spaces = 0;
                newlines = 0;
                out.push(other);
            }
        }
    }
    out.trim().to_string()
}

fn remove_element(html: &str, name: &str) -> String {
    let open = format!("<{name}");
    let close = format!("</{name}>");
    let lower = html.to_lowercase();
    let mut out = String::with_capacity(html.len());
    let mut pos = 0;
    while let Some(start) = lower[pos..].find(&open) {
        let start = pos + start;
        out.push_str(&html[pos..start]);
        match lower[start..].find(&close) {
            Some(end) => pos = start + end + close.len(),
            None => {
                pos = html.len();
                break;
            }
        }
    }
    out.push_str(&html[pos..]);
    out
}

fn remove_comments(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut rest = html;
    while let Some(start) = rest.find("<!--") {
        out.push_str(&rest[..start]);
        match rest[start..].find("-->") {
            Some(end) => rest = &rest[start + end + 3..],
            None => {
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_scripts_styles_and_tags() {
        let html = "<html><head><style>p{color:red}</style>\
                    <script>alert('x')</script></head>\
                    <body><p>Hello <b>world</b></p><div>line two</div></body></html>";
        let text = strip_html(html);
        assert!(text.contains("Hello world"));
        assert!(text.contains("line two"));
        assert!(!text.contains("alert"));
        assert!(!text.contains("color:red"));
    }

    #[test]
    fn decodes_entities() {
        assert_eq!(strip_html("a &amp; b &lt;c&gt;"), "a & b <c>");
    }

    #[test]
    fn comments_are_removed() {
        assert_eq!(strip_html("x<!-- hidden -->y"), "xy");
    }
}
