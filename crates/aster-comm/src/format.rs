//! Markdown → platform HTML conversion (Telegram-style safe subset).
//!
//! Supported: **bold**, __bold__, *italic*, _italic_, `code`, ```blocks```,
//! [text](url), ~~strikethrough~~, # headers (rendered bold), and markdown
//! tables (wrapped in <pre> for monospace alignment). Everything else is
//! escaped. Channels fall back to plain text when the converted output is
//! rejected by the platform.

/// Convert markdown text to the safe HTML subset.
pub fn markdown_to_html(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let lines: Vec<&str> = text.split('\n').collect();
    let mut out: Vec<String> = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        let stripped = line.trim();

        // Fenced code block.
        if stripped.starts_with("```") {
            let mut code = Vec::new();
            i += 1;
            while i < lines.len() && !lines[i].trim().starts_with("```") {
                code.push(lines[i]);
                i += 1;
            }
            if i < lines.len() {
                i += 1; // closing fence
            }
            out.push(format!("<pre>{}</pre>", escape(&code.join("\n"))));
            continue;
        }

        // Table block: consecutive rows with at least two pipes.
        if looks_like_table_row(stripped) {
            let mut rows = Vec::new();
            while i < lines.len() {
                let s = lines[i].trim();
                if s.is_empty() || !looks_like_table_row(s) {
                    break;
                }
                if !is_table_separator(s) {
                    rows.push(lines[i]);
                }
                i += 1;
            }
            if !rows.is_empty() {
                out.push(format!("<pre>{}</pre>", escape(&rows.join("\n"))));
            }
            continue;
        }

        out.push(format_inline(line));
        i += 1;
    }

    out.join("\n")
}

/// Strip every HTML tag and decode the entities this module emits — the
/// inverse used by the plain-text fallback.
pub fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn looks_like_table_row(s: &str) -> bool {
    (s.starts_with('|') && s[1..].contains('|')) || s.matches('|').count() >= 2
}

fn is_table_separator(s: &str) -> bool {
    !s.is_empty()
        && s.chars().all(|c| matches!(c, '|' | '-' | ':' | ' '))
        && s.contains('-')
}

/// Inline formatting for one line. Code spans are carved out first so their
/// contents are never styled.
fn format_inline(line: &str) -> String {
    let mut parts = Vec::new();
    let mut rest = line;
    while let Some(start) = rest.find('`') {
        let after = &rest[start + 1..];
        match after.find('`') {
            Some(end) if end > 0 => {
                parts.push(format_text_segment(&rest[..start]));
                parts.push(format!("<code>{}</code>", escape(&after[..end])));
                rest = &after[end + 1..];
            }
            _ => break,
        }
    }
    parts.push(format_text_segment(rest));
    parts.concat()
}

fn format_text_segment(text: &str) -> String {
    let mut s = escape(text);

    // Headers render as bold — chat platforms have no heading element.
    if let Some(stripped) = strip_header_marks(s.trim_start()) {
        return format!("<b>{}</b>", stripped);
    }

    s = replace_links(&s);
    s = replace_delimited(&s, "**", "b");
    s = replace_delimited(&s, "__", "b");
    s = replace_delimited(&s, "~~", "s");
    s = replace_single_delimited(&s, '*', "i");
    s = replace_single_delimited(&s, '_', "i");
    s
}

fn strip_header_marks(line: &str) -> Option<&str> {
    let hashes = line.chars().take_while(|&c| c == '#').count();
    if (1..=6).contains(&hashes) && line[hashes..].starts_with(' ') {
        Some(line[hashes..].trim_start())
    } else {
        None
    }
}

/// `[text](url)` → `<a href="url">text</a>`.
fn replace_links(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find('[') {
        let Some(close) = rest[open..].find("](") else {
            break;
        };
        let close = open + close;
        let Some(end) = rest[close + 2..].find(')') else {
            break;
        };
        let label = &rest[open + 1..close];
        let url = &rest[close + 2..close + 2 + end];
        if label.is_empty() || url.is_empty() || url.contains(' ') {
            out.push_str(&rest[..close + 2]);
            rest = &rest[close + 2..];
            continue;
        }
        out.push_str(&rest[..open]);
        out.push_str(&format!("<a href=\"{url}\">{label}</a>"));
        rest = &rest[close + 2 + end + 1..];
    }
    out.push_str(rest);
    out
}

/// Replace paired two-character delimiters, e.g. `**bold**`.
fn replace_delimited(text: &str, delim: &str, tag: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find(delim) {
        let after = &rest[start + delim.len()..];
        match after.find(delim) {
            Some(end) if end > 0 => {
                out.push_str(&rest[..start]);
                out.push_str(&format!("<{tag}>{}</{tag}>", &after[..end]));
                rest = &after[end + delim.len()..];
            }
            _ => {
                out.push_str(&rest[..start + delim.len()]);
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Replace single-character emphasis (`*x*`, `_x_`) without touching
/// mid-word underscores like `file_name`.
fn replace_single_delimited(text: &str, delim: char, tag: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == delim && boundary_before(&chars, i) {
            // Find the closing delimiter on the same line segment.
            if let Some(j) = find_closing(&chars, i + 1, delim) {
                if j > i + 1 {
                    let inner: String = chars[i + 1..j].iter().collect();
                    out.push_str(&format!("<{tag}>{inner}</{tag}>"));
                    i = j + 1;
                    continue;
                }
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

fn boundary_before(chars: &[char], i: usize) -> bool {
    i == 0 || !chars[i - 1].is_alphanumeric()
}

fn find_closing(chars: &[char], from: usize, delim: char) -> Option<usize> {
    let mut j = from;
    while j < chars.len() {
        if chars[j] == delim {
            let after_ok = j + 1 >= chars.len() || !chars[j + 1].is_alphanumeric();
            if after_ok {
                return Some(j);
            }
        }
        j += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bold_italic_code() {
        assert_eq!(markdown_to_html("**hi** there"), "<b>hi</b> there");
        assert_eq!(markdown_to_html("*hi* there"), "<i>hi</i> there");
        assert_eq!(markdown_to_html("run `ls -la` now"), "run <code>ls -la</code> now");
    }

    #[test]
    fn mid_word_underscores_survive() {
        assert_eq!(markdown_to_html("see file_name here"), "see file_name here");
        assert_eq!(markdown_to_html("_whole_ word"), "<i>whole</i> word");
    }

    #[test]
    fn code_blocks_become_pre() {
        let html = markdown_to_html("```rust\nlet x = 1;\n```");
        assert_eq!(html, "<pre>let x = 1;</pre>");
    }

    #[test]
    fn code_span_contents_are_not_styled() {
        assert_eq!(
            markdown_to_html("`**not bold**`"),
            "<code>**not bold**</code>"
        );
    }

    #[test]
    fn links_render_as_anchors() {
        assert_eq!(
            markdown_to_html("see [docs](https://example.com)"),
            "see <a href=\"https://example.com\">docs</a>"
        );
    }

    #[test]
    fn headers_become_bold() {
        assert_eq!(markdown_to_html("## Section"), "<b>Section</b>");
    }

    #[test]
    fn tables_wrap_in_pre_without_separator_rows() {
        let html = markdown_to_html("| a | b |\n|---|---|\n| 1 | 2 |");
        assert_eq!(html, "<pre>| a | b |\n| 1 | 2 |</pre>");
    }

    #[test]
    fn html_specials_are_escaped() {
        assert_eq!(markdown_to_html("1 < 2 & 3 > 2"), "1 &lt; 2 &amp; 3 &gt; 2");
    }

    #[test]
    fn round_trip_preserves_visible_text() {
        let cases = [
            "**bold** and *italic* and `code`",
            "# Title\nplain paragraph",
            "| x | y |\n| 1 | 2 |",
            "1 < 2 & 3 > 2",
        ];
        for case in cases {
            let visible = strip_tags(&markdown_to_html(case));
            // Visible text survives modulo the markdown marks themselves.
            for word in ["bold", "italic", "code", "Title", "plain", "1", "2"] {
                if case.contains(word) {
                    assert!(visible.contains(word), "{case} lost {word}");
                }
            }
        }
    }
}
