//! Outbound post-processing applied by every channel before delivery.
//!
//! Order matters: path stripping and narration stripping first, then the
//! `MEDIA:` directive is peeled off, then blank runs collapse. Splitting
//! and platform formatting happen afterwards in the channel.

/// Absolute path prefixes that must never leak to a chat.
const SERVER_PATH_PREFIXES: &[&str] = &[
    "/home/", "/root/", "/usr/", "/var/", "/opt/", "/etc/", "/tmp/", "/srv/",
];

/// Leading phrases that indicate leaked inner narration rather than a reply.
const NARRATION_OPENERS: &[&str] = &[
    "i will now ",
    "i'll now ",
    "let me now ",
    "i am going to ",
    "i'm going to ",
    "first, i will ",
    "now i will ",
    "i need to first ",
];

/// Apply the channel-agnostic outbound pipeline.
///
/// Returns the cleaned text and an optional media path extracted from a
/// `MEDIA: <path>` line (the remaining text becomes the caption).
pub fn process_outbound(text: &str) -> (String, Option<String>) {
    let text = strip_server_paths(text);
    let text = strip_leading_narration(&text);
    let (text, media) = extract_media_directive(&text);
    let text = collapse_blank_runs(&text);
    (text.trim().to_string(), media)
}

/// Replace absolute server paths with their basename. `MEDIA:` lines are
/// exempt — the directive needs the full path, and it never reaches the
/// user as text.
fn strip_server_paths(text: &str) -> String {
    text.lines()
        .map(|line| {
            if line.trim_start().starts_with("MEDIA:") {
                return line.to_string();
            }
            line.split(' ')
                .map(strip_path_token)
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn strip_path_token(token: &str) -> String {
    // Preserve any trailing punctuation so sentences stay intact.
    let trimmed = token.trim_end_matches(['.', ',', ';', ':', ')', '"', '\'']);
    let suffix = &token[trimmed.len()..];

    let is_server_path = SERVER_PATH_PREFIXES
        .iter()
        .any(|p| trimmed.starts_with(p))
        && trimmed.matches('/').count() >= 2;

    if is_server_path {
        let basename = trimmed.rsplit('/').next().unwrap_or(trimmed);
        format!("{basename}{suffix}")
    } else {
        token.to_string()
    }
}

/// Drop leading lines that read as chain-of-thought narration. Only the
/// head of the message is inspected — narration quoted mid-reply stays.
fn strip_leading_narration(text: &str) -> String {
    let mut lines: Vec<&str> = text.lines().collect();
    while let Some(first) = lines.first() {
        let lower = first.trim().to_lowercase();
        if !lower.is_empty() && NARRATION_OPENERS.iter().any(|p| lower.starts_with(p)) {
            lines.remove(0);
        } else {
            break;
        }
    }
    lines.join("\n")
}

/// Peel off the first `MEDIA: <path>` directive line.
fn extract_media_directive(text: &str) -> (String, Option<String>) {
    let mut media = None;
    let mut kept = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if media.is_none() {
            if let Some(path) = trimmed.strip_prefix("MEDIA:") {
                let path = path.trim();
                if !path.is_empty() {
                    media = Some(path.to_string());
                    continue;
                }
            }
        }
        kept.push(line);
    }
    (kept.join("\n"), media)
}

/// Collapse three or more consecutive newlines to a single blank line.
fn collapse_blank_runs(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut newline_run = 0usize;
    for ch in text.chars() {
        if ch == '\n' {
            newline_run += 1;
            if newline_run <= 2 {
                out.push(ch);
            }
        } else {
            newline_run = 0;
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_paths_reduce_to_basename() {
        let (text, _) = process_outbound("Saved the report to /home/aster/workspace/report.pdf.");
        assert_eq!(text, "Saved the report to report.pdf.");
    }

    #[test]
    fn relative_paths_and_urls_survive() {
        let (text, _) = process_outbound("See notes/todo.md and https://example.com/a/b/c");
        assert_eq!(text, "See notes/todo.md and https://example.com/a/b/c");
    }

    #[test]
    fn media_directive_is_peeled_off() {
        let (text, media) = process_outbound("Here is the chart!\nMEDIA: /tmp/chart.png\nEnjoy.");
        assert_eq!(media.as_deref(), Some("/tmp/chart.png"));
        assert_eq!(text, "Here is the chart!\nEnjoy.");
    }

    #[test]
    fn leading_narration_is_dropped() {
        let (text, _) =
            process_outbound("I will now check the weather.\nIt's 21°C and sunny in Porto.");
        assert_eq!(text, "It's 21°C and sunny in Porto.");
    }

    #[test]
    fn narration_mid_message_is_kept() {
        let input = "Done. You said earlier:\nI will now check the weather.";
        let (text, _) = process_outbound(input);
        assert_eq!(text, input);
    }

    #[test]
    fn blank_runs_collapse() {
        let (text, _) = process_outbound("a\n\n\n\n\nb");
        assert_eq!(text, "a\n\nb");
    }
}
