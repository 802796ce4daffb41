//! Response tag parsing — reply/react directives embedded in model output.
//!
//! Grammar: `[[reply_to_current]] | [[reply_to:<int>]] | [[react:<text>]]`.
//! Tags are whitespace-tolerant inside the brackets, stripped from the text
//! before delivery, and processed by the channel.

/// Extract a reply target. `[[reply_to_current]]` resolves to the id of the
/// triggering message; `[[reply_to:<id>]]` to that id.
///
/// Returns the cleaned text and the reply target, if any.
pub fn parse_reply_tag(text: &str, incoming_message_id: Option<i64>) -> (String, Option<i64>) {
    let mut reply_to = None;
    let cleaned = strip_tags_matching(text, |inner| {
        let inner = inner.trim();
        if inner == "reply_to_current" {
            reply_to = reply_to.or(incoming_message_id);
            return true;
        }
        if let Some(rest) = inner.strip_prefix("reply_to:") {
            if let Ok(id) = rest.trim().parse::<i64>() {
                reply_to = reply_to.or(Some(id));
                return true;
            }
        }
        false
    });
    (cleaned.trim().to_string(), reply_to)
}

/// Extract all `[[react:<emoji>]]` tags, in order of appearance.
pub fn parse_react_tags(text: &str) -> (String, Vec<String>) {
    let mut reactions = Vec::new();
    let cleaned = strip_tags_matching(text, |inner| {
        let inner = inner.trim();
        if let Some(rest) = inner.strip_prefix("react:") {
            let emoji = rest.trim();
            if !emoji.is_empty() {
                reactions.push(emoji.to_string());
                return true;
            }
        }
        false
    });
    (cleaned.trim().to_string(), reactions)
}

/// Walk the text, removing each `[[…]]` span for which `matcher` returns
/// true. Non-matching spans (and stray brackets) are left untouched.
fn strip_tags_matching(text: &str, mut matcher: impl FnMut(&str) -> bool) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("[[") {
        let after = &rest[start + 2..];
        match after.find("]]") {
            Some(end) if matcher(&after[..end]) => {
                out.push_str(&rest[..start]);
                rest = &after[end + 2..];
            }
            _ => {
                out.push_str(&rest[..start + 2]);
                rest = after;
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
    fn reply_to_current_resolves_incoming_id() {
        let (text, reply) = parse_reply_tag("[[reply_to_current]] Sure thing!", Some(981));
        assert_eq!(text, "Sure thing!");
        assert_eq!(reply, Some(981));
    }

    #[test]
    fn reply_to_explicit_id() {
        let (text, reply) = parse_reply_tag("On it. [[reply_to: 1234 ]]", Some(981));
        assert_eq!(text, "On it.");
        assert_eq!(reply, Some(1234));
    }

    #[test]
    fn no_tag_means_no_reply() {
        let (text, reply) = parse_reply_tag("Plain answer.", Some(981));
        assert_eq!(text, "Plain answer.");
        assert_eq!(reply, None);
    }

    #[test]
    fn multiple_reactions_collect_in_order() {
        let (text, reactions) = parse_react_tags("[[react:👍]] Nice! [[react: 🎉 ]]");
        assert_eq!(text, "Nice!");
        assert_eq!(reactions, vec!["👍", "🎉"]);
    }

    #[test]
    fn malformed_tags_survive_untouched() {
        let (text, reply) = parse_reply_tag("Array syntax [[0]] stays", None);
        assert_eq!(text, "Array syntax [[0]] stays");
        assert_eq!(reply, None);

        let (text, reactions) = parse_react_tags("[[react:]] empty keeps");
        assert_eq!(text, "[[react:]] empty keeps");
        assert!(reactions.is_empty());
    }

    #[test]
    fn reply_and_react_combine() {
        let raw = "[[reply_to_current]][[react:❤️]] Love it.";
        let (no_reply, reply) = parse_reply_tag(raw, Some(5));
        let (cleaned, reactions) = parse_react_tags(&no_reply);
        assert_eq!(reply, Some(5));
        assert_eq!(reactions, vec!["❤️"]);
        assert_eq!(cleaned, "Love it.");
    }
}
