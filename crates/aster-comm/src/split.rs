//! Length splitting that never breaks a code fence.
//!
//! When a fenced block straddles a chunk boundary the fence is closed at
//! the end of the chunk and reopened (with its language tag) at the start
//! of the next, so every chunk renders as valid markdown on its own.

const FENCE: &str = "```";

/// Split `text` into chunks of at most `max_length` characters.
pub fn split_message(text: &str, max_length: usize) -> Vec<String> {
    if text.len() <= max_length {
        return vec![text.to_string()];
    }
    // Fence accounting needs at least room for "```\n" twice plus a line.
    let max_length = max_length.max(16);

    let mut chunks = Vec::new();
    let mut current = String::new();
    // Some(language-tag) while inside a fenced block.
    let mut open_fence: Option<String> = None;

    for line in text.split_inclusive('\n') {
        let is_fence_line = line.trim_start().starts_with(FENCE);

        if current.len() + line.len() > max_length && !current.is_empty() {
            // Close a straddling fence, flush, reopen in the next chunk.
            if let Some(lang) = &open_fence {
                current.push_str(FENCE);
                current.push('\n');
                chunks.push(std::mem::take(&mut current));
                current.push_str(FENCE);
                current.push_str(lang);
                current.push('\n');
            } else {
                chunks.push(std::mem::take(&mut current));
            }
        }

        // A single line longer than the limit is hard-split.
        if line.len() > max_length {
            let mut rest = line;
            while rest.len() > max_length {
                let mut cut = max_length;
                while !rest.is_char_boundary(cut) {
                    cut -= 1;
                }
                if !current.is_empty() {
                    chunks.push(std::mem::take(&mut current));
                }
                chunks.push(rest[..cut].to_string());
                rest = &rest[cut..];
            }
            current.push_str(rest);
        } else {
            current.push_str(line);
        }

        if is_fence_line {
            open_fence = match open_fence {
                Some(_) => None,
                None => {
                    let lang = line.trim().trim_start_matches('`').trim().to_string();
                    Some(lang)
                }
            };
        }
    }

    if !current.trim().is_empty() {
        chunks.push(current);
    }

    chunks
        .into_iter()
        .map(|c| c.trim_end_matches('\n').to_string())
        .filter(|c| !c.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(split_message("hello", 100), vec!["hello"]);
    }

    #[test]
    fn plain_text_splits_on_line_boundaries() {
        let text = "aaaa\nbbbb\ncccc\ndddd";
        let chunks = split_message(text, 10);
        assert!(chunks.len() >= 2);
        for c in &chunks {
            assert!(c.len() <= 10);
        }
        assert_eq!(chunks.join("\n"), text);
    }

    #[test]
    fn fences_are_closed_and_reopened_across_chunks() {
        let mut text = String::from("```rust\n");
        for i in 0..30 {
            text.push_str(&format!("let x{i} = {i};\n"));
        }
        text.push_str("```");

        let chunks = split_message(&text, 120);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            // Every chunk is fence-balanced on its own.
            let fence_count = chunk
                .lines()
                .filter(|l| l.trim_start().starts_with("```"))
                .count();
            assert_eq!(fence_count % 2, 0, "unbalanced chunk:\n{chunk}");
        }
        // Reopened fences keep the language tag.
        assert!(chunks[1].starts_with("```rust"));
    }

    #[test]
    fn oversized_single_line_is_hard_split() {
        let text = "x".repeat(250);
        let chunks = split_message(&text, 100);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn split_is_stable_on_its_own_chunks() {
        let text = "para one\n\npara two\n\npara three with more words";
        for chunk in split_message(text, 20) {
            // Re-splitting an emitted chunk is the identity.
            assert_eq!(split_message(&chunk, 20), vec![chunk.clone()]);
        }
    }
}
