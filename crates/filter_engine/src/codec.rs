//! Prompt construction and positional decoding of numbered YES/NO replies.

use crate::api::{ContentPart, ImageUrl, MessageContent};
use crate::types::BatchItem;

/// Response line recorded for an item the model did not answer.
pub const NO_RESPONSE: &str = "No response";

/// Decision for the item at one ordinal position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineDecision {
    pub is_allowed: bool,
    pub line: String,
}

fn instructions(topics: &[String]) -> String {
    let preferences = topics
        .iter()
        .map(|topic| format!("- {topic}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "You filter a content feed for a user. Their preferences:\n{preferences}\n\n\
         For every numbered item below decide whether it should stay visible.\n\
         Answer with exactly one line per item in the form \"<number>. → YES\" to keep it \
         or \"<number>. → NO\" to hide it. Do not add any other text.\n"
    )
}

/// Builds the user message for one chunk. Items are numbered 1..=n by position.
///
/// With `include_images` the content becomes a part array: the instructions,
/// one text part per item and an image part after every item that has one.
pub fn batch_content(items: &[BatchItem], topics: &[String], include_images: bool) -> MessageContent {
    let header = instructions(topics);
    if !include_images {
        let listing = items
            .iter()
            .enumerate()
            .map(|(position, item)| format!("{}. {}", position + 1, item.title))
            .collect::<Vec<_>>()
            .join("\n");
        return MessageContent::Text(format!("{header}\n{listing}"));
    }

    let mut parts = Vec::with_capacity(items.len() * 2 + 1);
    parts.push(ContentPart::Text { text: header });
    for (position, item) in items.iter().enumerate() {
        parts.push(ContentPart::Text {
            text: format!("{}. {}", position + 1, item.title),
        });
        if let Some(url) = &item.image_url {
            parts.push(ContentPart::ImageUrl {
                image_url: ImageUrl { url: url.clone() },
            });
        }
    }
    MessageContent::Parts(parts)
}

/// Prompt asking for a one-line filter suggestion from sample titles.
pub fn recommendation_prompt(titles: &[String]) -> String {
    let listing = titles
        .iter()
        .map(|title| format!("- {title}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "These are titles currently shown on a page the user is browsing:\n{listing}\n\n\
         Suggest one short filter instruction the user could enter to hide the least \
         valuable of them, for example \"Block celebrity gossip\". \
         Reply with the instruction only."
    )
}

/// Trimmed, non-empty lines of a reply.
pub fn response_lines(reply: &str) -> Vec<&str> {
    reply
        .trim()
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect()
}

/// Line answering ordinal `k` (1-based).
///
/// A line starting with `"{k}."` wins. Otherwise a line starting with `"{k}"`
/// is accepted when the next character is not another digit, so ordinal 1
/// never picks up the answer for 10.
pub fn find_ordinal_line<'a>(lines: &[&'a str], k: usize) -> Option<&'a str> {
    let dotted = format!("{k}.");
    if let Some(line) = lines.iter().find(|line| line.starts_with(&dotted)) {
        return Some(*line);
    }
    let bare = k.to_string();
    lines
        .iter()
        .find(|line| {
            line.strip_prefix(&bare)
                .is_some_and(|rest| !rest.starts_with(|c: char| c.is_ascii_digit()))
        })
        .copied()
}

/// Decodes a reply for `count` items. Unanswered items are not allowed.
pub fn decode_decisions(reply: &str, count: usize) -> Vec<LineDecision> {
    let lines = response_lines(reply);
    (1..=count)
        .map(|k| match find_ordinal_line(&lines, k) {
            Some(line) => LineDecision {
                is_allowed: line.to_lowercase().contains("yes"),
                line: line.to_owned(),
            },
            None => LineDecision {
                is_allowed: false,
                line: NO_RESPONSE.to_owned(),
            },
        })
        .collect()
}
