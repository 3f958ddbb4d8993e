//! Feed document parsing.

use feed_rs::parser;
use tracing::warn;

use super::FetchedFeed;
use crate::feed::Item;
use crate::{FeedhookError, Result};

/// Parse an RSS or Atom document into items.
///
/// The item identity is the first link, or the entry id when the entry has
/// no link. The timestamp is the published date, falling back to the updated
/// date; entries with neither are skipped.
pub fn parse_feed(bytes: &[u8]) -> Result<FetchedFeed> {
    let feed = parser::parse(bytes)
        .map_err(|e| FeedhookError::Fetch(format!("failed to parse feed: {e}")))?;

    let mut fetched = FetchedFeed::default();
    for entry in feed.entries {
        let link = entry
            .links
            .first()
            .map(|l| l.href.clone())
            .unwrap_or_else(|| entry.id.clone());

        let Some(published) = entry.published.or(entry.updated) else {
            warn!("Skipping entry {} without a usable timestamp", link);
            fetched.skipped += 1;
            continue;
        };

        let title = entry
            .title
            .map(|t| strip_html(&t.content))
            .unwrap_or_else(|| "Untitled".to_string());
        let summary = entry
            .summary
            .map(|t| t.content)
            .or(entry.content.and_then(|c| c.body))
            .map(|s| strip_html(&s))
            .unwrap_or_default();

        fetched.items.push(Item {
            title,
            link,
            published,
            summary,
        });
    }

    Ok(fetched)
}

/// Strip HTML tags and decode common entities.
///
/// Whitespace runs collapse to a single space.
pub fn strip_html(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut in_tag = false;
    let mut entity: Option<String> = None;

    for ch in html.chars() {
        if let Some(name) = entity.as_mut() {
            match ch {
                ';' => {
                    decode_entity(name, &mut text);
                    entity = None;
                }
                c if c.is_ascii_alphanumeric() || c == '#' => name.push(c),
                // Not an entity after all
                c => {
                    text.push('&');
                    text.push_str(name);
                    entity = None;
                    if c == '<' {
                        in_tag = true;
                    } else {
                        text.push(c);
                    }
                }
            }
            continue;
        }

        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            '&' if !in_tag => entity = Some(String::new()),
            c if !in_tag => text.push(c),
            _ => {}
        }
    }
    if let Some(name) = entity {
        text.push('&');
        text.push_str(&name);
    }

    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn decode_entity(name: &str, out: &mut String) {
    let decoded = match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some(' '),
        _ => parse_numeric_entity(name).and_then(char::from_u32),
    };
    match decoded {
        Some(c) => out.push(c),
        None => {
            out.push('&');
            out.push_str(name);
            out.push(';');
        }
    }
}

/// Parse a numeric entity body such as `#65` or `#x41`.
fn parse_numeric_entity(entity: &str) -> Option<u32> {
    let digits = entity.strip_prefix('#')?;
    match digits.strip_prefix(['x', 'X']) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => digits.parse().ok(),
    }
}
