//! Regex-based extractor for market history listing rows.
//!
//! The history endpoint returns an HTML fragment where each completed
//! transaction is a `market_recent_listing_row` element. We don't need a
//! full DOM: every field we read is either an attribute on the row's
//! opening tag or the text of a uniquely-classed child element.

use anyhow::{Context, Result};
use regex::{Captures, Matches, Regex};
use std::iter::Peekable;
use tracing::trace;

use super::PageExtractor;
use crate::types::RawRecord;

// ---------------------------------------------------------------------------
// Markup vocabulary
// ---------------------------------------------------------------------------

const ROW_CLASS: &str = "market_recent_listing_row";
const ACTED_ON_CLASS: &str = "market_listing_listed_date";
const NAME_CLASS: &str = "market_listing_item_name";
const PRICE_CLASS: &str = "market_listing_price";
const GAIN_OR_LOSS_CLASS: &str = "market_listing_gainorloss";

/// Opening tag of any element whose `class` list contains `class`.
/// Group 1 is the tag name.
fn opening_tag_pattern(class: &str) -> String {
    format!(r#"<([a-zA-Z][a-zA-Z0-9]*)\b[^>]*\sclass="(?:[^"]*\s)?{class}(?:\s[^"]*)?"[^>]*>"#)
}

// ---------------------------------------------------------------------------
// Extractor
// ---------------------------------------------------------------------------

/// Extracts `RawRecord`s from a market history HTML fragment.
pub struct ListingExtractor {
    row_start: Regex,
    listing_id: Regex,
    class_id: Regex,
    instance_id: Regex,
    acted_on: Regex,
    name: Regex,
    price: Regex,
    gain_or_loss: Regex,
    inner_tag: Regex,
    any_tag: Regex,
    numeric_entity: Regex,
}

impl ListingExtractor {
    pub fn new() -> Result<Self> {
        let field = |class: &str| -> Result<Regex> {
            Regex::new(&opening_tag_pattern(class))
                .with_context(|| format!("Failed to compile field pattern for {class}"))
        };

        Ok(Self {
            row_start: Regex::new(&opening_tag_pattern(ROW_CLASS))
                .context("Failed to compile row pattern")?,
            listing_id: Regex::new(r#"\sid="[^"]*?listing_(\d+)[^"]*""#)
                .context("Failed to compile listing id pattern")?,
            class_id: Regex::new(r#"\sdata-classid="([^"]*)""#)
                .context("Failed to compile classid pattern")?,
            instance_id: Regex::new(r#"\sdata-instanceid="([^"]*)""#)
                .context("Failed to compile instanceid pattern")?,
            acted_on: field(ACTED_ON_CLASS)?,
            name: field(NAME_CLASS)?,
            price: field(PRICE_CLASS)?,
            gain_or_loss: field(GAIN_OR_LOSS_CLASS)?,
            inner_tag: Regex::new(r"<[^>]*>").context("Failed to compile tag pattern")?,
            any_tag: Regex::new(r"<(/?)([a-zA-Z][a-zA-Z0-9]*)\b[^>]*>")
                .context("Failed to compile element pattern")?,
            numeric_entity: Regex::new(r"&#(x[0-9a-fA-F]+|\d+);")
                .context("Failed to compile entity pattern")?,
        })
    }

    /// Build a record from a row's opening tag and the markup that follows
    /// it up to the next row.
    fn parse_row(&self, opening_tag: &str, body: &str) -> RawRecord {
        let attr = |re: &Regex| -> String {
            re.captures(opening_tag)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default()
        };

        let record = RawRecord {
            listing_id: attr(&self.listing_id),
            class_id: attr(&self.class_id),
            instance_id: attr(&self.instance_id),
            acted_on: self.text_of(&self.acted_on, body).unwrap_or_default(),
            name: self.text_of(&self.name, body),
            price: self.text_of(&self.price, body),
            symbol: self.text_of(&self.gain_or_loss, body),
        };

        trace!(id = %record.record_id(), acted_on = %record.acted_on, "Extracted listing row");
        record
    }

    /// Trimmed text content of the first element whose opening tag `re`
    /// matches, nested children included.
    fn text_of(&self, re: &Regex, body: &str) -> Option<String> {
        let caps = re.captures(body)?;
        let (opening, tag) = (caps.get(0)?, caps.get(1)?);
        let inner = self.element_inner(body, tag.as_str(), opening.end());
        let stripped = self.inner_tag.replace_all(inner, "");
        Some(self.decode_entities(&stripped).trim().to_string())
    }

    /// Markup from `from` up to the tag that closes the element opened just
    /// before it. Same-named descendants are tracked so their closing tags
    /// are skipped. An unclosed element runs to the end of `body`.
    fn element_inner<'b>(&self, body: &'b str, tag: &str, from: usize) -> &'b str {
        let rest = &body[from..];
        let mut depth = 0usize;
        for caps in self.any_tag.captures_iter(rest) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(2)) else {
                continue;
            };
            if !name.as_str().eq_ignore_ascii_case(tag) {
                continue;
            }
            let closing = caps.get(1).is_some_and(|m| !m.as_str().is_empty());
            if closing {
                if depth == 0 {
                    return &rest[..whole.start()];
                }
                depth -= 1;
            } else if !whole.as_str().ends_with("/>") {
                depth += 1;
            }
        }
        rest
    }

    fn decode_entities(&self, text: &str) -> String {
        let named = text
            .replace("&nbsp;", "\u{a0}")
            .replace("&minus;", "\u{2212}")
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&quot;", "\"")
            .replace("&#39;", "'");

        let numeric = self.numeric_entity.replace_all(&named, |caps: &Captures| {
            let code = &caps[1];
            let value = match code.strip_prefix('x') {
                Some(hex) => u32::from_str_radix(hex, 16).ok(),
                None => code.parse::<u32>().ok(),
            };
            value
                .and_then(char::from_u32)
                .map(String::from)
                .unwrap_or_else(|| caps[0].to_string())
        });

        // Last, so "&amp;lt;" decodes to "&lt;" rather than "<".
        numeric.replace("&amp;", "&")
    }
}

impl PageExtractor for ListingExtractor {
    fn extract<'a>(&'a self, markup: &'a str) -> Box<dyn Iterator<Item = RawRecord> + 'a> {
        Box::new(Rows {
            extractor: self,
            markup,
            starts: self.row_start.find_iter(markup).peekable(),
        })
    }
}

/// Lazy walk over the row openings in a fragment.
struct Rows<'a> {
    extractor: &'a ListingExtractor,
    markup: &'a str,
    starts: Peekable<Matches<'a, 'a>>,
}

impl<'a> Iterator for Rows<'a> {
    type Item = RawRecord;

    fn next(&mut self) -> Option<RawRecord> {
        let row = self.starts.next()?;
        let end = self
            .starts
            .peek()
            .map(|next| next.start())
            .unwrap_or(self.markup.len());
        Some(
            self.extractor
                .parse_row(row.as_str(), &self.markup[row.end()..end]),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
