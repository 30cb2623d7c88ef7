//! Forum timestamps such as `» 12 Mar 2014, 18:05`.
//!
//! Bylines put the date in different text nodes depending on the template
//! revision, so extraction is an ordered list of places to look; the first
//! place whose text matches the date pattern wins.

use std::sync::LazyLock;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use scraper::ElementRef;

use super::{child_node_text, element_text, last_child_text};

static DATE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{1,2}) (\w{3}) (\d{4}), (\d{2}:\d{2})").expect("static regex")
});

/// Storage format. Lexical order matches chronological order.
pub const STORED_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Where to look for a date inside an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextSource {
    /// The n-th child node, text or element.
    ChildNode(usize),
    /// The last child node.
    LastChild,
    /// All text under the element.
    AllText,
}

impl TextSource {
    fn read(self, element: ElementRef<'_>) -> Option<String> {
        match self {
            Self::ChildNode(index) => child_node_text(element, index),
            Self::LastChild => last_child_text(element),
            Self::AllText => Some(element_text(element)),
        }
    }
}

/// Listing bylines: `by <user> » <date>`, with the user either a link or a span.
pub const BYLINE: &[TextSource] = &[
    TextSource::ChildNode(2),
    TextSource::ChildNode(4),
    TextSource::AllText,
];

/// Post author lines: the date trails the author name.
pub const AUTHOR_LINE: &[TextSource] = &[TextSource::LastChild, TextSource::AllText];

/// Try each source in order and return the first date found.
#[must_use]
pub fn extract_date(element: ElementRef<'_>, sources: &[TextSource]) -> Option<NaiveDateTime> {
    sources
        .iter()
        .filter_map(|source| source.read(element))
        .find_map(|text| parse_forum_date(&text))
}

/// Find and parse the first `<day> <Mon> <year>, <HH:MM>` in `text`.
#[must_use]
pub fn parse_forum_date(text: &str) -> Option<NaiveDateTime> {
    let caps = DATE_PATTERN.captures(text)?;
    let day: u32 = caps[1].parse().ok()?;
    let month = month_number(&caps[2])?;
    let year: i32 = caps[3].parse().ok()?;
    let time = NaiveTime::parse_from_str(&caps[4], "%H:%M").ok()?;
    NaiveDate::from_ymd_opt(year, month, day).map(|date| date.and_time(time))
}

/// Render a timestamp in the storage format.
#[must_use]
pub fn format_timestamp(timestamp: NaiveDateTime) -> String {
    timestamp.format(STORED_FORMAT).to_string()
}

fn month_number(abbrev: &str) -> Option<u32> {
    let month = match abbrev.to_ascii_lowercase().as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}
