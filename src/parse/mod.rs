//! Extraction of forum entities from exported phpBB pages.
//!
//! Every parser here is synchronous and takes the page source as `&str`; the
//! parsed DOM never outlives the call, so callers can hold results across
//! `.await` points freely.

/// Build a `&'static Selector` from a literal, compiled once.
macro_rules! selector {
    ($css:literal) => {{
        static SELECTOR: std::sync::LazyLock<scraper::Selector> =
            std::sync::LazyLock::new(|| scraper::Selector::parse($css).expect("static selector"));
        &*SELECTOR
    }};
}

pub mod classify;
pub mod dates;
pub mod forum_page;
pub mod index;
pub mod topic_page;

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Node};
use thiserror::Error;

pub use classify::{PageClassifier, PageRule, SelectorRule, SkipReason};

/// Listing links: the whole href must be a topic link, optionally carrying a session id.
static TOPIC_LINK_STRICT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[\w.\-:/]+\?f=(\d+)&t=(\d+)(?:&sid=[0-9A-Fa-f]+)?$").expect("static regex")
});

static TOPIC_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"f=(\d+)&t=(\d+)").expect("static regex"));

static PROFILE_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"mode=viewprofile&u=(\d+)").expect("static regex"));

/// Why a page (or a required part of it) could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PageError {
    #[error("couldn't find forum id in breadcrumbs")]
    MissingForumId,
    #[error("couldn't find topic title link")]
    MissingTitleLink,
    #[error("unparseable topic link: {0}")]
    BadTopicLink(String),
    #[error("topic {topic_id} listing has no poster")]
    MissingTopicPoster { topic_id: i64 },
    #[error("topic {topic_id} listing has no parseable date")]
    MissingTopicDate { topic_id: i64 },
    #[error("couldn't find any posts")]
    NoPosts,
    #[error("post without an id attribute")]
    MissingPostId,
    #[error("post {post_id} has no author")]
    MissingAuthor { post_id: i64 },
    #[error("post {post_id} has no parseable date")]
    MissingPostDate { post_id: i64 },
    #[error("index page has no forums")]
    NoForums,
}

/// Outcome of parsing a page that did not yield data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// The page is a known non-content variant and is ignored.
    Skipped(SkipReason),
    /// The page should have had content but a required part is missing.
    Invalid(PageError),
}

impl From<PageError> for Rejection {
    fn from(e: PageError) -> Self {
        Self::Invalid(e)
    }
}

/// Who wrote a post or started a topic, as printed on the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Poster {
    /// A user with a profile link carrying the site's numeric id.
    Registered { id: i64, name: String },
    /// A user shown by name only (guest or deleted account).
    Anonymous { name: String },
}

impl Poster {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Registered { name, .. } | Self::Anonymous { name } => name,
        }
    }
}

/// Extract `(forum_id, topic_id)` from a topic link.
///
/// `strict` requires the whole href to be a plain topic link, as listings use;
/// otherwise the pattern may appear anywhere (title links carry extra parameters).
#[must_use]
pub fn parse_topic_link(href: &str, strict: bool) -> Option<(i64, i64)> {
    let pattern = if strict { &*TOPIC_LINK_STRICT } else { &*TOPIC_LINK };
    let caps = pattern.captures(href)?;
    let forum_id = caps.get(1)?.as_str().parse().ok()?;
    let topic_id = caps.get(2)?.as_str().parse().ok()?;
    Some((forum_id, topic_id))
}

/// Extract the numeric user id from a profile link.
#[must_use]
pub fn parse_profile_link(href: &str) -> Option<i64> {
    PROFILE_LINK
        .captures(href)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// The forum id carried by the page's breadcrumb trail. The deepest crumb wins.
#[must_use]
pub fn breadcrumb_forum_id(document: &Html) -> Option<i64> {
    document
        .select(selector!("div.navbar.nav-breadcrumbs span.crumb[data-forum-id]"))
        .filter_map(|crumb| crumb.value().attr("data-forum-id"))
        .filter_map(|id| id.trim().parse::<i64>().ok())
        .filter(|id| *id > 0)
        .last()
}

/// Read the poster shown inside `container` (a listing byline or a profile card).
#[must_use]
pub fn parse_poster(container: ElementRef<'_>) -> Option<Poster> {
    if let Some(link) = container
        .select(selector!("a.username, a.username-coloured"))
        .next()
    {
        let name = element_text(link);
        let id = link.value().attr("href").and_then(parse_profile_link);
        return Some(match id {
            Some(id) => Poster::Registered { id, name },
            None => Poster::Anonymous { name },
        });
    }

    container
        .select(selector!("span.username, span.username-coloured"))
        .next()
        .map(|span| Poster::Anonymous {
            name: element_text(span),
        })
        .filter(|poster| !poster.name().is_empty())
}

/// Trimmed text content of an element.
#[must_use]
pub fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

/// Text of the `index`-th child node (text node or element), untrimmed.
#[must_use]
pub fn child_node_text(element: ElementRef<'_>, index: usize) -> Option<String> {
    child_texts(element).nth(index)
}

/// Trimmed text of the last child node, or `None` if it is blank.
#[must_use]
pub fn last_child_text(element: ElementRef<'_>) -> Option<String> {
    child_texts(element)
        .last()
        .map(|text| text.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn child_texts(element: ElementRef<'_>) -> impl Iterator<Item = String> + '_ {
    element.children().map(|node| match node.value() {
        Node::Text(text) => text.to_string(),
        Node::Element(_) => ElementRef::wrap(node)
            .map(|e| e.text().collect())
            .unwrap_or_default(),
        _ => String::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strict_topic_link() {
        assert_eq!(parse_topic_link("./viewtopic.php?f=7&t=123", true), Some((7, 123)));
        assert_eq!(
            parse_topic_link(
                "./viewtopic.php?f=7&t=123&sid=0123456789abcdef0123456789abcdef",
                true
            ),
            Some((7, 123))
        );
        assert_eq!(parse_topic_link("./viewtopic.php?f=7&t=123&start=15", true), None);
        assert_eq!(parse_topic_link("./viewtopic.php?t=123", true), None);
    }

    #[test]
    fn test_loose_topic_link() {
        assert_eq!(
            parse_topic_link("./viewtopic.php?f=2&t=99&start=30#p100", false),
            Some((2, 99))
        );
    }

    #[test]
    fn test_profile_link() {
        assert_eq!(
            parse_profile_link("./memberlist.php?mode=viewprofile&u=1234"),
            Some(1234)
        );
        assert_eq!(parse_profile_link("./memberlist.php?mode=team"), None);
    }

    #[test]
    fn test_breadcrumb_deepest_wins() {
        let html = r#"
            <div class="navbar nav-breadcrumbs">
              <span class="crumb"><a href="./index.php">Board index</a></span>
              <span class="crumb" data-forum-id="3"><a href="./viewforum.php?f=3">Cat</a></span>
              <span class="crumb" data-forum-id="7"><a href="./viewforum.php?f=7">Forum</a></span>
            </div>"#;
        let document = Html::parse_document(html);
        assert_eq!(breadcrumb_forum_id(&document), Some(7));
    }

    #[test]
    fn test_breadcrumb_missing() {
        let document = Html::parse_document("<div class='navbar'><span class='crumb'></span></div>");
        assert_eq!(breadcrumb_forum_id(&document), None);
    }

    #[test]
    fn test_parse_poster_variants() {
        let document = Html::parse_fragment(
            r#"<div id="a">by <a href="./memberlist.php?mode=viewprofile&amp;u=42" class="username-coloured">Alice</a></div>
               <div id="b">by <span class="username">Guest Bob</span></div>
               <div id="c">nobody</div>"#,
        );
        let by_id = |id: &str| {
            let css = format!("div#{id}");
            let sel = scraper::Selector::parse(&css).unwrap();
            document.select(&sel).next().unwrap()
        };

        assert_eq!(
            parse_poster(by_id("a")),
            Some(Poster::Registered {
                id: 42,
                name: "Alice".to_string()
            })
        );
        assert_eq!(
            parse_poster(by_id("b")),
            Some(Poster::Anonymous {
                name: "Guest Bob".to_string()
            })
        );
        assert_eq!(parse_poster(by_id("c")), None);
    }
}
