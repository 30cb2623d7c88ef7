use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::NaiveDateTime;
use regex::Regex;
use scraper::{ElementRef, Html};

use super::dates::{extract_date, BYLINE};
use super::index::parse_count;
use super::{
    breadcrumb_forum_id, child_node_text, element_text, parse_poster, parse_topic_link,
    PageClassifier, PageError, Poster, Rejection,
};

static TOPIC_TOTAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d[\d,]*)\s+topics?\b").expect("static regex"));

/// One topic-listing page of a forum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForumPage {
    /// The forum named by the breadcrumb trail.
    pub forum_id: i64,
    /// Topic total printed next to the pagination, when present.
    pub declared_topic_count: Option<i64>,
    /// Announcements first, then ordinary rows, in page order.
    pub rows: Vec<ListingRow>,
    /// Rows that could not be read; the rest of the page is still usable.
    pub row_errors: Vec<PageError>,
}

/// A topic as shown in a forum listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingRow {
    pub forum_id: i64,
    pub topic_id: i64,
    pub title: String,
    pub poster: Poster,
    pub date_created: NaiveDateTime,
    pub is_announcement: bool,
    pub is_pinned: bool,
    /// Replies shown in the listing plus the opening post.
    pub declared_post_count: Option<i64>,
}

/// Parse a forum listing page.
///
/// # Errors
///
/// Returns a [`Rejection`] if the page is a non-content variant or its breadcrumb
/// trail carries no forum id.
pub fn parse_forum_page(html: &str, classifier: &PageClassifier) -> Result<ForumPage, Rejection> {
    let document = Html::parse_document(html);
    if let Some(reason) = classifier.classify(&document) {
        return Err(Rejection::Skipped(reason));
    }

    let forum_id = breadcrumb_forum_id(&document).ok_or(PageError::MissingForumId)?;

    let declared_topic_count = document
        .select(selector!("div.pagination"))
        .find_map(|pagination| {
            let text = element_text(pagination);
            TOPIC_TOTAL
                .captures(&text)
                .and_then(|caps| parse_count(&caps[1]))
        });

    let mut page = ForumPage {
        forum_id,
        declared_topic_count,
        rows: Vec::new(),
        row_errors: Vec::new(),
    };
    let mut seen = HashSet::new();

    for row in document.select(selector!("div.forumbg.announcement li.row")) {
        match parse_row(row, true) {
            Ok(parsed) => {
                seen.insert(parsed.topic_id);
                page.rows.push(parsed);
            }
            Err(e) => page.row_errors.push(e),
        }
    }

    for row in document.select(selector!("div.forumbg:not(.announcement) li.row")) {
        match parse_row(row, false) {
            // Some templates repeat a row; the first occurrence wins.
            Ok(parsed) if seen.insert(parsed.topic_id) => page.rows.push(parsed),
            Ok(_) => {}
            Err(e) => page.row_errors.push(e),
        }
    }

    Ok(page)
}

fn parse_row(row: ElementRef<'_>, is_announcement: bool) -> Result<ListingRow, PageError> {
    let link = row
        .select(selector!("a.topictitle"))
        .next()
        .ok_or(PageError::MissingTitleLink)?;
    let href = link.value().attr("href").unwrap_or_default();
    let (forum_id, topic_id) =
        parse_topic_link(href, true).ok_or_else(|| PageError::BadTopicLink(href.to_string()))?;

    let byline = row
        .select(selector!("div.responsive-hide"))
        .next()
        .ok_or(PageError::MissingTopicPoster { topic_id })?;
    let poster = parse_poster(byline).ok_or(PageError::MissingTopicPoster { topic_id })?;
    let date_created =
        extract_date(byline, BYLINE).ok_or(PageError::MissingTopicDate { topic_id })?;

    let declared_post_count = row
        .select(selector!("dd.posts"))
        .next()
        .and_then(|dd| child_node_text(dd, 0))
        .and_then(|text| parse_count(&text))
        .map(|replies| replies + 1);

    Ok(ListingRow {
        forum_id,
        topic_id,
        title: element_text(link),
        poster,
        date_created,
        is_announcement,
        is_pinned: row.value().classes().any(|c| c == "sticky"),
        declared_post_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::dates::format_timestamp;
    use crate::parse::SkipReason;

    fn row(class: &str, forum: i64, topic: i64, byline: &str, replies: i64) -> String {
        format!(
            r#"<li class="row {class}"><dl>
                 <dt><div class="list-inner">
                   <a href="./viewtopic.php?f={forum}&amp;t={topic}" class="topictitle">Topic {topic}</a>
                   <div class="responsive-hide">{byline}</div>
                 </div></dt>
                 <dd class="posts">{replies} <dfn>Replies</dfn></dd>
               </dl></li>"#
        )
    }

    fn page(announcements: &str, topics: &str) -> String {
        format!(
            r#"<html><body>
               <div class="navbar nav-breadcrumbs">
                 <span class="crumb"><a href="./index.php">Board index</a></span>
                 <span class="crumb" data-forum-id="7"><a href="./viewforum.php?f=7">Videos</a></span>
               </div>
               <div class="pagination">42 topics • Page 1 of 2</div>
               <div class="forumbg announcement"><ul class="topiclist topics">{announcements}</ul></div>
               <div class="forumbg"><ul class="topiclist topics">{topics}</ul></div>
               </body></html>"#
        )
    }

    const GUEST: &str = r#"by <span class="username">Guest Gal</span> » 3 Apr 2013, 12:00"#;
    const MEMBER: &str =
        r#"by <a href="./memberlist.php?mode=viewprofile&amp;u=55" class="username">Member</a> » 5 May 2014, 08:15"#;

    #[test]
    fn test_parse_rows() {
        let html = page(
            &row("global-announce", 7, 1, MEMBER, 0),
            &format!(
                "{}{}{}",
                row("sticky", 7, 123, GUEST, 4),
                row("", 7, 124, MEMBER, 0),
                row("", 7, 123, GUEST, 4)
            ),
        );
        let page = parse_forum_page(&html, &PageClassifier::standard()).unwrap();

        assert_eq!(page.forum_id, 7);
        assert_eq!(page.declared_topic_count, Some(42));
        assert!(page.row_errors.is_empty());
        let ids: Vec<i64> = page.rows.iter().map(|r| r.topic_id).collect();
        assert_eq!(ids, vec![1, 123, 124]);

        assert!(page.rows[0].is_announcement);
        assert!(!page.rows[1].is_announcement);
        assert!(page.rows[1].is_pinned);
        assert_eq!(
            page.rows[1].poster,
            Poster::Anonymous {
                name: "Guest Gal".to_string()
            }
        );
        assert_eq!(format_timestamp(page.rows[1].date_created), "2013-04-03 12:00:00");
        assert_eq!(page.rows[1].declared_post_count, Some(5));
        assert_eq!(
            page.rows[2].poster,
            Poster::Registered {
                id: 55,
                name: "Member".to_string()
            }
        );
    }

    #[test]
    fn test_announcement_not_repeated() {
        let html = page(&row("", 7, 9, MEMBER, 0), &row("", 7, 9, MEMBER, 0));
        let page = parse_forum_page(&html, &PageClassifier::standard()).unwrap();
        assert_eq!(page.rows.len(), 1);
        assert!(page.rows[0].is_announcement);
    }

    #[test]
    fn test_bad_row_is_isolated() {
        let html = page(
            "",
            &format!(
                "{}{}",
                row("", 7, 10, "by nobody", 0),
                row("", 7, 11, GUEST, 0)
            ),
        );
        let page = parse_forum_page(&html, &PageClassifier::standard()).unwrap();
        assert_eq!(page.rows.len(), 1);
        assert_eq!(page.rows[0].topic_id, 11);
        assert_eq!(
            page.row_errors,
            vec![PageError::MissingTopicPoster { topic_id: 10 }]
        );
    }

    #[test]
    fn test_missing_forum_id() {
        let html = r#"<div class="forumbg"><ul></ul></div>"#;
        assert_eq!(
            parse_forum_page(html, &PageClassifier::standard()),
            Err(Rejection::Invalid(PageError::MissingForumId))
        );
    }

    #[test]
    fn test_login_page_skipped() {
        let html = r#"<h2 class="login-title">Login</h2>"#;
        assert_eq!(
            parse_forum_page(html, &PageClassifier::standard()),
            Err(Rejection::Skipped(SkipReason::LoginPage))
        );
    }
}
