use chrono::NaiveDateTime;
use scraper::{ElementRef, Html, Selector};

use super::dates::{extract_date, format_timestamp, parse_forum_date, AUTHOR_LINE};
use super::{
    breadcrumb_forum_id, element_text, last_child_text, parse_poster, parse_topic_link,
    PageClassifier, PageError, Poster, Rejection,
};

/// One page of a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPage {
    pub forum_id: i64,
    pub topic_id: i64,
    pub title: String,
    /// Posts in document order.
    pub posts: Vec<ParsedPost>,
    /// Raw href of the "next page" link, if the topic continues.
    pub next_page: Option<String>,
}

/// A post as printed on a topic page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPost {
    pub id: i64,
    pub subject: String,
    pub date_posted: NaiveDateTime,
    /// Inner markup of the content block, verbatim.
    pub body: String,
    /// `src` of every image in the body, in document order.
    pub image_sources: Vec<String>,
    pub author: AuthorCard,
}

/// The profile card shown beside each post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorCard {
    pub poster: Poster,
    pub avatar: Option<String>,
    pub avatar_width: Option<i64>,
    pub avatar_height: Option<i64>,
    pub joined: Option<String>,
    pub rank: Option<String>,
    pub first_video: Option<String>,
    pub location: Option<String>,
    /// Inner markup of the signature block.
    pub signature: Option<String>,
}

/// Parse one topic page.
///
/// # Errors
///
/// Returns a [`Rejection`] if the page is a non-content variant or a required
/// element (forum id, title link, posts, a post's id, author or date) is missing.
pub fn parse_topic_page(html: &str, classifier: &PageClassifier) -> Result<TopicPage, Rejection> {
    let document = Html::parse_document(html);
    if let Some(reason) = classifier.classify(&document) {
        return Err(Rejection::Skipped(reason));
    }

    let forum_id = breadcrumb_forum_id(&document).ok_or(PageError::MissingForumId)?;

    let title_link = document
        .select(selector!("h2.topic-title a"))
        .next()
        .ok_or(PageError::MissingTitleLink)?;
    let href = title_link.value().attr("href").unwrap_or_default();
    let (_, topic_id) =
        parse_topic_link(href, false).ok_or_else(|| PageError::BadTopicLink(href.to_string()))?;

    let posts = document
        .select(selector!("div#page-body div.post"))
        .map(parse_post)
        .collect::<Result<Vec<_>, _>>()?;
    if posts.is_empty() {
        return Err(PageError::NoPosts.into());
    }

    let next_page = document
        .select(selector!("div.pagination li.next a"))
        .next()
        .and_then(|a| a.value().attr("href"))
        .map(str::to_string);

    Ok(TopicPage {
        forum_id,
        topic_id,
        title: element_text(title_link),
        posts,
        next_page,
    })
}

fn parse_post(post: ElementRef<'_>) -> Result<ParsedPost, PageError> {
    let id = post
        .value()
        .id()
        .and_then(|id| id.strip_prefix('p'))
        .and_then(|digits| digits.parse::<i64>().ok())
        .ok_or(PageError::MissingPostId)?;

    let mut author = post
        .select(selector!("dl.postprofile"))
        .next()
        .and_then(parse_author_card)
        .ok_or(PageError::MissingAuthor { post_id: id })?;
    author.signature = post
        .select(selector!("div.signature"))
        .next()
        .map(|sig| sig.inner_html());

    let subject = post
        .select(selector!("div.postbody h3 a"))
        .next()
        .map(element_text)
        .unwrap_or_default();

    let date_posted = post
        .select(selector!("div.postbody p.author"))
        .next()
        .and_then(|line| extract_date(line, AUTHOR_LINE))
        .ok_or(PageError::MissingPostDate { post_id: id })?;

    let content = post.select(selector!("div.content")).next();
    let body = content.map(|c| c.inner_html()).unwrap_or_default();
    let image_sources = content
        .map(|c| {
            c.select(selector!("img"))
                .filter_map(|img| img.value().attr("src"))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Ok(ParsedPost {
        id,
        subject,
        date_posted,
        body,
        image_sources,
        author,
    })
}

fn parse_author_card(card: ElementRef<'_>) -> Option<AuthorCard> {
    let poster = parse_poster(card)?;
    let avatar = card.select(selector!("img.avatar")).next();
    let dimension = |name: &str| {
        avatar
            .and_then(|img| img.value().attr(name))
            .and_then(|v| v.trim().parse::<i64>().ok())
    };
    let joined = labelled(card, selector!("dd.profile-joined"))
        .map(|text| parse_forum_date(&text).map_or(text, format_timestamp));

    Some(AuthorCard {
        poster,
        avatar: avatar
            .and_then(|img| img.value().attr("src"))
            .map(str::to_string),
        avatar_width: dimension("width"),
        avatar_height: dimension("height"),
        joined,
        rank: labelled(card, selector!("dd.profile-rank")),
        first_video: labelled(card, selector!("dd.profile-firstvideo")),
        location: labelled(card, selector!("dd.profile-phpbb_location")),
        signature: None,
    })
}

/// Profile fields print as `<strong>Label:</strong> value`; the value is the last node.
fn labelled(card: ElementRef<'_>, field: &Selector) -> Option<String> {
    card.select(field).next().and_then(last_child_text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::SkipReason;

    const TOPIC: &str = r##"<html><head></head><body>
        <div class="navbar nav-breadcrumbs">
          <span class="crumb" data-forum-id="3"><a>Cat</a></span>
          <span class="crumb" data-forum-id="7"><a>Videos</a></span>
        </div>
        <div id="page-body">
          <h2 class="topic-title"><a href="./viewtopic.php?f=7&amp;t=123&amp;start=0">Hello there</a></h2>
          <div id="p1001" class="post bg2">
            <div class="postbody">
              <h3><a href="#p1001">Hello there</a></h3>
              <p class="author"><a href="#p1001">»</a> by <strong><span class="username">Guest Gal</span></strong> » 3 Apr 2013, 12:00</p>
              <div class="content">First <img src="../../images/foo.gif" alt="foo"> post</div>
            </div>
            <dl class="postprofile">
              <dt><span class="username">Guest Gal</span></dt>
            </dl>
          </div>
          <div id="p1002" class="post bg1">
            <div class="postbody">
              <h3><a href="#p1002">Re: Hello there</a></h3>
              <p class="author"><a href="#p1002">»</a> by <strong><a href="./memberlist.php?mode=viewprofile&amp;u=55" class="username">Member</a></strong> » 4 Apr 2013, 09:30</p>
              <div class="content">Second</div>
              <div id="sig1002" class="signature"><b>sig</b></div>
            </div>
            <dl class="postprofile">
              <dt><img class="avatar" src="./download/file.php?avatar=55.png" width="90" height="80"><br>
                  <a href="./memberlist.php?mode=viewprofile&amp;u=55" class="username">Member</a></dt>
              <dd class="profile-rank">Rank: Regular</dd>
              <dd class="profile-joined"><strong>Joined:</strong> 1 Jan 2010, 17:00</dd>
              <dd class="profile-firstvideo"><strong>First video:</strong> Road Quest</dd>
              <dd class="profile-phpbb_location"><strong>Location:</strong> Victoria</dd>
            </dl>
          </div>
          <div class="pagination"><ul><li class="next"><a href="./viewtopic.php?f=7&amp;t=123&amp;start=15">Next</a></li></ul></div>
        </div>
        </body></html>"##;

    #[test]
    fn test_parse_topic_page() {
        let page = parse_topic_page(TOPIC, &PageClassifier::standard()).unwrap();
        assert_eq!(page.forum_id, 7);
        assert_eq!(page.topic_id, 123);
        assert_eq!(page.title, "Hello there");
        assert_eq!(
            page.next_page.as_deref(),
            Some("./viewtopic.php?f=7&t=123&start=15")
        );
        assert_eq!(page.posts.len(), 2);

        let first = &page.posts[0];
        assert_eq!(first.id, 1001);
        assert_eq!(first.subject, "Hello there");
        assert_eq!(format_timestamp(first.date_posted), "2013-04-03 12:00:00");
        assert_eq!(first.image_sources, vec!["../../images/foo.gif".to_string()]);
        assert!(first.body.contains(r#"src="../../images/foo.gif""#));
        assert_eq!(
            first.author.poster,
            Poster::Anonymous {
                name: "Guest Gal".to_string()
            }
        );
        assert_eq!(first.author.signature, None);

        let second = &page.posts[1];
        assert_eq!(second.author.poster, Poster::Registered { id: 55, name: "Member".to_string() });
        assert_eq!(second.author.avatar.as_deref(), Some("./download/file.php?avatar=55.png"));
        assert_eq!(second.author.avatar_width, Some(90));
        assert_eq!(second.author.avatar_height, Some(80));
        assert_eq!(second.author.rank.as_deref(), Some("Rank: Regular"));
        assert_eq!(second.author.joined.as_deref(), Some("2010-01-01 17:00:00"));
        assert_eq!(second.author.first_video.as_deref(), Some("Road Quest"));
        assert_eq!(second.author.location.as_deref(), Some("Victoria"));
        assert_eq!(second.author.signature.as_deref(), Some("<b>sig</b>"));
    }

    #[test]
    fn test_print_version_skipped() {
        let html = r#"<html><head><link href="styles/lrr/theme/print.css" rel="stylesheet"></head><body></body></html>"#;
        assert_eq!(
            parse_topic_page(html, &PageClassifier::standard()),
            Err(Rejection::Skipped(SkipReason::PrintVersion))
        );
    }

    #[test]
    fn test_no_posts() {
        let html = r#"<div class="navbar nav-breadcrumbs"><span class="crumb" data-forum-id="7"></span></div>
            <div id="page-body"><h2 class="topic-title"><a href="./viewtopic.php?f=7&amp;t=5">T</a></h2></div>"#;
        assert_eq!(
            parse_topic_page(html, &PageClassifier::standard()),
            Err(Rejection::Invalid(PageError::NoPosts))
        );
    }

    #[test]
    fn test_post_without_date() {
        let html = r#"<div class="navbar nav-breadcrumbs"><span class="crumb" data-forum-id="7"></span></div>
            <div id="page-body"><h2 class="topic-title"><a href="./viewtopic.php?f=7&amp;t=5">T</a></h2>
            <div id="p9" class="post"><div class="postbody"><p class="author">by someone</p></div>
            <dl class="postprofile"><dt><span class="username">X</span></dt></dl></div></div>"#;
        assert_eq!(
            parse_topic_page(html, &PageClassifier::standard()),
            Err(Rejection::Invalid(PageError::MissingPostDate { post_id: 9 }))
        );
    }
}
