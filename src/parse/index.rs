use std::collections::HashMap;

use scraper::{ElementRef, Html};

use super::{child_node_text, element_text, PageClassifier, PageError, Rejection};
use crate::db::NewForum;

/// The board index: categories, their forums, and the topic counts it advertises.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexPage {
    /// Categories first, each followed by its forums.
    pub forums: Vec<NewForum>,
    /// Forum id to the topic count shown on the index.
    pub declared_topic_counts: HashMap<i64, i64>,
}

/// Parse the top-level index page.
///
/// # Errors
///
/// Returns a [`Rejection`] if the page is a non-content variant or lists no forums.
pub fn parse_index(html: &str, classifier: &PageClassifier) -> Result<IndexPage, Rejection> {
    let document = Html::parse_document(html);
    if let Some(reason) = classifier.classify(&document) {
        return Err(Rejection::Skipped(reason));
    }

    let mut page = IndexPage::default();
    for category in document.select(selector!("div.forabg")) {
        let Some(header) = category
            .select(selector!("li.header div.list-inner a[data-id]"))
            .next()
        else {
            continue;
        };
        let Some(category_id) = data_id(header) else {
            continue;
        };
        page.forums.push(NewForum {
            id: category_id,
            name: element_text(header),
            description: None,
            parent_id: None,
        });

        for row in category.select(selector!("li.row")) {
            let Some(link) = row.select(selector!("div.list-inner a[data-id]")).next() else {
                continue;
            };
            let Some(forum_id) = data_id(link) else {
                continue;
            };
            let description = row
                .select(selector!("div.list-inner div.forum-description"))
                .next()
                .map(element_text)
                .filter(|d| !d.is_empty());
            if let Some(count) = row
                .select(selector!("dd.topics"))
                .next()
                .and_then(|dd| child_node_text(dd, 0))
                .and_then(|text| parse_count(&text))
            {
                page.declared_topic_counts.insert(forum_id, count);
            }
            page.forums.push(NewForum {
                id: forum_id,
                name: element_text(link),
                description,
                parent_id: Some(category_id),
            });
        }
    }

    if page.forums.is_empty() {
        return Err(PageError::NoForums.into());
    }
    Ok(page)
}

fn data_id(link: ElementRef<'_>) -> Option<i64> {
    link.value()
        .attr("data-id")
        .and_then(|id| id.trim().parse().ok())
}

/// Parse a displayed count such as `1,024`.
pub(crate) fn parse_count(text: &str) -> Option<i64> {
    let digits: String = text
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == ',')
        .filter(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const INDEX: &str = r#"
        <div class="forabg">
          <ul class="topiclist"><li class="header"><dl><dt><div class="list-inner"><a href="./viewforum.php?f=1" data-id="1">LRR</a></div></dt></dl></li></ul>
          <ul class="topiclist forums">
            <li class="row"><dl>
              <dt><div class="list-inner"><a href="./viewforum.php?f=7" class="forumtitle" data-id="7">Videos</a>
                <div class="forum-description">Talk about videos</div></div></dt>
              <dd class="topics">1,204 <dfn>Topics</dfn></dd>
            </dl></li>
            <li class="row"><dl>
              <dt><div class="list-inner"><a href="./viewforum.php?f=8" data-id="8">Misc</a></div></dt>
              <dd class="topics">3 <dfn>Topics</dfn></dd>
            </dl></li>
          </ul>
        </div>"#;

    #[test]
    fn test_parse_index() {
        let page = parse_index(INDEX, &PageClassifier::standard()).unwrap();
        assert_eq!(page.forums.len(), 3);
        assert_eq!(page.forums[0].parent_id, None);
        assert_eq!(page.forums[0].name, "LRR");
        assert_eq!(page.forums[1].id, 7);
        assert_eq!(page.forums[1].parent_id, Some(1));
        assert_eq!(page.forums[1].description.as_deref(), Some("Talk about videos"));
        assert_eq!(page.forums[2].description, None);
        assert_eq!(page.declared_topic_counts.get(&7), Some(&1204));
        assert_eq!(page.declared_topic_counts.get(&8), Some(&3));
    }

    #[test]
    fn test_empty_index() {
        let result = parse_index("<html><body></body></html>", &PageClassifier::standard());
        assert_eq!(result, Err(Rejection::Invalid(PageError::NoForums)));
    }

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count(" 12 "), Some(12));
        assert_eq!(parse_count("1,024 Topics"), Some(1024));
        assert_eq!(parse_count("none"), None);
    }
}
