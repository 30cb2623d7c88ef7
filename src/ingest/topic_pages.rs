use std::collections::HashSet;
use std::path::Path;

use tracing::debug;

use super::{page_name, read_page, IngestRun};
use crate::db::{self, NewPost, TopicSeed, User};
use crate::parse::dates::format_timestamp;
use crate::parse::topic_page::{parse_topic_page, TopicPage};
use crate::parse::Rejection;

/// What a stored topic page contributed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct IngestedTopic {
    pub topic_id: i64,
    pub posts: usize,
    pub next_page: Option<String>,
}

impl IngestRun {
    pub(crate) async fn ingest_topic_file(&mut self, path: &Path) {
        let page = page_name(path);
        let Some(html) = read_page(self, path).await else {
            return;
        };
        if self.ingest_topic_source(&page, &html).await.is_some() {
            self.report.topic_pages += 1;
        }
    }

    /// Parse a topic page and store its users, topic and posts.
    ///
    /// Each storage phase is independent: a failure is recorded and the
    /// remaining phases still run. Returns `None` if the page was rejected.
    pub(crate) async fn ingest_topic_source(&mut self, page: &str, html: &str) -> Option<IngestedTopic> {
        let parsed = match parse_topic_page(html, &self.classifier) {
            Ok(parsed) => parsed,
            Err(Rejection::Skipped(reason)) => {
                self.skipped(page, reason);
                return None;
            }
            Err(Rejection::Invalid(e)) => {
                self.parse_failed(page, &e);
                return None;
            }
        };

        let (users, posts) = self.collect_entities(&parsed).await;

        if let Err(e) = db::upsert_users(self.db.pool(), &users).await {
            self.storage_failed(page, "users", &e);
        }
        if let Err(e) = self.store_topic(&parsed, &posts).await {
            self.storage_failed(page, "topic", &e);
        }
        if let Err(e) = db::upsert_posts(self.db.pool(), &posts).await {
            self.storage_failed(page, "posts", &e);
        }
        if let Err(e) = self.assets.flush(self.db.pool()).await {
            self.storage_failed(page, "assets", &e);
        }

        debug!(
            page = %page,
            topic_id = parsed.topic_id,
            posts = posts.len(),
            users = users.len(),
            "Ingested topic page"
        );
        Some(IngestedTopic {
            topic_id: parsed.topic_id,
            posts: posts.len(),
            next_page: parsed.next_page,
        })
    }

    /// Users (first card per id wins) and posts with rewritten bodies.
    async fn collect_entities(&mut self, parsed: &TopicPage) -> (Vec<User>, Vec<NewPost>) {
        let mut users = Vec::new();
        let mut seen_users = HashSet::new();
        let mut posts = Vec::with_capacity(parsed.posts.len());

        for post in &parsed.posts {
            let card = &post.author;
            let user_id = self.identities.user_id(&card.poster);
            if seen_users.insert(user_id) {
                users.push(User {
                    id: user_id,
                    name: card.poster.name().to_string(),
                    avatar: card.avatar.clone(),
                    avatar_width: card.avatar_width,
                    avatar_height: card.avatar_height,
                    location: card.location.clone(),
                    rank: card.rank.clone(),
                    joined: card.joined.clone(),
                    first_video: card.first_video.clone(),
                    signature: card.signature.clone(),
                });
            }

            let body = self.assets.rewrite_body(&post.body, &post.image_sources).await;
            posts.push(NewPost {
                id: post.id,
                topic_id: parsed.topic_id,
                author_user_id: user_id,
                subject: post.subject.clone(),
                date_posted: format_timestamp(post.date_posted),
                body,
            });
        }

        (users, posts)
    }

    /// Create the topic if it is new, then move its latest-post pointer forward.
    async fn store_topic(&self, parsed: &TopicPage, posts: &[NewPost]) -> anyhow::Result<()> {
        let Some(first) = posts.first() else {
            return Ok(());
        };
        let seed = TopicSeed {
            id: parsed.topic_id,
            forum_id: parsed.forum_id,
            name: parsed.title.clone(),
            date_created: first.date_posted.clone(),
            author_user_id: first.author_user_id,
        };
        if db::create_topic_if_absent(self.db.pool(), &seed).await? {
            debug!(topic_id = seed.id, "Created topic from topic page");
        }

        // Earliest post wins a tie.
        let latest = posts
            .iter()
            .fold(first, |best, post| if post.date_posted > best.date_posted { post } else { best });
        db::advance_latest_post(self.db.pool(), parsed.topic_id, &latest.date_posted, latest.id).await?;
        Ok(())
    }
}
