use std::collections::HashSet;
use std::path::Path;

use anyhow::{bail, Result};
use tracing::debug;

use super::{page_name, read_page, IngestRun};
use crate::db::{self, TopicListing, UserStub};
use crate::parse::dates::format_timestamp;
use crate::parse::forum_page::parse_forum_page;
use crate::parse::{PageError, Rejection};

impl IngestRun {
    /// Ingest one forum listing page: user skeletons, then topic rows.
    ///
    /// # Errors
    ///
    /// Fails only in strict mode, when the page has no forum id.
    pub(crate) async fn ingest_forum_file(&mut self, path: &Path) -> Result<()> {
        let page = page_name(path);
        let Some(html) = read_page(self, path).await else {
            return Ok(());
        };

        let listing = match parse_forum_page(&html, &self.classifier) {
            Ok(listing) => listing,
            Err(Rejection::Skipped(reason)) => {
                self.skipped(&page, reason);
                return Ok(());
            }
            Err(Rejection::Invalid(PageError::MissingForumId)) if self.config.strict_forum_pages => {
                bail!("Unable to find forum id in {page}");
            }
            Err(Rejection::Invalid(e)) => {
                self.parse_failed(&page, &e);
                return Ok(());
            }
        };
        self.report.forum_pages += 1;

        for error in &listing.row_errors {
            self.parse_failed(&page, error);
        }

        if let Some(count) = listing.declared_topic_count {
            self.declared.topics_per_forum.insert(listing.forum_id, count);
        }

        let mut stubs = Vec::new();
        let mut seen_users = HashSet::new();
        let mut topics = Vec::with_capacity(listing.rows.len());
        for row in &listing.rows {
            let user_id = self.identities.user_id(&row.poster);
            if seen_users.insert(user_id) {
                stubs.push(UserStub {
                    id: user_id,
                    name: row.poster.name().to_string(),
                });
            }
            if let Some(count) = row.declared_post_count {
                self.declared.posts_per_topic.insert(row.topic_id, count);
            }
            topics.push(TopicListing {
                id: row.topic_id,
                forum_id: row.forum_id,
                name: row.title.clone(),
                date_created: format_timestamp(row.date_created),
                author_user_id: user_id,
                is_announcement: row.is_announcement,
                is_pinned: row.is_pinned,
            });
        }

        if let Err(e) = db::insert_user_stubs(self.db.pool(), &stubs).await {
            self.storage_failed(&page, "user skeletons", &e);
        }
        if let Err(e) = db::upsert_topic_listings(self.db.pool(), &topics).await {
            self.storage_failed(&page, "topics", &e);
        }

        debug!(
            page = %page,
            forum_id = listing.forum_id,
            topics = topics.len(),
            users = stubs.len(),
            "Ingested forum page"
        );
        Ok(())
    }
}
