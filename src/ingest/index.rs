use tracing::info;

use super::{page_name, read_page, IngestRun};
use crate::db;
use crate::parse::index::parse_index;
use crate::parse::Rejection;

impl IngestRun {
    /// Store the forum tree from the index page and remember its topic counts.
    pub(crate) async fn ingest_index(&mut self) {
        let path = self.config.index_path();
        let page = page_name(&path);
        let Some(html) = read_page(self, &path).await else {
            return;
        };

        let index = match parse_index(&html, &self.classifier) {
            Ok(index) => index,
            Err(Rejection::Skipped(reason)) => return self.skipped(&page, reason),
            Err(Rejection::Invalid(e)) => return self.parse_failed(&page, &e),
        };

        self.declared
            .topics_per_forum
            .extend(index.declared_topic_counts);

        match db::upsert_forums(self.db.pool(), &index.forums).await {
            Ok(()) => {
                self.report.forums = index.forums.len();
                info!(forums = index.forums.len(), "Stored forum tree");
            }
            Err(e) => self.storage_failed(&page, "forums", &e),
        }
    }
}
