use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::{info, warn};
use url::Url;

use super::IngestRun;
use crate::db;
use crate::wayback::cdx::strip_scheme;
use crate::wayback::unwrap_snapshot_address;

/// Which kind of count disagreed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CountedEntity {
    /// Topics in a forum.
    ForumTopics,
    /// Posts in a topic.
    TopicPosts,
}

/// Fewer rows were stored than a listing advertised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountMismatch {
    pub entity: CountedEntity,
    pub id: i64,
    pub declared: i64,
    pub persisted: i64,
}

impl IngestRun {
    /// Compare advertised counts with stored ones and warn about shortfalls.
    pub(crate) async fn check_counts(&mut self) {
        let forum_counts = match db::forum_topic_counts(self.db.pool()).await {
            Ok(counts) => counts,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "Couldn't count topics per forum");
                return;
            }
        };
        let topic_counts = match db::topic_post_counts(self.db.pool()).await {
            Ok(counts) => counts,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "Couldn't count posts per topic");
                return;
            }
        };

        let mut mismatches = shortfalls(
            CountedEntity::ForumTopics,
            &self.declared.topics_per_forum,
            &forum_counts,
        );
        mismatches.extend(shortfalls(
            CountedEntity::TopicPosts,
            &self.declared.posts_per_topic,
            &topic_counts,
        ));

        for mismatch in &mismatches {
            warn!(
                entity = ?mismatch.entity,
                id = mismatch.id,
                declared = mismatch.declared,
                persisted = mismatch.persisted,
                "Fewer rows stored than the listing declared"
            );
        }
        self.report.mismatches = mismatches;
    }

    /// Fetch every topic without posts from the archive, following its pages.
    pub(crate) async fn backfill_empty_topics(&mut self) {
        let empty = match db::topics_without_posts(self.db.pool()).await {
            Ok(empty) => empty,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "Couldn't list topics without posts");
                return;
            }
        };
        if empty.is_empty() {
            return;
        }
        info!(count = empty.len(), "Looking up topics without posts in the archive");

        for topic in empty {
            let relative = format!("viewtopic.php?f={}&t={}", topic.forum_id, topic.id);
            let Ok(start) = self.config.site_url.join(&relative) else {
                continue;
            };
            self.archive.prepopulate(strip_scheme(start.as_str())).await;
            let pages = self.backfill_chain(start).await;
            info!(topic_id = topic.id, pages, "Backfilled topic");
        }
    }

    /// Ingest `start` and every page its "next" links lead to. Returns the
    /// number of pages stored.
    async fn backfill_chain(&mut self, start: Url) -> usize {
        let mut visited = HashSet::new();
        let mut current = Some(start);
        let mut stored = 0;

        while let Some(url) = current.take() {
            if !visited.insert(strip_scheme(url.as_str()).to_string()) {
                break;
            }
            let Some(html) = self.archive.fetch(url.as_str()).await else {
                break;
            };
            let Some(ingested) = self.ingest_topic_source(url.as_str(), &html).await else {
                break;
            };
            stored += 1;
            self.report.backfilled_pages += 1;
            info!(
                url = %url,
                topic_id = ingested.topic_id,
                posts = ingested.posts,
                "Stored archived topic page"
            );

            current = ingested
                .next_page
                .as_deref()
                .map(unwrap_snapshot_address)
                .and_then(|href| url.join(href).ok());
        }
        stored
    }
}

fn shortfalls(
    entity: CountedEntity,
    declared: &HashMap<i64, i64>,
    persisted: &HashMap<i64, i64>,
) -> Vec<CountMismatch> {
    let mut out: Vec<CountMismatch> = declared
        .iter()
        .filter_map(|(&id, &declared)| {
            let persisted = persisted.get(&id).copied().unwrap_or(0);
            (persisted < declared).then_some(CountMismatch {
                entity,
                id,
                declared,
                persisted,
            })
        })
        .collect();
    out.sort_by_key(|m| m.id);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shortfalls_only_when_fewer_stored() {
        let declared = HashMap::from([(1, 5), (2, 3), (3, 2)]);
        let persisted = HashMap::from([(1, 5), (2, 1), (3, 4)]);
        let out = shortfalls(CountedEntity::TopicPosts, &declared, &persisted);
        assert_eq!(
            out,
            vec![CountMismatch {
                entity: CountedEntity::TopicPosts,
                id: 2,
                declared: 3,
                persisted: 1,
            }]
        );
    }

    #[test]
    fn test_shortfall_for_missing_rows() {
        let declared = HashMap::from([(9, 1)]);
        let out = shortfalls(CountedEntity::ForumTopics, &declared, &HashMap::new());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].persisted, 0);
    }
}
