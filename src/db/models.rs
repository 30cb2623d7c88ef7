use serde::{Deserialize, Serialize};

/// A board or a root category (`parent_id` is `None`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Forum {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub parent_id: Option<i64>,
}

/// A discussion thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Topic {
    pub id: i64,
    pub forum_id: i64,
    pub name: String,
    pub date_created: Option<String>,
    pub author_user_id: Option<i64>,
    pub is_announcement: bool,
    pub is_pinned: bool,
    pub latest_post_date: Option<String>,
    pub latest_post_id: Option<i64>,
}

/// One message within a topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Post {
    pub id: i64,
    pub topic_id: i64,
    pub author_user_id: i64,
    pub subject: String,
    pub date_posted: String,
    pub body: String,
}

/// A poster, either with a site profile id or a synthetic one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub avatar: Option<String>,
    pub avatar_width: Option<i64>,
    pub avatar_height: Option<i64>,
    pub location: Option<String>,
    pub rank: Option<String>,
    pub joined: Option<String>,
    pub first_video: Option<String>,
    pub signature: Option<String>,
}

/// Resolution state of one referenced image, keyed by its exact source URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Asset {
    pub url: String,
    pub file_name: Option<String>,
    pub is_fetched: bool,
}

impl Asset {
    /// The local file name, if this asset has been acquired.
    #[must_use]
    pub fn resolved_file(&self) -> Option<&str> {
        if self.is_fetched {
            self.file_name.as_deref()
        } else {
            None
        }
    }
}

/// Data for upserting a forum from the index page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewForum {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub parent_id: Option<i64>,
}

/// Listing metadata for a topic, as read from a forum page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicListing {
    pub id: i64,
    pub forum_id: i64,
    pub name: String,
    pub date_created: String,
    pub author_user_id: i64,
    pub is_announcement: bool,
    pub is_pinned: bool,
}

/// Seed values used when a topic page creates a topic the listing never saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSeed {
    pub id: i64,
    pub forum_id: i64,
    pub name: String,
    pub date_created: String,
    pub author_user_id: i64,
}

/// Data for upserting a post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPost {
    pub id: i64,
    pub topic_id: i64,
    pub author_user_id: i64,
    pub subject: String,
    pub date_posted: String,
    pub body: String,
}

/// A skeleton user (id + name) seen on a listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserStub {
    pub id: i64,
    pub name: String,
}

/// Aggregate counts for one forum, for the renderer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct ForumSummary {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub parent_id: Option<i64>,
    pub topic_count: i64,
    pub post_count: i64,
}

/// A forum with its child forums, built from the flat forum table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForumNode {
    pub forum: Forum,
    pub children: Vec<ForumNode>,
}

/// A topic row as listed on a rendered forum page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct TopicDisplay {
    pub id: i64,
    pub name: String,
    pub date_created: Option<String>,
    pub is_announcement: bool,
    pub is_pinned: bool,
    pub author_name: Option<String>,
    pub latest_post_id: Option<i64>,
    pub latest_post_date: Option<String>,
    pub post_count: i64,
}

/// A user together with the number of posts attributed to them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct PostingUser {
    pub id: i64,
    pub name: String,
    pub avatar: Option<String>,
    pub avatar_width: Option<i64>,
    pub avatar_height: Option<i64>,
    pub location: Option<String>,
    pub rank: Option<String>,
    pub first_video: Option<String>,
    pub signature: Option<String>,
    pub post_count: i64,
}

/// A topic that has no persisted posts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::FromRow)]
pub struct EmptyTopic {
    pub id: i64,
    pub forum_id: i64,
}

/// Row counts per entity table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EntityCounts {
    pub forums: i64,
    pub topics: i64,
    pub posts: i64,
    pub users: i64,
    pub assets: i64,
}
