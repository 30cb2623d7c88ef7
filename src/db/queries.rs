use anyhow::{Context, Result};
use sqlx::SqlitePool;
use std::collections::HashMap;

use super::models::{
    Asset, EmptyTopic, EntityCounts, Forum, ForumNode, ForumSummary, NewForum, NewPost, Post,
    PostingUser, Topic, TopicDisplay, TopicListing, TopicSeed, User, UserStub,
};

// ========== Forums ==========

/// Upsert forums by id, overwriting name, description and parent.
pub async fn upsert_forums(pool: &SqlitePool, forums: &[NewForum]) -> Result<()> {
    let mut tx = pool.begin().await.context("Failed to begin forum upsert")?;

    for forum in forums {
        sqlx::query(
            r"
            INSERT INTO forums (id, name, description, parent_id)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                parent_id = excluded.parent_id
            ",
        )
        .bind(forum.id)
        .bind(&forum.name)
        .bind(&forum.description)
        .bind(forum.parent_id)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Failed to upsert forum {}", forum.id))?;
    }

    tx.commit().await.context("Failed to commit forum upsert")?;
    Ok(())
}

/// All forums, roots first.
pub async fn list_forums(pool: &SqlitePool) -> Result<Vec<Forum>> {
    sqlx::query_as("SELECT * FROM forums ORDER BY parent_id, id")
        .fetch_all(pool)
        .await
        .context("Failed to list forums")
}

/// Build the forum tree from the flat table.
///
/// Forums whose parent is missing are returned as roots so nothing is hidden.
pub async fn forum_tree(pool: &SqlitePool) -> Result<Vec<ForumNode>> {
    let forums = list_forums(pool).await?;
    let known: std::collections::HashSet<i64> = forums.iter().map(|f| f.id).collect();

    let mut by_parent: HashMap<Option<i64>, Vec<Forum>> = HashMap::new();
    for forum in forums {
        let parent = forum.parent_id.filter(|p| known.contains(p));
        by_parent.entry(parent).or_default().push(forum);
    }

    Ok(build_children(&mut by_parent, None))
}

fn build_children(
    by_parent: &mut HashMap<Option<i64>, Vec<Forum>>,
    parent: Option<i64>,
) -> Vec<ForumNode> {
    let Some(forums) = by_parent.remove(&parent) else {
        return Vec::new();
    };

    forums
        .into_iter()
        .map(|forum| {
            let children = build_children(by_parent, Some(forum.id));
            ForumNode { forum, children }
        })
        .collect()
}

/// Forums with their persisted topic and post counts.
pub async fn forum_summaries(pool: &SqlitePool) -> Result<Vec<ForumSummary>> {
    sqlx::query_as(
        r"
        SELECT
            f.id,
            f.name,
            f.description,
            f.parent_id,
            COUNT(DISTINCT t.id) AS topic_count,
            COUNT(p.id) AS post_count
        FROM forums f
        LEFT JOIN topics t ON t.forum_id = f.id
        LEFT JOIN posts p ON p.topic_id = t.id
        GROUP BY f.id
        ORDER BY f.parent_id, f.id
        ",
    )
    .fetch_all(pool)
    .await
    .context("Failed to fetch forum summaries")
}

// ========== Users ==========

/// Insert skeleton users. Existing rows are left alone: topic pages own user data.
pub async fn insert_user_stubs(pool: &SqlitePool, users: &[UserStub]) -> Result<()> {
    let mut tx = pool.begin().await.context("Failed to begin user stub insert")?;

    for user in users {
        sqlx::query("INSERT INTO users (id, name) VALUES (?, ?) ON CONFLICT(id) DO NOTHING")
            .bind(user.id)
            .bind(&user.name)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to insert user stub {}", user.id))?;
    }

    tx.commit().await.context("Failed to commit user stubs")?;
    Ok(())
}

/// Upsert full user profiles, overwriting every profile field.
pub async fn upsert_users(pool: &SqlitePool, users: &[User]) -> Result<()> {
    let mut tx = pool.begin().await.context("Failed to begin user upsert")?;

    for user in users {
        sqlx::query(
            r"
            INSERT INTO users
                (id, name, avatar, avatar_width, avatar_height, location, rank, joined, first_video, signature)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                avatar = excluded.avatar,
                avatar_width = excluded.avatar_width,
                avatar_height = excluded.avatar_height,
                location = excluded.location,
                rank = excluded.rank,
                joined = excluded.joined,
                first_video = excluded.first_video,
                signature = excluded.signature
            ",
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.avatar)
        .bind(user.avatar_width)
        .bind(user.avatar_height)
        .bind(&user.location)
        .bind(&user.rank)
        .bind(&user.joined)
        .bind(&user.first_video)
        .bind(&user.signature)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Failed to upsert user {}", user.id))?;
    }

    tx.commit().await.context("Failed to commit user upsert")?;
    Ok(())
}

/// Get a user by id.
pub async fn get_user(pool: &SqlitePool, id: i64) -> Result<Option<User>> {
    sqlx::query_as("SELECT * FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch user")
}

/// Users with at least one post, with their post counts.
pub async fn posting_users(pool: &SqlitePool) -> Result<Vec<PostingUser>> {
    sqlx::query_as(
        r"
        SELECT
            u.id, u.name, u.avatar, u.avatar_width, u.avatar_height,
            u.location, u.rank, u.first_video, u.signature,
            COUNT(p.id) AS post_count
        FROM users u
        INNER JOIN posts p ON p.author_user_id = u.id
        GROUP BY u.id
        ORDER BY u.id
        ",
    )
    .fetch_all(pool)
    .await
    .context("Failed to fetch posting users")
}

// ========== Topics ==========

/// Upsert topics from a listing page, overwriting the listing fields.
///
/// The latest-post pointer is left untouched.
pub async fn upsert_topic_listings(pool: &SqlitePool, topics: &[TopicListing]) -> Result<()> {
    let mut tx = pool.begin().await.context("Failed to begin topic upsert")?;

    for topic in topics {
        sqlx::query(
            r"
            INSERT INTO topics
                (id, forum_id, name, date_created, author_user_id, is_announcement, is_pinned)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                forum_id = excluded.forum_id,
                name = excluded.name,
                date_created = excluded.date_created,
                author_user_id = excluded.author_user_id,
                is_announcement = excluded.is_announcement,
                is_pinned = excluded.is_pinned
            ",
        )
        .bind(topic.id)
        .bind(topic.forum_id)
        .bind(&topic.name)
        .bind(&topic.date_created)
        .bind(topic.author_user_id)
        .bind(topic.is_announcement)
        .bind(topic.is_pinned)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Failed to upsert topic {}", topic.id))?;
    }

    tx.commit().await.context("Failed to commit topic upsert")?;
    Ok(())
}

/// Create a topic from a topic page if no row exists yet.
///
/// Returns `true` if a row was created.
pub async fn create_topic_if_absent(pool: &SqlitePool, seed: &TopicSeed) -> Result<bool> {
    let result = sqlx::query(
        r"
        INSERT INTO topics (id, forum_id, name, date_created, author_user_id)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(id) DO NOTHING
        ",
    )
    .bind(seed.id)
    .bind(seed.forum_id)
    .bind(&seed.name)
    .bind(&seed.date_created)
    .bind(seed.author_user_id)
    .execute(pool)
    .await
    .with_context(|| format!("Failed to create topic {}", seed.id))?;

    Ok(result.rows_affected() > 0)
}

/// Move the topic's latest-post pointer forward if `date` is newer than the stored one.
///
/// Returns `true` if the pointer changed.
pub async fn advance_latest_post(
    pool: &SqlitePool,
    topic_id: i64,
    date: &str,
    post_id: i64,
) -> Result<bool> {
    let result = sqlx::query(
        r"
        UPDATE topics
        SET latest_post_date = ?1, latest_post_id = ?2
        WHERE id = ?3 AND (latest_post_date IS NULL OR latest_post_date < ?1)
        ",
    )
    .bind(date)
    .bind(post_id)
    .bind(topic_id)
    .execute(pool)
    .await
    .with_context(|| format!("Failed to update latest post of topic {topic_id}"))?;

    Ok(result.rows_affected() > 0)
}

/// Get a topic by id.
pub async fn get_topic(pool: &SqlitePool, id: i64) -> Result<Option<Topic>> {
    sqlx::query_as("SELECT * FROM topics WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch topic")
}

/// Topics of one forum, announcements and pinned first, then by latest activity.
pub async fn forum_topics(pool: &SqlitePool, forum_id: i64) -> Result<Vec<TopicDisplay>> {
    sqlx::query_as(
        r"
        SELECT
            t.id,
            t.name,
            t.date_created,
            t.is_announcement,
            t.is_pinned,
            u.name AS author_name,
            t.latest_post_id,
            t.latest_post_date,
            (SELECT COUNT(*) FROM posts p WHERE p.topic_id = t.id) AS post_count
        FROM topics t
        LEFT JOIN users u ON u.id = t.author_user_id
        WHERE t.forum_id = ?
        ORDER BY t.is_announcement DESC, t.is_pinned DESC, t.latest_post_date DESC, t.id DESC
        ",
    )
    .bind(forum_id)
    .fetch_all(pool)
    .await
    .context("Failed to fetch forum topics")
}

/// Topics that have no persisted posts.
pub async fn topics_without_posts(pool: &SqlitePool) -> Result<Vec<EmptyTopic>> {
    sqlx::query_as(
        r"
        SELECT t.id, t.forum_id
        FROM topics t
        WHERE NOT EXISTS (SELECT 1 FROM posts p WHERE p.topic_id = t.id)
        ORDER BY t.id
        ",
    )
    .fetch_all(pool)
    .await
    .context("Failed to fetch topics without posts")
}

/// Persisted topic count per forum id.
pub async fn forum_topic_counts(pool: &SqlitePool) -> Result<HashMap<i64, i64>> {
    let rows: Vec<(i64, i64)> =
        sqlx::query_as("SELECT forum_id, COUNT(id) FROM topics GROUP BY forum_id")
            .fetch_all(pool)
            .await
            .context("Failed to count topics per forum")?;

    Ok(rows.into_iter().collect())
}

// ========== Posts ==========

/// Upsert posts by id, overwriting every field.
pub async fn upsert_posts(pool: &SqlitePool, posts: &[NewPost]) -> Result<()> {
    let mut tx = pool.begin().await.context("Failed to begin post upsert")?;

    for post in posts {
        sqlx::query(
            r"
            INSERT INTO posts (id, topic_id, author_user_id, subject, date_posted, body)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                topic_id = excluded.topic_id,
                author_user_id = excluded.author_user_id,
                subject = excluded.subject,
                date_posted = excluded.date_posted,
                body = excluded.body
            ",
        )
        .bind(post.id)
        .bind(post.topic_id)
        .bind(post.author_user_id)
        .bind(&post.subject)
        .bind(&post.date_posted)
        .bind(&post.body)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Failed to upsert post {}", post.id))?;
    }

    tx.commit().await.context("Failed to commit post upsert")?;
    Ok(())
}

/// Get a post by id.
pub async fn get_post(pool: &SqlitePool, id: i64) -> Result<Option<Post>> {
    sqlx::query_as("SELECT * FROM posts WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch post")
}

/// One page of a topic's posts, oldest first.
pub async fn topic_posts(
    pool: &SqlitePool,
    topic_id: i64,
    limit: i64,
    offset: i64,
) -> Result<Vec<Post>> {
    sqlx::query_as(
        r"
        SELECT * FROM posts
        WHERE topic_id = ?
        ORDER BY date_posted ASC, id ASC
        LIMIT ? OFFSET ?
        ",
    )
    .bind(topic_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
    .context("Failed to fetch topic posts")
}

/// Persisted post count per topic id.
pub async fn topic_post_counts(pool: &SqlitePool) -> Result<HashMap<i64, i64>> {
    let rows: Vec<(i64, i64)> =
        sqlx::query_as("SELECT topic_id, COUNT(id) FROM posts GROUP BY topic_id")
            .fetch_all(pool)
            .await
            .context("Failed to count posts per topic")?;

    Ok(rows.into_iter().collect())
}

// ========== Assets ==========

/// All known assets, resolved or not.
pub async fn list_assets(pool: &SqlitePool) -> Result<Vec<Asset>> {
    sqlx::query_as("SELECT * FROM assets ORDER BY url")
        .fetch_all(pool)
        .await
        .context("Failed to list assets")
}

/// Assets that earlier runs could not acquire.
pub async fn list_unresolved_assets(pool: &SqlitePool) -> Result<Vec<Asset>> {
    sqlx::query_as("SELECT * FROM assets WHERE is_fetched = 0 ORDER BY url")
        .fetch_all(pool)
        .await
        .context("Failed to list unresolved assets")
}

/// Upsert assets by URL.
///
/// A stored file name is never replaced and a fetched asset never reverts to
/// unfetched, so the URL to file mapping is write-once.
pub async fn upsert_assets(pool: &SqlitePool, assets: &[Asset]) -> Result<()> {
    let mut tx = pool.begin().await.context("Failed to begin asset upsert")?;

    for asset in assets {
        sqlx::query(
            r"
            INSERT INTO assets (url, file_name, is_fetched)
            VALUES (?, ?, ?)
            ON CONFLICT(url) DO UPDATE SET
                file_name = COALESCE(assets.file_name, excluded.file_name),
                is_fetched = MAX(assets.is_fetched, excluded.is_fetched)
            ",
        )
        .bind(&asset.url)
        .bind(&asset.file_name)
        .bind(asset.is_fetched)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Failed to upsert asset {}", asset.url))?;
    }

    tx.commit().await.context("Failed to commit asset upsert")?;
    Ok(())
}

// ========== Stats ==========

/// Row counts of every entity table.
pub async fn entity_counts(pool: &SqlitePool) -> Result<EntityCounts> {
    let (forums, topics, posts, users, assets): (i64, i64, i64, i64, i64) = sqlx::query_as(
        r"
        SELECT
            (SELECT COUNT(*) FROM forums),
            (SELECT COUNT(*) FROM topics),
            (SELECT COUNT(*) FROM posts),
            (SELECT COUNT(*) FROM users),
            (SELECT COUNT(*) FROM assets)
        ",
    )
    .fetch_one(pool)
    .await
    .context("Failed to count entities")?;

    Ok(EntityCounts {
        forums,
        topics,
        posts,
        users,
        assets,
    })
}
