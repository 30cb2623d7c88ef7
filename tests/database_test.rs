//! Integration tests for database operations.

use forum_mirror::db::{
    advance_latest_post, create_topic_if_absent, entity_counts, forum_summaries, forum_topics,
    forum_tree, get_topic, get_user, insert_user_stubs, list_assets, posting_users, topic_posts,
    topics_without_posts, upsert_assets, upsert_forums, upsert_posts, upsert_topic_listings,
    upsert_users, Asset, Database, NewForum, NewPost, TopicListing, TopicSeed, User, UserStub,
};
use tempfile::TempDir;

async fn setup_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("test.sqlite");
    let db = Database::new(&db_path)
        .await
        .expect("Failed to create database");
    (db, temp_dir)
}

fn forum(id: i64, parent_id: Option<i64>) -> NewForum {
    NewForum {
        id,
        name: format!("Forum {id}"),
        description: None,
        parent_id,
    }
}

fn listing(id: i64, forum_id: i64, author_user_id: i64) -> TopicListing {
    TopicListing {
        id,
        forum_id,
        name: format!("Topic {id}"),
        date_created: "2013-04-03 12:00:00".to_string(),
        author_user_id,
        is_announcement: false,
        is_pinned: false,
    }
}

fn post(id: i64, topic_id: i64, author_user_id: i64, date: &str) -> NewPost {
    NewPost {
        id,
        topic_id,
        author_user_id,
        subject: format!("Post {id}"),
        date_posted: date.to_string(),
        body: "<p>hi</p>".to_string(),
    }
}

fn full_user(id: i64, name: &str) -> User {
    User {
        id,
        name: name.to_string(),
        avatar: Some("./download/file.php?avatar=1.png".to_string()),
        avatar_width: Some(90),
        avatar_height: Some(80),
        location: Some("Victoria".to_string()),
        rank: Some("Regular".to_string()),
        joined: Some("2010-01-01 17:00:00".to_string()),
        first_video: None,
        signature: Some("<b>sig</b>".to_string()),
    }
}

#[tokio::test]
async fn test_forum_tree() {
    let (db, _temp_dir) = setup_db().await;
    upsert_forums(db.pool(), &[forum(1, None), forum(7, Some(1)), forum(8, Some(1)), forum(9, Some(99))])
        .await
        .unwrap();

    let tree = forum_tree(db.pool()).await.unwrap();
    let roots: Vec<i64> = tree.iter().map(|n| n.forum.id).collect();
    // Forum 9's parent is unknown, so it is shown as a root.
    assert_eq!(roots, vec![1, 9]);
    let children: Vec<i64> = tree[0].children.iter().map(|n| n.forum.id).collect();
    assert_eq!(children, vec![7, 8]);
}

#[tokio::test]
async fn test_forum_upsert_overwrites() {
    let (db, _temp_dir) = setup_db().await;
    upsert_forums(db.pool(), &[forum(7, None)]).await.unwrap();
    let renamed = NewForum {
        name: "Videos".to_string(),
        description: Some("All of them".to_string()),
        ..forum(7, Some(1))
    };
    upsert_forums(db.pool(), &[renamed]).await.unwrap();

    let summaries = forum_summaries(db.pool()).await.unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].name, "Videos");
    assert_eq!(summaries[0].parent_id, Some(1));
}

#[tokio::test]
async fn test_user_stub_never_overwrites_profile() {
    let (db, _temp_dir) = setup_db().await;

    insert_user_stubs(db.pool(), &[UserStub { id: 55, name: "Member".to_string() }])
        .await
        .unwrap();
    upsert_users(db.pool(), &[full_user(55, "Member")]).await.unwrap();
    insert_user_stubs(db.pool(), &[UserStub { id: 55, name: "Stale".to_string() }])
        .await
        .unwrap();

    let user = get_user(db.pool(), 55).await.unwrap().unwrap();
    assert_eq!(user.name, "Member");
    assert_eq!(user.location.as_deref(), Some("Victoria"));
    assert_eq!(user.avatar_width, Some(90));
}

#[tokio::test]
async fn test_topic_created_only_once() {
    let (db, _temp_dir) = setup_db().await;
    upsert_topic_listings(db.pool(), &[listing(123, 7, 55)]).await.unwrap();

    let seed = TopicSeed {
        id: 123,
        forum_id: 2,
        name: "Different".to_string(),
        date_created: "2020-01-01 00:00:00".to_string(),
        author_user_id: 1,
    };
    assert!(!create_topic_if_absent(db.pool(), &seed).await.unwrap());

    let topic = get_topic(db.pool(), 123).await.unwrap().unwrap();
    assert_eq!(topic.forum_id, 7);
    assert_eq!(topic.name, "Topic 123");

    let fresh = TopicSeed { id: 124, ..seed };
    assert!(create_topic_if_absent(db.pool(), &fresh).await.unwrap());
}

#[tokio::test]
async fn test_listing_keeps_latest_pointer() {
    let (db, _temp_dir) = setup_db().await;
    upsert_topic_listings(db.pool(), &[listing(5, 7, 55)]).await.unwrap();
    advance_latest_post(db.pool(), 5, "2013-04-04 09:30:00", 1002)
        .await
        .unwrap();

    let relisted = TopicListing {
        is_pinned: true,
        ..listing(5, 7, 55)
    };
    upsert_topic_listings(db.pool(), &[relisted]).await.unwrap();

    let topic = get_topic(db.pool(), 5).await.unwrap().unwrap();
    assert!(topic.is_pinned);
    assert_eq!(topic.latest_post_id, Some(1002));
}

#[tokio::test]
async fn test_latest_post_only_moves_forward() {
    let (db, _temp_dir) = setup_db().await;
    upsert_topic_listings(db.pool(), &[listing(5, 7, 55)]).await.unwrap();

    assert!(advance_latest_post(db.pool(), 5, "2013-04-04 09:30:00", 1002).await.unwrap());
    assert!(!advance_latest_post(db.pool(), 5, "2013-04-03 12:00:00", 1001).await.unwrap());
    assert!(!advance_latest_post(db.pool(), 5, "2013-04-04 09:30:00", 1003).await.unwrap());

    let topic = get_topic(db.pool(), 5).await.unwrap().unwrap();
    assert_eq!(topic.latest_post_id, Some(1002));
    assert_eq!(topic.latest_post_date.as_deref(), Some("2013-04-04 09:30:00"));
}

#[tokio::test]
async fn test_posts_overwrite_and_page() {
    let (db, _temp_dir) = setup_db().await;
    upsert_posts(
        db.pool(),
        &[
            post(2, 5, 55, "2013-04-04 09:30:00"),
            post(1, 5, 55, "2013-04-03 12:00:00"),
            post(3, 5, 56, "2013-04-05 10:00:00"),
        ],
    )
    .await
    .unwrap();
    let edited = NewPost {
        body: "<p>edited</p>".to_string(),
        ..post(1, 5, 55, "2013-04-03 12:00:00")
    };
    upsert_posts(db.pool(), &[edited]).await.unwrap();

    let first_page = topic_posts(db.pool(), 5, 2, 0).await.unwrap();
    let ids: Vec<i64> = first_page.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![1, 2]);
    assert_eq!(first_page[0].body, "<p>edited</p>");

    let second_page = topic_posts(db.pool(), 5, 2, 2).await.unwrap();
    assert_eq!(second_page.len(), 1);
    assert_eq!(entity_counts(db.pool()).await.unwrap().posts, 3);
}

#[tokio::test]
async fn test_renderer_aggregates() {
    let (db, _temp_dir) = setup_db().await;
    upsert_forums(db.pool(), &[forum(1, None), forum(7, Some(1))]).await.unwrap();
    upsert_users(db.pool(), &[full_user(55, "Member"), full_user(56, "Other")])
        .await
        .unwrap();
    upsert_topic_listings(db.pool(), &[listing(5, 7, 55), listing(6, 7, 56)])
        .await
        .unwrap();
    upsert_posts(
        db.pool(),
        &[
            post(1, 5, 55, "2013-04-03 12:00:00"),
            post(2, 5, 56, "2013-04-04 09:30:00"),
            post(3, 5, 55, "2013-04-05 10:00:00"),
        ],
    )
    .await
    .unwrap();

    let summaries = forum_summaries(db.pool()).await.unwrap();
    let videos = summaries.iter().find(|s| s.id == 7).unwrap();
    assert_eq!(videos.topic_count, 2);
    assert_eq!(videos.post_count, 3);

    let topics = forum_topics(db.pool(), 7).await.unwrap();
    let five = topics.iter().find(|t| t.id == 5).unwrap();
    assert_eq!(five.post_count, 3);
    assert_eq!(five.author_name.as_deref(), Some("Member"));

    let posters = posting_users(db.pool()).await.unwrap();
    let member = posters.iter().find(|u| u.id == 55).unwrap();
    assert_eq!(member.post_count, 2);

    let empty = topics_without_posts(db.pool()).await.unwrap();
    assert_eq!(empty.len(), 1);
    assert_eq!(empty[0].id, 6);
    assert_eq!(empty[0].forum_id, 7);
}

#[tokio::test]
async fn test_asset_mapping_is_write_once() {
    let (db, _temp_dir) = setup_db().await;
    let url = "../../images/foo.gif".to_string();

    upsert_assets(
        db.pool(),
        &[Asset {
            url: url.clone(),
            file_name: None,
            is_fetched: false,
        }],
    )
    .await
    .unwrap();
    upsert_assets(
        db.pool(),
        &[Asset {
            url: url.clone(),
            file_name: Some("first.gif".to_string()),
            is_fetched: true,
        }],
    )
    .await
    .unwrap();
    upsert_assets(
        db.pool(),
        &[Asset {
            url: url.clone(),
            file_name: Some("second.gif".to_string()),
            is_fetched: false,
        }],
    )
    .await
    .unwrap();

    let assets = list_assets(db.pool()).await.unwrap();
    assert_eq!(assets.len(), 1);
    assert_eq!(assets[0].resolved_file(), Some("first.gif"));
}
