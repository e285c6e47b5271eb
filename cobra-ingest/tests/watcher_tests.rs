//! Integration tests for the feed watcher
//!
//! Discovery idempotence, per-channel failure isolation, resume sweeps and
//! backfill through the same insert path.

mod helpers;

use cobra_common::events::{EventBus, IngestEvent};
use cobra_ingest::clients::SourceError;
use cobra_ingest::db::{embeddings, enrichment, videos};
use cobra_ingest::pipeline::work_queue;
use cobra_ingest::watcher::FeedWatcher;
use helpers::*;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_second_poll_with_unchanged_feed_inserts_nothing() {
    let (_tmp, pool) = create_test_db().await;
    let feed = Arc::new(FakeFeed::default());
    feed.set_entries("C1", vec![entry("V1", "First", 0), entry("V2", "Second", 5)]);

    let (queue, _receiver) = work_queue(16);
    let config = test_config(vec![channel("C1", "Channel One")]);
    let watcher = FeedWatcher::new(pool.clone(), feed.clone(), queue.clone(), EventBus::new(16), &config)
        .await
        .unwrap();
    let cancel = CancellationToken::new();

    let first = watcher.poll_once(&cancel).await;
    assert_eq!(first.channels_polled, 1);
    assert_eq!(first.new_videos.len(), 2);
    assert_eq!(first.enqueued, 2);
    assert_eq!(videos::count_videos(&pool).await.unwrap(), 2);

    let second = watcher.poll_once(&cancel).await;
    assert!(second.new_videos.is_empty());
    assert_eq!(second.enqueued, 0);
    assert_eq!(videos::count_videos(&pool).await.unwrap(), 2);
    assert_eq!(queue.in_flight(), 2);
}

#[tokio::test]
async fn test_new_entries_inserted_oldest_first() {
    let (_tmp, pool) = create_test_db().await;
    let feed = Arc::new(FakeFeed::default());
    // Feeds list newest first
    feed.set_entries("C1", vec![entry("NEW", "Newer", 30), entry("OLD", "Older", 0)]);

    let (queue, _receiver) = work_queue(16);
    let config = test_config(vec![channel("C1", "Channel One")]);
    let watcher = FeedWatcher::new(pool.clone(), feed, queue, EventBus::new(16), &config)
        .await
        .unwrap();

    let report = watcher.poll_once(&CancellationToken::new()).await;
    let old = videos::get_video_by_youtube_id(&pool, "OLD").await.unwrap().unwrap();
    let new = videos::get_video_by_youtube_id(&pool, "NEW").await.unwrap().unwrap();
    assert!(old.id < new.id);
    assert_eq!(report.new_videos, vec![old.id, new.id]);
    assert_eq!(old.youtube_created_at, t0());
    assert_eq!(
        new.thumbnail_url.as_deref(),
        Some("https://i.ytimg.com/vi/NEW/hqdefault.jpg")
    );
}

#[tokio::test]
async fn test_failing_channel_does_not_block_others() {
    let (_tmp, pool) = create_test_db().await;
    let feed = Arc::new(FakeFeed::default());
    feed.fail_channel("BROKEN", SourceError::transient("HTTP 503"));
    feed.set_entries("C1", vec![entry("V1", "Only", 0)]);

    let (queue, _receiver) = work_queue(16);
    let config = test_config(vec![channel("BROKEN", "Broken"), channel("C1", "Channel One")]);
    let watcher = FeedWatcher::new(pool.clone(), feed.clone(), queue, EventBus::new(16), &config)
        .await
        .unwrap();

    let report = watcher.poll_once(&CancellationToken::new()).await;
    assert_eq!(report.channels_polled, 2);
    assert_eq!(report.channels_failed, 1);
    assert_eq!(report.new_videos.len(), 1);
    // Transient failures use the whole retry budget
    assert_eq!(feed.calls("BROKEN"), config.watcher.fetch_max_attempts);

    // Next tick tries the broken channel again
    watcher.poll_once(&CancellationToken::new()).await;
    assert_eq!(feed.calls("BROKEN"), 2 * config.watcher.fetch_max_attempts);
}

#[tokio::test]
async fn test_permanent_feed_error_is_not_retried() {
    let (_tmp, pool) = create_test_db().await;
    let feed = Arc::new(FakeFeed::default());
    feed.fail_channel("GONE", SourceError::permanent("HTTP 404"));

    let (queue, _receiver) = work_queue(16);
    let config = test_config(vec![channel("GONE", "Gone")]);
    let watcher = FeedWatcher::new(pool.clone(), feed.clone(), queue, EventBus::new(16), &config)
        .await
        .unwrap();

    let report = watcher.poll_once(&CancellationToken::new()).await;
    assert_eq!(report.channels_failed, 1);
    assert_eq!(feed.calls("GONE"), 1);
}

#[tokio::test]
async fn test_discovery_emits_event() {
    let (_tmp, pool) = create_test_db().await;
    let feed = Arc::new(FakeFeed::default());
    feed.set_entries("C1", vec![entry("V1", "Hello", 0)]);

    let bus = EventBus::new(16);
    let mut rx = bus.subscribe();
    let (queue, _receiver) = work_queue(16);
    let config = test_config(vec![channel("C1", "Channel One")]);
    let watcher = FeedWatcher::new(pool.clone(), feed, queue, bus, &config)
        .await
        .unwrap();

    watcher.poll_once(&CancellationToken::new()).await;
    match rx.recv().await.unwrap() {
        IngestEvent::VideoDiscovered {
            youtube_id,
            channel_youtube_id,
            title,
            ..
        } => {
            assert_eq!(youtube_id, "V1");
            assert_eq!(channel_youtube_id, "C1");
            assert_eq!(title, "Hello");
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_resume_sweep_enqueues_only_unfinished_videos() {
    let (_tmp, pool) = create_test_db().await;
    let feed = Arc::new(FakeFeed::default());
    feed.set_entries(
        "C1",
        vec![entry("DONE", "Done", 0), entry("HALF", "Half", 1), entry("NEW", "New", 2)],
    );

    let config = test_config(vec![channel("C1", "Channel One")]);
    {
        let (queue, _receiver) = work_queue(16);
        let watcher = FeedWatcher::new(pool.clone(), feed.clone(), queue, EventBus::new(16), &config)
            .await
            .unwrap();
        watcher.poll_once(&CancellationToken::new()).await;
    }

    let done = videos::get_video_by_youtube_id(&pool, "DONE").await.unwrap().unwrap();
    let half = videos::get_video_by_youtube_id(&pool, "HALF").await.unwrap().unwrap();
    let new = videos::get_video_by_youtube_id(&pool, "NEW").await.unwrap().unwrap();

    enrichment::replace_transcript(&pool, done.id, "text").await.unwrap();
    enrichment::replace_summary(
        &pool,
        done.id,
        enrichment::SummaryWrite {
            summary: "s",
            topics: &[],
            quotes: &[],
        },
    )
    .await
    .unwrap();
    embeddings::store_embedding(&pool, done.id, &[1.0, 0.0]).await.unwrap();
    cobra_ingest::db::pipeline_state::mark_notified(&pool, done.id).await.unwrap();
    enrichment::replace_transcript(&pool, half.id, "text").await.unwrap();

    // Fresh process: new queue, nothing claimed
    let (queue, _receiver) = work_queue(16);
    let watcher = FeedWatcher::new(pool.clone(), feed, queue.clone(), EventBus::new(16), &config)
        .await
        .unwrap();
    let queued = watcher.resume_sweep().await.unwrap();

    assert_eq!(queued, 2);
    assert!(queue.is_claimed(half.id));
    assert!(queue.is_claimed(new.id));
    assert!(!queue.is_claimed(done.id));

    // Already queued videos are not queued twice
    assert_eq!(watcher.resume_sweep().await.unwrap(), 0);
}

#[tokio::test]
async fn test_backfill_uses_idempotent_insert_path() {
    let (_tmp, pool) = create_test_db().await;
    let feed = Arc::new(FakeFeed::default());
    let (queue, _receiver) = work_queue(16);
    let config = test_config(vec![channel("C1", "Channel One")]);
    let watcher = FeedWatcher::new(pool.clone(), feed.clone(), queue, EventBus::new(16), &config)
        .await
        .unwrap();
    let cancel = CancellationToken::new();

    // Regular polling already saw the newest upload
    feed.set_entries("C1", vec![entry("V3", "Three", 20)]);
    watcher.poll_once(&cancel).await;
    feed.set_entries(
        "C1",
        vec![entry("V3", "Three", 20), entry("V2", "Two", 10), entry("V1", "One", 0)],
    );

    let report = watcher.backfill(&*feed, "C1", 50, &cancel).await.unwrap();
    assert_eq!(report.channels_polled, 1);
    assert_eq!(report.new_videos.len(), 2);
    assert_eq!(videos::count_videos(&pool).await.unwrap(), 3);

    let again = watcher.backfill(&*feed, "C1", 50, &cancel).await.unwrap();
    assert!(again.new_videos.is_empty());
}

#[tokio::test]
async fn test_backfill_of_unconfigured_channel_fails() {
    let (_tmp, pool) = create_test_db().await;
    let feed = Arc::new(FakeFeed::default());
    let (queue, _receiver) = work_queue(16);
    let config = test_config(vec![channel("C1", "Channel One")]);
    let watcher = FeedWatcher::new(pool.clone(), feed.clone(), queue, EventBus::new(16), &config)
        .await
        .unwrap();

    let err = watcher
        .backfill(&*feed, "UNKNOWN", 10, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, cobra_common::Error::NotFound(_)));
}

#[tokio::test]
async fn test_channels_registered_once() {
    let (_tmp, pool) = create_test_db().await;
    let feed = Arc::new(FakeFeed::default());
    let config = test_config(vec![channel("C1", "Channel One"), channel("C2", "Channel Two")]);

    for _ in 0..2 {
        let (queue, _receiver) = work_queue(4);
        let watcher = FeedWatcher::new(pool.clone(), feed.clone(), queue, EventBus::new(4), &config)
            .await
            .unwrap();
        assert_eq!(watcher.channels().len(), 2);
    }
    assert_eq!(count_all(&pool, "channel").await, 2);
}
