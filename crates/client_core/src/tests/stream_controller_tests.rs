use super::*;
use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use shared::domain::{BookId, Image, ImageId, RowId, SortOrder, ViewerMode};
use tokio::{sync::Mutex, time::Instant};

use crate::{
    source::{Page, PageRequest},
    stream::StreamPhase,
    DEFAULT_COOLDOWN,
};

#[derive(Default)]
struct ScriptedSource {
    requests: Mutex<Vec<(PageRequest, Instant)>>,
    fail_all: bool,
    stall: bool,
    dropped: Arc<AtomicBool>,
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

fn image(rowid: i64) -> Image {
    Image {
        rowid: RowId(rowid),
        id: ImageId::new(rowid.to_string()),
        book_id: BookId(1),
        server: "1".into(),
        secret: "s".into(),
        original_secret: "o".into(),
        width: 4,
        height: 3,
        faves: 0,
        views: 0,
        comments: 0,
    }
}

#[async_trait]
impl DataSource for ScriptedSource {
    fn order(&self) -> SortOrder {
        SortOrder::STORAGE
    }

    async fn fetch_page(&self, request: PageRequest) -> Result<Page, FetchError> {
        let first = request
            .cursor
            .as_ref()
            .map(|cursor| cursor.rowid.0 + 1)
            .unwrap_or(1);
        self.requests
            .lock()
            .await
            .push((request.clone(), Instant::now()));

        if self.stall {
            let _flag = DropFlag(Arc::clone(&self.dropped));
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.fail_all {
            return Err(FetchError::Transport("connection refused".into()));
        }

        let images: Vec<_> = (first..first + i64::from(request.limit)).map(image).collect();
        let cursor = images.last().map(Image::cursor);
        Ok(Page { images, cursor })
    }
}

fn collection() -> Collection {
    Collection::Mode(ViewerMode::Random)
}

#[tokio::test(start_paused = true)]
async fn second_range_waits_for_cooldown_and_resumes_from_cursor() {
    let source = Arc::new(ScriptedSource::default());
    let controller = StreamController::spawn(collection(), source.clone(), ControllerConfig::default());
    let mut snapshots = controller.subscribe();

    controller.request_range(0, 20);
    snapshots
        .wait_for(|snapshot| snapshot.items.len() == 20)
        .await
        .expect("first page");
    let c1 = controller.snapshot().cursor.expect("cursor after first page");

    controller.request_range(10, 20);
    snapshots
        .wait_for(|snapshot| snapshot.items.len() == 30)
        .await
        .expect("second page");

    let requests = source.requests.lock().await;
    assert_eq!(requests.len(), 2);
    assert_eq!(
        requests[0].0,
        PageRequest {
            limit: 20,
            cursor: None,
            initial: true
        }
    );
    assert_eq!(
        requests[1].0,
        PageRequest {
            limit: 10,
            cursor: Some(c1),
            initial: false
        }
    );
    assert!(requests[1].1 - requests[0].1 >= DEFAULT_COOLDOWN);
}

#[tokio::test(start_paused = true)]
async fn covered_ranges_issue_no_fetches() {
    let source = Arc::new(ScriptedSource::default());
    let controller = StreamController::spawn(collection(), source.clone(), ControllerConfig::default());
    let mut snapshots = controller.subscribe();

    controller.request_range(0, 20);
    controller.request_range(5, 10);
    controller.request_range(0, 20);
    snapshots
        .wait_for(|snapshot| snapshot.items.len() == 20 && snapshot.phase == StreamPhase::Cooldown)
        .await
        .expect("page");
    controller.request_range(3, 7);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(source.requests.lock().await.len(), 1);
    assert_eq!(controller.snapshot().phase, StreamPhase::Idle);
}

#[tokio::test(start_paused = true)]
async fn failed_fetch_is_reported_once() {
    let source = Arc::new(ScriptedSource {
        fail_all: true,
        ..ScriptedSource::default()
    });
    let controller = StreamController::spawn(collection(), source.clone(), ControllerConfig::default());
    let mut errors = controller.subscribe_errors();
    let mut snapshots = controller.subscribe();

    controller.request_range(0, 20);
    let err = errors.recv().await.expect("error");
    assert_eq!(err, FetchError::Transport("connection refused".into()));
    snapshots
        .wait_for(|snapshot| snapshot.phase == StreamPhase::Errored)
        .await
        .expect("errored");

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(errors.try_recv().is_err());
    assert!(controller.snapshot().items.is_empty());
    assert_eq!(source.requests.lock().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn dropping_controller_aborts_outstanding_fetch() {
    let source = Arc::new(ScriptedSource {
        stall: true,
        ..ScriptedSource::default()
    });
    let controller = StreamController::spawn(collection(), source.clone(), ControllerConfig::default());
    let mut snapshots = controller.subscribe();

    controller.request_range(0, 20);
    snapshots
        .wait_for(|snapshot| snapshot.phase == StreamPhase::Fetching)
        .await
        .expect("fetching");
    while source.requests.lock().await.is_empty() {
        tokio::task::yield_now().await;
    }

    drop(controller);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(source.dropped.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn spawn_from_cursor_starts_inclusive() {
    let source = Arc::new(ScriptedSource::default());
    let resume_at = image(41).cursor();
    let controller = StreamController::spawn_from(
        collection(),
        source.clone(),
        ControllerConfig::default(),
        resume_at.clone(),
    );
    let mut snapshots = controller.subscribe();

    controller.request_range(0, 5);
    snapshots
        .wait_for(|snapshot| snapshot.items.len() == 5)
        .await
        .expect("page");

    let requests = source.requests.lock().await;
    assert_eq!(requests[0].0.cursor, Some(resume_at));
    assert!(requests[0].0.initial);
}
