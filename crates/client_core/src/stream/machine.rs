use std::{cmp::Ordering, fmt, sync::Arc};

use shared::domain::{Collection, Cursor, Image, SortOrder};
use tracing::{debug, info, warn};

use super::queue::FetchQueue;
use crate::{
    error::FetchError,
    source::{Page, PageRequest},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamPhase {
    #[default]
    Idle,
    Fetching,
    Cooldown,
    Errored,
}

impl StreamPhase {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Fetching => "fetching",
            Self::Cooldown => "cooldown",
            Self::Errored => "errored",
        }
    }
}

impl fmt::Display for StreamPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything that can move a stream forward.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    RequestRange { start: usize, count: usize },
    PageLoaded(Page),
    PageFailed(FetchError),
    CooldownElapsed,
}

/// Side effects the driver has to carry out after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamCommand {
    Fetch(PageRequest),
    StartCooldown,
    ReportError(FetchError),
}

/// Append-only item sequence, stored as the pages it arrived in so cloning a
/// snapshot never copies images.
#[derive(Debug, Clone, Default)]
pub struct Items {
    pages: Vec<Arc<[Image]>>,
    len: usize,
}

impl Items {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, index: usize) -> Option<&Image> {
        let mut offset = index;
        for page in &self.pages {
            if offset < page.len() {
                return page.get(offset);
            }
            offset -= page.len();
        }
        None
    }

    pub fn iter(&self) -> impl Iterator<Item = &Image> + '_ {
        self.pages.iter().flat_map(|page| page.iter())
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn push_page(&mut self, images: Vec<Image>) {
        if images.is_empty() {
            return;
        }
        self.len += images.len();
        self.pages.push(images.into());
    }
}

/// Read-only view of a stream at one point in time.
#[derive(Debug, Clone)]
pub struct StreamSnapshot {
    pub collection: Collection,
    pub phase: StreamPhase,
    pub items: Items,
    pub cursor: Option<Cursor>,
    /// Number of items requested but not yet delivered.
    pub pending: usize,
    /// The collection ran out; further ranges are ignored.
    pub exhausted: bool,
    pub last_error: Option<FetchError>,
    pub fetches_issued: u64,
}

pub struct StreamMachine {
    collection: Collection,
    order: SortOrder,
    items: Items,
    cursor: Option<Cursor>,
    queue: FetchQueue,
    phase: StreamPhase,
    in_flight: Option<PageRequest>,
    exhausted: bool,
    last_error: Option<FetchError>,
    fetches_issued: u64,
}

impl StreamMachine {
    pub fn new(collection: Collection, order: SortOrder) -> Self {
        Self {
            collection,
            order,
            items: Items::default(),
            cursor: None,
            queue: FetchQueue::new(),
            phase: StreamPhase::Idle,
            in_flight: None,
            exhausted: false,
            last_error: None,
            fetches_issued: 0,
        }
    }

    /// A stream that resumes at `cursor`. Its first page includes the image
    /// the cursor was taken from.
    pub fn resume_from(collection: Collection, order: SortOrder, cursor: Cursor) -> Self {
        let mut machine = Self::new(collection, order);
        machine.cursor = Some(cursor);
        machine
    }

    pub fn collection(&self) -> Collection {
        self.collection
    }

    pub fn phase(&self) -> StreamPhase {
        self.phase
    }

    pub fn items(&self) -> &Items {
        &self.items
    }

    pub fn cursor(&self) -> Option<&Cursor> {
        self.cursor.as_ref()
    }

    pub fn queue(&self) -> &FetchQueue {
        &self.queue
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn snapshot(&self) -> StreamSnapshot {
        StreamSnapshot {
            collection: self.collection,
            phase: self.phase,
            items: self.items.clone(),
            cursor: self.cursor.clone(),
            pending: self.queue.pending_total(),
            exhausted: self.exhausted,
            last_error: self.last_error.clone(),
            fetches_issued: self.fetches_issued,
        }
    }

    pub fn handle(&mut self, event: StreamEvent) -> Vec<StreamCommand> {
        match event {
            StreamEvent::RequestRange { start, count } => self.on_request_range(start, count),
            StreamEvent::PageLoaded(page) => self.on_page_loaded(page),
            StreamEvent::PageFailed(err) => self.on_page_failed(err),
            StreamEvent::CooldownElapsed => self.on_cooldown_elapsed(),
        }
    }

    fn on_request_range(&mut self, start: usize, count: usize) -> Vec<StreamCommand> {
        if self.exhausted {
            debug!(collection = %self.collection, start, count, "stream: collection exhausted, ignoring range");
            return Vec::new();
        }

        let Some(residual) = self.queue.enqueue_residual(self.items.len(), start, count) else {
            debug!(collection = %self.collection, start, count, "stream: range already covered");
            return Vec::new();
        };
        debug!(
            collection = %self.collection,
            start = residual.start,
            count = residual.count,
            phase = %self.phase,
            "stream: queued fetch"
        );

        match self.phase {
            StreamPhase::Idle => self.enter_idle(),
            StreamPhase::Errored => {
                info!(collection = %self.collection, "stream: resuming after error");
                self.last_error = None;
                self.enter_idle()
            }
            StreamPhase::Fetching | StreamPhase::Cooldown => Vec::new(),
        }
    }

    fn on_page_loaded(&mut self, page: Page) -> Vec<StreamCommand> {
        let Some(request) = self.in_flight.take() else {
            warn!(collection = %self.collection, phase = %self.phase, "stream: page arrived with nothing in flight");
            return Vec::new();
        };

        if let Err(err) = self.validate_page(&request, &page) {
            return self.fail_head(err);
        }

        // Keyset order upstream keeps ids unique; a page that does not move
        // the cursor forward was already rejected above.
        let received = page.images.len();
        self.items.push_page(page.images);
        if let Some(cursor) = page.cursor {
            self.cursor = Some(cursor);
        }
        self.queue.pop_head();

        if received < request.limit as usize {
            info!(
                collection = %self.collection,
                total = self.items.len(),
                "stream: reached end of collection"
            );
            self.exhausted = true;
            self.queue.clear();
        }

        debug!(
            collection = %self.collection,
            received,
            total = self.items.len(),
            "stream: page appended"
        );
        self.phase = StreamPhase::Cooldown;
        vec![StreamCommand::StartCooldown]
    }

    fn on_page_failed(&mut self, err: FetchError) -> Vec<StreamCommand> {
        if self.in_flight.take().is_none() {
            warn!(collection = %self.collection, phase = %self.phase, "stream: failure arrived with nothing in flight");
            return Vec::new();
        }
        self.fail_head(err)
    }

    fn on_cooldown_elapsed(&mut self) -> Vec<StreamCommand> {
        if self.phase != StreamPhase::Cooldown {
            debug!(collection = %self.collection, phase = %self.phase, "stream: stray cooldown timer");
            return Vec::new();
        }
        self.enter_idle()
    }

    fn enter_idle(&mut self) -> Vec<StreamCommand> {
        self.phase = StreamPhase::Idle;
        let Some(head) = self.queue.head() else {
            return Vec::new();
        };

        let request = PageRequest {
            limit: u32::try_from(head.count).unwrap_or(u32::MAX),
            cursor: self.cursor.clone(),
            initial: self.items.is_empty(),
        };
        debug!(
            collection = %self.collection,
            limit = request.limit,
            initial = request.initial,
            has_cursor = request.cursor.is_some(),
            "stream: fetching page"
        );
        self.phase = StreamPhase::Fetching;
        self.in_flight = Some(request.clone());
        self.fetches_issued += 1;
        vec![StreamCommand::Fetch(request)]
    }

    /// Drops the failed entry and everything queued behind it; the next
    /// range request re-queues from the current coverage.
    fn fail_head(&mut self, err: FetchError) -> Vec<StreamCommand> {
        self.queue.clear();
        self.phase = StreamPhase::Errored;
        self.last_error = Some(err.clone());
        vec![StreamCommand::ReportError(err)]
    }

    fn validate_page(&self, request: &PageRequest, page: &Page) -> Result<(), FetchError> {
        if page.images.len() > request.limit as usize {
            return Err(FetchError::Protocol(format!(
                "page holds {} images for limit {}",
                page.images.len(),
                request.limit
            )));
        }
        if let (Some(previous), Some(next)) = (self.items_tail_cursor(), page.cursor.as_ref()) {
            if !page.images.is_empty() && next.compare(&previous, self.order) != Ordering::Greater {
                return Err(FetchError::Protocol(
                    "page cursor does not advance past the previous one".to_string(),
                ));
            }
        }
        Ok(())
    }

    // Only cursors taken from fetched items are comparable; a resume cursor
    // is allowed to be re-served once.
    fn items_tail_cursor(&self) -> Option<Cursor> {
        if self.items.is_empty() {
            None
        } else {
            self.cursor.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::domain::{BookId, ImageId, RowId, ViewerMode};

    fn image(rowid: i64) -> Image {
        Image {
            rowid: RowId(rowid),
            id: ImageId::new(format!("img{rowid:04}")),
            book_id: BookId(1),
            server: "1".into(),
            secret: "s".into(),
            original_secret: "o".into(),
            width: 10,
            height: 10,
            faves: 0,
            views: 0,
            comments: 0,
        }
    }

    fn page(first: i64, len: i64) -> Page {
        let images: Vec<_> = (first..first + len).map(image).collect();
        let cursor = images.last().map(Image::cursor);
        Page { images, cursor }
    }

    fn machine() -> StreamMachine {
        StreamMachine::new(Collection::Mode(ViewerMode::Random), SortOrder::STORAGE)
    }

    fn fetches(commands: &[StreamCommand]) -> Vec<PageRequest> {
        commands
            .iter()
            .filter_map(|command| match command {
                StreamCommand::Fetch(request) => Some(request.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn first_range_fetches_initial_page_then_resumes_from_cursor() {
        let mut stream = machine();

        let commands = stream.handle(StreamEvent::RequestRange { start: 0, count: 20 });
        assert_eq!(
            fetches(&commands),
            vec![PageRequest {
                limit: 20,
                cursor: None,
                initial: true
            }]
        );
        assert_eq!(stream.phase(), StreamPhase::Fetching);

        let first = page(1, 20);
        let c1 = first.cursor.clone();
        assert_eq!(
            stream.handle(StreamEvent::PageLoaded(first)),
            vec![StreamCommand::StartCooldown]
        );
        assert_eq!(stream.items().len(), 20);

        assert!(stream
            .handle(StreamEvent::RequestRange { start: 10, count: 20 })
            .is_empty());
        let commands = stream.handle(StreamEvent::CooldownElapsed);
        assert_eq!(
            fetches(&commands),
            vec![PageRequest {
                limit: 10,
                cursor: c1,
                initial: false
            }]
        );
    }

    #[test]
    fn range_covered_by_in_flight_fetch_is_ignored() {
        let mut stream = machine();
        stream.handle(StreamEvent::RequestRange { start: 0, count: 20 });
        assert!(stream
            .handle(StreamEvent::RequestRange { start: 5, count: 10 })
            .is_empty());
        assert_eq!(stream.queue().len(), 1);
    }

    #[test]
    fn one_fetch_per_disjoint_residual() {
        let mut stream = machine();
        let mut issued = 0;
        let mut next_row = 1;

        issued += fetches(&stream.handle(StreamEvent::RequestRange { start: 0, count: 10 })).len();
        stream.handle(StreamEvent::RequestRange { start: 5, count: 10 });
        stream.handle(StreamEvent::RequestRange { start: 0, count: 15 });
        stream.handle(StreamEvent::RequestRange { start: 20, count: 5 });

        while stream.phase() == StreamPhase::Fetching {
            let limit = stream.queue().head().map(|head| head.count).unwrap_or_default() as i64;
            stream.handle(StreamEvent::PageLoaded(page(next_row, limit)));
            next_row += limit;
            issued += fetches(&stream.handle(StreamEvent::CooldownElapsed)).len();
        }

        // [0,10), [10,15), [15,25)
        assert_eq!(issued, 3);
        assert_eq!(stream.snapshot().fetches_issued, 3);
        assert_eq!(stream.items().len(), 25);
        assert_eq!(stream.phase(), StreamPhase::Idle);
    }

    #[test]
    fn cursors_advance_strictly_across_pages() {
        let mut stream = machine();
        let mut cursors = Vec::new();
        let mut next_row = 1;
        for round in 0..4 {
            stream.handle(StreamEvent::RequestRange {
                start: round * 5,
                count: 5,
            });
            if stream.phase() == StreamPhase::Cooldown {
                stream.handle(StreamEvent::CooldownElapsed);
            }
            stream.handle(StreamEvent::PageLoaded(page(next_row, 5)));
            next_row += 5;
            cursors.push(stream.cursor().cloned().expect("cursor"));
        }
        assert!(cursors
            .windows(2)
            .all(|pair| pair[0].compare(&pair[1], SortOrder::STORAGE) == Ordering::Less));
    }

    #[test]
    fn failure_keeps_items_and_surfaces_error_once() {
        let mut stream = machine();
        stream.handle(StreamEvent::RequestRange { start: 0, count: 5 });
        stream.handle(StreamEvent::PageLoaded(page(1, 5)));
        stream.handle(StreamEvent::RequestRange { start: 5, count: 5 });
        stream.handle(StreamEvent::CooldownElapsed);
        let before = stream.cursor().cloned();

        let err = FetchError::Transport("connection reset".into());
        assert_eq!(
            stream.handle(StreamEvent::PageFailed(err.clone())),
            vec![StreamCommand::ReportError(err)]
        );
        assert_eq!(stream.phase(), StreamPhase::Errored);
        assert_eq!(stream.items().len(), 5);
        assert_eq!(stream.cursor().cloned(), before);
        assert!(stream.queue().is_empty());

        assert!(stream
            .handle(StreamEvent::PageFailed(FetchError::Transport("late".into())))
            .is_empty());
    }

    #[test]
    fn new_range_after_error_resumes_fetching() {
        let mut stream = machine();
        stream.handle(StreamEvent::RequestRange { start: 0, count: 5 });
        stream.handle(StreamEvent::PageFailed(FetchError::Query("bad".into())));

        let commands = stream.handle(StreamEvent::RequestRange { start: 0, count: 5 });
        assert_eq!(
            fetches(&commands),
            vec![PageRequest {
                limit: 5,
                cursor: None,
                initial: true
            }]
        );
        assert!(stream.snapshot().last_error.is_none());
    }

    #[test]
    fn failure_drops_queued_work_so_the_range_can_be_requested_again() {
        let mut stream = machine();
        stream.handle(StreamEvent::RequestRange { start: 0, count: 20 });
        stream.handle(StreamEvent::RequestRange { start: 20, count: 20 });
        stream.handle(StreamEvent::PageFailed(FetchError::Transport("reset".into())));
        assert_eq!(stream.phase(), StreamPhase::Errored);
        assert!(stream.queue().is_empty());
        assert_eq!(stream.snapshot().pending, 0);

        let commands = stream.handle(StreamEvent::RequestRange { start: 0, count: 20 });
        assert_eq!(
            fetches(&commands),
            vec![PageRequest {
                limit: 20,
                cursor: None,
                initial: true
            }]
        );
        assert_eq!(stream.phase(), StreamPhase::Fetching);
    }

    #[test]
    fn full_page_is_appended_in_full() {
        let mut stream = machine();
        stream.handle(StreamEvent::RequestRange { start: 0, count: 4 });
        stream.handle(StreamEvent::PageLoaded(page(1, 4)));
        assert_eq!(stream.items().len(), 4);
        assert_eq!(stream.snapshot().pending, 0);
        assert!(!stream.is_exhausted());
        assert_eq!(stream.phase(), StreamPhase::Cooldown);
    }

    #[test]
    fn short_page_exhausts_stream() {
        let mut stream = machine();
        stream.handle(StreamEvent::RequestRange { start: 0, count: 10 });
        stream.handle(StreamEvent::RequestRange { start: 10, count: 10 });
        stream.handle(StreamEvent::PageLoaded(page(1, 4)));
        assert!(stream.is_exhausted());
        assert!(stream.queue().is_empty());

        assert!(stream.handle(StreamEvent::CooldownElapsed).is_empty());
        assert!(stream
            .handle(StreamEvent::RequestRange { start: 0, count: 50 })
            .is_empty());
        assert_eq!(stream.phase(), StreamPhase::Idle);
    }

    #[test]
    fn empty_page_keeps_previous_cursor() {
        let mut stream = machine();
        stream.handle(StreamEvent::RequestRange { start: 0, count: 3 });
        stream.handle(StreamEvent::PageLoaded(page(1, 3)));
        let cursor = stream.cursor().cloned();
        stream.handle(StreamEvent::RequestRange { start: 3, count: 3 });
        stream.handle(StreamEvent::CooldownElapsed);
        stream.handle(StreamEvent::PageLoaded(Page::default()));
        assert_eq!(stream.cursor().cloned(), cursor);
        assert!(stream.is_exhausted());
    }

    #[test]
    fn oversized_or_backwards_page_is_a_protocol_error() {
        let mut stream = machine();
        stream.handle(StreamEvent::RequestRange { start: 0, count: 2 });
        let commands = stream.handle(StreamEvent::PageLoaded(page(1, 3)));
        assert!(matches!(
            commands.as_slice(),
            [StreamCommand::ReportError(FetchError::Protocol(_))]
        ));

        let mut stream = machine();
        stream.handle(StreamEvent::RequestRange { start: 0, count: 2 });
        stream.handle(StreamEvent::PageLoaded(page(10, 2)));
        stream.handle(StreamEvent::RequestRange { start: 2, count: 2 });
        stream.handle(StreamEvent::CooldownElapsed);
        let commands = stream.handle(StreamEvent::PageLoaded(page(1, 2)));
        assert!(matches!(
            commands.as_slice(),
            [StreamCommand::ReportError(FetchError::Protocol(_))]
        ));
        assert_eq!(stream.items().len(), 2);
    }

    #[test]
    fn resumed_stream_sends_cursor_with_initial_flag() {
        let cursor = image(42).cursor();
        let mut stream = StreamMachine::resume_from(
            Collection::Book(BookId(1)),
            SortOrder::STORAGE,
            cursor.clone(),
        );
        let commands = stream.handle(StreamEvent::RequestRange { start: 0, count: 5 });
        assert_eq!(
            fetches(&commands),
            vec![PageRequest {
                limit: 5,
                cursor: Some(cursor),
                initial: true
            }]
        );
        // The cursor's own image comes back first; that is not a regression.
        assert_eq!(
            stream.handle(StreamEvent::PageLoaded(page(42, 5))),
            vec![StreamCommand::StartCooldown]
        );
    }

    #[test]
    fn items_index_across_pages() {
        let mut items = Items::default();
        items.push_page((1..4).map(image).collect());
        items.push_page(Vec::new());
        items.push_page((4..6).map(image).collect());
        assert_eq!(items.len(), 5);
        assert_eq!(items.page_count(), 2);
        assert_eq!(items.get(3).map(|image| image.rowid), Some(RowId(4)));
        assert!(items.get(5).is_none());
        assert_eq!(items.iter().count(), 5);
    }
}
