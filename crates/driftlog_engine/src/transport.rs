//! Transport abstraction between the engine and the sync server.

use std::collections::VecDeque;

use parking_lot::Mutex;

use driftlog_protocol::{
    ActivityBatchRequest, ActivityBatchResponse, EntryListRequest, EntrySyncRequest,
    EntrySyncResponse, RemoteEntry, SyncToken,
};

use crate::error::{SyncError, SyncResult};

/// The wire seam. The engine talks to the server exclusively through
/// this trait, so tests can substitute a [`MockTransport`].
pub trait SyncTransport: Send + Sync {
    /// Pushes a batch of activity records.
    fn push_activities(
        &self,
        token: &SyncToken,
        request: &ActivityBatchRequest,
    ) -> SyncResult<ActivityBatchResponse>;

    /// Runs one version/hash round trip for the journal collection.
    fn sync_entries(
        &self,
        token: &SyncToken,
        request: &EntrySyncRequest,
    ) -> SyncResult<EntrySyncResponse>;

    /// Lists remote entries for the timestamp protocol.
    fn list_entries(
        &self,
        token: &SyncToken,
        request: &EntryListRequest,
    ) -> SyncResult<Vec<RemoteEntry>>;

    /// Cheap reachability probe consulted before automatic cycles.
    fn is_reachable(&self) -> bool {
        true
    }
}

#[derive(Default)]
struct MockState {
    activity_responses: VecDeque<SyncResult<ActivityBatchResponse>>,
    entry_responses: VecDeque<SyncResult<EntrySyncResponse>>,
    list_responses: VecDeque<SyncResult<Vec<RemoteEntry>>>,
    fail_pushes: u32,
    pushed: Vec<ActivityBatchRequest>,
    entry_requests: Vec<EntrySyncRequest>,
    unreachable: bool,
}

/// Scriptable in-memory transport for tests.
///
/// Responses are consumed FIFO per operation; when a queue runs dry the
/// mock answers with a plain success. `fail_next_pushes` injects
/// retryable transport failures ahead of whatever is queued, which is
/// how retry paths are exercised.
#[derive(Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
}

impl MockTransport {
    /// Creates a mock that answers every call with success.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a batch-push response.
    pub fn queue_activity_response(&self, response: ActivityBatchResponse) {
        self.state.lock().activity_responses.push_back(Ok(response));
    }

    /// Queues a batch-push error.
    pub fn queue_activity_error(&self, error: SyncError) {
        self.state.lock().activity_responses.push_back(Err(error));
    }

    /// Queues an entry-sync response.
    pub fn queue_entry_response(&self, response: EntrySyncResponse) {
        self.state.lock().entry_responses.push_back(Ok(response));
    }

    /// Queues an entry-sync error.
    pub fn queue_entry_error(&self, error: SyncError) {
        self.state.lock().entry_responses.push_back(Err(error));
    }

    /// Queues an entry-list response.
    pub fn queue_list_response(&self, entries: Vec<RemoteEntry>) {
        self.state.lock().list_responses.push_back(Ok(entries));
    }

    /// Makes the next `n` pushes fail with a retryable transport error.
    pub fn fail_next_pushes(&self, n: u32) {
        self.state.lock().fail_pushes = n;
    }

    /// Toggles the reachability probe.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unreachable = unreachable;
    }

    /// Batch requests received so far, in order.
    pub fn pushed_batches(&self) -> Vec<ActivityBatchRequest> {
        self.state.lock().pushed.clone()
    }

    /// Entry-sync requests received so far, in order.
    pub fn entry_requests(&self) -> Vec<EntrySyncRequest> {
        self.state.lock().entry_requests.clone()
    }
}

impl SyncTransport for MockTransport {
    fn push_activities(
        &self,
        _token: &SyncToken,
        request: &ActivityBatchRequest,
    ) -> SyncResult<ActivityBatchResponse> {
        let mut state = self.state.lock();
        if state.fail_pushes > 0 {
            state.fail_pushes -= 1;
            return Err(SyncError::transport_retryable("mock transport failure"));
        }
        state.pushed.push(request.clone());
        match state.activity_responses.pop_front() {
            Some(response) => response,
            None => Ok(ActivityBatchResponse::success(
                request.activities.len(),
                request.activities.len(),
                "mock-checkpoint",
            )),
        }
    }

    fn sync_entries(
        &self,
        _token: &SyncToken,
        request: &EntrySyncRequest,
    ) -> SyncResult<EntrySyncResponse> {
        let mut state = self.state.lock();
        state.entry_requests.push(request.clone());
        match state.entry_responses.pop_front() {
            Some(response) => response,
            None => Ok(EntrySyncResponse::in_sync(
                request.frontend_version,
                request.frontend_hash.clone(),
            )),
        }
    }

    fn list_entries(
        &self,
        _token: &SyncToken,
        _request: &EntryListRequest,
    ) -> SyncResult<Vec<RemoteEntry>> {
        let mut state = self.state.lock();
        match state.list_responses.pop_front() {
            Some(response) => response,
            None => Ok(Vec::new()),
        }
    }

    fn is_reachable(&self) -> bool {
        !self.state.lock().unreachable
    }
}
