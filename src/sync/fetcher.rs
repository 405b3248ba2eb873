use std::sync::Arc;
use std::time::Duration;

use super::generation::{Generation, Tagged};
use crate::remote::{Page, PageRequest, RemoteDataSource, RemoteError};

/// A page result tagged with the generation it was requested under.
pub type PageResponse = Tagged<PageOutcome>;

/// What came back for one [`PageRequest`].
#[derive(Debug)]
pub struct PageOutcome {
    pub request: PageRequest,
    pub result: Result<Page, RemoteError>,
}

/// Wraps list calls so every result carries its issuing generation.
///
/// The fetcher holds no epoch state of its own; deciding whether a result is
/// still wanted is the caller's job. Calls that exceed `timeout` resolve to
/// [`RemoteError::Timeout`], still tagged, so the staleness check applies to
/// timeouts too.
pub struct SequencedFetcher<R> {
    remote: Arc<R>,
    timeout: Duration,
}

impl<R: RemoteDataSource> SequencedFetcher<R> {
    pub fn new(remote: Arc<R>, timeout: Duration) -> Self {
        Self { remote, timeout }
    }

    pub fn remote(&self) -> &Arc<R> {
        &self.remote
    }

    pub async fn fetch(&self, request: PageRequest, generation: Generation) -> PageResponse {
        tracing::debug!(
            %generation,
            offset = request.offset,
            limit = request.limit,
            kind = ?request.filter.kind(),
            "Fetching page"
        );

        let call = self
            .remote
            .list_articles(&request.filter, request.limit, request.offset);
        let result = match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    %generation,
                    offset = request.offset,
                    timeout_secs = self.timeout.as_secs(),
                    "Page fetch timed out"
                );
                Err(RemoteError::Timeout(self.timeout.as_secs()))
            }
        };

        Tagged::new(generation, PageOutcome { request, result })
    }
}
