//! Shared types and streaming infrastructure for the YouTube API client.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};
use tokio_stream::Stream;

/// One page of a list endpoint: its items and the cursor of the page after it, if any.
#[derive(Debug)]
pub struct Page<T> {
    pub items: VecDeque<T>,
    pub next_cursor: Option<String>,
}

type OneFuturePage<'a, F, T> = Pin<Box<dyn Future<Output = Result<(F, Page<T>)>> + 'a + Send>>;

/// A paginated stream that walks a YouTube API list endpoint to its end.
///
/// This stream yields items one by one, fetching the next page when the current one is
/// exhausted. The first page is requested with an empty cursor. Each page's `nextPageToken` is
/// handed to the fetcher verbatim, even when it is an empty string; only a page *without* a
/// `nextPageToken` ends the walk.
///
/// A failed page ends the stream after yielding a single [`Error::Fetch`].
pub struct PagedStream<'a, T, F> {
    /// Current batch of items from the most recent API response
    current_items: VecDeque<T>,
    /// Future representing the currently pending API request, if any
    pending_request: Option<OneFuturePage<'a, F, T>>,
    /// Number of the page being fetched, starting at 1
    page: usize,
    /// Whether we've reached the end of all available data
    is_done: bool,
}

impl<'a, T, F> PagedStream<'a, T, F> {
    pub fn new<Fut>(fetcher: F) -> Self
    where
        F: Fn(String) -> Fut,
        F: Send + 'a,
        Fut: Future<Output = Result<Page<T>>> + Send + 'a,
    {
        let first_page = async move {
            let results = fetcher(String::new()).await?;
            Ok((fetcher, results))
        };
        Self {
            pending_request: Some(Box::pin(first_page)),
            current_items: VecDeque::new(),
            page: 1,
            is_done: false,
        }
    }
}

impl<'a, T: Unpin, F> Unpin for PagedStream<'a, T, F> {}

impl<'a, T: Unpin, F, Fut> Stream for PagedStream<'a, T, F>
where
    F: Fn(String) -> Fut,
    F: Send + 'a,
    Fut: Future<Output = Result<Page<T>>> + Send + 'a,
{
    type Item = Result<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(item) = self.current_items.pop_front() {
                return Poll::Ready(Some(Ok(item)));
            }

            if self.is_done {
                return Poll::Ready(None);
            }

            let Some(pending) = self.pending_request.as_mut() else {
                self.is_done = true;
                return Poll::Ready(None);
            };

            match pending.as_mut().poll(cx) {
                Poll::Ready(Ok((fetcher, page))) => {
                    tracing::trace!(
                        page = self.page,
                        returned_items = page.items.len(),
                        has_next = page.next_cursor.is_some(),
                        "fetched page"
                    );
                    self.current_items.extend(page.items);

                    // Presence, not emptiness, of the cursor decides whether there is more.
                    if let Some(next_cursor) = page.next_cursor {
                        self.page += 1;
                        self.pending_request = Some(Box::pin(async move {
                            let results = fetcher(next_cursor).await?;
                            Ok((fetcher, results))
                        }));
                    } else {
                        self.is_done = true;
                        self.pending_request = None;
                    }
                    continue;
                }
                Poll::Ready(Err(e)) => {
                    self.pending_request = None;
                    self.current_items.clear();
                    self.is_done = true;
                    return Poll::Ready(Some(Err(Error::Fetch {
                        page: self.page,
                        source: Box::new(e),
                    })));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Drains a paginated stream, failing on the first page that fails.
pub async fn collect_all<T, S>(stream: S) -> Result<Vec<T>>
where
    S: Stream<Item = Result<T>>,
{
    use tokio_stream::StreamExt;

    let mut stream = std::pin::pin!(stream);
    let mut all = Vec::new();
    while let Some(item) = stream.next().await {
        all.push(item?);
    }
    Ok(all)
}

/// Envelope shared by every `*.list` response.
///
/// Everything but `items` is optional since a `fields` filter may strip it.
#[derive(Debug, Deserialize)]
pub struct ListResponse<T> {
    /// Identifies the API resource's type, e.g. `youtube#videoListResponse`.
    pub kind: Option<String>,
    #[serde(default = "VecDeque::new")]
    pub items: VecDeque<T>,
    #[serde(rename = "pageInfo")]
    pub page_info: Option<PageInfo>,
    /// Token that can be used as the value of the pageToken parameter to retrieve the next page in the result set.
    #[serde(rename = "nextPageToken")]
    pub next_page_token: Option<String>,
}

impl<T> From<ListResponse<T>> for Page<T> {
    fn from(response: ListResponse<T>) -> Self {
        Page {
            items: response.items,
            next_cursor: response.next_page_token,
        }
    }
}

/// Paging details for lists of resources.
///
/// See: <https://developers.google.com/youtube/v3/docs/pageInfo>
#[derive(Debug, serde::Serialize, Deserialize)]
pub struct PageInfo {
    /// The total number of results in the result set.
    #[serde(rename = "totalResults")]
    pub total_results: Option<u32>,
    /// The number of results included in the API response.
    #[serde(rename = "resultsPerPage")]
    pub results_per_page: Option<u32>,
}

/// Structured error body returned by Google APIs.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    pub code: u16,
    pub message: String,
}
