//! Core YouTube API client functionality.

use crate::auth::Credential;
use crate::error::{Error, Result};
use crate::tags::BatchKey;
use crate::youtube_api::{
    channels::Channel,
    playlist_items::PlaylistItem,
    types::{ErrorEnvelope, ListResponse, Page, PagedStream},
    videos::Video,
};
use http::{Method, StatusCode};
use oauth2::AccessToken;
use serde::de::DeserializeOwned;
use tokio_stream::Stream;
use tracing::instrument;

/// Client for the read-only parts of the YouTube Data API v3 this tool needs.
///
/// The client is handed an already-valid [`Credential`]; keeping it fresh is the
/// [`Authorizer`](crate::auth::Authorizer)'s job.
#[derive(Debug, Clone)]
pub struct YouTubeClient {
    access_token: AccessToken,
    /// HTTP client for API requests
    client: reqwest::Client,
    base_url: String,
    page_size: Option<u32>,
}

impl YouTubeClient {
    /// Creates a client talking to the public YouTube API with `credential`.
    pub fn new(credential: &Credential, client: reqwest::Client) -> Self {
        Self {
            access_token: credential.access_token().clone(),
            client,
            base_url: crate::config::DEFAULT_API_BASE_URL.to_string(),
            page_size: None,
        }
    }

    /// Points the client at a different API root, such as a test server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Sets `maxResults` for paginated calls; `None` leaves the provider's default.
    pub fn with_page_size(mut self, page_size: Option<u32>) -> Self {
        self.page_size = page_size;
        self
    }

    /// Makes an authenticated request to the API and turns error statuses into [`Error`]s.
    #[instrument(skip(self), level = tracing::Level::TRACE)]
    pub(crate) async fn make_authenticated_request(
        &self,
        method: Method,
        path: &str,
        query_params: &[(&str, &str)],
    ) -> Result<reqwest::Response> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .client
            .request(method.clone(), &url)
            .bearer_auth(self.access_token.secret())
            .query(query_params)
            .send()
            .await
            .map_err(|e| Error::transport(format!("send {method} request to {url}"), e))?;

        let status_code = response.status();
        if !status_code.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(provider_error(status_code, &error_text));
        }

        Ok(response)
    }

    /// Fetches a single page of a `*.list` endpoint.
    async fn list_page<T: DeserializeOwned>(
        &self,
        path: &str,
        query_params: &[(&str, &str)],
    ) -> Result<ListResponse<T>> {
        let response = self
            .make_authenticated_request(Method::GET, path, query_params)
            .await?;
        let page: ListResponse<T> = response
            .json()
            .await
            .map_err(|e| Error::transport(format!("parse {path} response as JSON"), e))?;

        tracing::debug!(
            path,
            total_results = page.page_info.as_ref().and_then(|p| p.total_results),
            returned_items = page.items.len(),
            "fetched list page"
        );

        Ok(page)
    }

    /// Returns every item of a paginated `*.list` endpoint.
    ///
    /// Each request carries `fixed_params`, the current `pageToken` and, when configured,
    /// `maxResults`. Walking the stream again re-issues the whole walk.
    pub fn list_all<'a, T>(
        &'a self,
        path: &'static str,
        fixed_params: Vec<(&'static str, String)>,
    ) -> impl Stream<Item = Result<T>> + 'a
    where
        T: DeserializeOwned + Send + Unpin + 'a,
    {
        PagedStream::new(move |cursor: String| {
            let mut params = fixed_params.clone();
            params.push(("pageToken", cursor));
            if let Some(page_size) = self.page_size {
                params.push(("maxResults", page_size.to_string()));
            }
            async move {
                let query: Vec<(&str, &str)> =
                    params.iter().map(|(k, v)| (*k, v.as_str())).collect();
                let response: ListResponse<T> = self.list_page(path, &query).await?;
                Ok(Page::from(response))
            }
        })
    }

    /// Returns a paginated stream of the authenticated user's channels.
    ///
    /// Only `contentDetails` is requested, which is where the related playlists live.
    ///
    /// # API Reference
    ///
    /// <https://developers.google.com/youtube/v3/docs/channels/list>
    #[instrument(skip(self))]
    pub fn list_my_channels(&self) -> impl Stream<Item = Result<Channel>> + '_ {
        self.list_all(
            "channels",
            vec![
                ("part", "contentDetails".to_string()),
                ("mine", "true".to_string()),
                (
                    "fields",
                    "items/contentDetails,nextPageToken,pageInfo".to_string(),
                ),
            ],
        )
    }

    /// Returns a paginated stream of the items in a playlist.
    ///
    /// # API Reference
    ///
    /// <https://developers.google.com/youtube/v3/docs/playlistItems/list>
    #[instrument(skip(self))]
    pub fn list_playlist_items(
        &self,
        playlist_id: &str,
    ) -> impl Stream<Item = Result<PlaylistItem>> + '_ {
        self.list_all(
            "playlistItems",
            vec![
                ("part", "snippet".to_string()),
                ("playlistId", playlist_id.to_string()),
            ],
        )
    }

    /// Fetches full video records for every id in `ids` with a single call.
    ///
    /// # API Reference
    ///
    /// <https://developers.google.com/youtube/v3/docs/videos/list>
    #[instrument(skip(self, ids), fields(ids = ids.len()))]
    pub async fn list_videos(&self, ids: &BatchKey) -> Result<Vec<Video>> {
        let query_params = [
            ("part", "snippet,contentDetails,statistics,topicDetails"),
            ("id", ids.as_str()),
        ];
        let videos: ListResponse<Video> = self.list_page("videos", &query_params).await?;
        Ok(videos.items.into())
    }
}

/// Builds a [`Error::Provider`] from an error response, preferring Google's structured body.
fn provider_error(status: StatusCode, body: &str) -> Error {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(ErrorEnvelope { error }) => Error::Provider {
            code: error.code,
            message: error.message,
        },
        Err(_) => Error::Provider {
            code: status.as_u16(),
            message: if body.trim().is_empty() {
                status.canonical_reason().unwrap_or("unknown error").to_string()
            } else {
                body.to_string()
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::ScopeSet;
    use crate::auth::tests::token;
    use crate::youtube_api::types::collect_all;
    use mockito::Matcher;
    use pretty_assertions::assert_eq;

    fn client(server: &mockito::ServerGuard) -> YouTubeClient {
        let credential = Credential::new(token("tok", None, 3600), &ScopeSet::youtube());
        YouTubeClient::new(&credential, reqwest::Client::new()).with_base_url(server.url())
    }

    #[test]
    fn structured_provider_errors_are_parsed() {
        let e = provider_error(
            StatusCode::FORBIDDEN,
            r#"{"error": {"code": 403, "message": "The request cannot be completed because you have exceeded your quota.", "errors": []}}"#,
        );
        assert!(
            matches!(e, Error::Provider { code: 403, ref message } if message.contains("quota"))
        );
    }

    #[test]
    fn unstructured_provider_errors_keep_status() {
        let e = provider_error(StatusCode::BAD_GATEWAY, "");
        assert!(matches!(e, Error::Provider { code: 502, ref message } if message == "Bad Gateway"));
    }

    #[tokio::test]
    async fn channel_listing_sends_token_and_field_filter() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/channels")
            .match_header("authorization", "Bearer tok")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("part".into(), "contentDetails".into()),
                Matcher::UrlEncoded("mine".into(), "true".into()),
                Matcher::UrlEncoded(
                    "fields".into(),
                    "items/contentDetails,nextPageToken,pageInfo".into(),
                ),
                Matcher::UrlEncoded("maxResults".into(), "50".into()),
                Matcher::UrlEncoded("pageToken".into(), "".into()),
            ]))
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"pageInfo": {"totalResults": 1, "resultsPerPage": 50},
                    "items": [{"contentDetails": {"relatedPlaylists": {"likes": "LL", "uploads": "UU"}}}]}"#,
            )
            .expect(1)
            .create_async()
            .await;

        let yt = client(&server).with_page_size(Some(50));
        let channels = collect_all(yt.list_my_channels()).await.unwrap();
        assert_eq!(channels.len(), 1);
        let playlists = &channels[0].content_details.as_ref().unwrap().related_playlists;
        assert_eq!(playlists.likes.as_deref(), Some("LL"));
        assert_eq!(playlists.uploads.as_deref(), Some("UU"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn failing_second_page_aborts_playlist_walk() {
        let mut server = mockito::Server::new_async().await;
        let _first = server
            .mock("GET", "/playlistItems")
            .match_query(Matcher::UrlEncoded("pageToken".into(), "".into()))
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"nextPageToken": "TOK2",
                    "items": [{"snippet": {"resourceId": {"kind": "youtube#video", "videoId": "v1"}}}]}"#,
            )
            .create_async()
            .await;
        let _second = server
            .mock("GET", "/playlistItems")
            .match_query(Matcher::UrlEncoded("pageToken".into(), "TOK2".into()))
            .with_status(404)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error": {"code": 404, "message": "The playlist identified with the request's playlistId parameter cannot be found."}}"#)
            .create_async()
            .await;

        let yt = client(&server);
        let e = collect_all(yt.list_playlist_items("PL1")).await.unwrap_err();
        assert_eq!(e.exit_code(), 3);
        assert!(matches!(
            e,
            Error::Fetch { page: 2, ref source } if matches!(**source, Error::Provider { code: 404, .. })
        ));
    }

    #[tokio::test]
    async fn videos_are_fetched_in_one_batch() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/videos")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded(
                    "part".into(),
                    "snippet,contentDetails,statistics,topicDetails".into(),
                ),
                Matcher::UrlEncoded("id".into(), "a,b".into()),
            ]))
            .with_header("content-type", "application/json")
            .with_body(r#"{"kind": "youtube#videoListResponse", "items": [{"id": "a"}, {"id": "b", "snippet": {"tags": ["x"]}}]}"#)
            .expect(1)
            .create_async()
            .await;

        let yt = client(&server);
        let ids = BatchKey::join(["a", "b"]).unwrap();
        let videos = yt.list_videos(&ids).await.unwrap();
        assert_eq!(
            videos.iter().map(|v| v.id.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
        mock.assert_async().await;
    }
}
