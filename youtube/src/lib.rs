use crate::config::RelatedPlaylist;
use crate::tags::VideoTags;
use crate::youtube_api::{YouTubeClient, collect_all};

pub mod auth;
pub mod config;
pub mod error;
pub mod oauth;
pub mod tags;
pub mod token_store;
pub mod youtube_api;

pub use error::{Error, Result};

/// Looks up the id of one of the authenticated user's related playlists.
///
/// The user's default channel is the first one returned.
pub async fn related_playlist_id(
    client: &YouTubeClient,
    which: RelatedPlaylist,
) -> Result<String> {
    let channels = collect_all(client.list_my_channels()).await?;
    let Some(channel) = channels.into_iter().next() else {
        return Err(eyre::eyre!("authenticated user has no YouTube channel").into());
    };
    let playlists = channel
        .content_details
        .map(|details| details.related_playlists)
        .unwrap_or_default();
    let id = match which {
        RelatedPlaylist::Likes => playlists.likes,
        RelatedPlaylist::Uploads => playlists.uploads,
    };
    id.ok_or_else(|| eyre::eyre!("channel has no {which:?} playlist").into())
}

/// Walks a playlist to its end and returns the ids of the videos in it, in playlist order.
#[tracing::instrument(skip(client))]
pub async fn playlist_video_ids(client: &YouTubeClient, playlist_id: &str) -> Result<Vec<String>> {
    let items = collect_all(client.list_playlist_items(playlist_id)).await?;
    let total = items.len();
    let ids: Vec<String> = items
        .into_iter()
        .filter_map(|item| match item.video_id() {
            Some(id) => Some(id.to_string()),
            None => {
                tracing::debug!(item = ?item.id, "skipping playlist item that is not a video");
                None
            }
        })
        .collect();
    tracing::info!(items = total, videos = ids.len(), "walked playlist");
    Ok(ids)
}

/// Collects the tags of every video in one of the user's related playlists.
///
/// Any failure along the way aborts the whole collection.
pub async fn collect_tags(
    client: &YouTubeClient,
    which: RelatedPlaylist,
) -> Result<Vec<VideoTags>> {
    let playlist_id = related_playlist_id(client, which).await?;
    tracing::info!(%playlist_id, "found playlist");
    let ids = playlist_video_ids(client, &playlist_id).await?;
    tags::resolve_and_extract_tags(client, &ids).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Credential, ScopeSet};
    use mockito::{Matcher, Mock, ServerGuard};
    use pretty_assertions::assert_eq;

    fn client(server: &ServerGuard) -> YouTubeClient {
        let credential = Credential::new(
            crate::auth::tests::token("tok", None, 3600),
            &ScopeSet::youtube(),
        );
        YouTubeClient::new(&credential, reqwest::Client::new()).with_base_url(server.url())
    }

    async fn channel_with_likes(server: &mut ServerGuard, likes: &str) -> Mock {
        server
            .mock("GET", "/channels")
            .match_query(Matcher::UrlEncoded("mine".into(), "true".into()))
            .with_header("content-type", "application/json")
            .with_body(format!(
                r#"{{"items": [{{"contentDetails": {{"relatedPlaylists": {{"likes": "{likes}", "uploads": "UU1"}}}}}}]}}"#
            ))
            .expect(1)
            .create_async()
            .await
    }

    fn playlist_page(ids: &[&str], next: Option<&str>) -> String {
        let items: Vec<_> = ids
            .iter()
            .map(|id| {
                serde_json::json!({
                    "id": format!("item-{id}"),
                    "snippet": {"title": id, "resourceId": {"kind": "youtube#video", "videoId": id}}
                })
            })
            .collect();
        let mut page = serde_json::json!({ "kind": "youtube#playlistItemListResponse", "items": items });
        if let Some(next) = next {
            page["nextPageToken"] = next.into();
        }
        page.to_string()
    }

    #[tokio::test]
    async fn collects_tags_across_pages() {
        let mut server = mockito::Server::new_async().await;
        let channels = channel_with_likes(&mut server, "PL1").await;
        let page1 = server
            .mock("GET", "/playlistItems")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("playlistId".into(), "PL1".into()),
                Matcher::UrlEncoded("part".into(), "snippet".into()),
                Matcher::UrlEncoded("pageToken".into(), "".into()),
            ]))
            .with_header("content-type", "application/json")
            .with_body(playlist_page(&["vid1", "vid2"], Some("TOK2")))
            .expect(1)
            .create_async()
            .await;
        let page2 = server
            .mock("GET", "/playlistItems")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("playlistId".into(), "PL1".into()),
                Matcher::UrlEncoded("pageToken".into(), "TOK2".into()),
            ]))
            .with_header("content-type", "application/json")
            .with_body(playlist_page(&["vid3"], None))
            .expect(1)
            .create_async()
            .await;
        let videos = server
            .mock("GET", "/videos")
            .match_query(Matcher::UrlEncoded("id".into(), "vid1,vid2,vid3".into()))
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"items": [
                    {"id": "vid1", "snippet": {"title": "one"}},
                    {"id": "vid2", "snippet": {"title": "two", "tags": ["a", "b"]}},
                    {"id": "vid3", "snippet": {"title": "three"}, "statistics": {"viewCount": "7"}}
                ]}"#,
            )
            .expect(1)
            .create_async()
            .await;

        let yt = client(&server);
        let tags = collect_tags(&yt, RelatedPlaylist::Likes).await.unwrap();
        let emitted: Vec<&str> = tags
            .iter()
            .flat_map(|t| t.tags.iter().map(String::as_str))
            .collect();
        assert_eq!(emitted, vec!["a", "b"]);
        assert_eq!(tags[0].video_id, "vid2");

        channels.assert_async().await;
        page1.assert_async().await;
        page2.assert_async().await;
        videos.assert_async().await;
    }

    #[tokio::test]
    async fn empty_playlist_skips_video_lookup() {
        let mut server = mockito::Server::new_async().await;
        let _channels = channel_with_likes(&mut server, "PL1").await;
        let items = server
            .mock("GET", "/playlistItems")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("playlistId".into(), "PL1".into()),
                Matcher::UrlEncoded("pageToken".into(), "".into()),
            ]))
            .with_header("content-type", "application/json")
            .with_body(playlist_page(&[], None))
            .expect(1)
            .create_async()
            .await;
        let videos = server
            .mock("GET", "/videos")
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let yt = client(&server);
        let tags = collect_tags(&yt, RelatedPlaylist::Likes).await.unwrap();
        assert!(tags.is_empty());
        items.assert_async().await;
        videos.assert_async().await;
    }

    #[tokio::test]
    async fn uploads_playlist_can_be_selected() {
        let mut server = mockito::Server::new_async().await;
        let _channels = channel_with_likes(&mut server, "PL1").await;
        let yt = client(&server);
        let id = related_playlist_id(&yt, RelatedPlaylist::Uploads)
            .await
            .unwrap();
        assert_eq!(id, "UU1");
    }

    #[tokio::test]
    async fn missing_channel_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let channels = server
            .mock("GET", "/channels")
            .match_query(Matcher::UrlEncoded("mine".into(), "true".into()))
            .with_header("content-type", "application/json")
            .with_body(r#"{"pageInfo": {"totalResults": 0, "resultsPerPage": 5}}"#)
            .expect(1)
            .create_async()
            .await;
        let yt = client(&server);
        let e = collect_tags(&yt, RelatedPlaylist::Likes).await.unwrap_err();
        assert!(matches!(e, Error::Unknown(_)), "unexpected error: {e:?}");
        assert_eq!(e.exit_code(), 5);
        channels.assert_async().await;
    }

    #[tokio::test]
    async fn unauthorized_channel_lookup_is_a_provider_error() {
        let mut server = mockito::Server::new_async().await;
        let _channels = server
            .mock("GET", "/channels")
            .match_query(Matcher::Any)
            .with_status(401)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error": {"code": 401, "message": "Request had invalid authentication credentials."}}"#)
            .create_async()
            .await;
        let yt = client(&server);
        let e = collect_tags(&yt, RelatedPlaylist::Likes).await.unwrap_err();
        assert!(
            matches!(&e, Error::Fetch { page: 1, source } if matches!(**source, Error::Provider { code: 401, .. })),
            "unexpected error: {e:?}"
        );
        assert_eq!(e.kind(), "provider");
        assert_eq!(e.exit_code(), 3);
    }
}
