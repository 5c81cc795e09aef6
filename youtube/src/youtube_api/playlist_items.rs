//! YouTube PlaylistItems API types.

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

/// A `playlistItem` resource identifies a resource, such as a video, that is part of a
/// playlist.
///
/// See: <https://developers.google.com/youtube/v3/docs/playlistItems#resource>
#[derive(Debug, Serialize, Deserialize)]
pub struct PlaylistItem {
    pub id: Option<String>,
    pub snippet: PlaylistItemSnippet,
}

impl PlaylistItem {
    /// The id of the video this item refers to, if it refers to one.
    pub fn video_id(&self) -> Option<&str> {
        self.snippet
            .resource_id
            .as_ref()
            .and_then(|r| r.video_id.as_deref())
    }
}

/// See: <https://developers.google.com/youtube/v3/docs/playlistItems#snippet>
#[derive(Debug, Serialize, Deserialize)]
pub struct PlaylistItemSnippet {
    pub title: Option<String>,
    /// The date and time that the item was added to the playlist.
    #[serde(rename = "publishedAt")]
    pub published_at: Option<Timestamp>,
    /// The order in which the item appears in the playlist, starting at 0.
    pub position: Option<u32>,
    #[serde(rename = "resourceId")]
    pub resource_id: Option<ResourceId>,
}

/// Identifies the resource that the playlist item refers to.
#[derive(Debug, Serialize, Deserialize)]
pub struct ResourceId {
    /// e.g. `youtube#video`
    pub kind: Option<String>,
    #[serde(rename = "videoId")]
    pub video_id: Option<String>,
}
