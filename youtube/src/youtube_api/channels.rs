//! YouTube Channels API types.

use serde::{Deserialize, Serialize};

/// A `channel` resource contains information about a YouTube channel.
///
/// Only `contentDetails` is requested, and the `fields` filter strips everything else,
/// including the id.
///
/// See: <https://developers.google.com/youtube/v3/docs/channels#resource>
#[derive(Debug, Serialize, Deserialize)]
pub struct Channel {
    /// The ID that YouTube uses to uniquely identify the channel.
    pub id: Option<String>,
    #[serde(rename = "contentDetails")]
    pub content_details: Option<ChannelContentDetails>,
}

/// See: <https://developers.google.com/youtube/v3/docs/channels#contentDetails>
#[derive(Debug, Serialize, Deserialize)]
pub struct ChannelContentDetails {
    #[serde(rename = "relatedPlaylists")]
    pub related_playlists: RelatedPlaylists,
}

/// Playlists associated with the channel.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RelatedPlaylists {
    /// The ID of the playlist that contains the channel's liked videos.
    pub likes: Option<String>,
    /// The ID of the playlist that contains the channel's uploaded videos.
    pub uploads: Option<String>,
}
