//! YouTube Data API v3 client library.
//!
//! Only the three list endpoints this tool walks are covered: `channels.list` to find the
//! user's related playlists, `playlistItems.list` to enumerate a playlist, and `videos.list`
//! to resolve video ids in bulk.
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use tokio_stream::StreamExt;
//! use youtube_tags::auth::{Credential, ScopeSet};
//! use youtube_tags::youtube_api::YouTubeClient;
//!
//! # async fn example(credential: Credential) -> youtube_tags::Result<()> {
//! let client = YouTubeClient::new(&credential, reqwest::Client::new());
//!
//! let mut items = std::pin::pin!(client.list_playlist_items("PL1"));
//! while let Some(item) = items.next().await {
//!     let item = item?;
//!     println!("{:?}", item.video_id());
//! }
//! # Ok(())
//! # }
//! ```

pub mod channels;
pub mod client;
pub mod playlist_items;
pub mod types;
pub mod videos;

pub use client::YouTubeClient;
pub use types::{PageInfo, PagedStream, collect_all};

pub use channels::{Channel, RelatedPlaylists};
pub use playlist_items::PlaylistItem;
pub use videos::{Video, VideoSnippet, VideoStatistics};
