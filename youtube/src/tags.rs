//! Batch resolution of video ids and tag extraction.

use crate::error::{Error, Result};
use crate::youtube_api::{Video, YouTubeClient};
use std::io::Write;

/// Line printed ahead of each video's tags.
pub const RECORD_SEPARATOR: &str = ">>> >>> >>> >>> >>> >>> >>>";

/// Comma-joined video ids for a single bulk lookup.
///
/// Only constructed from a non-empty id list, so it never carries a stray separator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchKey {
    joined: String,
    len: usize,
}

impl BatchKey {
    /// Joins `ids` with `,`. Returns `None` when there is nothing to look up.
    pub fn join<I>(ids: I) -> Option<Self>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut joined = String::new();
        let mut len = 0;
        for id in ids {
            if len > 0 {
                joined.push(',');
            }
            joined.push_str(id.as_ref());
            len += 1;
        }
        (len > 0).then_some(Self { joined, len })
    }

    pub fn as_str(&self) -> &str {
        &self.joined
    }

    /// Number of ids in the key.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// The non-blank tags of one video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoTags {
    pub video_id: String,
    pub tags: Vec<String>,
}

/// Picks the tags out of resolved videos.
///
/// Videos without a tag list are skipped entirely. Blank tags are dropped; the rest are kept
/// verbatim and in order.
pub fn extract_tags(videos: impl IntoIterator<Item = Video>) -> Vec<VideoTags> {
    videos
        .into_iter()
        .filter_map(|video| {
            let tags = video.snippet?.tags?;
            Some(VideoTags {
                video_id: video.id,
                tags: tags.into_iter().filter(|t| !t.trim().is_empty()).collect(),
            })
        })
        .collect()
}

/// Resolves `ids` to videos with one API call and extracts their tags.
///
/// No call is made for an empty id list.
#[tracing::instrument(skip_all, fields(ids = ids.len()))]
pub async fn resolve_and_extract_tags(
    client: &YouTubeClient,
    ids: &[String],
) -> Result<Vec<VideoTags>> {
    let Some(batch) = BatchKey::join(ids) else {
        tracing::info!("no videos to resolve");
        return Ok(Vec::new());
    };
    let videos = client.list_videos(&batch).await?;
    tracing::debug!(
        requested = batch.len(),
        returned_items = videos.len(),
        "resolved videos"
    );
    Ok(extract_tags(videos))
}

/// Writes each video's tags, one per line, after a [`RECORD_SEPARATOR`] line.
pub fn write_tags(mut out: impl Write, tags: &[VideoTags]) -> Result<()> {
    write_records(&mut out, tags).map_err(|e| Error::transport("write tags to output", e))
}

fn write_records(out: &mut impl Write, tags: &[VideoTags]) -> std::io::Result<()> {
    for video in tags {
        writeln!(out, "{RECORD_SEPARATOR}")?;
        for tag in &video.tags {
            writeln!(out, "{tag}")?;
        }
    }
    out.flush()
}
