// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Request and result types for the database client.

use std::sync::Arc;

use crate::announce::MediaSlot;
use crate::db::menu::{MenuEntry, TrackMetadata};
use crate::db::store::StoreKind;
use crate::protocol::Beatgrid;

/// What a queued request asks a device for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Metadata,
    RootMenu,
    Title,
    TitleByAlbum,
    Artist,
    AlbumByArtist,
    TitleByArtistAlbum,
    Playlist,
    Artwork,
    Waveform,
    PreviewWaveform,
    Beatgrid,
}

impl QueryKind {
    /// Requests in this class pull per-track media and are deferred while
    /// the target device is mid-load.
    pub fn is_media_query(self) -> bool {
        matches!(
            self,
            Self::Metadata
                | Self::Artwork
                | Self::Waveform
                | Self::PreviewWaveform
                | Self::Beatgrid
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Metadata => "metadata",
            Self::RootMenu => "root_menu",
            Self::Title => "title",
            Self::TitleByAlbum => "title_by_album",
            Self::Artist => "artist",
            Self::AlbumByArtist => "album_by_artist",
            Self::TitleByArtistAlbum => "title_by_artist_album",
            Self::Playlist => "playlist",
            Self::Artwork => "artwork",
            Self::Waveform => "waveform",
            Self::PreviewWaveform => "preview_waveform",
            Self::Beatgrid => "beatgrid",
        }
    }
}

impl std::fmt::Display for QueryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sort column for list queries. Which second column the device renders
/// depends on the chosen sort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortMode {
    Default,
    Title,
    Artist,
    Album,
    Bpm,
    Rating,
    Genre,
    Comment,
    Duration,
    Remixer,
    Label,
    OriginalArtist,
    Key,
    Bitrate,
    DjPlayCount,
}

impl SortMode {
    /// Wire code of the sort column.
    pub fn code(self) -> u8 {
        match self {
            Self::Default => 0x00,
            Self::Title => 0x01,
            Self::Artist => 0x02,
            Self::Album => 0x03,
            Self::Bpm => 0x04,
            Self::Rating => 0x05,
            Self::Genre => 0x06,
            Self::Comment => 0x07,
            Self::Duration => 0x08,
            Self::Remixer => 0x09,
            Self::Label => 0x11,
            Self::OriginalArtist => 0x0b,
            Self::Key => 0x0c,
            Self::Bitrate => 0x0d,
            Self::DjPlayCount => 0x10,
        }
    }
}

/// Parameters of a queued request. The device number always leads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryParams {
    pub device: u8,
    pub slot: MediaSlot,
    /// Item ids the query filters by; meaning depends on the kind.
    pub ids: Vec<u32>,
    pub sort: Option<SortMode>,
}

/// Parsed outcome of a successful query.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    /// Rows of a list query.
    Entries(Vec<MenuEntry>),
    /// Merged record of a metadata query.
    Metadata(TrackMetadata),
    /// Raw artwork / waveform bytes.
    Blob(Arc<Vec<u8>>),
    /// Parsed beatgrid.
    Beatgrid(Arc<Beatgrid>),
}

/// Completion callback. `None` as the result means the query failed; retry
/// at your discretion.
pub type Callback = Box<dyn FnOnce(QueryKind, &QueryParams, Option<QueryResult>) + Send + 'static>;

/// One queued unit of work for the worker. Immutable once enqueued.
pub struct Request {
    pub kind: QueryKind,
    pub store: Option<StoreKind>,
    pub params: QueryParams,
    pub callback: Option<Callback>,
}
