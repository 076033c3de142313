// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Memo stores for immutable query replies.
//!
//! Track media (metadata, artwork, waveforms, beatgrids) never changes for
//! a given `(device, slot, id)` triple while the media stays mounted, so
//! replies are memoized for the client's lifetime. Failed replies are
//! recorded too: the device answered, re-asking will not change the answer.
//!
//! Only the worker writes. Reads from other threads are advisory; the
//! supported read path is enqueueing a request, which hits the store on the
//! worker.

use dashmap::DashMap;

use crate::announce::MediaSlot;
use crate::db::request::QueryResult;

/// Memo key: target device, media slot, item id.
pub type StoreKey = (u8, MediaSlot, u32);

/// The memoizable request kinds, one store each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Metadata,
    Artwork,
    Waveform,
    PreviewWaveform,
    Beatgrid,
}

/// One table per memoizable kind. Entries are never evicted; per-track
/// payloads are small and bounded by library size.
#[derive(Default)]
pub struct MemoStores {
    metadata: DashMap<StoreKey, Option<QueryResult>>,
    artwork: DashMap<StoreKey, Option<QueryResult>>,
    waveform: DashMap<StoreKey, Option<QueryResult>>,
    preview_waveform: DashMap<StoreKey, Option<QueryResult>>,
    beatgrid: DashMap<StoreKey, Option<QueryResult>>,
}

impl MemoStores {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self, kind: StoreKind) -> &DashMap<StoreKey, Option<QueryResult>> {
        match kind {
            StoreKind::Metadata => &self.metadata,
            StoreKind::Artwork => &self.artwork,
            StoreKind::Waveform => &self.waveform,
            StoreKind::PreviewWaveform => &self.preview_waveform,
            StoreKind::Beatgrid => &self.beatgrid,
        }
    }

    /// Memoized reply for `key`. The outer `Option` distinguishes "never
    /// queried" from a memoized failure.
    pub fn get(&self, kind: StoreKind, key: &StoreKey) -> Option<Option<QueryResult>> {
        self.table(kind).get(key).map(|entry| entry.value().clone())
    }

    /// Record a reply (or a failure) for `key`.
    pub fn insert(&self, kind: StoreKind, key: StoreKey, value: Option<QueryResult>) {
        self.table(kind).insert(key, value);
    }

    /// Number of memoized entries for a kind.
    pub fn len(&self, kind: StoreKind) -> usize {
        self.table(kind).len()
    }

    pub fn is_empty(&self, kind: StoreKind) -> bool {
        self.table(kind).is_empty()
    }
}
