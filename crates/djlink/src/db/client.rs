// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Database client and its worker thread.
//!
//! ```text
//! +--------------------------------------------------------------+
//! |                         DbClient                             |
//! |   get_metadata() / get_titles() / get_artwork() / ...        |
//! |                   |  validate + enqueue                      |
//! |                   v                                          |
//! |            unbounded FIFO (crossbeam channel)                |
//! +-------------------|------------------------------------------+
//!                     v
//! +--------------------------------------------------------------+
//! |                     Worker thread                            |
//! |   pop (1 s timeout) -> resolve device -> admission check     |
//! |      -> memo stores -> connection pool -> query exchange     |
//! |      -> parse reply -> memoize -> completion callback        |
//! |   on pop timeout: idle connection sweep                      |
//! +--------------------------------------------------------------+
//! ```
//!
//! All socket I/O, parsing, store writes and callback dispatches happen on
//! the worker; producers only touch the queue. Requests complete in FIFO
//! order except when admission control sends one back to the tail.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::announce::MediaSlot;
use crate::config::ClientConfig;
use crate::db::connection::ConnectionPool;
use crate::db::menu;
use crate::db::request::{Callback, QueryKind, QueryParams, QueryResult, Request, SortMode};
use crate::db::store::{MemoStores, StoreKey, StoreKind};
use crate::error::{Error, Result};
use crate::protocol::{Beatgrid, Field, Message, MessageType};
use crate::registry::DeviceRegistry;

/// Location nibble of menu query locators.
const MENU_LOCATION: u8 = 1;

/// Default location nibble of blob query locators.
const BLOB_LOCATION: u8 = 8;

/// Waveform blobs are addressed through the menu location.
const WAVEFORM_LOCATION: u8 = 1;

/// Pack a query locator: requesting device, location, media slot.
fn locator(own_device: u8, location: u8, slot_id: u8) -> u32 {
    u32::from(own_device) << 24 | u32::from(location) << 16 | u32::from(slot_id) << 8 | 1
}

/// Asynchronous client for the track databases of devices on the bus.
///
/// Every `get_*` method returns immediately after enqueueing; the optional
/// callback runs on the worker thread once the request completes, with
/// `None` signalling failure. Requests against devices missing from the
/// registry are dropped without a callback.
pub struct DbClient {
    queue: Sender<Request>,
    stores: Arc<MemoStores>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl DbClient {
    /// Validate `config`, spawn the worker and return the handle.
    pub fn start(config: ClientConfig, registry: Arc<DeviceRegistry>) -> Result<Self> {
        config.validate().map_err(Error::Config)?;

        let (queue, incoming) = unbounded();
        let stores = Arc::new(MemoStores::new());
        let running = Arc::new(AtomicBool::new(true));

        let worker = Worker {
            pool: ConnectionPool::new(config.clone()),
            config,
            registry,
            stores: Arc::clone(&stores),
            incoming,
            requeue: queue.clone(),
            running: Arc::clone(&running),
        };
        let handle = thread::Builder::new()
            .name("djlink-db".into())
            .spawn(move || worker.run())?;

        Ok(Self {
            queue,
            stores,
            running,
            worker: Some(handle),
        })
    }

    /// Stop the worker. The request in flight finishes first; queued
    /// requests are abandoned.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }

    /// Memo stores. Reads from outside the worker are advisory.
    pub fn stores(&self) -> &MemoStores {
        &self.stores
    }

    pub fn get_metadata(
        &self,
        device: u8,
        slot: MediaSlot,
        track_id: u32,
        callback: Option<Callback>,
    ) {
        self.submit(
            QueryKind::Metadata,
            Some(StoreKind::Metadata),
            QueryParams {
                device,
                slot,
                ids: vec![track_id],
                sort: None,
            },
            callback,
        );
    }

    pub fn get_root_menu(&self, device: u8, slot: MediaSlot, callback: Option<Callback>) {
        self.submit(
            QueryKind::RootMenu,
            None,
            QueryParams {
                device,
                slot,
                ids: Vec::new(),
                sort: None,
            },
            callback,
        );
    }

    pub fn get_titles(
        &self,
        device: u8,
        slot: MediaSlot,
        sort: SortMode,
        callback: Option<Callback>,
    ) {
        self.submit(
            QueryKind::Title,
            None,
            QueryParams {
                device,
                slot,
                ids: Vec::new(),
                sort: Some(sort),
            },
            callback,
        );
    }

    pub fn get_titles_by_album(
        &self,
        device: u8,
        slot: MediaSlot,
        album_id: u32,
        sort: SortMode,
        callback: Option<Callback>,
    ) {
        self.submit(
            QueryKind::TitleByAlbum,
            None,
            QueryParams {
                device,
                slot,
                ids: vec![album_id],
                sort: Some(sort),
            },
            callback,
        );
    }

    pub fn get_artists(
        &self,
        device: u8,
        slot: MediaSlot,
        sort: SortMode,
        callback: Option<Callback>,
    ) {
        self.submit(
            QueryKind::Artist,
            None,
            QueryParams {
                device,
                slot,
                ids: Vec::new(),
                sort: Some(sort),
            },
            callback,
        );
    }

    pub fn get_albums_by_artist(
        &self,
        device: u8,
        slot: MediaSlot,
        artist_id: u32,
        sort: SortMode,
        callback: Option<Callback>,
    ) {
        self.submit(
            QueryKind::AlbumByArtist,
            None,
            QueryParams {
                device,
                slot,
                ids: vec![artist_id],
                sort: Some(sort),
            },
            callback,
        );
    }

    pub fn get_titles_by_artist_album(
        &self,
        device: u8,
        slot: MediaSlot,
        artist_id: u32,
        album_id: u32,
        sort: SortMode,
        callback: Option<Callback>,
    ) {
        self.submit(
            QueryKind::TitleByArtistAlbum,
            None,
            QueryParams {
                device,
                slot,
                ids: vec![artist_id, album_id],
                sort: Some(sort),
            },
            callback,
        );
    }

    /// Playlist folder listing. `folder_id` 0 is the top level.
    pub fn get_playlists(
        &self,
        device: u8,
        slot: MediaSlot,
        folder_id: u32,
        callback: Option<Callback>,
    ) {
        self.submit(
            QueryKind::Playlist,
            None,
            QueryParams {
                device,
                slot,
                ids: vec![folder_id, 0],
                sort: None,
            },
            callback,
        );
    }

    /// Tracks of one playlist.
    pub fn get_playlist(
        &self,
        device: u8,
        slot: MediaSlot,
        folder_id: u32,
        playlist_id: u32,
        sort: SortMode,
        callback: Option<Callback>,
    ) {
        self.submit(
            QueryKind::Playlist,
            None,
            QueryParams {
                device,
                slot,
                ids: vec![folder_id, playlist_id],
                sort: Some(sort),
            },
            callback,
        );
    }

    pub fn get_artwork(
        &self,
        device: u8,
        slot: MediaSlot,
        artwork_id: u32,
        callback: Option<Callback>,
    ) {
        self.submit(
            QueryKind::Artwork,
            Some(StoreKind::Artwork),
            QueryParams {
                device,
                slot,
                ids: vec![artwork_id],
                sort: None,
            },
            callback,
        );
    }

    pub fn get_waveform(
        &self,
        device: u8,
        slot: MediaSlot,
        track_id: u32,
        callback: Option<Callback>,
    ) {
        self.submit(
            QueryKind::Waveform,
            Some(StoreKind::Waveform),
            QueryParams {
                device,
                slot,
                ids: vec![track_id],
                sort: None,
            },
            callback,
        );
    }

    pub fn get_preview_waveform(
        &self,
        device: u8,
        slot: MediaSlot,
        track_id: u32,
        callback: Option<Callback>,
    ) {
        self.submit(
            QueryKind::PreviewWaveform,
            Some(StoreKind::PreviewWaveform),
            QueryParams {
                device,
                slot,
                ids: vec![track_id],
                sort: None,
            },
            callback,
        );
    }

    pub fn get_beatgrid(
        &self,
        device: u8,
        slot: MediaSlot,
        track_id: u32,
        callback: Option<Callback>,
    ) {
        self.submit(
            QueryKind::Beatgrid,
            Some(StoreKind::Beatgrid),
            QueryParams {
                device,
                slot,
                ids: vec![track_id],
                sort: None,
            },
            callback,
        );
    }

    fn submit(
        &self,
        kind: QueryKind,
        store: Option<StoreKind>,
        params: QueryParams,
        callback: Option<Callback>,
    ) {
        if params.device == 0 || params.device > 4 {
            log::warn!(
                "db: invalid {} request parameters, device {}",
                kind,
                params.device
            );
            return;
        }
        log::debug!("db: enqueueing {} request for device {}", kind, params.device);
        let _ = self.queue.send(Request {
            kind,
            store,
            params,
            callback,
        });
    }
}

impl Drop for DbClient {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// Worker
// ============================================================================

struct Worker {
    config: ClientConfig,
    registry: Arc<DeviceRegistry>,
    stores: Arc<MemoStores>,
    pool: ConnectionPool,
    incoming: Receiver<Request>,
    requeue: Sender<Request>,
    running: Arc<AtomicBool>,
}

impl Worker {
    fn run(mut self) {
        log::debug!("db: worker starting");
        while self.running.load(Ordering::SeqCst) {
            let request = match self.incoming.recv_timeout(self.config.pop_timeout) {
                Ok(request) => request,
                Err(RecvTimeoutError::Timeout) => {
                    self.pool.sweep();
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            };

            let device = match self.registry.get(request.params.device) {
                Some(device) => device,
                None => {
                    log::warn!(
                        "db: device {} not in registry, discarding {} request",
                        request.params.device,
                        request.kind
                    );
                    continue;
                }
            };

            // Devices that are mid-load reject media queries; defer to the
            // queue tail instead of failing the request.
            if request.kind.is_media_query() && device.play_state.defers_media_queries() {
                log::debug!(
                    "db: delaying {} request, device {} play state {:?}",
                    request.kind,
                    device.number,
                    device.play_state
                );
                let _ = self.requeue.send(request);
                thread::sleep(self.config.defer_delay);
                continue;
            }

            self.handle_request(request, device.ip);
        }
        log::debug!("db: worker shutting down");
    }

    fn handle_request(&mut self, request: Request, ip: Ipv4Addr) {
        let Request {
            kind,
            store,
            params,
            callback,
        } = request;

        let memo_key: Option<(StoreKind, StoreKey)> = store.and_then(|s| match params.ids[..] {
            [id] => Some((s, (params.device, params.slot, id))),
            _ => None,
        });

        if let Some((store_kind, key)) = memo_key {
            if let Some(cached) = self.stores.get(store_kind, &key) {
                log::debug!("db: {} request for device {} already known", kind, params.device);
                if kind == QueryKind::Metadata {
                    if let Some(QueryResult::Metadata(metadata)) = &cached {
                        self.registry
                            .store_metadata_by_loaded_track(key.0, key.1, key.2, metadata);
                    }
                }
                if let Some(callback) = callback {
                    callback(kind, &params, cached);
                }
                return;
            }
        }

        log::debug!("db: handling {} request for device {}", kind, params.device);
        let result = self.perform(kind, &params, ip);

        if kind == QueryKind::Metadata {
            if let (Some((_, key)), Some(QueryResult::Metadata(metadata))) = (&memo_key, &result) {
                self.registry
                    .store_metadata_by_loaded_track(key.0, key.1, key.2, metadata);
            }
        }
        if let Some((store_kind, key)) = memo_key {
            self.stores.insert(store_kind, key, result.clone());
        }
        if let Some(callback) = callback {
            callback(kind, &params, result);
        }
    }

    fn perform(&mut self, kind: QueryKind, params: &QueryParams, ip: Ipv4Addr) -> Option<QueryResult> {
        match kind {
            QueryKind::Metadata => self.run_list_query(params, ip, MessageType::MetadataRequest),
            QueryKind::RootMenu => self.run_list_query(params, ip, MessageType::RootMenuRequest),
            QueryKind::Title => self.run_list_query(params, ip, MessageType::TitleRequest),
            QueryKind::TitleByAlbum => {
                self.run_list_query(params, ip, MessageType::TitleByAlbumRequest)
            }
            QueryKind::Artist => self.run_list_query(params, ip, MessageType::ArtistRequest),
            QueryKind::AlbumByArtist => {
                self.run_list_query(params, ip, MessageType::AlbumByArtistRequest)
            }
            QueryKind::TitleByArtistAlbum => {
                self.run_list_query(params, ip, MessageType::TitleByArtistAlbumRequest)
            }
            QueryKind::Playlist => self.run_list_query(params, ip, MessageType::PlaylistRequest),
            QueryKind::Artwork => self
                .run_blob_query(params, ip, MessageType::ArtworkRequest, BLOB_LOCATION)
                .map(QueryResult::Blob),
            QueryKind::Waveform => self
                .run_blob_query(params, ip, MessageType::WaveformRequest, WAVEFORM_LOCATION)
                .map(QueryResult::Blob),
            QueryKind::PreviewWaveform => self
                .run_blob_query(
                    params,
                    ip,
                    MessageType::PreviewWaveformRequest,
                    BLOB_LOCATION,
                )
                .map(QueryResult::Blob),
            QueryKind::Beatgrid => self
                .run_blob_query(params, ip, MessageType::BeatgridRequest, BLOB_LOCATION)
                .and_then(|blob| match Beatgrid::parse(&blob) {
                    Ok(grid) => Some(QueryResult::Beatgrid(Arc::new(grid))),
                    Err(e) => {
                        log::error!("db: failed to parse beatgrid data: {}", e);
                        None
                    }
                }),
        }
    }

    fn run_list_query(
        &mut self,
        params: &QueryParams,
        ip: Ipv4Addr,
        request_type: MessageType,
    ) -> Option<QueryResult> {
        match self.list_exchange(params, ip, request_type) {
            Ok(result) => Some(result),
            Err(e) => {
                log::error!(
                    "db: {} failed on device {}: {}",
                    request_type,
                    params.device,
                    e
                );
                if e.poisons_connection() {
                    self.pool.invalidate(params.device);
                }
                None
            }
        }
    }

    fn run_blob_query(
        &mut self,
        params: &QueryParams,
        ip: Ipv4Addr,
        request_type: MessageType,
        location: u8,
    ) -> Option<Arc<Vec<u8>>> {
        match self.blob_exchange(params, ip, request_type, location) {
            Ok(blob) => Some(blob),
            Err(e) => {
                log::error!(
                    "db: {} failed on device {}: {}",
                    request_type,
                    params.device,
                    e
                );
                if e.poisons_connection() {
                    self.pool.invalidate(params.device);
                }
                None
            }
        }
    }

    /// Two-phase list exchange: a typed setup query announcing what to
    /// list, then a render query pulling the announced number of entries.
    fn list_exchange(
        &mut self,
        params: &QueryParams,
        ip: Ipv4Addr,
        request_type: MessageType,
    ) -> Result<QueryResult> {
        let own = self.config.own_device_number;
        let message_tries = self.config.message_recv_tries;
        let render_tries = self.config.render_recv_tries;
        let connection = self.pool.checkout(params.device, ip)?;

        let loc = locator(own, MENU_LOCATION, params.slot.code());
        let sort_id = u32::from(params.sort.map(SortMode::code).unwrap_or(0));

        let mut args = vec![Field::Int32(loc)];
        match request_type {
            MessageType::RootMenuRequest => {
                args.push(Field::Int32(0));
                args.push(Field::Int32(0x00ff_ffff));
            }
            MessageType::MetadataRequest => {
                args.push(Field::Int32(params.ids.first().copied().unwrap_or(0)));
            }
            MessageType::PlaylistRequest => {
                let folder_id = params.ids.first().copied().unwrap_or(0);
                let playlist_id = params.ids.get(1).copied().unwrap_or(0);
                args.push(Field::Int32(sort_id));
                args.push(Field::Int32(if playlist_id > 0 {
                    playlist_id
                } else {
                    folder_id
                }));
                // 1 lists a folder, 0 lists a playlist.
                args.push(Field::Int32(if playlist_id > 0 { 0 } else { 1 }));
            }
            _ => {
                args.push(Field::Int32(sort_id));
                for id in &params.ids {
                    args.push(Field::Int32(*id));
                }
            }
        }

        let query = Message::new(connection.next_transaction_id(), request_type, args);
        log::debug!("db: {} query txn {}", request_type, query.transaction_id);
        connection.send(&query)?;

        let reply = connection.receive_message(message_tries)?;
        if reply.kind != MessageType::Success {
            return Err(Error::Protocol(format!(
                "{} got {}",
                request_type, reply.kind
            )));
        }
        let entry_count = reply
            .arg_u32(1)
            .ok_or_else(|| Error::Protocol("setup reply without entry count".into()))?;
        if entry_count == 0 {
            log::warn!("db: {} empty (0 entries)", request_type);
            return Ok(empty_result(request_type));
        }
        log::debug!("db: {}: {} entries available", request_type, entry_count);

        let render = Message::new(
            connection.next_transaction_id(),
            MessageType::Render,
            vec![
                Field::Int32(loc),
                Field::Int32(0),
                Field::Int32(entry_count),
                Field::Int32(0),
                Field::Int32(entry_count),
                Field::Int32(0),
            ],
        );
        connection.send(&render)?;
        let messages = connection.receive_render_stream(render_tries)?;

        Ok(if request_type == MessageType::MetadataRequest {
            QueryResult::Metadata(menu::parse_metadata(&messages))
        } else {
            QueryResult::Entries(menu::parse_list(&messages))
        })
    }

    /// Single-phase blob exchange.
    fn blob_exchange(
        &mut self,
        params: &QueryParams,
        ip: Ipv4Addr,
        request_type: MessageType,
        location: u8,
    ) -> Result<Arc<Vec<u8>>> {
        let own = self.config.own_device_number;
        let message_tries = self.config.message_recv_tries;
        let connection = self.pool.checkout(params.device, ip)?;

        let loc = locator(own, location, params.slot.code());
        let item_id = params.ids.first().copied().unwrap_or(0);

        let mut args = vec![Field::Int32(loc), Field::Int32(item_id)];
        match request_type {
            MessageType::WaveformRequest => args.push(Field::Int32(0)),
            MessageType::PreviewWaveformRequest => {
                args.insert(1, Field::Int32(4));
                args.push(Field::Int32(0));
            }
            _ => {}
        }

        let query = Message::new(connection.next_transaction_id(), request_type, args);
        log::debug!("db: {} query txn {}", request_type, query.transaction_id);
        connection.send(&query)?;

        let reply = connection.receive_message(message_tries)?;
        if reply.kind == MessageType::InvalidRequest {
            return Err(Error::Protocol(format!("{} got invalid_request", request_type)));
        }
        let flag = reply
            .arg_u32(2)
            .ok_or_else(|| Error::Protocol("blob reply without payload flag".into()))?;
        if flag == 0 {
            return Err(Error::Protocol(format!(
                "{} rejected (empty payload flag)",
                request_type
            )));
        }
        let blob = reply
            .args
            .get(3)
            .and_then(Field::as_bytes)
            .ok_or_else(|| Error::Protocol("blob reply without payload".into()))?;

        log::debug!("db: got {} bytes of blob data", blob.len());
        Ok(Arc::new(blob.to_vec()))
    }
}

fn empty_result(request_type: MessageType) -> QueryResult {
    if request_type == MessageType::MetadataRequest {
        QueryResult::Metadata(menu::TrackMetadata::default())
    } else {
        QueryResult::Entries(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locator_packing() {
        assert_eq!(locator(0, 1, 3), 0x0001_0301);
        assert_eq!(locator(2, 8, 2), 0x0208_0201);
        assert_eq!(locator(4, 1, 0), 0x0401_0001);
    }

    #[test]
    fn test_empty_result_shape() {
        assert_eq!(
            empty_result(MessageType::MetadataRequest),
            QueryResult::Metadata(menu::TrackMetadata::default())
        );
        assert_eq!(
            empty_result(MessageType::TitleRequest),
            QueryResult::Entries(Vec::new())
        );
    }
}
