// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end worker tests against an in-process mock device.
//!
//! The mock runs the directory service and a query server on loopback and
//! answers with canned replies, recording every query it receives.

use std::io::{Read, Write};
use std::net::{Ipv4Addr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::announce::{KeepalivePacket, MediaSlot, PlayState, StatusPacket};
use crate::config::ClientConfig;
use crate::db::request::{Callback, QueryResult, SortMode};
use crate::db::store::StoreKind;
use crate::db::DbClient;
use crate::protocol::{Field, Message, MessageType, ParseError, SETUP_TRANSACTION_ID};
use crate::registry::DeviceRegistry;

// ============================================================================
// Mock device
// ============================================================================

#[derive(Clone)]
enum Plan {
    /// Answer blob queries with this payload.
    Blob(Vec<u8>),
    /// Reject blob queries with invalid_request.
    BlobDenied,
    /// Answer menu queries with one title row per name.
    Menu {
        titles: Vec<&'static str>,
        footer: bool,
    },
    /// Answer a metadata exchange with title, artist and duration rows.
    Metadata,
}

struct MockDevice {
    service_port: u16,
    accepts: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<Message>>>,
}

impl MockDevice {
    fn spawn(plan: Plan) -> Self {
        let db_listener = TcpListener::bind("127.0.0.1:0").expect("bind query server");
        let db_port = db_listener.local_addr().expect("local addr").port();
        let service_listener = TcpListener::bind("127.0.0.1:0").expect("bind directory");
        let service_port = service_listener.local_addr().expect("local addr").port();

        thread::spawn(move || {
            for stream in service_listener.incoming() {
                let mut stream = match stream {
                    Ok(s) => s,
                    Err(_) => return,
                };
                let mut probe = [0u8; 19];
                let _ = stream.read_exact(&mut probe);
                let _ = stream.write_all(&db_port.to_be_bytes());
            }
        });

        let accepts = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(Mutex::new(Vec::new()));
        {
            let accepts = Arc::clone(&accepts);
            let requests = Arc::clone(&requests);
            thread::spawn(move || {
                for stream in db_listener.incoming() {
                    let stream = match stream {
                        Ok(s) => s,
                        Err(_) => return,
                    };
                    accepts.fetch_add(1, Ordering::SeqCst);
                    let plan = plan.clone();
                    let requests = Arc::clone(&requests);
                    thread::spawn(move || serve(stream, plan, requests));
                }
            });
        }

        Self {
            service_port,
            accepts,
            requests,
        }
    }

    fn accepts(&self) -> usize {
        self.accepts.load(Ordering::SeqCst)
    }

    fn requests(&self) -> Vec<Message> {
        self.requests.lock().clone()
    }
}

fn serve(mut stream: TcpStream, plan: Plan, requests: Arc<Mutex<Vec<Message>>>) {
    // Bare int32 greeting.
    let mut greeting = [0u8; 5];
    if stream.read_exact(&mut greeting).is_err() {
        return;
    }
    let _ = stream.write_all(&Field::Int32(1).build());

    loop {
        let message = match read_message(&mut stream) {
            Some(m) => m,
            None => return,
        };
        requests.lock().push(message.clone());
        let txn = message.transaction_id;

        let replies: Vec<Message> = match message.kind {
            MessageType::Setup => vec![Message::new(
                txn,
                MessageType::Success,
                vec![Field::Int32(0), Field::Int32(3)],
            )],
            MessageType::Render => match &plan {
                Plan::Menu { titles, footer } => render_stream(txn, titles, *footer),
                Plan::Metadata => metadata_stream(txn),
                _ => Vec::new(),
            },
            _ => match &plan {
                Plan::Blob(bytes) => vec![Message::new(
                    txn,
                    MessageType::Success,
                    vec![
                        Field::Int32(0),
                        Field::Int32(bytes.len() as u32),
                        Field::Int32(1),
                        Field::Binary(bytes.clone()),
                    ],
                )],
                Plan::BlobDenied => vec![Message::new(txn, MessageType::InvalidRequest, vec![])],
                Plan::Menu { titles, .. } => vec![Message::new(
                    txn,
                    MessageType::Success,
                    vec![Field::Int32(0), Field::Int32(titles.len() as u32)],
                )],
                Plan::Metadata => vec![Message::new(
                    txn,
                    MessageType::Success,
                    vec![Field::Int32(0), Field::Int32(3)],
                )],
            },
        };
        for reply in replies {
            let _ = stream.write_all(&reply.build().expect("build reply"));
        }
    }
}

fn read_message(stream: &mut TcpStream) -> Option<Message> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        match Message::parse(&buf) {
            Ok((message, _)) => return Some(message),
            Err(ParseError::Incomplete) => continue,
            Err(_) => return None,
        }
    }
}

fn menu_item(id1: u32, id2: u32, id3: u32, s1: &str, code: u16) -> Message {
    Message::new(
        0,
        MessageType::MenuItem,
        vec![
            Field::Int32(id1),
            Field::Int32(id2),
            Field::Int32((s1.len() as u32 + 1) * 2),
            Field::String(s1.into()),
            Field::Int32(2),
            Field::String("".into()),
            Field::Int32(u32::from(code)),
            Field::Int32(0),
            Field::Int32(id3),
        ],
    )
}

fn render_stream(txn: u32, titles: &[&str], footer: bool) -> Vec<Message> {
    let mut messages = vec![Message::new(txn, MessageType::MenuHeader, vec![])];
    for (index, title) in titles.iter().enumerate() {
        messages.push(menu_item(index as u32, 100 + index as u32, 7, title, 0x0004));
    }
    if footer {
        messages.push(Message::new(txn, MessageType::MenuFooter, vec![]));
    }
    messages
}

fn metadata_stream(txn: u32) -> Vec<Message> {
    vec![
        Message::new(txn, MessageType::MenuHeader, vec![]),
        menu_item(11, 42, 7, "Strobe", 0x0004),
        menu_item(11, 0, 0, "deadmau5", 0x0007),
        menu_item(0, 215, 0, "", 0x000b),
        Message::new(txn, MessageType::MenuFooter, vec![]),
    ]
}

// ============================================================================
// Test plumbing
// ============================================================================

fn test_config(service_port: u16) -> ClientConfig {
    ClientConfig {
        query_port_service: service_port,
        connect_timeout: Duration::from_secs(1),
        read_timeout: Duration::from_millis(25),
        pop_timeout: Duration::from_millis(25),
        defer_delay: Duration::from_millis(25),
        ..Default::default()
    }
}

fn registry_with_device(number: u8, play_state: PlayState) -> Arc<DeviceRegistry> {
    let registry = Arc::new(DeviceRegistry::new());
    registry.ingest_keepalive(&KeepalivePacket {
        model: "CDJ-2000".into(),
        ip: Ipv4Addr::LOCALHOST,
        mac: [0, 0x17, 0x42, 0, 0, number],
        device_number: number,
    });
    registry.ingest_status(&StatusPacket {
        device_number: number,
        play_state,
        ..Default::default()
    });
    registry
}

fn result_channel() -> (Callback, mpsc::Receiver<Option<QueryResult>>) {
    let (tx, rx) = mpsc::channel();
    let callback: Callback = Box::new(move |_, _, result| {
        let _ = tx.send(result);
    });
    (callback, rx)
}

fn wait_result(rx: &mpsc::Receiver<Option<QueryResult>>) -> Option<QueryResult> {
    rx.recv_timeout(Duration::from_secs(5)).expect("callback fired")
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn test_artwork_fetch_and_memoization() {
    let artwork = vec![0xaa; 64];
    let device = MockDevice::spawn(Plan::Blob(artwork.clone()));
    let registry = registry_with_device(3, PlayState::Playing);
    let mut client =
        DbClient::start(test_config(device.service_port), registry).expect("start client");

    let (cb1, rx1) = result_channel();
    client.get_artwork(3, MediaSlot::Usb, 42, Some(cb1));
    match wait_result(&rx1) {
        Some(QueryResult::Blob(bytes)) => assert_eq!(*bytes, artwork),
        other => panic!("expected artwork blob, got {:?}", other),
    }
    assert_eq!(device.accepts(), 1);
    assert_eq!(client.stores().len(StoreKind::Artwork), 1);

    // Same triple again: served from the store, no further socket traffic.
    let (cb2, rx2) = result_channel();
    client.get_artwork(3, MediaSlot::Usb, 42, Some(cb2));
    match wait_result(&rx2) {
        Some(QueryResult::Blob(bytes)) => assert_eq!(*bytes, artwork),
        other => panic!("expected memoized blob, got {:?}", other),
    }
    assert_eq!(device.accepts(), 1);

    client.stop();
}

#[test]
fn test_title_list_with_sort() {
    let device = MockDevice::spawn(Plan::Menu {
        titles: vec!["Strobe", "Ghosts"],
        footer: true,
    });
    let registry = registry_with_device(3, PlayState::Playing);
    let mut client =
        DbClient::start(test_config(device.service_port), registry).expect("start client");

    let (cb, rx) = result_channel();
    client.get_titles(3, MediaSlot::Usb, SortMode::Bpm, Some(cb));
    match wait_result(&rx) {
        Some(QueryResult::Entries(entries)) => assert_eq!(entries.len(), 2),
        other => panic!("expected title entries, got {:?}", other),
    }

    let requests = device.requests();
    assert_eq!(requests.len(), 3);

    // Handshake uses the reserved transaction id.
    assert_eq!(requests[0].kind, MessageType::Setup);
    assert_eq!(requests[0].transaction_id, SETUP_TRANSACTION_ID);

    // Setup query: locator for (own 0, menu location 1, usb slot 3), then
    // the bpm sort code.
    assert_eq!(requests[1].kind, MessageType::TitleRequest);
    assert_eq!(requests[1].arg_u32(0), Some(0x0001_0301));
    assert_eq!(requests[1].arg_u32(1), Some(4));

    // Render query pulls both entries from offset 0.
    assert_eq!(requests[2].kind, MessageType::Render);
    let render_args: Vec<u32> = (0..6).map(|i| requests[2].arg_u32(i).expect("arg")).collect();
    assert_eq!(render_args, vec![0x0001_0301, 0, 2, 0, 2, 0]);

    // Transaction ids increase within the connection.
    assert!(requests[1].transaction_id < requests[2].transaction_id);

    client.stop();
}

#[test]
fn test_empty_list_skips_render() {
    let device = MockDevice::spawn(Plan::Menu {
        titles: vec![],
        footer: true,
    });
    let registry = registry_with_device(3, PlayState::Playing);
    let mut client =
        DbClient::start(test_config(device.service_port), registry).expect("start client");

    let (cb, rx) = result_channel();
    client.get_titles(3, MediaSlot::Usb, SortMode::Default, Some(cb));
    match wait_result(&rx) {
        Some(QueryResult::Entries(entries)) => assert!(entries.is_empty()),
        other => panic!("expected empty entries, got {:?}", other),
    }

    let kinds: Vec<MessageType> = device.requests().iter().map(|m| m.kind).collect();
    assert_eq!(kinds, vec![MessageType::Setup, MessageType::TitleRequest]);

    client.stop();
}

#[test]
fn test_defer_while_device_loads() {
    let mut blob = vec![0u8; 20];
    blob.extend_from_slice(&[1, 0, 0x32, 0x32, 0, 0, 0, 0]);
    blob.extend_from_slice(&[2, 0, 0x32, 0x32, 0xd5, 1, 0, 0]);
    let device = MockDevice::spawn(Plan::Blob(blob));
    let registry = registry_with_device(3, PlayState::LoadingTrack);
    let mut client = DbClient::start(test_config(device.service_port), Arc::clone(&registry))
        .expect("start client");

    let (cb, rx) = result_channel();
    client.get_beatgrid(3, MediaSlot::Usb, 99, Some(cb));

    // The request keeps cycling through the queue without touching the wire.
    thread::sleep(Duration::from_millis(200));
    assert_eq!(device.accepts(), 0);
    assert!(rx.try_recv().is_err());

    // Once the device finishes loading, the deferred request completes.
    registry.ingest_status(&StatusPacket {
        device_number: 3,
        play_state: PlayState::Playing,
        ..Default::default()
    });
    match wait_result(&rx) {
        Some(QueryResult::Beatgrid(grid)) => {
            assert_eq!(grid.beats.len(), 2);
            assert_eq!(grid.beats[1].time_ms, 469);
        }
        other => panic!("expected beatgrid, got {:?}", other),
    }
    assert_eq!(device.accepts(), 1);

    client.stop();
}

#[test]
fn test_render_without_footer_exhausts_budget() {
    let device = MockDevice::spawn(Plan::Menu {
        titles: vec!["Strobe"],
        footer: false,
    });
    let registry = registry_with_device(3, PlayState::Playing);
    let config = ClientConfig {
        render_recv_tries: 4,
        ..test_config(device.service_port)
    };
    let mut client = DbClient::start(config, registry).expect("start client");

    let (cb, rx) = result_channel();
    client.get_titles(3, MediaSlot::Usb, SortMode::Default, Some(cb));
    assert_eq!(wait_result(&rx), None);

    client.stop();
}

#[test]
fn test_blob_denied_delivers_failure() {
    let device = MockDevice::spawn(Plan::BlobDenied);
    let registry = registry_with_device(3, PlayState::Playing);
    let mut client =
        DbClient::start(test_config(device.service_port), registry).expect("start client");

    let (cb, rx) = result_channel();
    client.get_artwork(3, MediaSlot::Usb, 42, Some(cb));
    assert_eq!(wait_result(&rx), None);

    // The failure is memoized: a repeat delivers None without new traffic.
    let accepts = device.accepts();
    let (cb, rx) = result_channel();
    client.get_artwork(3, MediaSlot::Usb, 42, Some(cb));
    assert_eq!(wait_result(&rx), None);
    assert_eq!(device.accepts(), accepts);

    client.stop();
}

#[test]
fn test_metadata_merges_and_updates_registry() {
    let device = MockDevice::spawn(Plan::Metadata);
    let registry = Arc::new(DeviceRegistry::new());
    registry.ingest_keepalive(&KeepalivePacket {
        model: "CDJ-2000".into(),
        ip: Ipv4Addr::LOCALHOST,
        mac: [0, 0x17, 0x42, 0, 0, 3],
        device_number: 3,
    });
    // Device 3 plays track 42 from its own USB slot.
    registry.ingest_status(&StatusPacket {
        device_number: 3,
        play_state: PlayState::Playing,
        track_id: 42,
        loaded_device_number: 3,
        loaded_slot: MediaSlot::Usb,
        ..Default::default()
    });
    let mut client = DbClient::start(test_config(device.service_port), Arc::clone(&registry))
        .expect("start client");

    let (cb, rx) = result_channel();
    client.get_metadata(3, MediaSlot::Usb, 42, Some(cb));
    match wait_result(&rx) {
        Some(QueryResult::Metadata(metadata)) => {
            assert_eq!(metadata.title.as_deref(), Some("Strobe"));
            assert_eq!(metadata.artist.as_deref(), Some("deadmau5"));
            assert_eq!(metadata.duration, Some(215));
        }
        other => panic!("expected metadata, got {:?}", other),
    }

    // The registry learned the metadata of the loaded track.
    let loaded = registry.get(3).expect("device");
    assert_eq!(
        loaded.metadata.as_ref().and_then(|m| m.title.as_deref()),
        Some("Strobe")
    );

    client.stop();
}

#[test]
fn test_playlist_argument_arithmetic() {
    let device = MockDevice::spawn(Plan::Menu {
        titles: vec![],
        footer: true,
    });
    let registry = registry_with_device(3, PlayState::Playing);
    let mut client =
        DbClient::start(test_config(device.service_port), registry).expect("start client");

    let (cb, rx) = result_channel();
    client.get_playlists(3, MediaSlot::Usb, 0, Some(cb));
    wait_result(&rx);

    let (cb, rx) = result_channel();
    client.get_playlist(3, MediaSlot::Usb, 5, 7, SortMode::Default, Some(cb));
    wait_result(&rx);

    let playlists: Vec<Message> = device
        .requests()
        .into_iter()
        .filter(|m| m.kind == MessageType::PlaylistRequest)
        .collect();
    assert_eq!(playlists.len(), 2);

    // Folder listing: no sort, folder id, folder mode.
    assert_eq!(playlists[0].arg_u32(1), Some(0));
    assert_eq!(playlists[0].arg_u32(2), Some(0));
    assert_eq!(playlists[0].arg_u32(3), Some(1));

    // Playlist listing: the playlist id wins over the folder id.
    assert_eq!(playlists[1].arg_u32(1), Some(0));
    assert_eq!(playlists[1].arg_u32(2), Some(7));
    assert_eq!(playlists[1].arg_u32(3), Some(0));

    client.stop();
}

#[test]
fn test_unknown_device_is_discarded() {
    let registry = Arc::new(DeviceRegistry::new());
    let config = ClientConfig {
        pop_timeout: Duration::from_millis(25),
        ..Default::default()
    };
    let mut client = DbClient::start(config, registry).expect("start client");

    let (cb, rx) = result_channel();
    client.get_artwork(2, MediaSlot::Usb, 42, Some(cb));

    // No device 2 in the registry: the request vanishes without a callback.
    thread::sleep(Duration::from_millis(150));
    assert!(rx.try_recv().is_err());

    client.stop();
}

#[test]
fn test_invalid_device_numbers_dropped_at_enqueue() {
    let registry = Arc::new(DeviceRegistry::new());
    let mut client = DbClient::start(ClientConfig::default(), registry).expect("start client");

    let (cb0, rx0) = result_channel();
    client.get_artwork(0, MediaSlot::Usb, 42, Some(cb0));
    let (cb5, rx5) = result_channel();
    client.get_artwork(5, MediaSlot::Usb, 42, Some(cb5));

    thread::sleep(Duration::from_millis(100));
    assert!(rx0.try_recv().is_err());
    assert!(rx5.try_recv().is_err());

    client.stop();
}

#[test]
fn test_idle_sweep_closes_connection() {
    let device = MockDevice::spawn(Plan::Blob(vec![1, 2, 3]));
    let registry = registry_with_device(3, PlayState::Playing);
    let config = ClientConfig {
        connection_ttl_ticks: 2,
        ..test_config(device.service_port)
    };
    let mut client = DbClient::start(config, registry).expect("start client");

    let (cb, rx) = result_channel();
    client.get_artwork(3, MediaSlot::Usb, 42, Some(cb));
    wait_result(&rx);
    assert_eq!(device.accepts(), 1);

    // Idle long enough for the sweep to retire the connection; a fresh
    // request then opens a new one.
    thread::sleep(Duration::from_millis(300));
    let (cb, rx) = result_channel();
    client.get_artwork(3, MediaSlot::Usb, 43, Some(cb));
    wait_result(&rx);
    assert_eq!(device.accepts(), 2);

    client.stop();
}
