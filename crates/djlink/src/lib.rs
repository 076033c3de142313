// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # djlink - Pro DJ Link client library
//!
//! A pure Rust client for the LAN protocol professional media players use
//! to find each other, share tempo, and serve track data to their peers.
//! This crate is strictly an observer on the bus: it tracks the devices
//! announcing themselves and pulls track metadata, artwork, waveforms and
//! beatgrids from their database servers. It never emulates a device.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use djlink::{ClientConfig, DbClient, DeviceRegistry, MediaSlot};
//!
//! fn main() -> djlink::Result<()> {
//!     let registry = Arc::new(DeviceRegistry::new());
//!     registry.on_change(|_, number| println!("device {} changed", number));
//!
//!     // UDP listeners (not part of this crate) feed the registry with
//!     // decoded keepalive / beat / status packets.
//!
//!     let client = DbClient::start(ClientConfig::default(), Arc::clone(&registry))?;
//!     client.get_metadata(2, MediaSlot::Usb, 42, Some(Box::new(|_, _, result| {
//!         println!("metadata: {:?}", result);
//!     })));
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------+
//! |                    Broadcast listeners (external)            |
//! |        keepalive :50000 | beat :50001 | status :50002        |
//! +------------------------------|-------------------------------+
//!                                v  decoded packets
//! +--------------------------------------------------------------+
//! |  DeviceRegistry   TTL-tracked device table + change events   |
//! +------------------------------|-------------------------------+
//!                                | device lookups
//! +------------------------------|-------------------------------+
//! |  DbClient         request queue -> worker thread             |
//! |                   sticky TCP connections, typed queries,     |
//! |                   reply parsing, memo stores                 |
//! +--------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`DeviceRegistry`] | Live table of devices on the bus |
//! | [`Device`] | Identity and playback state of one device |
//! | [`DbClient`] | Queued, memoizing query client |
//! | [`TrackMetadata`] | Merged metadata record of one track |
//! | [`ClientConfig`] | Tunables of the query client |

pub mod announce;
pub mod config;
pub mod db;
pub mod error;
pub mod protocol;
pub mod registry;

pub use announce::{
    BeatPacket, DeviceRole, KeepalivePacket, MediaSlot, MediaState, PlayState, RoleFlags,
    StatusPacket,
};
pub use config::ClientConfig;
pub use db::{
    Callback, DbClient, MenuEntry, QueryKind, QueryParams, QueryResult, SortMode, TrackMetadata,
};
pub use error::{Error, Result};
pub use protocol::{Beatgrid, GridBeat};
pub use registry::{Device, DeviceRegistry};
