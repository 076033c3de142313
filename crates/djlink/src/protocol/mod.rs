// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wire codec for the query protocol and related constants.
//!
//! All integers on the wire are big-endian unless a submodule says
//! otherwise. The broadcast side of the bus (keepalive, beat, status) has
//! fixed well-known UDP ports; the query side is TCP with a per-device port
//! resolved through [`query_port`].

mod beatgrid;
mod field;
mod message;
mod query_port;

pub use beatgrid::{Beatgrid, GridBeat};
pub use field::{Field, ParseError};
pub use message::{Message, MessageType, MESSAGE_MAGIC, SETUP_TRANSACTION_ID};
pub use query_port::{build_port_query, parse_port_reply, QUERY_PORT_SERVICE};

/// UDP port for keepalive broadcasts.
pub const KEEPALIVE_PORT: u16 = 50000;

/// UDP port for beat broadcasts.
pub const BEAT_PORT: u16 = 50001;

/// UDP port for device status frames.
pub const STATUS_PORT: u16 = 50002;
