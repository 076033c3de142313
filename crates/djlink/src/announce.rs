// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Decoded broadcast packet types.
//!
//! The UDP listeners that receive and decode the raw broadcast frames live
//! outside this crate; these are the decoded shapes they hand to the
//! [`DeviceRegistry`](crate::registry::DeviceRegistry). Sentinel values
//! (unknown BPM, unknown beat count, unknown cue distance) arrive verbatim
//! and are translated by the registry.

use std::net::Ipv4Addr;

/// Wire value a status frame carries for "BPM unknown" (raw centi-BPM).
pub const BPM_UNKNOWN_RAW: u32 = 65536;

/// Wire value for "beat / beat count unknown".
pub const BEAT_UNKNOWN: u32 = 0xffff_ffff;

/// Wire value for "cue distance unknown".
pub const CUE_DISTANCE_UNKNOWN: u32 = 511;

/// Periodic presence announcement. Carries identity only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepalivePacket {
    pub model: String,
    pub ip: Ipv4Addr,
    pub mac: [u8; 6],
    pub device_number: u8,
}

/// Per-beat broadcast with coarse playback data.
#[derive(Debug, Clone, PartialEq)]
pub struct BeatPacket {
    pub device_number: u8,
    pub bpm: f64,
    pub pitch: f64,
    /// Position within the bar, 1..4.
    pub beat: u32,
}

/// Full per-device status frame.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusPacket {
    pub device_number: u8,
    pub firmware: String,
    /// Track tempo in centi-BPM, [`BPM_UNKNOWN_RAW`] when no track is loaded.
    pub bpm_raw: u32,
    /// Pitch shown on the fader.
    pub physical_pitch: f64,
    /// Pitch actually applied (differs while slides settle).
    pub actual_pitch: f64,
    /// Position within the bar, [`BEAT_UNKNOWN`] when idle.
    pub beat: u32,
    /// Absolute beat counter, [`BEAT_UNKNOWN`] when idle.
    pub beat_count: u32,
    /// Beats until the next memory cue, [`CUE_DISTANCE_UNKNOWN`] when none.
    pub cue_distance: u32,
    pub play_state: PlayState,
    pub usb_state: MediaState,
    pub sd_state: MediaState,
    pub state: RoleFlags,
    pub track_number: u32,
    /// Rekordbox id of the loaded track.
    pub track_id: u32,
    /// Device the loaded track was pulled from.
    pub loaded_device_number: u8,
    pub loaded_slot: MediaSlot,
}

impl Default for StatusPacket {
    fn default() -> Self {
        Self {
            device_number: 0,
            firmware: String::new(),
            bpm_raw: BPM_UNKNOWN_RAW,
            physical_pitch: 1.0,
            actual_pitch: 1.0,
            beat: BEAT_UNKNOWN,
            beat_count: BEAT_UNKNOWN,
            cue_distance: CUE_DISTANCE_UNKNOWN,
            play_state: PlayState::NoTrack,
            usb_state: MediaState::NotLoaded,
            sd_state: MediaState::NotLoaded,
            state: RoleFlags::default(),
            track_number: 0,
            track_id: 0,
            loaded_device_number: 0,
            loaded_slot: MediaSlot::Empty,
        }
    }
}

/// Playback condition reported in status frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayState {
    NoTrack,
    LoadingTrack,
    Playing,
    Looping,
    Paused,
    Cued,
    Cuing,
    Searching,
    SpunDown,
    Ended,
    CannotPlayTrack,
    Emergency,
}

impl PlayState {
    /// Wire code of the state.
    pub fn code(self) -> u8 {
        match self {
            Self::NoTrack => 0x00,
            Self::LoadingTrack => 0x02,
            Self::Playing => 0x03,
            Self::Looping => 0x04,
            Self::Paused => 0x05,
            Self::Cued => 0x06,
            Self::Cuing => 0x07,
            Self::Searching => 0x09,
            Self::SpunDown => 0x0e,
            Self::Ended => 0x11,
            Self::CannotPlayTrack => 0xe8,
            Self::Emergency => 0xe9,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(Self::NoTrack),
            0x02 => Some(Self::LoadingTrack),
            0x03 => Some(Self::Playing),
            0x04 => Some(Self::Looping),
            0x05 => Some(Self::Paused),
            0x06 => Some(Self::Cued),
            0x07 => Some(Self::Cuing),
            0x09 => Some(Self::Searching),
            0x0e => Some(Self::SpunDown),
            0x11 => Some(Self::Ended),
            0xe8 => Some(Self::CannotPlayTrack),
            0xe9 => Some(Self::Emergency),
            _ => None,
        }
    }

    /// Devices in these states reject media queries; requests against them
    /// are deferred instead of sent.
    pub fn defers_media_queries(self) -> bool {
        matches!(
            self,
            Self::NoTrack | Self::LoadingTrack | Self::CannotPlayTrack | Self::Emergency
        )
    }
}

/// Condition of a removable media bay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaState {
    NotLoaded,
    Loading,
    Loaded,
    Unmounting,
}

/// Media bay a track can be served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaSlot {
    Empty,
    Cd,
    Sd,
    Usb,
    Rekordbox,
}

impl MediaSlot {
    /// Wire code, used verbatim in query locators.
    pub fn code(self) -> u8 {
        match self {
            Self::Empty => 0,
            Self::Cd => 1,
            Self::Sd => 2,
            Self::Usb => 3,
            Self::Rekordbox => 4,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Empty),
            1 => Some(Self::Cd),
            2 => Some(Self::Sd),
            3 => Some(Self::Usb),
            4 => Some(Self::Rekordbox),
            _ => None,
        }
    }
}

/// Roles a device can hold on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceRole {
    OnAir,
    Sync,
    Master,
    Play,
}

/// Role bits of a status frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoleFlags {
    pub on_air: bool,
    pub sync: bool,
    pub master: bool,
    pub play: bool,
}

impl RoleFlags {
    /// The roles that are set, in wire order.
    pub fn active(&self) -> Vec<DeviceRole> {
        let mut roles = Vec::new();
        if self.on_air {
            roles.push(DeviceRole::OnAir);
        }
        if self.sync {
            roles.push(DeviceRole::Sync);
        }
        if self.master {
            roles.push(DeviceRole::Master);
        }
        if self.play {
            roles.push(DeviceRole::Play);
        }
        roles
    }
}
