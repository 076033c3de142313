// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Live registry of devices observed on the bus.
//!
//! Fed by the broadcast listeners with decoded keepalive, beat and status
//! packets. Devices expire when their keepalives stop; interested parties
//! subscribe to a change callback that fires whenever a device appears or
//! its observable state moves.
//!
//! Beat packets carry a coarse copy of pitch, BPM and beat position. They
//! are only applied until the first full status frame arrives for a device;
//! from then on the status stream is authoritative for those fields.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::announce::{
    BeatPacket, DeviceRole, KeepalivePacket, MediaSlot, MediaState, PlayState, StatusPacket,
    BEAT_UNKNOWN, BPM_UNKNOWN_RAW, CUE_DISTANCE_UNKNOWN,
};
use crate::db::TrackMetadata;

/// Time after the last packet before a device is dropped by [`DeviceRegistry::sweep`].
pub const DEVICE_TTL: Duration = Duration::from_secs(5);

/// Change subscriber: receives the registry and the number of the device
/// that changed. Runs synchronously on the ingesting thread, after the
/// registry lock is released; it may read the registry but must not assume
/// it can observe its own mutations.
pub type ChangeCallback = Arc<dyn Fn(&DeviceRegistry, u8) + Send + Sync>;

/// One device observed on the bus.
#[derive(Debug, Clone)]
pub struct Device {
    pub number: u8,
    pub model: String,
    pub firmware: String,
    pub ip: Ipv4Addr,
    pub mac: [u8; 6],

    /// Track tempo; `None` while unknown (no track, or sentinel on the wire).
    pub bpm: Option<f64>,
    pub pitch: f64,
    pub actual_pitch: f64,
    /// Position within the bar, 1..4, or 0 while unknown.
    pub beat: u32,
    pub beat_count: Option<u32>,
    pub cue_distance: Option<u32>,
    pub play_state: PlayState,
    pub usb_state: MediaState,
    pub sd_state: MediaState,

    pub roles: Vec<DeviceRole>,
    pub track_number: u32,
    /// Rekordbox id of the loaded track.
    pub track_id: u32,
    /// Device the loaded track is served from.
    pub loaded_device_number: u8,
    pub loaded_slot: MediaSlot,

    /// Metadata of the loaded track, once a metadata query resolved it.
    pub metadata: Option<TrackMetadata>,

    /// Once true, beat packets no longer overwrite pitch/BPM/beat.
    pub status_packet_received: bool,

    deadline: Instant,
}

impl Device {
    fn new(packet: &KeepalivePacket, ttl: Duration) -> Self {
        Self {
            number: packet.device_number,
            model: packet.model.clone(),
            firmware: String::new(),
            ip: packet.ip,
            mac: packet.mac,
            bpm: None,
            pitch: 1.0,
            actual_pitch: 1.0,
            beat: 0,
            beat_count: None,
            cue_distance: None,
            play_state: PlayState::NoTrack,
            usb_state: MediaState::NotLoaded,
            sd_state: MediaState::NotLoaded,
            roles: Vec::new(),
            track_number: 0,
            track_id: 0,
            loaded_device_number: 0,
            loaded_slot: MediaSlot::Empty,
            metadata: None,
            status_packet_received: false,
            deadline: Instant::now() + ttl,
        }
    }

    fn refresh_ttl(&mut self, ttl: Duration) {
        self.deadline = Instant::now() + ttl;
    }

    fn expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }
}

/// Registry of active devices, keyed by device number.
pub struct DeviceRegistry {
    devices: Mutex<Vec<Device>>,
    callback: Mutex<Option<ChangeCallback>>,
    ttl: Duration,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::with_ttl(DEVICE_TTL)
    }

    /// Registry with a custom expiry window.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            devices: Mutex::new(Vec::new()),
            callback: Mutex::new(None),
            ttl,
        }
    }

    /// Install the change subscriber, replacing any previous one.
    pub fn on_change(&self, callback: impl Fn(&DeviceRegistry, u8) + Send + Sync + 'static) {
        *self.callback.lock() = Some(Arc::new(callback));
    }

    /// Ingest a keepalive: create the device on first sight, re-index it if
    /// its announced number moved, and refresh its TTL.
    pub fn ingest_keepalive(&self, packet: &KeepalivePacket) {
        let mut changed = None;
        {
            let mut devices = self.devices.lock();
            match devices.iter_mut().find(|d| d.ip == packet.ip) {
                None => {
                    let device = Device::new(packet, self.ttl);
                    Self::evict_number_conflicts(&mut devices, packet.device_number, packet.ip);
                    devices.push(device);
                    changed = Some(packet.device_number);
                }
                Some(device) => {
                    if device.number != packet.device_number {
                        log::info!(
                            "registry: device {} changed number from {} to {}",
                            device.ip,
                            device.number,
                            packet.device_number
                        );
                        device.number = packet.device_number;
                        device.refresh_ttl(self.ttl);
                        Self::evict_number_conflicts(&mut devices, packet.device_number, packet.ip);
                        changed = Some(packet.device_number);
                    } else {
                        device.refresh_ttl(self.ttl);
                    }
                }
            }
        }
        if let Some(number) = changed {
            self.fire(number);
        }
    }

    /// Ingest a beat packet. Unknown devices are dropped. Playback fields
    /// are only taken from beats until a status frame has been seen.
    pub fn ingest_beat(&self, packet: &BeatPacket) {
        let mut changed = false;
        {
            let mut devices = self.devices.lock();
            let device = match devices.iter_mut().find(|d| d.number == packet.device_number) {
                Some(d) => d,
                None => return,
            };
            device.refresh_ttl(self.ttl);
            if !device.status_packet_received {
                device.pitch = packet.pitch;
                device.bpm = Some(packet.bpm);
                device.beat = packet.beat;
                changed = true;
            }
        }
        if changed {
            self.fire(packet.device_number);
        }
    }

    /// Ingest a status frame, overwriting all playback fields. Unknown
    /// devices are dropped. Sentinel wire values become `None` (or 0 for
    /// the bar position).
    pub fn ingest_status(&self, packet: &StatusPacket) {
        {
            let mut devices = self.devices.lock();
            let device = match devices.iter_mut().find(|d| d.number == packet.device_number) {
                Some(d) => d,
                None => return,
            };
            device.status_packet_received = true;
            device.firmware = packet.firmware.clone();
            device.bpm = if packet.bpm_raw == BPM_UNKNOWN_RAW {
                None
            } else {
                Some(f64::from(packet.bpm_raw) / 100.0)
            };
            device.pitch = packet.physical_pitch;
            device.actual_pitch = packet.actual_pitch;
            device.beat = if packet.beat == BEAT_UNKNOWN {
                0
            } else {
                packet.beat
            };
            device.beat_count = if packet.beat_count == BEAT_UNKNOWN {
                None
            } else {
                Some(packet.beat_count)
            };
            device.cue_distance = if packet.cue_distance == CUE_DISTANCE_UNKNOWN {
                None
            } else {
                Some(packet.cue_distance)
            };
            device.play_state = packet.play_state;
            device.usb_state = packet.usb_state;
            device.sd_state = packet.sd_state;
            device.roles = packet.state.active();
            device.track_number = packet.track_number;
            device.track_id = packet.track_id;
            device.loaded_device_number = packet.loaded_device_number;
            device.loaded_slot = packet.loaded_slot;
            device.refresh_ttl(self.ttl);
        }
        self.fire(packet.device_number);
    }

    /// Remove every device whose TTL elapsed. Removal is silent.
    pub fn sweep(&self) {
        let now = Instant::now();
        self.devices.lock().retain(|d| !d.expired(now));
    }

    /// Snapshot of the device with the given number.
    pub fn get(&self, number: u8) -> Option<Device> {
        self.devices.lock().iter().find(|d| d.number == number).cloned()
    }

    /// IP addresses of all active devices.
    pub fn list_ips(&self) -> Vec<Ipv4Addr> {
        self.devices.lock().iter().map(|d| d.ip).collect()
    }

    pub fn len(&self) -> usize {
        self.devices.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.lock().is_empty()
    }

    /// Attach `metadata` to every device whose loaded track matches the
    /// `(device, slot, track_id)` triple, firing a change event for each.
    pub fn store_metadata_by_loaded_track(
        &self,
        device_number: u8,
        slot: MediaSlot,
        track_id: u32,
        metadata: &TrackMetadata,
    ) {
        if device_number == 0 || slot == MediaSlot::Empty || track_id == 0 {
            return;
        }
        let mut updated = Vec::new();
        {
            let mut devices = self.devices.lock();
            for device in devices.iter_mut() {
                if device.loaded_device_number == device_number
                    && device.loaded_slot == slot
                    && device.track_id == track_id
                {
                    device.metadata = Some(metadata.clone());
                    updated.push(device.number);
                }
            }
        }
        for number in updated {
            self.fire(number);
        }
    }

    /// Device numbers must stay unique; a number takeover invalidates any
    /// stale entry still holding it.
    fn evict_number_conflicts(devices: &mut Vec<Device>, number: u8, keep_ip: Ipv4Addr) {
        devices.retain(|d| {
            let stale = d.number == number && d.ip != keep_ip;
            if stale {
                log::warn!(
                    "registry: dropping stale device {} at {}, number taken over by {}",
                    number,
                    d.ip,
                    keep_ip
                );
            }
            !stale
        });
    }

    fn fire(&self, number: u8) {
        let callback = self.callback.lock().clone();
        if let Some(cb) = callback {
            cb(self, number);
        }
    }
}
