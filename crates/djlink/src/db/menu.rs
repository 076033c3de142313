// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Menu reply parsing.
//!
//! Rendered list replies are streams of `menu_item` messages between a
//! `menu_header` and a `menu_footer`. Every item carries nine positional
//! sub-fields; which of them are meaningful depends on the item's type
//! code. Dual-column codes (`0xXX04`) combine a title column with a second
//! column whose own type code sits in the high byte.
//!
//! List queries yield one [`MenuEntry`] per item; metadata queries merge
//! all items of one track into a single [`TrackMetadata`] record.

use crate::protocol::{Field, Message, MessageType};

// Positional sub-fields of a menu item.
const POS_ID1: usize = 0;
const POS_ID2: usize = 1;
const POS_STRING1: usize = 3;
const POS_STRING2: usize = 5;
const POS_TYPE: usize = 6;
const POS_ID3: usize = 8;

/// String-valued columns that carry their own id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextKind {
    Artist,
    Album,
    Comment,
    Genre,
    OriginalArtist,
    Remixer,
    Key,
    Label,
}

impl TextKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Artist => "artist",
            Self::Album => "album",
            Self::Comment => "comment",
            Self::Genre => "genre",
            Self::OriginalArtist => "original_artist",
            Self::Remixer => "remixer",
            Self::Key => "key",
            Self::Label => "label",
        }
    }
}

/// Fields of a title column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TitleFields {
    pub title: String,
    pub artwork_id: u32,
    pub track_id: u32,
    pub artist_id: u32,
}

/// One parsed menu row.
#[derive(Debug, Clone, PartialEq)]
pub enum MenuEntry {
    Duration(u32),
    Rating(u32),
    Disc(u32),
    DjPlayCount(u32),
    Bitrate(u32),
    Bpm(f64),
    Title(TitleFields),
    Color {
        color: &'static str,
        text: String,
    },
    Text {
        kind: TextKind,
        value: String,
        id: u32,
    },
    DateAdded(String),
    Playlist {
        name: String,
        id: u32,
        parent_id: u32,
    },
    RootMenu {
        name: &'static str,
        menu_id: u32,
    },
    /// Dual-column row: a title plus the rendered sort column. `second` is
    /// `None` when the second column's code did not resolve.
    TitleAnd {
        title: TitleFields,
        second: Option<Box<MenuEntry>>,
    },
}

/// Semantic label behind a menu item type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemLabel {
    Folder,
    Album,
    Disc,
    Title,
    Genre,
    Artist,
    Playlist,
    Rating,
    Duration,
    Bpm,
    RecordLabel,
    Key,
    Bitrate,
    Year,
    Comment,
    OriginalArtist,
    Remixer,
    PlayCount,
    DateAdded,
    Color(&'static str),
    Root(&'static str),
    /// Dual column; payload is the second column's type code.
    TitleAnd(u16),
}

fn label_for_code(code: u16) -> Option<ItemLabel> {
    match code {
        0x0001 => Some(ItemLabel::Folder),
        0x0002 => Some(ItemLabel::Album),
        0x0003 => Some(ItemLabel::Disc),
        0x0004 => Some(ItemLabel::Title),
        0x0006 => Some(ItemLabel::Genre),
        0x0007 => Some(ItemLabel::Artist),
        0x0008 => Some(ItemLabel::Playlist),
        0x000a => Some(ItemLabel::Rating),
        0x000b => Some(ItemLabel::Duration),
        0x000d => Some(ItemLabel::Bpm),
        0x000e => Some(ItemLabel::RecordLabel),
        0x000f => Some(ItemLabel::Key),
        0x0010 => Some(ItemLabel::Bitrate),
        0x0011 => Some(ItemLabel::Year),
        0x0013 => Some(ItemLabel::Color("none")),
        0x0014 => Some(ItemLabel::Color("pink")),
        0x0015 => Some(ItemLabel::Color("red")),
        0x0016 => Some(ItemLabel::Color("orange")),
        0x0017 => Some(ItemLabel::Color("yellow")),
        0x0018 => Some(ItemLabel::Color("green")),
        0x0019 => Some(ItemLabel::Color("aqua")),
        0x001a => Some(ItemLabel::Color("blue")),
        0x001b => Some(ItemLabel::Color("purple")),
        0x0023 => Some(ItemLabel::Comment),
        0x0028 => Some(ItemLabel::OriginalArtist),
        0x0029 => Some(ItemLabel::Remixer),
        0x002a => Some(ItemLabel::PlayCount),
        0x002e => Some(ItemLabel::DateAdded),
        0x0080 => Some(ItemLabel::Root("genre")),
        0x0081 => Some(ItemLabel::Root("artist")),
        0x0082 => Some(ItemLabel::Root("album")),
        0x0083 => Some(ItemLabel::Root("track")),
        0x0084 => Some(ItemLabel::Root("playlist")),
        0x0085 => Some(ItemLabel::Root("bpm")),
        0x0086 => Some(ItemLabel::Root("rating")),
        0x0087 | 0x0092 => Some(ItemLabel::Root("time")),
        0x0088 => Some(ItemLabel::Root("remixer")),
        0x0089 => Some(ItemLabel::Root("label")),
        0x008a => Some(ItemLabel::Root("original_artist")),
        0x008b => Some(ItemLabel::Root("key")),
        0x008e => Some(ItemLabel::Root("color")),
        0x0090 => Some(ItemLabel::Root("folder")),
        0x0091 => Some(ItemLabel::Root("search")),
        0x0093 => Some(ItemLabel::Root("bitrate")),
        0x0094 => Some(ItemLabel::Root("filename")),
        0x0095 => Some(ItemLabel::Root("history")),
        0x0098 => Some(ItemLabel::Root("hot_cue_bank")),
        0x0204 | 0x0604 | 0x0704 | 0x0a04 | 0x0b04 | 0x0d04 | 0x0e04 | 0x0f04 | 0x1004
        | 0x1a04 | 0x2304 | 0x2804 | 0x2904 | 0x2a04 | 0x2e04 => {
            Some(ItemLabel::TitleAnd(code >> 8))
        }
        _ => None,
    }
}

/// Parse one `menu_item` argument list into an entry.
///
/// Returns `None` (with a warning) for unknown or unhandled type codes.
pub fn parse_item(args: &[Field]) -> Option<MenuEntry> {
    let id1 = args.get(POS_ID1).and_then(Field::as_u32)?;
    let id2 = args.get(POS_ID2).and_then(Field::as_u32)?;
    let string1 = args.get(POS_STRING1).and_then(Field::as_str)?;
    let string2 = args.get(POS_STRING2).and_then(Field::as_str)?;
    let code = args.get(POS_TYPE).and_then(Field::as_u32)? as u16;
    let id3 = args.get(POS_ID3).and_then(Field::as_u32)?;

    parse_columns(id1, id2, id3, string1, string2, code)
}

/// Parse one column set. Dual-column rows re-enter here for their second
/// column with the ids rearranged the way the devices lay them out: the
/// second column's value string is `string2` and its id is `id1`.
fn parse_columns(
    id1: u32,
    id2: u32,
    id3: u32,
    string1: &str,
    string2: &str,
    code: u16,
) -> Option<MenuEntry> {
    let label = match label_for_code(code) {
        Some(label) => label,
        None => {
            log::warn!("db: menu item type 0x{:04x} unknown", code);
            return None;
        }
    };

    let entry = match label {
        ItemLabel::Duration => MenuEntry::Duration(id2),
        ItemLabel::Rating => MenuEntry::Rating(id2),
        ItemLabel::Disc => MenuEntry::Disc(id2),
        ItemLabel::PlayCount => MenuEntry::DjPlayCount(id2),
        ItemLabel::Bitrate => MenuEntry::Bitrate(id2),
        ItemLabel::Bpm => MenuEntry::Bpm(f64::from(id2) / 100.0),
        ItemLabel::Title => MenuEntry::Title(TitleFields {
            title: string1.to_owned(),
            artwork_id: id3,
            track_id: id2,
            artist_id: id1,
        }),
        ItemLabel::Color(color) => MenuEntry::Color {
            color,
            text: string1.to_owned(),
        },
        ItemLabel::Artist => text_entry(TextKind::Artist, string1, id1),
        ItemLabel::Album => text_entry(TextKind::Album, string1, id1),
        ItemLabel::Comment => text_entry(TextKind::Comment, string1, id1),
        ItemLabel::Genre => text_entry(TextKind::Genre, string1, id1),
        ItemLabel::OriginalArtist => text_entry(TextKind::OriginalArtist, string1, id1),
        ItemLabel::Remixer => text_entry(TextKind::Remixer, string1, id1),
        ItemLabel::Key => text_entry(TextKind::Key, string1, id1),
        ItemLabel::RecordLabel => text_entry(TextKind::Label, string1, id1),
        ItemLabel::DateAdded => MenuEntry::DateAdded(string1.to_owned()),
        ItemLabel::Playlist => MenuEntry::Playlist {
            name: string1.to_owned(),
            id: id2,
            parent_id: id1,
        },
        ItemLabel::Root(name) => MenuEntry::RootMenu {
            name,
            menu_id: id2,
        },
        ItemLabel::TitleAnd(second_code) => {
            let title = TitleFields {
                title: string1.to_owned(),
                artwork_id: id3,
                track_id: id2,
                artist_id: id1,
            };
            let second = parse_columns(id1, id1, id3, string2, "", second_code);
            if second.is_none() {
                log::warn!(
                    "db: second column 0x{:04x} of menu item 0x{:04x} not parseable",
                    second_code,
                    code
                );
            }
            MenuEntry::TitleAnd {
                title,
                second: second.map(Box::new),
            }
        }
        ItemLabel::Folder | ItemLabel::Year => {
            log::warn!("db: unhandled menu item type 0x{:04x}", code);
            return None;
        }
    };
    Some(entry)
}

fn text_entry(kind: TextKind, value: &str, id: u32) -> MenuEntry {
    MenuEntry::Text {
        kind,
        value: value.to_owned(),
        id,
    }
}

/// Parse a rendered list reply into its rows.
pub fn parse_list(messages: &[Message]) -> Vec<MenuEntry> {
    let mut entries = Vec::new();
    for message in messages {
        match message.kind {
            MessageType::MenuHeader => continue,
            MessageType::MenuFooter => break,
            MessageType::MenuItem => {}
            other => {
                log::warn!("db: list element is {}, not menu_item", other);
                continue;
            }
        }
        if let Some(entry) = parse_item(&message.args) {
            entries.push(entry);
        }
    }
    if messages.last().map(|m| m.kind) != Some(MessageType::MenuFooter) {
        log::warn!("db: list reply not ending with menu_footer");
    }
    entries
}

/// Parse a rendered metadata reply, merging all items into one record.
pub fn parse_metadata(messages: &[Message]) -> TrackMetadata {
    let mut metadata = TrackMetadata::default();
    for message in messages {
        match message.kind {
            MessageType::MenuHeader => continue,
            MessageType::MenuFooter => break,
            MessageType::MenuItem => {}
            other => {
                log::warn!("db: metadata element is {}, not menu_item", other);
                continue;
            }
        }
        if let Some(entry) = parse_item(&message.args) {
            metadata.apply(&entry);
        }
    }
    if messages.last().map(|m| m.kind) != Some(MessageType::MenuFooter) {
        log::warn!("db: metadata reply not ending with menu_footer, buffer too small?");
    }
    metadata
}

/// Merged metadata record of one track.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackMetadata {
    pub title: Option<String>,
    pub track_id: Option<u32>,
    pub artwork_id: Option<u32>,

    pub artist: Option<String>,
    pub artist_id: Option<u32>,
    pub album: Option<String>,
    pub album_id: Option<u32>,
    pub genre: Option<String>,
    pub genre_id: Option<u32>,
    pub comment: Option<String>,
    pub comment_id: Option<u32>,
    pub key: Option<String>,
    pub key_id: Option<u32>,
    pub label: Option<String>,
    pub label_id: Option<u32>,
    pub original_artist: Option<String>,
    pub original_artist_id: Option<u32>,
    pub remixer: Option<String>,
    pub remixer_id: Option<u32>,

    pub duration: Option<u32>,
    pub rating: Option<u32>,
    pub disc: Option<u32>,
    pub bitrate: Option<u32>,
    pub dj_play_count: Option<u32>,
    pub bpm: Option<f64>,
    pub color: Option<&'static str>,
    pub color_text: Option<String>,
    pub date_added: Option<String>,
}

impl TrackMetadata {
    /// Fold one entry into the record. Later entries win on overlap.
    pub fn apply(&mut self, entry: &MenuEntry) {
        match entry {
            MenuEntry::Duration(v) => self.duration = Some(*v),
            MenuEntry::Rating(v) => self.rating = Some(*v),
            MenuEntry::Disc(v) => self.disc = Some(*v),
            MenuEntry::DjPlayCount(v) => self.dj_play_count = Some(*v),
            MenuEntry::Bitrate(v) => self.bitrate = Some(*v),
            MenuEntry::Bpm(v) => self.bpm = Some(*v),
            MenuEntry::Title(title) => self.apply_title(title),
            MenuEntry::Color { color, text } => {
                self.color = Some(*color);
                self.color_text = Some(text.clone());
            }
            MenuEntry::Text { kind, value, id } => {
                let (slot, id_slot) = match kind {
                    TextKind::Artist => (&mut self.artist, &mut self.artist_id),
                    TextKind::Album => (&mut self.album, &mut self.album_id),
                    TextKind::Comment => (&mut self.comment, &mut self.comment_id),
                    TextKind::Genre => (&mut self.genre, &mut self.genre_id),
                    TextKind::OriginalArtist => {
                        (&mut self.original_artist, &mut self.original_artist_id)
                    }
                    TextKind::Remixer => (&mut self.remixer, &mut self.remixer_id),
                    TextKind::Key => (&mut self.key, &mut self.key_id),
                    TextKind::Label => (&mut self.label, &mut self.label_id),
                };
                *slot = Some(value.clone());
                *id_slot = Some(*id);
            }
            MenuEntry::DateAdded(date) => self.date_added = Some(date.clone()),
            // Playlist and root-menu rows carry no track fields.
            MenuEntry::Playlist { .. } | MenuEntry::RootMenu { .. } => {}
            MenuEntry::TitleAnd { title, second } => {
                self.apply_title(title);
                if let Some(second) = second {
                    self.apply(second);
                }
            }
        }
    }

    fn apply_title(&mut self, title: &TitleFields) {
        self.title = Some(title.title.clone());
        self.artwork_id = Some(title.artwork_id);
        self.track_id = Some(title.track_id);
        self.artist_id = Some(title.artist_id);
    }
}
