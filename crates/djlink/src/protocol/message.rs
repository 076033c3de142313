// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! remotedb message framing.
//!
//! A message is a fixed header followed by its argument fields, all encoded
//! with the tagged [`Field`](super::Field) codec:
//!
//! ```text
//! +--------------------+---------------------+
//! | int32  magic       | always 0x872349ae   |
//! | int32  transaction | echoed in replies   |
//! | int16  type code   | see MessageType     |
//! | int8   arg count   | at most 12          |
//! | binary arg types   | 12 one-byte tags    |
//! | fields args        | arg-count fields    |
//! +--------------------+---------------------+
//! ```
//!
//! The stream carries no length prefix, so readers accumulate bytes and
//! reparse until a whole message (or message sequence) decodes.

use super::field::{Field, ParseError};

/// Leading magic of every message.
pub const MESSAGE_MAGIC: u32 = 0x872349ae;

/// Transaction id reserved for the connection setup exchange.
pub const SETUP_TRANSACTION_ID: u32 = 0xffff_fffe;

/// Argument-type slots in the message header.
const ARG_TYPE_SLOTS: usize = 12;

/// Message type codes understood by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Setup,
    InvalidRequest,
    RootMenuRequest,
    ArtistRequest,
    AlbumByArtistRequest,
    TitleRequest,
    TitleByAlbumRequest,
    TitleByArtistAlbumRequest,
    PlaylistRequest,
    MetadataRequest,
    ArtworkRequest,
    PreviewWaveformRequest,
    BeatgridRequest,
    WaveformRequest,
    Render,
    Success,
    MenuHeader,
    MenuItem,
    MenuFooter,
    /// A code this client does not interpret. Preserved for logging.
    Unknown(u16),
}

impl MessageType {
    /// Wire code of the message type.
    pub fn code(self) -> u16 {
        match self {
            Self::Setup => 0x0000,
            Self::InvalidRequest => 0x0001,
            Self::RootMenuRequest => 0x1000,
            Self::ArtistRequest => 0x1002,
            Self::AlbumByArtistRequest => 0x1102,
            Self::TitleRequest => 0x1004,
            Self::TitleByAlbumRequest => 0x1103,
            Self::TitleByArtistAlbumRequest => 0x1203,
            Self::PlaylistRequest => 0x1105,
            Self::MetadataRequest => 0x2002,
            Self::ArtworkRequest => 0x2003,
            Self::PreviewWaveformRequest => 0x2004,
            Self::BeatgridRequest => 0x2204,
            Self::WaveformRequest => 0x2904,
            Self::Render => 0x3000,
            Self::Success => 0x4000,
            Self::MenuHeader => 0x4001,
            Self::MenuItem => 0x4101,
            Self::MenuFooter => 0x4201,
            Self::Unknown(code) => code,
        }
    }

    /// Map a wire code back to a message type.
    pub fn from_code(code: u16) -> Self {
        match code {
            0x0000 => Self::Setup,
            0x0001 => Self::InvalidRequest,
            0x1000 => Self::RootMenuRequest,
            0x1002 => Self::ArtistRequest,
            0x1102 => Self::AlbumByArtistRequest,
            0x1004 => Self::TitleRequest,
            0x1103 => Self::TitleByAlbumRequest,
            0x1203 => Self::TitleByArtistAlbumRequest,
            0x1105 => Self::PlaylistRequest,
            0x2002 => Self::MetadataRequest,
            0x2003 => Self::ArtworkRequest,
            0x2004 => Self::PreviewWaveformRequest,
            0x2204 => Self::BeatgridRequest,
            0x2904 => Self::WaveformRequest,
            0x3000 => Self::Render,
            0x4000 => Self::Success,
            0x4001 => Self::MenuHeader,
            0x4101 => Self::MenuItem,
            0x4201 => Self::MenuFooter,
            other => Self::Unknown(other),
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Setup => f.write_str("setup"),
            Self::InvalidRequest => f.write_str("invalid_request"),
            Self::RootMenuRequest => f.write_str("root_menu_request"),
            Self::ArtistRequest => f.write_str("artist_request"),
            Self::AlbumByArtistRequest => f.write_str("album_by_artist_request"),
            Self::TitleRequest => f.write_str("title_request"),
            Self::TitleByAlbumRequest => f.write_str("title_by_album_request"),
            Self::TitleByArtistAlbumRequest => f.write_str("title_by_artist_album_request"),
            Self::PlaylistRequest => f.write_str("playlist_request"),
            Self::MetadataRequest => f.write_str("metadata_request"),
            Self::ArtworkRequest => f.write_str("artwork_request"),
            Self::PreviewWaveformRequest => f.write_str("preview_waveform_request"),
            Self::BeatgridRequest => f.write_str("beatgrid_request"),
            Self::WaveformRequest => f.write_str("waveform_request"),
            Self::Render => f.write_str("render"),
            Self::Success => f.write_str("success"),
            Self::MenuHeader => f.write_str("menu_header"),
            Self::MenuItem => f.write_str("menu_item"),
            Self::MenuFooter => f.write_str("menu_footer"),
            Self::Unknown(code) => write!(f, "unknown(0x{:04x})", code),
        }
    }
}

/// One message on a query connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub transaction_id: u32,
    pub kind: MessageType,
    pub args: Vec<Field>,
}

impl Message {
    pub fn new(transaction_id: u32, kind: MessageType, args: Vec<Field>) -> Self {
        Self {
            transaction_id,
            kind,
            args,
        }
    }

    /// Encode the message to wire format.
    pub fn build(&self) -> Result<Vec<u8>, ParseError> {
        if self.args.len() > ARG_TYPE_SLOTS {
            return Err(ParseError::TooManyArgs(self.args.len()));
        }

        let mut arg_types = [0u8; ARG_TYPE_SLOTS];
        for (slot, arg) in arg_types.iter_mut().zip(&self.args) {
            *slot = arg.arg_tag();
        }

        let mut out = Vec::with_capacity(64);
        Field::Int32(MESSAGE_MAGIC).build_into(&mut out);
        Field::Int32(self.transaction_id).build_into(&mut out);
        Field::Int16(self.kind.code()).build_into(&mut out);
        Field::Int8(self.args.len() as u8).build_into(&mut out);
        Field::Binary(arg_types.to_vec()).build_into(&mut out);
        for arg in &self.args {
            arg.build_into(&mut out);
        }
        Ok(out)
    }

    /// Decode one message from the front of `data`.
    ///
    /// Returns the message and the number of bytes consumed.
    /// [`ParseError::Incomplete`] means the buffer ends mid-message; read
    /// more bytes and call again with the grown buffer.
    pub fn parse(data: &[u8]) -> Result<(Self, usize), ParseError> {
        let mut offset = 0;

        let magic = Self::expect_u32(data, &mut offset, "magic")?;
        if magic != MESSAGE_MAGIC {
            return Err(ParseError::BadMagic(magic));
        }

        let transaction_id = Self::expect_u32(data, &mut offset, "transaction id")?;

        let (kind_field, used) = Field::parse(&data[offset..])?;
        offset += used;
        let kind = match kind_field {
            Field::Int16(code) => MessageType::from_code(code),
            _ => return Err(ParseError::UnexpectedField("type code")),
        };

        let (count_field, used) = Field::parse(&data[offset..])?;
        offset += used;
        let arg_count = match count_field {
            Field::Int8(n) => n as usize,
            _ => return Err(ParseError::UnexpectedField("argument count")),
        };
        if arg_count > ARG_TYPE_SLOTS {
            return Err(ParseError::TooManyArgs(arg_count));
        }

        // The argument-type list is redundant with the field tags; skip it.
        let (types_field, used) = Field::parse(&data[offset..])?;
        offset += used;
        if !matches!(types_field, Field::Binary(_)) {
            return Err(ParseError::UnexpectedField("argument types"));
        }

        let mut args = Vec::with_capacity(arg_count);
        for _ in 0..arg_count {
            let (arg, used) = Field::parse(&data[offset..])?;
            offset += used;
            args.push(arg);
        }

        Ok((
            Self {
                transaction_id,
                kind,
                args,
            },
            offset,
        ))
    }

    /// Decode a whole reply stream into its messages.
    ///
    /// Consumes the entire buffer; a trailing partial message surfaces as
    /// [`ParseError::Incomplete`] so the caller can keep reading.
    pub fn parse_sequence(data: &[u8]) -> Result<Vec<Self>, ParseError> {
        let mut messages = Vec::new();
        let mut offset = 0;
        while offset < data.len() {
            let (message, used) = Self::parse(&data[offset..])?;
            offset += used;
            messages.push(message);
        }
        Ok(messages)
    }

    /// Numeric value of argument `index`, if present and numeric.
    pub fn arg_u32(&self, index: usize) -> Option<u32> {
        self.args.get(index).and_then(Field::as_u32)
    }

    fn expect_u32(data: &[u8], offset: &mut usize, what: &'static str) -> Result<u32, ParseError> {
        let (field, used) = Field::parse(&data[*offset..])?;
        *offset += used;
        match field {
            Field::Int32(v) => Ok(v),
            _ => Err(ParseError::UnexpectedField(what)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Message {
        Message::new(
            17,
            MessageType::TitleRequest,
            vec![Field::Int32(0x00010301), Field::Int32(4)],
        )
    }

    #[test]
    fn test_build_layout() {
        let bytes = sample().build().expect("build");
        // magic field
        assert_eq!(&bytes[..5], &[0x11, 0x87, 0x23, 0x49, 0xae]);
        // transaction id field
        assert_eq!(&bytes[5..10], &[0x11, 0, 0, 0, 17]);
        // type code field
        assert_eq!(&bytes[10..13], &[0x10, 0x10, 0x04]);
        // argument count field
        assert_eq!(&bytes[13..15], &[0x0f, 2]);
        // argument type list: binary of 12 tags, two int slots used
        assert_eq!(bytes[15], 0x14);
        assert_eq!(&bytes[16..20], &[0, 0, 0, 12]);
        assert_eq!(&bytes[20..32], &[6, 6, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_roundtrip() {
        let message = sample();
        let bytes = message.build().expect("build");
        let (parsed, used) = Message::parse(&bytes).expect("parse");
        assert_eq!(parsed, message);
        assert_eq!(used, bytes.len());
    }

    #[test]
    fn test_roundtrip_mixed_args() {
        let message = Message::new(
            0xffff_fffe,
            MessageType::Setup,
            vec![
                Field::Int32(0),
                Field::String("CDJ-2000".into()),
                Field::Binary(vec![0xde, 0xad]),
            ],
        );
        let bytes = message.build().expect("build");
        let (parsed, _) = Message::parse(&bytes).expect("parse");
        assert_eq!(parsed, message);
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = sample().build().expect("build");
        bytes[1] = 0x00;
        assert_eq!(
            Message::parse(&bytes),
            Err(ParseError::BadMagic(0x002349ae))
        );
    }

    #[test]
    fn test_incomplete_message() {
        let bytes = sample().build().expect("build");
        for cut in [3, 12, 20, bytes.len() - 1] {
            assert_eq!(
                Message::parse(&bytes[..cut]),
                Err(ParseError::Incomplete),
                "cut at {}",
                cut
            );
        }
    }

    #[test]
    fn test_parse_sequence() {
        let mut bytes = Vec::new();
        bytes.extend(
            Message::new(1, MessageType::MenuHeader, vec![])
                .build()
                .expect("build"),
        );
        bytes.extend(sample().build().expect("build"));
        bytes.extend(
            Message::new(2, MessageType::MenuFooter, vec![])
                .build()
                .expect("build"),
        );

        let messages = Message::parse_sequence(&bytes).expect("parse sequence");
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].kind, MessageType::MenuHeader);
        assert_eq!(messages[2].kind, MessageType::MenuFooter);

        // Truncated trailing message keeps the whole parse pending.
        assert_eq!(
            Message::parse_sequence(&bytes[..bytes.len() - 2]),
            Err(ParseError::Incomplete)
        );
    }

    #[test]
    fn test_unknown_type_code_is_preserved() {
        let message = Message::new(9, MessageType::Unknown(0x4702), vec![]);
        let bytes = message.build().expect("build");
        let (parsed, _) = Message::parse(&bytes).expect("parse");
        assert_eq!(parsed.kind, MessageType::Unknown(0x4702));
        assert_eq!(parsed.kind.to_string(), "unknown(0x4702)");
    }

    #[test]
    fn test_too_many_args() {
        let args = vec![Field::Int32(0); 13];
        let message = Message::new(1, MessageType::Render, args);
        assert_eq!(message.build(), Err(ParseError::TooManyArgs(13)));
    }

    #[test]
    fn test_arg_u32() {
        let message = sample();
        assert_eq!(message.arg_u32(1), Some(4));
        assert_eq!(message.arg_u32(5), None);
    }
}
