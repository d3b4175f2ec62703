//! Binary frame codec.
//!
//! One websocket binary message carries exactly one frame:
//!
//! ```text
//! byte 0        : event type
//! MetaHeartbeat : no further bytes
//! MetaVersion   : byte 1 = protocol version
//! otherwise     : byte 1     = payload tag (0 = none, 1 = string, 2 = bytes)
//!                 bytes 2..4 = connection id, i16 little-endian
//!                 tagged     : u32 LE byte length, then that many bytes;
//!                              strings are UTF-16LE (a leading BOM is
//!                              accepted and stripped)
//! ```
//!
//! The layout matches the deployed wire format bit-for-bit so existing
//! native, browser and mobile clients stay interoperable; strings travel as
//! UTF-16LE because the historical client is .NET-based.

use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};

use super::event::{NetEventType, NetworkEvent, Payload};
use crate::error::{Error, Result};

const PAYLOAD_TAG_NONE: u8 = 0;
const PAYLOAD_TAG_STRING: u8 = 1;
const PAYLOAD_TAG_BYTES: u8 = 2;

/// One decoded websocket message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A relay event for the peer layer
    Event(NetworkEvent),
    /// Version handshake, handled at the transport layer
    Version(u8),
    /// Application-level heartbeat, handled at the transport layer
    Heartbeat,
}

/// Encode a heartbeat frame
pub fn encode_heartbeat() -> Vec<u8> {
    vec![NetEventType::MetaHeartbeat as u8]
}

/// Encode a version handshake frame
pub fn encode_version(version: u8) -> Vec<u8> {
    vec![NetEventType::MetaVersion as u8, version]
}

/// Encode a relay event.
///
/// Meta events have their own encoders; passing one here would produce a
/// payload-carrying layout no conforming decoder accepts.
pub fn encode_event(event: &NetworkEvent) -> Vec<u8> {
    debug_assert!(
        !matches!(
            event.event_type,
            NetEventType::MetaVersion | NetEventType::MetaHeartbeat
        ),
        "meta events use their dedicated encoders"
    );

    let mut buffer = Vec::with_capacity(8 + payload_capacity(&event.payload));
    buffer.push(event.event_type as u8);
    match &event.payload {
        Payload::None => {
            buffer.push(PAYLOAD_TAG_NONE);
            buffer.extend_from_slice(&event.connection_id.to_le_bytes());
        }
        Payload::Text(text) => {
            buffer.push(PAYLOAD_TAG_STRING);
            buffer.extend_from_slice(&event.connection_id.to_le_bytes());
            let units: Vec<u8> = text
                .encode_utf16()
                .flat_map(|unit| unit.to_le_bytes())
                .collect();
            buffer.extend_from_slice(&(units.len() as u32).to_le_bytes());
            buffer.extend_from_slice(&units);
        }
        Payload::Binary(data) => {
            buffer.push(PAYLOAD_TAG_BYTES);
            buffer.extend_from_slice(&event.connection_id.to_le_bytes());
            buffer.extend_from_slice(&(data.len() as u32).to_le_bytes());
            buffer.extend_from_slice(data);
        }
    }
    buffer
}

fn payload_capacity(payload: &Payload) -> usize {
    match payload {
        Payload::None => 0,
        Payload::Text(text) => text.len() * 2,
        Payload::Binary(data) => data.len(),
    }
}

/// Decode one frame.
///
/// Fails with [`Error::MalformedFrame`] when the buffer is too short for the
/// declared tag, a declared length exceeds the remaining bytes, or a tag or
/// event type value is unrecognised. A malformed frame must tear the session
/// down; nothing is partially applied.
pub fn decode(data: &[u8]) -> Result<Frame> {
    let mut cursor = Cursor::new(data);

    let type_byte = cursor
        .read_u8()
        .map_err(|_| Error::malformed("empty frame"))?;
    let event_type = NetEventType::from_u8(type_byte)
        .ok_or_else(|| Error::malformed(format!("unknown event type {type_byte}")))?;

    match event_type {
        NetEventType::MetaHeartbeat => Ok(Frame::Heartbeat),
        NetEventType::MetaVersion => {
            let version = cursor
                .read_u8()
                .map_err(|_| Error::malformed("version frame without version byte"))?;
            Ok(Frame::Version(version))
        }
        _ => {
            let tag = cursor
                .read_u8()
                .map_err(|_| Error::malformed("frame truncated before payload tag"))?;
            let connection_id = cursor
                .read_i16::<LittleEndian>()
                .map_err(|_| Error::malformed("frame truncated before connection id"))?;

            let payload = match tag {
                PAYLOAD_TAG_NONE => Payload::None,
                PAYLOAD_TAG_STRING => Payload::Text(read_utf16_string(&mut cursor)?),
                PAYLOAD_TAG_BYTES => Payload::Binary(read_length_prefixed(&mut cursor)?),
                other => return Err(Error::malformed(format!("unknown payload tag {other}"))),
            };

            Ok(Frame::Event(NetworkEvent::new(
                event_type,
                connection_id,
                payload,
            )))
        }
    }
}

fn read_length_prefixed(cursor: &mut Cursor<&[u8]>) -> Result<Vec<u8>> {
    let length = cursor
        .read_u32::<LittleEndian>()
        .map_err(|_| Error::malformed("frame truncated before payload length"))? as usize;
    let remaining = cursor.get_ref().len() - cursor.position() as usize;
    if length > remaining {
        return Err(Error::malformed(format!(
            "declared payload length {length} exceeds remaining {remaining} bytes"
        )));
    }
    let mut data = vec![0u8; length];
    cursor
        .read_exact(&mut data)
        .map_err(|_| Error::malformed("payload shorter than declared"))?;
    Ok(data)
}

fn read_utf16_string(cursor: &mut Cursor<&[u8]>) -> Result<String> {
    let data = read_length_prefixed(cursor)?;
    if data.len() % 2 != 0 {
        return Err(Error::malformed(format!(
            "UTF-16 payload has odd byte length {}",
            data.len()
        )));
    }
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    let mut text =
        String::from_utf16(&units).map_err(|_| Error::malformed("invalid UTF-16 payload"))?;
    // a BOM is not required but accepted
    if text.starts_with('\u{feff}') {
        text.remove(0);
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::event::INVALID_CONNECTION_ID;

    fn round_trip(event: NetworkEvent) {
        let encoded = encode_event(&event);
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded, Frame::Event(event));
    }

    #[test]
    fn test_round_trip_no_payload() {
        round_trip(NetworkEvent::simple(NetEventType::Disconnected, 42));
        round_trip(NetworkEvent::simple(
            NetEventType::ServerClosed,
            INVALID_CONNECTION_ID,
        ));
    }

    #[test]
    fn test_round_trip_text_payload() {
        round_trip(NetworkEvent::with_text(
            NetEventType::ServerInitialized,
            INVALID_CONNECTION_ID,
            "room",
        ));
        round_trip(NetworkEvent::with_text(
            NetEventType::ReliableMessageReceived,
            16384,
            "mixed ascii + ünïcödé + 漢字",
        ));
        round_trip(NetworkEvent::with_text(
            NetEventType::NewConnection,
            -200,
            "",
        ));
    }

    #[test]
    fn test_round_trip_binary_payload() {
        round_trip(NetworkEvent::with_data(
            NetEventType::UnreliableMessageReceived,
            7,
            vec![0, 1, 2, 255, 254],
        ));
        round_trip(NetworkEvent::with_data(
            NetEventType::ReliableMessageReceived,
            -1,
            Vec::new(),
        ));
    }

    #[test]
    fn test_exact_wire_layout_reliable_text() {
        // type 8, string tag, id 42 LE, length 4 LE, "hi" as UTF-16LE
        let event = NetworkEvent::with_text(NetEventType::ReliableMessageReceived, 42, "hi");
        let encoded = encode_event(&event);
        assert_eq!(
            encoded,
            vec![8, 1, 42, 0, 4, 0, 0, 0, 0x68, 0x00, 0x69, 0x00]
        );
    }

    #[test]
    fn test_exact_wire_layout_negative_id() {
        let event = NetworkEvent::simple(NetEventType::ServerClosed, INVALID_CONNECTION_ID);
        assert_eq!(encode_event(&event), vec![4, 0, 0xff, 0xff]);
    }

    #[test]
    fn test_heartbeat_frame() {
        assert_eq!(encode_heartbeat(), vec![104]);
        assert_eq!(decode(&[104]).unwrap(), Frame::Heartbeat);
        // trailing bytes after a heartbeat are ignored
        assert_eq!(decode(&[104, 1, 2]).unwrap(), Frame::Heartbeat);
    }

    #[test]
    fn test_version_frame() {
        assert_eq!(encode_version(2), vec![103, 2]);
        assert_eq!(decode(&[103, 2]).unwrap(), Frame::Version(2));
        assert!(decode(&[103]).is_err());
    }

    #[test]
    fn test_bom_is_stripped() {
        let mut encoded = vec![2, 1, 0xff, 0xff];
        let body: &[u8] = &[0xff, 0xfe, 0x68, 0x00, 0x69, 0x00]; // BOM + "hi"
        encoded.extend_from_slice(&(body.len() as u32).to_le_bytes());
        encoded.extend_from_slice(body);
        match decode(&encoded).unwrap() {
            Frame::Event(event) => assert_eq!(event.payload.as_text(), Some("hi")),
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn test_malformed_frames() {
        // empty buffer
        assert!(decode(&[]).is_err());
        // unknown event type
        assert!(decode(&[9, 0, 0, 0]).is_err());
        assert!(decode(&[200, 0, 0, 0]).is_err());
        // unknown payload tag
        assert!(decode(&[5, 3, 0, 0]).is_err());
        // truncated before connection id
        assert!(decode(&[5, 0, 1]).is_err());
        // declared length exceeds remaining bytes
        assert!(decode(&[8, 2, 0, 0, 10, 0, 0, 0, 1, 2]).is_err());
        // odd UTF-16 byte length
        assert!(decode(&[8, 1, 0, 0, 3, 0, 0, 0, 0x68, 0x00, 0x69]).is_err());
        // unpaired surrogate
        assert!(decode(&[8, 1, 0, 0, 2, 0, 0, 0, 0x00, 0xd8]).is_err());
    }

    #[test]
    fn test_length_is_in_bytes_not_code_units() {
        let event = NetworkEvent::with_text(NetEventType::Log, 0, "abc");
        let encoded = encode_event(&event);
        let length = u32::from_le_bytes([encoded[4], encoded[5], encoded[6], encoded[7]]);
        assert_eq!(length, 6);
    }
}
