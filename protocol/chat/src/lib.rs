//! Fixed-frame chat wire protocol.
//!
//! Every message in either direction is one 515-byte frame: a 1-byte type,
//! a 2-byte little-endian payload length, and a 512-byte payload area. The
//! payload area is always transmitted in full; `length` says how much of it
//! is meaningful.
//!
//! # Example
//!
//! ```
//! use protocol_chat::{Frame, MessageType, parse_frame};
//!
//! let frame = Frame::new(MessageType::ClientChat, b"hi");
//! let parsed = parse_frame(frame.as_bytes()).unwrap();
//! assert_eq!(parsed.msg_type, MessageType::ClientChat);
//! assert_eq!(parsed.payload, b"hi");
//! ```

/// Bytes of frame header (type + length).
pub const HEADER_SIZE: usize = 3;

/// Maximum payload bytes in a frame.
pub const MAX_PAYLOAD: usize = 512;

/// Total on-wire frame size.
pub const FRAME_SIZE: usize = HEADER_SIZE + MAX_PAYLOAD;

/// Frame parse failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// Fewer than [`HEADER_SIZE`] bytes received.
    #[error("frame truncated: {0} bytes")]
    Truncated(usize),
    /// Type byte is not a known message type.
    #[error("unknown message type 0x{0:02x}")]
    UnknownType(u8),
    /// Declared length exceeds [`MAX_PAYLOAD`].
    #[error("payload length {0} exceeds maximum of {MAX_PAYLOAD}")]
    Oversized(u16),
    /// Zero-length payload on a type that requires one.
    #[error("empty payload for {0:?}")]
    Empty(MessageType),
    /// Declared length exceeds the bytes actually received.
    #[error("declared length {declared} exceeds received payload of {received} bytes")]
    LengthMismatch { declared: u16, received: usize },
}

/// Message type byte. Server-originated types live in `0x01..=0x04`,
/// client-originated types in `0x11..=0x14`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    ServerAck = 0x01,
    ServerError = 0x02,
    ServerChat = 0x03,
    ServerNotification = 0x04,
    ClientJoin = 0x11,
    ClientLeave = 0x12,
    ClientChat = 0x13,
    ClientCommand = 0x14,
}

impl MessageType {
    /// Decode a type byte. Returns `None` for values outside the defined set.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(MessageType::ServerAck),
            0x02 => Some(MessageType::ServerError),
            0x03 => Some(MessageType::ServerChat),
            0x04 => Some(MessageType::ServerNotification),
            0x11 => Some(MessageType::ClientJoin),
            0x12 => Some(MessageType::ClientLeave),
            0x13 => Some(MessageType::ClientChat),
            0x14 => Some(MessageType::ClientCommand),
            _ => None,
        }
    }

    /// True for types a client is allowed to send.
    pub fn is_client(self) -> bool {
        matches!(
            self,
            MessageType::ClientJoin
                | MessageType::ClientLeave
                | MessageType::ClientChat
                | MessageType::ClientCommand
        )
    }
}

/// An owned wire frame. Layout matches the on-wire representation exactly,
/// so a frame can be handed to the kernel as raw bytes without re-encoding.
#[repr(C, packed)]
pub struct Frame {
    msg_type: u8,
    length: u16,
    data: [u8; MAX_PAYLOAD],
}

const _: () = assert!(core::mem::size_of::<Frame>() == FRAME_SIZE);

impl Frame {
    /// Build a frame from a payload. Payloads longer than [`MAX_PAYLOAD`]
    /// are truncated.
    pub fn new(msg_type: MessageType, payload: &[u8]) -> Self {
        let len = payload.len().min(MAX_PAYLOAD);
        let mut data = [0u8; MAX_PAYLOAD];
        data[..len].copy_from_slice(&payload[..len]);
        Frame {
            msg_type: msg_type as u8,
            length: (len as u16).to_le(),
            data,
        }
    }

    /// An ACK frame carrying a human-readable status line.
    pub fn ack(text: &str) -> Self {
        Frame::new(MessageType::ServerAck, text.as_bytes())
    }

    /// An ERROR frame carrying a human-readable reason.
    pub fn error(text: &str) -> Self {
        Frame::new(MessageType::ServerError, text.as_bytes())
    }

    /// A chat frame as delivered to room members.
    pub fn chat(payload: &[u8]) -> Self {
        Frame::new(MessageType::ServerChat, payload)
    }

    /// A system notification frame.
    pub fn notification(text: &str) -> Self {
        Frame::new(MessageType::ServerNotification, text.as_bytes())
    }

    /// The full 515-byte wire representation.
    pub fn as_bytes(&self) -> &[u8] {
        // Safety: Frame is repr(C, packed) with size FRAME_SIZE and no
        // padding, so its memory is exactly the wire encoding.
        unsafe { core::slice::from_raw_parts(self as *const Frame as *const u8, FRAME_SIZE) }
    }
}

/// A validated view into a received frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedFrame<'a> {
    pub msg_type: MessageType,
    pub payload: &'a [u8],
}

/// Validate and decode a received frame.
///
/// Rejects frames that are shorter than the header, carry an unknown type
/// byte, declare a length over [`MAX_PAYLOAD`], declare a zero length for
/// anything but LEAVE, or declare more payload than was actually received.
pub fn parse_frame(bytes: &[u8]) -> Result<ParsedFrame<'_>, ParseError> {
    if bytes.len() < HEADER_SIZE {
        return Err(ParseError::Truncated(bytes.len()));
    }

    let msg_type = MessageType::from_u8(bytes[0]).ok_or(ParseError::UnknownType(bytes[0]))?;
    let length = u16::from_le_bytes([bytes[1], bytes[2]]);

    if length as usize > MAX_PAYLOAD {
        return Err(ParseError::Oversized(length));
    }
    if length == 0 && msg_type != MessageType::ClientLeave {
        return Err(ParseError::Empty(msg_type));
    }
    let received = bytes.len() - HEADER_SIZE;
    if length as usize > received {
        return Err(ParseError::LengthMismatch {
            declared: length,
            received,
        });
    }

    Ok(ParsedFrame {
        msg_type,
        payload: &bytes[HEADER_SIZE..HEADER_SIZE + length as usize],
    })
}

/// Extract the room id from a JOIN payload (first four bytes, little-endian).
pub fn join_room_id(payload: &[u8]) -> Option<i32> {
    if payload.len() < 4 {
        return None;
    }
    Some(i32::from_le_bytes([
        payload[0], payload[1], payload[2], payload[3],
    ]))
}

/// Filter a chat payload before broadcast.
///
/// Keeps printable ASCII, `\n`, `\r`, `\t`, and any byte >= 0x80 so that
/// UTF-8 multibyte sequences pass through intact. Everything else is
/// stripped.
pub fn filter_chat_payload(payload: &[u8]) -> Vec<u8> {
    payload
        .iter()
        .copied()
        .filter(|&b| (0x20..=0x7e).contains(&b) || b == b'\n' || b == b'\r' || b == b'\t' || b >= 0x80)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_chat() {
        let frame = Frame::new(MessageType::ClientChat, b"hello");
        let bytes = frame.as_bytes();
        assert_eq!(bytes.len(), FRAME_SIZE);

        let parsed = parse_frame(bytes).unwrap();
        assert_eq!(parsed.msg_type, MessageType::ClientChat);
        assert_eq!(parsed.payload, b"hello");
    }

    #[test]
    fn max_payload_accepted() {
        let payload = [b'x'; MAX_PAYLOAD];
        let frame = Frame::new(MessageType::ClientChat, &payload);
        let parsed = parse_frame(frame.as_bytes()).unwrap();
        assert_eq!(parsed.payload.len(), MAX_PAYLOAD);
    }

    #[test]
    fn oversized_length_rejected() {
        // length = 513, one past the maximum
        let mut bytes = vec![0u8; FRAME_SIZE];
        bytes[0] = MessageType::ClientChat as u8;
        bytes[1..3].copy_from_slice(&513u16.to_le_bytes());
        assert_eq!(parse_frame(&bytes), Err(ParseError::Oversized(513)));

        bytes[1..3].copy_from_slice(&600u16.to_le_bytes());
        assert_eq!(parse_frame(&bytes), Err(ParseError::Oversized(600)));
    }

    #[test]
    fn empty_payload_only_valid_for_leave() {
        let mut bytes = vec![0u8; FRAME_SIZE];
        bytes[0] = MessageType::ClientChat as u8;
        assert_eq!(
            parse_frame(&bytes),
            Err(ParseError::Empty(MessageType::ClientChat))
        );

        bytes[0] = MessageType::ClientLeave as u8;
        let parsed = parse_frame(&bytes).unwrap();
        assert_eq!(parsed.msg_type, MessageType::ClientLeave);
        assert!(parsed.payload.is_empty());
    }

    #[test]
    fn unknown_type_rejected() {
        let mut bytes = vec![0u8; FRAME_SIZE];
        bytes[0] = 0x99;
        bytes[1..3].copy_from_slice(&1u16.to_le_bytes());
        assert_eq!(parse_frame(&bytes), Err(ParseError::UnknownType(0x99)));
    }

    #[test]
    fn truncated_rejected() {
        assert_eq!(parse_frame(&[]), Err(ParseError::Truncated(0)));
        assert_eq!(parse_frame(&[0x13, 0x01]), Err(ParseError::Truncated(2)));
    }

    #[test]
    fn declared_length_beyond_received_rejected() {
        // Header claims 10 bytes, only 4 present after the header.
        let mut bytes = vec![0u8; HEADER_SIZE + 4];
        bytes[0] = MessageType::ClientChat as u8;
        bytes[1..3].copy_from_slice(&10u16.to_le_bytes());
        assert_eq!(
            parse_frame(&bytes),
            Err(ParseError::LengthMismatch {
                declared: 10,
                received: 4
            })
        );
    }

    #[test]
    fn header_only_frame_parses_exact_payload() {
        // A frame cut down to header + declared payload still parses.
        let mut bytes = vec![0u8; HEADER_SIZE + 2];
        bytes[0] = MessageType::ClientChat as u8;
        bytes[1..3].copy_from_slice(&2u16.to_le_bytes());
        bytes[3] = b'h';
        bytes[4] = b'i';
        let parsed = parse_frame(&bytes).unwrap();
        assert_eq!(parsed.payload, b"hi");
    }

    #[test]
    fn filter_strips_control_bytes() {
        assert_eq!(filter_chat_payload(&[b'a', 0x01, b'b']), b"ab");
        assert_eq!(filter_chat_payload(&[0x00, 0x1f, 0x7f]), b"");
    }

    #[test]
    fn filter_keeps_whitespace_and_utf8() {
        assert_eq!(filter_chat_payload(b"a\nb\rc\td"), b"a\nb\rc\td");
        // "héllo" contains a two-byte UTF-8 sequence
        let payload = "h\u{e9}llo".as_bytes();
        assert_eq!(filter_chat_payload(payload), payload);
    }

    #[test]
    fn join_room_id_little_endian() {
        assert_eq!(join_room_id(&7i32.to_le_bytes()), Some(7));
        assert_eq!(join_room_id(&(-1i32).to_le_bytes()), Some(-1));
        assert_eq!(join_room_id(&[1, 2, 3]), None);
    }

    #[test]
    fn server_frame_builders() {
        let ack = Frame::ack("Successfully joined session 1");
        let parsed = parse_frame(ack.as_bytes()).unwrap();
        assert_eq!(parsed.msg_type, MessageType::ServerAck);
        assert_eq!(parsed.payload, b"Successfully joined session 1");

        let err = Frame::error("no such room");
        assert_eq!(
            parse_frame(err.as_bytes()).unwrap().msg_type,
            MessageType::ServerError
        );
    }

    #[test]
    fn client_type_classification() {
        assert!(MessageType::ClientJoin.is_client());
        assert!(MessageType::ClientLeave.is_client());
        assert!(!MessageType::ServerAck.is_client());
        assert!(!MessageType::ServerChat.is_client());
    }
}
