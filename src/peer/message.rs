/*
src/peer/message.rs

Post-handshake wire messages: `<4-byte length><payload>`, payload =
`<1-byte id><body>`. `Framer` parses these off an append-only byte buffer
per §4.2 — it never blocks on I/O itself; callers append freshly-read bytes
and call `try_parse` until it returns `None`.
*/

use crate::error::{Error, Result};

#[derive(Debug, PartialEq, Clone)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have(u32),
    Bitfield(Vec<u8>),
    Request(u32, u32, u32),
    Piece(u32, u32, Vec<u8>),
    Cancel(u32, u32, u32),
    Port(u16),
}

impl Message {
    pub fn serialize(&self) -> Vec<u8> {
        match self {
            Message::KeepAlive => vec![0, 0, 0, 0],
            Message::Choke => frame(0, &[]),
            Message::Unchoke => frame(1, &[]),
            Message::Interested => frame(2, &[]),
            Message::NotInterested => frame(3, &[]),
            Message::Have(index) => frame(4, &index.to_be_bytes()),
            Message::Bitfield(bitfield) => frame(5, bitfield),
            Message::Request(index, begin, length) => {
                let mut body = Vec::with_capacity(12);
                body.extend_from_slice(&index.to_be_bytes());
                body.extend_from_slice(&begin.to_be_bytes());
                body.extend_from_slice(&length.to_be_bytes());
                frame(6, &body)
            }
            Message::Piece(index, begin, block) => {
                let mut body = Vec::with_capacity(8 + block.len());
                body.extend_from_slice(&index.to_be_bytes());
                body.extend_from_slice(&begin.to_be_bytes());
                body.extend_from_slice(block);
                frame(7, &body)
            }
            Message::Cancel(index, begin, length) => {
                let mut body = Vec::with_capacity(12);
                body.extend_from_slice(&index.to_be_bytes());
                body.extend_from_slice(&begin.to_be_bytes());
                body.extend_from_slice(&length.to_be_bytes());
                frame(8, &body)
            }
            Message::Port(port) => frame(9, &port.to_be_bytes()),
        }
    }

    pub fn id(&self) -> Option<u8> {
        match self {
            Message::KeepAlive => None,
            Message::Choke => Some(0),
            Message::Unchoke => Some(1),
            Message::Interested => Some(2),
            Message::NotInterested => Some(3),
            Message::Have(_) => Some(4),
            Message::Bitfield(_) => Some(5),
            Message::Request(..) => Some(6),
            Message::Piece(..) => Some(7),
            Message::Cancel(..) => Some(8),
            Message::Port(_) => Some(9),
        }
    }
}

fn frame(id: u8, body: &[u8]) -> Vec<u8> {
    let len = 1 + body.len() as u32;
    let mut out = Vec::with_capacity(4 + len as usize);
    out.extend_from_slice(&len.to_be_bytes());
    out.push(id);
    out.extend_from_slice(body);
    out
}

/// Result of a single `try_parse` call.
pub enum Parsed {
    /// Not enough bytes buffered yet for a whole frame.
    Incomplete,
    /// A frame was consumed. `None` means it was an unknown message id
    /// (logged and skipped, bytes still consumed, per §4.2).
    Message(Option<Message>),
}

/// Parses one message off the front of `buffer`, consuming its bytes from
/// `buffer` on success. Returns `Parsed::Incomplete` without consuming
/// anything if fewer than `4 + length` bytes are buffered.
pub fn try_parse(buffer: &mut Vec<u8>) -> Result<Parsed> {
    if buffer.len() < 4 {
        return Ok(Parsed::Incomplete);
    }
    let len = u32::from_be_bytes([buffer[0], buffer[1], buffer[2], buffer[3]]) as usize;
    if buffer.len() < 4 + len {
        return Ok(Parsed::Incomplete);
    }

    let frame: Vec<u8> = buffer.drain(0..4 + len).collect();
    if len == 0 {
        return Ok(Parsed::Message(Some(Message::KeepAlive)));
    }

    let id = frame[4];
    let body = &frame[5..];
    let message = match id {
        0 => Message::Choke,
        1 => Message::Unchoke,
        2 => Message::Interested,
        3 => Message::NotInterested,
        4 => {
            if body.len() != 4 {
                return Err(Error::protocol("Have payload must be 4 bytes"));
            }
            Message::Have(u32::from_be_bytes(body.try_into().unwrap()))
        }
        5 => {
            if body.len() != len - 1 {
                return Err(Error::protocol("BitField length does not match frame length"));
            }
            Message::Bitfield(body.to_vec())
        }
        6 => {
            if body.len() != 12 {
                return Err(Error::protocol("Request payload must be 12 bytes"));
            }
            Message::Request(
                u32::from_be_bytes(body[0..4].try_into().unwrap()),
                u32::from_be_bytes(body[4..8].try_into().unwrap()),
                u32::from_be_bytes(body[8..12].try_into().unwrap()),
            )
        }
        7 => {
            if body.len() < 8 {
                return Err(Error::protocol("Piece payload must be at least 8 bytes"));
            }
            Message::Piece(
                u32::from_be_bytes(body[0..4].try_into().unwrap()),
                u32::from_be_bytes(body[4..8].try_into().unwrap()),
                body[8..].to_vec(),
            )
        }
        8 => {
            if body.len() != 12 {
                return Err(Error::protocol("Cancel payload must be 12 bytes"));
            }
            Message::Cancel(
                u32::from_be_bytes(body[0..4].try_into().unwrap()),
                u32::from_be_bytes(body[4..8].try_into().unwrap()),
                u32::from_be_bytes(body[8..12].try_into().unwrap()),
            )
        }
        9 => {
            if body.len() != 2 {
                return Err(Error::protocol("Port payload must be 2 bytes"));
            }
            Message::Port(u16::from_be_bytes(body.try_into().unwrap()))
        }
        unknown => {
            log::warn!("skipping unknown message id {unknown}");
            return Ok(Parsed::Message(None));
        }
    };
    Ok(Parsed::Message(Some(message)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keep_alive_round_trip() {
        let msg = Message::KeepAlive;
        let mut bytes = msg.serialize();
        assert_eq!(bytes, vec![0, 0, 0, 0]);
        let before = bytes.len();
        match try_parse(&mut bytes).unwrap() {
            Parsed::Message(Some(Message::KeepAlive)) => {}
            other => panic!("unexpected parse result in slot consuming {before} bytes: {other:?}", other = debug_variant(&other)),
        }
        assert!(bytes.is_empty());
    }

    fn debug_variant(p: &Parsed) -> &'static str {
        match p {
            Parsed::Incomplete => "Incomplete",
            Parsed::Message(None) => "Message(None)",
            Parsed::Message(Some(_)) => "Message(Some)",
        }
    }

    #[test]
    fn choke_round_trip() {
        let msg = Message::Choke;
        let mut bytes = msg.serialize();
        assert_eq!(bytes, vec![0, 0, 0, 1, 0]);
        match try_parse(&mut bytes).unwrap() {
            Parsed::Message(Some(Message::Choke)) => {}
            _ => panic!("expected Choke"),
        }
    }

    #[test]
    fn request_round_trip() {
        let msg = Message::Request(1, 16384, 16384);
        let mut bytes = msg.serialize();
        match try_parse(&mut bytes).unwrap() {
            Parsed::Message(Some(Message::Request(1, 16384, 16384))) => {}
            _ => panic!("expected Request"),
        }
    }

    #[test]
    fn piece_round_trip_with_block_data() {
        let msg = Message::Piece(2, 0, vec![1, 2, 3, 4]);
        let mut bytes = msg.serialize();
        match try_parse(&mut bytes).unwrap() {
            Parsed::Message(Some(Message::Piece(2, 0, data))) => assert_eq!(data, vec![1, 2, 3, 4]),
            _ => panic!("expected Piece"),
        }
    }

    #[test]
    fn incomplete_frame_does_not_consume() {
        let mut bytes = vec![0, 0, 0, 5, 4, 0]; // claims 5-byte payload, only 1 present
        match try_parse(&mut bytes).unwrap() {
            Parsed::Incomplete => {}
            _ => panic!("expected Incomplete"),
        }
        assert_eq!(bytes.len(), 6);
    }

    #[test]
    fn malformed_have_is_protocol_error() {
        let mut bytes = vec![0, 0, 0, 2, 4, 0]; // Have body is 1 byte, not 4
        assert!(try_parse(&mut bytes).is_err());
    }

    #[test]
    fn unknown_id_is_skipped_not_errored() {
        let mut bytes = vec![0, 0, 0, 2, 200, 0]; // unknown id 200
        match try_parse(&mut bytes).unwrap() {
            Parsed::Message(None) => {}
            _ => panic!("expected unknown message to be skipped"),
        }
        assert!(bytes.is_empty());
    }

    #[test]
    fn framer_is_split_invariant() {
        let mut full = Vec::new();
        full.extend(Message::Choke.serialize());
        full.extend(Message::Have(7).serialize());
        full.extend(Message::Piece(1, 0, vec![9, 9]).serialize());

        for split in 0..=full.len() {
            let mut buffer = Vec::new();
            buffer.extend_from_slice(&full[..split]);
            let mut remaining = full[split..].to_vec();
            let mut messages = Vec::new();
            loop {
                match try_parse(&mut buffer).unwrap() {
                    Parsed::Incomplete => {
                        if remaining.is_empty() {
                            break;
                        }
                        buffer.append(&mut remaining);
                    }
                    Parsed::Message(Some(m)) => messages.push(m),
                    Parsed::Message(None) => {}
                }
                if buffer.is_empty() && remaining.is_empty() {
                    break;
                }
            }
            assert_eq!(
                messages,
                vec![
                    Message::Choke,
                    Message::Have(7),
                    Message::Piece(1, 0, vec![9, 9])
                ],
                "failed at split point {split}"
            );
        }
    }
}
