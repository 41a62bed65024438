//! # WebSocket Protocol
//!
//! The wire protocol is deliberately tiny:
//! - **Client → Server, binary**: raw PCM audio (16-bit LE, 16kHz, mono), any chunk size
//! - **Client → Server, text**: `{"type":"commit"}` closes the current utterance
//! - **Server → Client, text**: `{"type":"final","text":"..."}`, only for non-empty results
//!
//! Any other text frame is accepted and ignored; it never closes the connection.
//!
//! A message may arrive split across continuation frames. [`FrameAssembler`] joins the
//! fragments back into one message before it is classified.

use crate::error::{GatewayError, GatewayResult};
use actix_http::ws::Item;
use actix_web::web::{Bytes, BytesMut};
use actix_web_actors::ws;
use serde::{Deserialize, Serialize};

/// Control messages a client may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Transcribe everything buffered since the previous commit
    Commit,
}

/// Messages the gateway sends to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Final { text: String },
}

/// Classification of an inbound WebSocket frame.
#[derive(Debug)]
pub enum Inbound {
    Audio(Bytes),
    Control(ControlMessage),
    Malformed(GatewayError),
    /// Ping, pong, close and other frames the connection actor handles itself
    Transport(ws::Message),
}

pub fn parse_control(text: &str) -> GatewayResult<ControlMessage> {
    serde_json::from_str(text).map_err(|e| GatewayError::ControlParse(e.to_string()))
}

pub fn demultiplex(frame: ws::Message) -> Inbound {
    match frame {
        ws::Message::Binary(bytes) => Inbound::Audio(bytes),
        ws::Message::Text(text) => match parse_control(&text) {
            Ok(control) => Inbound::Control(control),
            Err(err) => Inbound::Malformed(err),
        },
        other => Inbound::Transport(other),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FragmentKind {
    Text,
    Binary,
}

/// Joins a fragmented message (`FirstText`/`FirstBinary`, `Continue`..., `Last`).
///
/// The joined message may not exceed `max_bytes`, the same limit a single frame has.
#[derive(Debug)]
pub struct FrameAssembler {
    kind: Option<FragmentKind>,
    pending: BytesMut,
    max_bytes: usize,
}

impl FrameAssembler {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            kind: None,
            pending: BytesMut::new(),
            max_bytes,
        }
    }

    /// Bytes held for a binary message that is not complete yet.
    pub fn pending_audio_bytes(&self) -> usize {
        match self.kind {
            Some(FragmentKind::Binary) => self.pending.len(),
            _ => 0,
        }
    }

    /// Feed one continuation frame. Returns the whole message once its last fragment arrives.
    ///
    /// ## Errors:
    /// - [`GatewayError::BufferOverflow`] when the joined message grows past `max_bytes`
    /// - [`GatewayError::ControlParse`] for a fragmented text message that is not UTF-8
    /// - [`GatewayError::BadRequest`] for fragments out of order
    ///
    /// The partial message is dropped on every error.
    pub fn push(&mut self, item: Item) -> GatewayResult<Option<ws::Message>> {
        let (kind, data, last) = match item {
            Item::FirstText(data) => (self.start(FragmentKind::Text)?, data, false),
            Item::FirstBinary(data) => (self.start(FragmentKind::Binary)?, data, false),
            Item::Continue(data) => (self.current()?, data, false),
            Item::Last(data) => (self.current()?, data, true),
        };

        let attempted = self.pending.len() + data.len();
        if attempted > self.max_bytes {
            self.reset();
            return Err(GatewayError::BufferOverflow {
                limit: self.max_bytes,
                attempted,
            });
        }
        self.pending.extend_from_slice(&data);

        if !last {
            return Ok(None);
        }

        let payload = self.pending.split().freeze();
        self.kind = None;
        match kind {
            FragmentKind::Binary => Ok(Some(ws::Message::Binary(payload))),
            FragmentKind::Text => String::from_utf8(payload.to_vec())
                .map(|text| Some(ws::Message::Text(text.into())))
                .map_err(|e| GatewayError::ControlParse(e.to_string())),
        }
    }

    fn start(&mut self, kind: FragmentKind) -> GatewayResult<FragmentKind> {
        if self.kind.is_some() {
            self.reset();
            return Err(GatewayError::BadRequest(
                "new fragmented message started before the previous one ended".to_string(),
            ));
        }
        self.kind = Some(kind);
        Ok(kind)
    }

    fn current(&mut self) -> GatewayResult<FragmentKind> {
        self.kind.ok_or_else(|| {
            GatewayError::BadRequest("continuation frame without a first fragment".to_string())
        })
    }

    fn reset(&mut self) {
        self.kind = None;
        self.pending.clear();
    }
}

/// Serialize an outbound message to its JSON text frame.
pub fn encode(message: &ServerMessage) -> serde_json::Result<String> {
    serde_json::to_string(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_parses() {
        assert_eq!(parse_control(r#"{"type":"commit"}"#).unwrap(), ControlMessage::Commit);
        // Unknown fields are tolerated.
        assert_eq!(
            parse_control(r#"{"type":"commit","id":7}"#).unwrap(),
            ControlMessage::Commit
        );
    }

    #[test]
    fn test_malformed_control_is_an_error() {
        for text in ["not json", "{}", r#"{"type":"flush"}"#, r#"{"kind":"commit"}"#, "[]"] {
            assert!(
                matches!(parse_control(text), Err(GatewayError::ControlParse(_))),
                "{} should not parse",
                text
            );
        }
    }

    #[test]
    fn test_demultiplex_routes_frames() {
        let audio = demultiplex(ws::Message::Binary(Bytes::from_static(&[1, 2, 3])));
        assert!(matches!(audio, Inbound::Audio(ref b) if b == &Bytes::from_static(&[1, 2, 3])));

        let commit = demultiplex(ws::Message::Text(r#"{"type":"commit"}"#.into()));
        assert!(matches!(commit, Inbound::Control(ControlMessage::Commit)));

        let garbage = demultiplex(ws::Message::Text("{oops".into()));
        assert!(matches!(garbage, Inbound::Malformed(GatewayError::ControlParse(_))));

        let ping = demultiplex(ws::Message::Ping(Bytes::new()));
        assert!(matches!(ping, Inbound::Transport(ws::Message::Ping(_))));
    }

    #[test]
    fn test_assembler_joins_binary_fragments() {
        let mut assembler = FrameAssembler::new(1024);
        assert!(assembler
            .push(Item::FirstBinary(Bytes::from_static(&[1, 2])))
            .unwrap()
            .is_none());
        assert!(assembler.push(Item::Continue(Bytes::from_static(&[3]))).unwrap().is_none());
        assert_eq!(assembler.pending_audio_bytes(), 3);

        match assembler.push(Item::Last(Bytes::from_static(&[4, 5]))).unwrap() {
            Some(ws::Message::Binary(bytes)) => assert_eq!(&bytes[..], &[1, 2, 3, 4, 5]),
            other => panic!("expected a binary message, got {:?}", other),
        }
        assert_eq!(assembler.pending_audio_bytes(), 0);
    }

    #[test]
    fn test_assembled_text_is_a_control_message() {
        let mut assembler = FrameAssembler::new(1024);
        assembler
            .push(Item::FirstText(Bytes::from_static(br#"{"type":"#)))
            .unwrap();
        assert_eq!(assembler.pending_audio_bytes(), 0);

        let message = assembler
            .push(Item::Last(Bytes::from_static(br#""commit"}"#)))
            .unwrap()
            .unwrap();
        assert!(matches!(
            demultiplex(message),
            Inbound::Control(ControlMessage::Commit)
        ));
    }

    #[test]
    fn test_assembler_enforces_limit() {
        let mut assembler = FrameAssembler::new(10);
        assembler.push(Item::FirstBinary(Bytes::from(vec![0; 6]))).unwrap();
        assert!(matches!(
            assembler.push(Item::Continue(Bytes::from(vec![0; 6]))),
            Err(GatewayError::BufferOverflow { limit: 10, attempted: 12 })
        ));
        assert_eq!(assembler.pending_audio_bytes(), 0);

        // Dropped state: the next message starts clean.
        assembler.push(Item::FirstBinary(Bytes::from(vec![0; 4]))).unwrap();
        assert!(assembler.push(Item::Last(Bytes::new())).unwrap().is_some());
    }

    #[test]
    fn test_assembler_rejects_out_of_order_fragments() {
        let mut assembler = FrameAssembler::new(10);
        assert!(matches!(
            assembler.push(Item::Continue(Bytes::from_static(&[1]))),
            Err(GatewayError::BadRequest(_))
        ));

        assembler.push(Item::FirstText(Bytes::from_static(b"a"))).unwrap();
        assert!(matches!(
            assembler.push(Item::FirstBinary(Bytes::from_static(&[1]))),
            Err(GatewayError::BadRequest(_))
        ));

        assembler.push(Item::FirstText(Bytes::from_static(&[0xff]))).unwrap();
        assert!(matches!(
            assembler.push(Item::Last(Bytes::new())),
            Err(GatewayError::ControlParse(_))
        ));
    }

    #[test]
    fn test_encode_final() {
        let json = encode(&ServerMessage::Final {
            text: "こんにちは".to_string(),
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"final","text":"こんにちは"}"#);
    }
}
