#![deny(clippy::unwrap_used, clippy::allow_attributes_without_reason)]
#![warn(clippy::perf, clippy::complexity, clippy::pedantic, clippy::suspicious)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    reason = "We're not going to write comprehensive docs"
)]

//! This crate defines the machine-to-machine protocol of the vending fleet.
//!
//! Messages travel as newline-delimited JSON over short-lived TCP
//! connections, one message per line. JSON string escaping guarantees the
//! framing delimiter never appears raw inside a value.

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt::Display,
    io::{BufRead, Write},
};
use thiserror::Error;

/// Sentinel destination meaning "deliver to every known peer".
pub const BROADCAST_ID: &str = "0";

/// Length of a reservation authorization code.
pub const CERT_CODE_LEN: usize = 5;

pub const KEY_ITEM_CODE: &str = "item_code";
pub const KEY_ITEM_NUM: &str = "item_num";
pub const KEY_COOR_X: &str = "coor_x";
pub const KEY_COOR_Y: &str = "coor_y";
pub const KEY_CERT_CODE: &str = "cert_code";
pub const KEY_AVAILABILITY: &str = "availability";

#[derive(Error, Debug)]
pub enum WireError {
    #[error("Malformed message")]
    Malformed(#[from] serde_json::Error),
    #[error("Stream I/O failed")]
    Io(#[from] std::io::Error),
    #[error("Peer closed the connection")]
    Closed,
    #[error("Message content is missing required key {0:?}")]
    MissingKey(&'static str),
    #[error("Message content key {key:?} holds unparseable value {value:?}")]
    BadValue { key: &'static str, value: String },
}

/// The four message kinds of the stock-discovery and reservation protocols.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    #[serde(rename = "REQ_STOCK")]
    ReqStock,
    #[serde(rename = "RESP_STOCK")]
    RespStock,
    #[serde(rename = "REQ_PREPAY")]
    ReqPrepay,
    #[serde(rename = "RESP_PREPAY")]
    RespPrepay,
}

impl MessageKind {
    pub const ALL: [MessageKind; 4] = [
        MessageKind::ReqStock,
        MessageKind::RespStock,
        MessageKind::ReqPrepay,
        MessageKind::RespPrepay,
    ];
}

impl Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MessageKind::ReqStock => "REQ_STOCK",
            MessageKind::RespStock => "RESP_STOCK",
            MessageKind::ReqPrepay => "REQ_PREPAY",
            MessageKind::RespPrepay => "RESP_PREPAY",
        };
        write!(f, "{name}")
    }
}

/// # A machine-to-machine message
///
/// Immutable value object: constructed once, handed to the transport, never
/// mutated. `content` is a flat string-to-string map whose required keys
/// depend on `kind`; the typed accessors below parse them back out.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Message {
    pub kind: MessageKind,
    pub source_id: String,
    pub destination_id: String,
    pub content: BTreeMap<String, String>,
}

impl Message {
    /// Broadcast stock inquiry for one unit of a drink.
    #[must_use]
    pub fn req_stock(source_id: &str, item_code: &str) -> Self {
        Self {
            kind: MessageKind::ReqStock,
            source_id: source_id.to_owned(),
            destination_id: BROADCAST_ID.to_owned(),
            content: BTreeMap::from([
                (KEY_ITEM_CODE.to_owned(), item_code.to_owned()),
                (KEY_ITEM_NUM.to_owned(), "1".to_owned()),
            ]),
        }
    }

    /// Stock report addressed back to the inquiring machine.
    #[must_use]
    pub fn resp_stock(
        source_id: &str,
        destination_id: &str,
        item_code: &str,
        quantity: u8,
        x: f64,
        y: f64,
    ) -> Self {
        Self {
            kind: MessageKind::RespStock,
            source_id: source_id.to_owned(),
            destination_id: destination_id.to_owned(),
            content: BTreeMap::from([
                (KEY_ITEM_CODE.to_owned(), item_code.to_owned()),
                (KEY_ITEM_NUM.to_owned(), quantity.to_string()),
                (KEY_COOR_X.to_owned(), x.to_string()),
                (KEY_COOR_Y.to_owned(), y.to_string()),
            ]),
        }
    }

    /// Reservation request for one unit, carrying the authorization code the
    /// remote machine will store for later redemption.
    #[must_use]
    pub fn req_prepay(
        source_id: &str,
        destination_id: &str,
        item_code: &str,
        cert_code: &str,
    ) -> Self {
        Self {
            kind: MessageKind::ReqPrepay,
            source_id: source_id.to_owned(),
            destination_id: destination_id.to_owned(),
            content: BTreeMap::from([
                (KEY_ITEM_CODE.to_owned(), item_code.to_owned()),
                (KEY_ITEM_NUM.to_owned(), "1".to_owned()),
                (KEY_CERT_CODE.to_owned(), cert_code.to_owned()),
            ]),
        }
    }

    /// Reservation verdict. `availability` is `"T"` or `"F"` on the wire.
    #[must_use]
    pub fn resp_prepay(
        source_id: &str,
        destination_id: &str,
        item_code: &str,
        available: bool,
    ) -> Self {
        Self {
            kind: MessageKind::RespPrepay,
            source_id: source_id.to_owned(),
            destination_id: destination_id.to_owned(),
            content: BTreeMap::from([
                (KEY_ITEM_CODE.to_owned(), item_code.to_owned()),
                (KEY_ITEM_NUM.to_owned(), "1".to_owned()),
                (
                    KEY_AVAILABILITY.to_owned(),
                    if available { "T" } else { "F" }.to_owned(),
                ),
            ]),
        }
    }

    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self.destination_id == BROADCAST_ID
    }

    pub fn item_code(&self) -> Result<&str, WireError> {
        self.get(KEY_ITEM_CODE)
    }

    pub fn cert_code(&self) -> Result<&str, WireError> {
        self.get(KEY_CERT_CODE)
    }

    /// Unit count carried in `item_num`; for `RESP_STOCK` this is the
    /// reported remaining stock.
    pub fn quantity(&self) -> Result<u8, WireError> {
        self.parse(KEY_ITEM_NUM)
    }

    pub fn coordinates(&self) -> Result<(f64, f64), WireError> {
        Ok((self.parse(KEY_COOR_X)?, self.parse(KEY_COOR_Y)?))
    }

    pub fn availability(&self) -> Result<bool, WireError> {
        match self.get(KEY_AVAILABILITY)? {
            "T" => Ok(true),
            "F" => Ok(false),
            other => Err(WireError::BadValue {
                key: KEY_AVAILABILITY,
                value: other.to_owned(),
            }),
        }
    }

    fn get(&self, key: &'static str) -> Result<&str, WireError> {
        self.content
            .get(key)
            .map(String::as_str)
            .ok_or(WireError::MissingKey(key))
    }

    fn parse<T: std::str::FromStr>(&self, key: &'static str) -> Result<T, WireError> {
        let value = self.get(key)?;
        value.parse().map_err(|_| WireError::BadValue {
            key,
            value: value.to_owned(),
        })
    }

    /// Encode to a single line of JSON, without the trailing newline.
    pub fn encode(&self) -> Result<String, WireError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode one line. Fails with [`WireError::Malformed`] when required
    /// fields are absent or `content` is not a flat string-to-string map.
    pub fn decode(line: &str) -> Result<Self, WireError> {
        Ok(serde_json::from_str(line)?)
    }
}

pub trait SendMessage: Write {
    /// # Send one message over self
    /// Writes the encoded line plus the newline delimiter and flushes.
    fn send(&mut self, message: &Message) -> Result<(), WireError> {
        let mut line = message.encode()?;
        line.push('\n');
        self.write_all(line.as_bytes())?;
        self.flush()?;
        Ok(())
    }
}

impl<W: Write> SendMessage for W {}

pub trait RecvMessage: BufRead {
    /// # Receive one message from self
    /// Blocks for the stream's current read timeout, if any. A clean close
    /// before any bytes arrive is reported as [`WireError::Closed`].
    fn recv(&mut self) -> Result<Message, WireError> {
        let mut line = String::new();
        if self.read_line(&mut line)? == 0 {
            return Err(WireError::Closed);
        }
        Message::decode(line.trim_end_matches('\n'))
    }
}

impl<R: BufRead> RecvMessage for R {}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Unwrap is ok in test code")]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trip_all_kinds() {
        let messages = [
            Message::req_stock("T1", "02"),
            Message::resp_stock("T2", "T1", "02", 3, 20.0, 20.0),
            Message::req_prepay("T1", "T2", "02", "aZ09b"),
            Message::resp_prepay("T2", "T1", "02", true),
        ];
        for message in messages {
            let line = message.encode().unwrap();
            assert_eq!(Message::decode(&line).unwrap(), message);
        }
    }

    #[test]
    fn encoded_line_never_contains_raw_newline() {
        let mut message = Message::req_stock("T1", "02");
        message
            .content
            .insert("note".to_owned(), "line one\nline two".to_owned());
        let line = message.encode().unwrap();
        assert!(!line.contains('\n'));
        assert_eq!(Message::decode(&line).unwrap(), message);
    }

    #[test]
    fn decode_rejects_missing_fields() {
        assert!(matches!(
            Message::decode(r#"{"kind":"REQ_STOCK","sourceId":"T1"}"#),
            Err(WireError::Malformed(_))
        ));
    }

    #[test]
    fn decode_rejects_unknown_kind() {
        let line = r#"{"kind":"REQ_COFFEE","sourceId":"T1","destinationId":"0","content":{}}"#;
        assert!(matches!(
            Message::decode(line),
            Err(WireError::Malformed(_))
        ));
    }

    #[test]
    fn decode_rejects_nested_content() {
        let line =
            r#"{"kind":"REQ_STOCK","sourceId":"T1","destinationId":"0","content":{"a":{"b":"c"}}}"#;
        assert!(matches!(
            Message::decode(line),
            Err(WireError::Malformed(_))
        ));
    }

    #[test]
    fn typed_accessors() {
        let message = Message::resp_stock("T2", "T1", "02", 7, 10.0, 30.5);
        assert_eq!(message.item_code().unwrap(), "02");
        assert_eq!(message.quantity().unwrap(), 7);
        assert_eq!(message.coordinates().unwrap(), (10.0, 30.5));
        assert!(matches!(
            message.cert_code(),
            Err(WireError::MissingKey(KEY_CERT_CODE))
        ));
    }

    #[test]
    fn availability_parses_t_and_f_only() {
        let mut message = Message::resp_prepay("T2", "T1", "02", false);
        assert!(!message.availability().unwrap());
        message
            .content
            .insert(KEY_AVAILABILITY.to_owned(), "yes".to_owned());
        assert!(matches!(
            message.availability(),
            Err(WireError::BadValue { .. })
        ));
    }

    #[test]
    fn stream_send_then_recv() {
        let mut buffer = Vec::new();
        let sent = Message::req_prepay("T1", "T3", "05", "Ab1c2");
        buffer.send(&sent).unwrap();
        buffer.send(&Message::req_stock("T1", "05")).unwrap();

        let mut reader = Cursor::new(buffer);
        assert_eq!(reader.recv().unwrap(), sent);
        assert_eq!(reader.recv().unwrap(), Message::req_stock("T1", "05"));
        assert!(matches!(reader.recv(), Err(WireError::Closed)));
    }
}
