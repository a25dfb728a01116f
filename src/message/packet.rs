//! Message packet (C4): binds a schema, assigns a content-addressed id,
//! and serializes to the wire form both directions of the protocol use.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::BoltError;
use crate::message::schema::MessageSchema;

/// Content-addressed packet id: the hex-encoded SHA-256 digest of the
/// canonical (key-sorted) encoding of the bound payload.
///
/// Two packets with identical bindings always produce identical ids;
/// differing bindings produce different ids with cryptographic
/// probability (P3 in the design document).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PacketId(String);

impl PacketId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn from_payload(payload: &MessageSchema) -> Self {
        // `MessageSchema` is a `BTreeMap`-backed `Map`, so `to_string`
        // always walks keys in sorted order regardless of the order
        // fields were bound in; that is what makes the digest a
        // function of content alone.
        let canonical = serde_json::to_string(payload).expect("schema values are always JSON");
        let digest = Sha256::digest(canonical.as_bytes());
        Self(hex_encode(&digest))
    }
}

impl fmt::Display for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

/// The self-describing text frame transmitted in both directions:
/// `{ "id": "<hex digest>", "payload": { ...fields... } }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireFrame {
    pub id: String,
    pub payload: MessageSchema,
}

/// A bound schema plus its assigned packet id, ready to serialize.
pub struct MessagePacket {
    id: PacketId,
    payload: MessageSchema,
}

impl MessagePacket {
    /// Bind a schema into a packet, assigning its content-addressed id.
    pub fn new(payload: MessageSchema) -> Self {
        let id = PacketId::from_payload(&payload);
        Self { id, payload }
    }

    pub fn id(&self) -> &PacketId {
        &self.id
    }

    pub fn payload(&self) -> &MessageSchema {
        &self.payload
    }

    /// Serialize to the newline-delimited wire form (the delimiter
    /// itself is appended by the transport, not here).
    pub fn to_wire(&self) -> Vec<u8> {
        let frame = WireFrame {
            id: self.id.0.clone(),
            payload: self.payload.clone(),
        };
        serde_json::to_vec(&frame).expect("wire frame is always serializable")
    }

    /// Parse an inbound frame (handshake/data framing already stripped
    /// by the transport) into its correlation id and payload.
    pub fn from_wire(bytes: &[u8]) -> Result<(PacketId, MessageSchema), BoltError> {
        let frame: WireFrame = serde_json::from_slice(bytes)
            .map_err(|e| BoltError::MalformedFrame(e.to_string()))?;
        Ok((PacketId(frame.id), frame.payload))
    }
}
