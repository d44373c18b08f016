//! UDP discovery message codec.
//!
//! Four message shapes travel between discovering peers: `Ping`/`Pong`
//! and `FindNode`/`Neighbors`. The wire envelope is a tagged variant with
//! exactly one payload per tag, serialized as MessagePack; the decoder
//! returns the variant and the caller matches.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Codec errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("invalid parameter: {0}")]
    Parameter(String),

    #[error("encode failed: {0}")]
    Encode(String),

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("malformed message: {0}")]
    Message(String),
}

/// Node identity carried in discovery messages.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub [u8; 32]);

impl NodeId {
    pub const LEN: usize = 32;

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        NodeId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        NodeId([0u8; 32])
    }
}

impl std::fmt::Debug for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // leading bytes are enough to tell identities apart in logs
        write!(
            f,
            "NodeId({:02x}{:02x}{:02x}{:02x}..)",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

/// Network endpoint of a peer: addresses plus identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub ip: IpAddr,
    pub udp: u16,
    pub tcp: u16,
    pub id: NodeId,
}

impl Node {
    pub fn new(ip: IpAddr, udp: u16, tcp: u16, id: NodeId) -> Self {
        Node { ip, udp, tcp, id }
    }

    /// First mismatching dimension between two nodes, identity first.
    pub fn compare(&self, other: &Node) -> NodeCmp {
        if self.id != other.id {
            NodeCmp::IdMismatch
        } else if self.ip != other.ip {
            NodeCmp::IpMismatch
        } else if self.udp != other.udp {
            NodeCmp::UdpPortMismatch
        } else if self.tcp != other.tcp {
            NodeCmp::TcpPortMismatch
        } else {
            NodeCmp::Equal
        }
    }
}

impl Default for Node {
    fn default() -> Self {
        Node {
            ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            udp: 0,
            tcp: 0,
            id: NodeId::default(),
        }
    }
}

/// Outcome of [`Node::compare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeCmp {
    Equal,
    IdMismatch,
    IpMismatch,
    UdpPortMismatch,
    TcpPortMismatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    pub from: Node,
    pub to: Node,
    pub expiration: u64,
    pub id: u64,
    pub extra: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pong {
    pub from: Node,
    pub to: Node,
    pub expiration: u64,
    pub id: u64,
    pub extra: Vec<u8>,
}

/// Request for the endpoint records closest to `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindNode {
    pub from: Node,
    pub to: Node,
    pub target: Node,
    pub expiration: u64,
    pub id: u64,
    pub extra: Vec<u8>,
}

/// Response to `FindNode`: an ordered list of endpoint records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Neighbors {
    pub from: Node,
    pub to: Node,
    pub nodes: Vec<Node>,
    pub expiration: u64,
    pub id: u64,
    pub extra: Vec<u8>,
}

/// Message tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Ping,
    Pong,
    FindNode,
    Neighbors,
}

/// The wire envelope: a tag and exactly one payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UdpMessage {
    Ping(Ping),
    Pong(Pong),
    FindNode(FindNode),
    Neighbors(Neighbors),
}

impl UdpMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            UdpMessage::Ping(_) => MessageKind::Ping,
            UdpMessage::Pong(_) => MessageKind::Pong,
            UdpMessage::FindNode(_) => MessageKind::FindNode,
            UdpMessage::Neighbors(_) => MessageKind::Neighbors,
        }
    }

    /// The sender's endpoint record.
    pub fn from_node(&self) -> &Node {
        match self {
            UdpMessage::Ping(m) => &m.from,
            UdpMessage::Pong(m) => &m.from,
            UdpMessage::FindNode(m) => &m.from,
            UdpMessage::Neighbors(m) => &m.from,
        }
    }

    /// Serialize the envelope.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        rmp_serde::to_vec(self).map_err(|e| CodecError::Encode(e.to_string()))
    }

    /// Validate and deserialize an envelope.
    pub fn decode(buf: &[u8]) -> Result<UdpMessage, CodecError> {
        if buf.is_empty() {
            return Err(CodecError::Parameter("empty buffer".to_string()));
        }
        rmp_serde::from_slice(buf).map_err(|e| CodecError::Decode(e.to_string()))
    }

    /// Compare the source address's IP to the decoded `from` endpoint.
    /// Only the IP is checked, never the ports.
    pub fn from_peer_check(&self, from: SocketAddr) -> bool {
        self.from_node().ip == from.ip()
    }
}

/// Raw-bytes carrier for one datagram, either just read from the socket
/// or just encoded for sending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub buf: Vec<u8>,
    pub len: usize,
    pub peer: SocketAddr,
}

impl Datagram {
    /// Wrap received bytes. An empty payload is a caller error.
    pub fn new(buf: Vec<u8>, peer: SocketAddr) -> Result<Self, CodecError> {
        if buf.is_empty() {
            return Err(CodecError::Parameter("empty datagram".to_string()));
        }
        Ok(Datagram {
            len: buf.len(),
            buf,
            peer,
        })
    }

    /// Encode a message for `peer`, recording buffer and length.
    pub fn from_message(msg: &UdpMessage, peer: SocketAddr) -> Result<Self, CodecError> {
        let buf = msg.encode()?;
        Ok(Datagram {
            len: buf.len(),
            buf,
            peer,
        })
    }

    pub fn decode(&self) -> Result<UdpMessage, CodecError> {
        UdpMessage::decode(&self.buf)
    }

    /// Whether the decoded message claims to come from the address this
    /// datagram actually arrived from.
    pub fn from_peer_check(&self, msg: &UdpMessage) -> bool {
        msg.from_peer_check(self.peer)
    }
}
