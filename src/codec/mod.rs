//! Wire codecs for the node's protocols.
//!
//! Only transforms between in-memory messages and byte sequences; socket
//! I/O lives with the tasks that own the sockets.

pub mod udpmsg;

pub use udpmsg::{
    CodecError, Datagram, FindNode, MessageKind, Neighbors, Node, NodeCmp, NodeId, Ping, Pong,
    UdpMessage,
};
