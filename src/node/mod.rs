/// The node
pub mod node;

/// Abstract peer network the node relays through
pub mod network;
