// P2P networking

mod message;
mod node;
mod peer;
mod state;

pub use message::{InvType, Message, MessageType, MAX_MESSAGE_SIZE, NODE_VERSION, PROTOCOL_VERSION};
pub use node::Node;
pub use peer::{read_message, send_message};
pub use state::NodeState;
