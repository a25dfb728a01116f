//! Message store, packet, and queue (C3-C5), the pieces the dispatcher
//! (C6, `crate::dispatcher`) composes into `register_message`/`send_message`.

mod packet;
mod queue;
mod schema;

pub use packet::{MessagePacket, PacketId, WireFrame};
pub use queue::{MessageQueue, MessageStatus};
pub use schema::{MessageSchema, MessageStore};
