//! Wire model for the notebook kernel: typed messages, the signed multipart
//! envelope codec, and connection descriptors.

pub mod codec;
pub mod connection;
pub mod content;
pub mod error;
pub mod message;
pub mod signer;

pub use codec::{Codec, DELIMITER};
pub use connection::{ChannelKind, ConnectionInfo};
pub use content::Content;
pub use error::ProtocolError;
pub use message::{Header, Message, MessageType, PROTOCOL_VERSION};
pub use signer::{SignatureScheme, Signer};
