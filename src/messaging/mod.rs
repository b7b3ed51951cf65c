mod error;
mod message;
mod messenger;
mod network;
mod receiver;

pub use error::MessagingError;
pub use message::Message;
pub use messenger::NodeMessenger;
pub use network::Network;
pub use receiver::NodeReceiver;
