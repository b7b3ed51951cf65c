use std::sync::Arc;

use tokio::sync::mpsc;

use crate::messaging::{Message, MessagingError};

/// Inbound end of one node's queue. Created together with the node's
/// [`NodeMessenger`](crate::messaging::NodeMessenger).
#[derive(Debug)]
pub struct NodeReceiver {
    node_id: u64,
    inbox: mpsc::Receiver<Arc<Message>>,
}

impl NodeReceiver {
    pub(super) fn new(node_id: u64, inbox: mpsc::Receiver<Arc<Message>>) -> Self {
        Self { node_id, inbox }
    }

    /// Waits for the next message. Fails once every sender is gone.
    pub async fn receive(&mut self) -> Result<Arc<Message>, MessagingError> {
        self.inbox.recv().await.ok_or(MessagingError::ReceiveError(self.node_id))
    }

    /// Next queued message, if any, without waiting.
    pub fn try_receive(&mut self) -> Option<Arc<Message>> {
        self.inbox.try_recv().ok()
    }
}
