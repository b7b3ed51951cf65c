use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};

use crate::messaging::{Message, MessagingError, Network, NodeReceiver};

/// A node's handle on the network.
#[derive(Debug, Clone)]
pub struct NodeMessenger {
    /// The ID of the node.
    id: u64,
    network: Arc<Mutex<Network>>,
    /// Sender into this node's own queue.
    pub sender: mpsc::Sender<Arc<Message>>,
}

impl NodeMessenger {
    pub fn new(id: u64, network: Arc<Mutex<Network>>, capacity: usize) -> (Self, NodeReceiver) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { id, network, sender }, NodeReceiver::new(id, receiver))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Sends a message directly into this node's own queue, waiting for space.
    pub async fn send_self(&self, message: Message) -> Result<(), MessagingError> {
        self.sender.send(Arc::new(message)).await.map_err(|_| MessagingError::SendError(self.id))
    }

    /// Sends a message to a specific node. Never waits for queue space on the
    /// receiving side, so it is safe to call while holding a node lock.
    pub async fn send_to(&self, to: u64, message: Arc<Message>) -> Result<(), MessagingError> {
        let network = self.network.lock().await;
        network.send_message(self.id, to, message)
    }
}
