use std::{collections::BTreeMap, sync::Arc};

use log::{debug, warn};
use tokio::sync::mpsc;

use crate::messaging::{Message, MessagingError};

/// Routing table from node id to the node's inbound queue.
#[derive(Debug, Default)]
pub struct Network {
    nodes: BTreeMap<u64, mpsc::Sender<Arc<Message>>>,
}

impl Network {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node_id: u64, sender: mpsc::Sender<Arc<Message>>) {
        self.nodes.insert(node_id, sender);
    }

    /// Remove a node from the routing table, simulating a crashed peer.
    pub fn remove_node(&mut self, node_id: u64) {
        self.nodes.remove(&node_id);
    }

    /// Get the ids of all nodes in the network.
    pub fn node_ids(&self) -> Vec<u64> {
        self.nodes.keys().copied().collect()
    }

    /// Send a message to a specific node without waiting for queue space.
    pub fn send_message(
        &self,
        from: u64,
        to: u64,
        message: Arc<Message>,
    ) -> Result<(), MessagingError> {
        let Some(dest) = self.nodes.get(&to) else {
            warn!("Destination node {} not found (from node {})", to, from);
            return Err(MessagingError::NodeNotFound(to));
        };

        debug!("Routing message from node {} to node {}", from, to);
        dest.try_send(message).map_err(|_| MessagingError::SendError(to))
    }
}
