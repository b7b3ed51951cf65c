use std::time::Duration;

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(50);
pub const DEFAULT_ELECTION_TIMEOUT_MIN: Duration = Duration::from_millis(150);
pub const DEFAULT_ELECTION_TIMEOUT_MAX: Duration = Duration::from_millis(300);
pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;

#[derive(Debug, Clone)]
pub struct Config {
    /// How often a leader replicates to its followers.
    pub heartbeat_interval: Duration,
    /// Base election timeout handed to each node.
    pub election_timeout_min: Duration,
    /// Upper bound of the randomized election timeout.
    pub election_timeout_max: Duration,
    pub node_count: usize,
    /// Capacity of each node's inbound message queue.
    pub channel_capacity: usize,
}

impl Config {
    /// Ids of every node in the cluster.
    pub fn node_ids(&self) -> impl Iterator<Item = u64> {
        0..self.node_count as u64
    }

    /// Width of the random jitter added to the base election timeout.
    pub fn election_jitter(&self) -> Duration {
        self.election_timeout_max.saturating_sub(self.election_timeout_min)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_count: 1,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            election_timeout_min: DEFAULT_ELECTION_TIMEOUT_MIN,
            election_timeout_max: DEFAULT_ELECTION_TIMEOUT_MAX,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}
