mod core;
mod error;
mod event;
mod log;
mod log_entry;
mod node;
mod rpc;
mod server;
mod timer;

pub use self::core::*;

pub use error::ConsensusError;
pub use event::ConsensusEvent;
pub use log_entry::LogEntry;
pub use node::{AppendOutcome, Node};
pub use rpc::{AppendEntriesRequest, AppendEntriesResponse};
pub use server::*;
pub use timer::{NodeTimer, TimerType};

pub use self::log::{InMemoryLog, Log};
