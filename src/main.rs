#![warn(missing_docs)]
//! The replicated-log core of a Raft node, run as an in-process simulation

mod config;
mod consensus;
mod messaging;
mod state_machine;

use std::{collections::HashMap, sync::Arc, time::Duration};

use config::Config;
use consensus::{ConsensusError, ConsensusEvent, NodeServer, NodeState, NodeTimer};
use log::{debug, error, info, warn};
use messaging::{Message, Network, NodeMessenger, NodeReceiver};
use state_machine::{StateMachine, StateMachineDefault};
use tokio::sync::{Mutex, broadcast};

type SharedServer = Arc<Mutex<NodeServer<StateMachineDefault>>>;

/// Helper to send a command message to a specific node
async fn send_command_to_node(
    nodes_messengers: &HashMap<u64, NodeMessenger>,
    node_id: u64,
    message: Message,
) -> Result<(), ConsensusError> {
    if let Some(messenger) = nodes_messengers.get(&node_id) {
        // Use send_self because the command originates "externally" but targets the
        // node's loop
        messenger.send_self(message).await.map_err(ConsensusError::Transport)
    } else {
        Err(ConsensusError::NodeNotFound(node_id))
    }
}

/// Wait for the first election timeout: that node is the one the election
/// picks.
async fn wait_for_election_timeout(
    event_rx: &mut broadcast::Receiver<ConsensusEvent>,
    timeout: Duration,
) -> Result<u64, ConsensusError> {
    let wait = async {
        loop {
            match event_rx.recv().await {
                Ok(ConsensusEvent::ElectionTimeout { node_id, term }) => {
                    info!("Simulation: Node {} timed out at term {}", node_id, term);
                    return Ok(node_id);
                }
                Ok(other_event) => {
                    debug!("Simulation: Ignoring event while waiting for timeout: {:?}", other_event);
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Simulation: Event receiver lagged by {} messages.", n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(ConsensusError::Timeout("Event channel closed".to_string()));
                }
            }
        }
    };

    tokio::time::timeout(timeout, wait)
        .await
        .map_err(|_| ConsensusError::Timeout("No election timeout observed".to_string()))?
}

/// Spawn the event loop of one node: inbound messages and timer events are
/// handled one at a time under the node's lock.
fn spawn_node_loop(
    node_server: SharedServer,
    mut node_receiver: NodeReceiver,
    mut timer: NodeTimer,
    node_id: u64,
) {
    tokio::spawn(async move {
        info!("Simulation: Start processing messages for node {}", node_id);

        loop {
            tokio::select! {
              msg = node_receiver.receive() => {
                let msg = match msg {
                  Ok(msg) => msg,
                  Err(e) => {
                    error!("!!! Simulation: Error receiving message for node {}: {:?}", node_id, e);
                    break;
                  }
                };

                debug!("Simulation: Node {} received message: {:?}", node_id, msg);
                let mut node_locked = node_server.lock().await;
                let step_result = node_locked.process_message(msg.clone(), &mut timer).await;
                drop(node_locked);

                if let Err(e) = step_result {
                  error!(
                    "!!! Simulation: Error processing message {:?} for node {}: {}",
                    msg, node_id, e
                  );
                }
              }

              timer_event = timer.wait_for_timer_and_emit_event() => {
                debug!("Simulation: Node {} timer event triggered: {:?}", node_id, timer_event);
                let mut node_locked = node_server.lock().await;
                let result = node_locked.handle_timer_event(timer_event, &mut timer).await;
                drop(node_locked);

                // unreachable followers are retried on the next heartbeat
                if let Err(e) = result {
                  error!("!!! Simulation: Error handling timer event for node {}: {}", node_id, e);
                }
              }
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<(), ConsensusError> {
    // Initialize logging
    env_logger::init();

    let config = Config { node_count: 3, ..Default::default() };

    // Create a broadcast channel for consensus events.
    let (event_tx, mut event_rx) = broadcast::channel::<ConsensusEvent>(256);

    let network = Arc::new(Mutex::new(Network::new()));
    let mut nodes: HashMap<u64, SharedServer> = HashMap::new();
    let mut nodes_messengers: HashMap<u64, NodeMessenger> = HashMap::new();

    info!("Simulation: Setting up {} nodes...", config.node_count);

    for id in config.node_ids() {
        let (node_messenger, node_receiver) =
            NodeMessenger::new(id, network.clone(), config.channel_capacity);
        network.lock().await.add_node(id, node_messenger.sender.clone());
        nodes_messengers.insert(id, node_messenger.clone());

        let state = NodeState::new(id, config.node_ids(), config.election_timeout_min);
        let timer = NodeTimer::new(&config, state.election_timeout());
        let node_server = Arc::new(Mutex::new(NodeServer::new(
            state,
            StateMachineDefault::new(),
            node_messenger,
            event_tx.clone(),
        )));
        nodes.insert(id, node_server.clone());

        spawn_node_loop(node_server, node_receiver, timer, id);
    }

    drop(event_tx);

    info!("Simulation: Nodes initialized, tasks spawned");

    // Phase 1: the first node to time out is handed leadership
    let leader_id =
        wait_for_election_timeout(&mut event_rx, config.election_timeout_max * 2).await?;
    send_command_to_node(&nodes_messengers, leader_id, Message::BecomeLeaderCmd).await?;

    // Phase 2: the leader appends commands
    let num_commands_to_send: u64 = 10;

    info!("Simulation: Sending {} commands to Leader Node {}...", num_commands_to_send, leader_id);

    for i in 0..num_commands_to_send {
        let message = Message::ClientCommand {
            command_type: "set".to_string(),
            command_data: format!("key{}=value{}", i % 3, i).into_bytes(),
        };
        send_command_to_node(&nodes_messengers, leader_id, message).await?;
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    info!("Simulation: Finished sending commands.");

    // Phase 3: every node must apply every command
    let target_last_applied = num_commands_to_send - 1;
    let verification_timeout = Duration::from_secs(10);
    let verification_start_time = tokio::time::Instant::now();
    let mut success = false;

    info!(
        "Simulation: Verifying application of index {} across {} nodes (timeout: {:?})...",
        target_last_applied, config.node_count, verification_timeout
    );

    while verification_start_time.elapsed() <= verification_timeout {
        let mut all_nodes_ok_this_iteration = true;

        for id in config.node_ids() {
            let node_arc = nodes.get(&id).ok_or(ConsensusError::NodeNotFound(id))?;
            let node_locked = node_arc.lock().await;

            if node_locked.last_applied() < Some(target_last_applied)
                || node_locked.state_machine().applied_count() != num_commands_to_send
            {
                all_nodes_ok_this_iteration = false;
                debug!(
                    "Node {} has not reached target state yet (last_applied={:?}, applied={})",
                    id,
                    node_locked.last_applied(),
                    node_locked.state_machine().applied_count()
                );
                break;
            }
        }

        if all_nodes_ok_this_iteration {
            success = true;
            break;
        }

        tokio::time::sleep(Duration::from_millis(150)).await;
    }

    for id in config.node_ids() {
        let node_arc = nodes.get(&id).ok_or(ConsensusError::NodeNotFound(id))?;
        let node_locked = node_arc.lock().await;
        let state_machine = node_locked.state_machine();
        let line = format!(
            " -> Node {}: Term={}, Role={}, CommitIdx={:?}, LastApplied={:?}, Applied={}, \
             LastSet={:?}",
            id,
            node_locked.current_term(),
            node_locked.state().role(),
            node_locked.commit_index(),
            node_locked.last_applied(),
            state_machine.count_of("set"),
            state_machine.latest("set").map(String::from_utf8_lossy),
        );
        if success { info!("{}", line) } else { error!("{}", line) }
    }

    if !success {
        error!("Simulation: Verification FAILED.");
        return Err(ConsensusError::Timeout("State verification failed".to_string()));
    }

    info!(
        "Simulation: Verification successful! All {} nodes applied {} commands.",
        config.node_count, num_commands_to_send
    );

    // A crashed follower is reported, not fatal
    network.lock().await.remove_node((leader_id + 1) % config.node_count as u64);
    if let Err(e) =
        send_command_to_node(&nodes_messengers, leader_id, Message::ClientCommand {
            command_type: "set".to_string(),
            command_data: b"after-crash".to_vec(),
        })
        .await
    {
        warn!("Simulation: Could not submit command after crash: {}", e);
    }
    tokio::time::sleep(config.heartbeat_interval * 4).await;
    let commit_after_crash = nodes
        .get(&leader_id)
        .ok_or(ConsensusError::NodeNotFound(leader_id))?
        .lock()
        .await
        .commit_index();
    info!(
        "Simulation: Leader commit index with one follower down: {:?} (nodes reachable: {:?})",
        commit_after_crash,
        network.lock().await.node_ids()
    );
    if commit_after_crash < Some(num_commands_to_send) {
        return Err(ConsensusError::Timeout(
            "Leader did not commit with a majority reachable".to_string(),
        ));
    }

    Ok(())
}
