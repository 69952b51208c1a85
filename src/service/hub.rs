/// Connection hub: per-terminal set of live connections and the process they share
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::pty::{ProcessHandle, PtyError};

/// Hub-side handle of one transport connection
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: String,
    outbound: mpsc::Sender<Bytes>,
    closed: CancellationToken,
    /// Final chunk that did not fit in the outbound queue
    farewell: Arc<Mutex<Option<Bytes>>>,
}

impl ConnectionHandle {
    /// New handle plus the receiving end of its bounded outbound queue
    pub fn new(id: impl Into<String>, capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = Self {
            id: id.into(),
            outbound: tx,
            closed: CancellationToken::new(),
            farewell: Arc::default(),
        };
        (handle, rx)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Cancelled when the hub forcibly closes the connection
    pub fn closed(&self) -> &CancellationToken {
        &self.closed
    }

    /// Take the final chunk that was held back because the queue was full.
    /// Meant to be sent after the queue has been drained.
    pub fn take_farewell(&self) -> Option<Bytes> {
        self.farewell
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

#[derive(Default)]
struct SlotState {
    connections: Vec<ConnectionHandle>,
    process: Option<Arc<ProcessHandle>>,
    retired: bool,
}

impl SlotState {
    fn is_idle(&self) -> bool {
        self.connections.is_empty() && self.process.is_none()
    }

    /// Queue `data` on every connection without waiting on any of them
    fn fan_out(&mut self, terminal_id: &str, data: &Bytes) {
        self.connections
            .retain(|conn| match conn.outbound.try_send(data.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        "Outbound queue of connection {} on terminal {} is full, dropping {} bytes",
                        conn.id,
                        terminal_id,
                        data.len()
                    );
                    true
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(
                        "Connection {} on terminal {} went away",
                        conn.id, terminal_id
                    );
                    false
                }
            });
    }

    /// Queue the last chunk a connection will ever get. A full queue keeps
    /// it aside on the handle instead of dropping it.
    fn send_final(&mut self, terminal_id: &str, data: &Bytes) {
        for conn in &self.connections {
            if let Err(TrySendError::Full(data)) = conn.outbound.try_send(data.clone()) {
                debug!(
                    "Outbound queue of connection {} on terminal {} is full, holding final chunk",
                    conn.id, terminal_id
                );
                *conn
                    .farewell
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(data);
            }
        }
    }

    fn cancel_all(&mut self) -> usize {
        let count = self.connections.len();
        for conn in self.connections.drain(..) {
            conn.closed.cancel();
        }
        count
    }
}

type Slot = Arc<AsyncMutex<SlotState>>;

/// Exclusive access to one terminal's slot. Idle slots are retired on drop.
pub struct SlotGuard<'a> {
    hub: &'a ConnectionHub,
    terminal_id: String,
    slot: Slot,
    state: OwnedMutexGuard<SlotState>,
}

impl SlotGuard<'_> {
    pub fn process(&self) -> Option<Arc<ProcessHandle>> {
        self.state.process.clone()
    }

    pub fn set_process(&mut self, process: Arc<ProcessHandle>) {
        self.state.process = Some(process);
    }

    pub fn register(&mut self, connection: ConnectionHandle) {
        debug!(
            "Registering connection {} on terminal {}",
            connection.id, self.terminal_id
        );
        self.state.connections.push(connection);
    }

    pub fn viewers(&self) -> usize {
        self.state.connections.len()
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        if self.state.retired || !self.state.is_idle() {
            return;
        }
        self.state.retired = true;
        let mut slots = self.hub.lock_slots();
        if slots
            .get(&self.terminal_id)
            .is_some_and(|current| Arc::ptr_eq(current, &self.slot))
        {
            slots.remove(&self.terminal_id);
        }
    }
}

/// Fans process output out to every viewer of a terminal and routes their
/// input to the one process. Lifecycle decisions belong to the caller: the
/// hub only hands back handles that became orphaned.
#[derive(Default)]
pub struct ConnectionHub {
    slots: Mutex<HashMap<String, Slot>>,
}

impl ConnectionHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_slots(&self) -> std::sync::MutexGuard<'_, HashMap<String, Slot>> {
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Lock the slot of `terminal_id`, creating it if needed
    pub async fn lock(&self, terminal_id: &str) -> SlotGuard<'_> {
        loop {
            let slot = self
                .lock_slots()
                .entry(terminal_id.to_string())
                .or_default()
                .clone();
            let state = slot.clone().lock_owned().await;
            if state.retired {
                // lost a race with the slot's removal; the map has a fresh one now
                continue;
            }
            return SlotGuard {
                hub: self,
                terminal_id: terminal_id.to_string(),
                slot,
                state,
            };
        }
    }

    /// Lock the slot of `terminal_id` only if it exists
    async fn lock_existing(&self, terminal_id: &str) -> Option<SlotGuard<'_>> {
        if !self.lock_slots().contains_key(terminal_id) {
            return None;
        }
        Some(self.lock(terminal_id).await)
    }

    pub async fn register(&self, terminal_id: &str, connection: ConnectionHandle) {
        self.lock(terminal_id).await.register(connection);
    }

    /// Remove a connection. Returns the ephemeral process left without viewers,
    /// which the caller must kill.
    pub async fn unregister(
        &self,
        terminal_id: &str,
        connection_id: &str,
    ) -> Option<Arc<ProcessHandle>> {
        let mut guard = self.lock_existing(terminal_id).await?;
        guard.state.connections.retain(|conn| conn.id != connection_id);

        if !guard.state.connections.is_empty() {
            return None;
        }
        let orphaned = guard
            .state
            .process
            .as_ref()
            .is_some_and(|process| !process.is_persistent());
        if !orphaned {
            return None;
        }
        info!(
            "Last viewer left terminal {}, detaching its ephemeral process",
            terminal_id
        );
        guard.state.process.take()
    }

    pub async fn broadcast(&self, terminal_id: &str, data: Bytes) {
        if let Some(mut guard) = self.lock_existing(terminal_id).await {
            guard.state.fan_out(terminal_id, &data);
        }
    }

    /// Write `data` to the terminal's process. Returns false when there is none.
    pub async fn route_input(&self, terminal_id: &str, data: &[u8]) -> Result<bool, PtyError> {
        // the write happens outside the slot lock so output keeps flowing
        let Some(process) = self.process(terminal_id).await else {
            debug!(
                "Dropping {} bytes of input for terminal {} without a process",
                data.len(),
                terminal_id
            );
            return Ok(false);
        };
        process.write(data).await?;
        Ok(true)
    }

    /// Cancel every connection and detach the process. Returns the detached process.
    pub async fn close_all(&self, terminal_id: &str) -> Option<Arc<ProcessHandle>> {
        let mut guard = self.lock_existing(terminal_id).await?;
        let closed = guard.state.cancel_all();
        if closed > 0 {
            info!("Closed {} connections of terminal {}", closed, terminal_id);
        }
        guard.state.process.take()
    }

    /// Handle the exit of `process`: deliver `notice`, close every connection
    /// and detach it. Does nothing if `process` is no longer the terminal's process.
    pub async fn process_exited(
        &self,
        terminal_id: &str,
        process: &Arc<ProcessHandle>,
        notice: Bytes,
    ) {
        let Some(mut guard) = self.lock_existing(terminal_id).await else {
            return;
        };
        let current = guard
            .state
            .process
            .as_ref()
            .is_some_and(|p| Arc::ptr_eq(p, process));
        if !current {
            debug!(
                "Exited process of terminal {} was already detached",
                terminal_id
            );
            return;
        }
        guard.state.send_final(terminal_id, &notice);
        guard.state.cancel_all();
        guard.state.process = None;
    }

    pub async fn process(&self, terminal_id: &str) -> Option<Arc<ProcessHandle>> {
        self.lock_existing(terminal_id).await?.process()
    }

    /// The terminal's process, but only while someone is watching it
    pub async fn viewed_process(&self, terminal_id: &str) -> Option<Arc<ProcessHandle>> {
        let guard = self.lock_existing(terminal_id).await?;
        if guard.viewers() == 0 {
            return None;
        }
        guard.process()
    }

    pub async fn viewers(&self, terminal_id: &str) -> usize {
        match self.lock_existing(terminal_id).await {
            Some(guard) => guard.viewers(),
            None => 0,
        }
    }

    /// Ids of every terminal with connections or a process
    pub fn terminal_ids(&self) -> Vec<String> {
        self.lock_slots().keys().cloned().collect()
    }
}
