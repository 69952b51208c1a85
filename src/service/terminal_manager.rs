/// Terminal lifecycle: registry records, backend sessions and live processes
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::pty::{ExitCode, ProcessHandle, ProcessHost, PtyOutput};
use crate::registry::{SessionRegistry, TerminalRecord};
use crate::service::ServiceError;
use crate::service::hub::{ConnectionHandle, ConnectionHub};
use crate::service::workdir::WorkdirPolicy;

pub const MAX_TERMINAL_ID_LEN: usize = 64;

/// Ids end up in backend session names and URL paths
pub fn validate_terminal_id(id: &str) -> Result<(), ServiceError> {
    let valid = !id.is_empty()
        && id.len() <= MAX_TERMINAL_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ServiceError::InvalidTerminalId(id.to_string()))
    }
}

pub fn default_name(id: &str) -> String {
    format!("Terminal {}", id.chars().take(8).collect::<String>())
}

fn exit_notice(code: ExitCode) -> String {
    match code {
        Some(code) => format!("\r\n[Process exited with code {}]\r\n", code),
        None => "\r\n[Process exited with code unknown]\r\n".to_string(),
    }
}

/// Parameters of a create request; every field is optional
#[derive(Debug, Clone, Default)]
pub struct CreateTerminal {
    pub id: Option<String>,
    pub cwd: Option<PathBuf>,
    pub name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreatedTerminal {
    pub record: TerminalRecord,
    pub session_name: String,
    /// The persistent backend was unavailable; the terminal will run an ephemeral shell
    pub fallback: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminalState {
    Unknown,
    Registered,
    Active,
}

#[derive(Debug, Clone)]
pub struct TerminalDetail {
    pub record: TerminalRecord,
    pub state: TerminalState,
    pub viewers: usize,
    pub persistent: bool,
}

/// A connection registered on a terminal
#[derive(Debug)]
pub struct Attachment {
    pub connection: ConnectionHandle,
    /// Process output for this connection, in emission order
    pub outbound: mpsc::Receiver<Bytes>,
    pub persistent: bool,
}

/// Owns every terminal's lifecycle. Constructed once and shared through `AppState`.
pub struct TerminalManager {
    registry: SessionRegistry,
    host: ProcessHost,
    hub: Arc<ConnectionHub>,
    workdir: WorkdirPolicy,
    outbound_queue: usize,
}

impl TerminalManager {
    pub fn new(
        registry: SessionRegistry,
        host: ProcessHost,
        workdir: WorkdirPolicy,
        outbound_queue: usize,
    ) -> Self {
        Self {
            registry,
            host,
            hub: Arc::new(ConnectionHub::new()),
            workdir,
            outbound_queue,
        }
    }

    pub fn root(&self) -> &std::path::Path {
        self.workdir.root()
    }

    /// Register a terminal and start its backend session when possible.
    ///
    /// An unavailable backend is not an error: the result is flagged as
    /// `fallback` and the first connection gets an ephemeral shell.
    pub async fn create(&self, request: CreateTerminal) -> Result<CreatedTerminal, ServiceError> {
        let id = match request.id {
            Some(id) => {
                validate_terminal_id(&id)?;
                id
            }
            None => Uuid::new_v4().to_string(),
        };
        let requested_cwd = request.cwd.is_some();
        let cwd = self.workdir.clamp(request.cwd.as_deref());
        let name = request
            .name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty());
        let session_name = self.host.session_name(&id);

        let fallback = match self.host.ensure_persistent_session(&session_name, &cwd).await {
            Ok(()) => false,
            Err(e) => {
                warn!(
                    "Persistent session for terminal {} unavailable, falling back: {}",
                    id, e
                );
                true
            }
        };

        let record = self.registry.upsert_with(&id, |existing| match existing {
            Some(mut record) => {
                if let Some(name) = name {
                    record.name = name;
                }
                if requested_cwd {
                    record.cwd = cwd;
                }
                record
            }
            None => TerminalRecord::new(
                id.clone(),
                name.unwrap_or_else(|| default_name(&id)),
                cwd,
            ),
        })?;

        info!(
            "Created terminal {} ({:?}) in {:?}{}",
            record.id,
            record.name,
            record.cwd,
            if fallback { " without persistence" } else { "" }
        );
        Ok(CreatedTerminal {
            record,
            session_name,
            fallback,
        })
    }

    /// Registry records plus backend sessions that carry our prefix
    pub async fn list(&self) -> Vec<TerminalRecord> {
        let mut records = self.registry.list();
        let known: HashSet<String> = records.iter().map(|r| r.id.clone()).collect();

        for session in self.host.list_persistent_sessions().await {
            let Some(id) = self.host.terminal_id_of(&session) else {
                continue;
            };
            if known.contains(id) || validate_terminal_id(id).is_err() {
                continue;
            }
            records.push(self.synthesized_record(id));
        }

        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        records
    }

    pub async fn get(&self, id: &str) -> Result<TerminalDetail, ServiceError> {
        validate_terminal_id(id)?;

        let record = self.registry.get(id);
        let process = self.hub.process(id).await;
        let viewers = self.hub.viewers(id).await;
        let has_session = self
            .host
            .list_persistent_sessions()
            .await
            .contains(&self.host.session_name(id));

        let state = if process.is_some() || viewers > 0 {
            TerminalState::Active
        } else if record.is_some() || has_session {
            TerminalState::Registered
        } else {
            TerminalState::Unknown
        };
        if state == TerminalState::Unknown {
            return Err(ServiceError::UnknownTerminal(id.to_string()));
        }

        Ok(TerminalDetail {
            record: record.unwrap_or_else(|| self.synthesized_record(id)),
            state,
            viewers,
            persistent: process.map(|p| p.is_persistent()).unwrap_or(has_session),
        })
    }

    /// Set the display name, creating the record for an unknown id
    pub async fn rename(&self, id: &str, name: &str) -> Result<TerminalRecord, ServiceError> {
        validate_terminal_id(id)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(ServiceError::InvalidName);
        }

        let root = self.workdir.root().to_path_buf();
        let record = self.registry.upsert_with(id, |existing| match existing {
            Some(mut record) => {
                record.name = name.to_string();
                record
            }
            None => TerminalRecord::new(id, name, root),
        })?;
        info!("Renamed terminal {} to {:?}", id, record.name);
        Ok(record)
    }

    /// Resize the live process. Returns false when nobody is viewing the terminal;
    /// a persistent attach client kept around without viewers is left alone.
    pub async fn resize(&self, id: &str, rows: u16, cols: u16) -> Result<bool, ServiceError> {
        validate_terminal_id(id)?;
        match self.hub.viewed_process(id).await {
            Some(process) => {
                process.resize(rows, cols).await;
                Ok(true)
            }
            None => {
                debug!("Ignoring resize of terminal {} without viewers", id);
                Ok(false)
            }
        }
    }

    /// Tear the terminal down completely. Destroying an unknown id is a no-op.
    pub async fn destroy(&self, id: &str) -> Result<(), ServiceError> {
        validate_terminal_id(id)?;

        self.host
            .kill_persistent_session(&self.host.session_name(id))
            .await;
        let deleted = self.registry.delete(id);
        if let Some(process) = self.hub.close_all(id).await {
            process.kill().await;
        }

        match deleted? {
            Some(_) => info!("Destroyed terminal {}", id),
            None => debug!("Destroyed terminal {} without a record", id),
        }
        Ok(())
    }

    /// Register a new connection on `id`, reusing the live process or
    /// attaching/spawning one.
    pub async fn on_transport_connect(&self, id: &str) -> Result<Attachment, ServiceError> {
        validate_terminal_id(id)?;

        let (connection, outbound) =
            ConnectionHandle::new(Uuid::new_v4().to_string(), self.outbound_queue);
        let mut slot = self.hub.lock(id).await;

        let process = match slot.process().filter(|p| p.is_alive()) {
            Some(process) => {
                debug!("Reusing process {:?} for terminal {}", process.pid(), id);
                process
            }
            None => {
                let cwd = self
                    .registry
                    .get(id)
                    .map(|record| self.workdir.clamp(Some(record.cwd.as_path())))
                    .unwrap_or_else(|| self.workdir.root().to_path_buf());

                let (process, output) = match self.host.attach_or_spawn(id, &cwd).await {
                    Ok(spawned) => spawned,
                    Err(e) => {
                        error!("Failed to start a process for terminal {}: {}", id, e);
                        return Err(e.into());
                    }
                };
                slot.set_process(process.clone());
                spawn_output_pump(self.hub.clone(), id.to_string(), process.clone(), output);
                process
            }
        };

        if self.registry.get(id).is_none() {
            self.register_attached(id);
        }

        slot.register(connection.clone());
        info!(
            "Connection {} attached to terminal {} ({} viewers)",
            connection.id(),
            id,
            slot.viewers()
        );
        Ok(Attachment {
            connection,
            outbound,
            persistent: process.is_persistent(),
        })
    }

    /// Attaching to an unknown id creates its record with defaults
    fn register_attached(&self, id: &str) {
        let root = self.workdir.root().to_path_buf();
        let created = self.registry.upsert_with(id, |existing| {
            existing.unwrap_or_else(|| TerminalRecord::new(id, default_name(id), root))
        });
        match created {
            Ok(record) => info!("Registered terminal {} on first attach", record.id),
            Err(e) => warn!("Failed to register attached terminal {}: {}", id, e),
        }
    }

    /// Unregister a connection; an ephemeral process left without viewers is killed
    pub async fn on_transport_disconnect(&self, id: &str, connection_id: &str) {
        info!("Connection {} left terminal {}", connection_id, id);
        if let Some(orphan) = self.hub.unregister(id, connection_id).await {
            info!(
                "Killing ephemeral process {:?} of terminal {}",
                orphan.pid(),
                id
            );
            orphan.kill().await;
        }
    }

    /// Write input to the terminal's process. Returns false if nothing was written.
    pub async fn route_input(&self, id: &str, data: &[u8]) -> bool {
        match self.hub.route_input(id, data).await {
            Ok(written) => written,
            Err(e) => {
                warn!("Failed to write input to terminal {}: {}", id, e);
                false
            }
        }
    }

    /// Close every connection and kill every live process. Killing an attach
    /// client leaves its backend session running.
    pub async fn shutdown(&self) {
        let ids = self.hub.terminal_ids();
        info!("Shutting down {} live terminals", ids.len());
        for id in ids {
            if let Some(process) = self.hub.close_all(&id).await {
                process.kill().await;
            }
        }
    }

    fn synthesized_record(&self, id: &str) -> TerminalRecord {
        TerminalRecord {
            id: id.to_string(),
            name: default_name(id),
            cwd: self.workdir.root().to_path_buf(),
            created_at: 0,
        }
    }
}

/// Forward process output to every viewer until EOF, then announce the exit
fn spawn_output_pump(
    hub: Arc<ConnectionHub>,
    terminal_id: String,
    process: Arc<ProcessHandle>,
    output: PtyOutput,
) {
    tokio::spawn(async move {
        let PtyOutput { mut chunks, exit } = output;
        while let Some(chunk) = chunks.recv().await {
            hub.broadcast(&terminal_id, Bytes::from(chunk)).await;
        }

        let code = exit.await.unwrap_or(None);
        info!(
            "Process {:?} of terminal {} exited with code {:?}",
            process.pid(),
            terminal_id,
            code
        );
        hub.process_exited(&terminal_id, &process, Bytes::from(exit_notice(code)))
            .await;
    });
}
