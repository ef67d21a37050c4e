use super::entity::{CreateSessionParams, SessionKind, SessionSummary};
use crate::errors::AgentportError;
use crate::infrastructure::events::{AppEvent, EventBus};
use crate::meta::{MetaStore, WorktreeMetadata};
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use dashmap::DashMap;
use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, watch};

pub const IDLE_TIMEOUT: Duration = Duration::from_secs(5);
pub const META_FLUSH_INTERVAL: Duration = Duration::from_secs(5);
pub const RESUME_RETRY_WINDOW: Duration = Duration::from_secs(3);
pub const MAX_SCROLLBACK_BYTES: usize = 256 * 1024;
pub const CONTINUE_FLAG: &str = "--continue";

const READ_BUF_SIZE: usize = 8192;

/// Bounded replay buffer for terminal output. Eviction drops whole chunks
/// from the front so replayed output never starts mid-escape-sequence at a
/// point we never emitted.
struct Scrollback {
    chunks: VecDeque<Bytes>,
    bytes: usize,
    limit: usize,
}

impl Scrollback {
    fn new(limit: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            bytes: 0,
            limit,
        }
    }

    fn push(&mut self, chunk: Bytes) {
        self.bytes += chunk.len();
        self.chunks.push_back(chunk);
        while self.bytes > self.limit && self.chunks.len() > 1 {
            if let Some(evicted) = self.chunks.pop_front() {
                self.bytes -= evicted.len();
            }
        }
    }

    fn snapshot(&self) -> Vec<Bytes> {
        self.chunks.iter().cloned().collect()
    }

    fn clear(&mut self) {
        self.chunks.clear();
        self.bytes = 0;
    }
}

#[derive(Debug, Clone)]
struct SpawnSpec {
    command: String,
    args: Vec<String>,
    cwd: PathBuf,
    cols: u16,
    rows: u16,
    resume: bool,
}

struct ProcIo {
    writer: Box<dyn Write + Send>,
    master: Box<dyn MasterPty + Send>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    pid: Option<u32>,
}

struct LiveState {
    display_name: String,
    last_activity: DateTime<Utc>,
    idle: bool,
}

pub struct Session {
    pub id: String,
    pub kind: SessionKind,
    pub root: PathBuf,
    pub repo_name: String,
    pub repo_path: PathBuf,
    pub worktree_name: String,
    pub branch_name: Option<String>,
    pub created_at: DateTime<Utc>,
    persist_meta: bool,
    state: Mutex<LiveState>,
    spec: Mutex<SpawnSpec>,
    io: Mutex<Option<ProcIo>>,
    scrollback: Mutex<Scrollback>,
    output_tx: broadcast::Sender<Bytes>,
    exit_tx: watch::Sender<bool>,
    can_retry: AtomicBool,
}

impl Session {
    pub fn summary(&self) -> SessionSummary {
        let state = self.state.lock().unwrap();
        let pid = self.io.lock().unwrap().as_ref().and_then(|io| io.pid);
        SessionSummary {
            id: self.id.clone(),
            kind: self.kind,
            root: self.root.clone(),
            repo_name: self.repo_name.clone(),
            repo_path: self.repo_path.clone(),
            worktree_name: self.worktree_name.clone(),
            branch_name: self.branch_name.clone(),
            display_name: state.display_name.clone(),
            created_at: self.created_at,
            last_activity: state.last_activity,
            idle: state.idle,
            pid,
        }
    }

    fn metadata(&self) -> WorktreeMetadata {
        let state = self.state.lock().unwrap();
        WorktreeMetadata {
            worktree_path: self.repo_path.clone(),
            display_name: state.display_name.clone(),
            last_activity: state
                .last_activity
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            branch_name: self.branch_name.clone(),
        }
    }
}

/// Everything a terminal WebSocket needs at attach time. The scrollback
/// snapshot and the live subscription are taken under one lock, so no chunk
/// is ever missed or duplicated between replay and the live stream.
pub struct SessionAttachment {
    pub scrollback: Vec<Bytes>,
    pub output: broadcast::Receiver<Bytes>,
    pub exited: watch::Receiver<bool>,
}

struct ManagerInner {
    sessions: DashMap<String, Arc<Session>>,
    meta: MetaStore,
    events: EventBus,
    idle_timeout: Duration,
    retry_window: Duration,
    flush_interval: Duration,
}

/// Owns every live PTY session: spawning, output fan-out, idle tracking,
/// metadata flushing, and teardown. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

impl SessionManager {
    pub fn new(meta: MetaStore, events: EventBus) -> Self {
        Self::with_timing(
            meta,
            events,
            IDLE_TIMEOUT,
            RESUME_RETRY_WINDOW,
            META_FLUSH_INTERVAL,
        )
    }

    pub fn with_timing(
        meta: MetaStore,
        events: EventBus,
        idle_timeout: Duration,
        retry_window: Duration,
        flush_interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                sessions: DashMap::new(),
                meta,
                events,
                idle_timeout,
                retry_window,
                flush_interval,
            }),
        }
    }

    pub fn create(&self, params: CreateSessionParams) -> Result<SessionSummary, AgentportError> {
        if params.kind == SessionKind::Repo {
            if let Some(existing) = self.find_repo_session(&params.repo_path) {
                return Err(AgentportError::RepoSessionExists {
                    session_id: existing.id,
                });
            }
        }

        let id = random_hex(8)?;
        let mut display_name = params
            .display_name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| {
                if params.worktree_name.is_empty() {
                    params.repo_name.clone()
                } else {
                    params.worktree_name.clone()
                }
            });
        let mut branch_name = params.branch_name.clone();
        if params.persist_meta {
            // A persisted name from an earlier session on this worktree wins.
            if let Some(stored) = self.inner.meta.read(&params.repo_path) {
                display_name = stored.display_name;
                branch_name = stored.branch_name.or(branch_name);
            }
        }

        let spec = SpawnSpec {
            command: params.command.clone(),
            args: params.args.clone(),
            cwd: params
                .cwd
                .clone()
                .unwrap_or_else(|| params.repo_path.clone()),
            cols: params.cols,
            rows: params.rows,
            resume: params.resume,
        };

        let (output_tx, _) = broadcast::channel(1024);
        let (exit_tx, _) = watch::channel(false);
        let session = Arc::new(Session {
            id: id.clone(),
            kind: params.kind,
            root: params.root.clone(),
            repo_name: params.repo_name.clone(),
            repo_path: params.repo_path.clone(),
            worktree_name: params.worktree_name.clone(),
            branch_name,
            created_at: Utc::now(),
            persist_meta: params.persist_meta,
            state: Mutex::new(LiveState {
                display_name,
                last_activity: Utc::now(),
                idle: false,
            }),
            spec: Mutex::new(spec),
            io: Mutex::new(None),
            scrollback: Mutex::new(Scrollback::new(MAX_SCROLLBACK_BYTES)),
            output_tx,
            exit_tx,
            can_retry: AtomicBool::new(params.resume),
        });

        // Register before spawning so the exit watcher always finds the
        // session, however fast the process dies.
        self.inner.sessions.insert(id.clone(), session.clone());
        if let Err(e) = self.spawn_into(&session) {
            self.inner.sessions.remove(&id);
            return Err(e);
        }
        if session.persist_meta {
            self.flush_meta(&session);
        }
        log::info!(
            "started session {} ({}) in {}",
            id,
            params.command,
            session.repo_path.display()
        );
        Ok(session.summary())
    }

    /// Opens the PTY, spawns the agent process into it, and wires up the
    /// reader thread plus the output pump and exit watcher tasks. Also used
    /// for the in-place respawn after a failed resume.
    fn spawn_into(&self, session: &Arc<Session>) -> Result<(), AgentportError> {
        let spec = session.spec.lock().unwrap().clone();
        let pty = native_pty_system();
        let pair = pty
            .openpty(PtySize {
                rows: spec.rows,
                cols: spec.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| AgentportError::spawn(&spec.command, e))?;

        let mut cmd = CommandBuilder::new(&spec.command);
        if spec.resume {
            cmd.arg(CONTINUE_FLAG);
        }
        for arg in &spec.args {
            cmd.arg(arg);
        }
        cmd.cwd(&spec.cwd);
        cmd.env("TERM", "xterm-256color");
        // Agent CLIs refuse to start when they think they are nested inside
        // another agent session.
        cmd.env_remove("CLAUDECODE");

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| AgentportError::spawn(&spec.command, e))?;
        drop(pair.slave);

        let killer = child.clone_killer();
        let pid = child.process_id();
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| AgentportError::spawn(&spec.command, e))?;
        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| AgentportError::spawn(&spec.command, e))?;
        *session.io.lock().unwrap() = Some(ProcIo {
            writer,
            master: pair.master,
            killer,
            pid,
        });

        let (tx, rx) = mpsc::unbounded_channel::<Bytes>();
        std::thread::spawn(move || {
            let mut reader = reader;
            let mut buf = [0u8; READ_BUF_SIZE];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if tx.send(Bytes::copy_from_slice(&buf[..n])).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        let pump_mgr = self.clone();
        let pump_session = Arc::clone(session);
        tokio::spawn(async move {
            pump_mgr.pump_output(pump_session, rx).await;
        });

        let wait_mgr = self.clone();
        let wait_session = Arc::clone(session);
        let spawned_at = Instant::now();
        tokio::spawn(async move {
            let clean = tokio::task::spawn_blocking(move || child.wait())
                .await
                .ok()
                .and_then(|r| r.ok())
                .map(|status| status.success())
                .unwrap_or(false);
            wait_mgr.handle_exit(wait_session, clean, spawned_at).await;
        });

        Ok(())
    }

    /// Drains PTY output into scrollback and the live broadcast, tracking
    /// idleness with an edge-triggered 5s silence timer and coalescing
    /// metadata flushes so a chatty agent does not hammer the disk.
    async fn pump_output(&self, session: Arc<Session>, mut rx: mpsc::UnboundedReceiver<Bytes>) {
        let mut idle_deadline = Some(tokio::time::Instant::now() + self.inner.idle_timeout);
        let mut flush_deadline: Option<tokio::time::Instant> = None;
        loop {
            tokio::select! {
                chunk = rx.recv() => match chunk {
                    Some(data) => {
                        self.record_output(&session, data);
                        idle_deadline =
                            Some(tokio::time::Instant::now() + self.inner.idle_timeout);
                        if session.persist_meta && flush_deadline.is_none() {
                            flush_deadline =
                                Some(tokio::time::Instant::now() + self.inner.flush_interval);
                        }
                    }
                    None => break,
                },
                _ = deadline(idle_deadline) => {
                    idle_deadline = None;
                    let changed = {
                        let mut state = session.state.lock().unwrap();
                        let changed = !state.idle;
                        state.idle = true;
                        changed
                    };
                    if changed {
                        self.inner.events.emit(AppEvent::SessionIdleChanged {
                            session_id: session.id.clone(),
                            idle: true,
                        });
                    }
                }
                _ = deadline(flush_deadline) => {
                    flush_deadline = None;
                    self.flush_meta(&session);
                }
            }
        }
    }

    fn record_output(&self, session: &Arc<Session>, data: Bytes) {
        let became_active = {
            let mut state = session.state.lock().unwrap();
            state.last_activity = Utc::now();
            let was_idle = state.idle;
            state.idle = false;
            was_idle
        };
        if became_active {
            self.inner.events.emit(AppEvent::SessionIdleChanged {
                session_id: session.id.clone(),
                idle: false,
            });
        }
        // Push and broadcast under the scrollback lock so an attaching
        // socket sees every chunk exactly once.
        let mut scrollback = session.scrollback.lock().unwrap();
        scrollback.push(data.clone());
        let _ = session.output_tx.send(data);
    }

    async fn handle_exit(&self, session: Arc<Session>, clean: bool, spawned_at: Instant) {
        let still_live = self
            .inner
            .sessions
            .get(&session.id)
            .map(|entry| Arc::ptr_eq(entry.value(), &session))
            .unwrap_or(false);
        let was_resume = session.spec.lock().unwrap().resume;
        let failed_fast = !clean && spawned_at.elapsed() < self.inner.retry_window;

        if still_live
            && was_resume
            && failed_fast
            && session.can_retry.swap(false, Ordering::SeqCst)
        {
            log::info!(
                "session {} died right after resume, retrying a fresh start",
                session.id
            );
            session.spec.lock().unwrap().resume = false;
            session.scrollback.lock().unwrap().clear();
            session.io.lock().unwrap().take();
            match self.spawn_into(&session) {
                Ok(()) => return,
                Err(e) => log::error!("session {} retry failed: {e}", session.id),
            }
        }

        // Killed sessions flushed their metadata in kill(); writing again
        // here would race with a worktree deletion that follows the kill.
        if still_live && session.persist_meta {
            self.flush_meta(&session);
        }
        self.inner
            .sessions
            .remove_if(&session.id, |_, v| Arc::ptr_eq(v, &session));
        session.io.lock().unwrap().take();
        let _ = session.exit_tx.send(true);
        let tmp = session_temp_dir(&session.id);
        if tmp.exists() {
            let _ = std::fs::remove_dir_all(&tmp);
        }
        log::info!("session {} ended", session.id);
    }

    fn flush_meta(&self, session: &Arc<Session>) {
        if let Err(e) = self.inner.meta.write(&session.metadata()) {
            log::warn!(
                "failed writing metadata for {}: {e}",
                session.repo_path.display()
            );
        }
    }

    /// Deregisters the session immediately so listings and conflict checks
    /// stop seeing it, then signals the process. Final cleanup happens when
    /// the exit watcher observes the process die.
    pub fn kill(&self, id: &str) -> Result<(), AgentportError> {
        let (_, session) =
            self.inner
                .sessions
                .remove(id)
                .ok_or_else(|| AgentportError::SessionNotFound {
                    session_id: id.to_string(),
                })?;
        session.can_retry.store(false, Ordering::SeqCst);
        if let Some(io) = session.io.lock().unwrap().as_mut() {
            let _ = io.killer.kill();
        }
        // The exit watcher skips its flush for deregistered sessions, so the
        // final activity timestamp is written here, before kill() returns.
        if session.persist_meta {
            self.flush_meta(&session);
        }
        log::info!("killed session {id}");
        Ok(())
    }

    pub fn write_input(&self, id: &str, data: &[u8]) -> Result<(), AgentportError> {
        let session = self.get(id)?;
        let mut io = session.io.lock().unwrap();
        let io = io.as_mut().ok_or_else(|| {
            AgentportError::io("write", id, "session has no running process")
        })?;
        io.writer
            .write_all(data)
            .and_then(|_| io.writer.flush())
            .map_err(|e| AgentportError::io("write", id, e))
    }

    pub fn resize(&self, id: &str, cols: u16, rows: u16) -> Result<(), AgentportError> {
        let session = self.get(id)?;
        {
            let mut spec = session.spec.lock().unwrap();
            spec.cols = cols;
            spec.rows = rows;
        }
        let mut io = session.io.lock().unwrap();
        let io = io.as_mut().ok_or_else(|| {
            AgentportError::io("resize", id, "session has no running process")
        })?;
        io.master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| AgentportError::io("resize", id, e))
    }

    pub fn update_display_name(&self, id: &str, name: &str) -> Result<(), AgentportError> {
        let session = self.get(id)?;
        session.state.lock().unwrap().display_name = name.to_string();
        if session.persist_meta {
            self.flush_meta(&session);
        }
        Ok(())
    }

    pub fn attach(&self, id: &str) -> Result<SessionAttachment, AgentportError> {
        let session = self.get(id)?;
        let scrollback = session.scrollback.lock().unwrap();
        let output = session.output_tx.subscribe();
        let snapshot = scrollback.snapshot();
        drop(scrollback);
        Ok(SessionAttachment {
            scrollback: snapshot,
            output,
            exited: session.exit_tx.subscribe(),
        })
    }

    pub fn get(&self, id: &str) -> Result<Arc<Session>, AgentportError> {
        self.inner
            .sessions
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| AgentportError::SessionNotFound {
                session_id: id.to_string(),
            })
    }

    pub fn list(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> = self
            .inner
            .sessions
            .iter()
            .map(|entry| entry.value().summary())
            .collect();
        summaries.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        summaries
    }

    pub fn find_repo_session(&self, repo_path: &Path) -> Option<SessionSummary> {
        self.inner
            .sessions
            .iter()
            .find(|entry| {
                entry.value().kind == SessionKind::Repo && entry.value().repo_path == repo_path
            })
            .map(|entry| entry.value().summary())
    }

    pub fn find_by_worktree(&self, worktree_path: &Path) -> Option<SessionSummary> {
        self.inner
            .sessions
            .iter()
            .find(|entry| {
                entry.value().kind == SessionKind::Worktree
                    && entry.value().repo_path == worktree_path
            })
            .map(|entry| entry.value().summary())
    }
}

async fn deadline(at: Option<tokio::time::Instant>) {
    match at {
        Some(instant) => tokio::time::sleep_until(instant).await,
        None => std::future::pending().await,
    }
}

pub fn session_temp_dir(id: &str) -> PathBuf {
    std::env::temp_dir().join("agentport").join(id)
}

fn random_hex(bytes: usize) -> Result<String, AgentportError> {
    let mut buf = vec![0u8; bytes];
    getrandom::fill(&mut buf).map_err(|e| AgentportError::io("random", "urandom", e))?;
    Ok(buf.iter().map(|b| format!("{b:02x}")).collect())
}
