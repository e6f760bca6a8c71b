//! Terminal session manager.
//!
//! A session is a multiplexer window rooted at a working directory whose pane
//! output is piped into a log file. One tailing thread per session reads that
//! file and appends to an [`OutputBuffer`]; tools drain the buffer after each
//! command. The [`Multiplexer`] trait keeps tmux out of tests.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, anyhow};
use tempfile::NamedTempFile;
use tracing::{debug, error, info, instrument, warn};

use crate::core::naming::{derive_session_name, service_session_name};
use crate::io::config::{TerminalConfig, TypingMode};
use crate::io::process::run_command_with_timeout;

/// Keys delivered to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keys<'a> {
    /// Text typed verbatim.
    Literal(&'a str),
    Enter,
}

/// Terminal multiplexer operations used by the session manager.
pub trait Multiplexer {
    fn new_session(&self, name: &str, workdir: &Path) -> Result<()>;
    /// Append everything the session prints to `log_path`.
    fn pipe_output(&self, name: &str, log_path: &Path) -> Result<()>;
    fn send_keys(&self, name: &str, keys: Keys<'_>) -> Result<()>;
    fn has_session(&self, name: &str) -> Result<bool>;
    fn kill_session(&self, name: &str) -> Result<()>;
}

/// Multiplexer backed by the `tmux` CLI.
#[derive(Debug, Clone)]
pub struct Tmux {
    timeout: Duration,
}

impl Default for Tmux {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
        }
    }
}

impl Tmux {
    fn run(&self, args: &[&str]) -> Result<bool> {
        let mut cmd = Command::new("tmux");
        cmd.args(args);
        let output = run_command_with_timeout(cmd, None, self.timeout, 64 * 1024)
            .with_context(|| format!("tmux {}", args.first().copied().unwrap_or_default()))?;
        if output.timed_out {
            return Err(anyhow!("tmux {} timed out", args.join(" ")));
        }
        if !output.status.success() {
            debug!(
                args = ?args,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "tmux returned non-zero"
            );
        }
        Ok(output.status.success())
    }

    fn run_checked(&self, args: &[&str]) -> Result<()> {
        if self.run(args)? {
            Ok(())
        } else {
            Err(anyhow!("tmux {} failed", args.first().copied().unwrap_or_default()))
        }
    }
}

/// Session target matching `name` exactly instead of by prefix.
fn exact(name: &str) -> String {
    format!("={name}")
}

/// tmux parses an argument ending in `;` as a command separator unless escaped.
fn escape_trailing_semicolon(keys: &str) -> String {
    match keys.strip_suffix(';') {
        Some(head) => format!("{head}\\;"),
        None => keys.to_string(),
    }
}

/// `send-keys` arguments typing `text` verbatim; `--` keeps a leading `-` from reading as a flag.
fn literal_keys_args(name: &str, text: &str) -> Vec<String> {
    ["send-keys", "-t", name, "-l", "--"]
        .iter()
        .map(|arg| (*arg).to_string())
        .chain(std::iter::once(escape_trailing_semicolon(text)))
        .collect()
}

impl Multiplexer for Tmux {
    fn new_session(&self, name: &str, workdir: &Path) -> Result<()> {
        let dir = workdir.to_string_lossy();
        self.run_checked(&["new-session", "-d", "-s", name, "-c", &dir])
    }

    fn pipe_output(&self, name: &str, log_path: &Path) -> Result<()> {
        let quoted = log_path.to_string_lossy().replace('\'', "'\\''");
        let pipe = format!("cat >> '{quoted}'");
        self.run_checked(&["pipe-pane", "-t", name, &pipe])
    }

    fn send_keys(&self, name: &str, keys: Keys<'_>) -> Result<()> {
        match keys {
            Keys::Literal(text) => {
                let args = literal_keys_args(name, text);
                let args: Vec<&str> = args.iter().map(String::as_str).collect();
                self.run_checked(&args)
            }
            Keys::Enter => self.run_checked(&["send-keys", "-t", name, "C-m"]),
        }
    }

    fn has_session(&self, name: &str) -> Result<bool> {
        self.run(&["has-session", "-t", &exact(name)])
    }

    fn kill_session(&self, name: &str) -> Result<()> {
        self.run_checked(&["kill-session", "-t", &exact(name)])
    }
}

/// Append-only chunk list shared by a tailing thread and its readers.
#[derive(Debug, Default)]
pub struct OutputBuffer {
    chunks: Mutex<Vec<String>>,
}

impl OutputBuffer {
    fn lock(&self) -> MutexGuard<'_, Vec<String>> {
        self.chunks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, chunk: String) {
        if !chunk.is_empty() {
            self.lock().push(chunk);
        }
    }

    /// Concatenate and clear under one lock.
    pub fn drain(&self) -> String {
        std::mem::take(&mut *self.lock()).concat()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Background thread copying a log file into an [`OutputBuffer`].
struct Tailer {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Tailer {
    fn spawn(path: PathBuf, buffer: Arc<OutputBuffer>, poll: Duration) -> Result<Self> {
        let file = File::open(&path).with_context(|| format!("open log {}", path.display()))?;
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("steprunner-tail".to_string())
            .spawn(move || tail_loop(BufReader::new(file), &buffer, &flag, poll))
            .context("spawn tail thread")?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }
}

impl Drop for Tailer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            error!("tail thread panicked");
        }
    }
}

fn tail_loop(mut reader: BufReader<File>, buffer: &OutputBuffer, stop: &AtomicBool, poll: Duration) {
    let mut pending: Vec<u8> = Vec::new();
    loop {
        let stopping = stop.load(Ordering::SeqCst);
        match reader.read_until(b'\n', &mut pending) {
            Ok(0) => {
                flush_complete_utf8(&mut pending, buffer, stopping);
                if stopping {
                    return;
                }
                thread::sleep(poll);
            }
            Ok(_) => {
                if pending.ends_with(b"\n") {
                    buffer.push(String::from_utf8_lossy(&pending).into_owned());
                    pending.clear();
                }
            }
            Err(err) => {
                warn!(err = %err, "log read failed");
                if stopping {
                    return;
                }
                thread::sleep(poll);
            }
        }
    }
}

/// Push the decodable prefix of `pending`, keeping a split multi-byte character for later.
fn flush_complete_utf8(pending: &mut Vec<u8>, buffer: &OutputBuffer, force: bool) {
    if pending.is_empty() {
        return;
    }
    let keep_from = match std::str::from_utf8(pending) {
        Ok(_) => pending.len(),
        Err(e) if e.error_len().is_none() && !force => e.valid_up_to(),
        Err(_) => pending.len(),
    };
    let ready: Vec<u8> = pending.drain(..keep_from).collect();
    buffer.push(String::from_utf8_lossy(&ready).into_owned());
}

struct SessionEntry {
    workdir: PathBuf,
    buffer: Arc<OutputBuffer>,
    // Dropped before `_log` so the thread stops before the file goes away.
    _tailer: Tailer,
    _log: NamedTempFile,
}

/// Registry of live sessions for one run.
pub struct SessionManager {
    mux: Arc<dyn Multiplexer>,
    cfg: TerminalConfig,
    sessions: Mutex<HashMap<String, SessionEntry>>,
}

impl SessionManager {
    pub fn new(mux: Arc<dyn Multiplexer>, cfg: TerminalConfig) -> Self {
        Self {
            mux,
            cfg,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<String, SessionEntry>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start (or re-attach to) a session and begin tailing its output.
    ///
    /// An empty or missing `name` derives one from `project` and the clock.
    #[instrument(skip_all, fields(name = ?name, project = %project, workdir = %workdir.display()))]
    pub fn start_session(
        &self,
        name: Option<&str>,
        project: &str,
        workdir: &Path,
    ) -> Result<(PathBuf, String)> {
        let name = match name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) => name.to_string(),
            None => derive_session_name(project, unix_secs()),
        };
        if let Some(entry) = self.registry().get(&name) {
            debug!(session = %name, "session already registered");
            return Ok((entry.workdir.clone(), name));
        }

        if self.mux.has_session(&name)? {
            info!(session = %name, "re-attaching to existing session");
        } else {
            self.mux
                .new_session(&name, workdir)
                .with_context(|| format!("create session {name}"))?;
            info!(session = %name, "created session");
        }

        let log_dir = self.cfg.resolved_log_dir();
        std::fs::create_dir_all(&log_dir)
            .with_context(|| format!("create log dir {}", log_dir.display()))?;
        let log = tempfile::Builder::new()
            .prefix(&format!("{name}-"))
            .suffix(".log")
            .tempfile_in(&log_dir)
            .with_context(|| format!("create session log in {}", log_dir.display()))?;
        self.mux
            .pipe_output(&name, log.path())
            .with_context(|| format!("pipe output of session {name}"))?;

        let buffer = Arc::new(OutputBuffer::default());
        let tailer = Tailer::spawn(
            log.path().to_path_buf(),
            Arc::clone(&buffer),
            Duration::from_millis(self.cfg.tail_poll_interval_ms),
        )?;
        self.registry().insert(
            name.clone(),
            SessionEntry {
                workdir: workdir.to_path_buf(),
                buffer,
                _tailer: tailer,
                _log: log,
            },
        );
        Ok((workdir.to_path_buf(), name))
    }

    /// Type `command` into the session and press Enter.
    ///
    /// Transport failures are logged, not raised; the return value reports delivery.
    #[instrument(skip_all, fields(session = name, typing = ?self.cfg.typing))]
    pub fn send_command(&self, name: &str, command: &str) -> bool {
        match self.try_send(name, command) {
            Ok(()) => true,
            Err(err) => {
                error!(err = %format!("{err:#}"), "failed to send command");
                false
            }
        }
    }

    fn try_send(&self, name: &str, command: &str) -> Result<()> {
        if !self.registry().contains_key(name) {
            return Err(anyhow!("unknown session {name}"));
        }
        match self.cfg.typing {
            TypingMode::PerCharacter => {
                let delay = Duration::from_millis(self.cfg.inter_char_delay_ms);
                let mut buf = [0u8; 4];
                for ch in command.chars() {
                    self.mux
                        .send_keys(name, Keys::Literal(ch.encode_utf8(&mut buf)))?;
                    thread::sleep(delay);
                }
            }
            TypingMode::Atomic => {
                if !command.is_empty() {
                    self.mux.send_keys(name, Keys::Literal(command))?;
                }
            }
        }
        self.mux.send_keys(name, Keys::Enter)
    }

    /// Everything tailed since the previous drain. Unknown sessions yield "".
    pub fn drain_output(&self, name: &str) -> String {
        let buffer = self.registry().get(name).map(|e| Arc::clone(&e.buffer));
        buffer.map(|b| b.drain()).unwrap_or_default()
    }

    /// Fixed wait between sending a command and reading its output.
    pub fn settle(&self) {
        thread::sleep(Duration::from_millis(self.cfg.settle_delay_ms));
    }

    /// Tear a session down. Returns `false` without side effects if it does not exist.
    #[instrument(skip_all, fields(session = name))]
    pub fn kill_session(&self, name: &str) -> Result<bool> {
        if !self.mux.has_session(name)? {
            self.registry().remove(name);
            debug!("session not found");
            return Ok(false);
        }
        self.mux.kill_session(name)?;
        self.registry().remove(name);
        info!("killed session");
        Ok(true)
    }

    /// Start a dedicated session for a long-running process and launch `command` in it.
    #[instrument(skip_all, fields(primary = %primary, suffix = ?suffix))]
    pub fn start_service(
        &self,
        primary: &str,
        suffix: Option<&str>,
        workdir: &Path,
        command: &str,
    ) -> Result<String> {
        let name = service_session_name(primary, suffix);
        let (_, name) = self.start_session(Some(&name), primary, workdir)?;
        if !self.send_command(&name, command) {
            return Err(anyhow!("failed to start `{command}` in session {name}"));
        }
        Ok(name)
    }

    /// Whether the multiplexer still knows a session called `name`.
    pub fn session_exists(&self, name: &str) -> Result<bool> {
        self.mux.has_session(name)
    }

    /// Stop all tailing threads; multiplexer sessions stay alive.
    pub fn shutdown(&self) {
        let drained: Vec<_> = self.registry().drain().collect();
        debug!(sessions = drained.len(), "stopping tailers");
    }
}

fn unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
