//! Append-only, leveled, component-tagged JSON-lines logger.
//!
//! Every entry is one JSON object on its own line so the log processor can
//! rebuild structure from the file alone. Entries written by maintenance
//! units are also appended to that unit's own `execution.log`.
//!
//! When a file sink cannot be opened or written, the entry goes to the
//! fallback writer (stderr unless overridden) and a single WARNING about
//! the redirect is emitted for the lifetime of the logger.

use crate::component::Component;
use crate::session::{Category, Session};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Maximum length of the Debug summary stored when data cannot be serialized
const SUMMARY_LIMIT: usize = 256;

/// Severity of a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Level {
    Debug,
    Info,
    Success,
    Warning,
    Error,
    Fatal,
}

impl Level {
    pub const ALL: [Level; 6] = [
        Level::Debug,
        Level::Info,
        Level::Success,
        Level::Warning,
        Level::Error,
        Level::Fatal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Success => "SUCCESS",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Fatal => "FATAL",
        }
    }

    /// ERROR and FATAL
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error | Self::Fatal)
    }

    fn facade_level(self) -> log::Level {
        match self {
            Self::Debug => log::Level::Debug,
            Self::Info | Self::Success => log::Level::Info,
            Self::Warning => log::Level::Warn,
            Self::Error | Self::Fatal => log::Level::Error,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|l| l.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown log level '{s}'"))
    }
}

/// A single structured log line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: Level,
    pub component: Component,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
}

impl LogEntry {
    pub fn new(level: Level, component: Component, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            component,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = Some(data);
        self
    }

    /// Encode as a single line (no trailing newline)
    pub fn to_line(&self) -> String {
        // An entry holds only strings, enums and JSON values, so this
        // cannot fail; keep a readable line if it ever does.
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(
                "{{\"timestamp\":\"{}\",\"level\":\"{}\",\"component\":\"{}\",\"message\":\"unencodable entry: {}\"}}",
                self.timestamp.to_rfc3339(),
                self.level,
                self.component,
                e
            )
        })
    }

    /// Decode one line written by [`LogEntry::to_line`]
    pub fn parse_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }
}

/// A file-backed sink that degrades to `Broken` after the first failure
enum Sink {
    Open { path: PathBuf, file: File },
    Broken { path: PathBuf },
}

impl Sink {
    fn open(path: &Path) -> (Self, Option<io::Error>) {
        let opened = path
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|()| OpenOptions::new().create(true).append(true).open(path));

        match opened {
            Ok(file) => (
                Self::Open {
                    path: path.to_path_buf(),
                    file,
                },
                None,
            ),
            Err(e) => (
                Self::Broken {
                    path: path.to_path_buf(),
                },
                Some(e),
            ),
        }
    }

    /// Append a line; on failure the sink becomes `Broken` and the error is returned.
    fn append(&mut self, line: &str) -> Result<(), (PathBuf, Option<io::Error>)> {
        match self {
            Self::Open { path, file } => {
                let result = file
                    .write_all(line.as_bytes())
                    .and_then(|()| file.write_all(b"\n"))
                    .and_then(|()| file.flush());
                if let Err(e) = result {
                    let path = path.clone();
                    *self = Self::Broken { path: path.clone() };
                    return Err((path, Some(e)));
                }
                Ok(())
            }
            Self::Broken { path } => Err((path.clone(), None)),
        }
    }
}

struct SinkState {
    primary: Sink,
    component_root: Option<PathBuf>,
    components: HashMap<Component, Sink>,
    fallback: Box<dyn Write + Send>,
}

impl SinkState {
    fn component_sink(&mut self, component: Component) -> Option<&mut Sink> {
        let root = self.component_root.as_ref()?;
        let sink = self.components.entry(component).or_insert_with(|| {
            let path = root.join(component.slug()).join("execution.log");
            Sink::open(&path).0
        });
        Some(sink)
    }

    fn write_fallback(&mut self, line: &str) {
        // Nothing sensible left to do if stderr itself fails.
        let _ = writeln!(self.fallback, "{line}");
        let _ = self.fallback.flush();
    }
}

/// Structured session logger; cheap to share behind an `Arc`.
pub struct Logger {
    path: PathBuf,
    state: Mutex<SinkState>,
    redirect_warned: AtomicBool,
    mirror: bool,
}

impl Logger {
    /// Open a logger writing to `path`. Never fails; see module docs.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (primary, err) = Sink::open(&path);
        if let Some(err) = err {
            log::debug!("Primary log sink {} unavailable: {}", path.display(), err);
        }

        Self {
            path,
            state: Mutex::new(SinkState {
                primary,
                component_root: None,
                components: HashMap::new(),
                fallback: Box::new(io::stderr()),
            }),
            redirect_warned: AtomicBool::new(false),
            mirror: true,
        }
    }

    /// Logger for a session: `logs/maintenance.log` plus `logs/<unit>/execution.log`.
    pub fn for_session(session: &Session) -> Self {
        let logs = session.dir(Category::Logs);
        let logger = Self::open(logs.join("maintenance.log"));
        logger.lock().component_root = Some(logs);
        logger
    }

    /// Replace the fallback writer (stderr by default)
    pub fn with_fallback(self, fallback: Box<dyn Write + Send>) -> Self {
        self.lock().fallback = fallback;
        self
    }

    /// Enable or disable mirroring into the `log` facade
    pub fn with_mirror(mut self, mirror: bool) -> Self {
        self.mirror = mirror;
        self
    }

    /// Path of the consolidated log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of a unit's own execution log, if per-component logs are enabled
    pub fn component_log_path(&self, component: Component) -> Option<PathBuf> {
        self.lock()
            .component_root
            .as_ref()
            .map(|root| root.join(component.slug()).join("execution.log"))
    }

    /// Whether any entry has been redirected to the fallback sink
    pub fn is_degraded(&self) -> bool {
        self.redirect_warned.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, SinkState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Append an entry
    pub fn log(&self, entry: LogEntry) {
        if self.mirror {
            log::log!(
                target: entry.component.slug(),
                entry.level.facade_level(),
                "[{}] {}",
                entry.component,
                entry.message
            );
        }

        let line = entry.to_line();
        let mut state = self.lock();

        let mut failure = state.primary.append(&line).err();
        if entry.component.is_unit()
            && let Some(sink) = state.component_sink(entry.component)
            && let Err(err) = sink.append(&line)
        {
            failure.get_or_insert(err);
        }

        let Some((path, cause)) = failure else {
            return;
        };

        if !self.redirect_warned.swap(true, Ordering::SeqCst) {
            let reason = cause.map_or_else(|| "sink unavailable".to_string(), |e| e.to_string());
            let mut data = Map::new();
            data.insert("sink".into(), Value::String(path.display().to_string()));
            data.insert("error".into(), Value::String(reason));
            let warning = LogEntry::new(
                Level::Warning,
                Component::Logger,
                "log sink unavailable; redirecting entries to fallback sink",
            )
            .with_data(data);
            let warning_line = warning.to_line();
            // Keep the consolidated log complete when only a unit sink broke.
            let _ = state.primary.append(&warning_line);
            state.write_fallback(&warning_line);
        }

        state.write_fallback(&line);
    }

    /// Append an entry with structured context.
    ///
    /// Data that cannot be represented as JSON is replaced by a truncated
    /// Debug summary and a WARNING is logged about it.
    pub fn log_data<T>(&self, level: Level, component: Component, message: &str, data: &T)
    where
        T: Serialize + fmt::Debug + ?Sized,
    {
        let entry = LogEntry::new(level, component, message);
        match serde_json::to_value(data) {
            Ok(Value::Object(map)) => self.log(entry.with_data(map)),
            Ok(Value::Null) => self.log(entry),
            Ok(other) => {
                let mut map = Map::new();
                map.insert("value".into(), other);
                self.log(entry.with_data(map));
            }
            Err(err) => {
                let mut summary = format!("{data:?}");
                if summary.len() > SUMMARY_LIMIT {
                    let mut cut = SUMMARY_LIMIT;
                    while !summary.is_char_boundary(cut) {
                        cut -= 1;
                    }
                    summary.truncate(cut);
                    summary.push_str("...");
                }
                let mut map = Map::new();
                map.insert("summary".into(), Value::String(summary));
                self.log(entry.with_data(map));
                self.log(LogEntry::new(
                    Level::Warning,
                    Component::Logger,
                    format!("data for '{message}' was not serializable ({err}); stored a truncated summary"),
                ));
            }
        }
    }

    pub fn debug(&self, component: Component, message: impl Into<String>) {
        self.log(LogEntry::new(Level::Debug, component, message));
    }

    pub fn info(&self, component: Component, message: impl Into<String>) {
        self.log(LogEntry::new(Level::Info, component, message));
    }

    pub fn success(&self, component: Component, message: impl Into<String>) {
        self.log(LogEntry::new(Level::Success, component, message));
    }

    pub fn warning(&self, component: Component, message: impl Into<String>) {
        self.log(LogEntry::new(Level::Warning, component, message));
    }

    pub fn error(&self, component: Component, message: impl Into<String>) {
        self.log(LogEntry::new(Level::Error, component, message));
    }

    pub fn fatal(&self, component: Component, message: impl Into<String>) {
        self.log(LogEntry::new(Level::Fatal, component, message));
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("path", &self.path)
            .field("degraded", &self.is_degraded())
            .finish_non_exhaustive()
    }
}
