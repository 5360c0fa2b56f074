//! Command backend shared by the maintenance units
//!
//! Units describe system access as argv templates (`["sysctl", "-n", "{key}"]`)
//! taken from their config table, falling back to a platform default. The
//! [`CommandRunner`] trait lets tests replace the real processes.

use crate::runner::{self, Captured};
use reconcile::{ApplyItemError, AuditError, UnitConfig};
use session::Component;
use std::io;
use thiserror::Error;

/// Errors raised while preparing or running a unit command
#[derive(Debug, Error)]
pub enum BackendError {
    /// Config value has the wrong shape
    #[error(transparent)]
    Config(#[from] reconcile::ConfigValueError),

    /// No command configured and no default for this platform
    #[error("no '{key}' configured and no default exists for this platform")]
    MissingCommand { key: &'static str },

    /// The process could not be started
    #[error("failed to execute {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The process exited with a failure status
    #[error("{program} failed: {message}")]
    Failed {
        program: String,
        message: String,
        stderr: String,
    },
}

impl BackendError {
    pub fn into_audit(self, component: Component) -> AuditError {
        match self {
            BackendError::Config(e) => AuditError::Config(e),
            BackendError::MissingCommand { .. } => AuditError::NotConfigured {
                component,
                message: self.to_string(),
            },
            other => AuditError::Failed {
                component,
                message: other.to_string(),
            },
        }
    }

    pub fn into_apply(self, key: &str) -> ApplyItemError {
        match self {
            BackendError::Failed {
                program,
                message,
                stderr,
            } => ApplyItemError::Command {
                key: key.to_string(),
                message: format!("{program} failed: {message}"),
                stderr,
            },
            other => ApplyItemError::Failed {
                key: key.to_string(),
                message: other.to_string(),
            },
        }
    }
}

/// Runs external commands
pub trait CommandRunner: Send + Sync {
    fn run(&self, argv: &[String]) -> io::Result<Captured>;
}

/// Runner that spawns real processes
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, argv: &[String]) -> io::Result<Captured> {
        runner::run_capture(argv)
    }
}

/// An argv with `{placeholder}` segments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    argv: Vec<String>,
}

impl CommandTemplate {
    pub fn new<S: Into<String>>(argv: impl IntoIterator<Item = S>) -> Self {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
        }
    }

    /// Template from config key `key`, else `default`
    pub fn from_config(
        config: &UnitConfig,
        key: &'static str,
        default: Option<&[&str]>,
    ) -> Result<Self, BackendError> {
        let configured = config.string_list(key)?;
        if !configured.is_empty() {
            return Ok(Self::new(configured));
        }
        default
            .map(|argv| Self::new(argv.iter().copied()))
            .ok_or(BackendError::MissingCommand { key })
    }

    /// PowerShell templates embed values in single-quoted strings
    fn is_powershell(&self) -> bool {
        let Some(program) = self.argv.first() else {
            return false;
        };
        // Windows paths are recognised on every platform
        let name = program.rsplit(['/', '\\']).next().unwrap_or(program).to_ascii_lowercase();
        let stem = name.strip_suffix(".exe").unwrap_or(&name);
        stem == "powershell" || stem == "pwsh"
    }

    /// Substitute `{name}` placeholders in every argument
    pub fn render(&self, vars: &[(&str, &str)]) -> Vec<String> {
        let quote = self.is_powershell();
        self.argv
            .iter()
            .map(|arg| {
                vars.iter().fold(arg.clone(), |acc, (name, value)| {
                    let value = if quote { ps_quote(value) } else { (*value).to_string() };
                    acc.replace(&format!("{{{name}}}"), &value)
                })
            })
            .collect()
    }

    /// Render, run and require success; returns stdout
    pub fn run(&self, runner: &dyn CommandRunner, vars: &[(&str, &str)]) -> Result<Captured, BackendError> {
        let argv = self.render(vars);
        let program = argv.first().cloned().unwrap_or_default();
        let captured = runner.run(&argv).map_err(|source| BackendError::Spawn {
            program: program.clone(),
            source,
        })?;
        if captured.success {
            Ok(captured)
        } else {
            Err(BackendError::Failed {
                program,
                message: captured.failure_message(),
                stderr: captured.stderr,
            })
        }
    }
}

/// Quote a value for a single-quoted PowerShell string
fn ps_quote(value: &str) -> String {
    value.replace('\'', "''")
}

#[cfg(test)]
pub mod testing {
    //! Scripted runner for unit tests

    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Returns canned output keyed by the rendered command line
    #[derive(Default)]
    pub struct ScriptedRunner {
        responses: Mutex<HashMap<String, Captured>>,
        pub calls: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        pub fn respond(self, command: &str, stdout: &str) -> Self {
            self.responses.lock().unwrap().insert(
                command.to_string(),
                Captured {
                    stdout: stdout.to_string(),
                    success: true,
                    code: Some(0),
                    ..Default::default()
                },
            );
            self
        }

        pub fn fail(self, command: &str, stderr: &str) -> Self {
            self.responses.lock().unwrap().insert(
                command.to_string(),
                Captured {
                    stderr: stderr.to_string(),
                    success: false,
                    code: Some(1),
                    ..Default::default()
                },
            );
            self
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run(&self, argv: &[String]) -> io::Result<Captured> {
            let line = argv.join(" ");
            self.calls.lock().unwrap().push(line.clone());
            self.responses
                .lock()
                .unwrap()
                .get(&line)
                .cloned()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("unscripted: {line}")))
        }
    }
}
