//! Volume Shadow Copy backend using `vssadmin` and PowerShell.

use crate::backend::RestoreBackend;
use crate::error::{Error, Result};
use crate::types::RestoreCheckpoint;
use chrono::Utc;
use regex::Regex;
use std::process::{Command, Output};
use std::sync::LazyLock;

const KIB: f64 = 1024.0;

static MAX_SPACE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)maximum shadow copy storage space:\s*(?:(unbounded)|([\d.,]+)\s*(bytes|kb|mb|gb|tb|pb))").ok()
});

/// Backend that executes `vssadmin` and `Checkpoint-Computer`.
pub struct VssBackend {
    vssadmin: String,
    powershell: String,
}

impl Default for VssBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl VssBackend {
    pub fn new() -> Self {
        Self {
            vssadmin: "vssadmin".to_string(),
            powershell: "powershell".to_string(),
        }
    }

    fn run(&self, program: &str, args: &[&str]) -> Result<Output> {
        log::debug!("Running {} {}", program, args.join(" "));
        Command::new(program).args(args).output().map_err(|e| Error::Command {
            message: format!("failed to execute {program}: {e}"),
            stderr: String::new(),
        })
    }
}

impl RestoreBackend for VssBackend {
    fn allocated_bytes(&self, drive: &str) -> Result<u64> {
        let target = format!("/for={drive}");
        let output = self.run(&self.vssadmin, &["list", "shadowstorage", &target])?;
        let stdout = String::from_utf8_lossy(&output.stdout);

        if output.status.success() {
            return parse_max_space(&stdout).ok_or_else(|| Error::Query {
                drive: drive.to_string(),
                message: "unrecognized vssadmin output".to_string(),
            });
        }

        // vssadmin prints this (exit code 1) when no association exists
        if stdout.to_lowercase().contains("no items found") {
            return Ok(0);
        }
        Err(Error::Query {
            drive: drive.to_string(),
            message: command_message(&output),
        })
    }

    fn allocate(&self, drive: &str, bytes: u64) -> Result<()> {
        let args = [
            "resize".to_string(),
            "shadowstorage".to_string(),
            format!("/for={drive}"),
            format!("/on={drive}"),
            format!("/maxsize={}MB", bytes.div_ceil(1024 * 1024)),
        ];
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.run(&self.vssadmin, &args)?;
        if output.status.success() {
            return Ok(());
        }
        Err(Error::Allocation {
            drive: drive.to_string(),
            requested: bytes,
            message: command_message(&output),
        })
    }

    fn create_checkpoint(&self, drive: &str, description: &str) -> Result<RestoreCheckpoint> {
        let script = format!(
            "Checkpoint-Computer -Description '{}' -RestorePointType 'MODIFY_SETTINGS' -ErrorAction Stop",
            description.replace('\'', "''")
        );
        let output = self.run(&self.powershell, &["-NoProfile", "-NonInteractive", "-Command", &script])?;
        if !output.status.success() {
            return Err(Error::Checkpoint {
                message: command_message(&output),
            });
        }

        Ok(RestoreCheckpoint {
            drive_letter: drive.to_string(),
            allocated_bytes: self.allocated_bytes(drive)?,
            created_at: Utc::now(),
            description: description.to_string(),
        })
    }
}

/// Parse the maximum allocation from `vssadmin list shadowstorage` output.
///
/// `UNBOUNDED` maps to `u64::MAX`. Sizes use binary multiples.
pub fn parse_max_space(output: &str) -> Option<u64> {
    let re = MAX_SPACE.as_ref()?;
    let caps = re.captures(output)?;
    if caps.get(1).is_some() {
        return Some(u64::MAX);
    }

    let number: f64 = caps.get(2)?.as_str().replace(',', ".").parse().ok()?;
    let exponent = match caps.get(3)?.as_str().to_lowercase().as_str() {
        "bytes" => 0,
        "kb" => 1,
        "mb" => 2,
        "gb" => 3,
        "tb" => 4,
        _ => 5,
    };
    Some((number * KIB.powi(exponent)).round() as u64)
}

fn command_message(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    // vssadmin reports errors on stdout
    let text = if stderr.trim().is_empty() { stdout } else { stderr };
    let text = text.trim();
    if text.is_empty() {
        format!("exited with {}", output.status)
    } else {
        text.lines()
            .filter(|l| !l.trim().is_empty() && !l.starts_with("vssadmin "))
            .collect::<Vec<_>>()
            .join(" ")
    }
}
