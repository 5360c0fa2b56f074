//! Session lifecycle: unique id, private directory tree, cleanup.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::fs;
use std::io::ErrorKind;
use std::path::{Component as PathComponent, Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

/// Fixed set of directories every session root contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Data,
    Logs,
    Reports,
    Temp,
    Inventory,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Data,
        Category::Logs,
        Category::Reports,
        Category::Temp,
        Category::Inventory,
    ];

    /// Directory name under the session root
    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::Data => "data",
            Self::Logs => "logs",
            Self::Reports => "reports",
            Self::Temp => "temp",
            Self::Inventory => "inventory",
        }
    }
}

impl FromStr for Category {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.dir_name() == s)
            .ok_or_else(|| Error::InvalidCategory(s.to_string()))
    }
}

/// Why a closed session kept its directory tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetainReason {
    /// Caller asked to keep artifacts (phase failure or explicit flag)
    Requested,
    /// The report was never confirmed at its external destination
    ReportNotExported,
}

/// Result of closing a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseOutcome {
    Removed,
    Retained { root: PathBuf, reason: RetainReason },
}

/// One isolated run: identity plus a private directory tree.
#[derive(Debug)]
pub struct Session {
    id: String,
    root: PathBuf,
    created_at: DateTime<Utc>,
    dry_run: bool,
    report_exported: AtomicBool,
}

impl Session {
    /// Open a new session under `base_dir` with a fresh collision-resistant id.
    pub fn open(base_dir: &Path, dry_run: bool) -> Result<Self> {
        let created_at = Utc::now();
        let id = generate_id(created_at);
        Self::open_with_id(base_dir, &id, created_at, dry_run)
    }

    /// Open a session with an explicit id.
    ///
    /// An existing root is reported as [`Error::SessionCollision`], never reused.
    pub fn open_with_id(
        base_dir: &Path,
        id: &str,
        created_at: DateTime<Utc>,
        dry_run: bool,
    ) -> Result<Self> {
        fs::create_dir_all(base_dir).map_err(|source| Error::SessionCreate {
            path: base_dir.to_path_buf(),
            source,
        })?;

        let root = base_dir.join(id);
        match fs::create_dir(&root) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(Error::SessionCollision(root));
            }
            Err(source) => return Err(Error::SessionCreate { path: root, source }),
        }

        for category in Category::ALL {
            let dir = root.join(category.dir_name());
            fs::create_dir(&dir).map_err(|source| Error::SessionCreate { path: dir, source })?;
        }

        log::debug!("Opened session {} at {}", id, root.display());

        Ok(Self {
            id: id.to_string(),
            root,
            created_at,
            dry_run,
            report_exported: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Directory for a category
    pub fn dir(&self, category: Category) -> PathBuf {
        self.root.join(category.dir_name())
    }

    /// Resolve `name` inside a category given by its directory name.
    pub fn resolve_path(&self, category: &str, name: &str) -> Result<PathBuf> {
        let category: Category = category.parse()?;
        self.path(category, name)
    }

    /// Resolve `name` inside a typed category.
    ///
    /// `name` may contain nested segments but must stay inside the category.
    pub fn path(&self, category: Category, name: &str) -> Result<PathBuf> {
        join_checked(&self.dir(category), name)
    }

    /// Record that the report artifact exists outside the session root.
    pub fn mark_report_exported(&self) {
        self.report_exported.store(true, Ordering::SeqCst);
    }

    pub fn report_exported(&self) -> bool {
        self.report_exported.load(Ordering::SeqCst)
    }

    /// Close the session.
    ///
    /// The root is removed only when `keep_artifacts` is false and the report
    /// has been exported; otherwise it stays for diagnosis.
    pub fn close(self, keep_artifacts: bool) -> Result<CloseOutcome> {
        if keep_artifacts {
            return Ok(CloseOutcome::Retained {
                root: self.root,
                reason: RetainReason::Requested,
            });
        }
        if !self.report_exported() {
            return Ok(CloseOutcome::Retained {
                root: self.root,
                reason: RetainReason::ReportNotExported,
            });
        }

        fs::remove_dir_all(&self.root)?;
        log::debug!("Removed session root {}", self.root.display());
        Ok(CloseOutcome::Removed)
    }
}

/// Timestamp (millisecond precision) plus a random suffix.
fn generate_id(at: DateTime<Utc>) -> String {
    let suffix: String = uuid::Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(8)
        .collect();
    format!("{}-{}", at.format("%Y%m%d-%H%M%S-%3f"), suffix)
}

/// Join `name` onto a category directory, rejecting names that escape it
pub fn join_checked(dir: &Path, name: &str) -> Result<PathBuf> {
    let relative = Path::new(name);
    let valid = !name.is_empty()
        && relative
            .components()
            .all(|c| matches!(c, PathComponent::Normal(_)));
    if !valid {
        return Err(Error::InvalidName(name.to_string()));
    }
    Ok(dir.join(relative))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_category_tree() {
        let tmp = TempDir::new().unwrap();
        let session = Session::open(tmp.path(), false).unwrap();

        for category in Category::ALL {
            assert!(session.dir(category).is_dir(), "{} missing", category.dir_name());
        }
        assert!(session.root().starts_with(tmp.path()));
        assert!(!session.is_dry_run());
    }

    #[test]
    fn test_sessions_in_same_tick_do_not_collide() {
        let tmp = TempDir::new().unwrap();
        let now = Utc::now();
        let first = generate_id(now);
        let second = generate_id(now);
        assert_ne!(first, second);

        let a = Session::open(tmp.path(), false).unwrap();
        let b = Session::open(tmp.path(), false).unwrap();
        assert_ne!(a.root(), b.root());
    }

    #[test]
    fn test_existing_root_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let now = Utc::now();
        let _first = Session::open_with_id(tmp.path(), "fixed", now, false).unwrap();
        let err = Session::open_with_id(tmp.path(), "fixed", now, false).unwrap_err();
        assert!(matches!(err, Error::SessionCollision(_)));
    }

    #[test]
    fn test_resolve_path_validates_category() {
        let tmp = TempDir::new().unwrap();
        let session = Session::open(tmp.path(), false).unwrap();

        let path = session.resolve_path("inventory", "packages.txt").unwrap();
        assert_eq!(path, session.root().join("inventory").join("packages.txt"));

        let nested = session.resolve_path("logs", "bloatware/execution.log").unwrap();
        assert!(nested.ends_with("logs/bloatware/execution.log"));

        let err = session.resolve_path("cache", "x").unwrap_err();
        assert!(matches!(err, Error::InvalidCategory(c) if c == "cache"));
    }

    #[test]
    fn test_resolve_path_rejects_escaping_names() {
        let tmp = TempDir::new().unwrap();
        let session = Session::open(tmp.path(), false).unwrap();

        assert!(matches!(
            session.resolve_path("temp", "../outside"),
            Err(Error::InvalidName(_))
        ));
        assert!(matches!(session.resolve_path("temp", ""), Err(Error::InvalidName(_))));
        assert!(matches!(
            session.path(Category::Temp, "/etc/passwd"),
            Err(Error::InvalidName(_))
        ));
    }

    #[test]
    fn test_close_retains_until_report_exported() {
        let tmp = TempDir::new().unwrap();
        let session = Session::open(tmp.path(), false).unwrap();
        let root = session.root().to_path_buf();

        let outcome = session.close(false).unwrap();
        assert_eq!(
            outcome,
            CloseOutcome::Retained {
                root: root.clone(),
                reason: RetainReason::ReportNotExported
            }
        );
        assert!(root.exists());
    }

    #[test]
    fn test_close_removes_after_export() {
        let tmp = TempDir::new().unwrap();
        let session = Session::open(tmp.path(), true).unwrap();
        let root = session.root().to_path_buf();
        session.mark_report_exported();

        assert_eq!(session.close(false).unwrap(), CloseOutcome::Removed);
        assert!(!root.exists());
    }

    #[test]
    fn test_close_keep_artifacts_wins() {
        let tmp = TempDir::new().unwrap();
        let session = Session::open(tmp.path(), false).unwrap();
        session.mark_report_exported();
        let root = session.root().to_path_buf();

        let outcome = session.close(true).unwrap();
        assert!(matches!(
            outcome,
            CloseOutcome::Retained { reason: RetainReason::Requested, .. }
        ));
        assert!(root.exists());
    }
}
