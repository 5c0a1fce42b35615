//! Admission control: name rules, rate limiting, capacity and path sandboxing.

use regex::Regex;
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use crate::error::AdmissionError;

/// Scoped name: optional `@`, a scope, a slash, a name.
static NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| match Regex::new(r"^@?[A-Za-z0-9_-]+/[A-Za-z0-9_-]+$") {
        Ok(regex) => regex,
        Err(err) => panic!("Artifact name regex is invalid: {err}"),
    });

/// Check an artifact name against the scoped-name rules.
///
/// # Errors
/// Returns `InvalidName` for traversal sequences or names outside the pattern.
pub fn validate_name(name: &str) -> Result<(), AdmissionError> {
    let invalid = |reason: &str| AdmissionError::InvalidName {
        name: name.to_owned(),
        reason: reason.to_owned(),
    };
    if ["..", "./", "\\"].iter().any(|needle| name.contains(needle)) {
        return Err(invalid("contains a path traversal sequence"));
    }
    if !NAME_PATTERN.is_match(name) {
        return Err(invalid("expected scope/name using letters, digits, '-' or '_'"));
    }
    Ok(())
}

/// Resolve `path` without touching the filesystem. `None` if it climbs above its root.
pub fn normalize_lexically(path: &Path) -> Option<PathBuf> {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::Normal(_) => {
                normalized.push(component);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    return None;
                }
            }
        }
    }
    Some(normalized)
}

/// Output directory for `name`, which must land strictly inside `data_root`.
///
/// # Errors
/// Returns `UnsafeOutputPath` when the joined path escapes the root.
pub fn resolve_output_path(data_root: &Path, name: &str) -> Result<PathBuf, AdmissionError> {
    let joined = data_root.join(name);
    let unsafe_path = || AdmissionError::UnsafeOutputPath {
        path: joined.clone(),
    };
    let root = normalize_lexically(data_root).ok_or_else(unsafe_path)?;
    let candidate = normalize_lexically(&joined).ok_or_else(unsafe_path)?;
    if candidate != root && candidate.starts_with(&root) {
        Ok(candidate)
    } else {
        Err(unsafe_path())
    }
}

/// Admission counter whose window resets lazily once more than a full
/// window has passed since the last admission.
#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    last_admission: Option<Instant>,
    admitted: u32,
}

impl RateLimiter {
    /// Allow `limit` admissions per `window`.
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            last_admission: None,
            admitted: 0,
        }
    }

    /// Check for room at `now`, clearing the count if the limiter has been idle
    /// for longer than a window.
    ///
    /// # Errors
    /// Returns `RateLimited` when the current window is full.
    pub fn check(&mut self, now: Instant) -> Result<(), AdmissionError> {
        if let Some(last) = self.last_admission
            && now.saturating_duration_since(last) > self.window
        {
            self.admitted = 0;
        }
        if self.admitted >= self.limit {
            return Err(AdmissionError::RateLimited {
                limit: self.limit,
                window_seconds: self.window.as_secs(),
            });
        }
        Ok(())
    }

    /// Count one admission made at `now`.
    pub fn record(&mut self, now: Instant) {
        self.admitted = self.admitted.saturating_add(1);
        self.last_admission = Some(now);
    }
}

/// Admission state shared by every creation request.
#[derive(Debug)]
pub struct Governor {
    data_root: PathBuf,
    names: HashSet<String>,
    rate: RateLimiter,
    max_tracked: usize,
}

impl Governor {
    /// Create a governor for `data_root`.
    pub fn new(data_root: PathBuf, rate: RateLimiter, max_tracked: usize) -> Self {
        Self {
            data_root,
            names: HashSet::new(),
            rate,
            max_tracked,
        }
    }

    /// Root every output directory lives under.
    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    /// Run every admission check in order and, on success, register the name
    /// and consume rate budget. Returns the sandboxed output path.
    ///
    /// # Errors
    /// Returns the first failing check; nothing is recorded in that case.
    pub fn admit(
        &mut self,
        name: &str,
        tracked: usize,
        now: Instant,
    ) -> Result<PathBuf, AdmissionError> {
        if self.names.contains(name) {
            return Err(AdmissionError::DuplicateArtifact(name.to_owned()));
        }
        validate_name(name)?;
        self.rate.check(now)?;
        if tracked >= self.max_tracked {
            return Err(AdmissionError::CapacityExceeded {
                limit: self.max_tracked,
            });
        }
        let output_path = resolve_output_path(&self.data_root, name)?;

        self.rate.record(now);
        self.names.insert(name.to_owned());
        Ok(output_path)
    }

    /// Whether `name` was already admitted.
    pub fn is_registered(&self, name: &str) -> bool {
        self.names.contains(name)
    }
}
