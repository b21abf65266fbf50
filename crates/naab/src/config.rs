//! Interpreter configuration.

use std::{path::PathBuf, time::Duration};

use crate::{
    resource::{DEFAULT_GC_THRESHOLD, DEFAULT_POLYGLOT_DEADLINE, ResourceLimits},
    sanitize::SanitizeMode,
};

/// Host-configurable knobs for an interpreter instance. Defaults mirror the
/// documented caps; embedders tighten them for untrusted workloads.
#[derive(Debug, Clone)]
pub struct InterpOptions {
    /// Heap resource limits (allocation count, memory, call depth).
    pub limits: ResourceLimits,
    /// Error-message redaction mode.
    pub sanitize_mode: SanitizeMode,
    /// Repository root; absolute paths under it are trimmed to relative form
    /// by the sanitizer.
    pub repo_root: Option<PathBuf>,
    /// Whether the cycle collector runs automatically.
    pub gc_enabled: bool,
    /// Allocations between automatic collector runs.
    pub gc_threshold: usize,
    /// Additional roots searched by the module loader after the importing
    /// file's directory.
    pub module_search_roots: Vec<PathBuf>,
    /// Directories user-space file access is confined to. Empty means
    /// unrestricted (byte screening still applies).
    pub base_dirs: Vec<PathBuf>,
    /// Deadline for each polyglot execution.
    pub polyglot_deadline: Duration,
    /// Grace interval between SIGTERM and SIGKILL for subprocess backends.
    pub polyglot_grace: Duration,
    /// Maximum concurrent polyglot worker-thread executions.
    pub polyglot_concurrency: usize,
    /// Audit log destination; `None` keeps records in memory only.
    pub audit_log_path: Option<PathBuf>,
}

impl Default for InterpOptions {
    fn default() -> Self {
        Self {
            limits: ResourceLimits::default(),
            sanitize_mode: SanitizeMode::default(),
            repo_root: None,
            gc_enabled: true,
            gc_threshold: DEFAULT_GC_THRESHOLD,
            module_search_roots: Vec::new(),
            base_dirs: Vec::new(),
            polyglot_deadline: DEFAULT_POLYGLOT_DEADLINE,
            polyglot_grace: Duration::from_millis(200),
            polyglot_concurrency: 4,
            audit_log_path: None,
        }
    }
}
