//! Polyglot executor framework.
//!
//! Each supported language has a backend implementing the same capability
//! set (`initialize` / `execute` / `execute_with_result` / `shutdown`);
//! dispatch is purely data-dependent on the block's language tag. Two
//! embedding strategies coexist: an in-process embedded interpreter (Python,
//! behind the `python-embed` feature) and subprocess execution for
//! everything else. Captured values are validated and marshalled before any
//! foreign code runs, foreign failures are classified and wrapped, and
//! security-relevant events land in the audit log.

use std::time::Duration;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::{
    audit::{AuditEventKind, AuditLog},
    exception::{Error, ErrorKind},
    object::Object,
    resource::MAX_BLOCK_SIZE,
};

pub(crate) mod future;
pub(crate) mod marshal;
#[cfg(feature = "python-embed")]
pub(crate) mod python;
pub(crate) mod result;
pub(crate) mod subprocess;
pub(crate) mod wrap;

/// Identifier of a supported embedded language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LanguageId {
    Python,
    JavaScript,
    Shell,
    Bash,
    Cpp,
    Rust,
    Ruby,
    Go,
    CSharp,
}

/// Heap payload of a block-handle value.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockData {
    pub language: LanguageId,
    pub block_id: Uuid,
    pub source: String,
    pub captures: Vec<String>,
}

/// Classification of a foreign failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
pub enum PolyKind {
    Syntax,
    Runtime,
    Timeout,
    Type,
    Size,
    Validation,
}

/// A failure at or beyond the FFI boundary. Foreign exceptions never cross
/// in their native mechanism; they are caught, classified, and wrapped here.
#[derive(Debug, Clone, PartialEq)]
pub struct PolyglotFailure {
    pub kind: PolyKind,
    pub message: String,
    /// Excerpt of the foreign stack or compiler output, when available.
    pub foreign_trace: Option<String>,
}

impl PolyglotFailure {
    pub(crate) fn new(kind: PolyKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            foreign_trace: None,
        }
    }

    pub(crate) fn with_trace(mut self, trace: impl Into<String>) -> Self {
        let trace = trace.into();
        if !trace.is_empty() {
            self.foreign_trace = Some(trace);
        }
        self
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::new(PolyKind::Validation, message)
    }

    pub(crate) fn timeout(message: impl Into<String>) -> Self {
        Self::new(PolyKind::Timeout, message)
    }

    pub(crate) fn runtime(message: impl Into<String>) -> Self {
        Self::new(PolyKind::Runtime, message)
    }

    /// Wraps into the evaluator's tagged error record.
    pub(crate) fn into_error(self, language: LanguageId) -> Error {
        let kind = match self.kind {
            PolyKind::Timeout => ErrorKind::PolyglotTimeout,
            _ => ErrorKind::PolyglotError,
        };
        let error = Error::new(kind, format!("{language} block failed ({}): {}", self.kind, self.message));
        match self.foreign_trace {
            Some(trace) => error.with_cause(Error::new(ErrorKind::PolyglotError, trace)),
            None => error,
        }
    }
}

/// A fully resolved execution request: block source plus the marshalled
/// captures and timing policy.
#[derive(Debug)]
pub(crate) struct BlockRequest {
    pub language: LanguageId,
    pub block_id: Uuid,
    pub source: String,
    /// Captured variables under their original NAAb identifiers.
    pub captures: Vec<(String, Object)>,
    /// Any capture derived from a sensitive value; payload buffers are
    /// zeroized after dispatch when set.
    pub sensitive: bool,
    pub deadline: Duration,
    pub grace: Duration,
}

/// One language backend. All backends satisfy the same capability set; the
/// registry owns them and dispatches on the language tag.
pub(crate) trait PolyglotBackend: Send + std::fmt::Debug {
    fn initialize(&mut self) -> Result<(), PolyglotFailure> {
        Ok(())
    }

    /// Runs the block for side effects only.
    fn execute(&mut self, request: &BlockRequest) -> Result<(), PolyglotFailure>;

    /// Runs the block and parses a typed return value.
    fn execute_with_result(&mut self, request: &BlockRequest) -> Result<Object, PolyglotFailure>;

    fn shutdown(&mut self) {}
}

/// Backend registry keyed by language id.
#[derive(Debug)]
pub(crate) struct PolyglotRegistry {
    backends: AHashMap<LanguageId, Box<dyn PolyglotBackend>>,
    initialized: ahash::AHashSet<LanguageId>,
}

impl PolyglotRegistry {
    /// Registers the default backend set: the embedded Python interpreter
    /// when `python-embed` is enabled, subprocess backends for everything
    /// else.
    pub fn with_defaults() -> Self {
        let mut registry = Self {
            backends: AHashMap::new(),
            initialized: ahash::AHashSet::new(),
        };
        #[cfg(feature = "python-embed")]
        registry.register(LanguageId::Python, Box::new(python::EmbeddedPythonBackend::new()));
        #[cfg(not(feature = "python-embed"))]
        registry.register(
            LanguageId::Python,
            Box::new(subprocess::SubprocessBackend::for_language(LanguageId::Python)),
        );
        for language in [
            LanguageId::JavaScript,
            LanguageId::Shell,
            LanguageId::Bash,
            LanguageId::Cpp,
            LanguageId::Rust,
            LanguageId::Ruby,
            LanguageId::Go,
            LanguageId::CSharp,
        ] {
            registry.register(language, Box::new(subprocess::SubprocessBackend::for_language(language)));
        }
        registry
    }

    pub fn register(&mut self, language: LanguageId, backend: Box<dyn PolyglotBackend>) {
        self.backends.insert(language, backend);
        self.initialized.remove(&language);
    }

    /// Dispatches one block execution. Validation runs before any foreign
    /// code; failures are audited and returned as tagged errors.
    pub fn run(
        &mut self,
        request: &BlockRequest,
        want_result: bool,
        audit: &AuditLog,
    ) -> Result<Option<Object>, Error> {
        if request.source.len() > MAX_BLOCK_SIZE {
            return Err(Error::new(
                ErrorKind::ResourceLimit,
                format!(
                    "{} block of {} bytes exceeds the 1 MiB cap",
                    request.language,
                    request.source.len()
                ),
            ));
        }

        if let Err(failure) = marshal::validate_captures(&request.captures) {
            audit.log(
                AuditEventKind::FfiValidationFailure,
                serde_json::json!({
                    "language": request.language,
                    "block_id": request.block_id.to_string(),
                    "reason": failure.message,
                }),
            );
            return Err(failure.into_error(request.language));
        }

        let backend = self.backends.get_mut(&request.language).ok_or_else(|| {
            Error::new(
                ErrorKind::PolyglotError,
                format!("no backend registered for {}", request.language),
            )
        })?;

        if !self.initialized.contains(&request.language) {
            backend
                .initialize()
                .map_err(|failure| failure.into_error(request.language))?;
            self.initialized.insert(request.language);
        }

        let outcome = if want_result {
            backend.execute_with_result(request).map(Some)
        } else {
            backend.execute(request).map(|()| None)
        };

        match outcome {
            Ok(value) => Ok(value),
            Err(failure) => {
                let event = match failure.kind {
                    PolyKind::Timeout => AuditEventKind::PolyglotTimeout,
                    _ => AuditEventKind::PolyglotFailure,
                };
                audit.log(
                    event,
                    serde_json::json!({
                        "language": request.language,
                        "block_id": request.block_id.to_string(),
                        "kind": failure.kind.to_string(),
                    }),
                );
                Err(failure.into_error(request.language))
            }
        }
    }

    /// Shuts down every backend; called at interpreter teardown.
    pub fn shutdown_all(&mut self) {
        for backend in self.backends.values_mut() {
            backend.shutdown();
        }
        self.initialized.clear();
    }
}
