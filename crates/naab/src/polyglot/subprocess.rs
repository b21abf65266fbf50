//! Subprocess execution strategy.
//!
//! The wrapped source is written to a scratch directory, captures travel in
//! environment variables, the child's stdout carries the result, and the
//! deadline is enforced by polling with SIGTERM-then-SIGKILL on expiry.
//! Compiled languages get a compile step first, sharing the same deadline.

use std::{
    io::Read,
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
    time::{Duration, Instant},
};

use crate::{
    object::Object,
    polyglot::{
        BlockRequest, LanguageId, PolyKind, PolyglotBackend, PolyglotFailure,
        marshal, result, wrap,
    },
};

/// Poll interval while waiting for a child under a deadline.
const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Stderr excerpt length carried in failures.
const TRACE_EXCERPT: usize = 2_000;

#[derive(Debug)]
pub(crate) struct SubprocessBackend {
    language: LanguageId,
}

impl SubprocessBackend {
    pub fn for_language(language: LanguageId) -> Self {
        Self { language }
    }

    fn file_ext(&self) -> &'static str {
        match self.language {
            LanguageId::Python => "py",
            LanguageId::JavaScript => "js",
            LanguageId::Shell => "sh",
            LanguageId::Bash => "bash",
            LanguageId::Cpp => "cpp",
            LanguageId::Rust => "rs",
            LanguageId::Ruby => "rb",
            LanguageId::Go => "go",
            LanguageId::CSharp => "csx",
        }
    }

    /// Interpreter invocation for source-run languages; `None` for compiled.
    fn interpreter(&self) -> Option<&'static [&'static str]> {
        match self.language {
            LanguageId::Python => Some(&["python3"]),
            LanguageId::JavaScript => Some(&["node"]),
            LanguageId::Shell => Some(&["sh"]),
            LanguageId::Bash => Some(&["bash"]),
            LanguageId::Ruby => Some(&["ruby"]),
            LanguageId::Go => Some(&["go", "run"]),
            LanguageId::CSharp => Some(&["dotnet-script"]),
            LanguageId::Cpp | LanguageId::Rust => None,
        }
    }

    fn compiler(&self, source: &Path, binary: &Path) -> Option<Command> {
        match self.language {
            LanguageId::Cpp => {
                let mut cmd = Command::new("g++");
                cmd.arg("-std=c++17").arg("-O0").arg(source).arg("-o").arg(binary);
                Some(cmd)
            }
            LanguageId::Rust => {
                let mut cmd = Command::new("rustc");
                cmd.arg("--edition").arg("2021").arg(source).arg("-o").arg(binary);
                Some(cmd)
            }
            _ => None,
        }
    }

    /// Stderr markers that classify a failure as a syntax error.
    fn syntax_markers(&self) -> &'static [&'static str] {
        match self.language {
            LanguageId::Python => &["SyntaxError", "IndentationError"],
            LanguageId::JavaScript => &["SyntaxError"],
            LanguageId::Ruby => &["syntax error"],
            LanguageId::Shell | LanguageId::Bash => &["syntax error", "Syntax error"],
            LanguageId::Go => &["syntax error", "expected"],
            LanguageId::CSharp => &["error CS"],
            LanguageId::Cpp | LanguageId::Rust => &[],
        }
    }

    fn run(&self, request: &BlockRequest, want_result: bool) -> Result<Option<Object>, PolyglotFailure> {
        let started = Instant::now();
        let wrapped = wrap::wrap(self.language, &request.source, &request.captures, want_result);

        let dir = tempfile::tempdir()
            .map_err(|err| PolyglotFailure::runtime(format!("cannot create scratch directory: {err}")))?;
        let source_path = dir.path().join(format!("block.{}", self.file_ext()));
        std::fs::write(&source_path, &wrapped.code)
            .map_err(|err| PolyglotFailure::runtime(format!("cannot write block source: {err}")))?;

        // Compile step for languages that need it.
        let binary = dir.path().join("block.bin");
        let run_target: PathBuf = if let Some(mut compile) = self.compiler(&source_path, &binary) {
            compile.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
            let remaining = remaining_deadline(request.deadline, started)?;
            let outcome = wait_for_child(spawn(&mut compile, self.language)?, remaining, request.grace)?;
            if outcome.timed_out {
                return Err(PolyglotFailure::timeout(format!(
                    "{} compile step exceeded the {:?} deadline",
                    self.language, request.deadline
                )));
            }
            if !outcome.success {
                return Err(
                    PolyglotFailure::new(PolyKind::Syntax, format!("{} fragment failed to compile", self.language))
                        .with_trace(excerpt(&outcome.stderr)),
                );
            }
            binary
        } else {
            source_path.clone()
        };

        let mut cmd = match self.interpreter() {
            Some(parts) => {
                let mut cmd = Command::new(parts[0]);
                cmd.args(&parts[1..]);
                cmd.arg(&run_target);
                cmd
            }
            None => Command::new(&run_target),
        };
        cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
        cmd.current_dir(dir.path());

        let payload = wrapped.wants_env_payload.then(|| marshal::captures_to_json(&request.captures));
        if let Some(payload) = &payload {
            cmd.env("NAAB_CAPTURES", payload);
        }
        if wrapped.wants_direct_env {
            for (name, value) in &request.captures {
                cmd.env(name, direct_env_value(value));
            }
        }

        let remaining = remaining_deadline(request.deadline, started)?;
        let child = spawn(&mut cmd, self.language)?;
        let outcome = wait_for_child(child, remaining, request.grace);

        // Secret hygiene: the serialized payload is zeroized in host memory
        // once the child no longer needs it, regardless of the outcome.
        if request.sensitive
            && let Some(payload) = payload
        {
            marshal::zeroize_payload(payload);
        }

        let outcome = outcome?;
        if outcome.timed_out {
            return Err(PolyglotFailure::timeout(format!(
                "{} block exceeded the {:?} deadline",
                self.language, request.deadline
            )));
        }
        if !outcome.success {
            let kind = if self
                .syntax_markers()
                .iter()
                .any(|marker| outcome.stderr.contains(marker))
            {
                PolyKind::Syntax
            } else {
                PolyKind::Runtime
            };
            return Err(
                PolyglotFailure::new(kind, format!("{} block exited with failure", self.language))
                    .with_trace(excerpt(&outcome.stderr)),
            );
        }

        if want_result {
            result::parse_stdout(&outcome.stdout).map(Some)
        } else {
            Ok(None)
        }
    }
}

impl PolyglotBackend for SubprocessBackend {
    fn execute(&mut self, request: &BlockRequest) -> Result<(), PolyglotFailure> {
        self.run(request, false).map(|_| ())
    }

    fn execute_with_result(&mut self, request: &BlockRequest) -> Result<Object, PolyglotFailure> {
        self.run(request, true).map(|value| value.unwrap_or(Object::Null))
    }
}

/// Scalars export verbatim; containers export as JSON text.
fn direct_env_value(value: &Object) -> String {
    match value {
        Object::Str(s) => s.clone(),
        Object::Int(i) => i.to_string(),
        Object::Float(f) => f.to_string(),
        Object::Bool(b) => b.to_string(),
        Object::Null => String::new(),
        other => other.to_json().to_string(),
    }
}

fn remaining_deadline(deadline: Duration, started: Instant) -> Result<Duration, PolyglotFailure> {
    deadline
        .checked_sub(started.elapsed())
        .filter(|d| !d.is_zero())
        .ok_or_else(|| PolyglotFailure::timeout("deadline expired before the child could start"))
}

fn spawn(cmd: &mut Command, language: LanguageId) -> Result<Child, PolyglotFailure> {
    cmd.spawn().map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            PolyglotFailure::runtime(format!("{language} toolchain is not installed"))
        } else {
            PolyglotFailure::runtime(format!("cannot spawn {language} child: {err}"))
        }
    })
}

struct ChildOutcome {
    success: bool,
    timed_out: bool,
    stdout: String,
    stderr: String,
}

/// Waits for `child` under `deadline`. On expiry the child gets SIGTERM,
/// then SIGKILL after `grace`.
fn wait_for_child(mut child: Child, deadline: Duration, grace: Duration) -> Result<ChildOutcome, PolyglotFailure> {
    let stdout_handle = reader_thread(child.stdout.take());
    let stderr_handle = reader_thread(child.stderr.take());
    let started = Instant::now();

    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break Some(status),
            Ok(None) => {
                if started.elapsed() >= deadline {
                    terminate(&mut child, grace);
                    break None;
                }
                std::thread::sleep(POLL_INTERVAL);
            }
            Err(err) => {
                terminate(&mut child, grace);
                return Err(PolyglotFailure::runtime(format!("cannot wait for child: {err}")));
            }
        }
    };

    let stdout = stdout_handle.join().unwrap_or_default();
    let stderr = stderr_handle.join().unwrap_or_default();
    Ok(ChildOutcome {
        success: status.is_some_and(|s| s.success()),
        timed_out: status.is_none(),
        stdout,
        stderr,
    })
}

fn reader_thread(pipe: Option<impl Read + Send + 'static>) -> std::thread::JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buffer = String::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_string(&mut buffer);
        }
        buffer
    })
}

#[cfg(unix)]
fn terminate(child: &mut Child, grace: Duration) {
    // SAFETY: sending a signal to a pid we own; kill(2) has no memory effects.
    unsafe {
        libc::kill(child.id() as libc::pid_t, libc::SIGTERM);
    }
    let waited = Instant::now();
    while waited.elapsed() < grace {
        if let Ok(Some(_)) = child.try_wait() {
            return;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(not(unix))]
fn terminate(child: &mut Child, _grace: Duration) {
    let _ = child.kill();
    let _ = child.wait();
}

fn excerpt(stderr: &str) -> String {
    let mut out: String = stderr.chars().take(TRACE_EXCERPT).collect();
    if stderr.len() > out.len() {
        out.push_str("...");
    }
    out
}
