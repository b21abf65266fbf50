//! Print output routing.
//!
//! The `print` builtin writes through a [`PrintWriter`] so embedders and
//! tests can capture or redirect output instead of touching process stdout.

use std::borrow::Cow;
use std::io::Write as _;

/// Receives output from the `print` builtin.
pub trait PrintWriter: std::fmt::Debug {
    /// Writes one formatted argument, without separators or newline.
    fn stdout_write(&mut self, output: Cow<'_, str>);

    /// Writes a separator or terminator character.
    fn stdout_push(&mut self, end: char);
}

/// Default writer: process stdout, line-buffered by the OS.
#[derive(Debug, Default)]
pub struct StdPrint;

impl PrintWriter for StdPrint {
    fn stdout_write(&mut self, output: Cow<'_, str>) {
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(output.as_bytes());
    }

    fn stdout_push(&mut self, end: char) {
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(end.to_string().as_bytes());
        if end == '\n' {
            let _ = stdout.flush();
        }
    }
}

/// Captures print output into a shared buffer; used by tests and embedders.
///
/// The writer itself moves into the interpreter, so observers keep a
/// [`CollectStringPrint::handle`] clone and read through it.
#[derive(Debug, Default, Clone)]
pub struct CollectStringPrint {
    buffer: std::sync::Arc<std::sync::Mutex<String>>,
}

impl CollectStringPrint {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A second observer of the same buffer.
    #[must_use]
    pub fn handle(&self) -> Self {
        self.clone()
    }

    /// The captured output so far.
    #[must_use]
    pub fn contents(&self) -> String {
        self.buffer.lock().expect("print buffer mutex poisoned").clone()
    }

    /// Captured output split into lines (without terminators).
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_owned).collect()
    }
}

impl PrintWriter for CollectStringPrint {
    fn stdout_write(&mut self, output: Cow<'_, str>) {
        self.buffer
            .lock()
            .expect("print buffer mutex poisoned")
            .push_str(&output);
    }

    fn stdout_push(&mut self, end: char) {
        self.buffer.lock().expect("print buffer mutex poisoned").push(end);
    }
}

/// Discards all output.
#[derive(Debug, Default)]
pub struct NoPrint;

impl PrintWriter for NoPrint {
    fn stdout_write(&mut self, _output: Cow<'_, str>) {}

    fn stdout_push(&mut self, _end: char) {}
}
