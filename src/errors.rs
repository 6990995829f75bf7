use std::cell::Cell;

use anyhow::anyhow;

/// Diagnostic state for one compilation: the input name, the line the
/// scanner most recently reached, and a running warning count.
///
/// Errors abort compilation at the point of detection, so they are
/// returned as values and propagated with `?`. Warnings are printed to
/// stderr as they occur and compilation continues.
pub struct Session {
    filename: String,
    line: Cell<u32>,
    warnings: Cell<usize>,
}

impl Session {
    pub fn new(filename: impl Into<String>) -> Self {
        Session {
            filename: filename.into(),
            line: Cell::new(1),
            warnings: Cell::new(0),
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn set_line(&self, line: u32) {
        self.line.set(line);
    }

    pub fn line(&self) -> u32 {
        self.line.get()
    }

    pub fn warning_count(&self) -> usize {
        self.warnings.get()
    }

    /// Build a fatal diagnostic carrying the `file: line n:` prefix.
    pub fn error(&self, msg: impl AsRef<str>) -> anyhow::Error {
        anyhow!(
            "{}: line {}: error: {}",
            self.filename,
            self.line.get(),
            msg.as_ref()
        )
    }

    pub fn warn(&self, msg: impl AsRef<str>) {
        self.warnings.set(self.warnings.get() + 1);
        eprintln!(
            "{}: line {}: warning: {}",
            self.filename,
            self.line.get(),
            msg.as_ref()
        );
    }
}
