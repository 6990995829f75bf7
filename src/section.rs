use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

const SECTION_INIT_CAPACITY: usize = 0x1000;

/// Append-only text buffer for one output section.
#[derive(Debug)]
pub struct Section {
    name: &'static str,
    buf: String,
}

impl Section {
    fn new(name: &'static str) -> Self {
        Section {
            name,
            buf: String::with_capacity(SECTION_INIT_CAPACITY),
        }
    }

    pub fn write(&mut self, s: &str) {
        self.buf.push_str(s);
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// The two output sections, emitted in order: `.text` then `.data`.
#[derive(Debug)]
pub struct Sections {
    text: Section,
    data: Section,
}

impl Sections {
    pub fn new() -> Self {
        Sections {
            text: Section::new("text"),
            data: Section::new("data"),
        }
    }

    pub fn text_mut(&mut self) -> &mut Section {
        &mut self.text
    }

    pub fn data_mut(&mut self) -> &mut Section {
        &mut self.data
    }

    /// Render every non-empty section as `.section .<name>` followed
    /// by its contents.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for section in [&self.text, &self.data] {
            if section.is_empty() {
                continue;
            }
            out.push_str(".section .");
            out.push_str(section.name);
            out.push('\n');
            out.push_str(&section.buf);
        }
        out
    }

    pub fn flush_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, self.render())
            .with_context(|| format!("cannot write `{}'", path.display()))
    }
}

impl Default for Sections {
    fn default() -> Self {
        Sections::new()
    }
}
