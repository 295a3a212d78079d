use std::{
    fmt,
    io::{self, Write},
    sync::{Mutex, PoisonError},
};

use router::Renderer;
use tracing::warn;

/// A page as plain text: a title, body lines, and links to other fragments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    pub title: String,
    pub lines: Vec<String>,
    pub links: Vec<(String, String)>,
}

impl Document {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn line(mut self, line: impl Into<String>) -> Self {
        self.lines.push(line.into());
        self
    }

    pub fn link(mut self, label: impl Into<String>, fragment: impl Into<String>) -> Self {
        self.links.push((label.into(), fragment.into()));
        self
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "== {} ==", self.title)?;
        for line in &self.lines {
            writeln!(f, "{line}")?;
        }
        for (label, fragment) in &self.links {
            writeln!(f, "  [{label}] {fragment}")?;
        }
        Ok(())
    }
}

/// Writes each rendered document to a text sink.
pub struct TextRenderer<W> {
    out: Mutex<W>,
}

impl TextRenderer<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> TextRenderer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }
}

impl<W: Write + Send> Renderer<Document> for TextRenderer<W> {
    fn render(&self, document: Document, target: &str) {
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        let written = write!(out, "\n[{target}] {document}").and_then(|()| out.flush());
        if let Err(error) = written {
            warn!(%error, %target, "failed to write rendered document");
        }
    }
}

#[cfg(test)]
#[path = "tests/render_tests.rs"]
mod tests;
