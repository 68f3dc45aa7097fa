//! Styled text output.
//!
//! Formatting writes into a [`FormattedText`] buffer first; the buffer is handed to the
//! caller's [`TextColorWriter`] in a single call once a facet is complete, so a sink never
//! observes a partially formatted facet.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

use parking_lot::Mutex;

/// Classification of a text span, used by renderers to pick a style.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextColor {
    Text,
    Punctuation,
    Operator,
    Keyword,
    Number,
    String,
    Char,
    Type,
    Namespace,
    Local,
    Parameter,
    Field,
    Property,
    ArrayElement,
    Error,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FormattedText {
    spans: Vec<(TextColor, String)>,
}

impl FormattedText {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, color: TextColor, text: impl AsRef<str>) {
        let text = text.as_ref();
        if text.is_empty() {
            return;
        }
        // Merge adjacent spans of the same color.
        if let Some((last_color, last)) = self.spans.last_mut() {
            if *last_color == color {
                last.push_str(text);
                return;
            }
        }
        self.spans.push((color, text.to_owned()));
    }

    pub fn spans(&self) -> &[(TextColor, String)] {
        &self.spans
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Plain text with all styling dropped.
    pub fn text(&self) -> String {
        self.spans.iter().map(|(_, s)| s.as_str()).collect()
    }
}

/// A styled text target, e.g. an editor surface or a tooltip.
///
/// Implementations are shared with evaluation workers, so they use interior mutability.
pub trait TextColorWriter: Send + Sync {
    /// Receives one complete facet. Whether this appends or replaces is up to the sink.
    fn write_text(&self, text: &FormattedText);

    /// A sink that can't currently accept output is rejected before any evaluation starts.
    fn is_usable(&self) -> bool {
        true
    }
}

pub type SharedWriter = Arc<dyn TextColorWriter>;

/// In-memory sink that accumulates everything written to it.
#[derive(Debug, Default)]
pub struct StringOutput {
    text: Mutex<FormattedText>,
    writes: AtomicUsize,
    closed: AtomicBool,
}

impl StringOutput {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn text(&self) -> String {
        self.text.lock().text()
    }

    pub fn formatted(&self) -> FormattedText {
        self.text.lock().clone()
    }

    /// Number of `write_text` calls received.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Mark the sink as no longer usable.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl TextColorWriter for StringOutput {
    fn write_text(&self, text: &FormattedText) {
        let mut out = self.text.lock();
        for (color, span) in text.spans() {
            out.write(*color, span);
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
    }

    fn is_usable(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }
}
