//! Rolling line buffer for scanning device chatter.

/// Accumulates incoming bytes as text and discards lines already scanned.
///
/// The handshake and go protocols search for marker substrings in whatever
/// the device prints. Markers can span two read chunks, so the text seen so
/// far must be retained — but only up to the last newline, which bounds the
/// buffer while keeping any partial line (and with it a partial marker)
/// intact. Callers scan after `append` and call `truncate_to_last_line`
/// once the scan is done.
#[derive(Debug, Default)]
pub struct LineBuffer {
    text: String,
}

impl LineBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append incoming bytes (lossy UTF-8) and return the accumulated text.
    pub fn append(&mut self, data: &[u8]) -> &str {
        self.text.push_str(&String::from_utf8_lossy(data));
        &self.text
    }

    /// The accumulated text since the last truncation.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Drop everything up to and including the last newline.
    ///
    /// Keeps the whole text when no newline has been seen yet.
    pub fn truncate_to_last_line(&mut self) {
        if let Some(pos) = self.text.rfind('\n') {
            self.text.drain(..=pos);
        }
    }

    /// Discard the buffer entirely (a watcher consumed its match).
    pub fn clear(&mut self) {
        self.text.clear();
    }
}
