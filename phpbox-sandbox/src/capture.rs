//! Scoped output capture

/// Stack of output layers.
///
/// The bottom layer is the ambient output; each [`CaptureScope`] pushes its
/// own layer and pops it again when it finishes or is dropped, so whatever
/// was buffered before the scope opened is never lost or mixed in.
#[derive(Debug)]
pub struct OutputBuffer {
    layers: Vec<String>,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self {
            layers: vec![String::new()],
        }
    }

    /// Append to the innermost layer
    pub fn write(&mut self, text: &str) {
        if let Some(top) = self.layers.last_mut() {
            top.push_str(text);
        }
    }

    /// Content of the innermost layer
    pub fn contents(&self) -> &str {
        self.layers.last().map(String::as_str).unwrap_or("")
    }

    /// Number of open layers, the ambient one included
    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    /// Open a capture scope on top of the current layers
    pub fn capture(&mut self) -> CaptureScope<'_> {
        self.layers.push(String::new());
        let depth = self.layers.len();
        CaptureScope {
            buffer: self,
            depth,
        }
    }
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// One open capture layer. Dropping it without [`CaptureScope::finish`]
/// discards what it captured.
#[derive(Debug)]
pub struct CaptureScope<'a> {
    buffer: &'a mut OutputBuffer,
    depth: usize,
}

impl<'a> CaptureScope<'a> {
    pub fn write(&mut self, text: &str) {
        self.buffer.write(text);
    }

    pub fn contents(&self) -> &str {
        self.buffer.contents()
    }

    /// Open a nested scope inside this one
    pub fn capture(&mut self) -> CaptureScope<'_> {
        self.buffer.capture()
    }

    /// Close the scope and return what it captured
    pub fn finish(mut self) -> String {
        self.pop()
    }

    fn pop(&mut self) -> String {
        let mut captured = String::new();
        // inner scopes leaked with mem::forget are folded into this one
        while self.buffer.layers.len() >= self.depth && self.buffer.layers.len() > 1 {
            if let Some(layer) = self.buffer.layers.pop() {
                captured.insert_str(0, &layer);
            }
        }
        captured
    }
}

impl Drop for CaptureScope<'_> {
    fn drop(&mut self) {
        self.pop();
    }
}
