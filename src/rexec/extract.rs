//! Recovers typed shell lines from raw terminal traffic.
//!
//! Interactive shells echo keystrokes on stdout in raw mode, so the tapped
//! byte stream carries ANSI escape sequences, backspaces, and partial lines.
//! The extractor reduces that stream to completed logical lines; it never
//! interprets shell syntax.

const ESC: u8 = 0x1b;
const BACKSPACE: u8 = 0x08;
const DEL: u8 = 0x7f;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EscapeState {
    Normal,
    Escape,
    Csi,
}

/// One completed line recovered from the stream. `truncated` marks lines
/// emitted because the stroke bound was reached before a terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub line: String,
    pub truncated: bool,
}

/// Bounded per-stream line reconstruction buffer. Created per session and
/// discarded with it.
#[derive(Debug)]
pub struct LineBuffer {
    buf: Vec<u8>,
    max_strokes: usize,
    state: EscapeState,
}

impl LineBuffer {
    pub fn new(max_strokes: usize) -> Self {
        LineBuffer {
            buf: Vec::new(),
            max_strokes: max_strokes.max(1),
            state: EscapeState::Normal,
        }
    }

    /// Feeds a chunk of raw terminal bytes, returning every line completed
    /// by it. Lines complete on `\n`, `\r`, or when the stroke bound is
    /// reached.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Extraction> {
        let mut completed = Vec::new();
        for &byte in bytes {
            match self.state {
                EscapeState::Escape => {
                    if byte == b'[' {
                        self.state = EscapeState::Csi;
                        continue;
                    }
                    // A bare ESC is dropped and the byte after it is
                    // processed as ordinary input.
                    self.state = EscapeState::Normal;
                    self.accept(byte, &mut completed);
                }
                EscapeState::Csi => {
                    if (0x40..=0x7e).contains(&byte) {
                        self.state = EscapeState::Normal;
                    }
                }
                EscapeState::Normal => {
                    if byte == ESC {
                        self.state = EscapeState::Escape;
                    } else {
                        self.accept(byte, &mut completed);
                    }
                }
            }
        }
        completed
    }

    fn accept(&mut self, byte: u8, completed: &mut Vec<Extraction>) {
        match byte {
            b'\n' | b'\r' => {
                if let Some(extraction) = self.take(false) {
                    completed.push(extraction);
                }
            }
            BACKSPACE | DEL => {
                self.buf.pop();
            }
            _ => {
                self.buf.push(byte);
                if self.buf.len() >= self.max_strokes {
                    if let Some(extraction) = self.take(true) {
                        completed.push(extraction);
                    }
                }
            }
        }
    }

    /// Emits any residue left when the stream closes.
    pub fn flush(&mut self) -> Option<Extraction> {
        self.state = EscapeState::Normal;
        self.take(false)
    }

    /// The in-flight, not-yet-terminated input fragment.
    pub fn residue(&self) -> &[u8] {
        &self.buf
    }

    fn take(&mut self, truncated: bool) -> Option<Extraction> {
        let mut end = self.buf.len();
        while end > 0 && is_control(self.buf[end - 1]) {
            end -= 1;
        }
        if end == 0 {
            self.buf.clear();
            return None;
        }
        let line = String::from_utf8_lossy(&self.buf[..end]).into_owned();
        self.buf.clear();
        Some(Extraction { line, truncated })
    }
}

fn is_control(byte: u8) -> bool {
    byte < 0x20 || byte == DEL
}
