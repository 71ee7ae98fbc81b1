//! Line ending conversion between the host and the CRLF wire format
//!
//! Conversion is streaming: the state carried between chunks lets a CRLF pair
//! straddle two slots without being mangled.

const CR: u8 = b'\r';
const LF: u8 = b'\n';

/// Whether the host already writes CRLF line endings
pub const fn host_uses_crlf() -> bool {
    cfg!(windows)
}

/// Whether a text-mode transfer on this host has anything to convert
pub const fn conversion_needed(text_mode: bool) -> bool {
    text_mode && !host_uses_crlf()
}

/// Carried state for one direction of a text-mode stream
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LineEndings {
    last_cr: bool,
    pending_cr: bool,
}

impl LineEndings {
    /// Create state for a fresh stream
    pub fn new() -> Self {
        Self::default()
    }

    /// Host to wire: expand every LF not already preceded by CR into CRLF.
    ///
    /// `out` must hold at least twice `input.len()` bytes. Returns the number
    /// of bytes written to `out`.
    pub fn expand(&mut self, input: &[u8], out: &mut [u8]) -> usize {
        debug_assert!(out.len() >= input.len() * 2);

        let mut written = 0;
        for &byte in input {
            if byte == LF && !self.last_cr {
                out[written] = CR;
                written += 1;
            }
            out[written] = byte;
            written += 1;
            self.last_cr = byte == CR;
        }
        written
    }

    /// Wire to host: collapse CRLF into LF, appending to `out`.
    ///
    /// A CR at the end of `input` is held back until the next chunk shows
    /// whether an LF follows it. A CR followed by anything else passes through.
    pub fn collapse(&mut self, input: &[u8], out: &mut Vec<u8>) {
        out.reserve(input.len() + 1);

        for &byte in input {
            if self.pending_cr {
                self.pending_cr = false;
                if byte == LF {
                    out.push(LF);
                    continue;
                }
                out.push(CR);
            }

            if byte == CR {
                self.pending_cr = true;
            } else {
                out.push(byte);
            }
        }
    }

    /// End of stream: release a held-back CR
    pub fn finish(&mut self, out: &mut Vec<u8>) {
        if std::mem::take(&mut self.pending_cr) {
            out.push(CR);
        }
    }
}
