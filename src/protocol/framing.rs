//! Frame extraction for the P3 byte stream.
//!
//! Uses `bytes::BytesMut` for the rolling input buffer. A frame is bounded
//! by `SOH` (0x01) and `EOT` (0x04); payload-internal occurrences of the
//! framing bytes are escaped as `DLE` (0x10) followed by the byte XORed
//! with 0x20.
//!
//! The framer accepts arbitrary chunks (TCP reads or whole UDP datagrams)
//! and yields zero or more complete, unescaped payloads per push. All
//! framing errors are non-fatal: the framer reports a diagnostic and
//! resumes at the next candidate `SOH`.
//!
//! # Example
//!
//! ```
//! use p3_bridge::protocol::framing::{encode_frame, Framer};
//!
//! let mut framer = Framer::new();
//! let wire = encode_frame(&[0x04, 0x01, 0x00, 0x00, 0x00, 0xAA, 0xBB]);
//!
//! let out = framer.push(&wire);
//! assert_eq!(out.frames.len(), 1);
//! assert_eq!(out.frames[0], vec![0x04, 0x01, 0x00, 0x00, 0x00, 0xAA, 0xBB]);
//! ```

use bytes::BytesMut;

/// Start-of-header framing byte.
pub const SOH: u8 = 0x01;
/// End-of-transmission framing byte.
pub const EOT: u8 = 0x04;
/// Data-link-escape framing byte.
pub const DLE: u8 = 0x10;
/// XOR mask applied to the byte following a `DLE`.
pub const ESCAPE_XOR: u8 = 0x20;

/// Default cap on the rolling buffer. A frame that grows past this without
/// a closing `EOT` is abandoned.
pub const DEFAULT_MAX_FRAME: usize = 64 * 1024;

/// Non-fatal framing diagnostics, surfaced alongside extracted frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDiagnostic {
    /// Bytes were discarded while searching for (or restarting at) a frame
    /// start.
    Resync { dropped: usize },
    /// A frame exceeded the buffer cap without a closing `EOT`.
    Oversize { buffered: usize },
    /// The stream ended with a partial frame whose last byte is a lone
    /// `DLE`. Reported by [`Framer::finish`].
    DleAtEof,
}

/// Result of one [`Framer::push`]: completed payloads plus any diagnostics
/// raised while scanning.
#[derive(Debug, Default)]
pub struct Push {
    /// Complete, unescaped frame payloads in completion order.
    pub frames: Vec<Vec<u8>>,
    /// Diagnostics raised during this push.
    pub diagnostics: Vec<FrameDiagnostic>,
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
///
/// The framer owns the rolling input buffer; completed payloads are handed
/// out by value. TCP chunks and UDP datagrams are treated identically.
pub struct Framer {
    buf: BytesMut,
    max_frame: usize,
}

impl Framer {
    /// Create a framer with the default 64 KiB buffer cap.
    pub fn new() -> Self {
        Self::with_max_frame(DEFAULT_MAX_FRAME)
    }

    /// Create a framer with a custom buffer cap.
    pub fn with_max_frame(max_frame: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
            max_frame,
        }
    }

    /// Number of buffered (unconsumed) bytes.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Push a chunk of bytes and extract all complete frames.
    pub fn push(&mut self, data: &[u8]) -> Push {
        self.buf.extend_from_slice(data);

        let mut out = Push::default();
        loop {
            match self.try_extract_one(&mut out) {
                Extract::Frame(payload) => out.frames.push(payload),
                Extract::NeedMore => break,
            }
        }
        out
    }

    /// Signal end-of-stream (transport disconnect).
    ///
    /// Any partial frame is dropped; a partial that ended in a lone `DLE`
    /// is reported. The next connection starts with a clean buffer.
    pub fn finish(&mut self) -> Option<FrameDiagnostic> {
        let pending_dle = self.buf.len() >= 2 && self.buf[self.buf.len() - 1] == DLE;
        self.buf.clear();
        if pending_dle {
            Some(FrameDiagnostic::DleAtEof)
        } else {
            None
        }
    }

    /// Attempt to extract a single frame from the front of the buffer.
    ///
    /// On success the consumed bytes (leading junk, the frame, its `EOT`)
    /// are removed from the buffer. On `NeedMore` the buffer is compacted
    /// down to the pending frame start (or the minimal junk tail).
    fn try_extract_one(&mut self, out: &mut Push) -> Extract {
        // Locate the first SOH that is not escaped by a preceding DLE.
        let start = match self.find_start() {
            Some(i) => i,
            None => {
                self.discard_junk(out);
                return Extract::NeedMore;
            }
        };

        if start > 0 {
            out.diagnostics.push(FrameDiagnostic::Resync { dropped: start });
            let _ = self.buf.split_to(start);
        }

        // Unescape from the byte after SOH until EOT.
        let mut payload = Vec::new();
        let mut i = 1;
        loop {
            if i >= self.buf.len() {
                return self.incomplete(out);
            }
            match self.buf[i] {
                DLE => {
                    if i + 1 >= self.buf.len() {
                        // Lone DLE at the buffer tail: retained, not consumed.
                        return self.incomplete(out);
                    }
                    payload.push(self.buf[i + 1] ^ ESCAPE_XOR);
                    i += 2;
                }
                EOT => {
                    let _ = self.buf.split_to(i + 1);
                    return Extract::Frame(payload);
                }
                SOH => {
                    // A bare SOH inside a frame restarts framing there; the
                    // partial collected so far is dropped.
                    out.diagnostics.push(FrameDiagnostic::Resync { dropped: i });
                    let _ = self.buf.split_to(i);
                    payload.clear();
                    i = 1;
                }
                b => {
                    payload.push(b);
                    i += 1;
                }
            }
        }
    }

    /// Handle an incomplete frame: enforce the buffer cap, otherwise wait
    /// for more bytes.
    fn incomplete(&mut self, out: &mut Push) -> Extract {
        if self.buf.len() > self.max_frame {
            out.diagnostics.push(FrameDiagnostic::Oversize {
                buffered: self.buf.len(),
            });
            // Drop the open SOH so the search resumes past it.
            let _ = self.buf.split_to(1);
            self.discard_junk(out);
        }
        Extract::NeedMore
    }

    /// Index of the first `SOH` not preceded by `DLE`, if any.
    fn find_start(&self) -> Option<usize> {
        self.buf
            .iter()
            .enumerate()
            .position(|(i, &b)| b == SOH && (i == 0 || self.buf[i - 1] != DLE))
    }

    /// No frame start in the buffer: everything is junk except a trailing
    /// `DLE`, which may be escaping a `SOH` yet to arrive.
    fn discard_junk(&mut self, out: &mut Push) {
        let keep = usize::from(self.buf.last() == Some(&DLE));
        let junk = self.buf.len() - keep;
        if junk > 0 {
            out.diagnostics.push(FrameDiagnostic::Resync { dropped: junk });
            let _ = self.buf.split_to(junk);
        }
    }
}

impl Default for Framer {
    fn default() -> Self {
        Self::new()
    }
}

enum Extract {
    Frame(Vec<u8>),
    NeedMore,
}

/// Escape and frame a payload for the wire.
///
/// The inverse of the framer's unescape: payload bytes equal to `SOH`,
/// `EOT`, or `DLE` are emitted as `DLE` followed by the byte XORed with
/// 0x20. The bridge never writes to the decoder; this exists for tests and
/// decoder mocks.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut wire = Vec::with_capacity(payload.len() + 2);
    wire.push(SOH);
    for &b in payload {
        if b == SOH || b == EOT || b == DLE {
            wire.push(DLE);
            wire.push(b ^ ESCAPE_XOR);
        } else {
            wire.push(b);
        }
    }
    wire.push(EOT);
    wire
}
