//! Background line reader shared by the serial and socket transports.
//!
//! A dedicated thread owns the read half of the channel, splits the byte
//! stream into lines and forwards them over an `mpsc` channel. The session
//! thread then only ever waits on `recv_timeout`, which gives every receive a
//! hard upper bound regardless of what the device does.
//!
//! Prompts (`root> `, `S>`) are not followed by a line terminator. The source
//! is expected to poll with a short read timeout; once a partial line has been
//! idle for [`IDLE_FLUSH_POLLS`] polls it is delivered as a line of its own.

use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use crate::error::TransportError;

/// Read polls without new bytes before a partial line is flushed.
pub const IDLE_FLUSH_POLLS: u32 = 2;

/// Splits a byte stream into lines.
///
/// `\r`, `\n` and `\r\n` each end a line; the terminator is not part of the
/// line. A bare `\r` therefore produces an empty line, which callers treat as
/// a continuation. Bytes that are not valid UTF-8 are replaced.
#[derive(Debug, Default)]
pub struct LineSplitter {
    partial: Vec<u8>,
    after_cr: bool,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, returning every line they complete.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &b in bytes {
            match b {
                b'\n' if self.after_cr => {
                    self.after_cr = false;
                }
                b'\r' | b'\n' => {
                    lines.push(self.take());
                    self.after_cr = b == b'\r';
                }
                _ => {
                    self.after_cr = false;
                    self.partial.push(b);
                }
            }
        }
        lines
    }

    /// Bytes received since the last terminator.
    pub fn pending(&self) -> &[u8] {
        &self.partial
    }

    /// Hand out the unterminated remainder, if any.
    pub fn flush(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            None
        } else {
            Some(self.take())
        }
    }

    fn take(&mut self) -> String {
        let line = String::from_utf8_lossy(&self.partial).into_owned();
        self.partial.clear();
        line
    }
}

/// Receiving half of a transport: lines produced by the reader thread.
pub struct LineReader {
    rx: Receiver<String>,
    /// Set on drop; the thread checks it after every poll.
    stop: Arc<AtomicBool>,
}

impl LineReader {
    /// Spawn a reader thread over `source`.
    ///
    /// The thread exits when the source reports end-of-stream or a hard error,
    /// or within one poll of this `LineReader` being dropped, which releases
    /// the source even on a silent line. Read timeouts on the source are idle
    /// polls, not errors.
    pub fn spawn<R>(source: R, label: &str) -> Self
    where
        R: Read + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let label = label.to_string();
        let thread_stop = Arc::clone(&stop);
        std::thread::spawn(move || {
            Self::reader_thread(source, tx, &thread_stop, &label);
        });
        Self { rx, stop }
    }

    fn reader_thread<R: Read>(mut source: R, tx: Sender<String>, stop: &AtomicBool, label: &str) {
        let mut splitter = LineSplitter::new();
        let mut buf = [0u8; 512];
        let mut idle_polls = 0u32;
        loop {
            if stop.load(Ordering::Relaxed) {
                debug!(transport = label, "reader released");
                return;
            }
            match source.read(&mut buf) {
                Ok(0) => {
                    if let Some(line) = splitter.flush() {
                        let _ = tx.send(line);
                    }
                    debug!(transport = label, "end of stream");
                    break;
                }
                Ok(n) => {
                    idle_polls = 0;
                    for line in splitter.push(&buf[..n]) {
                        trace!(transport = label, line = %line, "rx");
                        if tx.send(line).is_err() {
                            return;
                        }
                    }
                }
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                    idle_polls += 1;
                    if idle_polls >= IDLE_FLUSH_POLLS {
                        if let Some(line) = splitter.flush() {
                            trace!(transport = label, line = %line, "rx (idle flush)");
                            if tx.send(line).is_err() {
                                return;
                            }
                        }
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!(transport = label, error = %e, "reader stopped");
                    break;
                }
            }
        }
    }

    /// Wait up to `timeout` for the next line.
    pub fn recv(&self, timeout: Duration) -> Result<Option<String>, TransportError> {
        match self.rx.recv_timeout(timeout) {
            Ok(line) => Ok(Some(line)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Disconnected),
        }
    }

    /// Drop every line that has already arrived. Returns how many were dropped.
    pub fn drain(&self) -> usize {
        let mut dropped = 0;
        while self.rx.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }
}

impl Drop for LineReader {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Cursor};
    use std::time::Instant;

    /// A line that never carries data: every read is an idle poll.
    struct SilentLine {
        released: Arc<AtomicBool>,
    }

    impl Read for SilentLine {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            std::thread::sleep(Duration::from_millis(5));
            Err(io::Error::new(ErrorKind::TimedOut, "idle"))
        }
    }

    impl Drop for SilentLine {
        fn drop(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn crlf_is_a_single_terminator() {
        let mut s = LineSplitter::new();
        assert_eq!(s.push(b"m_hello\r\nroot>"), vec!["m_hello"]);
        assert_eq!(s.pending(), b"root>");
        assert_eq!(s.push(b" \r"), vec!["root> "]);
    }

    #[test]
    fn bare_carriage_return_yields_empty_line() {
        let mut s = LineSplitter::new();
        assert_eq!(s.push(b"\r\nNO CARRIER\r\n"), vec!["", "NO CARRIER"]);
        assert_eq!(s.push(b"\r\r\n"), vec!["", ""]);
    }

    #[test]
    fn crlf_split_across_reads() {
        let mut s = LineSplitter::new();
        assert_eq!(s.push(b"eng>\r"), vec!["eng>"]);
        assert!(s.push(b"\n").is_empty());
    }

    #[test]
    fn flush_returns_partial_prompt() {
        let mut s = LineSplitter::new();
        assert!(s.push(b"S>").is_empty());
        assert_eq!(s.flush(), Some("S>".to_string()));
        assert_eq!(s.flush(), None);
    }

    #[test]
    fn splitter_replaces_invalid_utf8() {
        let mut s = LineSplitter::new();
        let lines = s.push(b"ab\xffcd\n");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("ab"));
        assert!(lines[0].ends_with("cd"));
    }

    #[test]
    fn reader_delivers_lines_then_reports_disconnect() {
        let reader = LineReader::spawn(Cursor::new(b"one\ntwo\nroot> ".to_vec()), "test");
        let timeout = Duration::from_secs(2);
        assert_eq!(reader.recv(timeout).unwrap(), Some("one".to_string()));
        assert_eq!(reader.recv(timeout).unwrap(), Some("two".to_string()));
        assert_eq!(reader.recv(timeout).unwrap(), Some("root> ".to_string()));
        assert!(matches!(
            reader.recv(timeout),
            Err(TransportError::Disconnected)
        ));
    }

    #[test]
    fn drain_discards_pending_lines() {
        let reader = LineReader::spawn(Cursor::new(b"a\nb\nc\n".to_vec()), "test");
        assert!(reader.recv(Duration::from_secs(2)).unwrap().is_some());

        // The thread may still be forwarding; keep draining until both arrived.
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut dropped = 0;
        while dropped < 2 && Instant::now() < deadline {
            dropped += reader.drain();
            std::thread::yield_now();
        }
        assert_eq!(dropped, 2);
        assert!(matches!(
            reader.recv(Duration::from_secs(2)),
            Err(TransportError::Disconnected)
        ));
    }

    #[test]
    fn dropping_reader_releases_silent_source() {
        let released = Arc::new(AtomicBool::new(false));
        let source = SilentLine {
            released: Arc::clone(&released),
        };
        let reader = LineReader::spawn(source, "test");
        assert_eq!(reader.recv(Duration::from_millis(20)).unwrap(), None);
        drop(reader);

        let deadline = Instant::now() + Duration::from_secs(2);
        while !released.load(Ordering::SeqCst) && Instant::now() < deadline {
            std::thread::yield_now();
        }
        assert!(released.load(Ordering::SeqCst));
    }
}
