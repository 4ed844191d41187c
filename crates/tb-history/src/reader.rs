// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

// Reader thread draining process output into a channel
//
// The thread only moves bytes. Decoding, sanitizing and flushing all happen
// on the receiving side so a slow display never backs up the process.

use std::io::Read;
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, trace};

/// Default read buffer size
pub const READ_BUFFER_SIZE: usize = 8192;

/// Events emitted by the reader thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderEvent {
    /// Raw bytes read from the source
    Data(Vec<u8>),
    /// Source reached end of stream
    Eof,
    /// Read failed or the thread panicked
    Error(String),
}

/// Spawn a thread that reads `source` until EOF or error.
///
/// The thread stops early if the receiver is dropped.
pub fn spawn_reader<R>(
    source: R,
    buffer_size: usize,
    tx: mpsc::UnboundedSender<ReaderEvent>,
) -> thread::JoinHandle<()>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let panic_tx = tx.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            read_loop(source, buffer_size.max(1), &tx)
        }));

        if let Err(panic) = result {
            error!("Reader thread panicked: {:?}", panic);
            let _ = panic_tx.send(ReaderEvent::Error(format!("reader thread panicked: {:?}", panic)));
        }
    })
}

fn read_loop<R: Read>(mut source: R, buffer_size: usize, tx: &mpsc::UnboundedSender<ReaderEvent>) {
    let mut buf = vec![0u8; buffer_size];
    debug!(buffer_size, "Reader thread started");

    loop {
        match source.read(&mut buf) {
            Ok(0) => {
                debug!("EOF on output source");
                let _ = tx.send(ReaderEvent::Eof);
                break;
            }
            Ok(n) => {
                trace!(bytes = n, "Read process output");
                if tx.send(ReaderEvent::Data(buf[..n].to_vec())).is_err() {
                    debug!("Receiver dropped, stopping reader thread");
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(10));
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => {
                error!(error = %e, "Output read error");
                let _ = tx.send(ReaderEvent::Error(format!("read error: {}", e)));
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Cursor};

    fn drain(mut rx: mpsc::UnboundedReceiver<ReaderEvent>) -> Vec<ReaderEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.blocking_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_reads_until_eof() {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = spawn_reader(Cursor::new(b"hello world".to_vec()), 4, tx);
        handle.join().unwrap();

        let events = drain(rx);
        let data: Vec<u8> = events
            .iter()
            .filter_map(|e| match e {
                ReaderEvent::Data(d) => Some(d.clone()),
                _ => None,
            })
            .flatten()
            .collect();
        assert_eq!(data, b"hello world");
        assert_eq!(events.last(), Some(&ReaderEvent::Eof));
    }

    struct Flaky {
        calls: usize,
    }

    impl Read for Flaky {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.calls += 1;
            match self.calls {
                1 => Err(io::ErrorKind::WouldBlock.into()),
                2 => {
                    buf[0] = b'x';
                    Ok(1)
                }
                _ => Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone")),
            }
        }
    }

    #[test]
    fn test_would_block_retries_and_error_is_reported() {
        let (tx, rx) = mpsc::unbounded_channel();
        spawn_reader(Flaky { calls: 0 }, 16, tx).join().unwrap();

        let events = drain(rx);
        assert_eq!(events[0], ReaderEvent::Data(b"x".to_vec()));
        assert!(matches!(&events[1], ReaderEvent::Error(msg) if msg.contains("gone")));
    }

    struct Exploding;

    impl Read for Exploding {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            panic!("source exploded");
        }
    }

    #[test]
    fn test_panic_becomes_error_event() {
        let (tx, rx) = mpsc::unbounded_channel();
        spawn_reader(Exploding, 16, tx).join().unwrap();

        let events = drain(rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], ReaderEvent::Error(msg) if msg.contains("panicked")));
    }
}
