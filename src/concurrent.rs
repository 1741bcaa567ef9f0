use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};

/// Double-buffered background input prefetch.
///
/// A background thread fills owned chunks and hands them over a bounded
/// channel of depth 2, so the parsing thread drains one chunk while the
/// next is being filled. Chunks travel by ownership transfer: the consumer
/// returns drained chunks through a recycle channel, keeping the ring at
/// two allocations total.
///
/// Errors raised while filling are sent through the same channel and
/// re-raised from the consumer's next call that would otherwise block,
/// preserving the illusion of synchronous reading. Stopping is cooperative:
/// a shared flag is checked once per fill iteration and channel
/// disconnection unblocks any pending send or receive.
pub(crate) struct BackgroundReader {
    filled: Receiver<io::Result<Vec<u8>>>,
    recycle: Option<Sender<Vec<u8>>>,
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
    chunk_size: usize,
    eof: bool,
}

impl BackgroundReader {
    pub(crate) fn spawn<R>(mut source: R, chunk_size: usize) -> BackgroundReader
    where
        R: io::Read + Send + 'static,
    {
        let (filled_tx, filled_rx) = bounded::<io::Result<Vec<u8>>>(2);
        let (recycle_tx, recycle_rx) = bounded::<Vec<u8>>(2);
        let stop = Arc::new(AtomicBool::new(false));

        // Seed the ring with two empty chunks.
        for _ in 0..2 {
            recycle_tx
                .send(Vec::with_capacity(chunk_size))
                .expect("empty bounded(2) channel accepts two sends");
        }

        let thread_stop = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("flatfile-input".to_string())
            .spawn(move || {
                loop {
                    if thread_stop.load(Ordering::Relaxed) {
                        break;
                    }
                    let mut chunk = match recycle_rx.recv() {
                        Ok(chunk) => chunk,
                        // The consumer hung up; we are being stopped.
                        Err(_) => break,
                    };
                    chunk.resize(chunk_size, 0);
                    let filled = loop {
                        match source.read(&mut chunk) {
                            Ok(n) => break Ok(n),
                            Err(ref err)
                                if err.kind() == io::ErrorKind::Interrupted =>
                            {
                                if thread_stop.load(Ordering::Relaxed) {
                                    break Ok(0);
                                }
                            }
                            Err(err) => break Err(err),
                        }
                    };
                    match filled {
                        Ok(n) => {
                            chunk.truncate(n);
                            if filled_tx.send(Ok(chunk)).is_err() || n == 0 {
                                break;
                            }
                        }
                        Err(err) => {
                            let _ = filled_tx.send(Err(err));
                            break;
                        }
                    }
                }
            })
            .expect("failed to spawn input prefetch thread");

        BackgroundReader {
            filled: filled_rx,
            recycle: Some(recycle_tx),
            stop,
            handle: Some(handle),
            chunk_size,
            eof: false,
        }
    }

    /// Trade a drained chunk for the next filled one. Blocks only when the
    /// background thread has not finished filling. An empty chunk signals
    /// EOF; every call after that returns an empty chunk without blocking.
    pub(crate) fn next_chunk(&mut self, drained: Vec<u8>) -> io::Result<Vec<u8>> {
        if self.eof {
            return Ok(Vec::new());
        }
        if let Some(ref recycle) = self.recycle {
            // Only fails once the fill thread has exited; at that point the
            // filled channel holds the final chunk or error.
            let _ = recycle.send(drained);
        }
        match self.filled.recv() {
            Ok(Ok(chunk)) if chunk.is_empty() => {
                self.eof = true;
                Ok(Vec::new())
            }
            Ok(Ok(chunk)) => Ok(chunk),
            Ok(Err(err)) => {
                self.eof = true;
                Err(err)
            }
            // Disconnected without an EOF marker: stopped early.
            Err(_) => {
                self.eof = true;
                Ok(Vec::new())
            }
        }
    }

    pub(crate) fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Request the background thread to stop and wait for it to exit.
    ///
    /// Safe to call at any point, including concurrently with an in-flight
    /// fill and after EOF was already reached; never deadlocks and never
    /// surfaces a spurious error.
    pub(crate) fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        // Dropping the recycle sender unblocks a fill thread waiting for an
        // empty chunk; draining the filled channel unblocks one waiting to
        // hand over a full chunk.
        self.recycle = None;
        loop {
            match self.filled.try_recv() {
                Ok(_) => continue,
                Err(TryRecvError::Disconnected) => break,
                Err(TryRecvError::Empty) => {
                    if self
                        .handle
                        .as_ref()
                        .map_or(true, |handle| handle.is_finished())
                    {
                        break;
                    }
                    thread::yield_now();
                }
            }
        }
        if let Some(handle) = self.handle.take() {
            // The thread observed the stop flag or a closed channel.
            let _ = handle.join();
        }
        self.eof = true;
    }
}

impl Drop for BackgroundReader {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    struct FailAfter {
        remaining: usize,
    }

    impl io::Read for FailAfter {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.remaining == 0 {
                return Err(io::Error::new(io::ErrorKind::Other, "source died"));
            }
            let n = self.remaining.min(buf.len());
            buf[..n].fill(b'x');
            self.remaining -= n;
            Ok(n)
        }
    }

    fn drain(rdr: &mut BackgroundReader) -> io::Result<Vec<u8>> {
        let mut all = Vec::new();
        let mut chunk = Vec::new();
        loop {
            chunk = rdr.next_chunk(chunk)?;
            if chunk.is_empty() {
                return Ok(all);
            }
            all.extend_from_slice(&chunk);
        }
    }

    #[test]
    fn reads_everything_in_order() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let mut rdr = BackgroundReader::spawn(Cursor::new(data.clone()), 64);
        assert_eq!(drain(&mut rdr).unwrap(), data);
    }

    #[test]
    fn source_error_reaches_the_consumer() {
        let mut rdr = BackgroundReader::spawn(FailAfter { remaining: 100 }, 32);
        let err = drain(&mut rdr).unwrap_err();
        assert_eq!(err.to_string(), "source died");
        // Errors are terminal; subsequent calls act as EOF.
        assert!(rdr.next_chunk(Vec::new()).unwrap().is_empty());
    }

    #[test]
    fn stop_before_draining_does_not_deadlock() {
        let data = vec![b'a'; 1 << 20];
        let mut rdr = BackgroundReader::spawn(Cursor::new(data), 1024);
        let chunk = rdr.next_chunk(Vec::new()).unwrap();
        assert!(!chunk.is_empty());
        rdr.stop();
        assert!(rdr.next_chunk(chunk).unwrap().is_empty());
    }

    #[test]
    fn stop_after_eof_is_silent() {
        let mut rdr = BackgroundReader::spawn(Cursor::new(b"abc".to_vec()), 8);
        assert_eq!(drain(&mut rdr).unwrap(), b"abc");
        rdr.stop();
        rdr.stop();
        assert!(rdr.next_chunk(Vec::new()).unwrap().is_empty());
    }
}
