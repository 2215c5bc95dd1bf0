//! Serial command/response session
//!
//! A session owns one open device. Commands go out on the caller's thread;
//! a background thread polls the device and pushes every complete line it
//! receives into the log sink. The two directions use separate handles
//! (`try_clone`), so a send never waits on a pending read and vice versa.
//!
//! There is no request/response pairing: the device may answer with several
//! lines, emit unsolicited status, or say nothing at all.

use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};
use crate::log_sink::{LogLine, LogSink};
use crate::serial::port::open_port;
use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Pause between the lines of a multi-line preset, so the controller's
/// input buffer is not overrun
pub const SEQUENCE_DELAY: Duration = Duration::from_millis(100);

/// Back-off when a read returns no data without waiting for it
const IDLE_POLL: Duration = Duration::from_millis(10);

const READ_CHUNK: usize = 1024;

type Writer = Box<dyn Write + Send>;

/// Splits a byte stream into newline-terminated lines
///
/// Incomplete trailing data is held until its newline arrives. Lines are
/// decoded lossily and stripped of surrounding whitespace; blank lines are
/// dropped.
#[derive(Debug, Default)]
pub struct LineFramer {
    pending: Vec<u8>,
}

impl LineFramer {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim();
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }
        lines
    }

    /// Bytes received since the last newline
    #[cfg(test)]
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }
}

/// An open connection to one device
pub struct Session {
    config: SessionConfig,
    writer: Mutex<Option<Writer>>,
    running: Arc<AtomicBool>,
    receiver: Mutex<Option<JoinHandle<()>>>,
    sink: Arc<dyn LogSink>,
    sequence_delay: Duration,
}

impl Session {
    /// Open the configured serial device and start receiving
    pub fn open(config: SessionConfig, sink: Arc<dyn LogSink>) -> SessionResult<Self> {
        log::info!(
            "Initializing serial port {} : {}",
            config.device_path,
            config.baud_rate
        );

        let port = open_port(&config)?;
        let reader = port.try_clone().map_err(|source| SessionError::Connection {
            path: config.device_path.clone(),
            source,
        })?;

        Ok(Self::from_channel(config, reader, port, sink))
    }

    /// Build a session over an already-open channel.
    ///
    /// `reader` must return `ErrorKind::TimedOut` (or `WouldBlock`) when no
    /// data arrives within `config.read_timeout`; that bounds how quickly
    /// [`Session::close`] can stop the receive thread.
    pub fn from_channel<R, W>(
        config: SessionConfig,
        reader: R,
        writer: W,
        sink: Arc<dyn LogSink>,
    ) -> Self
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));

        let handle = {
            let running = Arc::clone(&running);
            let sink = Arc::clone(&sink);
            thread::spawn(move || receive_loop(reader, &running, &*sink))
        };

        Self {
            config,
            writer: Mutex::new(Some(Box::new(writer))),
            running,
            receiver: Mutex::new(Some(handle)),
            sink,
            sequence_delay: SEQUENCE_DELAY,
        }
    }

    /// Override the pause between lines of [`Session::send_sequence`]
    #[cfg(test)]
    pub fn with_sequence_delay(mut self, delay: Duration) -> Self {
        self.sequence_delay = delay;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Whether the background receive thread is still polling
    pub fn is_receiving(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Write `command` followed by a newline
    pub fn send(&self, command: &str) -> SessionResult<()> {
        let mut frame = String::with_capacity(command.len() + 1);
        frame.push_str(command);
        frame.push('\n');

        {
            let mut guard = self.lock_writer();
            let writer = guard.as_mut().ok_or(SessionError::Closed)?;
            writer
                .write_all(frame.as_bytes())
                .and_then(|_| writer.flush())
                .map_err(SessionError::Write)?;
        }

        log::debug!("Sent: {}", command);
        self.sink.append(LogLine::sent(command));
        Ok(())
    }

    /// Send each command in order, pausing between them.
    ///
    /// Stops at the first failed write; earlier lines stay sent.
    pub fn send_sequence<S: AsRef<str>>(&self, commands: &[S]) -> SessionResult<()> {
        for (i, command) in commands.iter().enumerate() {
            if i > 0 {
                thread::sleep(self.sequence_delay);
            }
            self.send(command.as_ref())?;
        }
        Ok(())
    }

    /// Stop the receive thread and release the device. Safe to call twice.
    pub fn close(&self) {
        self.running.store(false, Ordering::SeqCst);

        let handle = self
            .receiver
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::error!("Serial receive thread panicked");
            }
        }

        if self.lock_writer().take().is_some() {
            log::info!("Closed serial port {}", self.config.device_path);
        }
    }

    fn lock_writer(&self) -> MutexGuard<'_, Option<Writer>> {
        self.writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

/// Poll `reader` until `running` is cleared or the channel fails
fn receive_loop<R: Read>(mut reader: R, running: &AtomicBool, sink: &dyn LogSink) {
    log::debug!("Serial receive loop started");

    let mut framer = LineFramer::default();
    let mut buffer = [0u8; READ_CHUNK];

    while running.load(Ordering::SeqCst) {
        let started = Instant::now();
        match reader.read(&mut buffer) {
            Ok(0) => thread::sleep(IDLE_POLL),
            Ok(n) => {
                for line in framer.push(&buffer[..n]) {
                    log::debug!("Received: {}", line);
                    sink.append(LogLine::received(&line));
                }
            }
            Err(ref e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) =>
            {
                // A zero or near-zero timeout would otherwise spin
                if started.elapsed() < IDLE_POLL {
                    thread::sleep(IDLE_POLL);
                }
            }
            Err(e) => {
                let err = SessionError::Read(e);
                log::error!("{}", err);
                sink.append(LogLine::error(&err));
                break;
            }
        }
    }

    running.store(false, Ordering::SeqCst);
    log::debug!("Serial receive loop stopped");
}
