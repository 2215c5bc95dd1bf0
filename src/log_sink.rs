//! Command log: the operator-visible record of sent and received lines
//!
//! Every producer (operator input, preset buttons, the background receive
//! loop) funnels through [`LogSink::append`]. [`CommandLog`] serializes
//! appends behind one lock, so subscribers observe lines in exactly the
//! order they were appended. Only the most recent [`HISTORY_LIMIT`] lines
//! are retained; subscribers see all of them.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

/// Lines kept for `:history`-style replay
pub const HISTORY_LIMIT: usize = 500;

/// Which way a log line travelled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Sent,
    Received,
    /// Write failures and the terminal read failure of the receive loop
    Error,
}

/// One entry in the command log. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub text: String,
    pub direction: Direction,
}

impl LogLine {
    pub fn sent(command: &str) -> Self {
        Self {
            text: format!("Sent: {}", command),
            direction: Direction::Sent,
        }
    }

    pub fn received(line: &str) -> Self {
        Self {
            text: format!("Received: {}", line),
            direction: Direction::Received,
        }
    }

    pub fn error(message: impl fmt::Display) -> Self {
        Self {
            text: format!("Error: {}", message),
            direction: Direction::Error,
        }
    }
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Destination for log lines
///
/// Must be callable concurrently from the receive loop and from whatever
/// handles operator actions.
pub trait LogSink: Send + Sync {
    fn append(&self, line: LogLine);
}

impl LogSink for tokio::sync::mpsc::UnboundedSender<LogLine> {
    fn append(&self, line: LogLine) {
        // Receiver gone means the display is shutting down
        let _ = self.send(line);
    }
}

type Subscriber = Box<dyn Fn(&LogLine) + Send + Sync>;

#[derive(Default)]
struct Inner {
    recent: VecDeque<LogLine>,
    total: usize,
    subscribers: Vec<Subscriber>,
}

/// Ordered command log with display subscriptions and bounded history
#[derive(Default)]
pub struct CommandLog {
    inner: Mutex<Inner>,
}

impl CommandLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback invoked for every line appended from now on.
    ///
    /// Callbacks run under the log lock and must not append themselves.
    pub fn on_log_line<F>(&self, callback: F)
    where
        F: Fn(&LogLine) + Send + Sync + 'static,
    {
        self.lock().subscribers.push(Box::new(callback));
    }

    /// Snapshot of the retained lines, oldest first
    pub fn lines(&self) -> Vec<LogLine> {
        self.lock().recent.iter().cloned().collect()
    }

    /// Number of lines appended since creation, including evicted ones
    pub fn len(&self) -> usize {
        self.lock().total
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panicking subscriber must not take the log down with it
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl LogSink for CommandLog {
    fn append(&self, line: LogLine) {
        let mut inner = self.lock();
        for subscriber in &inner.subscribers {
            subscriber(&line);
        }
        if inner.recent.len() == HISTORY_LIMIT {
            inner.recent.pop_front();
        }
        inner.recent.push_back(line);
        inner.total += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_line_constructors() {
        assert_eq!(LogLine::sent("G28").text, "Sent: G28");
        assert_eq!(LogLine::sent("G28").direction, Direction::Sent);
        assert_eq!(LogLine::received("ok").text, "Received: ok");
        assert_eq!(LogLine::received("ok").direction, Direction::Received);
        assert_eq!(LogLine::error("boom").direction, Direction::Error);
    }

    #[test]
    fn test_append_preserves_order() {
        let log = CommandLog::new();
        log.append(LogLine::sent("G28"));
        log.append(LogLine::received("ok"));
        log.append(LogLine::sent("M114"));

        let texts: Vec<String> = log.lines().into_iter().map(|l| l.text).collect();
        assert_eq!(texts, vec!["Sent: G28", "Received: ok", "Sent: M114"]);
    }

    #[test]
    fn test_subscribers_see_every_line_in_order() {
        let log = CommandLog::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        log.on_log_line(move |line| sink.lock().unwrap().push(line.text.clone()));

        log.append(LogLine::sent("G1 X10"));
        log.append(LogLine::received("ok"));

        assert_eq!(*seen.lock().unwrap(), vec!["Sent: G1 X10", "Received: ok"]);
    }

    #[test]
    fn test_concurrent_appends_are_not_lost() {
        let log = Arc::new(CommandLog::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let log = Arc::clone(&log);
                thread::spawn(move || {
                    for i in 0..100 {
                        log.append(LogLine::received(&format!("{}-{}", t, i)));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(log.len(), 400);
        // Per-producer order survives interleaving
        for t in 0..4 {
            let prefix = format!("Received: {}-", t);
            let indices: Vec<usize> = log
                .lines()
                .iter()
                .filter_map(|l| l.text.strip_prefix(&prefix))
                .map(|n| n.parse().unwrap())
                .collect();
            assert_eq!(indices, (0..100).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_history_is_bounded() {
        let log = CommandLog::new();
        for i in 0..HISTORY_LIMIT + 10 {
            log.append(LogLine::received(&format!("T:{}", i)));
        }

        let lines = log.lines();
        assert_eq!(lines.len(), HISTORY_LIMIT);
        assert_eq!(log.len(), HISTORY_LIMIT + 10);
        assert_eq!(lines[0].text, "Received: T:10");
        assert_eq!(
            lines[HISTORY_LIMIT - 1].text,
            format!("Received: T:{}", HISTORY_LIMIT + 9)
        );
    }

    #[tokio::test]
    async fn test_channel_sink_forwards_lines() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<LogLine>();
        tx.append(LogLine::sent("M105"));
        drop(tx);

        assert_eq!(rx.recv().await, Some(LogLine::sent("M105")));
        assert_eq!(rx.recv().await, None);
    }
}
