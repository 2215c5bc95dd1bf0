//! Terminal front-end: operator input and log rendering
//!
//! Stands in for a windowed front-end. Input grammar:
//! - plain text is sent as one G-code line
//! - `:list` shows the presets
//! - `:status` shows the connection state
//! - `:history` reprints the retained log
//! - `:<n>` fires preset `n` (1-based)
//! - `:quit`, `:q`, end of input or Ctrl+C close the session

use crate::config::CommandEntry;
use crate::log_sink::{CommandLog, Direction, LogLine, LogSink};
use crate::serial::Session;
use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use colored::{Color, Colorize};
use std::future::Future;
use std::io::BufRead;
use std::sync::Arc;
use std::thread;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinHandle;

/// One parsed line of operator input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Empty,
    Send(String),
    ListPresets,
    Status,
    History,
    Preset(usize),
    Quit,
    Unknown(String),
}

pub fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }

    let Some(directive) = line.strip_prefix(':') else {
        return Input::Send(line.to_string());
    };

    match directive.trim() {
        "list" | "l" => Input::ListPresets,
        "status" | "s" => Input::Status,
        "history" | "h" => Input::History,
        "quit" | "q" | "exit" => Input::Quit,
        other => match other.parse::<usize>() {
            Ok(n) if n > 0 => Input::Preset(n),
            _ => Input::Unknown(line.to_string()),
        },
    }
}

/// Map a preset color ("#rrggbb" or a color name) to a terminal color
pub fn terminal_color(spec: &str) -> Option<Color> {
    if let Some(hex) = spec.strip_prefix('#') {
        if hex.len() != 6 {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
        return Some(Color::TrueColor {
            r: channel(0)?,
            g: channel(2)?,
            b: channel(4)?,
        });
    }
    spec.parse().ok()
}

/// Render one log line with a local timestamp
pub fn format_line(line: &LogLine, at: DateTime<Local>) -> String {
    let timestamp = at.format("%H:%M:%S%.3f").to_string();
    let text = match line.direction {
        Direction::Sent => line.text.cyan().to_string(),
        Direction::Received if line.text.ends_with(": ok") => line.text.green().to_string(),
        Direction::Received => line.text.clone(),
        Direction::Error => line.text.red().bold().to_string(),
    };
    format!("{} {}", timestamp.dimmed(), text)
}

pub fn print_presets(presets: &[CommandEntry]) {
    if presets.is_empty() {
        println!("{}", "No presets configured".yellow());
        return;
    }

    println!("{}", "Presets:".white().bold());
    for (i, preset) in presets.iter().enumerate() {
        let label = format!(" {} ", preset.title);
        let label = match terminal_color(preset.color()) {
            Some(color) => label.black().on_color(color).to_string(),
            None => label,
        };
        println!(
            "  {} {} {}",
            format!(":{}", i + 1).cyan(),
            label,
            preset.command.lines().join(" | ").dimmed()
        );
    }
}

fn print_status(session: &Session, command_log: &CommandLog) {
    let config = session.config();
    let receiving = if session.is_receiving() {
        "receiving".green()
    } else {
        "receive loop stopped".red()
    };
    println!(
        "{}: {} @ {} baud, {}, {} log lines",
        "Status".cyan(),
        config.device_path.white(),
        config.baud_rate,
        receiving,
        command_log.len()
    );
}

/// Print every log line as it arrives until all senders are gone
pub fn spawn_renderer(mut rx: UnboundedReceiver<LogLine>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            println!("{}", format_line(&line, Local::now()));
        }
    })
}

/// Read stdin lines on a dedicated thread.
///
/// A blocked stdin read must not hold up runtime shutdown, so this stays off
/// the tokio blocking pool. The channel closes at end of input.
pub fn spawn_stdin_reader() -> UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    log::warn!("Failed to read operator input: {}", e);
                    break;
                }
            }
        }
    });
    rx
}

/// Dispatch operator input until quit, end of input, or `shutdown` resolves
pub async fn run<F>(
    session: Arc<Session>,
    presets: &[CommandEntry],
    command_log: Arc<CommandLog>,
    mut input: UnboundedReceiver<String>,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()>,
{
    println!("{}", "Enter G-code, :list for presets, :quit to exit".yellow());

    tokio::pin!(shutdown);

    loop {
        let line = tokio::select! {
            line = input.recv() => line,
            _ = &mut shutdown => None,
        };
        let Some(line) = line else { break };

        let lines = match parse_input(&line) {
            Input::Empty => continue,
            Input::Quit => break,
            Input::ListPresets => {
                print_presets(presets);
                continue;
            }
            Input::Status => {
                print_status(&session, &command_log);
                continue;
            }
            Input::History => {
                for line in command_log.lines() {
                    println!("{}", line);
                }
                continue;
            }
            Input::Unknown(text) => {
                command_log.append(LogLine::error(format!("unknown directive {}", text)));
                continue;
            }
            Input::Send(command) => vec![command],
            Input::Preset(n) => match presets.get(n - 1) {
                Some(preset) => preset.command.lines(),
                None => {
                    command_log.append(LogLine::error(format!("no preset :{}", n)));
                    continue;
                }
            },
        };

        let worker = Arc::clone(&session);
        let result = tokio::task::spawn_blocking(move || worker.send_sequence(&lines))
            .await
            .context("Send task failed")?;
        if let Err(e) = result {
            log::warn!("{}", e);
            command_log.append(LogLine::error(&e));
        }
    }

    tokio::task::spawn_blocking(move || session.close())
        .await
        .context("Close task failed")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CommandSpec, SessionConfig};
    use chrono::TimeZone;
    use std::io::{self, ErrorKind, Read, Write};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::oneshot;

    /// Device that never answers
    struct SilentDevice;

    impl Read for SilentDevice {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            thread::sleep(Duration::from_millis(10));
            Err(io::Error::new(ErrorKind::TimedOut, "timed out"))
        }
    }

    #[derive(Clone, Default)]
    struct SharedWriter(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn open_session() -> (Arc<Session>, Arc<CommandLog>, SharedWriter) {
        let writer = SharedWriter::default();
        let command_log = Arc::new(CommandLog::new());
        let config = SessionConfig {
            read_timeout: Duration::from_millis(10),
            ..Default::default()
        };
        let session =
            Session::from_channel(config, SilentDevice, writer.clone(), command_log.clone());
        (Arc::new(session), command_log, writer)
    }

    fn written(writer: &SharedWriter) -> String {
        String::from_utf8(writer.0.lock().unwrap().clone()).unwrap()
    }

    #[test]
    fn test_parse_plain_gcode() {
        assert_eq!(parse_input("  G1 X10 F3000 \n"), Input::Send("G1 X10 F3000".into()));
    }

    #[test]
    fn test_parse_directives() {
        assert_eq!(parse_input(""), Input::Empty);
        assert_eq!(parse_input("   "), Input::Empty);
        assert_eq!(parse_input(":list"), Input::ListPresets);
        assert_eq!(parse_input(": status"), Input::Status);
        assert_eq!(parse_input(":history"), Input::History);
        assert_eq!(parse_input(":q"), Input::Quit);
        assert_eq!(parse_input(":quit"), Input::Quit);
        assert_eq!(parse_input(":3"), Input::Preset(3));
        assert_eq!(parse_input(":0"), Input::Unknown(":0".into()));
        assert_eq!(parse_input(":home"), Input::Unknown(":home".into()));
    }

    #[test]
    fn test_terminal_color() {
        assert_eq!(
            terminal_color("#c0c0c0"),
            Some(Color::TrueColor {
                r: 0xc0,
                g: 0xc0,
                b: 0xc0
            })
        );
        assert_eq!(terminal_color("red"), Some(Color::Red));
        assert_eq!(terminal_color("#abc"), None);
        assert_eq!(terminal_color("#zzzzzz"), None);
    }

    #[test]
    fn test_format_line_keeps_text() {
        colored::control::set_override(false);
        let at = Local.with_ymd_and_hms(2024, 5, 1, 12, 30, 5).unwrap();

        let rendered = format_line(&LogLine::sent("G28"), at);
        assert_eq!(rendered, "12:30:05.000 Sent: G28");
    }

    #[tokio::test]
    async fn test_shutdown_exits_while_input_is_idle() {
        let (session, command_log, _writer) = open_session();
        // Sender kept alive: stdin is open but nobody is typing
        let (_input_tx, input_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let handle = {
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                run(session, &[], command_log, input_rx, async {
                    let _ = stop_rx.await;
                })
                .await
            })
        };

        stop_tx.send(()).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("console did not exit after shutdown");
        result.unwrap().unwrap();

        assert!(!session.is_receiving());
        assert!(matches!(
            session.send("M114"),
            Err(crate::error::SessionError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_input_dispatch_until_end_of_input() {
        let (session, command_log, writer) = open_session();
        let presets = vec![CommandEntry {
            title: "Preheat".to_string(),
            command: CommandSpec::Sequence(vec!["M104 S200".into(), "M140 S60".into()]),
            color: None,
        }];
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        for line in ["G28", "", ":1", ":9"] {
            input_tx.send(line.to_string()).unwrap();
        }
        drop(input_tx);

        let run_log = Arc::clone(&command_log);
        tokio::time::timeout(
            Duration::from_secs(2),
            run(Arc::clone(&session), &presets, run_log, input_rx, std::future::pending()),
        )
        .await
        .expect("console did not exit at end of input")
        .unwrap();

        assert_eq!(written(&writer), "G28\nM104 S200\nM140 S60\n");
        let texts: Vec<String> = command_log.lines().into_iter().map(|l| l.text).collect();
        assert_eq!(
            texts,
            vec![
                "Sent: G28",
                "Sent: M104 S200",
                "Sent: M140 S60",
                "Error: no preset :9"
            ]
        );
        assert!(!session.is_receiving());
    }
}
