//! Calibration commands and the sources they arrive from
//!
//! The driver polls a [`CommandSource`] once per iteration without blocking.
//! Commands are produced by an operator key thread or a line-based TCP
//! control listener, both of which feed the same tokio channel.

use std::collections::VecDeque;
use std::io::{self, BufRead, IsTerminal, Write};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::types::GeoCoordinate;

/// Operator request handled at the top of a driver iteration
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CalibrationCommand {
    /// Capture the current pose with the configured strategy
    Calibrate,
    /// Capture the current pose and map it onto the given location
    CalibrateTo(GeoCoordinate),
    /// Drop the calibration and start over
    Reset,
    ToggleSmoothing,
}

/// Non-blocking source of calibration commands
pub trait CommandSource {
    fn poll_command(&mut self) -> Option<CalibrationCommand>;
}

impl CommandSource for mpsc::UnboundedReceiver<CalibrationCommand> {
    fn poll_command(&mut self) -> Option<CalibrationCommand> {
        self.try_recv().ok()
    }
}

impl CommandSource for mpsc::Receiver<CalibrationCommand> {
    fn poll_command(&mut self) -> Option<CalibrationCommand> {
        self.try_recv().ok()
    }
}

impl CommandSource for VecDeque<CalibrationCommand> {
    fn poll_command(&mut self) -> Option<CalibrationCommand> {
        self.pop_front()
    }
}

/// A command source that never produces anything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCommands;

impl CommandSource for NoCommands {
    fn poll_command(&mut self) -> Option<CalibrationCommand> {
        None
    }
}

/// A parsed operator input line
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlInput {
    Command(CalibrationCommand),
    Quit,
}

/// Parses one line of operator input
///
/// Accepts single keys (`c`, `r`, `s`, `q`) and words (`calibrate`,
/// `calibrate <lat> <lon>`, `reset`, `smooth`, `quit`).
///
/// # Example
/// ```
/// use globe_coords::control::{parse_command, CalibrationCommand, ControlInput};
/// use globe_coords::GeoCoordinate;
///
/// assert_eq!(
///     parse_command("calibrate 51.5 -0.1"),
///     Ok(ControlInput::Command(CalibrationCommand::CalibrateTo(GeoCoordinate::new(51.5, -0.1))))
/// );
/// assert!(parse_command("dance").is_err());
/// ```
pub fn parse_command(line: &str) -> Result<ControlInput, String> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Err("empty command".to_string());
    };
    let args: Vec<&str> = words.collect();

    let input = match (head.to_ascii_lowercase().as_str(), args.as_slice()) {
        ("c" | "calibrate", []) => ControlInput::Command(CalibrationCommand::Calibrate),
        ("c" | "calibrate", [lat, lon]) => {
            let latitude: f64 = lat.parse().map_err(|_| format!("bad latitude: {lat}"))?;
            let longitude: f64 = lon.parse().map_err(|_| format!("bad longitude: {lon}"))?;
            if !(-90.0..=90.0).contains(&latitude) || !longitude.is_finite() {
                return Err(format!("coordinate out of range: {lat} {lon}"));
            }
            ControlInput::Command(CalibrationCommand::CalibrateTo(GeoCoordinate::new(
                latitude, longitude,
            )))
        }
        ("r" | "reset", []) => ControlInput::Command(CalibrationCommand::Reset),
        ("s" | "smooth", []) => ControlInput::Command(CalibrationCommand::ToggleSmoothing),
        ("q" | "quit", []) => ControlInput::Quit,
        _ => return Err(format!("unrecognized command: {}", line.trim())),
    };
    Ok(input)
}

const KEY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Maps a terminal key press onto operator input
///
/// `c`, `r` and `s` are commands; `q`, Esc, Ctrl-C and Ctrl-D quit.
pub fn key_input(key: &KeyEvent) -> Option<ControlInput> {
    if key.kind != KeyEventKind::Press {
        return None;
    }
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        return matches!(key.code, KeyCode::Char('c' | 'd')).then_some(ControlInput::Quit);
    }
    match key.code {
        KeyCode::Char(c) if c.is_ascii_alphabetic() => parse_command(c.encode_utf8(&mut [0; 4])).ok(),
        KeyCode::Esc => Some(ControlInput::Quit),
        _ => None,
    }
}

/// Hands one input to the driver; `false` once the reader should stop
fn forward_input(
    input: ControlInput,
    commands: &mpsc::UnboundedSender<CalibrationCommand>,
    shutdown: &watch::Sender<bool>,
) -> bool {
    match input {
        ControlInput::Command(command) => {
            debug!(?command, "Operator command");
            commands.send(command).is_ok()
        }
        ControlInput::Quit => {
            info!("Quit requested");
            shutdown.send_replace(true);
            false
        }
    }
}

/// Forwards one command per line until EOF or quit
///
/// EOF only stops the reader, so the stream keeps running when stdin is not
/// a terminal.
pub fn read_lines<R: BufRead>(
    reader: R,
    commands: &mpsc::UnboundedSender<CalibrationCommand>,
    shutdown: &watch::Sender<bool>,
) {
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Failed to read stdin");
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match parse_command(&line) {
            Ok(input) => {
                if !forward_input(input, commands, shutdown) {
                    return;
                }
            }
            Err(e) => warn!(error = %e, "Ignoring input"),
        }
    }
    debug!("stdin closed");
}

/// Keeps the terminal in raw mode while alive
struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(RawModeGuard)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(e) = terminal::disable_raw_mode() {
            warn!(error = %e, "Failed to restore terminal");
        }
    }
}

fn read_keys(
    commands: mpsc::UnboundedSender<CalibrationCommand>,
    shutdown: Arc<watch::Sender<bool>>,
    _raw_mode: RawModeGuard,
) {
    while !*shutdown.borrow() {
        match event::poll(KEY_POLL_INTERVAL) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) => {
                warn!(error = %e, "Failed to poll terminal");
                return;
            }
        }
        let key = match event::read() {
            Ok(Event::Key(key)) => key,
            Ok(_) => continue,
            Err(e) => {
                warn!(error = %e, "Failed to read terminal");
                return;
            }
        };
        if let Some(input) = key_input(&key) {
            if !forward_input(input, &commands, &shutdown) {
                return;
            }
        }
    }
}

/// Handle on the operator input thread
pub struct KeyReader {
    handle: Option<thread::JoinHandle<()>>,
}

impl KeyReader {
    /// Waits for the key thread to notice shutdown and restore the terminal
    ///
    /// The line reader used when stdin is not a terminal is left detached,
    /// since it may be blocked in a read that never returns.
    pub fn join(self) {
        if let Some(handle) = self.handle {
            if handle.join().is_err() {
                warn!("Key reader thread panicked");
            }
        }
    }
}

/// Starts reading operator input on a dedicated thread
///
/// On a terminal each key acts on its own, without Enter. Otherwise stdin is
/// read one command per line. Blocking reads stay off the runtime, so they
/// never hold up process exit.
pub fn spawn_key_reader(
    commands: mpsc::UnboundedSender<CalibrationCommand>,
    shutdown: Arc<watch::Sender<bool>>,
) -> io::Result<KeyReader> {
    if io::stdin().is_terminal() {
        let raw_mode = RawModeGuard::enable()?;
        info!("Keys: c = calibrate, r = reset, s = toggle smoothing, q = quit");
        let handle = thread::Builder::new()
            .name("operator-keys".into())
            .spawn(move || read_keys(commands, shutdown, raw_mode))?;
        Ok(KeyReader {
            handle: Some(handle),
        })
    } else {
        info!("Commands: calibrate [lat lon], reset, smooth, quit (one per line)");
        thread::Builder::new()
            .name("operator-lines".into())
            .spawn(move || read_lines(io::stdin().lock(), &commands, &shutdown))?;
        Ok(KeyReader { handle: None })
    }
}

/// Writer that turns `\n` into `\r\n` for a terminal in raw mode
pub struct RawModeWriter<W> {
    inner: W,
}

impl<W: Write> RawModeWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }
}

impl<W: Write> Write for RawModeWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut start = 0;
        for (i, byte) in buf.iter().enumerate() {
            if *byte == b'\n' {
                self.inner.write_all(&buf[start..i])?;
                self.inner.write_all(b"\r\n")?;
                start = i + 1;
            }
        }
        self.inner.write_all(&buf[start..])?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Accepts control connections until shutdown
///
/// Each connection sends one command per line and gets `ok` or
/// `error: <reason>` back.
pub async fn serve_control(
    listener: TcpListener,
    commands: mpsc::UnboundedSender<CalibrationCommand>,
    mut shutdown: watch::Receiver<bool>,
) {
    if let Ok(address) = listener.local_addr() {
        info!(%address, "Control listener ready");
    }
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((socket, peer)) => {
                    debug!(%peer, "Control client connected");
                    tokio::spawn(handle_control_connection(socket, commands.clone()));
                }
                Err(e) => warn!(error = %e, "Control accept failed"),
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

async fn handle_control_connection(
    socket: TcpStream,
    commands: mpsc::UnboundedSender<CalibrationCommand>,
) {
    let (reader, mut writer) = socket.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        let reply = match parse_command(&line) {
            Ok(ControlInput::Command(command)) => match commands.send(command) {
                Ok(()) => {
                    info!(?command, "Control command received");
                    "ok\n".to_string()
                }
                Err(_) => "error: driver stopped\n".to_string(),
            },
            Ok(ControlInput::Quit) => "error: quit is only accepted on stdin\n".to_string(),
            Err(e) => format!("error: {e}\n"),
        };
        if writer.write_all(reply.as_bytes()).await.is_err() {
            break;
        }
    }
}
