use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};

use crate::error::{GlimmerError, GlimmerResult};

/// A normalized key press.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Key {
    Char(char),
    /// Ctrl-C; raw mode swallows the signal, so it arrives as a key event.
    Interrupt,
}

impl Key {
    /// Normalize a crossterm event. Key releases and non-character keys
    /// are dropped.
    fn from_event(event: &Event) -> Option<Key> {
        let Event::Key(key) = event else { return None };
        if key.kind == KeyEventKind::Release {
            return None;
        }
        match key.code {
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                Some(Key::Interrupt)
            }
            KeyCode::Char(c) => Some(Key::Char(c)),
            _ => None,
        }
    }
}

/// Shared stop flag between the engine and the reader thread.
#[derive(Clone, Debug, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// How long a blocking poll waits before re-checking the stop signal.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Background keyboard reader.
///
/// Holds the terminal in raw mode for its lifetime and forwards normalized
/// key presses over an unbounded channel. The engine polls the receiving
/// end once per tick; this thread never touches engine state.
pub struct InputReader {
    stop: StopSignal,
    thread: Option<JoinHandle<()>>,
}

impl InputReader {
    /// Enable raw mode and spawn the reader thread.
    ///
    /// Raw mode is restored by a guard owned by the thread, so restoration
    /// happens whether the read loop ends by stop request or by error.
    pub fn spawn() -> GlimmerResult<(InputReader, Receiver<Key>)> {
        enable_raw_mode().map_err(|e| GlimmerError::input(format!("enable raw mode: {e}")))?;
        let guard = RawModeGuard;

        let stop = StopSignal::new();
        let (tx, rx) = channel::unbounded();

        let thread_stop = stop.clone();
        let thread = thread::spawn(move || {
            let _guard = guard;
            if let Err(err) = read_loop(&tx, &thread_stop) {
                tracing::warn!("keyboard reader exited with error: {err}");
            }
        });

        Ok((
            InputReader {
                stop,
                thread: Some(thread),
            },
            rx,
        ))
    }

    /// Clonable handle the engine uses to stop the reader on quit.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Signal the thread and wait for it to restore the terminal and exit.
    pub fn join(mut self) {
        self.stop.request();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn read_loop(tx: &Sender<Key>, stop: &StopSignal) -> std::io::Result<()> {
    while !stop.is_requested() {
        if !event::poll(POLL_INTERVAL)? {
            continue;
        }
        if let Some(key) = Key::from_event(&event::read()?) {
            if tx.send(key).is_err() {
                // engine dropped the receiving end
                break;
            }
        }
    }
    Ok(())
}

struct RawModeGuard;

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
    }
}
