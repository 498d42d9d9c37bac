//! Playback controls read from stdin, one command per line.
//!
//! | input            | event        |
//! |------------------|--------------|
//! | `p`, `pause`     | TogglePause  |
//! | `n`, `next`      | Next         |
//! | `b`, `prev`      | Previous     |
//! | `+`, `up`        | VolumeUp     |
//! | `-`, `down`      | VolumeDown   |
//! | `i`, `info`      | Info         |
//! | `q`, `quit`      | Quit         |

use std::io::BufRead;

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, unbounded};

pub const VOLUME_STEP: u8 = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlEvent {
    TogglePause,
    Next,
    Previous,
    VolumeUp,
    VolumeDown,
    Info,
    Quit,
}

impl ControlEvent {
    pub fn parse(line: &str) -> Option<Self> {
        let event = match line.trim().to_ascii_lowercase().as_str() {
            "p" | "pause" => ControlEvent::TogglePause,
            "n" | "next" => ControlEvent::Next,
            "b" | "prev" => ControlEvent::Previous,
            "+" | "up" => ControlEvent::VolumeUp,
            "-" | "down" => ControlEvent::VolumeDown,
            "i" | "info" => ControlEvent::Info,
            "q" | "quit" => ControlEvent::Quit,
            _ => return None,
        };
        Some(event)
    }
}

/// New volume after a volume event; other events leave it unchanged.
pub fn step_volume(current: u8, event: ControlEvent) -> u8 {
    match event {
        ControlEvent::VolumeUp => current.saturating_add(VOLUME_STEP).min(100),
        ControlEvent::VolumeDown => current.saturating_sub(VOLUME_STEP),
        _ => current,
    }
}

/// Spawn a thread that turns stdin lines into events. The channel closes at EOF.
pub fn spawn_stdin_reader() -> Result<Receiver<ControlEvent>> {
    let (tx, rx) = unbounded();
    std::thread::Builder::new()
        .name("controls".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let line = match line {
                    Ok(l) => l,
                    Err(e) => {
                        tracing::warn!("stdin read error: {e}");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                match ControlEvent::parse(&line) {
                    Some(event) => {
                        if tx.send(event).is_err() {
                            break;
                        }
                    }
                    None => tracing::info!(input = %line.trim(), "unknown command (p n b + - i q)"),
                }
            }
            tracing::debug!("control input closed");
        })
        .context("spawn control reader")?;
    Ok(rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_short_and_long_forms() {
        assert_eq!(ControlEvent::parse("p"), Some(ControlEvent::TogglePause));
        assert_eq!(ControlEvent::parse(" NEXT \n"), Some(ControlEvent::Next));
        assert_eq!(ControlEvent::parse("b"), Some(ControlEvent::Previous));
        assert_eq!(ControlEvent::parse("+"), Some(ControlEvent::VolumeUp));
        assert_eq!(ControlEvent::parse("down"), Some(ControlEvent::VolumeDown));
        assert_eq!(ControlEvent::parse("i"), Some(ControlEvent::Info));
        assert_eq!(ControlEvent::parse("quit"), Some(ControlEvent::Quit));
        assert_eq!(ControlEvent::parse("x"), None);
    }

    #[test]
    fn volume_steps_are_clamped() {
        assert_eq!(step_volume(50, ControlEvent::VolumeUp), 55);
        assert_eq!(step_volume(97, ControlEvent::VolumeUp), 100);
        assert_eq!(step_volume(3, ControlEvent::VolumeDown), 0);
        assert_eq!(step_volume(40, ControlEvent::VolumeDown), 35);
        assert_eq!(step_volume(250, ControlEvent::VolumeUp), 100);
        assert_eq!(step_volume(40, ControlEvent::Info), 40);
    }
}
