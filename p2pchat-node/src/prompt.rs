//! Operator prompt: stdin lines to commands.

use p2pchat_core::target::split_message_line;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::warn;

use crate::app::LoopEvent;

pub const HELP: &str = "\
Commands:
  /handle <handle>        change your handle and tell every peer
  /handle                 show your handle
  /connect <ip:port>      connect to a peer
  /peers                  list known peers
  /help                   show this text
  <handle>#<fp> <text>    send <text> to the peer with fingerprint <fp>
                          (handle may be a prefix or empty)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SetHandle(String),
    ShowHandle,
    Connect(String),
    Peers,
    Help,
    Send { target: String, text: String },
    Empty,
}

pub fn parse_line(line: &str) -> Command {
    let line = line.trim_end_matches(&['\r', '\n'][..]);
    if line.trim().is_empty() {
        return Command::Empty;
    }
    if let Some(rest) = line.strip_prefix('/') {
        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (rest, ""),
        };
        return match (name, arg) {
            ("handle", "") => Command::ShowHandle,
            ("handle", h) => Command::SetHandle(h.to_string()),
            ("connect", "") => Command::Help,
            ("connect", addr) => Command::Connect(addr.to_string()),
            ("peers", _) => Command::Peers,
            _ => Command::Help,
        };
    }
    match split_message_line(line) {
        Some((target, text)) => Command::Send {
            target: target.to_string(),
            text: text.to_string(),
        },
        None => Command::Help,
    }
}

/// Forward stdin lines to the event loop until EOF.
pub async fn read_lines(events: mpsc::UnboundedSender<LoopEvent>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if events.send(LoopEvent::Line(line)).is_err() {
                    return;
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "stdin read failed");
                break;
            }
        }
    }
    let _ = events.send(LoopEvent::InputClosed);
}
