//! Event loop: sole owner of the [`ChatNode`]. Transport and prompt tasks feed it events;
//! it runs the node and carries out the actions the node asks for.

use std::future::Future;

use p2pchat_core::{Action, ChannelId, ChatNode, Notification, RpcError};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::prompt::{self, Command};
use crate::transport::Channels;

#[derive(Debug)]
pub enum LoopEvent {
    /// Operator input.
    Line(String),
    /// Stdin reached EOF.
    InputClosed,
    /// Request frame from an inbound connection; the encoded reply goes back on `reply`.
    Inbound {
        frame: Vec<u8>,
        reply: oneshot::Sender<Vec<u8>>,
    },
    /// Reply frame read from an outbound channel.
    Reply { channel: ChannelId, frame: Vec<u8> },
    ChannelFailed { channel: ChannelId, error: RpcError },
}

pub struct App {
    node: ChatNode,
    channels: Channels,
    events: mpsc::UnboundedSender<LoopEvent>,
}

impl App {
    pub fn new(node: ChatNode, events: mpsc::UnboundedSender<LoopEvent>) -> Self {
        Self {
            node,
            channels: Channels::new(),
            events,
        }
    }

    /// Run until stdin closes or `shutdown` resolves.
    pub async fn run<S>(
        mut self,
        mut events: mpsc::UnboundedReceiver<LoopEvent>,
        shutdown: S,
    ) -> anyhow::Result<()>
    where
        S: Future<Output = anyhow::Result<()>>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                signalled = &mut shutdown => {
                    signalled?;
                    info!("shutting down");
                    break;
                }
                event = events.recv() => match event {
                    Some(LoopEvent::InputClosed) | None => break,
                    Some(event) => self.handle(event),
                },
            }
            self.perform_actions();
        }
        debug!(connections = self.channels.len(), "closing connections");
        self.channels.close_all();
        Ok(())
    }

    fn handle(&mut self, event: LoopEvent) {
        match event {
            LoopEvent::Line(line) => self.command(prompt::parse_line(&line)),
            LoopEvent::InputClosed => {}
            LoopEvent::Inbound { frame, reply } => match self.node.on_inbound_frame(&frame) {
                Ok(bytes) => {
                    let _ = reply.send(bytes);
                }
                Err(e) => warn!(error = %e, "dropping inbound frame"),
            },
            LoopEvent::Reply { channel, frame } => {
                if let Err(e) = self.node.on_reply_frame(channel, &frame) {
                    warn!(%channel, error = %e, "bad reply frame");
                }
            }
            LoopEvent::ChannelFailed { channel, error } => {
                self.channels.close(channel);
                self.node.on_channel_failed(channel, error);
            }
        }
    }

    fn command(&mut self, command: Command) {
        match command {
            Command::Empty => {}
            Command::Help => println!("{}", prompt::HELP),
            Command::ShowHandle => println!("Your handle is {}", self.node.local().handle),
            Command::SetHandle(handle) => {
                if let Err(e) = self.node.change_local_handle(&handle) {
                    error!(error = %e, "Unable to change handle");
                }
            }
            Command::Connect(address) => {
                if let Err(e) = self.node.connect_peer(&address) {
                    error!(%address, error = %e, "Unable to connect");
                }
            }
            Command::Peers => self.list_peers(),
            Command::Send { target, text } => {
                let to = target.clone();
                let sent = self.node.send_message(&target, &text, move || {
                    info!(to = %to, "message delivered");
                });
                if let Err(e) = sent {
                    error!(to = %target, error = %e, "Unable to send message");
                }
            }
        }
    }

    fn list_peers(&self) {
        let mut any = false;
        for (_, peer) in self.node.peers() {
            any = true;
            match peer.fingerprint {
                Some(fp) => println!("  {}#{} at {}", peer.handle, fp, peer.address),
                None => println!("  (connecting) at {}", peer.address),
            }
        }
        if !any {
            println!("No peers yet. Use /connect <ip:port>.");
        }
    }

    /// Drain and execute node actions until it has nothing more to ask.
    fn perform_actions(&mut self) {
        loop {
            let actions = self.node.drain_actions();
            if actions.is_empty() {
                return;
            }
            for action in actions {
                match action {
                    Action::OpenChannel { channel, endpoint } => {
                        self.channels.open(channel, endpoint, self.events.clone())
                    }
                    Action::CloseChannel { channel } => self.channels.close(channel),
                    Action::SendFrame { channel, frame } => {
                        if !self.channels.send(channel, frame) {
                            self.node.on_channel_failed(channel, RpcError::Closed);
                        }
                    }
                    Action::Notify(note) => print_notification(&note),
                }
            }
        }
    }
}

fn print_notification(note: &Notification) {
    match note {
        Notification::MessageReceived {
            fingerprint,
            handle,
            text,
        } => println!(
            "{}#{} says: {}",
            handle.as_deref().unwrap_or("(unknown)"),
            fingerprint,
            text
        ),
        Notification::PeerConnected {
            fingerprint,
            handle,
            address,
        } => println!("{handle}#{fingerprint} connected from {address}"),
        Notification::PeerIdentified {
            fingerprint,
            handle,
            address,
        } => println!("Connected to {handle}#{fingerprint} at {address}"),
        Notification::HandleChanged {
            fingerprint,
            old,
            new,
        } => println!(
            "{}#{} is now known as {}",
            old.as_deref().unwrap_or("(unknown)"),
            fingerprint,
            new
        ),
    }
}
