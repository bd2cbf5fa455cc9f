//! TCP transport: listener for inbound requests, one outbound connection per channel.
//!
//! Every connection carries length-prefixed frames (see `p2pchat_core::wire`). Inbound
//! connections receive requests and write replies in order; outbound channels write
//! requests and hand replies back to the event loop.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;

use p2pchat_core::wire::{frame_len, LEN_SIZE};
use p2pchat_core::{ChannelId, Endpoint, RpcError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::app::LoopEvent;

/// Read one whole frame, header included. `None` on clean EOF before a header.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut header = [0u8; LEN_SIZE];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = frame_len(header).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let mut frame = vec![0u8; LEN_SIZE + len];
    frame[..LEN_SIZE].copy_from_slice(&header);
    reader.read_exact(&mut frame[LEN_SIZE..]).await?;
    Ok(Some(frame))
}

pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &[u8]) -> io::Result<()> {
    writer.write_all(frame).await?;
    writer.flush().await
}

/// Accept inbound connections and serve each on its own task.
pub async fn accept_loop(listener: TcpListener, events: mpsc::UnboundedSender<LoopEvent>) {
    loop {
        match listener.accept().await {
            Ok((stream, from)) => {
                debug!(%from, "accepted connection");
                let events = events.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve_connection(stream, events).await {
                        debug!(%from, error = %e, "inbound connection closed");
                    }
                });
            }
            Err(e) => {
                warn!(error = %e, "accept failed, no longer listening");
                break;
            }
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    events: mpsc::UnboundedSender<LoopEvent>,
) -> io::Result<()> {
    let (mut reader, mut writer) = stream.into_split();
    while let Some(frame) = read_frame(&mut reader).await? {
        let (reply_tx, reply_rx) = oneshot::channel();
        if events
            .send(LoopEvent::Inbound {
                frame,
                reply: reply_tx,
            })
            .is_err()
        {
            break;
        }
        // Dropped sender: the request was unusable, hang up.
        let Ok(reply) = reply_rx.await else { break };
        write_frame(&mut writer, &reply).await?;
    }
    Ok(())
}

struct Outbound {
    frames: mpsc::UnboundedSender<Vec<u8>>,
    task: JoinHandle<()>,
}

/// Outbound connections, one per open channel.
#[derive(Default)]
pub struct Channels {
    open: HashMap<ChannelId, Outbound>,
}

impl Channels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.open.len()
    }

    /// Start connecting to `endpoint`. Frames sent before the connection is up are queued.
    pub fn open(
        &mut self,
        channel: ChannelId,
        endpoint: Endpoint,
        events: mpsc::UnboundedSender<LoopEvent>,
    ) {
        let (frames, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_channel(channel, endpoint, rx, events));
        if let Some(old) = self.open.insert(channel, Outbound { frames, task }) {
            old.task.abort();
        }
    }

    /// Queue `frame` on `channel`. False if the channel is not open.
    pub fn send(&self, channel: ChannelId, frame: Vec<u8>) -> bool {
        match self.open.get(&channel) {
            Some(out) => out.frames.send(frame).is_ok(),
            None => false,
        }
    }

    pub fn close(&mut self, channel: ChannelId) {
        if let Some(out) = self.open.remove(&channel) {
            debug!(%channel, "dropping connection");
            out.task.abort();
        }
    }

    pub fn close_all(&mut self) {
        for (_, out) in self.open.drain() {
            out.task.abort();
        }
    }
}

async fn run_channel(
    channel: ChannelId,
    endpoint: Endpoint,
    frames: mpsc::UnboundedReceiver<Vec<u8>>,
    events: mpsc::UnboundedSender<LoopEvent>,
) {
    let error = match drive_channel(channel, endpoint, frames, &events).await {
        Ok(()) => RpcError::Closed,
        Err(e) => RpcError::Transport(e.to_string()),
    };
    debug!(%channel, %endpoint, %error, "channel ended");
    let _ = events.send(LoopEvent::ChannelFailed { channel, error });
}

async fn drive_channel(
    channel: ChannelId,
    endpoint: Endpoint,
    mut frames: mpsc::UnboundedReceiver<Vec<u8>>,
    events: &mpsc::UnboundedSender<LoopEvent>,
) -> io::Result<()> {
    let stream = TcpStream::connect(SocketAddr::V4(endpoint.socket_addr())).await?;
    debug!(%channel, %endpoint, "connected");
    let (mut reader, mut writer) = stream.into_split();
    let writer_task = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            write_frame(&mut writer, &frame).await?;
        }
        Ok::<_, io::Error>(())
    });
    let writer_abort = writer_task.abort_handle();
    let reading = async {
        while let Some(frame) = read_frame(&mut reader).await? {
            if events.send(LoopEvent::Reply { channel, frame }).is_err() {
                break;
            }
        }
        Ok::<_, io::Error>(())
    };
    tokio::select! {
        read = reading => {
            writer_abort.abort();
            read
        }
        written = writer_task => match written {
            Ok(result) => result,
            Err(e) => Err(io::Error::new(io::ErrorKind::Other, e)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use p2pchat_core::{Action, ChatNode, Fingerprint, LocalIdentity};

    fn frame(payload: &[u8]) -> Vec<u8> {
        let mut out = (payload.len() as u32).to_le_bytes().to_vec();
        out.extend_from_slice(payload);
        out
    }

    /// Channel id and endpoint the core hands out for a peer at `port`.
    fn open_action(port: u16) -> (ChannelId, Endpoint) {
        let mut node = ChatNode::new(LocalIdentity::new(
            Fingerprint::new(1).unwrap(),
            "alice",
            "127.0.0.1:1".parse().unwrap(),
        ));
        node.track_peer("bob", 2, &format!("127.0.0.1:{port}"), false)
            .unwrap();
        match node.drain_actions().remove(0) {
            Action::OpenChannel { channel, endpoint } => (channel, endpoint),
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[tokio::test]
    async fn frames_cross_a_stream() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let sent = frame(b"hello there");
        write_frame(&mut a, &sent).await.unwrap();
        write_frame(&mut a, &frame(b"")).await.unwrap();
        drop(a);
        assert_eq!(read_frame(&mut b).await.unwrap(), Some(sent));
        assert_eq!(read_frame(&mut b).await.unwrap(), Some(frame(b"")));
        assert_eq!(read_frame(&mut b).await.unwrap(), None);
    }

    #[tokio::test]
    async fn truncated_and_oversized_frames() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let mut partial = frame(b"hello");
        partial.truncate(6);
        a.write_all(&partial).await.unwrap();
        drop(a);
        let err = read_frame(&mut b).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);

        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&u32::MAX.to_le_bytes()).await.unwrap();
        let err = read_frame(&mut b).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn request_and_reply_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(accept_loop(listener, tx.clone()));

        let (channel, endpoint) = open_action(port);
        let mut channels = Channels::new();
        channels.open(channel, endpoint, tx);
        assert!(channels.send(channel, frame(b"ping")));

        match rx.recv().await.unwrap() {
            LoopEvent::Inbound { frame: got, reply } => {
                assert_eq!(got, frame(b"ping"));
                reply.send(frame(b"pong")).unwrap();
            }
            other => panic!("unexpected event {other:?}"),
        }
        match rx.recv().await.unwrap() {
            LoopEvent::Reply { channel: c, frame: got } => {
                assert_eq!(c, channel);
                assert_eq!(got, frame(b"pong"));
            }
            other => panic!("unexpected event {other:?}"),
        }
        channels.close(channel);
        assert_eq!(channels.len(), 0);
        assert!(!channels.send(channel, frame(b"late")));
    }

    #[tokio::test]
    async fn refused_connection_fails_channel() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let (channel, endpoint) = open_action(port);
        let mut channels = Channels::new();
        channels.open(channel, endpoint, tx);
        match rx.recv().await.unwrap() {
            LoopEvent::ChannelFailed { channel: c, error } => {
                assert_eq!(c, channel);
                assert!(matches!(error, RpcError::Transport(_)));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
