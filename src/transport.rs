//! Message links between a host and its workers.
//!
//! A [`Link`] is one end of a bidirectional channel of JSON frames. Two
//! ends made by [`Link::pair`] talk in-process; [`Link::over_tcp`] puts one
//! end on a socket, one frame per line.
//!
//! ```text
//! ExplorerNode ── Link ══ mpsc<Bytes> ══ Link ── ExplorerHub
//!                    └─ over_tcp: reader task / writer task ─┘
//! ```

use crate::error::{EngineError, Result};
use crate::protocol::{decode, encode};
use bytes::Bytes;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

/// Frames buffered per direction before `send` waits.
pub const LINK_BUFFER: usize = 256;

pub struct Link {
    peer: String,
    tx: mpsc::Sender<Bytes>,
    rx: mpsc::Receiver<Bytes>,
}

impl Link {
    /// Two connected in-process ends. `a` is the name `b` sees and the
    /// other way round.
    pub fn pair(a: impl Into<String>, b: impl Into<String>) -> (Link, Link) {
        let (a_tx, b_rx) = mpsc::channel(LINK_BUFFER);
        let (b_tx, a_rx) = mpsc::channel(LINK_BUFFER);
        (
            Link {
                peer: b.into(),
                tx: a_tx,
                rx: a_rx,
            },
            Link {
                peer: a.into(),
                tx: b_tx,
                rx: b_rx,
            },
        )
    }

    /// Bridge a TCP stream: a reader task splits incoming lines into frames
    /// and a writer task appends `\n` to outgoing ones. Both stop when
    /// either side goes away.
    pub fn over_tcp(stream: TcpStream, peer: impl Into<String>) -> Link {
        let peer = peer.into();
        let (local, remote) = Link::pair("tcp", peer.clone());
        let Link {
            tx: to_local,
            rx: mut from_local,
            ..
        } = remote;
        let (read_half, mut write_half) = stream.into_split();

        let reader_peer = peer.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(read_half).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => {
                        if to_local.send(Bytes::from(line)).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Read from {} failed: {}", reader_peer, e);
                        break;
                    }
                }
            }
            debug!("TCP reader for {} closed", reader_peer);
        });

        tokio::spawn(async move {
            while let Some(frame) = from_local.recv().await {
                let written = async {
                    write_half.write_all(&frame).await?;
                    write_half.write_all(b"\n").await?;
                    write_half.flush().await
                }
                .await;
                if let Err(e) = written {
                    warn!("Write to {} failed: {}", peer, e);
                    break;
                }
            }
            debug!("TCP writer for {} closed", peer);
        });

        local
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub async fn send_bytes(&self, frame: Bytes) -> Result<()> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| EngineError::TransportDisconnected(self.peer.clone()))
    }

    pub async fn send<T: Serialize>(&self, msg: &T) -> Result<()> {
        self.send_bytes(Bytes::from(encode(msg)?)).await
    }

    /// Next frame. `None` once the other end is gone.
    pub async fn recv_bytes(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Next decoded message. `Some(Err(Codec))` for a malformed frame, which
    /// the caller is expected to log and skip.
    pub async fn recv<T: DeserializeOwned>(&mut self) -> Option<Result<T>> {
        let frame = self.rx.recv().await?;
        Some(decode(&frame).map_err(EngineError::from))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link").field("peer", &self.peer).finish()
    }
}
