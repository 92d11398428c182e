use lofi_proto::protocol::{Broadcast, Command, Frame, Message};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// What the connection tasks report to the app loop.
#[derive(Debug)]
pub enum DaemonMessage {
    Broadcast(Broadcast),
    Disconnected(String),
}

/// Live link to the daemon: commands go out through `send_command`,
/// broadcasts arrive on the receiver handed out by `connect`.
pub struct DaemonConnection {
    cmd_tx: mpsc::Sender<Command>,
}

impl DaemonConnection {
    pub async fn connect(
        address: &str,
    ) -> anyhow::Result<(Self, mpsc::Receiver<DaemonMessage>)> {
        let stream = TcpStream::connect(address).await?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self::start(read_half, write_half))
    }

    fn start<R, W>(read_half: R, write_half: W) -> (Self, mpsc::Receiver<DaemonMessage>)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (msg_tx, msg_rx) = mpsc::channel(256);
        tokio::spawn(writer_task(write_half, cmd_rx));
        tokio::spawn(reader_task(read_half, msg_tx));
        (Self { cmd_tx }, msg_rx)
    }

    pub async fn send_command(&self, cmd: Command) -> anyhow::Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| anyhow::anyhow!("daemon connection closed"))
    }
}

async fn writer_task<W: AsyncWrite + Unpin>(mut writer: W, mut rx: mpsc::Receiver<Command>) {
    while let Some(cmd) = rx.recv().await {
        debug!("sending {:?}", cmd);
        let encoded = match Message::Command(cmd).encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("failed to encode command: {}", e);
                continue;
            }
        };
        if let Err(e) = writer.write_all(&encoded).await {
            warn!("write to daemon failed: {}", e);
            break;
        }
    }
}

async fn reader_task<R: AsyncRead + Unpin>(mut reader: R, tx: mpsc::Sender<DaemonMessage>) {
    let mut buf = vec![0u8; 4096];
    let mut read_buffer: Vec<u8> = Vec::with_capacity(4096);

    let reason = loop {
        match reader.read(&mut buf).await {
            Ok(0) => break "daemon closed the connection".to_string(),
            Ok(n) => {
                read_buffer.extend_from_slice(&buf[..n]);
                // A single read may carry several frames, or part of one.
                loop {
                    match Message::next_frame(&read_buffer) {
                        Ok(Frame::Incomplete) => break,
                        Ok(Frame::Message(msg, consumed)) => {
                            read_buffer.drain(..consumed);
                            if let Message::Broadcast(b) = msg {
                                if tx.send(DaemonMessage::Broadcast(b)).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Ok(Frame::Malformed { consumed, reason }) => {
                            read_buffer.drain(..consumed);
                            warn!("skipping unreadable frame from daemon: {}", reason);
                        }
                        Err(e) => {
                            let _ = tx.send(DaemonMessage::Disconnected(e.to_string())).await;
                            return;
                        }
                    }
                }
            }
            Err(e) => break format!("read error: {}", e),
        }
    };
    let _ = tx.send(DaemonMessage::Disconnected(reason)).await;
}
