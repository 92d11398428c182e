use crate::core::DaemonEvent;
use crate::BroadcastMessage;
use lofi_proto::protocol::{Broadcast, Frame, Message, PROTOCOL_VERSION};
use lofi_proto::state::StateManager;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

pub fn start_server(
    listener: TcpListener,
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<DaemonEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if let Ok(addr) = listener.local_addr() {
            info!("TCP server listening at {}", addr);
        }

        let mut client_id = 0usize;

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    client_id += 1;
                    let id = client_id;
                    info!("Client {} connected from {}", id, peer);

                    let sm = state_manager.clone();
                    let evt_tx = event_tx.clone();
                    let bcast_rx = broadcast_tx.subscribe();

                    tokio::spawn(async move {
                        let (read_half, write_half) = stream.into_split();
                        handle_client(read_half, write_half, sm, id, evt_tx, bcast_rx).await;
                        info!("Client {} disconnected", id);
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    })
}

async fn handle_client<R, W>(
    mut read_half: R,
    mut write_half: W,
    state_manager: Arc<StateManager>,
    client_id: usize,
    event_tx: mpsc::Sender<DaemonEvent>,
    mut broadcast_rx: broadcast::Receiver<BroadcastMessage>,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut tmp = [0u8; 4096];
    let mut read_buf: Vec<u8> = Vec::new();

    // Send Hello with current state snapshot on connect
    if let Ok(encoded) = encode_hello(&state_manager).await {
        if write_half.write_all(&encoded).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            result = read_half.read(&mut tmp) => {
                match result {
                    Ok(0) => {
                        info!("Client {} closed connection", client_id);
                        break;
                    }
                    Ok(n) => {
                        read_buf.extend_from_slice(&tmp[..n]);

                        loop {
                            match Message::next_frame(&read_buf) {
                                Ok(Frame::Incomplete) => break,
                                Ok(Frame::Message(Message::Command(cmd), consumed)) => {
                                    read_buf.drain(..consumed);
                                    info!("Client {} sent command: {:?}", client_id, cmd);

                                    if event_tx.send(DaemonEvent::ClientCommand(cmd)).await.is_err() {
                                        warn!("DaemonEvent channel closed");
                                        return;
                                    }
                                }
                                Ok(Frame::Message(_, consumed)) => {
                                    read_buf.drain(..consumed);
                                }
                                Ok(Frame::Malformed { consumed, reason }) => {
                                    read_buf.drain(..consumed);
                                    warn!("Client {} sent malformed frame: {}", client_id, reason);
                                    let reply = Message::Broadcast(Broadcast::Error {
                                        message: format!("malformed command: {}", reason),
                                    });
                                    if let Ok(encoded) = reply.encode() {
                                        if write_half.write_all(&encoded).await.is_err() {
                                            return;
                                        }
                                    }
                                }
                                Err(e) => {
                                    warn!("Client {}: {}, closing connection", client_id, e);
                                    return;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        error!("Read error from client {}: {}", client_id, e);
                        break;
                    }
                }
            }

            msg = broadcast_rx.recv() => {
                let encoded = match msg {
                    Ok(BroadcastMessage::StateUpdated) => encode_state(&state_manager).await,
                    Ok(BroadcastMessage::Notice(broadcast)) => Message::Broadcast(broadcast).encode(),
                    Ok(BroadcastMessage::Log(message)) => {
                        Message::Broadcast(Broadcast::Log { message }).encode()
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Client {} missed {} broadcast messages", client_id, n);
                        encode_state(&state_manager).await
                    }
                    Err(_) => break,
                };
                if let Ok(encoded) = encoded {
                    if write_half.write_all(&encoded).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
}

async fn encode_hello(state_manager: &StateManager) -> anyhow::Result<Vec<u8>> {
    let state = state_manager.get_state().await;
    Message::Broadcast(Broadcast::Hello {
        protocol_version: PROTOCOL_VERSION,
        state,
    })
    .encode()
}

async fn encode_state(state_manager: &StateManager) -> anyhow::Result<Vec<u8>> {
    let state = state_manager.get_state().await;
    Message::Broadcast(Broadcast::State { data: state }).encode()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lofi_proto::protocol::{Command, PlayerSnapshot};

    async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Message {
        let mut len = [0u8; 4];
        reader.read_exact(&mut len).await.unwrap();
        let mut body = vec![0u8; u32::from_be_bytes(len) as usize];
        reader.read_exact(&mut body).await.unwrap();
        let mut frame = len.to_vec();
        frame.extend_from_slice(&body);
        Message::decode(&frame).unwrap().0
    }

    #[tokio::test]
    async fn test_client_session() {
        let state_manager = Arc::new(StateManager::new(PlayerSnapshot {
            rev: 4,
            current_station: "jazz-vibes".into(),
            ..Default::default()
        }));
        let (event_tx, mut event_rx) = mpsc::channel(8);
        let (broadcast_tx, _) = broadcast::channel(8);

        let (client, server) = tokio::io::duplex(4096);
        let (server_read, server_write) = tokio::io::split(server);
        let bcast_rx = broadcast_tx.subscribe();
        let session = tokio::spawn(handle_client(
            server_read,
            server_write,
            state_manager,
            1,
            event_tx,
            bcast_rx,
        ));
        let (mut client_read, mut client_write) = tokio::io::split(client);

        match read_message(&mut client_read).await {
            Message::Broadcast(Broadcast::Hello {
                protocol_version,
                state,
            }) => {
                assert_eq!(protocol_version, PROTOCOL_VERSION);
                assert_eq!(state.rev, 4);
                assert_eq!(state.current_station, "jazz-vibes");
            }
            other => panic!("expected Hello, got {:?}", other),
        }

        // Two commands in one write, the second split across writes.
        let mut bytes = Message::Command(Command::SkipNext).encode().unwrap();
        let second = Message::Command(Command::SetVolume { level: 12 })
            .encode()
            .unwrap();
        bytes.extend_from_slice(&second[..3]);
        client_write.write_all(&bytes).await.unwrap();
        client_write.write_all(&second[3..]).await.unwrap();

        match event_rx.recv().await.unwrap() {
            DaemonEvent::ClientCommand(cmd) => assert_eq!(cmd, Command::SkipNext),
            other => panic!("unexpected event {:?}", other),
        }
        match event_rx.recv().await.unwrap() {
            DaemonEvent::ClientCommand(cmd) => assert_eq!(cmd, Command::SetVolume { level: 12 }),
            other => panic!("unexpected event {:?}", other),
        }

        broadcast_tx
            .send(BroadcastMessage::Notice(Broadcast::PlayingChanged { playing: true }))
            .unwrap();
        match read_message(&mut client_read).await {
            Message::Broadcast(Broadcast::PlayingChanged { playing }) => assert!(playing),
            other => panic!("expected PlayingChanged, got {:?}", other),
        }

        drop(client_write);
        drop(client_read);
        session.await.unwrap();
    }

    fn session(
        event_tx: mpsc::Sender<DaemonEvent>,
    ) -> (tokio::io::DuplexStream, tokio::task::JoinHandle<()>) {
        let state_manager = Arc::new(StateManager::new(PlayerSnapshot::default()));
        let (broadcast_tx, bcast_rx) = broadcast::channel(8);
        let (client, server) = tokio::io::duplex(4096);
        let (server_read, server_write) = tokio::io::split(server);
        let task = tokio::spawn(async move {
            let _keep_sender = broadcast_tx;
            handle_client(server_read, server_write, state_manager, 7, event_tx, bcast_rx).await
        });
        (client, task)
    }

    #[tokio::test]
    async fn test_malformed_frame_is_reported_and_skipped() {
        let (event_tx, mut event_rx) = mpsc::channel(8);
        let (mut client, _task) = session(event_tx);
        assert!(matches!(
            read_message(&mut client).await,
            Message::Broadcast(Broadcast::Hello { .. })
        ));

        let body = br#"{"cmd":"FutureCommand"}"#;
        let mut bytes = (body.len() as u32).to_be_bytes().to_vec();
        bytes.extend_from_slice(body);
        bytes.extend(Message::Command(Command::ToggleMute).encode().unwrap());
        client.write_all(&bytes).await.unwrap();

        match read_message(&mut client).await {
            Message::Broadcast(Broadcast::Error { message }) => {
                assert!(message.starts_with("malformed command"))
            }
            other => panic!("expected Error, got {:?}", other),
        }
        let event = tokio::time::timeout(std::time::Duration::from_secs(2), event_rx.recv())
            .await
            .expect("command after a malformed frame was dropped")
            .unwrap();
        match event {
            DaemonEvent::ClientCommand(cmd) => assert_eq!(cmd, Command::ToggleMute),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_oversized_frame_closes_session() {
        let (event_tx, mut event_rx) = mpsc::channel(8);
        let (mut client, task) = session(event_tx);
        read_message(&mut client).await;

        client.write_all(&[0xFF, 0xFF, 0xFF, 0xFF, b'{']).await.unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(2), task)
            .await
            .expect("session kept buffering an oversized frame")
            .unwrap();
        assert!(event_rx.try_recv().is_err());
    }
}
