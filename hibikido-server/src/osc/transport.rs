//! OSC datagram transport
//!
//! Two UDP sockets: one listening for inbound command messages, one
//! sending outbound messages to the configured peer. Inbound datagrams are
//! decoded and parsed into typed commands on a dedicated task; outbound
//! messages are serialized from a channel so producers (including the
//! orchestrator's manifest callback) never block on the network.

use std::net::SocketAddr;

use hibikido_common::config::TransportConfig;
use rosc::{OscMessage, OscPacket, OscType};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::command::{self, Command};
use crate::orchestrator::Announcement;

/// Seven non-negative integers reported by `stats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub recordings: usize,
    pub segments: usize,
    pub effects: usize,
    pub presets: usize,
    pub embeddings: usize,
    pub active_niches: usize,
    pub queued: usize,
}

/// Outbound messages to the control peer.
#[derive(Debug, Clone)]
pub enum Outbound {
    Manifest(Announcement),
    Niche {
        segment_id: u64,
        bark_raw: Vec<f32>,
    },
    Confirm(String),
    Error(String),
    StatsResult(StatsSnapshot),
    SegmentField {
        id: u64,
        field_path: String,
        value: String,
    },
}

pub struct OscTransport {
    outbound: mpsc::UnboundedSender<Outbound>,
    listen_addr: SocketAddr,
}

impl OscTransport {
    /// Bind both sockets and start the inbound/outbound tasks. Returns the
    /// transport handle and the stream of parsed inbound commands.
    pub async fn spawn(
        config: &TransportConfig,
    ) -> anyhow::Result<(Self, mpsc::Receiver<Command>)> {
        let listen_socket = UdpSocket::bind(config.listen_addr()?).await?;
        let listen_addr = listen_socket.local_addr()?;
        let send_addr = config.send_addr()?;
        let send_socket = UdpSocket::bind(("0.0.0.0", 0)).await?;

        info!(listen = %listen_addr, send = %send_addr, "transport bound");

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Outbound>();
        let (command_tx, command_rx) = mpsc::channel::<Command>(128);

        // Outbound: serialize and send datagrams to the peer
        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let packet = OscPacket::Message(encode(&message));
                match rosc::encoder::encode(&packet) {
                    Ok(bytes) => {
                        if let Err(e) = send_socket.send_to(&bytes, send_addr).await {
                            warn!(error = %e, "failed to send outbound message");
                        }
                    }
                    Err(e) => error!(error = %e, "failed to encode outbound message"),
                }
            }
        });

        // Inbound: decode datagrams, parse commands, forward to dispatch
        let errors_tx = outbound_tx.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 65_536];
            loop {
                let (len, peer) = match listen_socket.recv_from(&mut buf).await {
                    Ok(received) => received,
                    Err(e) => {
                        error!(error = %e, "inbound socket error");
                        break;
                    }
                };
                let packet = match rosc::decoder::decode_udp(&buf[..len]) {
                    Ok((_, packet)) => packet,
                    Err(e) => {
                        debug!(error = %e, %peer, "undecodable datagram");
                        let _ = errors_tx.send(Outbound::Error("malformed OSC packet".into()));
                        continue;
                    }
                };
                let mut messages = Vec::new();
                flatten(packet, &mut messages);
                for msg in messages {
                    match command::parse(&msg) {
                        Ok(cmd) => {
                            if command_tx.send(cmd).await.is_err() {
                                return; // dispatcher gone, shut down
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, addr = %msg.addr, "rejected command");
                            let _ = errors_tx.send(Outbound::Error(e.to_string()));
                        }
                    }
                }
            }
        });

        Ok((
            Self {
                outbound: outbound_tx,
                listen_addr,
            },
            command_rx,
        ))
    }

    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    /// Channel end used by handlers and the manifest callback.
    pub fn sender(&self) -> mpsc::UnboundedSender<Outbound> {
        self.outbound.clone()
    }
}

fn flatten(packet: OscPacket, out: &mut Vec<OscMessage>) {
    match packet {
        OscPacket::Message(msg) => out.push(msg),
        OscPacket::Bundle(bundle) => {
            for inner in bundle.content {
                flatten(inner, out);
            }
        }
    }
}

/// Serialize an outbound message. Argument order is the wire contract.
pub fn encode(message: &Outbound) -> OscMessage {
    match message {
        Outbound::Manifest(a) => OscMessage {
            addr: "/manifest".to_string(),
            args: vec![
                OscType::Int(a.index as i32),
                OscType::String(a.collection.clone()),
                OscType::Float(a.score),
                OscType::String(a.path.clone()),
                OscType::String(a.description.clone()),
                OscType::Float(a.start as f32),
                OscType::Float(a.end as f32),
                OscType::String(a.metadata_json.clone()),
            ],
        },
        Outbound::Niche {
            segment_id,
            bark_raw,
        } => {
            let mut args = vec![OscType::String(segment_id.to_string())];
            args.extend(bark_raw.iter().map(|&v| OscType::Float(v)));
            OscMessage {
                addr: "/niche".to_string(),
                args,
            }
        }
        Outbound::Confirm(text) => OscMessage {
            addr: "/confirm".to_string(),
            args: vec![OscType::String(text.clone())],
        },
        Outbound::Error(text) => OscMessage {
            addr: "/error".to_string(),
            args: vec![OscType::String(text.clone())],
        },
        Outbound::StatsResult(s) => OscMessage {
            addr: "/stats_result".to_string(),
            args: vec![
                OscType::Int(s.recordings as i32),
                OscType::Int(s.segments as i32),
                OscType::Int(s.effects as i32),
                OscType::Int(s.presets as i32),
                OscType::Int(s.embeddings as i32),
                OscType::Int(s.active_niches as i32),
                OscType::Int(s.queued as i32),
            ],
        },
        Outbound::SegmentField {
            id,
            field_path,
            value,
        } => OscMessage {
            addr: "/segment_field".to_string(),
            args: vec![
                OscType::Int(*id as i32),
                OscType::String(field_path.clone()),
                OscType::String(value.clone()),
            ],
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn announcement() -> Announcement {
        Announcement {
            index: 0,
            collection: "segments".to_string(),
            score: 0.91,
            path: "test/sine_440.wav".to_string(),
            description: "atmospheric drone".to_string(),
            start: 0.0,
            end: 1.0,
            metadata_json: r#"{"segment_id":"1"}"#.to_string(),
            segment_id: 1,
            bark_raw: vec![0.5; 24],
            bark_norm: 2.45,
            duration: 2.0,
        }
    }

    #[test]
    fn manifest_wire_shape() {
        let msg = encode(&Outbound::Manifest(announcement()));
        assert_eq!(msg.addr, "/manifest");
        assert_eq!(msg.args.len(), 8);
        assert_eq!(msg.args[0], OscType::Int(0));
        assert_eq!(msg.args[1], OscType::String("segments".into()));
        assert_eq!(msg.args[3], OscType::String("test/sine_440.wav".into()));
        assert_eq!(msg.args[7], OscType::String(r#"{"segment_id":"1"}"#.into()));
    }

    #[test]
    fn stats_result_is_seven_ints() {
        let msg = encode(&Outbound::StatsResult(StatsSnapshot {
            recordings: 1,
            segments: 1,
            effects: 0,
            presets: 0,
            embeddings: 1,
            active_niches: 0,
            queued: 0,
        }));
        assert_eq!(msg.addr, "/stats_result");
        assert_eq!(msg.args.len(), 7);
        assert!(msg.args.iter().all(|a| matches!(a, OscType::Int(_))));
        assert_eq!(msg.args[0], OscType::Int(1));
    }

    #[test]
    fn niche_carries_id_and_24_bands() {
        let msg = encode(&Outbound::Niche {
            segment_id: 3,
            bark_raw: vec![0.1; 24],
        });
        assert_eq!(msg.addr, "/niche");
        assert_eq!(msg.args.len(), 25);
        assert_eq!(msg.args[0], OscType::String("3".into()));
    }

    #[tokio::test]
    async fn loopback_round_trip() {
        // Peer socket the transport will send to
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer_addr = peer.local_addr().unwrap();

        let config = TransportConfig {
            listen_ip: "127.0.0.1".to_string(),
            listen_port: 0,
            send_ip: "127.0.0.1".to_string(),
            send_port: peer_addr.port(),
        };
        let (transport, mut commands) = OscTransport::spawn(&config).await.unwrap();

        // Inbound: client → server
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let packet = OscPacket::Message(OscMessage {
            addr: "/invoke".to_string(),
            args: vec![OscType::String("atmospheric".into())],
        });
        client
            .send_to(&rosc::encoder::encode(&packet).unwrap(), transport.listen_addr())
            .await
            .unwrap();
        let cmd = tokio::time::timeout(std::time::Duration::from_secs(2), commands.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            cmd,
            Command::Invoke {
                text: "atmospheric".into()
            }
        );

        // Outbound: server → peer
        transport
            .sender()
            .send(Outbound::Confirm("hibikido_server_ready".into()))
            .unwrap();
        let mut buf = vec![0u8; 4096];
        let (len, _) = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            peer.recv_from(&mut buf),
        )
        .await
        .unwrap()
        .unwrap();
        let (_, received) = rosc::decoder::decode_udp(&buf[..len]).unwrap();
        match received {
            OscPacket::Message(msg) => {
                assert_eq!(msg.addr, "/confirm");
                assert_eq!(
                    msg.args[0],
                    OscType::String("hibikido_server_ready".into())
                );
            }
            other => panic!("unexpected packet: {other:?}"),
        }
    }

    #[tokio::test]
    async fn bad_command_produces_error_reply() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer_addr = peer.local_addr().unwrap();

        let config = TransportConfig {
            listen_ip: "127.0.0.1".to_string(),
            listen_port: 0,
            send_ip: "127.0.0.1".to_string(),
            send_port: peer_addr.port(),
        };
        let (transport, _commands) = OscTransport::spawn(&config).await.unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let packet = OscPacket::Message(OscMessage {
            addr: "/no_such_command".to_string(),
            args: vec![],
        });
        client
            .send_to(&rosc::encoder::encode(&packet).unwrap(), transport.listen_addr())
            .await
            .unwrap();

        let mut buf = vec![0u8; 4096];
        let (len, _) = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            peer.recv_from(&mut buf),
        )
        .await
        .unwrap()
        .unwrap();
        let (_, received) = rosc::decoder::decode_udp(&buf[..len]).unwrap();
        match received {
            OscPacket::Message(msg) => assert_eq!(msg.addr, "/error"),
            other => panic!("unexpected packet: {other:?}"),
        }
    }
}
