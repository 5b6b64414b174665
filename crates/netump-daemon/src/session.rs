/// UDP link to the Network UMP peer.
///
/// Carries UMP Data commands only. Invitation, ping and teardown belong to
/// the session layer; their commands are skipped by the decoder. The peer is
/// either configured up front or learned from the first valid datagram.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use anyhow::Context;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use netump_protocol::endpoint::UmpSink;
use netump_protocol::netump::{encode_ump_data, SIGNATURE};

/// Flush before a datagram grows past a typical Ethernet payload.
const MAX_DATAGRAM_BYTES: usize = 1400;

pub struct UmpLink {
    socket: UdpSocket,
    peer: Option<SocketAddr>,
    sequence: u16,
    tx_buf: Vec<u8>,
    datagrams_sent: u64,
}

impl UmpLink {
    pub async fn bind(local_port: u16, peer: Option<SocketAddr>) -> anyhow::Result<Self> {
        let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, local_port);
        let socket = UdpSocket::bind(addr)
            .await
            .with_context(|| format!("Failed to bind Network UMP port {local_port}"))?;

        Ok(Self {
            socket,
            peer,
            sequence: 0,
            tx_buf: Vec::with_capacity(MAX_DATAGRAM_BYTES + 64),
            datagrams_sent: 0,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn datagrams_sent(&self) -> u64 {
        self.datagrams_sent
    }

    pub async fn recv(&self, buf: &mut [u8]) -> std::io::Result<(usize, SocketAddr)> {
        self.socket.recv_from(buf).await
    }

    /// Whether a datagram from `src` belongs to our session. The first
    /// sender becomes the peer when none is configured.
    pub fn accept_from(&mut self, src: SocketAddr) -> bool {
        match self.peer {
            Some(peer) => peer == src,
            None => {
                info!(peer = %src, "Network UMP peer learned");
                self.peer = Some(src);
                true
            }
        }
    }

    /// Queue one UMP packet for the peer.
    pub fn queue_words(&mut self, words: &[u32]) {
        if self.tx_buf.len() + 4 + words.len() * 4 > MAX_DATAGRAM_BYTES {
            self.flush();
        }
        encode_ump_data(&mut self.tx_buf, self.sequence, words);
        self.sequence = self.sequence.wrapping_add(1);
    }

    /// Send whatever is queued as one datagram.
    pub fn flush(&mut self) {
        if self.tx_buf.len() <= SIGNATURE.len() {
            self.tx_buf.clear();
            return;
        }

        match self.peer {
            Some(peer) => match self.socket.try_send_to(&self.tx_buf, peer) {
                Ok(_) => self.datagrams_sent += 1,
                Err(e) => warn!(peer = %peer, "Network UMP send failed: {}", e),
            },
            None => debug!(bytes = self.tx_buf.len(), "No peer yet, dropping outbound UMP"),
        }
        self.tx_buf.clear();
    }
}

impl UmpSink for UmpLink {
    fn send_ump(&mut self, message: &[u32; 4]) {
        self.queue_words(message);
    }
}
