/// Periodic DNS-SD announcement of this endpoint.
///
/// The packet is built once at initialization and sent unchanged on every
/// broadcast. Sends are fire-and-forget: the next scheduled broadcast is the
/// retry.

use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};

use anyhow::Context;
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info, warn};

use netump_protocol::mdns::{ProductInstanceId, ServiceAnnouncement, MDNS_DEST};

use crate::interface::InterfaceInfo;

/// mDNS packets are sent with IP TTL 255.
const MDNS_MULTICAST_TTL: u32 = 255;

/// Create the sending socket, multicasting out of `interface`.
fn create_announce_socket(interface: Ipv4Addr) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_multicast_if_v4(&interface)?;
    socket.set_multicast_ttl_v4(MDNS_MULTICAST_TTL)?;
    socket.set_multicast_loop_v4(true)?;

    // Ephemeral source port: this socket only sends
    let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0);
    socket.bind(&addr.into())?;
    socket.set_nonblocking(true)?;

    Ok(socket.into())
}

pub struct ServiceAnnouncer {
    socket: Option<UdpSocket>,
    packet: Vec<u8>,
    dest: SocketAddrV4,
}

impl ServiceAnnouncer {
    /// Build the announcement for `interface` and open the socket.
    pub fn initialize(
        interface: &InterfaceInfo,
        endpoint_name: &str,
        hostname: &str,
        port: u16,
    ) -> anyhow::Result<Self> {
        let announcement = ServiceAnnouncement {
            instance_id: ProductInstanceId::from_mac(interface.mac),
            endpoint_name: endpoint_name.to_string(),
            target_host: ServiceAnnouncement::host_labels(&format!("{hostname}.local")),
            address: interface.ipv4,
            port,
        };
        let packet = announcement
            .encode()
            .context("Failed to encode mDNS announcement")?;

        let socket = create_announce_socket(interface.ipv4)
            .with_context(|| format!("Failed to open mDNS socket on {}", interface.name))?;

        info!(
            interface = %interface.name,
            address = %interface.ipv4,
            instance = %announcement.instance_id,
            target = %format!("{hostname}.local"),
            bytes = packet.len(),
            "mDNS announcement ready"
        );

        Ok(Self {
            socket: Some(socket),
            packet,
            dest: MDNS_DEST,
        })
    }

    /// Send to `dest` instead of the mDNS group.
    pub fn with_destination(mut self, dest: SocketAddrV4) -> Self {
        self.dest = dest;
        self
    }

    pub fn packet(&self) -> &[u8] {
        &self.packet
    }

    /// Send the stored packet once. Returns whether the datagram left.
    pub fn broadcast(&self) -> bool {
        let Some(socket) = &self.socket else {
            return false;
        };

        match socket.send_to(&self.packet, self.dest) {
            Ok(sent) => {
                debug!(dest = %self.dest, bytes = sent, "mDNS announcement sent");
                true
            }
            Err(e) => {
                warn!(dest = %self.dest, "mDNS announcement send failed: {}", e);
                false
            }
        }
    }

    /// Close the socket. Safe to call more than once.
    pub fn terminate(&mut self) {
        if self.socket.take().is_some() {
            debug!("mDNS socket closed");
        }
    }
}

impl Drop for ServiceAnnouncer {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn loopback() -> InterfaceInfo {
        InterfaceInfo {
            name: "lo".to_string(),
            mac: [0x02, 0x11, 0x22, 0x33, 0x44, 0x55],
            ipv4: Ipv4Addr::LOCALHOST,
        }
    }

    #[test]
    fn packet_carries_interface_identity() {
        let announcer = ServiceAnnouncer::initialize(&loopback(), "Zynthian NetUMP", "zynthian", 5504)
            .unwrap();
        let packet = announcer.packet();
        assert_eq!(&packet[packet.len() - 4..], &[127, 0, 0, 1]);
        assert!(packet
            .windows(17)
            .any(|w| w == b"ZYV5_021122334455"));
    }

    #[test]
    fn broadcast_twice_sends_identical_datagrams() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let dest = match receiver.local_addr().unwrap() {
            std::net::SocketAddr::V4(addr) => addr,
            other => panic!("unexpected address {other}"),
        };

        let announcer = ServiceAnnouncer::initialize(&loopback(), "Zynthian NetUMP", "zynthian", 5504)
            .unwrap()
            .with_destination(dest);

        assert!(announcer.broadcast());
        assert!(announcer.broadcast());

        let mut first = [0u8; 512];
        let mut second = [0u8; 512];
        let (n1, _) = receiver.recv_from(&mut first).unwrap();
        let (n2, _) = receiver.recv_from(&mut second).unwrap();
        assert_eq!(&first[..n1], announcer.packet());
        assert_eq!(&first[..n1], &second[..n2]);
    }

    #[test]
    fn terminate_is_idempotent() {
        let mut announcer =
            ServiceAnnouncer::initialize(&loopback(), "Zynthian NetUMP", "zynthian", 5504).unwrap();
        announcer.terminate();
        announcer.terminate();
        assert!(!announcer.broadcast());
    }
}
