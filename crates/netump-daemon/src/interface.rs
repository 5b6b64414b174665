/// Network interface lookup for the service announcement.
///
/// The announcement needs the hardware address (for the Product Instance
/// Identifier) and the IPv4 address (for the A record) of the same interface.

use std::net::{Ipv4Addr, SocketAddrV4};

use anyhow::anyhow;
use nix::ifaddrs::getifaddrs;
use nix::net::if_::InterfaceFlags;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub name: String,
    pub mac: [u8; 6],
    pub ipv4: Ipv4Addr,
}

/// Everything getifaddrs told us about one interface.
#[derive(Debug, Clone, Default)]
struct Candidate {
    name: String,
    up: bool,
    loopback: bool,
    mac: Option<[u8; 6]>,
    ipv4: Option<Ipv4Addr>,
}

fn collect_candidates() -> anyhow::Result<Vec<Candidate>> {
    let mut candidates: Vec<Candidate> = Vec::new();

    for ifaddr in getifaddrs()? {
        let idx = match candidates
            .iter()
            .position(|c| c.name == ifaddr.interface_name)
        {
            Some(idx) => idx,
            None => {
                candidates.push(Candidate {
                    name: ifaddr.interface_name.clone(),
                    ..Candidate::default()
                });
                candidates.len() - 1
            }
        };
        let candidate = &mut candidates[idx];
        candidate.up |= ifaddr.flags.contains(InterfaceFlags::IFF_UP);
        candidate.loopback |= ifaddr.flags.contains(InterfaceFlags::IFF_LOOPBACK);

        let Some(address) = ifaddr.address else {
            continue;
        };
        if let Some(mac) = address.as_link_addr().and_then(|link| link.addr()) {
            if mac != [0u8; 6] {
                candidate.mac = Some(mac);
            }
        }
        if let Some(sin) = address.as_sockaddr_in() {
            // First IPv4 address wins
            candidate
                .ipv4
                .get_or_insert(*SocketAddrV4::from(*sin).ip());
        }
    }

    Ok(candidates)
}

/// Pick the requested interface, or the first usable one.
fn select(candidates: Vec<Candidate>, requested: Option<&str>) -> Option<InterfaceInfo> {
    candidates
        .into_iter()
        .filter(|c| match requested {
            Some(name) => c.name == name,
            None => c.up && !c.loopback,
        })
        .find_map(|c| {
            Some(InterfaceInfo {
                mac: c.mac?,
                ipv4: c.ipv4?,
                name: c.name,
            })
        })
}

/// Resolve the primary interface (hardware address + IPv4 address).
pub fn resolve(requested: Option<&str>) -> anyhow::Result<InterfaceInfo> {
    let candidates = collect_candidates()?;
    debug!(count = candidates.len(), "Enumerated network interfaces");

    select(candidates, requested).ok_or_else(|| match requested {
        Some(name) => anyhow!("interface {name} has no hardware or IPv4 address"),
        None => anyhow!("no interface with both a hardware and an IPv4 address"),
    })
}

/// Short host name for the `.local` target, if the system has a usable one.
pub fn system_hostname() -> Option<String> {
    let raw = nix::unistd::gethostname().ok()?;
    let name = raw.to_string_lossy();
    let short = name.split('.').next().unwrap_or_default();

    if short.is_empty() || short == "localhost" {
        None
    } else {
        Some(short.to_string())
    }
}
