//! Hand-built DNS-SD announcement for a `_midi2._udp.local` service.
//!
//! One response message: header, no questions, four answer records
//! (PTR, SRV, TXT, A). Names are written out in full every time; no
//! compression pointers are used.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};

/// mDNS multicast destination.
pub const MDNS_GROUP: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);
pub const MDNS_PORT: u16 = 5353;
pub const MDNS_DEST: SocketAddrV4 = SocketAddrV4::new(MDNS_GROUP, MDNS_PORT);

/// Service type labels: `_midi2._udp.local`.
pub const SERVICE_TYPE: [&str; 3] = ["_midi2", "_udp", "local"];

/// Default Network UMP port advertised in the SRV record.
pub const DEFAULT_NETUMP_PORT: u16 = 5504;

/// Largest announcement we build.
pub const MAX_PACKET_LEN: usize = 512;

// -- Record types and class --

pub const TYPE_A: u16 = 1;
pub const TYPE_PTR: u16 = 12;
pub const TYPE_TXT: u16 = 16;
pub const TYPE_SRV: u16 = 33;
pub const CLASS_IN: u16 = 1;

/// Response + Authoritative Answer.
pub const FLAGS_AUTHORITATIVE_RESPONSE: u16 = 0x8400;

// -- TTLs in seconds --

pub const TTL_PTR: u32 = 8 * 60 * 60;
pub const TTL_SRV: u32 = 120;
pub const TTL_TXT: u32 = 4500;
pub const TTL_A: u32 = 120;

pub const TXT_ENDPOINT_NAME_KEY: &str = "UMPEndpointName=";
pub const TXT_PRODUCT_INSTANCE_KEY: &str = "ProductInstanceId=";

/// Fixed prefix of every Product Instance Identifier.
pub const PRODUCT_INSTANCE_PREFIX: &[u8; 5] = b"ZYV5_";
pub const PRODUCT_INSTANCE_ID_LEN: usize = 17;

const MAX_LABEL_LEN: usize = 63;
const MAX_CHARACTER_STRING_LEN: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// Empty label or label longer than 63 bytes.
    InvalidLabel(String),
    /// TXT attribute longer than 255 bytes.
    TxtTooLong(usize),
    /// Finished packet would exceed `MAX_PACKET_LEN`.
    PacketTooLarge(usize),
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodeError::InvalidLabel(label) => write!(f, "invalid DNS label {label:?}"),
            EncodeError::TxtTooLong(len) => write!(f, "TXT attribute of {len} bytes exceeds 255"),
            EncodeError::PacketTooLarge(len) => {
                write!(f, "announcement of {len} bytes exceeds {MAX_PACKET_LEN}")
            }
        }
    }
}

impl std::error::Error for EncodeError {}

/// `<prefix><12 uppercase hex digits of the MAC>`, fixed for the process.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ProductInstanceId([u8; PRODUCT_INSTANCE_ID_LEN]);

impl ProductInstanceId {
    pub fn from_mac(mac: [u8; 6]) -> Self {
        const HEX: &[u8; 16] = b"0123456789ABCDEF";
        let mut id = [0u8; PRODUCT_INSTANCE_ID_LEN];
        id[..PRODUCT_INSTANCE_PREFIX.len()].copy_from_slice(PRODUCT_INSTANCE_PREFIX);
        for (i, byte) in mac.iter().enumerate() {
            let at = PRODUCT_INSTANCE_PREFIX.len() + i * 2;
            id[at] = HEX[(byte >> 4) as usize];
            id[at + 1] = HEX[(byte & 0x0F) as usize];
        }
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        // Built only from ASCII
        std::str::from_utf8(&self.0).unwrap_or_default()
    }

    /// The 12 hex digits without the prefix.
    pub fn hex_digits(&self) -> &str {
        &self.as_str()[PRODUCT_INSTANCE_PREFIX.len()..]
    }
}

impl fmt::Display for ProductInstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for ProductInstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProductInstanceId({})", self.as_str())
    }
}

/// Cursor-style writer for DNS wire format.
#[derive(Debug, Default)]
pub struct DnsWriter {
    buf: Vec<u8>,
}

impl DnsWriter {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(MAX_PACKET_LEN),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn put_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn put_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// One length-prefixed label.
    pub fn put_label(&mut self, label: &str) -> Result<(), EncodeError> {
        if label.is_empty() || label.len() > MAX_LABEL_LEN {
            return Err(EncodeError::InvalidLabel(label.to_string()));
        }
        self.put_u8(label.len() as u8);
        self.put_bytes(label.as_bytes());
        Ok(())
    }

    /// Labels followed by the zero-length root label.
    pub fn put_name<'a>(
        &mut self,
        labels: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), EncodeError> {
        for label in labels {
            self.put_label(label)?;
        }
        self.put_u8(0);
        Ok(())
    }

    /// Length-prefixed character string, built from concatenated parts.
    pub fn put_character_string(&mut self, parts: &[&str]) -> Result<(), EncodeError> {
        let len: usize = parts.iter().map(|p| p.len()).sum();
        if len > MAX_CHARACTER_STRING_LEN {
            return Err(EncodeError::TxtTooLong(len));
        }
        self.put_u8(len as u8);
        for part in parts {
            self.put_bytes(part.as_bytes());
        }
        Ok(())
    }

    /// Type, class and TTL, then a placeholder RDLENGTH.
    /// Returns the RDLENGTH offset for [`DnsWriter::end_rdata`].
    pub fn begin_record(&mut self, rtype: u16, class: u16, ttl: u32) -> usize {
        self.put_u16(rtype);
        self.put_u16(class);
        self.put_u32(ttl);
        let at = self.buf.len();
        self.put_u16(0);
        at
    }

    /// Patch RDLENGTH with everything written since `begin_record`.
    pub fn end_rdata(&mut self, length_at: usize) {
        let rdlength = (self.buf.len() - length_at - 2) as u16;
        self.buf[length_at..length_at + 2].copy_from_slice(&rdlength.to_be_bytes());
    }

    pub fn finish(self) -> Result<Vec<u8>, EncodeError> {
        if self.buf.len() > MAX_PACKET_LEN {
            return Err(EncodeError::PacketTooLarge(self.buf.len()));
        }
        Ok(self.buf)
    }
}

/// Everything the announcement says about this endpoint.
#[derive(Debug, Clone)]
pub struct ServiceAnnouncement {
    pub instance_id: ProductInstanceId,
    pub endpoint_name: String,
    /// Host name labels for SRV target and A record, e.g. `["zynthian", "local"]`.
    pub target_host: Vec<String>,
    pub address: Ipv4Addr,
    pub port: u16,
}

impl ServiceAnnouncement {
    /// `host.local` style name split into labels.
    pub fn host_labels(host: &str) -> Vec<String> {
        host.split('.')
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()
    }

    fn instance_labels(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.instance_id.as_str()).chain(SERVICE_TYPE)
    }

    fn target_labels(&self) -> impl Iterator<Item = &str> {
        self.target_host.iter().map(String::as_str)
    }

    /// Encode the full response message.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let mut w = DnsWriter::new();

        // Header
        w.put_u16(0); // transaction id
        w.put_u16(FLAGS_AUTHORITATIVE_RESPONSE);
        w.put_u16(0); // questions
        w.put_u16(4); // answers
        w.put_u16(0); // authority
        w.put_u16(0); // additional

        // PTR: service type → service instance
        w.put_name(SERVICE_TYPE)?;
        let rd = w.begin_record(TYPE_PTR, CLASS_IN, TTL_PTR);
        w.put_name(self.instance_labels())?;
        w.end_rdata(rd);

        // SRV: service instance → target host
        w.put_name(self.instance_labels())?;
        let rd = w.begin_record(TYPE_SRV, CLASS_IN, TTL_SRV);
        w.put_u16(0); // priority
        w.put_u16(0); // weight
        w.put_u16(self.port);
        w.put_name(self.target_labels())?;
        w.end_rdata(rd);

        // TXT: endpoint attributes
        w.put_name(self.instance_labels())?;
        let rd = w.begin_record(TYPE_TXT, CLASS_IN, TTL_TXT);
        w.put_character_string(&[TXT_ENDPOINT_NAME_KEY, &self.endpoint_name])?;
        w.put_character_string(&[TXT_PRODUCT_INSTANCE_KEY, self.instance_id.as_str()])?;
        w.end_rdata(rd);

        // A: target host → IPv4
        w.put_name(self.target_labels())?;
        let rd = w.begin_record(TYPE_A, CLASS_IN, TTL_A);
        w.put_bytes(&self.address.octets());
        w.end_rdata(rd);

        w.finish()
    }
}

/// Read an uncompressed domain name starting at `offset`.
///
/// Returns the dotted name and the offset just past its root label, or None
/// on truncation or a compression pointer.
pub fn read_name(packet: &[u8], offset: usize) -> Option<(String, usize)> {
    let mut labels = Vec::new();
    let mut pos = offset;
    loop {
        let len = *packet.get(pos)? as usize;
        pos += 1;
        if len == 0 {
            break;
        }
        if len > MAX_LABEL_LEN {
            return None;
        }
        let label = packet.get(pos..pos + len)?;
        labels.push(String::from_utf8_lossy(label).into_owned());
        pos += len;
    }
    Some((labels.join("."), pos))
}
