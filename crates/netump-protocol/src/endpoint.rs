//! UMP Endpoint Discovery responder.
//!
//! A peer sends an Endpoint Discovery message whose second word carries a
//! filter bitmap. For each requested notification we emit one 128-bit UMP
//! Stream message, in bit order e, d, n, i, s.

use serde::{Deserialize, Serialize};

/// Outbound UMP messages, handed to the session layer.
pub trait UmpSink {
    fn send_ump(&mut self, message: &[u32; 4]);
}

/// Collecting sink, handy for tests and batching.
impl UmpSink for Vec<[u32; 4]> {
    fn send_ump(&mut self, message: &[u32; 4]) {
        self.push(*message);
    }
}

// -- Stream message status words (MT 0xF, format 0 = complete) --

pub const STATUS_ENDPOINT_INFO: u32 = 0xF001_0000;
pub const STATUS_DEVICE_IDENTITY: u32 = 0xF002_0000;
pub const STATUS_ENDPOINT_NAME: u32 = 0xF003_0000;
pub const STATUS_PRODUCT_INSTANCE_ID: u32 = 0xF004_0000;
pub const STATUS_STREAM_CONFIG: u32 = 0xF006_0000;

/// Bytes of text one complete Name / Product Instance ID notification holds.
pub const NOTIFICATION_TEXT_LEN: usize = 14;

/// Active protocol value for MIDI 1.0 in Stream Configuration messages.
pub const PROTOCOL_MIDI1: u8 = 0x01;

/// Endpoint Discovery filter bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiscoveryFilter(u8);

impl DiscoveryFilter {
    pub const ENDPOINT_INFO: u8 = 0x01;
    pub const DEVICE_IDENTITY: u8 = 0x02;
    pub const ENDPOINT_NAME: u8 = 0x04;
    pub const PRODUCT_INSTANCE_ID: u8 = 0x08;
    pub const STREAM_CONFIG: u8 = 0x10;

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Filter from the request's second word. Only the low byte is defined;
    /// higher bits are ignored.
    pub const fn from_request(filter_word: u32) -> Self {
        Self(filter_word as u8)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    #[inline]
    pub const fn contains(self, bit: u8) -> bool {
        self.0 & bit != 0
    }
}

/// Static capabilities reported in the Endpoint Info Notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointInfo {
    pub ump_version_major: u8,
    pub ump_version_minor: u8,
    pub static_function_blocks: bool,
    pub function_block_count: u8,
    pub midi1_protocol: bool,
    pub midi2_protocol: bool,
    pub receive_jr_timestamps: bool,
    pub transmit_jr_timestamps: bool,
}

impl Default for EndpointInfo {
    fn default() -> Self {
        Self {
            ump_version_major: 1,
            ump_version_minor: 1,
            static_function_blocks: true,
            function_block_count: 0,
            midi1_protocol: true,
            midi2_protocol: false,
            receive_jr_timestamps: false,
            transmit_jr_timestamps: false,
        }
    }
}

impl EndpointInfo {
    pub fn notification(&self) -> [u32; 4] {
        let word0 = STATUS_ENDPOINT_INFO
            | (self.ump_version_major as u32) << 8
            | self.ump_version_minor as u32;
        let word1 = (self.static_function_blocks as u32) << 31
            | ((self.function_block_count & 0x7F) as u32) << 24
            | (self.midi2_protocol as u32) << 9
            | (self.midi1_protocol as u32) << 8
            | (self.receive_jr_timestamps as u32) << 1
            | self.transmit_jr_timestamps as u32;
        [word0, word1, 0, 0]
    }
}

/// Device Identity as carried in UMP: SysEx manufacturer ID, family, model
/// and software revision, all 7-bit bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceIdentity {
    pub manufacturer: [u8; 3],
    pub family: u16,
    pub model: u16,
    pub software_revision: [u8; 4],
}

impl Default for DeviceIdentity {
    /// Prototype manufacturer ID (0x7D), model 1, revision 0.1.
    fn default() -> Self {
        Self {
            manufacturer: [0x7D, 0x00, 0x00],
            family: 0x0000,
            model: 0x0001,
            software_revision: [0x00, 0x01, 0x00, 0x00],
        }
    }
}

impl DeviceIdentity {
    pub fn notification(&self) -> [u32; 4] {
        let [m1, m2, m3] = self.manufacturer.map(|b| (b & 0x7F) as u32);
        let word1 = m1 << 16 | m2 << 8 | m3;
        let word2 = ((self.family & 0x7F) as u32) << 24
            | ((self.family >> 7 & 0x7F) as u32) << 16
            | ((self.model & 0x7F) as u32) << 8
            | (self.model >> 7 & 0x7F) as u32;
        let word3 = u32::from_be_bytes(self.software_revision.map(|b| b & 0x7F));
        [STATUS_DEVICE_IDENTITY, word1, word2, word3]
    }
}

/// Pack up to 14 ASCII bytes after a 16-bit status: two bytes in word 0,
/// four per following word, zero padded.
pub fn pack_text(status: u32, text: &str) -> [u32; 4] {
    let mut bytes = [0u8; 16];
    let len = text.len().min(NOTIFICATION_TEXT_LEN);
    bytes[..2].copy_from_slice(&status.to_be_bytes()[..2]);
    bytes[2..2 + len].copy_from_slice(&text.as_bytes()[..len]);

    let mut words = [0u32; 4];
    for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(4)) {
        *word = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    words
}

/// Stream Configuration Notification for a given protocol, no JR timestamps.
pub fn stream_config_notification(protocol: u8) -> [u32; 4] {
    [STATUS_STREAM_CONFIG | (protocol as u32) << 8, 0, 0, 0]
}

/// Builds the notifications once and replays them on request.
#[derive(Debug, Clone)]
pub struct EndpointResponder {
    endpoint_info: [u32; 4],
    device_identity: [u32; 4],
    endpoint_name: [u32; 4],
    product_instance_id: [u32; 4],
    stream_config: [u32; 4],
}

impl EndpointResponder {
    /// Name and instance id are truncated to 14 bytes.
    pub fn new(
        endpoint_name: &str,
        product_instance_id: &str,
        info: EndpointInfo,
        identity: DeviceIdentity,
    ) -> Self {
        Self {
            endpoint_info: info.notification(),
            device_identity: identity.notification(),
            endpoint_name: pack_text(STATUS_ENDPOINT_NAME, endpoint_name),
            product_instance_id: pack_text(STATUS_PRODUCT_INSTANCE_ID, product_instance_id),
            stream_config: stream_config_notification(PROTOCOL_MIDI1),
        }
    }

    /// Emit one notification per set filter bit, in order e, d, n, i, s.
    /// Returns the number of messages handed to `sink`.
    pub fn handle_discovery(&self, filter: DiscoveryFilter, sink: &mut impl UmpSink) -> usize {
        let replies = [
            (DiscoveryFilter::ENDPOINT_INFO, &self.endpoint_info),
            (DiscoveryFilter::DEVICE_IDENTITY, &self.device_identity),
            (DiscoveryFilter::ENDPOINT_NAME, &self.endpoint_name),
            (DiscoveryFilter::PRODUCT_INSTANCE_ID, &self.product_instance_id),
            (DiscoveryFilter::STREAM_CONFIG, &self.stream_config),
        ];

        let mut sent = 0;
        for (bit, message) in replies {
            if filter.contains(bit) {
                sink.send_ump(message);
                sent += 1;
            }
        }
        sent
    }
}
