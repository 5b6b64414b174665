//! Universal MIDI Packet framing.
//!
//! A UMP is 1–4 32-bit words. The top nibble of the first word is the
//! Message Type, and the Message Type alone decides how many words follow.
//! Everything in this crate that moves UMP around sizes packets through
//! `word_count`.

/// Word count per Message Type (index = top nibble of word 0).
pub const UMP_WORD_COUNT: [usize; 16] = [1, 1, 1, 2, 2, 4, 1, 1, 2, 2, 2, 3, 3, 4, 4, 4];

/// Largest UMP, in words.
pub const MAX_UMP_WORDS: usize = 4;

// -- Message Types used by this endpoint --

pub const MT_UTILITY: u8 = 0x0;
pub const MT_SYSTEM: u8 = 0x1;
pub const MT_MIDI1_CHANNEL_VOICE: u8 = 0x2;
pub const MT_MIDI2_CHANNEL_VOICE: u8 = 0x4;
pub const MT_STREAM: u8 = 0xF;

/// Mask selecting Message Type, Format and Status of a UMP Stream message.
pub const STREAM_STATUS_MASK: u32 = 0xFFFF_0000;
/// Endpoint Discovery: MT 0xF, format 0 (complete), status 0x000.
pub const ENDPOINT_DISCOVERY: u32 = 0xF000_0000;

/// Message Type of a packet, from its first word.
#[inline]
pub const fn message_type(first_word: u32) -> u8 {
    (first_word >> 28) as u8
}

/// Total word count of the packet starting with `first_word`.
///
/// Total over every possible word: the nibble can only be 0..=15.
#[inline]
pub const fn word_count(first_word: u32) -> usize {
    UMP_WORD_COUNT[(first_word >> 28) as usize]
}

/// One complete UMP packet, stored inline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UmpPacket {
    words: [u32; MAX_UMP_WORDS],
    len: u8,
}

impl UmpPacket {
    /// Build a packet from the leading words of `words`.
    ///
    /// Returns None if `words` is shorter than the Framing Table demands.
    /// Extra trailing words are ignored.
    pub fn from_words(words: &[u32]) -> Option<Self> {
        let first = *words.first()?;
        let len = word_count(first);
        if words.len() < len {
            return None;
        }
        let mut packet = Self {
            words: [0; MAX_UMP_WORDS],
            len: len as u8,
        };
        packet.words[..len].copy_from_slice(&words[..len]);
        Some(packet)
    }

    #[inline]
    pub fn words(&self) -> &[u32] {
        &self.words[..self.len as usize]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// A packet always holds at least one word.
    #[inline]
    pub fn is_empty(&self) -> bool {
        false
    }

    #[inline]
    pub fn message_type(&self) -> u8 {
        message_type(self.words[0])
    }
}

/// What the endpoint does with an inbound packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    /// Endpoint Discovery request, carrying its raw filter word.
    Discovery { filter_word: u32 },
    /// Anything else goes to the render cycle.
    PassThrough,
}

/// Classify a complete inbound packet.
pub fn classify(words: &[u32]) -> Inbound {
    match words {
        [first, filter_word, ..] if first & STREAM_STATUS_MASK == ENDPOINT_DISCOVERY => {
            Inbound::Discovery {
                filter_word: *filter_word,
            }
        }
        _ => Inbound::PassThrough,
    }
}
