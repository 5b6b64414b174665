//! UMP <-> MIDI 1.0 byte stream conversion for the render cycle.
//!
//! Covers channel voice and system common/real-time messages. SysEx is not
//! transported. MIDI 2.0 channel voice values are scaled down by dropping
//! low bits.

use crate::ump::{message_type, UmpPacket, MT_MIDI1_CHANNEL_VOICE, MT_MIDI2_CHANNEL_VOICE, MT_SYSTEM};

/// Longest MIDI 1.0 message produced here.
pub const MAX_MIDI1_LEN: usize = 3;

/// Byte length of a channel voice message by status.
#[inline]
fn channel_message_len(status: u8) -> usize {
    match status & 0xF0 {
        0xC0 | 0xD0 => 2,
        _ => 3,
    }
}

/// Byte length of a system common / real-time message, 0 if not carried.
#[inline]
fn system_message_len(status: u8) -> usize {
    match status {
        0xF1 | 0xF3 => 2,
        0xF2 => 3,
        0xF6 | 0xF8 | 0xFA | 0xFB | 0xFC | 0xFE | 0xFF => 1,
        _ => 0,
    }
}

/// Convert one UMP packet to MIDI 1.0 bytes in `out`.
///
/// Returns the number of bytes written; 0 when the packet has no MIDI 1.0
/// equivalent here.
pub fn ump_to_midi1(words: &[u32], out: &mut [u8; MAX_MIDI1_LEN]) -> usize {
    let Some(&w0) = words.first() else {
        return 0;
    };
    let status = (w0 >> 16) as u8;
    let d1 = (w0 >> 8) as u8 & 0x7F;
    let d2 = w0 as u8 & 0x7F;

    let len = match message_type(w0) {
        MT_SYSTEM => system_message_len(status),
        MT_MIDI1_CHANNEL_VOICE if (0x80..0xF0).contains(&status) => channel_message_len(status),
        MT_MIDI2_CHANNEL_VOICE => return midi2_to_midi1(words, out),
        _ => 0,
    };

    let bytes = [status, d1, d2];
    out[..len].copy_from_slice(&bytes[..len]);
    len
}

fn midi2_to_midi1(words: &[u32], out: &mut [u8; MAX_MIDI1_LEN]) -> usize {
    let &[w0, w1, ..] = words else {
        return 0;
    };
    let opcode = (w0 >> 20) as u8 & 0x0F;
    let channel = (w0 >> 16) as u8 & 0x0F;
    let index = (w0 >> 8) as u8 & 0x7F;
    let value7 = (w1 >> 25) as u8;

    let (bytes, len) = match opcode {
        0x8 => ([0x80 | channel, index, value7], 3),
        // A scaled-down velocity of 0 would read as Note Off
        0x9 => ([0x90 | channel, index, value7.max(1)], 3),
        0xA => ([0xA0 | channel, index, value7], 3),
        0xB => ([0xB0 | channel, index, value7], 3),
        0xC => ([0xC0 | channel, (w1 >> 24) as u8 & 0x7F, 0], 2),
        0xD => ([0xD0 | channel, value7, 0], 2),
        0xE => {
            let bend = w1 >> 18;
            ([0xE0 | channel, bend as u8 & 0x7F, (bend >> 7) as u8 & 0x7F], 3)
        }
        _ => return 0,
    };

    out[..len].copy_from_slice(&bytes[..len]);
    len
}

/// Convert one complete MIDI 1.0 message to a UMP packet on `group`.
///
/// Running status, SysEx and undefined system messages yield None.
pub fn midi1_to_ump(bytes: &[u8], group: u8) -> Option<UmpPacket> {
    let status = *bytes.first()?;
    let (mt, len) = match status {
        0x80..=0xEF => (MT_MIDI1_CHANNEL_VOICE, channel_message_len(status)),
        0xF0..=0xFF => (MT_SYSTEM, system_message_len(status)),
        _ => return None,
    };
    if len == 0 || bytes.len() < len {
        return None;
    }

    let mut word = (mt as u32) << 28 | ((group & 0x0F) as u32) << 24 | (status as u32) << 16;
    if len > 1 {
        word |= ((bytes[1] & 0x7F) as u32) << 8;
    }
    if len > 2 {
        word |= (bytes[2] & 0x7F) as u32;
    }
    UmpPacket::from_words(&[word])
}
