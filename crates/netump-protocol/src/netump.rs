//! Network UMP datagram framing, UMP Data commands only.
//!
//! Datagram: `"MIDI"` signature, then command packets. Each command starts
//! with one header word: [code:8][payload words:8][command specific:16].
//! UMP Data (0xFF) carries whole UMP packets and a 16-bit sequence number.
//! Session commands (invitation, ping, bye) are left to the session layer.

use crate::ump::{word_count, UmpPacket};

pub const SIGNATURE: [u8; 4] = *b"MIDI";
pub const CMD_UMP_DATA: u8 = 0xFF;

/// A command payload length field is 8 bits.
pub const MAX_COMMAND_WORDS: usize = 255;

/// Append one UMP Data command to `buf`, writing the signature first if `buf`
/// is empty. Returns false (and writes nothing) if `words` does not fit in a
/// single command.
pub fn encode_ump_data(buf: &mut Vec<u8>, sequence: u16, words: &[u32]) -> bool {
    if words.len() > MAX_COMMAND_WORDS {
        return false;
    }
    if buf.is_empty() {
        buf.extend_from_slice(&SIGNATURE);
    }
    buf.push(CMD_UMP_DATA);
    buf.push(words.len() as u8);
    buf.extend_from_slice(&sequence.to_be_bytes());
    for word in words {
        buf.extend_from_slice(&word.to_be_bytes());
    }
    true
}

/// Summary of one decoded datagram.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeSummary {
    /// Complete UMP packets delivered.
    pub packets: usize,
    /// UMP Data commands seen.
    pub data_commands: usize,
    /// Other commands skipped.
    pub other_commands: usize,
    /// Payload words discarded because a packet was cut short.
    pub discarded_words: usize,
}

/// Walk every command in `datagram`, calling `f` for each complete UMP packet
/// found in UMP Data commands.
///
/// Returns None if the signature is missing. A command whose declared length
/// runs past the end of the datagram ends decoding.
pub fn decode_datagram(datagram: &[u8], mut f: impl FnMut(u16, &UmpPacket)) -> Option<DecodeSummary> {
    if datagram.len() < SIGNATURE.len() || datagram[..4] != SIGNATURE {
        return None;
    }

    let mut summary = DecodeSummary::default();
    let mut rest = &datagram[4..];
    let mut words = [0u32; MAX_COMMAND_WORDS];

    while rest.len() >= 4 {
        let code = rest[0];
        let len = rest[1] as usize;
        let specific = u16::from_be_bytes([rest[2], rest[3]]);
        let payload_bytes = len * 4;
        let Some(payload) = rest.get(4..4 + payload_bytes) else {
            break;
        };
        rest = &rest[4 + payload_bytes..];

        if code != CMD_UMP_DATA {
            summary.other_commands += 1;
            continue;
        }
        summary.data_commands += 1;

        for (word, chunk) in words.iter_mut().zip(payload.chunks_exact(4)) {
            *word = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }

        let mut at = 0;
        while at < len {
            let count = word_count(words[at]);
            match UmpPacket::from_words(&words[at..len]) {
                Some(packet) => {
                    f(specific, &packet);
                    summary.packets += 1;
                    at += count;
                }
                None => {
                    summary.discarded_words += len - at;
                    break;
                }
            }
        }
    }

    Some(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_single_packet() {
        let mut buf = Vec::new();
        assert!(encode_ump_data(&mut buf, 7, &[0x2090_3C7F]));
        assert_eq!(
            buf,
            vec![b'M', b'I', b'D', b'I', 0xFF, 0x01, 0x00, 0x07, 0x20, 0x90, 0x3C, 0x7F]
        );
    }

    #[test]
    fn encode_appends_commands() {
        let mut buf = Vec::new();
        encode_ump_data(&mut buf, 1, &[0x2090_3C7F]);
        encode_ump_data(&mut buf, 2, &[0x2080_3C00]);
        // One signature, two commands
        assert_eq!(buf.len(), 4 + 8 + 8);
        assert_eq!(&buf[12..16], &[0xFF, 0x01, 0x00, 0x02]);
    }

    #[test]
    fn decode_splits_packets_by_message_type() {
        let mut buf = Vec::new();
        encode_ump_data(
            &mut buf,
            42,
            &[0x2090_3C7F, 0x4090_3C00, 0xFFFF_0000, 0xF000_0101, 0x1F, 0, 0],
        );

        let mut got = Vec::new();
        let summary = decode_datagram(&buf, |seq, p| got.push((seq, p.words().to_vec()))).unwrap();

        assert_eq!(summary.packets, 3);
        assert_eq!(summary.data_commands, 1);
        assert_eq!(
            got,
            vec![
                (42, vec![0x2090_3C7F]),
                (42, vec![0x4090_3C00, 0xFFFF_0000]),
                (42, vec![0xF000_0101, 0x1F, 0, 0]),
            ]
        );
    }

    #[test]
    fn decode_discards_truncated_tail() {
        let mut buf = Vec::new();
        // MT 4 needs two words, only one present
        encode_ump_data(&mut buf, 0, &[0x2090_3C7F, 0x4090_3C00]);

        let mut got = Vec::new();
        let summary = decode_datagram(&buf, |_, p| got.push(p.words().to_vec())).unwrap();
        assert_eq!(got, vec![vec![0x2090_3C7F]]);
        assert_eq!(summary.discarded_words, 1);
    }

    #[test]
    fn decode_skips_session_commands() {
        let mut buf = SIGNATURE.to_vec();
        // Ping with one word payload
        buf.extend_from_slice(&[0x20, 0x01, 0x00, 0x00, 0xDE, 0xAD, 0xBE, 0xEF]);
        encode_ump_data(&mut buf, 3, &[0x2090_3C7F]);

        let mut count = 0;
        let summary = decode_datagram(&buf, |_, _| count += 1).unwrap();
        assert_eq!(count, 1);
        assert_eq!(summary.other_commands, 1);
    }

    #[test]
    fn decode_rejects_missing_signature() {
        assert!(decode_datagram(b"MDMI\xFF\x01\x00\x00\x20\x90\x3C\x7F", |_, _| {}).is_none());
        assert!(decode_datagram(b"MI", |_, _| {}).is_none());
    }

    #[test]
    fn decode_stops_on_overlong_command() {
        let buf = [b'M', b'I', b'D', b'I', 0xFF, 0x04, 0x00, 0x00, 0x20, 0x90];
        let summary = decode_datagram(&buf, |_, _| panic!("no packet expected")).unwrap();
        assert_eq!(summary, DecodeSummary::default());
    }
}
