/// JACK render cycle: network UMP out to MIDI, MIDI in to network UMP.
///
/// Runs on the JACK real-time thread. Nothing here logs, allocates or locks;
/// overflow shows up in the queue drop counters, which the main loop reports.

use std::sync::Arc;

use tokio::sync::Notify;

use netump_protocol::ringbuf::{UmpConsumer, UmpProducer};
use netump_protocol::transcoder::{midi1_to_ump, ump_to_midi1, MAX_MIDI1_LEN};

/// Group used for UMP generated from MIDI 1.0 input.
const INPUT_GROUP: u8 = 0;

/// Per-cycle counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    /// UMP packets drained from the network queue.
    pub drained: usize,
    /// MIDI 1.0 messages written to the output port.
    pub emitted: usize,
    /// MIDI 1.0 input messages queued for the network.
    pub forwarded: usize,
    /// MIDI 1.0 input messages not queued (no UMP equivalent or queue full).
    pub rejected: usize,
}

/// One render cycle, independent of JACK.
///
/// Drains `inbound` and hands each MIDI 1.0 translation to `emit`, then
/// converts every `input` event and pushes it onto `outbound`.
pub fn run_cycle<'a>(
    inbound: &mut UmpConsumer,
    outbound: &mut UmpProducer,
    input: impl IntoIterator<Item = &'a [u8]>,
    mut emit: impl FnMut(&[u8]),
) -> CycleStats {
    let mut stats = CycleStats::default();

    let mut bytes = [0u8; MAX_MIDI1_LEN];
    stats.drained = inbound.drain(|words| {
        let len = ump_to_midi1(words, &mut bytes);
        if len > 0 {
            emit(&bytes[..len]);
            stats.emitted += 1;
        }
    });

    for event in input {
        let queued = midi1_to_ump(event, INPUT_GROUP)
            .map(|packet| outbound.push(packet.words()).is_ok())
            .unwrap_or(false);
        if queued {
            stats.forwarded += 1;
        } else {
            stats.rejected += 1;
        }
    }

    stats
}

/// JACK process handler owning the render-side queue halves and ports.
pub struct RenderCycle {
    inbound: UmpConsumer,
    outbound: UmpProducer,
    midi_in: jack::Port<jack::MidiIn>,
    midi_out: jack::Port<jack::MidiOut>,
}

impl RenderCycle {
    pub fn new(
        inbound: UmpConsumer,
        outbound: UmpProducer,
        midi_in: jack::Port<jack::MidiIn>,
        midi_out: jack::Port<jack::MidiOut>,
    ) -> Self {
        Self {
            inbound,
            outbound,
            midi_in,
            midi_out,
        }
    }
}

impl jack::ProcessHandler for RenderCycle {
    fn process(&mut self, _client: &jack::Client, scope: &jack::ProcessScope) -> jack::Control {
        let mut writer = self.midi_out.writer(scope);
        let input = self.midi_in.iter(scope).map(|event| event.bytes);

        run_cycle(&mut self.inbound, &mut self.outbound, input, |bytes| {
            // Output buffer full: the rest of this cycle is lost
            let _ = writer.write(&jack::RawMidi { time: 0, bytes });
        });

        jack::Control::Continue
    }
}

/// Turns a JACK server shutdown into a main loop stop.
pub struct JackNotifications {
    shutdown: Arc<Notify>,
}

impl JackNotifications {
    pub fn new(shutdown: Arc<Notify>) -> Self {
        Self { shutdown }
    }
}

impl jack::NotificationHandler for JackNotifications {
    unsafe fn shutdown(&mut self, _status: jack::ClientStatus, _reason: &str) {
        self.shutdown.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netump_protocol::ringbuf::ump_ring_buffer;

    struct Queues {
        net_in: UmpProducer,
        render_in: UmpConsumer,
        render_out: UmpProducer,
        net_out: UmpConsumer,
    }

    fn queues(capacity: usize) -> Queues {
        let (net_in, render_in) = ump_ring_buffer(capacity);
        let (render_out, net_out) = ump_ring_buffer(capacity);
        Queues {
            net_in,
            render_in,
            render_out,
            net_out,
        }
    }

    fn cycle(q: &mut Queues, input: &[&[u8]]) -> (CycleStats, Vec<Vec<u8>>) {
        let mut out = Vec::new();
        let stats = run_cycle(
            &mut q.render_in,
            &mut q.render_out,
            input.iter().copied(),
            |bytes| out.push(bytes.to_vec()),
        );
        (stats, out)
    }

    #[test]
    fn network_packets_reach_output_in_order() {
        let mut q = queues(64);
        q.net_in.push(&[0x2090_3C7F]).unwrap();
        q.net_in.push(&[0x4080_3C00, 0x0000_0000]).unwrap();
        q.net_in.push(&[0x10F8_0000]).unwrap();

        let (stats, out) = cycle(&mut q, &[]);
        assert_eq!(stats.drained, 3);
        assert_eq!(stats.emitted, 3);
        assert_eq!(
            out,
            vec![vec![0x90, 0x3C, 0x7F], vec![0x80, 0x3C, 0x00], vec![0xF8]]
        );
    }

    #[test]
    fn untranslatable_packets_are_drained_silently() {
        let mut q = queues(64);
        // Utility NOOP and a data message
        q.net_in.push(&[0x0000_0000]).unwrap();
        q.net_in.push(&[0x3016_0000, 0]).unwrap();

        let (stats, out) = cycle(&mut q, &[]);
        assert_eq!(stats.drained, 2);
        assert_eq!(stats.emitted, 0);
        assert!(out.is_empty());
        assert!(q.render_in.is_empty());
    }

    #[test]
    fn midi_input_is_queued_for_network() {
        let mut q = queues(64);
        let (stats, _) = cycle(&mut q, &[&[0x91, 0x40, 0x64], &[0xC2, 0x05], &[0xF0, 0x7E, 0xF7]]);
        assert_eq!(stats.forwarded, 2);
        assert_eq!(stats.rejected, 1);

        let mut sent = Vec::new();
        q.net_out.drain(|words| sent.push(words.to_vec()));
        assert_eq!(sent, vec![vec![0x2091_4064], vec![0x20C2_0500]]);
    }

    #[test]
    fn full_outbound_queue_counts_rejects() {
        // Capacity 5 holds 4 words
        let mut q = queues(5);
        let notes: Vec<[u8; 3]> = (0..6).map(|n| [0x90, n, 0x40]).collect();
        let input: Vec<&[u8]> = notes.iter().map(|n| n.as_slice()).collect();

        let (stats, _) = cycle(&mut q, &input);
        assert_eq!(stats.forwarded, 4);
        assert_eq!(stats.rejected, 2);
        assert_eq!(q.net_out.dropped(), 2);
    }

    #[test]
    fn packets_pushed_after_a_cycle_wait_for_the_next() {
        let mut q = queues(64);
        q.net_in.push(&[0x2080_3C00]).unwrap();
        let (first, _) = cycle(&mut q, &[]);
        q.net_in.push(&[0x2080_3D00]).unwrap();
        let (second, out) = cycle(&mut q, &[]);
        assert_eq!(first.drained, 1);
        assert_eq!(second.drained, 1);
        assert_eq!(out, vec![vec![0x80, 0x3D, 0x00]]);
    }
}
