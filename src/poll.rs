//! Fixed-interval scan over all nodes: fetch `LapStats`,
//! update node state, compute latency-compensated `readtime`, advance
//! capture windows, append history, and dispatch crossing/lap events in a
//! fixed order — crossings first (insertion order), then laps (ascending
//! `lap_ms_since_start` when a cycle surfaces more than one).

use std::time::Duration;

use tokio::time::Instant;
use tracing::warn;

use crate::bus::BusTransactor;
use crate::callbacks::EventSink;
use crate::capture;
use crate::clock::Clock;
use crate::config_api;
use crate::consts::{MAX_RSSI_VALUE, MIN_RSSI_VALUE, READ_LAP_STATS};
use crate::frame::{self, HistoryRaw, LapValue};
use crate::node::{ApiLevel, LapSource, Node};

struct NewLap {
    node_index: usize,
    lap_id: i32,
    lap_time_ms: u32,
}

/// Runs exactly one poll cycle over every node. Call on a `UPDATE_SLEEP`
/// cadence from the background task (see `interface.rs`).
pub async fn poll_once(nodes: &mut [Node], bus: &BusTransactor, sink: &dyn EventSink, retries: u32, clock: &Clock) {
    let mut crossing_changed: Vec<usize> = Vec::new();
    let mut new_laps: Vec<NewLap> = Vec::new();

    for node in nodes.iter_mut() {
        if node.frequency_khz == 0 {
            continue;
        }

        let tier = node.api_tier;
        let size = tier.lap_stats_size();
        let reading = match bus.read_block(node.bus_address, READ_LAP_STATS, size, sink).await {
            Some(r) => r,
            None => continue,
        };

        // api_level >= 17 compensates for bus round-trip latency.
        let readtime = if matches!(tier, ApiLevel::V17 | ApiLevel::V18Plus) {
            let rtt = reading.t_response.saturating_duration_since(reading.t_request);
            let one_way = rtt / 2;
            Some((reading.t_response - one_way, one_way))
        } else {
            None
        };

        let frame = frame::decode(tier, node.api_level, &reading.data);

        if frame.rssi < MIN_RSSI_VALUE || frame.rssi > MAX_RSSI_VALUE {
            let msg = format!(
                "RSSI reading ({}) out of range on Node {}; rejected",
                frame.rssi,
                node.index + 1
            );
            warn!("{msg}");
            sink.hardware_log(&msg);
            continue;
        }

        node.current_rssi = frame.rssi;

        let lap_time_ms = match frame.lap_value {
            LapValue::Differential(diff) => {
                let one_way_ms = readtime.map(|(_, ow)| ow.as_millis() as u32).unwrap_or(0);
                diff as u32 + one_way_ms
            }
            LapValue::Absolute(ms) => {
                node.lap_ms_since_start = ms;
                ms
            }
        };

        if let Some(v) = frame.node_peak_rssi {
            node.node_peak_rssi = v;
        }
        if let Some(v) = frame.pass_peak_rssi {
            node.pass_peak_rssi = v;
        }
        if let Some(v) = frame.loop_time_us {
            node.loop_time_us = v;
        }
        if let Some(v) = frame.node_nadir_rssi {
            node.node_nadir_rssi = v;
        }

        if let Some(cross) = frame.crossing_flag {
            if cross != node.crossing_flag {
                node.crossing_flag = cross;
                crossing_changed.push(node.index);
            }
        }

        let lap_id = frame.lap_id as i32;
        if lap_id != node.last_lap_id {
            new_laps.push(NewLap {
                node_index: node.index,
                lap_id,
                lap_time_ms,
            });
        }

        capture::accumulate(node, frame.rssi);
        if let Some(level) = capture::finish_enter_at_if_due(node, clock.now_ms()) {
            let confirmed = config_api::transmit_enter_at_level(bus, node, level, retries, sink).await;
            node.enter_at_level = confirmed;
            sink.new_enter_or_exit_at(node, true);
        }
        if let Some(level) = capture::finish_exit_at_if_due(node, clock.now_ms()) {
            let confirmed = config_api::transmit_exit_at_level(bus, node, level, retries, sink).await;
            node.exit_at_level = confirmed;
            sink.new_enter_or_exit_at(node, false);
        }

        if let (Some(history), Some((readtime, _))) = (frame.history, readtime) {
            append_history(node, &history, readtime);
        }
    }

    for idx in crossing_changed {
        sink.node_crossing(&nodes[idx]);
    }

    if new_laps.len() > 1 {
        new_laps.sort_by_key(|lap| nodes[lap.node_index].lap_ms_since_start);
    }
    for lap in new_laps {
        let node = &mut nodes[lap.node_index];
        if node.last_lap_id != -1 {
            sink.pass_record(node, lap.lap_time_ms, LapSource::Realtime);
        }
        node.last_lap_id = lap.lap_id;
    }
}

/// Expands the node's peak/nadir pair into one or two timestamped samples,
/// ordered by which extremum is more recent.
fn append_history(node: &mut Node, h: &HistoryRaw, readtime: Instant) {
    let at = |ms_ago: u16| readtime.checked_sub(Duration::from_millis(ms_ago as u64)).unwrap_or(readtime);

    let push_peak = |node: &mut Node| {
        if h.peak_first_time_ms < h.peak_last_time_ms {
            node.push_history(h.peak_rssi, at(h.peak_first_time_ms));
            node.push_history(h.peak_rssi, at(h.peak_last_time_ms));
        } else {
            node.push_history(h.peak_rssi, at(h.peak_last_time_ms));
        }
    };

    match (h.peak_rssi > 0, h.nadir_rssi > 0) {
        (true, true) => {
            if h.peak_last_time_ms < h.nadir_time_ms {
                push_peak(node);
                node.push_history(h.nadir_rssi, at(h.nadir_time_ms));
            } else {
                node.push_history(h.nadir_rssi, at(h.nadir_time_ms));
                push_peak(node);
            }
        }
        (true, false) => push_peak(node),
        (false, true) => node.push_history(h.nadir_rssi, at(h.nadir_time_ms)),
        (false, false) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusTransactor, MockTransport};
    use crate::callbacks::EventSink;
    use crate::codec;
    use crate::consts::READ_LAP_STATS;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<String>>,
    }

    impl EventSink for RecordingSink {
        fn pass_record(&self, node: &Node, lap_time_ms: u32, _source: LapSource) {
            self.events
                .lock()
                .unwrap()
                .push(format!("pass:{}:{}", node.index, lap_time_ms));
        }
        fn node_crossing(&self, node: &Node) {
            self.events.lock().unwrap().push(format!("cross:{}", node.index));
        }
        fn new_enter_or_exit_at(&self, node: &Node, is_enter: bool) {
            self.events
                .lock()
                .unwrap()
                .push(format!("capture:{}:{}", node.index, is_enter));
        }
    }

    fn framed(payload: &[u8]) -> Vec<u8> {
        let mut v = payload.to_vec();
        let sum = codec::checksum(&[v.as_slice(), &[0]].concat());
        v.push(sum);
        v
    }

    fn v18_frame(lap_id: u8, lap_diff_ms: u16, rssi: u8, crossing: u8) -> Vec<u8> {
        let mut data = vec![0u8; 19];
        data[0] = lap_id;
        data[1..3].copy_from_slice(&lap_diff_ms.to_be_bytes());
        data[3] = rssi;
        data[8] = crossing;
        data
    }

    fn make_v18_node(index: usize, addr: u8) -> Node {
        let mut n = Node::new(index, addr);
        n.api_level = 20;
        n.api_tier = ApiLevel::V18Plus;
        n.api_valid_flag = true;
        n.frequency_khz = 5800;
        n.last_lap_id = -1;
        n
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn s1_lap_detection_suppresses_first_observation() {
        let mut transport = MockTransport::new();
        transport.present.insert(8);
        transport.queue_response(8, READ_LAP_STATS, framed(&v18_frame(0, 250, 120, 0)));
        transport.queue_response(8, READ_LAP_STATS, framed(&v18_frame(1, 250, 120, 0)));
        let bus = BusTransactor::with_timing(Box::new(transport), Duration::from_millis(0), 5);
        let sink = RecordingSink::default();
        let clock = Clock::new();
        let mut nodes = vec![make_v18_node(0, 8)];

        poll_once(&mut nodes, &bus, &sink, 5, &clock).await;
        assert_eq!(nodes[0].last_lap_id, 0);
        assert!(sink.events.lock().unwrap().is_empty());

        poll_once(&mut nodes, &bus, &sink, 5, &clock).await;
        assert_eq!(nodes[0].last_lap_id, 1);
        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].starts_with("pass:0:"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn s2_crossing_toggle_fires_once() {
        let mut transport = MockTransport::new();
        transport.present.insert(8);
        transport.queue_response(8, READ_LAP_STATS, framed(&v18_frame(0, 0, 100, 0)));
        transport.queue_response(8, READ_LAP_STATS, framed(&v18_frame(0, 0, 100, 1)));
        transport.queue_response(8, READ_LAP_STATS, framed(&v18_frame(0, 0, 100, 1)));
        let bus = BusTransactor::with_timing(Box::new(transport), Duration::from_millis(0), 5);
        let sink = RecordingSink::default();
        let clock = Clock::new();
        let mut nodes = vec![make_v18_node(0, 8)];

        poll_once(&mut nodes, &bus, &sink, 5, &clock).await;
        poll_once(&mut nodes, &bus, &sink, 5, &clock).await;
        poll_once(&mut nodes, &bus, &sink, 5, &clock).await;

        let events = sink.events.lock().unwrap();
        let crossings: Vec<_> = events.iter().filter(|e| e.starts_with("cross:")).collect();
        assert_eq!(crossings.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn s3_rejected_rssi_skips_state_update() {
        let mut transport = MockTransport::new();
        transport.present.insert(8);
        transport.queue_response(8, READ_LAP_STATS, framed(&v18_frame(1, 0, 0, 0)));
        let bus = BusTransactor::with_timing(Box::new(transport), Duration::from_millis(0), 5);
        let sink = RecordingSink::default();
        let clock = Clock::new();
        let mut nodes = vec![make_v18_node(0, 8)];

        poll_once(&mut nodes, &bus, &sink, 5, &clock).await;
        assert_eq!(nodes[0].current_rssi, 0);
        assert_eq!(nodes[0].last_lap_id, -1);
        assert!(nodes[0].history_values.is_empty());
        assert!(sink.events.lock().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn s5_multi_lap_ordering_by_lap_ms_since_start() {
        // Two api 13..16 nodes (Absolute lap value, which sets
        // lap_ms_since_start) reporting new laps in the same cycle.
        let mut transport = MockTransport::new();
        transport.present.insert(8);
        transport.present.insert(10);

        let mut frame_a = vec![0u8; 20];
        frame_a[0] = 1; // lap_id
        frame_a[1..5].copy_from_slice(&20000u32.to_be_bytes());
        frame_a[5..7].copy_from_slice(&120u16.to_be_bytes()); // rssi

        let mut frame_b = vec![0u8; 20];
        frame_b[0] = 1;
        frame_b[1..5].copy_from_slice(&19800u32.to_be_bytes());
        frame_b[5..7].copy_from_slice(&130u16.to_be_bytes());

        transport.queue_response(8, READ_LAP_STATS, framed(&frame_a));
        transport.queue_response(10, READ_LAP_STATS, framed(&frame_b));

        let bus = BusTransactor::with_timing(Box::new(transport), Duration::from_millis(0), 5);
        let sink = RecordingSink::default();
        let clock = Clock::new();

        let mut node_a = Node::new(0, 8);
        node_a.api_level = 15;
        node_a.api_tier = ApiLevel::V13to16;
        node_a.api_valid_flag = true;
        node_a.frequency_khz = 5800;
        node_a.last_lap_id = 0; // already observed a lap; next change should emit

        let mut node_b = Node::new(1, 10);
        node_b.api_level = 15;
        node_b.api_tier = ApiLevel::V13to16;
        node_b.api_valid_flag = true;
        node_b.frequency_khz = 5800;
        node_b.last_lap_id = 0;

        let mut nodes = vec![node_a, node_b];
        poll_once(&mut nodes, &bus, &sink, 5, &clock).await;

        let events = sink.events.lock().unwrap();
        let passes: Vec<_> = events.iter().filter(|e| e.starts_with("pass:")).collect();
        assert_eq!(passes, vec!["pass:1:19800", "pass:0:20000"]);
    }
}
