//! Node discovery. Runs once at startup; the registry is
//! immutable afterward. An empty registry (no nodes found) is a valid
//! outcome, not a failure.

use tracing::info;

use crate::bus::BusTransactor;
use crate::callbacks::EventSink;
use crate::codec;
use crate::consts::{
    PROBE_ADDRESSES, READ_ADDRESS, READ_ENTER_AT_LEVEL, READ_EXIT_AT_LEVEL, READ_FREQUENCY,
    READ_NODE_RSSI_NADIR, READ_NODE_RSSI_PEAK, READ_REVISION_CODE, REVISION_VERIFY_BYTE,
};
use crate::node::{ApiLevel, Node};

/// Probes every address in the fixed set, then latches per-node
/// configuration for each respondent.
pub async fn discover(bus: &BusTransactor, sink: &dyn EventSink) -> Vec<Node> {
    let mut nodes = Vec::new();

    for &address in PROBE_ADDRESSES.iter() {
        let present = bus.read_block(address, READ_ADDRESS, 1, sink).await.is_some();
        if present {
            let index = nodes.len();
            info!(index, address, "node found");
            nodes.push(Node::new(index, address));
        } else {
            info!(address, "no node at address");
        }
    }

    for node in nodes.iter_mut() {
        latch_node_config(bus, node, sink).await;
    }

    nodes
}

async fn latch_node_config(bus: &BusTransactor, node: &mut Node, sink: &dyn EventSink) {
    if let Some(reading) = bus.read_block(node.bus_address, READ_FREQUENCY, 2, sink).await {
        node.frequency_khz = codec::unpack_u16_be(&reading.data);
    }

    let api_level = match bus
        .read_block(node.bus_address, READ_REVISION_CODE, 2, sink)
        .await
    {
        Some(reading) => {
            let rev = codec::unpack_u16_be(&reading.data);
            if (rev >> 8) as u8 == REVISION_VERIFY_BYTE {
                rev & 0xFF
            } else {
                0
            }
        }
        None => 0,
    };
    node.api_level = api_level;
    node.api_tier = ApiLevel::from_raw(api_level);
    node.api_valid_flag = node.api_tier.is_valid();

    if node.api_valid_flag {
        let width = codec::rssi_width(node.api_level);
        if let Some(reading) = bus
            .read_block(node.bus_address, READ_NODE_RSSI_PEAK, width, sink)
            .await
        {
            node.node_peak_rssi = codec::unpack_rssi(node.api_level, &reading.data);
        }
        if node.api_level >= 13 {
            if let Some(reading) = bus
                .read_block(node.bus_address, READ_NODE_RSSI_NADIR, width, sink)
                .await
            {
                node.node_nadir_rssi = codec::unpack_rssi(node.api_level, &reading.data);
            }
        }
        if let Some(reading) = bus
            .read_block(node.bus_address, READ_ENTER_AT_LEVEL, width, sink)
            .await
        {
            node.enter_at_level = codec::unpack_rssi(node.api_level, &reading.data);
        }
        if let Some(reading) = bus
            .read_block(node.bus_address, READ_EXIT_AT_LEVEL, width, sink)
            .await
        {
            node.exit_at_level = codec::unpack_rssi(node.api_level, &reading.data);
        }
        info!(
            index = node.index,
            api_level = node.api_level,
            freq = node.frequency_khz,
            enter_at = node.enter_at_level,
            exit_at = node.exit_at_level,
            "node configuration latched"
        );
    } else {
        info!(index = node.index, api_level = node.api_level, "legacy node");
    }
}
