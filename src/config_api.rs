//! Write-with-read-back configuration operations. Every
//! setter is "best effort": on retry exhaustion the caller gets the last
//! echoed (or, failing that, the requested) value rather than an error —
//! a read-back mismatch is logged, never fatal.

use tracing::warn;

use crate::bus::BusTransactor;
use crate::callbacks::EventSink;
use crate::codec;
use crate::consts::{
    BROADCAST_ADDRESS, DEFAULT_FREQUENCY_KHZ, FORCE_END_CROSSING, READ_ENTER_AT_LEVEL,
    READ_EXIT_AT_LEVEL, READ_FREQUENCY, WRITE_ENTER_AT_LEVEL, WRITE_EXIT_AT_LEVEL,
    WRITE_FREQUENCY, WRITE_MARK_START_TIME,
};
use crate::node::Node;

/// Write `in_value` to `write_reg`, read back from `read_reg`, retry on
/// mismatch up to `retries`. A 16-bit read-back that equals `in_value +
/// 2^16` is also accepted (the node sign-extends a negative write).
async fn set_and_validate_u16(
    bus: &BusTransactor,
    address: u8,
    write_reg: u8,
    read_reg: u8,
    in_value: u16,
    retries: u32,
    sink: &dyn EventSink,
) -> u16 {
    let mut out_value = None;
    for _ in 0..retries {
        bus.write_block(address, write_reg, &codec::pack_u16_be(in_value), sink)
            .await;
        out_value = bus
            .read_block(address, read_reg, 2, sink)
            .await
            .map(|r| codec::unpack_u16_be(&r.data));
        if out_value == Some(in_value) {
            return in_value;
        }
        if let Some(echoed) = out_value {
            warn!(write_reg, in_value, echoed, "value not set, retrying");
            sink.hardware_log(&format!(
                "Value Not Set: reg={write_reg} in={in_value} echoed={echoed}"
            ));
        }
    }
    out_value.unwrap_or(in_value)
}

/// 8-bit counterpart of [`set_and_validate_u16`].
async fn set_and_validate_u8(
    bus: &BusTransactor,
    address: u8,
    write_reg: u8,
    read_reg: u8,
    in_value: u8,
    retries: u32,
    sink: &dyn EventSink,
) -> u8 {
    let mut out_value = None;
    for _ in 0..retries {
        bus.write_block(address, write_reg, &codec::pack_u8(in_value), sink)
            .await;
        out_value = bus
            .read_block(address, read_reg, 1, sink)
            .await
            .map(|r| codec::unpack_u8(&r.data));
        if out_value == Some(in_value) {
            return in_value;
        }
        if let Some(echoed) = out_value {
            warn!(write_reg, in_value, echoed, "value not set, retrying");
            sink.hardware_log(&format!(
                "Value Not Set: reg={write_reg} in={in_value} echoed={echoed}"
            ));
        }
    }
    out_value.unwrap_or(in_value)
}

/// RSSI-width-aware set-and-validate: one byte from api_level 18 onward,
/// two bytes before that.
async fn set_and_validate_rssi(
    bus: &BusTransactor,
    node: &Node,
    write_reg: u8,
    read_reg: u8,
    level: u16,
    retries: u32,
    sink: &dyn EventSink,
) -> u16 {
    if node.api_level >= 18 {
        set_and_validate_u8(bus, node.bus_address, write_reg, read_reg, level as u8, retries, sink).await as u16
    } else {
        set_and_validate_u16(bus, node.bus_address, write_reg, read_reg, level, retries, sink).await
    }
}

/// Sets the radio channel. `freq_khz == 0` disables the node: the default
/// channel is still pushed to the wire, but `0` is what's persisted locally.
pub async fn set_frequency(
    bus: &BusTransactor,
    node: &mut Node,
    freq_khz: u16,
    retries: u32,
    sink: &dyn EventSink,
) {
    if freq_khz != 0 {
        node.frequency_khz =
            set_and_validate_u16(bus, node.bus_address, WRITE_FREQUENCY, READ_FREQUENCY, freq_khz, retries, sink)
                .await;
    } else {
        set_and_validate_u16(
            bus,
            node.bus_address,
            WRITE_FREQUENCY,
            READ_FREQUENCY,
            DEFAULT_FREQUENCY_KHZ,
            retries,
            sink,
        )
        .await;
        node.frequency_khz = 0;
    }
}

/// Sets the enter-at RSSI threshold; no-op on a node without validated API
/// capability.
pub async fn set_enter_at_level(
    bus: &BusTransactor,
    node: &mut Node,
    level: u16,
    retries: u32,
    sink: &dyn EventSink,
) -> bool {
    if !node.api_valid_flag {
        return false;
    }
    node.enter_at_level =
        set_and_validate_rssi(bus, node, WRITE_ENTER_AT_LEVEL, READ_ENTER_AT_LEVEL, level, retries, sink).await;
    true
}

/// Exit-at counterpart of [`set_enter_at_level`].
pub async fn set_exit_at_level(
    bus: &BusTransactor,
    node: &mut Node,
    level: u16,
    retries: u32,
    sink: &dyn EventSink,
) -> bool {
    if !node.api_valid_flag {
        return false;
    }
    node.exit_at_level =
        set_and_validate_rssi(bus, node, WRITE_EXIT_AT_LEVEL, READ_EXIT_AT_LEVEL, level, retries, sink).await;
    true
}

/// Transmits a capture-derived threshold without mutating `node` (the
/// caller — `capture.rs`'s driver in the poll loop — already updated its
/// copy from the averaging window; this just pushes it to the wire and
/// read-back-validates).
pub async fn transmit_enter_at_level(bus: &BusTransactor, node: &Node, level: u16, retries: u32, sink: &dyn EventSink) -> u16 {
    set_and_validate_rssi(bus, node, WRITE_ENTER_AT_LEVEL, READ_ENTER_AT_LEVEL, level, retries, sink).await
}

pub async fn transmit_exit_at_level(bus: &BusTransactor, node: &Node, level: u16, retries: u32, sink: &dyn EventSink) -> u16 {
    set_and_validate_rssi(bus, node, WRITE_EXIT_AT_LEVEL, READ_EXIT_AT_LEVEL, level, retries, sink).await
}

/// Marks the time origin. If the first node is api_level >= 15, one
/// broadcast write suffices; otherwise every capability-valid node gets its
/// own write.
pub async fn mark_start_time(bus: &BusTransactor, nodes: &[Node], pi_time_sec: f64, retries: u32, sink: &dyn EventSink) {
    let ms = (pi_time_sec * 1000.0).round() as u32;
    let use_broadcast = nodes.first().map(|n| n.api_level >= 15).unwrap_or(false);
    if use_broadcast {
        write_u32_retrying(bus, BROADCAST_ADDRESS, WRITE_MARK_START_TIME, ms, retries, sink).await;
    } else {
        for node in nodes.iter().filter(|n| n.api_valid_flag) {
            write_u32_retrying(bus, node.bus_address, WRITE_MARK_START_TIME, ms, retries, sink).await;
        }
    }
}

async fn write_u32_retrying(bus: &BusTransactor, address: u8, reg: u8, value: u32, retries: u32, sink: &dyn EventSink) -> bool {
    for _ in 0..retries {
        if bus.write_block(address, reg, &codec::pack_u32_be(value), sink).await {
            return true;
        }
    }
    false
}

/// Kills the current crossing flag regardless of RSSI, if the node supports
/// it (api_level >= 14).
pub async fn force_end_crossing(bus: &BusTransactor, node: &Node, retries: u32, sink: &dyn EventSink) -> bool {
    if node.api_level < 14 {
        return false;
    }
    write_u8_retrying(bus, node.bus_address, FORCE_END_CROSSING, 0, retries, sink).await
}

async fn write_u8_retrying(bus: &BusTransactor, address: u8, reg: u8, value: u8, retries: u32, sink: &dyn EventSink) -> bool {
    for _ in 0..retries {
        if bus.write_block(address, reg, &codec::pack_u8(value), sink).await {
            return true;
        }
    }
    false
}
