//! Time-boxed RSSI averaging used to derive enter-at / exit-at thresholds.
//! Pure state transitions on `Node`; the caller (the poll loop / interface)
//! is responsible for transmitting the derived threshold to the node and
//! invoking the subscriber callback.

use crate::consts::{CAP_ENTER_EXIT_AT_MILLIS, ENTER_AT_PEAK_MARGIN};
use crate::node::Node;

/// Starts an enter-at capture window. Fails if one is already running or the
/// node doesn't support capability-gated configuration.
pub fn start_enter_at(node: &mut Node, now_ms: u64) -> bool {
    if node.cap_enter_at.active || !node.api_valid_flag {
        return false;
    }
    node.cap_enter_at.start(now_ms + CAP_ENTER_EXIT_AT_MILLIS);
    true
}

/// Starts an exit-at capture window; symmetric with [`start_enter_at`].
pub fn start_exit_at(node: &mut Node, now_ms: u64) -> bool {
    if node.cap_exit_at.active || !node.api_valid_flag {
        return false;
    }
    node.cap_exit_at.start(now_ms + CAP_ENTER_EXIT_AT_MILLIS);
    true
}

/// Accumulates one valid RSSI sample into whichever capture windows are
/// active. Call once per poll, after the RSSI sanity filter passes.
pub fn accumulate(node: &mut Node, rssi: u16) {
    if node.cap_enter_at.active {
        node.cap_enter_at.accumulate(rssi);
    }
    if node.cap_exit_at.active {
        node.cap_exit_at.accumulate(rssi);
    }
}

/// If the enter-at deadline has elapsed, finalizes the level (applying the
/// peak-margin clamp), clears the capture flag, and returns the new level
/// for the caller to transmit and announce. Returns `None` while still
/// capturing.
pub fn finish_enter_at_if_due(node: &mut Node, now_ms: u64) -> Option<u16> {
    if !node.cap_enter_at.active || now_ms < node.cap_enter_at.deadline_ms {
        return None;
    }
    let mut level = node.cap_enter_at.mean();
    if node.node_peak_rssi > 0 && node.node_peak_rssi.saturating_sub(level) < ENTER_AT_PEAK_MARGIN {
        level = node.node_peak_rssi.saturating_sub(ENTER_AT_PEAK_MARGIN);
    }
    node.cap_enter_at.active = false;
    Some(level)
}

/// Exit-at counterpart; no peak-margin clamp.
pub fn finish_exit_at_if_due(node: &mut Node, now_ms: u64) -> Option<u16> {
    if !node.cap_exit_at.active || now_ms < node.cap_exit_at.deadline_ms {
        return None;
    }
    let level = node.cap_exit_at.mean();
    node.cap_exit_at.active = false;
    Some(level)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_node() -> Node {
        let mut n = Node::new(0, 8);
        n.api_valid_flag = true;
        n
    }

    #[test]
    fn cannot_start_capture_twice() {
        let mut node = valid_node();
        assert!(start_enter_at(&mut node, 0));
        assert!(!start_enter_at(&mut node, 0));
    }

    #[test]
    fn cannot_capture_on_invalid_api_node() {
        let mut node = Node::new(0, 8);
        assert!(!start_enter_at(&mut node, 0));
    }

    #[test]
    fn capture_finishes_after_deadline_with_averaged_level() {
        let mut node = valid_node();
        node.node_peak_rssi = 152;
        start_enter_at(&mut node, 0);
        for rssi in [100u16, 110, 120, 130, 140, 150] {
            accumulate(&mut node, rssi);
        }
        assert!(finish_enter_at_if_due(&mut node, 2999).is_none());
        let level = finish_enter_at_if_due(&mut node, 3000).unwrap();
        // mean is 125; peak margin would clamp toward 152-5=147, but mean
        // (125) is already >= margin away from peak, so no clamp applies.
        assert_eq!(level, 125);
        assert!(!node.cap_enter_at.active);
    }

    #[test]
    fn capture_clamps_to_peak_margin_when_too_close_to_peak() {
        let mut node = valid_node();
        node.node_peak_rssi = 152;
        start_enter_at(&mut node, 0);
        for rssi in [148u16, 149, 150, 151, 152, 150] {
            accumulate(&mut node, rssi);
        }
        let level = finish_enter_at_if_due(&mut node, 3000).unwrap();
        assert_eq!(level, 147);
    }

    #[test]
    fn capture_clamp_does_not_underflow_on_low_lifetime_peak() {
        let mut node = valid_node();
        node.node_peak_rssi = 3; // legal per [MIN_RSSI_VALUE, MAX_RSSI_VALUE], well under the margin
        start_enter_at(&mut node, 0);
        for rssi in [1u16, 2, 3] {
            accumulate(&mut node, rssi);
        }
        let level = finish_enter_at_if_due(&mut node, 3000).unwrap();
        assert_eq!(level, 0);
    }

    #[test]
    fn exit_at_capture_has_no_peak_clamp() {
        let mut node = valid_node();
        node.node_peak_rssi = 200;
        start_exit_at(&mut node, 0);
        accumulate(&mut node, 198);
        accumulate(&mut node, 199);
        let level = finish_exit_at_if_due(&mut node, 3000).unwrap();
        assert_eq!(level, 199); // f64::round() rounds 198.5 away from zero, to 199
    }
}
