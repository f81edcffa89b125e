//! The four subscriber hooks exposed by the core, modeled as a
//! single capability trait rather than four optional
//! function pointers each checked with `is_callable` before use. A missing
//! subscriber is simply the default no-op implementation.

use crate::node::{LapSource, Node};

pub trait EventSink: Send + Sync {
    fn pass_record(&self, _node: &Node, _lap_time_ms: u32, _source: LapSource) {}

    fn hardware_log(&self, _message: &str) {}

    fn new_enter_or_exit_at(&self, _node: &Node, _is_enter: bool) {}

    fn node_crossing(&self, _node: &Node) {}
}

/// Default sink used when the caller doesn't need to subscribe to anything;
/// hardware log lines are still surfaced through `tracing` by the interface
/// itself (see `interface.rs`), so this isn't a silent drop.
#[derive(Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {}
