//! Ties the components together into the single handle a caller holds: bus
//! ownership, the immutable-after-discovery node registry, and the
//! subscriber sink. Config calls and the background poll task share this
//! handle and contend on the same bus semaphore — there is exactly one
//! cooperative scheduler for bus access, never two competing loops.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::info;

use crate::bus::{BusTransactor, I2cTransport};
use crate::callbacks::EventSink;
use crate::capture;
use crate::clock::Clock;
use crate::config_api;
use crate::consts::{CAP_ENTER_EXIT_AT_MILLIS, I2C_CHILL_TIME, I2C_RETRY_COUNT, UPDATE_SLEEP};
use crate::error::BusError;
use crate::node::{LapSource, Node};
use crate::poll;
use crate::registry;

#[derive(Debug, Clone, Copy)]
pub struct TimingConfig {
    pub update_sleep: Duration,
    pub chill_time: Duration,
    pub retry_count: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        TimingConfig {
            update_sleep: UPDATE_SLEEP,
            chill_time: I2C_CHILL_TIME,
            retry_count: I2C_RETRY_COUNT,
        }
    }
}

pub struct HardwareInterface {
    bus: BusTransactor,
    nodes: Mutex<Vec<Node>>,
    sink: Arc<dyn EventSink>,
    clock: Clock,
    retries: u32,
    update_sleep: Duration,
}

impl HardwareInterface {
    /// Probes the bus and latches per-node configuration.
    /// An empty registry (no respondents) is a valid, non-fatal outcome.
    pub async fn discover(transport: Box<dyn I2cTransport>, sink: Arc<dyn EventSink>, timing: TimingConfig) -> Self {
        let bus = BusTransactor::with_timing(transport, timing.chill_time, timing.retry_count);
        let nodes = registry::discover(&bus, sink.as_ref()).await;
        info!(node_count = nodes.len(), "discovery complete");
        HardwareInterface {
            bus,
            nodes: Mutex::new(nodes),
            sink,
            clock: Clock::new(),
            retries: timing.retry_count,
            update_sleep: timing.update_sleep,
        }
    }

    /// Spawns the background polling task. The task
    /// runs until the process is interrupted; there is no per-transaction
    /// cancellation.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                {
                    let mut nodes = this.nodes.lock().await;
                    poll::poll_once(&mut nodes, &this.bus, this.sink.as_ref(), this.retries, &this.clock).await;
                }
                tokio::time::sleep(this.update_sleep).await;
            }
        })
    }

    pub async fn node_count(&self) -> usize {
        self.nodes.lock().await.len()
    }

    /// Exposes the shared bus and sink so an adjacent poller (the
    /// environmental sensors, say) can reuse the same semaphore and
    /// subscriber instead of opening a second transport.
    pub fn bus(&self) -> &BusTransactor {
        &self.bus
    }

    pub fn sink(&self) -> &Arc<dyn EventSink> {
        &self.sink
    }

    /// Snapshot of one node's state; useful for a UI/server collaborator
    /// that polls rather than subscribes.
    pub async fn node_snapshot(&self, index: usize) -> Result<Node, BusError> {
        let nodes = self.nodes.lock().await;
        nodes.get(index).cloned().ok_or(BusError::UnknownNode(index))
    }

    /// Swaps out a node's history buffers under the bus lock, for snapshot
    /// consistency.
    pub async fn drain_history(&self, index: usize) -> Result<(Vec<u16>, Vec<Instant>), BusError> {
        let mut nodes = self.nodes.lock().await;
        let node = nodes.get_mut(index).ok_or(BusError::UnknownNode(index))?;
        Ok(node.drain_history())
    }

    pub async fn set_frequency(&self, index: usize, freq_khz: u16) -> Result<(), BusError> {
        let mut nodes = self.nodes.lock().await;
        let node = nodes.get_mut(index).ok_or(BusError::UnknownNode(index))?;
        config_api::set_frequency(&self.bus, node, freq_khz, self.retries, self.sink.as_ref()).await;
        Ok(())
    }

    pub async fn set_enter_at_level(&self, index: usize, level: u16) -> Result<bool, BusError> {
        let mut nodes = self.nodes.lock().await;
        let node = nodes.get_mut(index).ok_or(BusError::UnknownNode(index))?;
        Ok(config_api::set_enter_at_level(&self.bus, node, level, self.retries, self.sink.as_ref()).await)
    }

    pub async fn set_exit_at_level(&self, index: usize, level: u16) -> Result<bool, BusError> {
        let mut nodes = self.nodes.lock().await;
        let node = nodes.get_mut(index).ok_or(BusError::UnknownNode(index))?;
        Ok(config_api::set_exit_at_level(&self.bus, node, level, self.retries, self.sink.as_ref()).await)
    }

    /// Broadcasts (api_level >= 15 on the first node) or per-node marks the
    /// wall-clock-to-monotonic time origin.
    pub async fn mark_start_time(&self, pi_time_sec: f64) {
        let nodes = self.nodes.lock().await;
        config_api::mark_start_time(&self.bus, &nodes, pi_time_sec, self.retries, self.sink.as_ref()).await;
    }

    pub async fn force_end_crossing(&self, index: usize) -> Result<bool, BusError> {
        let nodes = self.nodes.lock().await;
        let node = nodes.get(index).ok_or(BusError::UnknownNode(index))?;
        Ok(config_api::force_end_crossing(&self.bus, node, self.retries, self.sink.as_ref()).await)
    }

    /// Injects a lap directly, bypassing `last_lap_id` gating (the gating
    /// only suppresses the *first* realtime observation after discovery;
    /// a manual injection is by definition not that).
    pub async fn intf_simulate_lap(&self, index: usize, ms: u32) -> Result<(), BusError> {
        let mut nodes = self.nodes.lock().await;
        let node = nodes.get_mut(index).ok_or(BusError::UnknownNode(index))?;
        node.lap_ms_since_start = ms;
        self.sink.pass_record(node, ms, LapSource::Manual);
        Ok(())
    }

    pub async fn start_capture_enter_at(&self, index: usize) -> Result<bool, BusError> {
        let mut nodes = self.nodes.lock().await;
        let node = nodes.get_mut(index).ok_or(BusError::UnknownNode(index))?;
        Ok(capture::start_enter_at(node, self.clock.now_ms()))
    }

    pub async fn start_capture_exit_at(&self, index: usize) -> Result<bool, BusError> {
        let mut nodes = self.nodes.lock().await;
        let node = nodes.get_mut(index).ok_or(BusError::UnknownNode(index))?;
        Ok(capture::start_exit_at(node, self.clock.now_ms()))
    }
}

/// Exposed for callers that want to know the capture window length without
/// hardcoding the constant (e.g. a UI progress bar).
pub const CAPTURE_WINDOW_MILLIS: u64 = CAP_ENTER_EXIT_AT_MILLIS;
