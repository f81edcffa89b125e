//! Serialized, retrying bus transactor.
//!
//! The I2C bus is the sole shared mutable resource: every transaction is
//! funneled through one `tokio::sync::Mutex`, acting as a binary semaphore
//! whose acquisition is scoped (an RAII guard) so release is guaranteed on
//! every exit path, including a failed transaction.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{trace, warn};

use crate::callbacks::EventSink;
use crate::codec;
use crate::consts::I2C_CHILL_TIME;

/// Blocking transport boundary. Implementations talk to real silicon (see
/// `RppalTransport`, feature `hardware`) or a test double (`MockTransport`).
/// Kept as a trait so the bus is a compile-time-optional
/// component rather than something that only builds on a Raspberry Pi.
pub trait I2cTransport: Send {
    /// Issues a block read of `size` bytes from (`address`, `register`).
    fn read_block(&mut self, address: u8, register: u8, size: usize) -> std::io::Result<Vec<u8>>;

    /// Issues a block write of `payload` to (`address`, `register`).
    fn write_block(&mut self, address: u8, register: u8, payload: &[u8]) -> std::io::Result<()>;
}

/// Raw bytes plus the host timestamps bracketing the round trip, needed by
/// the poll loop's latency-compensated `readtime`.
#[derive(Debug, Clone)]
pub struct BusReading {
    pub data: Vec<u8>,
    pub t_request: Instant,
    pub t_response: Instant,
}

struct BusState {
    transport: Box<dyn I2cTransport>,
    last_activity: Option<Instant>,
}

pub struct BusTransactor {
    state: Mutex<BusState>,
    chill_time: Duration,
    retry_count: u32,
}

impl BusTransactor {
    pub fn new(transport: Box<dyn I2cTransport>) -> Self {
        Self::with_timing(transport, I2C_CHILL_TIME, crate::consts::I2C_RETRY_COUNT)
    }

    pub fn with_timing(transport: Box<dyn I2cTransport>, chill_time: Duration, retry_count: u32) -> Self {
        BusTransactor {
            state: Mutex::new(BusState {
                transport,
                last_activity: None,
            }),
            chill_time,
            retry_count,
        }
    }

    /// Waits out whatever remains of the quiet period since the previous
    /// transaction. The first transaction has no such obligation.
    async fn wait_quiet(&self, last_activity: Option<Instant>) {
        if let Some(last) = last_activity {
            let elapsed = last.elapsed();
            if elapsed < self.chill_time {
                tokio::time::sleep(self.chill_time - elapsed).await;
            }
        }
    }

    /// Reads `size` data bytes (the transaction itself requests `size + 1`
    /// to account for the trailing checksum byte) with retry on checksum
    /// mismatch or I/O error. Returns `None` once `retry_count` attempts are
    /// exhausted; never raises.
    pub async fn read_block(
        &self,
        address: u8,
        register: u8,
        size: usize,
        sink: &dyn EventSink,
    ) -> Option<BusReading> {
        let mut retry = 0u32;
        while retry < self.retry_count {
            let mut guard = self.state.lock().await;
            self.wait_quiet(guard.last_activity).await;

            let t_request = Instant::now();
            let result = tokio::task::block_in_place(|| guard.transport.read_block(address, register, size + 1));
            let t_response = Instant::now();
            guard.last_activity = Some(t_response);

            match result {
                Ok(data) => {
                    if codec::validate(&data) {
                        return Some(BusReading {
                            data: data[..size].to_vec(),
                            t_request,
                            t_response,
                        });
                    }
                    retry += 1;
                    log_retry(sink, "checksum", address, register, size, retry, self.retry_count);
                }
                Err(err) => {
                    warn!(%err, addr = address, reg = register, "i2c read error");
                    sink.hardware_log(&format!("Read Error: {err}"));
                    retry += 1;
                    log_retry(sink, "IOError", address, register, size, retry, self.retry_count);
                }
            }
        }
        None
    }

    /// Writes `payload` after appending `register` and a checksum byte, per
    /// the wire convention the source uses. Retries on
    /// I/O error; returns `false` once exhausted.
    pub async fn write_block(
        &self,
        address: u8,
        register: u8,
        payload: &[u8],
        sink: &dyn EventSink,
    ) -> bool {
        let framed = frame_write(payload, register);

        let mut retry = 0u32;
        while retry < self.retry_count {
            let mut guard = self.state.lock().await;
            self.wait_quiet(guard.last_activity).await;

            let result = tokio::task::block_in_place(|| guard.transport.write_block(address, register, &framed));
            guard.last_activity = Some(Instant::now());

            match result {
                Ok(()) => return true,
                Err(err) => {
                    warn!(%err, addr = address, reg = register, "i2c write error");
                    sink.hardware_log(&format!("Write Error: {err}"));
                    retry += 1;
                    log_retry(sink, "IOError", address, register, payload.len(), retry, self.retry_count);
                }
            }
        }
        false
    }

    /// Unframed counterpart of [`BusTransactor::read_block`] for peripherals
    /// that don't speak the node's checksum-suffixed wire convention (the
    /// BME280 in `env.rs`, notably). Same mutex, quiet-time wait, and retry
    /// bound; no checksum byte requested or validated.
    pub async fn read_raw(
        &self,
        address: u8,
        register: u8,
        size: usize,
        sink: &dyn EventSink,
    ) -> Option<Vec<u8>> {
        let mut retry = 0u32;
        while retry < self.retry_count {
            let mut guard = self.state.lock().await;
            self.wait_quiet(guard.last_activity).await;

            let result = tokio::task::block_in_place(|| guard.transport.read_block(address, register, size));
            guard.last_activity = Some(Instant::now());

            match result {
                Ok(data) => return Some(data),
                Err(err) => {
                    warn!(%err, addr = address, reg = register, "i2c raw read error");
                    sink.hardware_log(&format!("Read Error: {err}"));
                    retry += 1;
                    log_retry(sink, "IOError", address, register, size, retry, self.retry_count);
                }
            }
        }
        None
    }

    /// Unframed counterpart of [`BusTransactor::write_block`]: writes
    /// `payload` to (`address`, `register`) with no appended checksum byte.
    pub async fn write_raw(&self, address: u8, register: u8, payload: &[u8], sink: &dyn EventSink) -> bool {
        let mut retry = 0u32;
        while retry < self.retry_count {
            let mut guard = self.state.lock().await;
            self.wait_quiet(guard.last_activity).await;

            let result = tokio::task::block_in_place(|| guard.transport.write_block(address, register, payload));
            guard.last_activity = Some(Instant::now());

            match result {
                Ok(()) => return true,
                Err(err) => {
                    warn!(%err, addr = address, reg = register, "i2c raw write error");
                    sink.hardware_log(&format!("Write Error: {err}"));
                    retry += 1;
                    log_retry(sink, "IOError", address, register, payload.len(), retry, self.retry_count);
                }
            }
        }
        false
    }
}

/// Appends `register` then a checksum byte to `payload`, matching the wire
/// convention the original firmware expects on a write.
fn frame_write(payload: &[u8], register: u8) -> Vec<u8> {
    let mut framed = payload.to_vec();
    framed.push(register);
    let sum = codec::checksum(&[&framed[..], &[0]].concat());
    framed.push(sum);
    framed
}

fn log_retry(
    sink: &dyn EventSink,
    kind: &str,
    address: u8,
    register: u8,
    size: usize,
    retry: u32,
    limit: u32,
) {
    if retry < limit {
        if retry > 1 {
            let msg = format!(
                "Retry ({kind}) in bus transaction: addr={address} reg={register} size={size} retry={retry}"
            );
            trace!("{msg}");
            sink.hardware_log(&msg);
        }
    } else {
        let msg = format!(
            "Retry ({kind}) limit reached: addr={address} reg={register} size={size} retry={retry}"
        );
        warn!("{msg}");
        sink.hardware_log(&msg);
    }
}

/// Raspberry-Pi I2C transport backed by `rppal`. Only compiled with
/// `--features hardware`.
#[cfg(feature = "hardware")]
pub struct RppalTransport {
    bus: rppal::i2c::I2c,
}

#[cfg(feature = "hardware")]
impl RppalTransport {
    pub fn open(bus: u8) -> Result<Self, rppal::i2c::Error> {
        let mut i2c = rppal::i2c::I2c::with_bus(bus)?;
        i2c.set_timeout(50_000)?;
        Ok(RppalTransport { bus: i2c })
    }
}

#[cfg(feature = "hardware")]
impl I2cTransport for RppalTransport {
    fn read_block(&mut self, address: u8, register: u8, size: usize) -> std::io::Result<Vec<u8>> {
        self.bus
            .set_slave_address(address as u16)
            .map_err(to_io_error)?;
        let mut buf = vec![0u8; size];
        self.bus
            .block_read(register, &mut buf)
            .map_err(to_io_error)?;
        Ok(buf)
    }

    fn write_block(&mut self, address: u8, register: u8, payload: &[u8]) -> std::io::Result<()> {
        self.bus
            .set_slave_address(address as u16)
            .map_err(to_io_error)?;
        self.bus.block_write(register, payload).map_err(to_io_error)
    }
}

#[cfg(feature = "hardware")]
fn to_io_error(err: rppal::i2c::Error) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, err)
}

/// In-memory transport used by tests and `--mock`. Addresses present in
/// `registers` respond; everything else returns an I/O error, mirroring a
/// genuinely absent node.
#[derive(Default)]
pub struct MockTransport {
    pub present: std::collections::HashSet<u8>,
    /// Scripted responses keyed by (address, register); each call pops the
    /// front of the queue for that key.
    pub responses: std::collections::HashMap<(u8, u8), std::collections::VecDeque<Vec<u8>>>,
    pub writes: Vec<(u8, u8, Vec<u8>)>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_response(&mut self, address: u8, register: u8, framed_bytes: Vec<u8>) {
        self.responses
            .entry((address, register))
            .or_default()
            .push_back(framed_bytes);
    }
}

impl I2cTransport for MockTransport {
    fn read_block(&mut self, address: u8, register: u8, size: usize) -> std::io::Result<Vec<u8>> {
        if !self.present.contains(&address) {
            return Err(std::io::Error::new(std::io::ErrorKind::NotFound, "no node"));
        }
        let queue = self.responses.entry((address, register)).or_default();
        let _ = size; // scripted responses carry their own length
        match queue.pop_front() {
            Some(bytes) => Ok(bytes),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::WouldBlock,
                "no scripted response",
            )),
        }
    }

    fn write_block(&mut self, address: u8, register: u8, payload: &[u8]) -> std::io::Result<()> {
        if !self.present.contains(&address) && address != crate::consts::BROADCAST_ADDRESS {
            return Err(std::io::Error::new(std::io::ErrorKind::NotFound, "no node"));
        }
        self.writes.push((address, register, payload.to_vec()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::NullSink;

    fn framed(payload: &[u8]) -> Vec<u8> {
        let mut v = payload.to_vec();
        let sum = codec::checksum(&[v.as_slice(), &[0]].concat());
        v.push(sum);
        v
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn read_block_returns_payload_on_valid_checksum() {
        let mut transport = MockTransport::new();
        transport.present.insert(8);
        transport.queue_response(8, 0x03, framed(&[0x12, 0x34]));
        let bus = BusTransactor::new(Box::new(transport));
        let sink = NullSink;
        let result = bus.read_block(8, 0x03, 2, &sink).await.unwrap();
        assert_eq!(result.data, vec![0x12, 0x34]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn read_block_retries_bounded_on_missing_node() {
        let transport = MockTransport::new(); // nothing present
        let bus = BusTransactor::with_timing(Box::new(transport), Duration::from_millis(0), 3);
        let sink = NullSink;
        let result = bus.read_block(8, 0x03, 2, &sink).await;
        assert!(result.is_none());
    }

    #[test]
    fn frame_write_appends_register_and_checksum() {
        let framed = frame_write(&[0x16, 0xA0], 0x51);
        assert_eq!(framed[..2], [0x16, 0xA0]);
        assert_eq!(framed[2], 0x51);
        assert!(codec::validate(&framed));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn write_block_succeeds_against_present_node() {
        let mut transport = MockTransport::new();
        transport.present.insert(8);
        let bus = BusTransactor::with_timing(Box::new(transport), Duration::from_millis(0), 5);
        let sink = NullSink;
        let ok = bus.write_block(8, 0x51, &[0x16, 0xA0], &sink).await;
        assert!(ok);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn quiet_time_elapses_between_transactions() {
        let mut transport = MockTransport::new();
        transport.present.insert(8);
        transport.queue_response(8, 0x00, framed(&[0x01]));
        transport.queue_response(8, 0x00, framed(&[0x01]));
        let chill = Duration::from_millis(30);
        let bus = BusTransactor::with_timing(Box::new(transport), chill, 5);
        let sink = NullSink;
        let start = Instant::now();
        bus.read_block(8, 0x00, 1, &sink).await.unwrap();
        bus.read_block(8, 0x00, 1, &sink).await.unwrap();
        assert!(start.elapsed() >= chill);
    }
}
