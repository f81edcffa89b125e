//! Optional environmental sensor polling. Adjacent to lap
//! timing — probed under the same bus semaphore and quiet-time discipline,
//! but its failures are logged and non-fatal, and nothing here feeds back
//! into lap/crossing detection.

use std::fs;

use tracing::warn;

use crate::bus::BusTransactor;
use crate::callbacks::EventSink;
use crate::consts::{BME280_ADDRESSES, CORE_TEMP_PATH};

const CHIP_ID_REG: u8 = 0xD0;
const BME280_CHIP_ID: u8 = 0x60;
const CALIB00_REG: u8 = 0x88;
const CALIB00_LEN: usize = 26;
const CTRL_MEAS_REG: u8 = 0xF4;
const DATA_REG: u8 = 0xF7;
const DATA_LEN: usize = 8;
/// Forced-mode, oversampling x1 for temperature and pressure (humidity
/// oversampling is configured separately on real hardware; omitted here
/// since this adjacent component only compensates temperature).
const CTRL_MEAS_FORCED_OSRS1: u8 = 0b001_001_01;

#[derive(Debug, Clone, Copy, Default)]
struct Calibration {
    dig_t1: u16,
    dig_t2: i16,
    dig_t3: i16,
}

fn parse_calibration(raw: &[u8]) -> Calibration {
    Calibration {
        dig_t1: u16::from_le_bytes([raw[0], raw[1]]),
        dig_t2: i16::from_le_bytes([raw[2], raw[3]]),
        dig_t3: i16::from_le_bytes([raw[4], raw[5]]),
    }
}

/// Bosch datasheet reference compensation formula (fixed-point, degrees C
/// x100), reproduced from the BME280 datasheet's `compensate_T_int32`.
fn compensate_temperature(adc_t: i32, calib: &Calibration) -> (f32, i32) {
    let var1 = (((adc_t >> 3) - ((calib.dig_t1 as i32) << 1)) * (calib.dig_t2 as i32)) >> 11;
    let var2 = (((((adc_t >> 4) - (calib.dig_t1 as i32)) * ((adc_t >> 4) - (calib.dig_t1 as i32))) >> 12)
        * (calib.dig_t3 as i32))
        >> 14;
    let t_fine = var1 + var2;
    let temperature_c_x100 = (t_fine * 5 + 128) >> 8;
    (temperature_c_x100 as f32 / 100.0, t_fine)
}

#[derive(Debug, Clone, Default)]
pub struct EnvironmentalReading {
    pub temperature_c: f32,
    /// Raw, uncompensated ADC counts; full humidity/pressure compensation
    /// is out of proportion to this adjacent, non-timing-critical component.
    pub raw_pressure: u32,
    pub raw_humidity: u16,
}

pub struct EnvironmentalSensors {
    respondents: Vec<u8>,
    calibrations: Vec<Calibration>,
    pub readings: Vec<EnvironmentalReading>,
    pub core_temp_c: f32,
}

impl EnvironmentalSensors {
    /// Probes the two supported addresses; an absent sensor is not an
    /// error, matching the registry's own probe semantics.
    pub async fn probe(bus: &BusTransactor, sink: &dyn EventSink) -> Self {
        let mut respondents = Vec::new();
        let mut calibrations = Vec::new();
        let mut readings = Vec::new();

        for &addr in BME280_ADDRESSES.iter() {
            if let Some(chip_id) = bus.read_raw(addr, CHIP_ID_REG, 1, sink).await {
                if chip_id.first() == Some(&BME280_CHIP_ID) {
                    if let Some(calib) = bus.read_raw(addr, CALIB00_REG, CALIB00_LEN, sink).await {
                        respondents.push(addr);
                        calibrations.push(parse_calibration(&calib));
                        readings.push(EnvironmentalReading::default());
                    }
                }
            }
        }

        EnvironmentalSensors {
            respondents,
            calibrations,
            readings,
            core_temp_c: read_core_temp().unwrap_or(0.0),
        }
    }

    /// Samples every respondent and refreshes the host CPU core
    /// temperature.
    pub async fn update(&mut self, bus: &BusTransactor, sink: &dyn EventSink) {
        for (i, &addr) in self.respondents.clone().iter().enumerate() {
            if !bus.write_raw(addr, CTRL_MEAS_REG, &[CTRL_MEAS_FORCED_OSRS1], sink).await {
                warn!(addr, "BME280 Read Error: forced-mode trigger failed");
                sink.hardware_log(&format!("BME280 Read Error: addr={addr}"));
                continue;
            }
            match bus.read_raw(addr, DATA_REG, DATA_LEN, sink).await {
                Some(data) => {
                    let raw_pressure = ((data[0] as u32) << 12) | ((data[1] as u32) << 4) | ((data[2] as u32) >> 4);
                    let adc_t = ((data[3] as i32) << 12) | ((data[4] as i32) << 4) | ((data[5] as i32) >> 4);
                    let raw_humidity = u16::from_be_bytes([data[6], data[7]]);
                    let (temperature_c, _) = compensate_temperature(adc_t, &self.calibrations[i]);
                    self.readings[i] = EnvironmentalReading {
                        temperature_c,
                        raw_pressure,
                        raw_humidity,
                    };
                }
                None => {
                    warn!(addr, "BME280 Read Error: no response");
                    sink.hardware_log(&format!("BME280 Read Error: addr={addr}"));
                }
            }
        }

        if let Some(temp) = read_core_temp() {
            self.core_temp_c = temp;
        }
    }
}

fn read_core_temp() -> Option<f32> {
    let raw = fs::read_to_string(CORE_TEMP_PATH).ok()?;
    raw.trim().parse::<f32>().ok().map(|millidegrees| millidegrees / 1000.0)
}
