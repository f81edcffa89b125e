//! `LapStats` frame decoding. Pure decode only — the RSSI
//! sanity filter and any business reaction to the decoded fields live in
//! `poll.rs`, which has the node context needed to log and skip.
//!
//! Layout reference (api_level, size in bytes excluding the checksum byte):
//!
//! | tier        | size | lap_id | lap value          | rssi  | nodePeak | passPeak | loopTime | cross | nodeNadir | history          |
//! |-------------|------|--------|---------------------|-------|----------|----------|----------|-------|-----------|------------------|
//! | V18Plus     | 19   | 0      | 1..3 u16 diff       | 3 u8  | 4        | 5        | 6 u16    | 8     | 10        | 11..19           |
//! | V13to16/V17 | 20   | 0      | 1..5 u32 abs        | 5 u16 | 7        | 9        | 11 u16   | 15    | 18        | none (unread)    |
//! | V10to12     | 18   | 0      | 1..5 u32 abs        | 5 u16 | 7        | 9        | 11 u16   | 15    | none      | none             |
//! | Legacy(<10) | 17   | 0      | 1..5 u32 abs        | 5 u16 | none     | 11 u16   | 13 u32   | none  | none      | none             |
//!
//! The legacy row uses the alternate offsets the source actually executes
//! (passPeak as u16 at 11, loopTime as u32 at 13) rather than the generic
//! 10+ offsets. This is a known inconsistency in the upstream firmware's
//! own offset table versus its runtime code — preserved here for wire
//! compatibility, not a bug in this decoder.

use crate::codec;
use crate::node::ApiLevel;

const MAX_LAP_TIME_MS: u32 = 9_999_999;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LapValue {
    /// api_level >= 18: milliseconds since the lap actually completed,
    /// relative to the response timestamp (needs one-way latency added).
    Differential(u16),
    /// api_level < 18: absolute milliseconds since node start-time origin,
    /// already range-clamped.
    Absolute(u32),
}

#[derive(Debug, Clone, Copy)]
pub struct HistoryRaw {
    pub peak_rssi: u16,
    pub peak_first_time_ms: u16,
    pub peak_last_time_ms: u16,
    pub nadir_rssi: u16,
    pub nadir_time_ms: u16,
}

#[derive(Debug, Clone)]
pub struct LapStatsFrame {
    pub lap_id: u8,
    pub rssi: u16,
    pub lap_value: LapValue,
    pub node_peak_rssi: Option<u16>,
    pub pass_peak_rssi: Option<u16>,
    pub loop_time_us: Option<u32>,
    pub crossing_flag: Option<bool>,
    pub node_nadir_rssi: Option<u16>,
    pub history: Option<HistoryRaw>,
}

fn clamp_lap_time(ms: u32) -> u32 {
    if ms > MAX_LAP_TIME_MS {
        0
    } else {
        ms
    }
}

/// Decodes a checksum-stripped `LapStats` payload (exactly
/// `tier.lap_stats_size()` bytes) per `tier`'s layout. Panics if `data` is
/// shorter than expected; callers size the read from the same tier.
pub fn decode(tier: ApiLevel, api_level: u16, data: &[u8]) -> LapStatsFrame {
    match tier {
        ApiLevel::V18Plus => LapStatsFrame {
            lap_id: data[0],
            rssi: codec::unpack_rssi(api_level, &data[3..4]),
            lap_value: LapValue::Differential(codec::unpack_u16_be(&data[1..3])),
            node_peak_rssi: Some(codec::unpack_rssi(api_level, &data[4..5])),
            pass_peak_rssi: Some(codec::unpack_rssi(api_level, &data[5..6])),
            loop_time_us: Some(codec::unpack_u16_be(&data[6..8]) as u32),
            crossing_flag: Some(data[8] != 0),
            node_nadir_rssi: Some(codec::unpack_rssi(api_level, &data[10..11])),
            history: Some(HistoryRaw {
                peak_rssi: codec::unpack_rssi(api_level, &data[11..12]),
                peak_first_time_ms: codec::unpack_u16_be(&data[12..14]),
                peak_last_time_ms: codec::unpack_u16_be(&data[14..16]),
                nadir_rssi: codec::unpack_rssi(api_level, &data[16..17]),
                nadir_time_ms: codec::unpack_u16_be(&data[17..19]),
            }),
        },
        ApiLevel::V13to16 | ApiLevel::V17 => LapStatsFrame {
            lap_id: data[0],
            rssi: codec::unpack_rssi(api_level, &data[5..7]),
            lap_value: LapValue::Absolute(clamp_lap_time(codec::unpack_u32_be(&data[1..5]))),
            node_peak_rssi: Some(codec::unpack_rssi(api_level, &data[7..9])),
            pass_peak_rssi: Some(codec::unpack_rssi(api_level, &data[9..11])),
            loop_time_us: Some(codec::unpack_u16_be(&data[11..13]) as u32),
            crossing_flag: Some(data[15] != 0),
            node_nadir_rssi: Some(codec::unpack_rssi(api_level, &data[18..20])),
            history: None,
        },
        ApiLevel::V10to12 => LapStatsFrame {
            lap_id: data[0],
            rssi: codec::unpack_rssi(api_level, &data[5..7]),
            lap_value: LapValue::Absolute(clamp_lap_time(codec::unpack_u32_be(&data[1..5]))),
            node_peak_rssi: Some(codec::unpack_rssi(api_level, &data[7..9])),
            pass_peak_rssi: Some(codec::unpack_rssi(api_level, &data[9..11])),
            loop_time_us: Some(codec::unpack_u16_be(&data[11..13]) as u32),
            crossing_flag: Some(data[15] != 0),
            node_nadir_rssi: None,
            history: None,
        },
        ApiLevel::Legacy => LapStatsFrame {
            lap_id: data[0],
            rssi: codec::unpack_u16_be(&data[5..7]),
            lap_value: LapValue::Absolute(clamp_lap_time(codec::unpack_u32_be(&data[1..5]))),
            node_peak_rssi: None,
            pass_peak_rssi: Some(codec::unpack_u16_be(&data[11..13])),
            loop_time_us: Some(codec::unpack_u32_be(&data[13..17])),
            crossing_flag: None,
            node_nadir_rssi: None,
            history: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v18_frame_decodes_all_fields() {
        let mut data = vec![0u8; 19];
        data[0] = 7; // lap_id
        data[1..3].copy_from_slice(&250u16.to_be_bytes()); // lap_differential_ms
        data[3] = 120; // rssi (1 byte)
        data[4] = 150; // node peak
        data[5] = 130; // pass peak
        data[6..8].copy_from_slice(&500u16.to_be_bytes()); // loop time
        data[8] = 1; // crossing
        data[9] = 90; // pass nadir (unread downstream)
        data[10] = 20; // node nadir
        data[11] = 155; // peak rssi
        data[12..14].copy_from_slice(&100u16.to_be_bytes());
        data[14..16].copy_from_slice(&50u16.to_be_bytes());
        data[16] = 15; // nadir rssi
        data[17..19].copy_from_slice(&30u16.to_be_bytes());

        let frame = decode(ApiLevel::V18Plus, 20, &data);
        assert_eq!(frame.lap_id, 7);
        assert_eq!(frame.rssi, 120);
        assert_eq!(frame.lap_value, LapValue::Differential(250));
        assert_eq!(frame.crossing_flag, Some(true));
        assert_eq!(frame.node_nadir_rssi, Some(20));
        let history = frame.history.unwrap();
        assert_eq!(history.peak_rssi, 155);
        assert_eq!(history.nadir_rssi, 15);
    }

    #[test]
    fn legacy_frame_uses_alternate_offsets() {
        let mut data = vec![0u8; 17];
        data[0] = 3;
        data[1..5].copy_from_slice(&12345u32.to_be_bytes());
        data[5..7].copy_from_slice(&400u16.to_be_bytes());
        data[11..13].copy_from_slice(&88u16.to_be_bytes());
        data[13..17].copy_from_slice(&999u32.to_be_bytes());

        let frame = decode(ApiLevel::Legacy, 0, &data);
        assert_eq!(frame.rssi, 400);
        assert_eq!(frame.lap_value, LapValue::Absolute(12345));
        assert_eq!(frame.pass_peak_rssi, Some(88));
        assert_eq!(frame.loop_time_us, Some(999));
        assert!(frame.crossing_flag.is_none());
    }

    #[test]
    fn absolute_lap_time_clamps_out_of_range() {
        let mut data = vec![0u8; 18];
        data[1..5].copy_from_slice(&(MAX_LAP_TIME_MS + 1).to_be_bytes());
        let frame = decode(ApiLevel::V10to12, 11, &data);
        assert_eq!(frame.lap_value, LapValue::Absolute(0));
    }
}
