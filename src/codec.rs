//! Big-endian field packing/unpacking and the one-byte sum checksum used on
//! every framed bus transaction. Pure, total functions — no allocation, no
//! fallible paths; callers are responsible for slice length.

/// Reads one byte from offset 0.
pub fn unpack_u8(data: &[u8]) -> u8 {
    data[0]
}

/// Returns a one-byte array.
pub fn pack_u8(value: u8) -> [u8; 1] {
    [value]
}

/// Reads a big-endian u16 from offset 0.
pub fn unpack_u16_be(data: &[u8]) -> u16 {
    u16::from_be_bytes([data[0], data[1]])
}

/// Returns a two-byte big-endian array.
pub fn pack_u16_be(value: u16) -> [u8; 2] {
    value.to_be_bytes()
}

/// Reads a big-endian u32 from offset 0.
pub fn unpack_u32_be(data: &[u8]) -> u32 {
    u32::from_be_bytes([data[0], data[1], data[2], data[3]])
}

/// Returns a four-byte big-endian array.
pub fn pack_u32_be(value: u32) -> [u8; 4] {
    value.to_be_bytes()
}

/// Sum of all but the last byte, truncated to 8 bits.
pub fn checksum(data: &[u8]) -> u8 {
    data[..data.len() - 1]
        .iter()
        .fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// True iff the trailing byte matches `checksum` of the rest.
pub fn validate(data: &[u8]) -> bool {
    if data.is_empty() {
        return false;
    }
    checksum(data) == data[data.len() - 1]
}

/// Halves an RSSI value for external consumption.
pub fn scale_rssi(rssi: u16) -> u16 {
    rssi >> 1
}

/// Inverse of [`scale_rssi`].
pub fn unscale_rssi(rssi: u16) -> u16 {
    rssi << 1
}

/// RSSI width is one byte from api_level 18 onward, two bytes before that.
pub fn unpack_rssi(api_level: u16, data: &[u8]) -> u16 {
    if api_level >= 18 {
        unpack_u8(data) as u16
    } else {
        unpack_u16_be(data)
    }
}

/// Number of wire bytes an RSSI field occupies at `api_level` (excludes the
/// checksum byte that trails a whole frame, not an individual field).
pub fn rssi_width(api_level: u16) -> usize {
    if api_level >= 18 {
        1
    } else {
        2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u8_round_trip() {
        for x in 0..=u8::MAX {
            assert_eq!(unpack_u8(&pack_u8(x)), x);
        }
    }

    #[test]
    fn u16_round_trip() {
        for x in [0u16, 1, 255, 256, 0x1234, u16::MAX] {
            assert_eq!(unpack_u16_be(&pack_u16_be(x)), x);
        }
    }

    #[test]
    fn u32_round_trip() {
        for x in [0u32, 1, 0xdead_beef, u32::MAX] {
            assert_eq!(unpack_u32_be(&pack_u32_be(x)), x);
        }
    }

    #[test]
    fn checksum_round_trip() {
        let payload = [0x05u8, 0x10, 0xAB, 0x00];
        let mut framed = payload.to_vec();
        framed.push(checksum(&payload));
        // checksum() only looks at all-but-last, so validate against the
        // framed buffer (payload ++ checksum byte).
        assert!(validate(&framed));
    }

    #[test]
    fn checksum_detects_corruption() {
        let payload = [0x05u8, 0x10, 0xAB, 0x00];
        let mut framed = payload.to_vec();
        framed.push(checksum(&payload));
        framed[0] ^= 0x01;
        assert!(!validate(&framed));
        let mut framed2 = payload.to_vec();
        framed2.push(checksum(&payload) ^ 0x01);
        assert!(!validate(&framed2));
    }

    #[test]
    fn rssi_scale_round_trips_even_values() {
        assert_eq!(unscale_rssi(scale_rssi(200)), 200);
    }

    #[test]
    fn rssi_width_selects_by_api_level() {
        assert_eq!(rssi_width(17), 2);
        assert_eq!(rssi_width(18), 1);
        assert_eq!(rssi_width(25), 1);
    }

    #[test]
    fn unpack_rssi_matches_width() {
        assert_eq!(unpack_rssi(18, &[0x7F]), 0x7F);
        assert_eq!(unpack_rssi(17, &[0x01, 0x2C]), 0x012C);
    }
}
