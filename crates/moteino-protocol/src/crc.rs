//! Payload checksum.
//!
//! CRC-16/IBM-3740 (poly 0x1021, init 0xFFFF, no reflection), transmitted
//! little-endian after the payload.

use crc::{Crc, CRC_16_IBM_3740};

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// Compute the CRC carried by a frame with this payload.
pub fn payload_crc(payload: &[u8]) -> u16 {
    CRC16.checksum(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_value() {
        // Standard check input for CRC catalogues.
        assert_eq!(payload_crc(b"123456789"), 0x29B1);
    }

    #[test]
    fn test_single_bit_flip_changes_crc() {
        let data = b"abcdefghijklmnopqrstuvwxyz".to_vec();
        let reference = payload_crc(&data);
        for i in 0..data.len() {
            let mut corrupted = data.clone();
            corrupted[i] ^= 0x01;
            assert_ne!(payload_crc(&corrupted), reference, "flip at {}", i);
        }
    }
}
