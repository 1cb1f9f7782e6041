//! Common types used in the protocol.

use crate::constants::*;
use crate::error::ProtocolError;

/// Frequency bands supported by the RFM69 radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrequencyBand {
    /// 315 MHz.
    Mhz315,
    /// 433 MHz.
    Mhz433,
    /// 868 MHz.
    Mhz868,
    /// 915 MHz.
    Mhz915,
}

impl FrequencyBand {
    /// Look up a band by its nominal frequency in MHz.
    pub fn from_mhz(mhz: u16) -> Option<Self> {
        match mhz {
            315 => Some(FrequencyBand::Mhz315),
            433 => Some(FrequencyBand::Mhz433),
            868 => Some(FrequencyBand::Mhz868),
            915 => Some(FrequencyBand::Mhz915),
            _ => None,
        }
    }

    /// Nominal frequency in MHz, as sent on the wire.
    pub fn mhz(&self) -> u16 {
        match self {
            FrequencyBand::Mhz315 => 315,
            FrequencyBand::Mhz433 => 433,
            FrequencyBand::Mhz868 => 868,
            FrequencyBand::Mhz915 => 915,
        }
    }
}

impl std::fmt::Display for FrequencyBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} MHz", self.mhz())
    }
}

/// Radio parameters applied by INIT_RADIO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RadioConfig {
    /// Frequency band.
    pub frequency: FrequencyBand,
    /// Address of the gateway on the radio network.
    pub node_id: u16,
    /// Network (sync word) shared by all nodes.
    pub network_id: u8,
}

/// A 16-byte AES key loaded into the radio.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey(pub [u8; ENCRYPTION_KEY_SIZE]);

impl EncryptionKey {
    /// Create a key from bytes.
    pub fn new(bytes: [u8; ENCRYPTION_KEY_SIZE]) -> Self {
        EncryptionKey(bytes)
    }

    /// Create from a slice, rejecting anything that isn't exactly 16 bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Self, ProtocolError> {
        let bytes: [u8; ENCRYPTION_KEY_SIZE] = slice.try_into().map_err(|_| {
            ProtocolError::InvalidData(format!(
                "encryption key must be {} bytes, got {}",
                ENCRYPTION_KEY_SIZE,
                slice.len()
            ))
        })?;
        Ok(EncryptionKey(bytes))
    }

    /// Get the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; ENCRYPTION_KEY_SIZE] {
        &self.0
    }
}

// Key material stays out of logs.
impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

impl AsRef<[u8]> for EncryptionKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frequency_band_lookup() {
        assert_eq!(FrequencyBand::from_mhz(915), Some(FrequencyBand::Mhz915));
        assert_eq!(FrequencyBand::from_mhz(433).map(|b| b.mhz()), Some(433));
        assert_eq!(FrequencyBand::from_mhz(900), None);
    }

    #[test]
    fn test_key_from_slice() {
        let key = EncryptionKey::from_slice(b"1234123412341234").unwrap();
        assert_eq!(key.as_bytes(), b"1234123412341234");
        assert!(EncryptionKey::from_slice(b"short").is_err());
        assert!(EncryptionKey::from_slice(&[0u8; 17]).is_err());
    }

    #[test]
    fn test_key_debug_is_redacted() {
        let key = EncryptionKey::new(*b"secretsecretsecr");
        assert!(!format!("{:?}", key).contains("secret"));
    }
}
