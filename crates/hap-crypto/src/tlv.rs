//! TLV8 encoding/decoding for HAP pairing messages.
//!
//! TLV8 format: [Type: 1 byte][Length: 1 byte][Value: 0-255 bytes].
//! Values longer than 255 bytes are fragmented across consecutive items of
//! the same type; the decoder concatenates adjacent same-type items. Item
//! order is preserved and significant during pairing, so the container is a
//! sequence rather than a map.

use hap_core::error::ParseError;

/// TLV type constants for HAP pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TlvType {
    Method = 0x00,
    Identifier = 0x01,
    Salt = 0x02,
    PublicKey = 0x03,
    Proof = 0x04,
    EncryptedData = 0x05,
    State = 0x06,
    Error = 0x07,
    RetryDelay = 0x08,
    Certificate = 0x09,
    Signature = 0x0A,
    Permissions = 0x0B,
    FragmentData = 0x0C,
    FragmentLast = 0x0D,
    SessionId = 0x0E,
    Flags = 0x13,
    Separator = 0xFF,
}

/// Parsed TLV8 message as an ordered item sequence.
#[derive(Debug, Clone, Default)]
pub struct Tlv8 {
    items: Vec<(u8, Vec<u8>)>,
}

impl Tlv8 {
    /// Create empty TLV8 message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse TLV8 from bytes.
    ///
    /// Handles fragmented values: adjacent items with the same type are
    /// concatenated into one. Items of differing types stay independent
    /// even when the type repeats later in the stream.
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        let mut items: Vec<(u8, Vec<u8>)> = Vec::new();
        let mut i = 0;

        while i < data.len() {
            if i + 2 > data.len() {
                return Err(ParseError::InvalidFormat(
                    "TLV8: truncated header".to_string(),
                ));
            }

            let typ = data[i];
            let len = data[i + 1] as usize;
            i += 2;

            if i + len > data.len() {
                return Err(ParseError::InvalidFormat(format!(
                    "TLV8: truncated value (expected {} bytes, got {})",
                    len,
                    data.len() - i
                )));
            }

            let value = &data[i..i + len];
            i += len;

            match items.last_mut() {
                Some((last_type, last_value)) if *last_type == typ => {
                    last_value.extend_from_slice(value);
                }
                _ => items.push((typ, value.to_vec())),
            }
        }

        Ok(Self { items })
    }

    /// Encode to bytes, preserving item order.
    ///
    /// Values > 255 bytes are automatically fragmented.
    pub fn encode(&self) -> Vec<u8> {
        let mut result = Vec::new();

        for (typ, value) in &self.items {
            if value.is_empty() {
                result.push(*typ);
                result.push(0);
            } else {
                for chunk in value.chunks(255) {
                    result.push(*typ);
                    result.push(chunk.len() as u8);
                    result.extend_from_slice(chunk);
                }
            }
        }

        result
    }

    /// Get the first value for a type.
    pub fn get(&self, typ: TlvType) -> Option<&[u8]> {
        self.get_raw(typ as u8)
    }

    /// Get the first value for a raw type byte.
    pub fn get_raw(&self, typ: u8) -> Option<&[u8]> {
        self.items
            .iter()
            .find(|(t, _)| *t == typ)
            .map(|(_, v)| v.as_slice())
    }

    /// Append an item.
    pub fn push(&mut self, typ: TlvType, value: impl Into<Vec<u8>>) {
        self.items.push((typ as u8, value.into()));
    }

    /// Append an item with a raw type byte.
    pub fn push_raw(&mut self, typ: u8, value: impl Into<Vec<u8>>) {
        self.items.push((typ, value.into()));
    }

    /// Iterate over items in order.
    pub fn iter(&self) -> impl Iterator<Item = (u8, &[u8])> {
        self.items.iter().map(|(t, v)| (*t, v.as_slice()))
    }

    /// Check if a type is present.
    pub fn contains(&self, typ: TlvType) -> bool {
        self.get(typ).is_some()
    }

    /// Get the pairing state value (single byte).
    pub fn state(&self) -> Option<u8> {
        self.get(TlvType::State).and_then(|v| v.first().copied())
    }

    /// Get the error value (single byte).
    pub fn error(&self) -> Option<u8> {
        self.get(TlvType::Error).and_then(|v| v.first().copied())
    }

    /// Get the method value (single byte).
    pub fn method(&self) -> Option<u8> {
        self.get(TlvType::Method).and_then(|v| v.first().copied())
    }

    /// Build a `{State, Error}` reply.
    pub fn error_reply(state: u8, error: u8) -> Self {
        let mut tlv = Self::new();
        tlv.push(TlvType::State, vec![state]);
        tlv.push(TlvType::Error, vec![error]);
        tlv
    }
}

impl TlvType {
    /// Convert from raw byte.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Self::Method),
            0x01 => Some(Self::Identifier),
            0x02 => Some(Self::Salt),
            0x03 => Some(Self::PublicKey),
            0x04 => Some(Self::Proof),
            0x05 => Some(Self::EncryptedData),
            0x06 => Some(Self::State),
            0x07 => Some(Self::Error),
            0x08 => Some(Self::RetryDelay),
            0x09 => Some(Self::Certificate),
            0x0A => Some(Self::Signature),
            0x0B => Some(Self::Permissions),
            0x0C => Some(Self::FragmentData),
            0x0D => Some(Self::FragmentLast),
            0x0E => Some(Self::SessionId),
            0x13 => Some(Self::Flags),
            0xFF => Some(Self::Separator),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod parsing {
        use super::*;

        #[test]
        fn parse_empty() {
            let tlv = Tlv8::parse(&[]).unwrap();
            assert!(!tlv.contains(TlvType::State));
        }

        #[test]
        fn parse_single_tlv() {
            // State = 0x01
            let data = [0x06, 0x01, 0x01];
            let tlv = Tlv8::parse(&data).unwrap();
            assert_eq!(tlv.state(), Some(0x01));
        }

        #[test]
        fn parse_multiple_tlvs() {
            let data = [
                0x06, 0x01, 0x01, // State=1
                0x00, 0x01, 0x00, // Method=0
            ];
            let tlv = Tlv8::parse(&data).unwrap();
            assert_eq!(tlv.state(), Some(0x01));
            assert_eq!(tlv.get(TlvType::Method), Some([0x00].as_slice()));
        }

        #[test]
        fn parse_zero_length_value() {
            let data = [0x06, 0x00];
            let tlv = Tlv8::parse(&data).unwrap();
            assert_eq!(tlv.get(TlvType::State), Some([].as_slice()));
        }

        #[test]
        fn parse_fragmented_value() {
            // 300 bytes split: 255 + 45
            let mut data = vec![0x03, 0xFF];
            data.extend(vec![0xAA; 255]);
            data.extend([0x03, 0x2D]);
            data.extend(vec![0xBB; 45]);

            let tlv = Tlv8::parse(&data).unwrap();
            let pk = tlv.get(TlvType::PublicKey).unwrap();
            assert_eq!(pk.len(), 300);
            assert!(pk[..255].iter().all(|&b| b == 0xAA));
            assert!(pk[255..].iter().all(|&b| b == 0xBB));
        }

        #[test]
        fn nonadjacent_same_type_items_stay_independent() {
            // Identifier, Separator, Identifier: a /pairings list shape.
            let data = [
                0x01, 0x01, 0x41, // Identifier="A"
                0xFF, 0x00, // Separator
                0x01, 0x01, 0x42, // Identifier="B"
            ];
            let tlv = Tlv8::parse(&data).unwrap();
            let idents: Vec<&[u8]> = tlv
                .iter()
                .filter(|(t, _)| *t == TlvType::Identifier as u8)
                .map(|(_, v)| v)
                .collect();
            assert_eq!(idents, vec![b"A".as_slice(), b"B".as_slice()]);
        }

        #[test]
        fn parse_error_on_truncated_header() {
            assert!(Tlv8::parse(&[0x06]).is_err());
        }

        #[test]
        fn parse_error_on_truncated_value() {
            let data = [0x06, 0x05, 0x01, 0x02]; // Claims 5 bytes but only has 2
            assert!(Tlv8::parse(&data).is_err());
        }
    }

    mod encoding {
        use super::*;

        #[test]
        fn encode_empty() {
            assert!(Tlv8::new().encode().is_empty());
        }

        #[test]
        fn encode_single_tlv() {
            let mut tlv = Tlv8::new();
            tlv.push(TlvType::State, vec![0x01]);
            assert_eq!(tlv.encode(), vec![0x06, 0x01, 0x01]);
        }

        #[test]
        fn encode_preserves_insertion_order() {
            let mut tlv = Tlv8::new();
            tlv.push(TlvType::State, vec![0x02]);
            tlv.push(TlvType::Salt, vec![0xAB; 16]);
            tlv.push(TlvType::PublicKey, vec![0xCD; 4]);
            let encoded = tlv.encode();
            assert_eq!(encoded[0], TlvType::State as u8);
            assert_eq!(encoded[3], TlvType::Salt as u8);
            assert_eq!(encoded[21], TlvType::PublicKey as u8);
        }

        #[test]
        fn encode_fragments_long_values() {
            let mut tlv = Tlv8::new();
            let long_value: Vec<u8> = (0..300).map(|i| (i % 256) as u8).collect();
            tlv.push(TlvType::PublicKey, long_value.clone());

            let encoded = tlv.encode();

            assert_eq!(encoded[0], 0x03);
            assert_eq!(encoded[1], 255);
            assert_eq!(&encoded[2..257], &long_value[..255]);
            assert_eq!(encoded[257], 0x03);
            assert_eq!(encoded[258], 45);
            assert_eq!(&encoded[259..], &long_value[255..]);
        }

        #[test]
        fn encode_roundtrip() {
            let mut tlv = Tlv8::new();
            tlv.push(TlvType::State, vec![0x03]);
            tlv.push(TlvType::PublicKey, vec![0xAB; 384]); // SRP public key size
            tlv.push(TlvType::Proof, vec![0xCD; 64]);

            let decoded = Tlv8::parse(&tlv.encode()).unwrap();

            assert_eq!(decoded.state(), Some(0x03));
            assert_eq!(decoded.get(TlvType::PublicKey).unwrap().len(), 384);
            assert_eq!(decoded.get(TlvType::Proof).unwrap().len(), 64);
        }

        #[test]
        fn encode_zero_length_separator() {
            let mut tlv = Tlv8::new();
            tlv.push(TlvType::Separator, Vec::new());
            assert_eq!(tlv.encode(), vec![0xFF, 0x00]);
        }
    }

    mod accessors {
        use super::*;

        #[test]
        fn get_returns_first_occurrence() {
            let mut tlv = Tlv8::new();
            tlv.push(TlvType::Identifier, b"first".to_vec());
            tlv.push(TlvType::Separator, Vec::new());
            tlv.push(TlvType::Identifier, b"second".to_vec());
            assert_eq!(tlv.get(TlvType::Identifier), Some(b"first".as_slice()));
        }

        #[test]
        fn get_missing_type() {
            let tlv = Tlv8::new();
            assert_eq!(tlv.get(TlvType::State), None);
        }

        #[test]
        fn state_returns_first_byte() {
            let mut tlv = Tlv8::new();
            tlv.push(TlvType::State, vec![0x05, 0xFF, 0xFF]);
            assert_eq!(tlv.state(), Some(0x05));
        }

        #[test]
        fn error_reply_shape() {
            let tlv = Tlv8::error_reply(0x04, 0x02);
            assert_eq!(tlv.state(), Some(0x04));
            assert_eq!(tlv.error(), Some(0x02));
        }
    }

    mod tlv_type {
        use super::*;

        #[test]
        fn from_byte_known_types() {
            assert_eq!(TlvType::from_byte(0x00), Some(TlvType::Method));
            assert_eq!(TlvType::from_byte(0x01), Some(TlvType::Identifier));
            assert_eq!(TlvType::from_byte(0x02), Some(TlvType::Salt));
            assert_eq!(TlvType::from_byte(0x03), Some(TlvType::PublicKey));
            assert_eq!(TlvType::from_byte(0x06), Some(TlvType::State));
            assert_eq!(TlvType::from_byte(0x0A), Some(TlvType::Signature));
            assert_eq!(TlvType::from_byte(0x0B), Some(TlvType::Permissions));
            assert_eq!(TlvType::from_byte(0xFF), Some(TlvType::Separator));
        }

        #[test]
        fn from_byte_unknown_returns_none() {
            assert_eq!(TlvType::from_byte(0x10), None);
            assert_eq!(TlvType::from_byte(0xFE), None);
        }
    }
}
