//! Session-encrypted framed transport.
//!
//! After pair-verify completes, each direction of the TCP stream becomes a
//! sequence of frames:
//!
//! ```text
//! +----------------+------------------+----------+
//! | Length (2 LE)  | Ciphertext (N)   | Tag (16) |
//! +----------------+------------------+----------+
//! ```
//!
//! The 2-byte little-endian plaintext length doubles as the AAD. Payloads
//! larger than 1024 bytes are split across frames. Each direction keeps a
//! 64-bit counter nonce that only resets on session teardown.

use hap_core::error::CryptoError;
use hap_crypto::chacha::DirectionalCipher;
use hap_crypto::hkdf::{derive_control_read_key, derive_control_write_key};

/// Maximum plaintext bytes per frame.
const MAX_BLOCK: usize = 0x400;
/// Length prefix size.
const LENGTH_LENGTH: usize = 2;
/// Poly1305 tag size.
const TAG_LENGTH: usize = 16;

/// Both directions of an upgraded session, server side.
///
/// Incoming ciphertext is buffered so frames split across TCP reads
/// reassemble; `decrypt` drains every complete frame currently buffered.
pub struct SessionCrypto {
    out_cipher: DirectionalCipher,
    in_cipher: DirectionalCipher,
    in_buffer: Vec<u8>,
}

impl SessionCrypto {
    /// Derive the transport keys from the pair-verify shared secret, as
    /// the accessory: reads use the C->A key, writes the A->C key.
    pub fn accessory(shared_secret: &[u8]) -> Result<Self, CryptoError> {
        Ok(Self {
            out_cipher: DirectionalCipher::new(derive_control_write_key(shared_secret)?),
            in_cipher: DirectionalCipher::new(derive_control_read_key(shared_secret)?),
            in_buffer: Vec::new(),
        })
    }

    /// The controller's view of the same session (directions swapped).
    /// Used by client-side code and tests.
    pub fn controller(shared_secret: &[u8]) -> Result<Self, CryptoError> {
        Ok(Self {
            out_cipher: DirectionalCipher::new(derive_control_read_key(shared_secret)?),
            in_cipher: DirectionalCipher::new(derive_control_write_key(shared_secret)?),
            in_buffer: Vec::new(),
        })
    }

    /// Buffer raw bytes from the socket.
    pub fn receive_data(&mut self, data: &[u8]) {
        self.in_buffer.extend_from_slice(data);
    }

    /// Decrypt and return every complete frame in the buffer as plaintext.
    ///
    /// Partial frames stay buffered. A MAC failure is fatal for the
    /// session; the caller closes the connection.
    pub fn decrypt(&mut self) -> Result<Vec<u8>, CryptoError> {
        let mut result = Vec::new();

        loop {
            if self.in_buffer.len() < LENGTH_LENGTH + TAG_LENGTH + 1 {
                break;
            }
            let length_bytes = [self.in_buffer[0], self.in_buffer[1]];
            let block_size = u16::from_le_bytes(length_bytes) as usize;
            let frame_size = LENGTH_LENGTH + block_size + TAG_LENGTH;
            if self.in_buffer.len() < frame_size {
                break;
            }

            let ciphertext = &self.in_buffer[LENGTH_LENGTH..frame_size];
            let plaintext = self.in_cipher.open(&length_bytes, ciphertext)?;
            result.extend_from_slice(&plaintext);
            self.in_buffer.drain(..frame_size);
        }

        Ok(result)
    }

    /// Encrypt outgoing plaintext into one or more frames.
    pub fn encrypt(&mut self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut result =
            Vec::with_capacity(data.len() + (data.len() / MAX_BLOCK + 1) * (LENGTH_LENGTH + TAG_LENGTH));
        let mut offset = 0;
        while offset < data.len() {
            let length = (data.len() - offset).min(MAX_BLOCK);
            let length_bytes = (length as u16).to_le_bytes();
            let block = &data[offset..offset + length];
            let sealed = self.out_cipher.seal(&length_bytes, block)?;
            result.extend_from_slice(&length_bytes);
            result.extend_from_slice(&sealed);
            offset += length;
        }
        Ok(result)
    }

    /// Outgoing nonce counter (frames written so far).
    pub fn write_counter(&self) -> u64 {
        self.out_cipher.counter()
    }

    /// Incoming nonce counter (frames read so far).
    pub fn read_counter(&self) -> u64 {
        self.in_cipher.counter()
    }
}
