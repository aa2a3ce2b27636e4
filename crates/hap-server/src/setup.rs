//! Setup code, setup ID and setup payload helpers.
//!
//! The pincode (`NNN-NN-NNN`) and 4-character setup ID identify the server
//! during pairing; both feed the `X-HM://` setup URI shown as a QR code and
//! the 4-byte setup hash advertised in the mDNS `sh` key.

use std::net::{IpAddr, UdpSocket};

use base64::Engine;
use hap_core::Category;
use rand::Rng;
use sha2::{Digest, Sha512};

const HEX_DIGITS: &[u8] = b"0123456789ABCDEF";
const ALPHANUM: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const BASE36: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Trivial codes a controller would guess first; never issued or accepted.
const INVALID_PINCODES: &[&str] = &[
    "000-00-000",
    "111-11-111",
    "222-22-222",
    "333-33-333",
    "444-44-444",
    "555-55-555",
    "666-66-666",
    "777-77-777",
    "888-88-888",
    "999-99-999",
    "123-45-678",
    "876-54-321",
];

/// Generate a MAC-form device id (`XX:XX:XX:XX:XX:XX`).
pub fn generate_mac() -> String {
    let mut rng = rand::thread_rng();
    let mut mac = String::with_capacity(17);
    for i in 0..6 {
        if i > 0 {
            mac.push(':');
        }
        mac.push(HEX_DIGITS[rng.gen_range(0..16)] as char);
        mac.push(HEX_DIGITS[rng.gen_range(0..16)] as char);
    }
    mac
}

/// Generate a random pincode in `NNN-NN-NNN` form, retrying past the
/// trivial codes.
pub fn generate_pincode() -> String {
    let mut rng = rand::thread_rng();
    loop {
        let digits: Vec<u8> = (0..8).map(|_| rng.gen_range(0..10)).collect();
        let pincode = format!(
            "{}{}{}-{}{}-{}{}{}",
            digits[0], digits[1], digits[2], digits[3], digits[4], digits[5], digits[6], digits[7]
        );
        if is_valid_pincode(&pincode) {
            return pincode;
        }
    }
}

/// Generate a 4-character alphanumeric setup ID.
pub fn generate_setup_id() -> String {
    let mut rng = rand::thread_rng();
    (0..4)
        .map(|_| ALPHANUM[rng.gen_range(0..ALPHANUM.len())] as char)
        .collect()
}

/// Check the `NNN-NN-NNN` shape and reject trivial codes.
pub fn is_valid_pincode(pincode: &str) -> bool {
    let bytes = pincode.as_bytes();
    if bytes.len() != 10 {
        return false;
    }
    for (i, &b) in bytes.iter().enumerate() {
        let is_dash_position = i == 3 || i == 6;
        if is_dash_position {
            if b != b'-' {
                return false;
            }
        } else if !b.is_ascii_digit() {
            return false;
        }
    }
    !INVALID_PINCODES.contains(&pincode)
}

/// The 4-byte SHA-512-derived setup hash advertised as TXT `sh`.
pub fn setup_hash(setup_id: &str, mac: &str) -> String {
    let mut hasher = Sha512::new();
    hasher.update(setup_id.as_bytes());
    hasher.update(mac.as_bytes());
    let digest = hasher.finalize();
    base64::engine::general_purpose::STANDARD.encode(&digest[..4])
}

/// Build the `X-HM://` setup payload URI.
///
/// Layout: a 64-bit value whose low word carries the pincode digits, the
/// IP-transport flag (bit 28) and the category's least significant bit
/// (bit 31); the high word carries the remaining category bits. The value
/// is base-36 encoded, left-padded to 9 characters, and followed by the
/// setup ID.
pub fn xhm_uri(category: Category, pincode: &str, setup_id: &str) -> String {
    let digits: String = pincode.chars().filter(|c| c.is_ascii_digit()).collect();
    let pin_value: u64 = digits.parse().unwrap_or(0);

    let category_id = category.id() as u64;
    let mut low = pin_value;
    low |= 1 << 28; // supports IP transport
    low |= (category_id & 1) << 31;
    let high = category_id >> 1;

    let payload = (high << 32) | low;
    format!("X-HM://{}{}", base36_encode(payload), setup_id)
}

fn base36_encode(mut value: u64) -> String {
    let mut out = [b'0'; 9];
    let mut i = out.len();
    while value > 0 && i > 0 {
        i -= 1;
        out[i] = BASE36[(value % 36) as usize];
        value /= 36;
    }
    String::from_utf8_lossy(&out).to_string()
}

/// Best-effort local IPv4 address, found by routing a UDP socket.
pub fn local_address() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    socket.local_addr().ok().map(|addr| addr.ip())
}
