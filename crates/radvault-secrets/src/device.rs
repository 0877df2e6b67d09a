//! Device identity derived from the microcontroller's 128-bit unique ID.
//!
//! The serial is a MurmurHash3-style 64-bit mix of the two ID halves; the
//! MAC address and the printable Crockford serial are both views of it.

use std::fmt;

use radvault_crypto::HARDWARE_ID_SIZE;

const C1: u64 = 0x87c3_7b91_1142_53d5;
const C2: u64 = 0x4cf5_ad43_2745_937f;
const SEED: u64 = 0x9e37_79b9_7f4a_7c15;

/// Crockford base32 digits (no I, L, O, U)
const CROCKFORD: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";
/// Check symbols: the 32 digits plus five extras, indexed by value mod 37
const CROCKFORD_CHECK: &[u8; 37] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ*~$=U";
/// 64 bits need 13 base32 digits
const SERIAL_DIGITS: usize = 13;

fn fmix64(mut k: u64) -> u64 {
    k ^= k >> 33;
    k = k.wrapping_mul(0xff51_afd7_ed55_8ccd);
    k ^= k >> 33;
    k = k.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    k ^= k >> 33;
    k
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct DeviceIdentity {
    cpu_id: [u8; HARDWARE_ID_SIZE],
}

impl DeviceIdentity {
    pub fn from_cpu_id(cpu_id: [u8; HARDWARE_ID_SIZE]) -> Self {
        Self { cpu_id }
    }

    pub fn cpu_id(&self) -> &[u8; HARDWARE_ID_SIZE] {
        &self.cpu_id
    }

    /// Stable 64-bit serial number.
    pub fn serial(&self) -> u64 {
        let mut h = SEED;
        for half in self.cpu_id.chunks_exact(8) {
            let mut word = [0u8; 8];
            word.copy_from_slice(half);
            let mut k = u64::from_le_bytes(word);
            k = k.wrapping_mul(C1);
            k = k.rotate_left(31);
            k = k.wrapping_mul(C2);
            h ^= k;
            h = h.rotate_left(27);
            h = h.wrapping_mul(5).wrapping_add(0x52dc_e729);
        }
        h ^= HARDWARE_ID_SIZE as u64;
        fmix64(h)
    }

    /// Locally administered unicast MAC from the low 48 bits of the serial.
    pub fn mac_address(&self) -> [u8; 6] {
        let serial = self.serial();
        let mut mac = [0u8; 6];
        for (i, byte) in mac.iter_mut().enumerate() {
            *byte = (serial >> (40 - 8 * i)) as u8;
        }
        mac[0] |= 0x02;
        mac[0] &= !0x01;
        mac
    }

    /// 13 Crockford base32 digits followed by one mod-37 check symbol.
    pub fn crockford_serial(&self) -> String {
        let serial = self.serial();
        let mut out = [0u8; SERIAL_DIGITS + 1];
        let mut value = serial;
        for slot in out[..SERIAL_DIGITS].iter_mut().rev() {
            *slot = CROCKFORD[(value & 0x1F) as usize];
            value >>= 5;
        }
        out[SERIAL_DIGITS] = CROCKFORD_CHECK[(serial % 37) as usize];
        out.iter().map(|&b| b as char).collect()
    }
}

/// Formats a MAC as `aa:bb:cc:dd:ee:ff`.
pub struct MacDisplay(pub [u8; 6]);

impl fmt::Display for MacDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceIdentity")
            .field("serial", &format_args!("{:016x}", self.serial()))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const ID: [u8; 16] = [
        0x30, 0x00, 0x21, 0x00, 0x11, 0x51, 0x33, 0x36, 0x38, 0x37, 0x32, 0x39, 0x00, 0x00, 0x00,
        0x00,
    ];

    fn decode_crockford(digits: &str) -> u64 {
        digits.bytes().fold(0u64, |acc, c| {
            let v = CROCKFORD.iter().position(|&d| d == c).unwrap() as u64;
            (acc << 5) | v
        })
    }

    #[test]
    fn test_serial_deterministic() {
        let a = DeviceIdentity::from_cpu_id(ID);
        let b = DeviceIdentity::from_cpu_id(ID);
        assert_eq!(a.serial(), b.serial());
    }

    #[test]
    fn test_serial_of_zero_id() {
        // both halves are zero, so only the seed and the length survive the mix
        let mut h = SEED;
        for _ in 0..2 {
            h = h.rotate_left(27).wrapping_mul(5).wrapping_add(0x52dc_e729);
        }
        let expected = fmix64(h ^ 16);
        assert_eq!(DeviceIdentity::from_cpu_id([0; 16]).serial(), expected);
    }

    #[test]
    fn test_single_bit_changes_everything() {
        let base = DeviceIdentity::from_cpu_id(ID);
        let mut flipped = ID;
        flipped[15] ^= 0x01;
        let other = DeviceIdentity::from_cpu_id(flipped);
        assert_ne!(base.serial(), other.serial());
        assert_ne!(base.mac_address(), other.mac_address());
        assert_ne!(base.crockford_serial(), other.crockford_serial());
    }

    #[test]
    fn test_mac_address_bits() {
        let id = DeviceIdentity::from_cpu_id(ID);
        let mac = id.mac_address();
        assert_eq!(mac[0] & 0x02, 0x02, "locally administered");
        assert_eq!(mac[0] & 0x01, 0x00, "unicast");
        let serial = id.serial();
        assert_eq!(mac[5], serial as u8);
        assert_eq!(mac[1], (serial >> 32) as u8);
    }

    #[test]
    fn test_mac_display() {
        let s = MacDisplay([0x02, 0xAB, 0x00, 0x10, 0xFF, 0x7E]).to_string();
        assert_eq!(s, "02:ab:00:10:ff:7e");
    }

    #[test]
    fn test_crockford_shape() {
        let id = DeviceIdentity::from_cpu_id(ID);
        let s = id.crockford_serial();
        assert_eq!(s.len(), 14);
        assert!(s[..13].bytes().all(|c| CROCKFORD.contains(&c)));
        let check = s.as_bytes()[13];
        assert_eq!(check, CROCKFORD_CHECK[(id.serial() % 37) as usize]);
    }

    proptest! {
        #[test]
        fn crockford_digits_decode_to_serial(cpu_id in any::<[u8; 16]>()) {
            let id = DeviceIdentity::from_cpu_id(cpu_id);
            let s = id.crockford_serial();
            prop_assert_eq!(decode_crockford(&s[..13]), id.serial());
        }
    }
}
