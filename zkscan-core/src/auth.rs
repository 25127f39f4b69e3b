//! CommKey authentication scramble
//!
//! When CMD_CONNECT answers ACK_UNAUTH the client proves knowledge of the
//! device pin by sending this 4-byte token as the CMD_AUTH body. The
//! scramble comes from the vendor's MakeKey routine.

/// Derive the CMD_AUTH body from the pin and the device-assigned session id.
///
/// Steps: reverse the bit order of `pin`, add `session_id`, XOR the four
/// little-endian bytes with `'Z' 'K' 'S' 'O'`, swap the two u16 halves,
/// then XOR bytes 0, 1 and 3 with `ticks & 0xFF` while byte 2 becomes the
/// ticks value itself. The protocol always uses ticks = 50.
pub fn make_commkey(pin: u32, session_id: u16, ticks: u8) -> [u8; 4] {
    let mut k: u32 = 0;
    for i in 0..32 {
        k <<= 1;
        if pin & (1 << i) != 0 {
            k |= 1;
        }
    }
    k = k.wrapping_add(session_id as u32);

    let b = k.to_le_bytes();
    let xored = [b[0] ^ b'Z', b[1] ^ b'K', b[2] ^ b'S', b[3] ^ b'O'];

    let low = u16::from_le_bytes([xored[0], xored[1]]);
    let high = u16::from_le_bytes([xored[2], xored[3]]);

    let mut swapped = [0u8; 4];
    swapped[0..2].copy_from_slice(&high.to_le_bytes());
    swapped[2..4].copy_from_slice(&low.to_le_bytes());

    [
        swapped[0] ^ ticks,
        swapped[1] ^ ticks,
        ticks,
        swapped[3] ^ ticks,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    // pin 0 bit-reverses to 0, so k is the session id 0x1234:
    // bytes 34 12 00 00, XOR "ZKSO" -> 6E 59 53 4F, halves swapped ->
    // 53 4F 6E 59, ticks 50 (0x32) -> 61 7D 32 6B.
    #[test]
    fn test_golden_vector() {
        assert_eq!(make_commkey(0, 0x1234, 50), [0x61, 0x7D, 0x32, 0x6B]);
    }

    #[test]
    fn test_deterministic() {
        assert_eq!(make_commkey(1234, 32031, 50), make_commkey(1234, 32031, 50));
    }

    #[test]
    fn test_ticks_byte_is_fixed() {
        for session_id in [0u16, 1, 0x7FFF, 0xFFFF] {
            assert_eq!(make_commkey(99, session_id, 50)[2], 50);
        }
    }

    #[test]
    fn test_pin_changes_key() {
        assert_ne!(make_commkey(0, 100, 50), make_commkey(12345, 100, 50));
    }

    #[test]
    fn test_session_changes_key() {
        assert_ne!(make_commkey(0, 100, 50), make_commkey(0, 200, 50));
    }
}
