/// Internet checksum (RFC 1071).
///
/// Sums 16-bit words in the order they appear in memory, pads a trailing odd
/// byte with zero, folds the carries twice and returns the one's complement.
/// Storing the result back into the packet verbatim makes the packet's
/// checksum field verify to zero.
pub fn checksum(buf: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut words = buf.chunks_exact(2);
    for pair in &mut words {
        sum += u32::from(u16::from_ne_bytes([pair[0], pair[1]]));
    }
    if let &[last] = words.remainder() {
        sum += u32::from(u16::from_ne_bytes([last, 0]));
    }
    sum = (sum >> 16) + (sum & 0xffff);
    sum += sum >> 16;
    !(sum as u16)
}

#[cfg(test)]
mod tests {
    use super::checksum;

    #[test]
    fn empty_input_sums_to_all_ones() {
        assert_eq!(checksum(b""), 0xffff);
    }

    #[test]
    fn matches_rfc1071_worked_example() {
        // The classic 0x0001 0xf203 0xf4f5 0xf6f7 example; the complemented
        // sum is 0x220d in network order regardless of host endianness.
        let data = [0x00, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7];
        assert_eq!(checksum(&data).to_ne_bytes(), [0x22, 0x0d]);
    }

    #[test]
    fn odd_length_pads_with_zero() {
        // 0x0102 + 0x0300 (LE: 0x0201 + 0x0003) then complemented; padding
        // the odd byte must equal summing an explicit trailing zero.
        assert_eq!(checksum(&[1, 2, 3]), checksum(&[1, 2, 3, 0]));
    }

    #[test]
    fn filled_packet_verifies_to_zero() {
        let mut packet = vec![0u8; 16];
        for (i, b) in packet.iter_mut().enumerate() {
            *b = (i * 7) as u8;
        }
        // Checksum field zeroed while summing, as on the wire.
        packet[2..4].copy_from_slice(&[0, 0]);
        let sum = checksum(&packet);
        packet[2..4].copy_from_slice(&sum.to_ne_bytes());
        assert_eq!(checksum(&packet), 0);
    }
}
