//! Reversible bit transposition for interleaved CD subchannel data.
//!
//! Raw subchannel carries eight 1-bit channels (P through W) per byte,
//! MSB first.  [`transform`] gathers each channel into its own contiguous
//! plane so that long runs (P is mostly constant, Q is highly structured)
//! become byte runs LZMA can exploit.  Output length equals input length;
//! plane `c` occupies bytes `c * len/8 .. (c + 1) * len/8`.

/// Bytes of raw subchannel per sector.
pub const SUBCHANNEL_SIZE: usize = 96;

/// De-interleave.  `None` passes through; input length must be a multiple
/// of 8 (trailing bytes beyond the last multiple are dropped).
pub fn transform(interleaved: Option<&[u8]>) -> Option<Vec<u8>> {
    let input = interleaved?;
    let plane_len = input.len() / 8;
    let mut out = vec![0u8; plane_len * 8];

    for (i, group) in input.chunks_exact(8).enumerate() {
        for (channel, plane) in out.chunks_exact_mut(plane_len.max(1)).enumerate().take(8) {
            let mask = 0x80u8 >> channel;
            let mut packed = 0u8;
            for (k, &b) in group.iter().enumerate() {
                if b & mask != 0 {
                    packed |= 0x80 >> k;
                }
            }
            plane[i] = packed;
        }
    }
    Some(out)
}

/// Inverse of [`transform`].
pub fn untransform(sequential: Option<&[u8]>) -> Option<Vec<u8>> {
    let input = sequential?;
    let plane_len = input.len() / 8;
    let mut out = vec![0u8; plane_len * 8];

    for channel in 0..8 {
        let plane = &input[channel * plane_len..(channel + 1) * plane_len];
        let bit = 0x80u8 >> channel;
        for (i, &packed) in plane.iter().enumerate() {
            for k in 0..8 {
                if packed & (0x80 >> k) != 0 {
                    out[i * 8 + k] |= bit;
                }
            }
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_passes_through() {
        assert_eq!(transform(None), None);
        assert_eq!(untransform(None), None);
    }

    #[test]
    fn empty_input() {
        assert_eq!(transform(Some(&[])), Some(vec![]));
        assert_eq!(untransform(Some(&[])), Some(vec![]));
    }

    #[test]
    fn channels_land_in_their_planes() {
        let mut input = vec![0u8; 16];
        input[0] = 0x80; // P bit of byte 0
        input[8] = 0x40; // Q bit of byte 8
        let out = transform(Some(&input)).unwrap();
        assert_eq!(out[0], 0x80); // P plane, group 0, first byte
        assert_eq!(out[3], 0x80); // Q plane (starts at 2), group 1
        assert_eq!(out.iter().filter(|&&b| b != 0).count(), 2);
    }

    #[test]
    fn all_ones_sector_round_trips() {
        let input = vec![0xFFu8; SUBCHANNEL_SIZE];
        let planes = transform(Some(&input)).unwrap();
        assert!(planes.iter().all(|&b| b == 0xFF));
        assert_eq!(untransform(Some(&planes)).unwrap(), input);
    }

    #[test]
    fn mixed_round_trip() {
        let input: Vec<u8> = (0..SUBCHANNEL_SIZE * 3).map(|i| (i * 37 + 11) as u8).collect();
        let planes = transform(Some(&input)).unwrap();
        assert_eq!(untransform(Some(&planes)).unwrap(), input);
    }
}
