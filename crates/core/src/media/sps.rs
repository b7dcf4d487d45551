//! Picture dimensions from an H.265 sequence parameter set (ITU-T H.265 §7.3.2.2).
//!
//! Only the fields in front of `pic_width_in_luma_samples` are walked.
//! The returned size is the coded size; the conformance window is not
//! applied.

/// Parse `(width, height)` in luma samples from an SPS NAL unit
/// (2-byte NAL header included). Returns `None` on truncated input.
pub fn parse_dimensions(nal: &[u8]) -> Option<(u32, u32)> {
    let rbsp = strip_emulation_prevention(nal.get(2..)?);
    let mut r = BitReader::new(&rbsp);

    r.skip(4)?; // sps_video_parameter_set_id
    let max_sub_layers_minus1 = r.read_bits(3)? as usize;
    r.skip(1)?; // sps_temporal_id_nesting_flag
    skip_profile_tier_level(&mut r, max_sub_layers_minus1)?;

    r.read_ue()?; // sps_seq_parameter_set_id
    let chroma_format_idc = r.read_ue()?;
    if chroma_format_idc == 3 {
        r.skip(1)?; // separate_colour_plane_flag
    }
    let width = r.read_ue()?;
    let height = r.read_ue()?;
    Some((width, height))
}

/// profile_tier_level(1, max_sub_layers_minus1), §7.3.3.
fn skip_profile_tier_level(r: &mut BitReader<'_>, max_sub_layers_minus1: usize) -> Option<()> {
    // general profile (8) + compatibility flags (32) + constraint flags (48)
    // + general_level_idc (8)
    r.skip(96)?;

    let mut profile_present = [false; 8];
    let mut level_present = [false; 8];
    for i in 0..max_sub_layers_minus1 {
        profile_present[i] = r.read_bits(1)? == 1;
        level_present[i] = r.read_bits(1)? == 1;
    }
    if max_sub_layers_minus1 > 0 {
        for _ in max_sub_layers_minus1..8 {
            r.skip(2)?; // reserved_zero_2bits
        }
    }
    for i in 0..max_sub_layers_minus1 {
        if profile_present[i] {
            r.skip(88)?;
        }
        if level_present[i] {
            r.skip(8)?;
        }
    }
    Some(())
}

/// Drop the `0x03` in every `00 00 03` sequence.
fn strip_emulation_prevention(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut zeros = 0;
    for &b in data {
        if zeros >= 2 && b == 0x03 {
            zeros = 0;
            continue;
        }
        zeros = if b == 0 { zeros + 1 } else { 0 };
        out.push(b);
    }
    out
}

/// MSB-first bit reader over an RBSP.
struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn bit(&mut self) -> Option<u32> {
        let byte = *self.data.get(self.pos / 8)?;
        let bit = (byte >> (7 - self.pos % 8)) & 1;
        self.pos += 1;
        Some(bit as u32)
    }

    fn read_bits(&mut self, n: u32) -> Option<u32> {
        let mut v = 0u32;
        for _ in 0..n {
            v = (v << 1) | self.bit()?;
        }
        Some(v)
    }

    fn skip(&mut self, n: usize) -> Option<()> {
        if self.pos + n > self.data.len() * 8 {
            return None;
        }
        self.pos += n;
        Some(())
    }

    /// Unsigned Exp-Golomb, ue(v).
    fn read_ue(&mut self) -> Option<u32> {
        let mut leading_zeros = 0u32;
        while self.bit()? == 0 {
            leading_zeros += 1;
            if leading_zeros > 31 {
                return None;
            }
        }
        let suffix = self.read_bits(leading_zeros)?;
        Some(((1u64 << leading_zeros) - 1 + suffix as u64) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 704x480 main-profile SPS, with emulation prevention bytes.
    const SPS_704X480: [u8; 44] = [
        0x42, 0x01, 0x01, 0x01, 0x60, 0x00, 0x00, 0x03, 0x00, 0xb0, 0x00, 0x00, 0x03, 0x00, 0x00,
        0x03, 0x00, 0x5a, 0xa0, 0x05, 0x82, 0x01, 0xe1, 0x63, 0x6b, 0x92, 0x45, 0x2f, 0xcd, 0xc1,
        0x41, 0x81, 0x41, 0x00, 0x00, 0x03, 0x00, 0x01, 0x00, 0x00, 0x03, 0x00, 0x0c, 0xa1,
    ];

    #[test]
    fn real_sps_dimensions() {
        assert_eq!(parse_dimensions(&SPS_704X480), Some((704, 480)));
    }

    // The same SPS re-encoded with a 1280x720 picture size.
    const SPS_1280X720: [u8; 45] = [
        0x42, 0x01, 0x01, 0x01, 0x60, 0x00, 0x00, 0x03, 0x00, 0xb0, 0x00, 0x00, 0x03, 0x00, 0x00,
        0x03, 0x00, 0x5a, 0xa0, 0x02, 0x80, 0x80, 0x2d, 0x16, 0x36, 0xb9, 0x24, 0x52, 0xfc, 0xdc,
        0x14, 0x18, 0x14, 0x10, 0x00, 0x00, 0x03, 0x00, 0x10, 0x00, 0x00, 0x03, 0x00, 0xca, 0x10,
    ];

    #[test]
    fn reencoded_sps_dimensions() {
        assert_eq!(parse_dimensions(&SPS_1280X720), Some((1280, 720)));
    }

    #[test]
    fn truncated_sps() {
        assert_eq!(parse_dimensions(&SPS_704X480[..10]), None);
        assert_eq!(parse_dimensions(&[0x42]), None);
    }

    #[test]
    fn emulation_prevention_removed() {
        assert_eq!(
            strip_emulation_prevention(&[0, 0, 3, 1, 0, 0, 3]),
            vec![0, 0, 1, 0, 0]
        );
    }

    #[test]
    fn exp_golomb() {
        // 1 | 010 | 011 | 00100 -> 0, 1, 2, 3
        let data = [0b1010_0110, 0b0100_0000];
        let mut r = BitReader::new(&data);
        assert_eq!(r.read_ue(), Some(0));
        assert_eq!(r.read_ue(), Some(1));
        assert_eq!(r.read_ue(), Some(2));
        assert_eq!(r.read_ue(), Some(3));
    }
}
