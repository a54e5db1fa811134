//! Bit-level emitter for the subset of H.264/AVC syntax this encoder needs:
//! access unit delimiters, sequence/picture parameter sets and slice headers.
//!
//! Only what High profile, 4:2:0, progressive, CQP, single-slice, no-B-frame
//! encoding actually exercises is implemented. Anything outside that subset
//! (field coding, scaling matrices, HRD, B-slices, reordering) is asserted
//! away rather than silently supported.

use std::fmt;

/// H.264 profile_idc for High profile.
pub const PROFILE_HIGH: u8 = 100;
/// `Extended_SAR` aspect_ratio_idc value.
pub const EXTENDED_SAR: u8 = 255;

/// `nal_ref_idc` values used by this writer.
pub mod ref_idc {
    pub const ZERO: u8 = 0;
    pub const MEDIUM: u8 = 2;
    pub const HIGH: u8 = 3;
}

/// `nal_unit_type` values used by this writer.
pub mod unit_type {
    pub const SLICE_NON_IDR: u8 = 1;
    pub const SLICE_IDR: u8 = 5;
    pub const SPS: u8 = 7;
    pub const PPS: u8 = 8;
    pub const AUD: u8 = 9;
}

/// `slice_type` values used by this writer (the short, non-modulo form).
pub mod slice_type {
    pub const P: u8 = 0;
    pub const I: u8 = 2;
}

/// Number of bits in `frame_num` (`log2_max_frame_num_minus4 = 4` ⇒ 8 bits).
pub const LOG2_MAX_FRAME_NUM: u32 = 8;

/// A bit-level emitter over a growable buffer of 32-bit words.
///
/// Mirrors the source's `NalBitstream`: bits are packed MSB-first into
/// 32-bit words, and the buffer is byte-swapped on flush so the backing
/// storage reads as a big-endian bitstream regardless of host endianness.
pub struct NalBitstream {
    words: Vec<u32>,
    bit_offset: usize,
}

impl NalBitstream {
    const ALLOCATION_STEP_BITS: usize = 4096 * 8;

    fn new() -> Self {
        let mut bitstream = Self {
            words: Vec::new(),
            bit_offset: 0,
        };
        bitstream.ensure_capacity(Self::ALLOCATION_STEP_BITS);
        bitstream
    }

    fn ensure_capacity(&mut self, extra_bits: usize) {
        let needed_bits = self.bit_offset + extra_bits;
        let needed_words = needed_bits.div_ceil(32);
        if needed_words > self.words.len() {
            self.words.resize(needed_words.max(self.words.len() + 1), 0);
        }
    }

    /// Writes the low `n_bits` of `value`, MSB first. `n_bits` must be <= 32.
    pub fn write_u(&mut self, value: u32, n_bits: u32) {
        debug_assert!(n_bits <= 32);
        if n_bits == 0 {
            return;
        }
        self.ensure_capacity(n_bits as usize);

        let mut remaining = n_bits;
        let mut value = value & mask(n_bits);
        while remaining > 0 {
            let word_idx = self.bit_offset / 32;
            let bit_in_word = (self.bit_offset % 32) as u32;
            let space_in_word = 32 - bit_in_word;
            let take = remaining.min(space_in_word);

            let chunk = (value >> (remaining - take)) & mask(take);
            let shift = space_in_word - take;
            self.words[word_idx] |= chunk << shift;

            value &= mask(remaining - take);
            remaining -= take;
            self.bit_offset += take as usize;
        }
    }

    /// Exp-Golomb unsigned coding: `ue(v)`.
    pub fn write_ue(&mut self, value: u32) {
        let code_num = value.checked_add(1).expect("ue value too large");
        let n_bits = 32 - code_num.leading_zeros();
        self.write_u(0, n_bits - 1);
        self.write_u(code_num, n_bits);
    }

    /// Exp-Golomb signed coding: `se(v)`.
    pub fn write_se(&mut self, value: i32) {
        if value <= 0 {
            self.write_ue((-value as i64 * 2) as u32);
        } else {
            self.write_ue((value as i64 * 2 - 1) as u32);
        }
    }

    /// Writes the 32-bit start code prefix `0x00000001`.
    pub fn write_start_code_prefix(&mut self) {
        self.write_u(0x0000_0001, 32);
    }

    /// Writes `forbidden_zero_bit(0) + nal_ref_idc(2) + nal_unit_type(5)`.
    pub fn write_nal_header(&mut self, nal_ref_idc: u8, nal_unit_type: u8) {
        self.write_u(0, 1);
        self.write_u(u32::from(nal_ref_idc), 2);
        self.write_u(u32::from(nal_unit_type), 5);
    }

    /// `rbsp_trailing_bits()`: a single stop bit followed by zero padding to
    /// the next byte boundary.
    pub fn write_trailing_bits(&mut self) {
        self.write_u(1, 1);
        let rem = (self.bit_offset % 8) as u32;
        if rem != 0 {
            self.write_u(0, 8 - rem);
        }
    }

    /// Current length of the bitstream, in bits.
    pub fn bit_len(&self) -> usize {
        self.bit_offset
    }

    /// Flushes the bitstream into a byte-swapped buffer (to emulate the
    /// source's big-endian 32-bit word layout) and returns it alongside the
    /// exact bit length.
    fn finish(self) -> (Vec<u8>, usize) {
        let n_bytes = self.bit_offset.div_ceil(8);
        let mut bytes = Vec::with_capacity(n_bytes);
        for word in &self.words {
            bytes.extend_from_slice(&word.to_be_bytes());
        }
        bytes.truncate(n_bytes);
        (bytes, self.bit_offset)
    }
}

fn mask(n_bits: u32) -> u32 {
    if n_bits >= 32 {
        u32::MAX
    } else {
        (1u32 << n_bits) - 1
    }
}

/// A finished NAL unit: its bytes (start code + header + RBSP, byte-aligned
/// for AUD/SPS/PPS) and the exact bit length before any padding.
#[derive(Debug, Clone)]
pub struct NalBits {
    pub bytes: Vec<u8>,
    pub bit_len: usize,
}

impl NalBits {
    /// True for AUD/SPS/PPS, which must land on a byte boundary.
    pub fn is_byte_aligned(&self) -> bool {
        self.bit_len % 8 == 0
    }
}

/// VUI timing/bitstream-restriction parameters this encoder always emits.
#[derive(Debug, Clone, Copy)]
pub struct VuiParams {
    pub refresh_rate: u32,
    pub fixed_frame_rate: bool,
}

/// Sequence-level parameters needed to build an SPS.
#[derive(Debug, Clone, Copy)]
pub struct SeqParams {
    pub level_idc: u8,
    pub bit_depth_luma_minus8: u32,
    pub bit_depth_chroma_minus8: u32,
    pub pic_width_in_mbs: u32,
    pub pic_height_in_map_units: u32,
    pub vui: Option<VuiParams>,
}

/// Picture-level parameters needed to build a PPS.
#[derive(Debug, Clone, Copy)]
pub struct PicParams {
    pub pic_init_qp: i32,
}

/// Per-slice parameters needed to build a slice header.
#[derive(Debug, Clone, Copy)]
pub struct SliceParams {
    pub is_idr: bool,
    pub idr_pic_id: u32,
    pub frame_num: u32,
    pub entropy_coding_mode: bool,
}

/// Error produced when an SPS/PPS is asked to express syntax this writer
/// deliberately does not support (matches the source's `g_assert` guards).
#[derive(Debug, Clone, Copy, thiserror::Error)]
pub enum UnsupportedSyntax {
    #[error("chroma_format_idc 4:4:4 is not supported")]
    ChromaFormat444,
    #[error("pic_order_cnt_type 0/1 is not supported, only type 2")]
    PicOrderCntType,
}

impl fmt::Debug for NalWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NalWriter").finish_non_exhaustive()
    }
}

/// The stateful writer exposed to the encode session: one bitstream per call,
/// four products.
#[derive(Default)]
pub struct NalWriter;

impl NalWriter {
    pub fn new() -> Self {
        Self
    }

    /// Builds the access unit delimiter NAL (`primary_pic_type = 1`).
    pub fn write_access_unit_delimiter(&self) -> NalBits {
        let mut bs = NalBitstream::new();
        bs.write_start_code_prefix();
        bs.write_nal_header(ref_idc::ZERO, unit_type::AUD);
        bs.write_u(1, 3); // primary_pic_type
        bs.write_trailing_bits();
        let (bytes, bit_len) = bs.finish();
        NalBits { bytes, bit_len }
    }

    fn write_vui_parameters(bs: &mut NalBitstream, vui: &VuiParams) {
        bs.write_u(1, 1); // aspect_ratio_info_present_flag
        bs.write_u(u32::from(EXTENDED_SAR), 8); // aspect_ratio_idc
        bs.write_u(1, 16); // sar_width
        bs.write_u(1, 16); // sar_height

        bs.write_u(0, 1); // overscan_info_present_flag
        bs.write_u(0, 1); // video_signal_type_present_flag
        bs.write_u(0, 1); // chroma_loc_info_present_flag

        bs.write_u(1, 1); // timing_info_present_flag
        bs.write_u(1000, 32); // num_units_in_tick
        bs.write_u(2 * vui.refresh_rate * 1000, 32); // time_scale
        bs.write_u(u32::from(vui.fixed_frame_rate), 1);

        bs.write_u(0, 1); // nal_hrd_parameters_present_flag
        bs.write_u(0, 1); // vcl_hrd_parameters_present_flag
        bs.write_u(0, 1); // pic_struct_present_flag

        bs.write_u(1, 1); // bitstream_restriction_flag
        bs.write_u(1, 1); // motion_vectors_over_pic_boundaries_flag
        bs.write_ue(0); // max_bytes_per_pic_denom
        bs.write_ue(0); // max_bits_per_mb_denom
        bs.write_ue(15); // log2_max_mv_length_horizontal
        bs.write_ue(15); // log2_max_mv_length_vertical
        bs.write_ue(0); // max_num_reorder_frames
        bs.write_ue(1); // max_dec_frame_buffering
    }

    fn write_sps_data(bs: &mut NalBitstream, seq: &SeqParams) {
        bs.write_u(u32::from(PROFILE_HIGH), 8);
        bs.write_u(0, 4); // constraint_set0..3_flag
        bs.write_u(1, 1); // constraint_set4_flag: frame-mbs-only
        bs.write_u(1, 1); // constraint_set5_flag: no B-slices
        bs.write_u(0, 2); // reserved_zero_2bits
        bs.write_u(u32::from(seq.level_idc), 8);

        bs.write_ue(0); // seq_parameter_set_id
        bs.write_ue(1); // chroma_format_idc (4:2:0)
        bs.write_ue(seq.bit_depth_luma_minus8);
        bs.write_ue(seq.bit_depth_chroma_minus8);
        bs.write_u(0, 1); // qpprime_y_zero_transform_bypass_flag
        bs.write_u(0, 1); // seq_scaling_matrix_present_flag

        bs.write_ue(LOG2_MAX_FRAME_NUM - 4); // log2_max_frame_num_minus4
        bs.write_ue(2); // pic_order_cnt_type
        bs.write_ue(1); // max_num_ref_frames
        bs.write_u(0, 1); // gaps_in_frame_num_value_allowed_flag
        bs.write_ue(seq.pic_width_in_mbs - 1);
        bs.write_ue(seq.pic_height_in_map_units - 1);
        bs.write_u(1, 1); // frame_mbs_only_flag
        bs.write_u(1, 1); // direct_8x8_inference_flag
        bs.write_u(0, 1); // frame_cropping_flag

        match &seq.vui {
            Some(vui) => {
                bs.write_u(1, 1);
                Self::write_vui_parameters(bs, vui);
            }
            None => bs.write_u(0, 1),
        }
    }

    /// Builds the sequence parameter set NAL.
    pub fn write_sps(&self, seq: &SeqParams) -> NalBits {
        let mut bs = NalBitstream::new();
        bs.write_start_code_prefix();
        bs.write_nal_header(ref_idc::HIGH, unit_type::SPS);
        Self::write_sps_data(&mut bs, seq);
        bs.write_trailing_bits();
        let (bytes, bit_len) = bs.finish();
        NalBits { bytes, bit_len }
    }

    fn write_pps_data(bs: &mut NalBitstream, pic: &PicParams) {
        bs.write_ue(0); // pic_parameter_set_id
        bs.write_ue(0); // seq_parameter_set_id
        bs.write_u(1, 1); // entropy_coding_mode_flag (CABAC)
        bs.write_u(0, 1); // bottom_field_pic_order_in_frame_present_flag
        bs.write_ue(0); // num_slice_groups_minus1
        bs.write_ue(0); // num_ref_idx_l0_default_active_minus1
        bs.write_ue(0); // num_ref_idx_l1_default_active_minus1
        bs.write_u(0, 1); // weighted_pred_flag
        bs.write_u(0, 2); // weighted_bipred_idc
        bs.write_se(pic.pic_init_qp - 26); // pic_init_qp_minus26
        bs.write_se(0); // pic_init_qs_minus26
        bs.write_se(0); // chroma_qp_index_offset
        bs.write_u(1, 1); // deblocking_filter_control_present_flag
        bs.write_u(0, 1); // constrained_intra_pred_flag
        bs.write_u(0, 1); // redundant_pic_cnt_present_flag
        bs.write_u(1, 1); // transform_8x8_mode_flag
        bs.write_u(0, 1); // pic_scaling_matrix_present_flag
        bs.write_se(0); // second_chroma_qp_index_offset
    }

    /// Builds the picture parameter set NAL.
    pub fn write_pps(&self, pic: &PicParams) -> NalBits {
        let mut bs = NalBitstream::new();
        bs.write_start_code_prefix();
        bs.write_nal_header(ref_idc::HIGH, unit_type::PPS);
        Self::write_pps_data(&mut bs, pic);
        bs.write_trailing_bits();
        let (bytes, bit_len) = bs.finish();
        NalBits { bytes, bit_len }
    }

    fn write_ref_pic_list_modification(bs: &mut NalBitstream) {
        bs.write_u(0, 1); // ref_pic_list_modification_flag_l0
    }

    fn write_dec_ref_pic_marking(bs: &mut NalBitstream, is_idr: bool) {
        if is_idr {
            bs.write_u(0, 1); // no_output_of_prior_pics_flag
            bs.write_u(0, 1); // long_term_reference_flag
        } else {
            bs.write_u(0, 1); // adaptive_ref_pic_marking_mode_flag
        }
    }

    /// Builds the slice header NAL. Per VA-API convention this is emitted
    /// *without* trailing bits: the hardware appends entropy-coded slice
    /// data directly after the header bits.
    pub fn write_slice_header(&self, slice: &SliceParams) -> NalBits {
        let mut bs = NalBitstream::new();
        bs.write_start_code_prefix();

        let (nal_ref_idc, nal_unit_type) = if slice.is_idr {
            (ref_idc::HIGH, unit_type::SLICE_IDR)
        } else {
            (ref_idc::MEDIUM, unit_type::SLICE_NON_IDR)
        };
        bs.write_nal_header(nal_ref_idc, nal_unit_type);

        bs.write_ue(0); // first_mb_in_slice
        bs.write_ue(u32::from(if slice.is_idr {
            slice_type::I
        } else {
            slice_type::P
        }));
        bs.write_ue(0); // pic_parameter_set_id
        bs.write_u(slice.frame_num, LOG2_MAX_FRAME_NUM);

        if slice.is_idr {
            bs.write_ue(slice.idr_pic_id);
        }
        // pic_order_cnt_type == 2: no pic_order_cnt_lsb field to write.

        if !slice.is_idr {
            bs.write_u(0, 1); // num_ref_idx_active_override_flag
            Self::write_ref_pic_list_modification(&mut bs);
        }

        if nal_ref_idc != ref_idc::ZERO {
            Self::write_dec_ref_pic_marking(&mut bs, slice.is_idr);
        }

        if slice.entropy_coding_mode && !slice.is_idr {
            bs.write_ue(0); // cabac_init_idc
        }

        bs.write_se(0); // slice_qp_delta

        let (bytes, bit_len) = bs.finish();
        NalBits { bytes, bit_len }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ue_decode(bits: &[u8]) -> (u32, usize) {
        let bit_at = |i: usize| -> u32 {
            let byte = bits[i / 8];
            u32::from((byte >> (7 - (i % 8))) & 1)
        };
        let mut i = 0;
        let mut leading_zeros = 0;
        while bit_at(i) == 0 {
            leading_zeros += 1;
            i += 1;
        }
        i += 1;
        let mut value = 1u32;
        for _ in 0..leading_zeros {
            value = (value << 1) | bit_at(i);
            i += 1;
        }
        (value - 1, i)
    }

    fn se_decode(code_num: u32) -> i32 {
        if code_num % 2 == 1 {
            (code_num as i64 / 2 + 1) as i32
        } else {
            -((code_num / 2) as i32)
        }
    }

    #[test]
    fn ue_round_trip() {
        for v in [0u32, 1, 2, 3, 7, 8, 255, 1_000_000, u32::MAX / 2] {
            let mut bs = NalBitstream::new();
            bs.write_ue(v);
            let (bytes, bit_len) = bs.finish();
            let padded = {
                let mut b = bytes.clone();
                // pad out to a full byte boundary of bits for the decoder helper
                while b.len() * 8 < bit_len.div_ceil(8) * 8 {
                    b.push(0);
                }
                b
            };
            let (code_num, used_bits) = ue_decode(&padded);
            assert_eq!(code_num, v);
            assert_eq!(used_bits, bit_len);
        }
    }

    #[test]
    fn se_round_trip() {
        for v in [-1_000_000i32, -3, -1, 0, 1, 3, 1_000_000] {
            let mut bs = NalBitstream::new();
            bs.write_se(v);
            let (bytes, bit_len) = bs.finish();
            let mut padded = bytes;
            while padded.len() * 8 < bit_len.div_ceil(8) * 8 {
                padded.push(0);
            }
            let (code_num, _) = ue_decode(&padded);
            assert_eq!(se_decode(code_num), v);
        }
    }

    #[test]
    fn aud_is_byte_aligned_and_has_start_code() {
        let writer = NalWriter::new();
        let aud = writer.write_access_unit_delimiter();
        assert!(aud.is_byte_aligned());
        assert_eq!(&aud.bytes[0..4], &[0x00, 0x00, 0x00, 0x01]);
    }

    #[test]
    fn sps_1080p60_has_expected_level_and_mb_dims() {
        let writer = NalWriter::new();
        let seq = SeqParams {
            level_idc: 40,
            bit_depth_luma_minus8: 0,
            bit_depth_chroma_minus8: 0,
            pic_width_in_mbs: 1920 / 16,
            pic_height_in_map_units: 1080 / 16,
            vui: Some(VuiParams {
                refresh_rate: 60,
                fixed_frame_rate: true,
            }),
        };
        let sps = writer.write_sps(&seq);
        assert!(sps.is_byte_aligned());

        // profile_idc is the first byte of RBSP after the 5-byte start
        // code + NAL header.
        assert_eq!(sps.bytes[4], PROFILE_HIGH);
        assert_eq!(sps.bytes[5], 0b0000_0011); // constraint_set4/5 + reserved
        assert_eq!(sps.bytes[6], 40); // level_idc
    }

    #[test]
    fn pps_byte_aligned() {
        let writer = NalWriter::new();
        let pps = writer.write_pps(&PicParams { pic_init_qp: 22 });
        assert!(pps.is_byte_aligned());
    }

    #[test]
    fn slice_header_has_no_trailing_bits_padding_beyond_content() {
        let writer = NalWriter::new();
        let idr = writer.write_slice_header(&SliceParams {
            is_idr: true,
            idr_pic_id: 0,
            frame_num: 0,
            entropy_coding_mode: true,
        });
        // first_mb_in_slice=ue(0)=1bit, slice_type=ue(2)=3bits,
        // pps_id=ue(0)=1bit, frame_num=8bits, idr_pic_id=ue(0)=1bit,
        // dec_ref_pic_marking (IDR): 2 bits, slice_qp_delta=se(0)=1bit
        // total RBSP bits after header = 1+3+1+8+1+2+1 = 17
        let header_bits = 5 * 8; // start code + nal header
        assert_eq!(idr.bit_len, header_bits + 17);
    }

    #[test]
    fn p_slice_omits_idr_pic_id_and_carries_ref_list_mod() {
        let writer = NalWriter::new();
        let p = writer.write_slice_header(&SliceParams {
            is_idr: false,
            idr_pic_id: 0,
            frame_num: 1,
            entropy_coding_mode: true,
        });
        // first_mb=1 + slice_type ue(0)=1 + pps_id=1 + frame_num=8 +
        // num_ref_idx_active_override_flag=1 + ref_pic_list_mod flag=1 +
        // dec_ref_pic_marking (non-IDR) = 1 + cabac_init_idc ue(0)=1 +
        // slice_qp_delta=1 = 16
        let header_bits = 5 * 8;
        assert_eq!(p.bit_len, header_bits + 16);
    }
}
