//! Orchestrates a hardware AVC encode session: NV12 surface pool, packed
//! SPS/PPS/AUD/slice headers, CQP rate control, IDR/P reference tracking.
//!
//! The actual VA-API calls (surface creation, buffer submission, fence
//! waits) are abstracted behind [`HardwareEncoder`] so the bookkeeping this
//! module is responsible for — level_idc derivation, frame_num wraparound,
//! reference-picture handling, coded-buffer sizing, NAL assembly order — is
//! exercised the same way with or without a GPU attached.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::error::EncodeError;
use crate::nal_writer::{NalWriter, PicParams, SeqParams, SliceParams, VuiParams};

/// Opaque handle to an NV12 image view backed by a source surface. Stable
/// for the lifetime of the encode session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageViewId(pub u32);

/// Opaque handle to a reconstructed (reference) picture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceHandle(pub u64);

/// `GrdAVCFrameInfo`: the side channel the transport uses to choose GFX
/// headers without re-parsing the NAL stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvcFrameInfo {
    pub frame_type: FrameType,
    pub qp: u8,
    pub quality: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    I,
    P,
}

/// A reconstructed AVC reference frame.
#[derive(Debug, Clone, Copy)]
pub struct ReconstructedPicture {
    pub surface: SurfaceHandle,
    pub frame_num: u32,
    pub is_idr: bool,
}

/// A mapped, hardware-produced coded buffer ready for the transport.
#[derive(Debug)]
pub struct Bitstream {
    pub view: ImageViewId,
    pub data: Vec<u8>,
    pub frame_info: AvcFrameInfo,
}

struct PendingFrame {
    #[allow(dead_code)] // carried for parity with the source's frame record; not yet consumed downstream
    frame_num: u32,
    is_idr: bool,
}

/// Seam between this module's bookkeeping and the real hardware backend.
/// No production implementation is wired in yet (the binary still drives
/// `gstreamer_enc::GstEncoder` for EGFX delivery); tests use a mock.
pub trait HardwareEncoder: Send {
    /// Submits the per-frame buffer list and returns immediately; the
    /// hardware encodes asynchronously.
    fn submit(&mut self, view: ImageViewId, nal_bytes_total: usize) -> Result<(), EncodeError>;

    /// Submits a quality-level misc-parameter buffer. Only ever called for
    /// IDR frames on devices that advertise quality-level support (§4.2
    /// step 3).
    fn submit_quality_level(&mut self, view: ImageViewId, level: u8) -> Result<(), EncodeError>;

    /// Blocks until hardware completion for `view` and returns the coded
    /// bytes.
    fn sync_and_map(&mut self, view: ImageViewId) -> Result<Vec<u8>, EncodeError>;

    /// Releases the mapped buffer for `view`.
    fn unmap(&mut self, view: ImageViewId) -> Result<(), EncodeError>;

    /// The set of NV12 image views backed by the source surface pool.
    fn image_views(&self) -> Vec<ImageViewId>;
}

/// `pic_init_qp` hardcoded by the source; CQP rate control always targets
/// this QP.
pub const PIC_INIT_QP: i32 = 22;
/// `quality` field always reported in [`AvcFrameInfo`].
pub const QUALITY: u8 = 100;
/// Quality level submitted alongside an IDR frame on devices that support
/// it; the source always requests level 0 (highest quality).
pub const QUALITY_LEVEL: u8 = 0;

/// Derives `level_idc` from macroblocks-per-second per AVC spec Table A-1.
/// Returns `None` if no level in the table accommodates the rate.
pub fn level_idc_for_mbps(mbps: u64) -> Option<u8> {
    const TABLE: &[(u64, u8)] = &[
        (1_485, 10),
        (3_000, 11),
        (6_000, 12),
        (11_880, 13),
        (19_800, 21),
        (20_250, 22),
        (40_500, 30),
        (108_000, 31),
        (216_000, 32),
        (245_760, 40),
        (522_240, 42),
        (589_824, 50),
        (983_040, 51),
        (2_073_600, 52),
        (4_177_920, 60),
        (8_355_840, 61),
        (16_711_680, 62),
    ];
    TABLE.iter().find(|(max, _)| mbps <= *max).map(|(_, lvl)| *lvl)
}

/// Resolution in macroblocks; `width`/`height` must already be multiples of
/// 16 and at least 16.
#[derive(Debug, Clone, Copy)]
pub struct MbDimensions {
    pub width_in_mbs: u32,
    pub height_in_mbs: u32,
}

impl MbDimensions {
    pub fn from_pixels(width: u32, height: u32) -> Self {
        assert!(width % 16 == 0 && width >= 16, "surface width must be a non-zero multiple of 16");
        assert!(height % 16 == 0 && height >= 16, "surface height must be a non-zero multiple of 16");
        Self {
            width_in_mbs: width / 16,
            height_in_mbs: height / 16,
        }
    }

    pub fn determine_level_idc(&self, refresh_rate: u32) -> Result<u8, EncodeError> {
        let mbps = u64::from(self.width_in_mbs) * u64::from(self.height_in_mbs) * u64::from(refresh_rate);
        level_idc_for_mbps(mbps)
            .ok_or_else(|| EncodeError::UnsupportedDevice(format!("unable to determine level_idc for {mbps} mbps")))
    }

    /// Coded-buffer sizing per §4.2 step 6: `w_mb * h_mb * 400 +
    /// ceil(header_bits / 8)`.
    pub fn coded_buffer_size(&self, header_bits: usize) -> usize {
        (self.width_in_mbs as usize) * (self.height_in_mbs as usize) * 400 + header_bits.div_ceil(8)
    }
}

/// `frame_num` wraps at `(1 << 8) + 1 = 257`, one past the H.264-spec value
/// of 256 — preserved intentionally, see SPEC_FULL.md §9.
const FRAME_NUM_MODULUS: u32 = (1 << 8) + 1;

struct Inner {
    pending_frames: HashMap<ImageViewId, PendingFrame>,
    locked_bitstreams: HashSet<ImageViewId>,
}

/// The AVC encode session itself: owns the NAL writer, the reference
/// picture, frame-number bookkeeping, and the pending/locked view maps.
pub struct AvcEncodeSession<H: HardwareEncoder> {
    hardware: H,
    nal_writer: NalWriter,
    mb: MbDimensions,
    level_idc: u8,
    refresh_rate: u32,
    supports_quality_level: bool,

    frame_num: u32,
    pending_idr_frame: bool,
    reference: Option<ReconstructedPicture>,

    inner: Mutex<Inner>,
}

impl<H: HardwareEncoder> AvcEncodeSession<H> {
    pub fn new(
        hardware: H,
        src_w: u32,
        src_h: u32,
        refresh_rate: u32,
        supports_quality_level: bool,
    ) -> Result<Self, EncodeError> {
        let mb = MbDimensions::from_pixels(src_w, src_h);
        let level_idc = mb.determine_level_idc(refresh_rate)?;

        Ok(Self {
            hardware,
            nal_writer: NalWriter::new(),
            mb,
            level_idc,
            refresh_rate,
            supports_quality_level,
            frame_num: 0,
            pending_idr_frame: true,
            reference: None,
            inner: Mutex::new(Inner {
                pending_frames: HashMap::new(),
                locked_bitstreams: HashSet::new(),
            }),
        })
    }

    pub fn level_idc(&self) -> u8 {
        self.level_idc
    }

    pub fn get_image_views(&self) -> Vec<ImageViewId> {
        self.hardware.image_views()
    }

    pub fn has_pending_frames(&self) -> bool {
        !self.inner.lock().expect("encode session mutex poisoned").pending_frames.is_empty()
    }

    fn seq_params(&self) -> SeqParams {
        SeqParams {
            level_idc: self.level_idc,
            bit_depth_luma_minus8: 0,
            bit_depth_chroma_minus8: 0,
            pic_width_in_mbs: self.mb.width_in_mbs,
            pic_height_in_map_units: self.mb.height_in_mbs,
            vui: Some(VuiParams {
                refresh_rate: self.refresh_rate,
                fixed_frame_rate: true,
            }),
        }
    }

    /// Assembles the per-frame NAL bundle (§4.2 "Per-frame protocol") and
    /// returns the total bit length, used to size the coded buffer.
    fn build_headers(&self, is_idr: bool) -> usize {
        let mut total_bits = 0;

        let aud = self.nal_writer.write_access_unit_delimiter();
        total_bits += aud.bit_len;

        if is_idr {
            let sps = self.nal_writer.write_sps(&self.seq_params());
            total_bits += sps.bit_len;
        }

        if is_idr {
            let pps = self.nal_writer.write_pps(&PicParams { pic_init_qp: PIC_INIT_QP });
            total_bits += pps.bit_len;
        }

        let slice = self.nal_writer.write_slice_header(&SliceParams {
            is_idr,
            idr_pic_id: 0,
            frame_num: self.frame_num,
            entropy_coding_mode: true,
        });
        total_bits += slice.bit_len;

        total_bits
    }

    /// Submits `view` for encoding. Fails with [`EncodeError::Busy`] if the
    /// view already has a frame pending.
    pub fn encode_frame(&mut self, view: ImageViewId) -> Result<(), EncodeError> {
        {
            let inner = self.inner.lock().expect("encode session mutex poisoned");
            if inner.pending_frames.contains_key(&view) {
                return Err(EncodeError::Busy);
            }
        }

        let is_idr = self.pending_idr_frame;
        let header_bits = self.build_headers(is_idr);
        let coded_buffer_size = self.mb.coded_buffer_size(header_bits);

        self.hardware.submit(view, coded_buffer_size)?;
        if is_idr && self.supports_quality_level {
            self.hardware.submit_quality_level(view, QUALITY_LEVEL)?;
        }

        {
            let mut inner = self.inner.lock().expect("encode session mutex poisoned");
            inner.pending_frames.insert(
                view,
                PendingFrame {
                    frame_num: self.frame_num,
                    is_idr,
                },
            );
        }

        // Reference handling: the freshly submitted picture becomes the new
        // reference once it is the most recently encoded frame.
        self.reference = Some(ReconstructedPicture {
            surface: SurfaceHandle(u64::from(view.0)),
            frame_num: self.frame_num,
            is_idr,
        });

        self.frame_num = (self.frame_num + 1) % FRAME_NUM_MODULUS;
        if is_idr {
            self.pending_idr_frame = false;
        }

        Ok(())
    }

    /// Waits for hardware completion and returns the mapped bitstream,
    /// moving `view` from pending to locked.
    pub fn lock_bitstream(&mut self, view: ImageViewId) -> Result<Bitstream, EncodeError> {
        let pending = {
            let mut inner = self.inner.lock().expect("encode session mutex poisoned");
            inner.pending_frames.remove(&view).ok_or(EncodeError::NotPending)?
        };

        let data = self.hardware.sync_and_map(view)?;

        {
            let mut inner = self.inner.lock().expect("encode session mutex poisoned");
            inner.locked_bitstreams.insert(view);
        }

        Ok(Bitstream {
            view,
            data,
            frame_info: AvcFrameInfo {
                frame_type: if pending.is_idr { FrameType::I } else { FrameType::P },
                qp: PIC_INIT_QP as u8,
                quality: QUALITY,
            },
        })
    }

    /// Unmaps and releases a previously locked bitstream.
    pub fn unlock_bitstream(&mut self, bitstream: Bitstream) -> Result<(), EncodeError> {
        {
            let mut inner = self.inner.lock().expect("encode session mutex poisoned");
            if !inner.locked_bitstreams.remove(&bitstream.view) {
                return Err(EncodeError::NotLocked);
            }
        }
        self.hardware.unmap(bitstream.view)
    }

    /// Forces the next `encode_frame` to be an IDR (reset / pipeline
    /// rewrite path).
    pub fn request_idr(&mut self) {
        self.pending_idr_frame = true;
        self.reference = None;
    }

    #[cfg(test)]
    fn frame_num_for_test(&self) -> u32 {
        self.frame_num
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;

    struct MockHardware {
        views: Vec<ImageViewId>,
        mapped: StdHashMap<ImageViewId, Vec<u8>>,
        quality_level_calls: Vec<(ImageViewId, u8)>,
    }

    impl MockHardware {
        fn new(n_views: u32) -> Self {
            Self {
                views: (0..n_views).map(ImageViewId).collect(),
                mapped: StdHashMap::new(),
                quality_level_calls: Vec::new(),
            }
        }
    }

    impl HardwareEncoder for MockHardware {
        fn submit(&mut self, view: ImageViewId, nal_bytes_total: usize) -> Result<(), EncodeError> {
            self.mapped.insert(view, vec![0u8; nal_bytes_total.min(16)]);
            Ok(())
        }

        fn submit_quality_level(&mut self, view: ImageViewId, level: u8) -> Result<(), EncodeError> {
            self.quality_level_calls.push((view, level));
            Ok(())
        }

        fn sync_and_map(&mut self, view: ImageViewId) -> Result<Vec<u8>, EncodeError> {
            self.mapped.remove(&view).ok_or(EncodeError::NotPending)
        }

        fn unmap(&mut self, _view: ImageViewId) -> Result<(), EncodeError> {
            Ok(())
        }

        fn image_views(&self) -> Vec<ImageViewId> {
            self.views.clone()
        }
    }

    #[test]
    fn e1_1080p60_level_idc_is_40() {
        let mb = MbDimensions::from_pixels(1920, 1080);
        assert_eq!(mb.width_in_mbs, 120);
        assert_eq!(mb.height_in_mbs, 68);
        assert_eq!(mb.determine_level_idc(60).unwrap(), 40);
    }

    #[test]
    fn property_1_encode_lock_unlock_ordering() {
        let hw = MockHardware::new(1);
        let mut session = AvcEncodeSession::new(hw, 1920, 1080, 60, true).unwrap();
        let view = ImageViewId(0);

        session.encode_frame(view).unwrap();
        assert!(session.has_pending_frames());

        // Busy while still pending.
        assert!(matches!(session.encode_frame(view), Err(EncodeError::Busy)));

        let bitstream = session.lock_bitstream(view).unwrap();
        assert!(!session.has_pending_frames());

        session.unlock_bitstream(bitstream).unwrap();

        // Eligible again after unlock.
        session.encode_frame(view).unwrap();
    }

    #[test]
    fn e3_frame_num_wraps_at_257() {
        let hw = MockHardware::new(1);
        let mut session = AvcEncodeSession::new(hw, 1920, 1080, 60, true).unwrap();
        let view = ImageViewId(0);

        for _ in 0..257 {
            session.encode_frame(view).unwrap();
            let bitstream = session.lock_bitstream(view).unwrap();
            session.unlock_bitstream(bitstream).unwrap();
        }

        assert_eq!(session.frame_num_for_test(), 0);
    }

    #[test]
    fn e2_idr_then_p_frame_reference() {
        let hw = MockHardware::new(1);
        let mut session = AvcEncodeSession::new(hw, 1920, 1080, 60, true).unwrap();
        let view = ImageViewId(0);

        assert!(session.pending_idr_frame);
        session.encode_frame(view).unwrap();
        assert!(!session.pending_idr_frame);
        let idr_bitstream = session.lock_bitstream(view).unwrap();
        assert_eq!(idr_bitstream.frame_info.frame_type, FrameType::I);
        session.unlock_bitstream(idr_bitstream).unwrap();

        let prior_reference = session.reference.unwrap();
        assert_eq!(prior_reference.frame_num, 0);

        session.encode_frame(view).unwrap();
        let p_bitstream = session.lock_bitstream(view).unwrap();
        assert_eq!(p_bitstream.frame_info.frame_type, FrameType::P);
        session.unlock_bitstream(p_bitstream).unwrap();
    }

    #[test]
    fn e7_quality_level_buffer_submitted_only_for_idr_when_supported() {
        let hw = MockHardware::new(1);
        let mut session = AvcEncodeSession::new(hw, 1920, 1080, 60, true).unwrap();
        let view = ImageViewId(0);

        session.encode_frame(view).unwrap(); // IDR
        let bitstream = session.lock_bitstream(view).unwrap();
        session.unlock_bitstream(bitstream).unwrap();

        session.encode_frame(view).unwrap(); // P frame
        let bitstream = session.lock_bitstream(view).unwrap();
        session.unlock_bitstream(bitstream).unwrap();

        assert_eq!(session.hardware.quality_level_calls, vec![(view, QUALITY_LEVEL)]);
    }

    #[test]
    fn e7_quality_level_buffer_not_submitted_when_unsupported() {
        let hw = MockHardware::new(1);
        let mut session = AvcEncodeSession::new(hw, 1920, 1080, 60, false).unwrap();
        let view = ImageViewId(0);

        session.encode_frame(view).unwrap(); // IDR
        assert!(session.hardware.quality_level_calls.is_empty());
    }

    #[test]
    fn level_idc_table_boundaries() {
        assert_eq!(level_idc_for_mbps(1_485), Some(10));
        assert_eq!(level_idc_for_mbps(1_486), Some(11));
        assert_eq!(level_idc_for_mbps(16_711_680), Some(62));
        assert_eq!(level_idc_for_mbps(16_711_681), None);
    }
}
