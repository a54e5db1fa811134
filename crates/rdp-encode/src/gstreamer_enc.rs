//! GStreamer-backed H.264 encode path, used by the EGFX/AVC420 delivery
//! code in `cosmic-ext-rdp-server` until that caller is migrated onto
//! [`crate::avc_session::AvcEncodeSession`].
//!
//! Builds an `appsrc ! videoconvert ! <encoder> ! h264parse ! appsink`
//! pipeline, preferring a hardware encoder (VAAPI, then NVENC) and
//! falling back to `x264enc` in software. Frames are pushed into `appsrc`
//! and pulled back out of `appsink` synchronously, one call per frame;
//! the small internal queueing means a push doesn't always yield a
//! sample immediately (`encode_frame` returns `Ok(None)` in that case).

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;

use crate::error::EncodeError;

/// Tunables for [`GstEncoder::new`]. Resolution is mandatory; the rest
/// default to values tuned for low-latency remote desktop delivery.
#[derive(Debug, Clone, Copy)]
pub struct EncoderConfig {
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    pub bitrate_kbps: u32,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            framerate: 30,
            bitrate_kbps: 8_000,
        }
    }
}

/// One encoded access unit pulled from the pipeline's `appsink`.
pub struct H264Frame {
    pub data: Vec<u8>,
    pub is_keyframe: bool,
}

/// H.264 encoder backed by a GStreamer pipeline.
pub struct GstEncoder {
    pipeline: gst::Pipeline,
    appsrc: gst_app::AppSrc,
    appsink: gst_app::AppSink,
    encoder_type: &'static str,
    frame_count: u64,
    force_keyframe: bool,
}

/// Hardware encoders are tried in this order before falling back to
/// software; the element name doubles as the factory name to instantiate.
const HARDWARE_ENCODERS: &[&str] = &["vaapih264enc", "nvh264enc"];
const SOFTWARE_ENCODER: &str = "x264enc";

fn make_encoder_element() -> (gst::Element, &'static str) {
    for name in HARDWARE_ENCODERS {
        if let Ok(element) = gst::ElementFactory::make(name).build() {
            return (element, name);
        }
    }
    let element = gst::ElementFactory::make(SOFTWARE_ENCODER)
        .property_from_str("tune", "zerolatency")
        .property_from_str("speed-preset", "ultrafast")
        .build()
        .expect("x264enc is always available as a software fallback");
    (element, SOFTWARE_ENCODER)
}

impl GstEncoder {
    /// Builds and starts the pipeline. Returns
    /// [`EncodeError::HardwareFailure`] if any element fails to link or
    /// the pipeline fails to reach the `Playing` state.
    pub fn new(config: &EncoderConfig) -> Result<Self, EncodeError> {
        gst::init().map_err(|e| EncodeError::HardwareFailure(format!("gst::init: {e}")))?;

        let pipeline = gst::Pipeline::new();

        let appsrc = gst_app::AppSrc::builder()
            .caps(
                &gst::Caps::builder("video/x-raw")
                    .field("format", "BGRA")
                    .field("width", config.width as i32)
                    .field("height", config.height as i32)
                    .field("framerate", gst::Fraction::new(config.framerate as i32, 1))
                    .build(),
            )
            .format(gst::Format::Time)
            .is_live(true)
            .do_timestamp(true)
            .build();

        let videoconvert = gst::ElementFactory::make("videoconvert")
            .build()
            .map_err(|e| EncodeError::HardwareFailure(format!("videoconvert: {e}")))?;

        let (encoder, encoder_type) = make_encoder_element();
        if encoder.has_property("bitrate", None) {
            encoder.set_property_from_str("bitrate", &config.bitrate_kbps.to_string());
        }

        let h264parse = gst::ElementFactory::make("h264parse")
            .property("config-interval", -1i32)
            .build()
            .map_err(|e| EncodeError::HardwareFailure(format!("h264parse: {e}")))?;

        let appsink = gst_app::AppSink::builder()
            .caps(
                &gst::Caps::builder("video/x-h264")
                    .field("stream-format", "byte-stream")
                    .field("alignment", "au")
                    .build(),
            )
            .sync(false)
            .max_buffers(1u32)
            .drop(true)
            .build();

        pipeline
            .add_many([
                appsrc.upcast_ref(),
                &videoconvert,
                &encoder,
                &h264parse,
                appsink.upcast_ref(),
            ])
            .map_err(|e| EncodeError::HardwareFailure(format!("add elements: {e}")))?;
        gst::Element::link_many([
            appsrc.upcast_ref(),
            &videoconvert,
            &encoder,
            &h264parse,
            appsink.upcast_ref(),
        ])
        .map_err(|e| EncodeError::HardwareFailure(format!("link elements: {e}")))?;

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| EncodeError::HardwareFailure(format!("set Playing: {e}")))?;

        Ok(Self {
            pipeline,
            appsrc,
            appsink,
            encoder_type,
            frame_count: 0,
            force_keyframe: false,
        })
    }

    /// Which encoder element ended up carrying the pipeline (useful for
    /// logging which hardware path, if any, was available).
    pub fn encoder_type(&self) -> &'static str {
        self.encoder_type
    }

    /// Requests that the next encoded frame be an IDR/keyframe, e.g. after
    /// an EGFX surface resize invalidates the client's reference picture.
    pub fn force_keyframe(&mut self) {
        self.force_keyframe = true;
    }

    /// Pushes one raw BGRA frame and pulls back whatever the pipeline has
    /// ready. Returns `Ok(None)` if the pipeline is still buffering this
    /// frame (normal for the first push or two after startup).
    pub fn encode_frame(&mut self, data: &[u8]) -> Result<Option<H264Frame>, EncodeError> {
        if self.force_keyframe {
            let event = gst_video::UpstreamForceKeyUnitEvent::builder()
                .all_headers(true)
                .build();
            let _ = self.appsrc.send_event(event);
            self.force_keyframe = false;
        }

        let mut buffer = gst::Buffer::with_size(data.len())
            .map_err(|e| EncodeError::HardwareFailure(format!("alloc buffer: {e}")))?;
        {
            let buffer_ref = buffer.get_mut().expect("buffer has single owner");
            let mut map = buffer_ref
                .map_writable()
                .map_err(|e| EncodeError::HardwareFailure(format!("map buffer: {e}")))?;
            map.copy_from_slice(data);
        }
        self.frame_count += 1;

        self.appsrc
            .push_buffer(buffer)
            .map_err(|e| EncodeError::HardwareFailure(format!("push_buffer: {e:?}")))?;

        match self.appsink.try_pull_sample(gst::ClockTime::from_mseconds(0)) {
            Some(sample) => {
                let buffer = sample
                    .buffer()
                    .ok_or_else(|| EncodeError::HardwareFailure("sample had no buffer".into()))?;
                let map = buffer
                    .map_readable()
                    .map_err(|e| EncodeError::HardwareFailure(format!("map sample: {e}")))?;
                let is_keyframe = !buffer.flags().contains(gst::BufferFlags::DELTA_UNIT);
                Ok(Some(H264Frame {
                    data: map.as_slice().to_vec(),
                    is_keyframe,
                }))
            }
            None => Ok(None),
        }
    }
}

impl Drop for GstEncoder {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}
