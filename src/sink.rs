//! The display-sink boundary.
//!
//! A [`DisplaySink`] is the chain's terminal consumer: a video output,
//! encoder, or test harness. The chain wraps it in a terminal stage (see
//! [`crate::stages::sink`]) so the rest of the pipeline only ever talks to
//! [`Stage`](crate::stage::Stage) objects.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::Result;
use crate::format::{FormatSupport, PixelFormat};
use crate::image::{BufferRef, DirectBuffer};
use crate::stage::{ControlRequest, StageConfig};

/// Terminal consumer of decoded, filtered frames.
pub trait DisplaySink {
    /// Name used in log lines and errors.
    fn name(&self) -> &str {
        "sink"
    }

    /// How well the sink displays `format` natively.
    fn query_format(&self, format: PixelFormat) -> FormatSupport;

    /// Apply a geometry/format change.
    fn configure(&mut self, cfg: &StageConfig) -> Result<()>;

    /// Whether the sink tolerates strides wider than the image.
    fn accepts_stride(&self) -> bool {
        true
    }

    /// Offer sink-owned memory for direct rendering of one frame.
    fn provide_buffer(
        &mut self,
        _format: PixelFormat,
        _width: u32,
        _height: u32,
    ) -> Option<DirectBuffer> {
        None
    }

    /// Present one frame.
    fn show_frame(&mut self, frame: &BufferRef, pts: Option<f64>) -> Result<()>;

    /// Handle an out-of-band request.
    fn control(&mut self, _req: ControlRequest) -> Result<()> {
        Ok(())
    }
}

/// Observable state of a [`NullSink`], shared with its creator.
#[derive(Debug, Default)]
pub struct SinkStats {
    /// Frames shown so far.
    pub frames_shown: usize,
    /// Timestamp of the most recent frame.
    pub last_pts: Option<f64>,
    /// Timestamps of every shown frame, in arrival order.
    pub pts_log: Vec<Option<f64>>,
    /// Configuration most recently applied.
    pub configured: Option<StageConfig>,
    /// Out-of-band requests received, in order.
    pub controls: Vec<ControlRequest>,
}

/// A sink that counts frames instead of displaying them.
///
/// Accepts a configurable format list. The [`SinkStats`] handle stays
/// valid after the sink moves into a chain, which is what tests and
/// benchmarks inspect.
pub struct NullSink {
    accepted: Vec<PixelFormat>,
    accept_stride: bool,
    direct_memory: Option<Rc<RefCell<Vec<u8>>>>,
    stats: Rc<RefCell<SinkStats>>,
}

impl NullSink {
    /// A sink accepting the given formats natively.
    pub fn new(accepted: impl Into<Vec<PixelFormat>>) -> Self {
        Self {
            accepted: accepted.into(),
            accept_stride: true,
            direct_memory: None,
            stats: Rc::new(RefCell::new(SinkStats::default())),
        }
    }

    /// Make the sink require tightly packed strides.
    pub fn reject_stride(mut self) -> Self {
        self.accept_stride = false;
        self
    }

    /// Make the sink offer its own memory for direct rendering.
    pub fn with_direct_rendering(mut self) -> Self {
        self.direct_memory = Some(Rc::new(RefCell::new(Vec::new())));
        self
    }

    /// Handle to the sink's observable state.
    pub fn stats(&self) -> Rc<RefCell<SinkStats>> {
        Rc::clone(&self.stats)
    }
}

impl DisplaySink for NullSink {
    fn name(&self) -> &str {
        "null"
    }

    fn query_format(&self, format: PixelFormat) -> FormatSupport {
        if self.accepted.contains(&format) {
            FormatSupport::Direct
        } else {
            FormatSupport::Unsupported
        }
    }

    fn configure(&mut self, cfg: &StageConfig) -> Result<()> {
        self.stats.borrow_mut().configured = Some(*cfg);
        Ok(())
    }

    fn accepts_stride(&self) -> bool {
        self.accept_stride
    }

    fn provide_buffer(
        &mut self,
        format: PixelFormat,
        width: u32,
        height: u32,
    ) -> Option<DirectBuffer> {
        let memory = self.direct_memory.as_ref()?;
        let (size, offsets, strides, planes) =
            crate::image::ImageBuffer::plan_layout(format, width, height)?;
        memory.borrow_mut().resize(size, 0);
        Some(DirectBuffer {
            memory: Rc::clone(memory),
            offsets,
            strides,
            planes,
        })
    }

    fn show_frame(&mut self, _frame: &BufferRef, pts: Option<f64>) -> Result<()> {
        let mut stats = self.stats.borrow_mut();
        stats.frames_shown += 1;
        stats.last_pts = pts;
        stats.pts_log.push(pts);
        Ok(())
    }

    fn control(&mut self, req: ControlRequest) -> Result<()> {
        self.stats.borrow_mut().controls.push(req);
        Ok(())
    }
}
