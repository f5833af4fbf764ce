//! The [`Stage`] trait: one processing step in a filter chain.
//!
//! Every method that touches the rest of the chain receives a
//! [`ChainView`] over the stages downstream of the one being dispatched.
//! The default method bodies forward straight through the view, so a
//! minimal stage overrides nothing and behaves as a transparent
//! passthrough; real stages override only the hooks they care about.

use crate::chain::ChainView;
use crate::error::Result;
use crate::format::{ConfigFlags, FormatReply, PixelFormat, StageCaps};
use crate::image::{BufferRef, ImageBuffer};
use crate::imgutil::SliceRegion;

/// Geometry and format for (re)configuring a chain or a single stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StageConfig {
    /// Coded frame width.
    pub width: u32,
    /// Coded frame height.
    pub height: u32,
    /// Requested display width.
    pub out_width: u32,
    /// Requested display height.
    pub out_height: u32,
    /// Presentation flags forwarded toward the sink.
    pub flags: ConfigFlags,
    /// Pixel format entering this stage.
    pub format: PixelFormat,
}

/// Out-of-band requests that travel down the chain to the sink.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlRequest {
    /// Composite on-screen-display content onto the pending frame.
    DrawOsd,
    /// Present the most recently shown frame.
    FlipPage,
}

/// One processing step in the chain.
///
/// Overriding [`Stage::accept`] makes a stage an interceptor; such stages
/// must also override [`Stage::intercepts`] to return `true`, which opts
/// them out of the buffer-acquisition passthrough short-circuit.
pub trait Stage {
    /// Called once after construction, before any frame flows.
    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called during chain teardown, sink-first.
    fn close(&mut self) {}

    /// Capability flags this stage contributes to format-query replies.
    fn caps(&self) -> StageCaps {
        StageCaps::ACCEPT_STRIDE
    }

    /// Capabilities this stage requires of its downstream neighbor.
    ///
    /// A missing `ACCEPT_STRIDE` here makes configuration splice a stride
    /// adapter in front of the neighbor.
    fn reqs(&self) -> StageCaps {
        StageCaps::empty()
    }

    /// Whether this stage overrides [`Stage::accept`].
    fn intercepts(&self) -> bool {
        false
    }

    /// Whether this stage implements [`Stage::draw_slice`] itself.
    fn handles_slices(&self) -> bool {
        false
    }

    /// Can the remaining chain carry `format`?
    ///
    /// The default rejects opaque handles, forwards the query, and ORs this
    /// stage's capabilities into any supportive reply.
    fn query_format(&self, down: &mut ChainView<'_>, format: PixelFormat) -> FormatReply {
        if format == PixelFormat::Opaque {
            return FormatReply::unsupported();
        }
        let mut reply = down.query_format(format);
        if reply.support.is_supported() {
            reply.caps |= self.caps();
        }
        reply
    }

    /// Apply a geometry/format change and propagate it downstream.
    fn configure(&mut self, down: &mut ChainView<'_>, cfg: StageConfig) -> Result<()> {
        down.configure(cfg)
    }

    /// Process one frame.
    ///
    /// Returns `Ok(true)` if a frame reached the sink, `Ok(false)` if the
    /// stage held it back (queued, dropped, or consumed).
    fn accept(
        &mut self,
        down: &mut ChainView<'_>,
        frame: &BufferRef,
        pts: Option<f64>,
    ) -> Result<bool> {
        down.accept(frame, pts)
    }

    /// Offer sink memory for a buffer being acquired from this stage's pool.
    ///
    /// Return `true` after attaching direct storage to skip the pool's own
    /// allocation.
    fn provide_direct(&mut self, _img: &mut ImageBuffer) -> bool {
        false
    }

    /// Handle an out-of-band request; the default forwards it.
    fn control(&mut self, down: &mut ChainView<'_>, req: ControlRequest) -> Result<()> {
        down.control(req)
    }

    /// Receive a partially drawn region; the default forwards it.
    fn draw_slice(&mut self, down: &mut ChainView<'_>, region: &SliceRegion<'_>) -> Result<()> {
        down.draw_slice(region)
    }

    /// Whether this stage is holding a frame it has not yet emitted.
    fn has_queued_frame(&self) -> bool {
        false
    }

    /// Emit a held frame, if any; returns whether one was emitted.
    ///
    /// Implementations must clear their pending state when called, even on
    /// failure, or the flush loop would never terminate.
    fn emit_queued(&mut self, _down: &mut ChainView<'_>) -> Result<bool> {
        Ok(false)
    }
}

/// Drop one reference on a frame, logging (not failing) on underflow.
pub(crate) fn release_frame(frame: &BufferRef, context: &str) {
    if let Err(err) = frame.borrow_mut().release_ref(context) {
        tracing::warn!(%err, "ignoring unbalanced buffer release");
    }
}
