//! Terminal stage wrapping the display sink.
//!
//! Always the last element of a chain. Translates stage hooks into
//! [`DisplaySink`] calls: format queries, configuration, direct-rendering
//! offers, frame presentation, and out-of-band requests all end here.

use crate::chain::ChainView;
use crate::error::Result;
use crate::format::{FormatReply, PixelFormat, StageCaps};
use crate::image::{BufferFlags, BufferRef, ImageBuffer};
use crate::sink::DisplaySink;
use crate::stage::{release_frame, ControlRequest, Stage, StageConfig};

pub(crate) struct SinkStage {
    sink: Box<dyn DisplaySink>,
}

impl SinkStage {
    pub(crate) fn new(sink: Box<dyn DisplaySink>) -> Self {
        Self { sink }
    }
}

impl Stage for SinkStage {
    fn caps(&self) -> StageCaps {
        if self.sink.accepts_stride() {
            StageCaps::ACCEPT_STRIDE
        } else {
            StageCaps::empty()
        }
    }

    fn intercepts(&self) -> bool {
        true
    }

    fn query_format(&self, _down: &mut ChainView<'_>, format: PixelFormat) -> FormatReply {
        let support = self.sink.query_format(format);
        if support.is_supported() {
            FormatReply {
                support,
                caps: self.caps(),
            }
        } else {
            FormatReply::unsupported()
        }
    }

    fn configure(&mut self, _down: &mut ChainView<'_>, cfg: StageConfig) -> Result<()> {
        self.sink.configure(&cfg)
    }

    fn accept(
        &mut self,
        _down: &mut ChainView<'_>,
        frame: &BufferRef,
        pts: Option<f64>,
    ) -> Result<bool> {
        frame.borrow_mut().pts = pts;
        self.sink.show_frame(frame, pts)?;
        frame.borrow_mut().flags.insert(BufferFlags::DISPLAYED);
        release_frame(frame, self.sink.name());
        Ok(true)
    }

    fn provide_direct(&mut self, img: &mut ImageBuffer) -> bool {
        match self
            .sink
            .provide_buffer(img.format, img.width, img.height)
        {
            Some(direct) => {
                img.attach_direct(direct);
                true
            }
            None => false,
        }
    }

    fn control(&mut self, _down: &mut ChainView<'_>, req: ControlRequest) -> Result<()> {
        self.sink.control(req)
    }
}
