//! Stride adapter, optionally with border expansion.
//!
//! Accepts buffers with any stride from upstream and copies each frame
//! into a tightly packed buffer from the downstream pool; this is the
//! stage configuration splices in when an upstream stage needs stride
//! acceptance its neighbor lacks. Given `w=`/`h=` arguments it also grows
//! the frame to at least that size, centering the image on a black
//! background.

use crate::chain::ChainView;
use crate::error::Result;
use crate::format::StageCaps;
use crate::image::{AllocationTag, BufferFlags, BufferRef};
use crate::imgutil;
use crate::spec::StageArgs;
use crate::stage::{release_frame, Stage, StageConfig};

/// Copies frames into tightly packed, possibly enlarged buffers.
pub struct ExpandStage {
    expand_w: Option<u32>,
    expand_h: Option<u32>,
    // Resolved at configuration time.
    in_w: u32,
    in_h: u32,
    out_w: u32,
    out_h: u32,
    off_x: u32,
    off_y: u32,
}

impl ExpandStage {
    fn new(expand_w: Option<u32>, expand_h: Option<u32>) -> Self {
        Self {
            expand_w,
            expand_h,
            in_w: 0,
            in_h: 0,
            out_w: 0,
            out_h: 0,
            off_x: 0,
            off_y: 0,
        }
    }

    fn has_borders(&self) -> bool {
        self.out_w != self.in_w || self.out_h != self.in_h
    }
}

impl Stage for ExpandStage {
    fn caps(&self) -> StageCaps {
        StageCaps::ACCEPT_STRIDE
    }

    fn intercepts(&self) -> bool {
        true
    }

    fn configure(&mut self, down: &mut ChainView<'_>, cfg: StageConfig) -> Result<()> {
        self.in_w = cfg.width;
        self.in_h = cfg.height;
        // Chroma subsampling needs even placement.
        self.out_w = self.expand_w.unwrap_or(0).max(cfg.width);
        self.out_h = self.expand_h.unwrap_or(0).max(cfg.height);
        self.off_x = ((self.out_w - self.in_w) / 2) & !1;
        self.off_y = ((self.out_h - self.in_h) / 2) & !1;
        tracing::debug!(
            from = format_args!("{}x{}", self.in_w, self.in_h),
            to = format_args!("{}x{}", self.out_w, self.out_h),
            "expand configured"
        );
        down.configure(StageConfig {
            width: self.out_w,
            height: self.out_h,
            out_width: cfg.out_width.max(self.out_w),
            out_height: cfg.out_height.max(self.out_h),
            ..cfg
        })
    }

    fn accept(
        &mut self,
        down: &mut ChainView<'_>,
        frame: &BufferRef,
        pts: Option<f64>,
    ) -> Result<bool> {
        let out = down.acquire(
            frame.borrow().format,
            AllocationTag::Temp,
            BufferFlags::empty(),
            Some(self.out_w),
            Some(self.out_h),
        )?;
        {
            let src = frame.borrow();
            let mut dst = out.borrow_mut();
            if self.has_borders() {
                imgutil::clear_image(&mut dst, 0, 0, self.out_w, self.out_h);
            }
            imgutil::copy_region(&mut dst, &src, self.in_w, self.in_h, self.off_x, self.off_y);
            dst.pts = pts;
        }
        release_frame(frame, "expand");
        down.accept(&out, pts)
    }
}

pub(crate) fn construct(args: &StageArgs) -> Result<Box<dyn Stage>> {
    Ok(Box::new(ExpandStage::new(
        args.get_u32("w"),
        args.get_u32("h"),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_border_offsets_are_even() {
        let mut stage = ExpandStage::new(Some(21), Some(11));
        stage.in_w = 16;
        stage.in_h = 8;
        stage.out_w = 21;
        stage.out_h = 11;
        stage.off_x = ((stage.out_w - stage.in_w) / 2) & !1;
        stage.off_y = ((stage.out_h - stage.in_h) / 2) & !1;
        assert_eq!(stage.off_x % 2, 0);
        assert_eq!(stage.off_y % 2, 0);
        assert!(stage.has_borders());
    }
}
