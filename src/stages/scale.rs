//! Pixel format conversion stage.
//!
//! Spliced in automatically when negotiation finds no common format, or
//! placed explicitly with `scale format=...` to force an output format.
//! The stage picks the first output format its neighbor accepts (preferring
//! the input format itself, then a forced one) and rewrites each frame into
//! it. Only the negotiation and buffer behavior live here; pixel math
//! beyond a planar luma carry-over is delegated to whatever consumes the
//! frames.

use std::str::FromStr;

use crate::chain::ChainView;
use crate::error::{Error, Result};
use crate::format::{FormatReply, FormatSupport, PixelFormat, StageCaps};
use crate::image::{AllocationTag, BufferFlags, BufferRef};
use crate::imgutil;
use crate::spec::StageArgs;
use crate::stage::{release_frame, Stage, StageConfig};

/// Output formats the conversion can produce, in preference order.
const OUTPUT_FORMATS: [PixelFormat; 13] = [
    PixelFormat::I420,
    PixelFormat::Yv12,
    PixelFormat::Nv12,
    PixelFormat::I422,
    PixelFormat::I444,
    PixelFormat::Yuyv,
    PixelFormat::Uyvy,
    PixelFormat::Rgb24,
    PixelFormat::Bgr24,
    PixelFormat::Rgba,
    PixelFormat::Bgra,
    PixelFormat::Gray8,
    PixelFormat::Rgb8Pal,
];

/// Converts frames between pixel formats.
pub struct ScaleStage {
    forced: Option<PixelFormat>,
    in_format: PixelFormat,
    out_format: PixelFormat,
    width: u32,
    height: u32,
}

impl ScaleStage {
    fn new(forced: Option<PixelFormat>) -> Self {
        Self {
            forced,
            in_format: PixelFormat::default(),
            out_format: PixelFormat::default(),
            width: 0,
            height: 0,
        }
    }

    /// Output candidates in preference order for a given input.
    ///
    /// A forced format is the only candidate; otherwise the input format
    /// itself comes first (no conversion), then the full output list.
    fn candidates(&self, input: PixelFormat) -> Vec<PixelFormat> {
        if let Some(forced) = self.forced {
            return vec![forced];
        }
        let mut list = vec![input];
        list.extend(OUTPUT_FORMATS.iter().filter(|&&f| f != input));
        list
    }

    /// First output format the neighbor accepts, natively if possible.
    fn find_output(
        &self,
        down: &mut ChainView<'_>,
        input: PixelFormat,
    ) -> Option<(PixelFormat, FormatReply)> {
        let candidates = self.candidates(input);
        let mut fallback = None;
        for &format in &candidates {
            let reply = down.query_format(format);
            match reply.support {
                FormatSupport::Direct => return Some((format, reply)),
                FormatSupport::WithConversion if fallback.is_none() => {
                    fallback = Some((format, reply));
                }
                _ => {}
            }
        }
        fallback
    }
}

impl Stage for ScaleStage {
    fn caps(&self) -> StageCaps {
        StageCaps::ACCEPT_STRIDE
    }

    fn intercepts(&self) -> bool {
        true
    }

    fn query_format(&self, down: &mut ChainView<'_>, format: PixelFormat) -> FormatReply {
        if format.bits_per_pixel() == 0 {
            return FormatReply::unsupported();
        }
        let Some((best, mut reply)) = self.find_output(down, format) else {
            return FormatReply::unsupported();
        };
        // A conversion step downgrades native support.
        if best != format && reply.support == FormatSupport::Direct {
            reply.support = FormatSupport::WithConversion;
        }
        reply.caps |= self.caps();
        reply
    }

    fn configure(&mut self, down: &mut ChainView<'_>, cfg: StageConfig) -> Result<()> {
        let Some((out_format, _)) = self.find_output(down, cfg.format) else {
            return Err(Error::NoColorspace { format: cfg.format });
        };
        self.in_format = cfg.format;
        self.out_format = out_format;
        self.width = cfg.width;
        self.height = cfg.height;
        if out_format != cfg.format {
            tracing::info!(from = %cfg.format, to = %out_format, "scale: converting colorspace");
        }
        down.configure(StageConfig {
            format: out_format,
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
            self.out_format,
            AllocationTag::Temp,
            BufferFlags::empty(),
            Some(self.width),
            Some(self.height),
        )?;
        {
            let src = frame.borrow();
            let mut dst = out.borrow_mut();
            if self.in_format == self.out_format {
                imgutil::copy_region(&mut dst, &src, self.width, self.height, 0, 0);
            } else {
                // Neutral background, then carry the luma over where both
                // layouts keep it as plane 0 with identical geometry.
                imgutil::clear_image(&mut dst, 0, 0, self.width, self.height);
                if self.in_format.is_planar() && self.out_format.is_planar() {
                    let d_stride = dst.strides[0];
                    let d_off = dst.offsets[0];
                    let s_stride = src.strides[0];
                    let s_off = src.offsets[0];
                    let w = self.width as usize;
                    let h = self.height as usize;
                    let _ = src.with_data(|s| {
                        dst.with_data_mut(|d| {
                            imgutil::copy_plane(
                                &mut d[d_off..],
                                d_stride,
                                &s[s_off..],
                                s_stride,
                                w,
                                h,
                            );
                        })
                    });
                }
            }
            dst.pts = pts;
        }
        release_frame(frame, "scale");
        down.accept(&out, pts)
    }
}

pub(crate) fn construct(args: &StageArgs) -> Result<Box<dyn Stage>> {
    let forced = match args.get_str("format") {
        Some(name) => Some(PixelFormat::from_str(name).map_err(|()| Error::StageOpenFailed {
            name: "scale".to_string(),
            reason: format!("unknown pixel format {name}"),
        })?),
        None => None,
    };
    Ok(Box::new(ScaleStage::new(forced)))
}
