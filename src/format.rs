//! Pixel formats and stage capability flags.
//!
//! A [`PixelFormat`] describes the memory layout of one video frame. Stages
//! answer format queries with a [`FormatReply`]: a support level plus the
//! OR-combination of every downstream stage's capability flags, so upstream
//! code can see in one word what the rest of the chain offers.

use bitflags::bitflags;

/// Pixel formats (color model and memory layout).
///
/// `Opaque` stands in for hardware or bitstream handles that the pipeline
/// cannot allocate or touch; the default format query rejects it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum PixelFormat {
    /// YUV 4:2:0 planar, Y then U then V.
    #[default]
    I420 = 0,
    /// YUV 4:2:0 planar, Y then V then U.
    Yv12,
    /// YUV 4:2:0 semi-planar, Y then interleaved UV.
    Nv12,
    /// YUV 4:2:2 planar.
    I422,
    /// YUV 4:4:4 planar.
    I444,
    /// YUV 4:2:2 packed (Y0 U Y1 V).
    Yuyv,
    /// YUV 4:2:2 packed (U Y0 V Y1).
    Uyvy,
    /// RGB 8-bit per channel, packed.
    Rgb24,
    /// BGR 8-bit per channel, packed.
    Bgr24,
    /// RGBA 8-bit per channel, packed.
    Rgba,
    /// BGRA 8-bit per channel, packed.
    Bgra,
    /// 8-bit palettized RGB; plane 1 holds the 256-entry palette.
    Rgb8Pal,
    /// 8-bit grayscale.
    Gray8,
    /// Opaque hardware/bitstream handle; cannot be allocated here.
    Opaque,
}

impl PixelFormat {
    /// Whether the format stores each component in its own plane.
    pub const fn is_planar(self) -> bool {
        matches!(
            self,
            Self::I420 | Self::Yv12 | Self::Nv12 | Self::I422 | Self::I444
        )
    }

    /// Whether the format is a YUV color model (planar or packed).
    pub const fn is_yuv(self) -> bool {
        matches!(
            self,
            Self::I420
                | Self::Yv12
                | Self::Nv12
                | Self::I422
                | Self::I444
                | Self::Yuyv
                | Self::Uyvy
        )
    }

    /// Whether a packed layout stores its channels byte-swapped relative to
    /// the canonical ordering (UYVY vs YUYV, BGR vs RGB).
    pub const fn is_swapped(self) -> bool {
        matches!(self, Self::Uyvy | Self::Bgr24 | Self::Bgra)
    }

    /// Whether the format carries a palette plane.
    pub const fn has_palette(self) -> bool {
        matches!(self, Self::Rgb8Pal)
    }

    /// Horizontal chroma subsampling shift (log2).
    pub const fn chroma_x_shift(self) -> u32 {
        match self {
            Self::I420 | Self::Yv12 | Self::Nv12 | Self::I422 => 1,
            _ => 0,
        }
    }

    /// Vertical chroma subsampling shift (log2).
    pub const fn chroma_y_shift(self) -> u32 {
        match self {
            Self::I420 | Self::Yv12 | Self::Nv12 => 1,
            _ => 0,
        }
    }

    /// Average bits per pixel, or 0 if the format cannot be allocated.
    pub const fn bits_per_pixel(self) -> u32 {
        match self {
            Self::I420 | Self::Yv12 | Self::Nv12 => 12,
            Self::I422 | Self::Yuyv | Self::Uyvy => 16,
            Self::I444 | Self::Rgb24 | Self::Bgr24 => 24,
            Self::Rgba | Self::Bgra => 32,
            Self::Rgb8Pal | Self::Gray8 => 8,
            Self::Opaque => 0,
        }
    }

    /// Number of planes the format uses.
    pub const fn plane_count(self) -> usize {
        match self {
            Self::I420 | Self::Yv12 | Self::I422 | Self::I444 => 3,
            Self::Nv12 | Self::Rgb8Pal => 2,
            Self::Opaque => 0,
            _ => 1,
        }
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::I420 => "i420",
            Self::Yv12 => "yv12",
            Self::Nv12 => "nv12",
            Self::I422 => "i422",
            Self::I444 => "i444",
            Self::Yuyv => "yuyv",
            Self::Uyvy => "uyvy",
            Self::Rgb24 => "rgb24",
            Self::Bgr24 => "bgr24",
            Self::Rgba => "rgba",
            Self::Bgra => "bgra",
            Self::Rgb8Pal => "rgb8pal",
            Self::Gray8 => "gray8",
            Self::Opaque => "opaque",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for PixelFormat {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        Ok(match s {
            "i420" => Self::I420,
            "yv12" => Self::Yv12,
            "nv12" => Self::Nv12,
            "i422" => Self::I422,
            "i444" => Self::I444,
            "yuyv" => Self::Yuyv,
            "uyvy" => Self::Uyvy,
            "rgb24" => Self::Rgb24,
            "bgr24" => Self::Bgr24,
            "rgba" => Self::Rgba,
            "bgra" => Self::Bgra,
            "rgb8pal" => Self::Rgb8Pal,
            "gray8" => Self::Gray8,
            "opaque" => Self::Opaque,
            _ => return Err(()),
        })
    }
}

/// How well a stage (and everything downstream of it) supports a format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Default)]
#[repr(u8)]
pub enum FormatSupport {
    /// The format cannot flow through the remaining chain at all.
    #[default]
    Unsupported = 0,
    /// Accepted, but a conversion will happen somewhere downstream.
    WithConversion = 1,
    /// Accepted natively, no conversion needed.
    Direct = 2,
}

impl FormatSupport {
    /// Whether the format is accepted at all.
    pub const fn is_supported(self) -> bool {
        !matches!(self, Self::Unsupported)
    }
}

bitflags! {
    /// Capability flags a stage declares and propagates upstream.
    ///
    /// Replies to format queries OR together the flags of every stage the
    /// query passed through, so the word seen by the decoder describes the
    /// whole remaining chain.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct StageCaps: u32 {
        /// The stage accepts buffers with strides wider than the image.
        const ACCEPT_STRIDE = 1 << 0;
        /// The stage cannot tolerate a mid-stream change of
        /// width/height/format; reconfiguration is rejected.
        const CONSTANT = 1 << 1;
        /// The stage composites on-screen-display content itself.
        const OSD = 1 << 2;
        /// The stage can output vertically flipped frames.
        const FLIP = 1 << 3;
    }
}

bitflags! {
    /// Flags passed alongside a chain configuration request.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct ConfigFlags: u32 {
        /// Output should be vertically flipped.
        const FLIP = 1 << 0;
        /// Sink should switch to fullscreen.
        const FULLSCREEN = 1 << 1;
    }
}

/// The combined answer to a format query.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct FormatReply {
    /// Support level for the queried format.
    pub support: FormatSupport,
    /// OR of the capability flags of every stage that handled the query.
    pub caps: StageCaps,
}

impl FormatReply {
    /// A reply rejecting the format outright.
    pub const fn unsupported() -> Self {
        Self {
            support: FormatSupport::Unsupported,
            caps: StageCaps::empty(),
        }
    }

    /// A native-support reply with the given capability flags.
    pub const fn direct(caps: StageCaps) -> Self {
        Self {
            support: FormatSupport::Direct,
            caps,
        }
    }

    /// A supported-via-conversion reply with the given capability flags.
    pub const fn with_conversion(caps: StageCaps) -> Self {
        Self {
            support: FormatSupport::WithConversion,
            caps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chroma_shifts() {
        assert_eq!(PixelFormat::I420.chroma_x_shift(), 1);
        assert_eq!(PixelFormat::I420.chroma_y_shift(), 1);
        assert_eq!(PixelFormat::I422.chroma_x_shift(), 1);
        assert_eq!(PixelFormat::I422.chroma_y_shift(), 0);
        assert_eq!(PixelFormat::I444.chroma_x_shift(), 0);
        assert_eq!(PixelFormat::Rgb24.chroma_x_shift(), 0);
    }

    #[test]
    fn test_plane_counts() {
        assert_eq!(PixelFormat::I420.plane_count(), 3);
        assert_eq!(PixelFormat::Nv12.plane_count(), 2);
        assert_eq!(PixelFormat::Yuyv.plane_count(), 1);
        assert_eq!(PixelFormat::Rgb8Pal.plane_count(), 2);
        assert_eq!(PixelFormat::Opaque.plane_count(), 0);
    }

    #[test]
    fn test_opaque_cannot_be_allocated() {
        assert_eq!(PixelFormat::Opaque.bits_per_pixel(), 0);
    }

    #[test]
    fn test_support_ordering() {
        assert!(FormatSupport::Direct > FormatSupport::WithConversion);
        assert!(FormatSupport::WithConversion > FormatSupport::Unsupported);
        assert!(!FormatSupport::Unsupported.is_supported());
    }

    #[test]
    fn test_swapped_layouts() {
        assert!(PixelFormat::Uyvy.is_swapped());
        assert!(PixelFormat::Bgra.is_swapped());
        assert!(!PixelFormat::Yuyv.is_swapped());
        assert!(!PixelFormat::Rgba.is_swapped());
    }
}
