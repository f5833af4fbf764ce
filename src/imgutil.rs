//! Stride-aware pixel helpers: clearing, copying, alignment.
//!
//! These work row-by-row against each plane's own stride, so source and
//! destination may have different alloc widths. Chroma planes use the
//! format's subsampling shifts for their coordinates.

use crate::format::PixelFormat;
use crate::image::ImageBuffer;

/// Round a width up to a 32-pixel boundary.
pub const fn align_stride(width: u32) -> u32 {
    (width + 31) & !31
}

/// Copy `h` rows of `row_bytes` each between differently-strided planes.
pub fn copy_plane(
    dst: &mut [u8],
    dst_stride: usize,
    src: &[u8],
    src_stride: usize,
    row_bytes: usize,
    h: usize,
) {
    for y in 0..h {
        let d = y * dst_stride;
        let s = y * src_stride;
        dst[d..d + row_bytes].copy_from_slice(&src[s..s + row_bytes]);
    }
}

/// Fill `h` rows of `row_bytes` each with a single byte value.
fn fill_plane(dst: &mut [u8], stride: usize, row_bytes: usize, h: usize, value: u8) {
    for y in 0..h {
        let d = y * stride;
        dst[d..d + row_bytes].fill(value);
    }
}

/// Fill `h` rows with a repeating multi-byte pattern (packed YUV black).
fn fill_plane_pattern(dst: &mut [u8], stride: usize, row_bytes: usize, h: usize, pattern: &[u8]) {
    for y in 0..h {
        let row = &mut dst[y * stride..y * stride + row_bytes];
        for (i, b) in row.iter_mut().enumerate() {
            *b = pattern[i % pattern.len()];
        }
    }
}

/// Clear a rectangle of `buf` to black.
///
/// Planar YUV writes 0 to luma and 128 to chroma; the rectangle is snapped
/// to even luma rows so the chroma region stays aligned. Packed YUV uses the
/// 4-byte black pattern matching the component order; packed RGB clears to
/// zero bytes.
pub fn clear_image(buf: &mut ImageBuffer, x0: u32, y0: u32, w: u32, h: u32) {
    let format = buf.format;
    let offsets = buf.offsets;
    let strides = buf.strides;
    let planes = buf.planes;
    let rows = buf.alloc_height.max(buf.height) as usize;
    if planes == 0 {
        return;
    }

    let _ = buf.with_data_mut(|data| {
        if format.is_planar() {
            let y0 = (y0 & !1) as usize;
            // Even snap, then clamp to the allocated rows so an odd-height
            // frame does not spill past its last plane.
            let h = ((h + (h & 1)) as usize).min(rows.saturating_sub(y0));
            let x0 = x0 as usize;
            let w = w as usize;
            let cxs = format.chroma_x_shift() as usize;
            let cys = format.chroma_y_shift() as usize;

            let luma = &mut data[offsets[0] + strides[0] * y0..];
            fill_plane(&mut luma[x0..], strides[0], w, h, 0);

            let cy0 = y0 >> cys;
            let chroma_rows = (rows + (1 << cys) - 1) >> cys;
            let ch = ((h + (1 << cys) - 1) >> cys).min(chroma_rows.saturating_sub(cy0));
            let cx0 = x0 >> cxs;
            let cw = w >> cxs;
            match format {
                PixelFormat::Nv12 => {
                    // Interleaved UV: full-width span at half height.
                    let uv = &mut data[offsets[1] + strides[1] * cy0..];
                    fill_plane(&mut uv[x0 & !1..], strides[1], w, ch, 128);
                }
                _ => {
                    for p in 1..planes.min(3) {
                        let chroma = &mut data[offsets[p] + strides[p] * cy0..];
                        fill_plane(&mut chroma[cx0..], strides[p], cw, ch, 128);
                    }
                }
            }
        } else if format.is_yuv() {
            let pattern: [u8; 4] = if format.is_swapped() {
                [0x80, 0x00, 0x80, 0x00]
            } else {
                [0x00, 0x80, 0x00, 0x80]
            };
            let bpp = (format.bits_per_pixel() / 8) as usize;
            let start = offsets[0] + strides[0] * y0 as usize + x0 as usize * bpp;
            fill_plane_pattern(
                &mut data[start..],
                strides[0],
                w as usize * bpp,
                h as usize,
                &pattern,
            );
        } else {
            let bpp = (format.bits_per_pixel() / 8) as usize;
            let start = offsets[0] + strides[0] * y0 as usize + x0 as usize * bpp;
            fill_plane(&mut data[start..], strides[0], w as usize * bpp, h as usize, 0);
        }
    });
}

/// Copy the top-left `w` x `h` region of `src` into `dst` at `(x, y)`.
///
/// Both buffers must share a format; the copy is stride-aware per plane and
/// applies the chroma shifts to the destination offset and the region size.
pub fn copy_region(dst: &mut ImageBuffer, src: &ImageBuffer, w: u32, h: u32, x: u32, y: u32) {
    let format = dst.format;
    if format != src.format || dst.planes == 0 {
        return;
    }
    let d_offsets = dst.offsets;
    let d_strides = dst.strides;
    let s_offsets = src.offsets;
    let s_strides = src.strides;
    let planes = dst.planes.min(src.planes);
    let bpp = (format.bits_per_pixel() / 8).max(1) as usize;

    let _ = src.with_data(|src_data| {
        dst.with_data_mut(|dst_data| {
            for p in 0..planes {
                let (px, py, _pw, ph, row_bytes) = plane_rect(format, p, x, y, w, h, bpp);
                let d_start = d_offsets[p] + d_strides[p] * py + px;
                copy_plane(
                    &mut dst_data[d_start..],
                    d_strides[p],
                    &src_data[s_offsets[p]..],
                    s_strides[p],
                    row_bytes,
                    ph,
                );
            }
        })
    });
}

/// A partially drawn region handed to slice callbacks.
///
/// Plane slices are borrowed from the producer; coordinates locate the
/// region inside the full frame.
pub struct SliceRegion<'a> {
    /// One byte slice per source plane.
    pub planes: &'a [&'a [u8]],
    /// Stride of each source plane.
    pub strides: &'a [usize],
    /// Region width in pixels.
    pub w: u32,
    /// Region height in pixels.
    pub h: u32,
    /// Horizontal position of the region in the frame.
    pub x: u32,
    /// Vertical position of the region in the frame.
    pub y: u32,
}

/// Copy a slice region into `dst` at the region's own coordinates.
pub fn copy_slice_region(dst: &mut ImageBuffer, region: &SliceRegion<'_>) {
    let format = dst.format;
    if dst.planes == 0 {
        return;
    }
    let d_offsets = dst.offsets;
    let d_strides = dst.strides;
    let planes = dst.planes.min(region.planes.len());
    let bpp = (format.bits_per_pixel() / 8).max(1) as usize;

    let _ = dst.with_data_mut(|dst_data| {
        for p in 0..planes {
            let (px, py, _pw, ph, row_bytes) =
                plane_rect(format, p, region.x, region.y, region.w, region.h, bpp);
            let d_start = d_offsets[p] + d_strides[p] * py + px;
            copy_plane(
                &mut dst_data[d_start..],
                d_strides[p],
                region.planes[p],
                region.strides[p],
                row_bytes,
                ph,
            );
        }
    });
}

/// Per-plane coordinates and span for a luma-space rectangle.
fn plane_rect(
    format: PixelFormat,
    plane: usize,
    x: u32,
    y: u32,
    w: u32,
    h: u32,
    bpp: usize,
) -> (usize, usize, usize, usize, usize) {
    if format.is_planar() && plane > 0 {
        let cxs = format.chroma_x_shift();
        let cys = format.chroma_y_shift();
        // NV12's UV plane keeps full-width byte spans.
        let (px, row_bytes) = if format == PixelFormat::Nv12 {
            ((x & !1) as usize, w as usize)
        } else {
            ((x >> cxs) as usize, (w >> cxs) as usize)
        };
        (px, (y >> cys) as usize, row_bytes, (h >> cys) as usize, row_bytes)
    } else if plane > 0 {
        // Palette plane: copy it whole.
        (0, 0, crate::image::PALETTE_SIZE, 1, crate::image::PALETTE_SIZE)
    } else {
        let px = x as usize * bpp;
        let row_bytes = w as usize * bpp;
        (px, y as usize, row_bytes, h as usize, row_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{AllocationTag, PixelStorage};

    fn make_buffer(format: PixelFormat, w: u32, h: u32) -> ImageBuffer {
        let (size, offsets, strides, planes) = ImageBuffer::plan_layout(format, w, h).unwrap();
        let mut buf = ImageBuffer::new(format, AllocationTag::Temp);
        buf.width = w;
        buf.height = h;
        buf.alloc_width = w;
        buf.alloc_height = h;
        buf.offsets = offsets;
        buf.strides = strides;
        buf.planes = planes;
        buf.storage = PixelStorage::Owned(vec![0xAA; size].into_boxed_slice());
        buf
    }

    #[test]
    fn test_align_stride() {
        assert_eq!(align_stride(1), 32);
        assert_eq!(align_stride(32), 32);
        assert_eq!(align_stride(33), 64);
        assert_eq!(align_stride(720), 736);
    }

    #[test]
    fn test_clear_planar_neutral_values() {
        let mut buf = make_buffer(PixelFormat::I420, 16, 16);
        clear_image(&mut buf, 0, 0, 16, 16);
        buf.with_data(|d| {
            assert_eq!(d[0], 0);
            assert_eq!(d[16 * 16], 128);
            assert_eq!(d[16 * 16 + 8 * 8], 128);
        })
        .unwrap();
    }

    #[test]
    fn test_clear_planar_snaps_odd_rows() {
        let mut buf = make_buffer(PixelFormat::I420, 16, 16);
        // Odd start row and odd height must still clear whole chroma rows.
        clear_image(&mut buf, 0, 1, 16, 3);
        buf.with_data(|d| {
            // Snapped down to row 0, extended to 4 rows.
            assert_eq!(d[0], 0);
            assert_eq!(d[16 * 3], 0);
            assert_eq!(d[16 * 16 + 8], 128);
        })
        .unwrap();
    }

    #[test]
    fn test_clear_odd_height_stays_in_bounds() {
        let mut buf = make_buffer(PixelFormat::I420, 16, 9);
        clear_image(&mut buf, 0, 0, 16, 9);
        buf.with_data(|d| {
            // Last luma row cleared, both chroma planes filled to the end.
            assert_eq!(d[16 * 9 - 1], 0);
            assert_eq!(d[16 * 9], 128);
            assert_eq!(*d.last().unwrap(), 128);
        })
        .unwrap();
    }

    #[test]
    fn test_clear_packed_yuv_patterns() {
        let mut buf = make_buffer(PixelFormat::Yuyv, 8, 2);
        clear_image(&mut buf, 0, 0, 8, 2);
        buf.with_data(|d| {
            assert_eq!(&d[0..4], &[0x00, 0x80, 0x00, 0x80]);
        })
        .unwrap();

        let mut buf = make_buffer(PixelFormat::Uyvy, 8, 2);
        clear_image(&mut buf, 0, 0, 8, 2);
        buf.with_data(|d| {
            assert_eq!(&d[0..4], &[0x80, 0x00, 0x80, 0x00]);
        })
        .unwrap();
    }

    #[test]
    fn test_clear_packed_rgb_zeroes() {
        let mut buf = make_buffer(PixelFormat::Rgb24, 4, 2);
        clear_image(&mut buf, 0, 0, 4, 2);
        buf.with_data(|d| assert!(d.iter().all(|&b| b == 0))).unwrap();
    }

    #[test]
    fn test_copy_region_respects_strides() {
        let mut src = make_buffer(PixelFormat::Gray8, 8, 4);
        src.with_data_mut(|d| {
            for (i, b) in d.iter_mut().enumerate() {
                *b = i as u8;
            }
        })
        .unwrap();
        // Destination with a wider alloc (stride 16 vs 8).
        let mut dst = make_buffer(PixelFormat::Gray8, 16, 4);
        dst.width = 8;
        copy_region(&mut dst, &src, 8, 4, 0, 0);
        dst.with_data(|d| {
            assert_eq!(d[0], 0);
            assert_eq!(d[16], 8); // second source row lands on the next stride
            assert_eq!(d[16 + 7], 15);
        })
        .unwrap();
    }

    #[test]
    fn test_copy_region_with_destination_offset() {
        let mut src = make_buffer(PixelFormat::Gray8, 4, 4);
        src.with_data_mut(|d| d.fill(0x7F)).unwrap();
        let mut dst = make_buffer(PixelFormat::Gray8, 8, 8);
        dst.with_data_mut(|d| d.fill(0)).unwrap();
        copy_region(&mut dst, &src, 4, 4, 2, 2);
        dst.with_data(|d| {
            assert_eq!(d[2 * 8 + 2], 0x7F);
            assert_eq!(d[5 * 8 + 5], 0x7F);
            assert_eq!(d[1 * 8 + 2], 0);
            assert_eq!(d[2 * 8 + 6], 0);
        })
        .unwrap();
    }

    #[test]
    fn test_copy_slice_region_offsets() {
        let mut dst = make_buffer(PixelFormat::Gray8, 8, 8);
        dst.with_data_mut(|d| d.fill(0)).unwrap();
        let rows = vec![0xFFu8; 4 * 2];
        let planes: Vec<&[u8]> = vec![&rows];
        let strides = [4usize];
        let region = SliceRegion {
            planes: &planes,
            strides: &strides,
            w: 4,
            h: 2,
            x: 2,
            y: 3,
        };
        copy_slice_region(&mut dst, &region);
        dst.with_data(|d| {
            assert_eq!(d[3 * 8 + 2], 0xFF);
            assert_eq!(d[4 * 8 + 5], 0xFF);
            assert_eq!(d[3 * 8 + 1], 0);
            assert_eq!(d[2 * 8 + 2], 0);
        })
        .unwrap();
    }
}
