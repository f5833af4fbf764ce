//! Image buffers and their reuse-tracking metadata.
//!
//! An [`ImageBuffer`] is one video frame: pixel storage, a plane layout
//! (offsets and strides), status flags, and an explicit `usage_count` that
//! the pool consults to decide when a slot may be reused. Buffers travel as
//! [`BufferRef`] handles; the chain is single-threaded, so `Rc<RefCell<..>>`
//! is the right amount of sharing.

use std::cell::RefCell;
use std::rc::Rc;

use bitflags::bitflags;

use crate::error::{Error, Result};
use crate::format::PixelFormat;

/// Shared handle to one image buffer.
pub type BufferRef = Rc<RefCell<ImageBuffer>>;

/// Maximum number of planes any supported format uses.
pub const MAX_PLANES: usize = 4;

/// Size in bytes of the palette plane for palettized formats.
pub const PALETTE_SIZE: usize = 1024;

bitflags! {
    /// Per-buffer status and request flags.
    ///
    /// Some bits are set by the requester (`READABLE`, `PRESERVE`,
    /// `DRAW_CALLBACK`), some by the allocator (`ALLOCATED`, `DIRECT`,
    /// `PALETTE`), and some by consumers (`DISPLAYED`). On reacquisition of
    /// a pooled slot only [`BufferFlags::KEEP_MASK`] survives; the rest is
    /// rebuilt from the new request.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct BufferFlags: u32 {
        /// The pool owns this buffer's pixel storage.
        const ALLOCATED = 1 << 0;
        /// The requester will read the buffer back after writing it.
        const READABLE = 1 << 1;
        /// Contents must survive until the requester releases the buffer.
        const PRESERVE = 1 << 2;
        /// The requester renders incrementally via slice callbacks.
        const DRAW_CALLBACK = 1 << 3;
        /// Storage was provided by the display sink, not the pool.
        const DIRECT = 1 << 4;
        /// The frame content is interlaced.
        const INTERLACED = 1 << 5;
        /// A consumer has shown this buffer at least once.
        const DISPLAYED = 1 << 6;
        /// The buffer carries a palette plane.
        const PALETTE = 1 << 7;
        /// The requester tolerates an allocator-chosen aligned stride.
        const ACCEPT_ALIGNED_STRIDE = 1 << 8;
        /// The requester would prefer an aligned stride but accepts any.
        const PREFER_ALIGNED_STRIDE = 1 << 9;
    }
}

impl BufferFlags {
    /// Bits that survive reacquisition of a pooled slot.
    pub const KEEP_MASK: Self = Self::ALLOCATED
        .union(Self::DISPLAYED)
        .union(Self::PALETTE);

    /// Request bits copied from the caller on each acquisition.
    pub const REQUEST_MASK: Self = Self::READABLE
        .union(Self::PRESERVE)
        .union(Self::DRAW_CALLBACK)
        .union(Self::PALETTE)
        .union(Self::ACCEPT_ALIGNED_STRIDE)
        .union(Self::PREFER_ALIGNED_STRIDE);
}

/// Intended lifetime and reuse pattern of a requested buffer.
///
/// The tag selects which pool slot serves the request; see
/// [`BufferPool::acquire`](crate::pool::BufferPool::acquire).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AllocationTag {
    /// Caller brings its own pixel pointers; the pool allocates nothing.
    Export,
    /// Contents persist across frames; served from a two-slot ping-pong so
    /// the previous frame stays readable while the next is written.
    Static,
    /// Scratch for one frame only.
    Temp,
    /// B-frame reordering pattern; behaves as `Temp` unless readability is
    /// requested, in which case it falls back to the ping-pong slots.
    Ipb,
    /// P-frame reference pattern; same slot policy as `Static`.
    Ip,
    /// One of the fixed numbered slots; `None` asks the pool to pick the
    /// first slot not currently in use.
    Numbered(Option<usize>),
}

/// Where a buffer's pixel bytes live.
#[derive(Default)]
pub enum PixelStorage {
    /// No storage yet (fresh slot, or an `Export` buffer before the caller
    /// attaches planes).
    #[default]
    Empty,
    /// Pool-owned heap allocation.
    Owned(Box<[u8]>),
    /// Sink-owned memory attached for direct rendering.
    Direct(Rc<RefCell<Vec<u8>>>),
}

/// Direct-rendering memory handed out by a display sink.
///
/// Offsets and strides describe the plane layout inside `memory`; the chain
/// writes frames straight into it and never copies them out.
#[derive(Clone, Debug)]
pub struct DirectBuffer {
    /// The sink-owned backing memory.
    pub memory: Rc<RefCell<Vec<u8>>>,
    /// Byte offset of each plane inside `memory`.
    pub offsets: [usize; MAX_PLANES],
    /// Stride of each plane in bytes.
    pub strides: [usize; MAX_PLANES],
    /// Number of planes laid out in `memory`.
    pub planes: usize,
}

impl std::fmt::Debug for PixelStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Owned(data) => write!(f, "Owned({} bytes)", data.len()),
            Self::Direct(mem) => write!(f, "Direct({} bytes)", mem.borrow().len()),
        }
    }
}

/// One video frame with layout metadata and reuse accounting.
pub struct ImageBuffer {
    /// Pixel format of the frame.
    pub format: PixelFormat,
    /// Logical width in pixels.
    pub width: u32,
    /// Logical height in pixels.
    pub height: u32,
    /// Allocated width (may exceed `width` for stride alignment).
    pub alloc_width: u32,
    /// Allocated height.
    pub alloc_height: u32,
    /// Per-plane strides in bytes.
    pub strides: [usize; MAX_PLANES],
    /// Per-plane byte offsets into the storage.
    pub offsets: [usize; MAX_PLANES],
    /// Number of planes in use.
    pub planes: usize,
    /// Backing pixel storage.
    pub storage: PixelStorage,
    /// Status and request flags.
    pub flags: BufferFlags,
    /// Outstanding acquisitions; the pool reuses the slot only at zero.
    pub usage_count: u32,
    /// The reuse pattern this buffer was acquired under.
    pub tag: AllocationTag,
    /// Presentation timestamp in seconds, if known.
    pub pts: Option<f64>,
}

impl std::fmt::Debug for ImageBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageBuffer")
            .field("format", &self.format)
            .field("size", &format_args!("{}x{}", self.width, self.height))
            .field(
                "alloc",
                &format_args!("{}x{}", self.alloc_width, self.alloc_height),
            )
            .field("flags", &self.flags)
            .field("usage_count", &self.usage_count)
            .field("tag", &self.tag)
            .field("storage", &self.storage)
            .finish()
    }
}

impl ImageBuffer {
    /// A fresh, storage-less buffer for a pool slot.
    pub fn new(format: PixelFormat, tag: AllocationTag) -> Self {
        Self {
            format,
            width: 0,
            height: 0,
            alloc_width: 0,
            alloc_height: 0,
            strides: [0; MAX_PLANES],
            offsets: [0; MAX_PLANES],
            planes: 0,
            storage: PixelStorage::Empty,
            flags: BufferFlags::empty(),
            usage_count: 0,
            tag,
            pts: None,
        }
    }

    /// Increment the usage count (a new holder of this buffer).
    pub fn acquire_ref(&mut self) {
        self.usage_count += 1;
    }

    /// Decrement the usage count.
    ///
    /// Underflow clamps to zero and reports [`Error::RefCountUnderflow`];
    /// callers log it and continue.
    pub fn release_ref(&mut self, context: &str) -> Result<u32> {
        if self.usage_count == 0 {
            return Err(Error::RefCountUnderflow {
                context: context.to_string(),
            });
        }
        self.usage_count -= 1;
        Ok(self.usage_count)
    }

    /// Whether the slot holding this buffer may be reused.
    pub fn is_idle(&self) -> bool {
        self.usage_count == 0
    }

    /// Total byte size of the backing storage, or 0 if none.
    pub fn storage_len(&self) -> usize {
        match &self.storage {
            PixelStorage::Empty => 0,
            PixelStorage::Owned(data) => data.len(),
            PixelStorage::Direct(mem) => mem.borrow().len(),
        }
    }

    /// Run `f` over the raw pixel bytes.
    pub fn with_data<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        match &self.storage {
            PixelStorage::Empty => None,
            PixelStorage::Owned(data) => Some(f(data)),
            PixelStorage::Direct(mem) => Some(f(&mem.borrow())),
        }
    }

    /// Run `f` over the raw pixel bytes, mutably.
    pub fn with_data_mut<R>(&mut self, f: impl FnOnce(&mut [u8]) -> R) -> Option<R> {
        match &mut self.storage {
            PixelStorage::Empty => None,
            PixelStorage::Owned(data) => Some(f(data)),
            PixelStorage::Direct(mem) => Some(f(&mut mem.borrow_mut())),
        }
    }

    /// Stable identity of the backing storage, for aliasing checks in tests.
    pub fn storage_id(&self) -> usize {
        match &self.storage {
            PixelStorage::Empty => 0,
            PixelStorage::Owned(data) => data.as_ptr() as usize,
            PixelStorage::Direct(mem) => Rc::as_ptr(mem) as usize,
        }
    }

    /// Attach sink-provided memory and adopt its plane layout.
    pub fn attach_direct(&mut self, direct: DirectBuffer) {
        self.strides = direct.strides;
        self.offsets = direct.offsets;
        self.planes = direct.planes;
        self.storage = PixelStorage::Direct(direct.memory);
        self.flags.remove(BufferFlags::ALLOCATED);
        self.flags.insert(BufferFlags::DIRECT);
    }

    /// Compute the plane layout for an allocation of `alloc_width` x
    /// `height` pixels of `format`.
    ///
    /// Returns `(total_size, offsets, strides, planes)`, or `None` when the
    /// format cannot be allocated at all.
    pub fn plan_layout(
        format: PixelFormat,
        alloc_width: u32,
        height: u32,
    ) -> Option<(usize, [usize; MAX_PLANES], [usize; MAX_PLANES], usize)> {
        if format.bits_per_pixel() == 0 {
            return None;
        }
        let w = alloc_width as usize;
        let h = height as usize;
        let mut offsets = [0usize; MAX_PLANES];
        let mut strides = [0usize; MAX_PLANES];

        if format.is_planar() {
            let cxs = format.chroma_x_shift() as usize;
            let cys = format.chroma_y_shift() as usize;
            let luma_size = w * h;
            // Round chroma up so odd frame sizes still get whole planes.
            let chroma_stride = (w + (1 << cxs) - 1) >> cxs;
            let chroma_h = (h + (1 << cys) - 1) >> cys;
            strides[0] = w;
            offsets[0] = 0;
            let planes = match format {
                PixelFormat::Nv12 => {
                    // Interleaved UV plane: full-width stride, half height.
                    strides[1] = w;
                    offsets[1] = luma_size;
                    2
                }
                _ => {
                    strides[1] = chroma_stride;
                    strides[2] = chroma_stride;
                    offsets[1] = luma_size;
                    offsets[2] = luma_size + chroma_stride * chroma_h;
                    3
                }
            };
            let total = match format {
                PixelFormat::Nv12 => luma_size + w * chroma_h,
                _ => luma_size + 2 * chroma_stride * chroma_h,
            };
            Some((total, offsets, strides, planes))
        } else if format.has_palette() {
            strides[0] = w;
            offsets[0] = 0;
            offsets[1] = w * h;
            strides[1] = PALETTE_SIZE;
            Some((w * h + PALETTE_SIZE, offsets, strides, 2))
        } else {
            let bpp = (format.bits_per_pixel() / 8) as usize;
            strides[0] = w * bpp;
            offsets[0] = 0;
            Some((strides[0] * h, offsets, strides, 1))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_underflow_clamps() {
        let mut buf = ImageBuffer::new(PixelFormat::I420, AllocationTag::Temp);
        buf.acquire_ref();
        assert_eq!(buf.release_ref("test").unwrap(), 0);
        assert!(buf.release_ref("test").is_err());
        assert_eq!(buf.usage_count, 0);
    }

    #[test]
    fn test_plan_layout_i420() {
        let (size, offsets, strides, planes) =
            ImageBuffer::plan_layout(PixelFormat::I420, 64, 48).unwrap();
        assert_eq!(planes, 3);
        assert_eq!(strides, [64, 32, 32, 0]);
        assert_eq!(offsets, [0, 64 * 48, 64 * 48 + 32 * 24, 0]);
        assert_eq!(size, 64 * 48 * 3 / 2);
    }

    #[test]
    fn test_plan_layout_odd_height_rounds_chroma_up() {
        let (size, offsets, strides, _) =
            ImageBuffer::plan_layout(PixelFormat::I420, 64, 45).unwrap();
        assert_eq!(strides[1], 32);
        // 23 chroma rows cover the odd 45th luma row.
        assert_eq!(offsets[2], 64 * 45 + 32 * 23);
        assert_eq!(size, 64 * 45 + 2 * 32 * 23);
    }

    #[test]
    fn test_plan_layout_nv12() {
        let (size, offsets, strides, planes) =
            ImageBuffer::plan_layout(PixelFormat::Nv12, 64, 48).unwrap();
        assert_eq!(planes, 2);
        assert_eq!(strides[1], 64);
        assert_eq!(offsets[1], 64 * 48);
        assert_eq!(size, 64 * 48 * 3 / 2);
    }

    #[test]
    fn test_plan_layout_palette() {
        let (size, _offsets, strides, planes) =
            ImageBuffer::plan_layout(PixelFormat::Rgb8Pal, 16, 16).unwrap();
        assert_eq!(planes, 2);
        assert_eq!(strides[1], PALETTE_SIZE);
        assert_eq!(size, 16 * 16 + PALETTE_SIZE);
    }

    #[test]
    fn test_plan_layout_opaque_fails() {
        assert!(ImageBuffer::plan_layout(PixelFormat::Opaque, 64, 48).is_none());
    }

    #[test]
    fn test_attach_direct_sets_flag() {
        let mut buf = ImageBuffer::new(PixelFormat::I420, AllocationTag::Temp);
        let mem = Rc::new(RefCell::new(vec![0u8; 64 * 48 * 3 / 2]));
        buf.attach_direct(DirectBuffer {
            memory: mem,
            offsets: [0, 64 * 48, 64 * 48 + 32 * 24, 0],
            strides: [64, 32, 32, 0],
            planes: 3,
        });
        assert!(buf.flags.contains(BufferFlags::DIRECT));
        assert!(!buf.flags.contains(BufferFlags::ALLOCATED));
        assert_eq!(buf.storage_len(), 64 * 48 * 3 / 2);
    }

    #[test]
    fn test_keep_mask_excludes_request_bits() {
        assert!(!BufferFlags::KEEP_MASK.contains(BufferFlags::READABLE));
        assert!(!BufferFlags::KEEP_MASK.contains(BufferFlags::PRESERVE));
        assert!(BufferFlags::KEEP_MASK.contains(BufferFlags::ALLOCATED));
        assert!(BufferFlags::KEEP_MASK.contains(BufferFlags::DISPLAYED));
    }
}
