//! Per-stage buffer pools.
//!
//! Every stage owns one [`BufferPool`]. A pool keeps a small set of slots,
//! one per reuse pattern: a single export slot, a two-slot ping-pong for
//! persistent frames, one scratch slot, and a fixed bank of numbered slots
//! for decoders that manage their own reference frames. Acquisition picks
//! the slot from the request's [`AllocationTag`], reuses existing storage
//! when it still fits, and reallocates otherwise.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::image::{
    AllocationTag, BufferFlags, BufferRef, ImageBuffer, PixelStorage,
};
use crate::imgutil;
use crate::format::PixelFormat;

/// Number of numbered slots per pool.
pub const NUMBERED_SLOTS: usize = 32;

/// What a stage asks its upstream neighbor to allocate.
#[derive(Clone, Copy, Debug)]
pub struct BufferRequest {
    /// Pixel format of the frame.
    pub format: PixelFormat,
    /// Reuse pattern.
    pub tag: AllocationTag,
    /// Request flags (the [`BufferFlags::REQUEST_MASK`] subset is honored).
    pub flags: BufferFlags,
    /// Logical width in pixels.
    pub width: u32,
    /// Logical height in pixels.
    pub height: u32,
    /// Width to allocate, possibly wider than `width` for stride alignment.
    pub alloc_width: u32,
}

/// The buffer slots owned by one stage.
#[derive(Default)]
pub struct BufferPool {
    export: Option<BufferRef>,
    statics: [Option<BufferRef>; 2],
    static_idx: usize,
    temp: Option<BufferRef>,
    numbered: Vec<Option<BufferRef>>,
}

impl BufferPool {
    /// An empty pool.
    pub fn new() -> Self {
        Self {
            numbered: (0..NUMBERED_SLOTS).map(|_| None).collect(),
            ..Self::default()
        }
    }

    /// Acquire a buffer for `req` from this pool.
    ///
    /// `direct_hook` is offered the slot before any self-allocation; if it
    /// attaches sink memory (returning `true`) the pool allocates nothing.
    /// `stage_name` labels log lines and errors.
    pub fn acquire(
        &mut self,
        req: BufferRequest,
        mut direct_hook: impl FnMut(&mut ImageBuffer) -> bool,
        stage_name: &str,
    ) -> Result<BufferRef> {
        let slot = self.select_slot(req, stage_name)?;
        let buf = slot.clone();
        {
            let mut img = buf.borrow_mut();

            // Only allocation state and one-shot consumer bits survive a
            // reacquisition; everything else comes from the new request.
            let kept = img.flags & BufferFlags::KEEP_MASK;
            img.flags = kept | (req.flags & BufferFlags::REQUEST_MASK);
            img.tag = req.tag;
            img.pts = None;

            if matches!(req.tag, AllocationTag::Export) {
                // Caller brings its own planes; just hand the slot over.
                img.format = req.format;
                img.width = req.width;
                img.height = req.height;
            } else {
                self.prepare_storage(&mut img, req, &mut direct_hook, stage_name)?;
            }

            img.acquire_ref();
            if img.usage_count > 1 && !matches!(req.tag, AllocationTag::Export) {
                tracing::debug!(
                    stage = stage_name,
                    count = img.usage_count,
                    "buffer reacquired while still in use"
                );
            }
            if img.flags.contains(BufferFlags::DISPLAYED) {
                tracing::debug!(stage = stage_name, "reusing an already-displayed buffer");
            }
        }
        Ok(buf)
    }

    /// Pick the slot the request's tag maps to, creating it if empty.
    fn select_slot(&mut self, req: BufferRequest, stage_name: &str) -> Result<&BufferRef> {
        match req.tag {
            // Ping-pong so the previous frame stays intact while the next
            // one is written.
            AllocationTag::Static | AllocationTag::Ip => Ok(self.next_static(req)),
            AllocationTag::Ipb if req.flags.contains(BufferFlags::READABLE) => {
                Ok(self.next_static(req))
            }
            AllocationTag::Temp | AllocationTag::Ipb => Ok(self
                .temp
                .get_or_insert_with(|| new_slot(req.format, req.tag))),
            AllocationTag::Export => Ok(self
                .export
                .get_or_insert_with(|| new_slot(req.format, req.tag))),
            AllocationTag::Numbered(Some(n)) => {
                if n >= NUMBERED_SLOTS {
                    return Err(Error::UnsupportedAllocation {
                        reason: format!("numbered slot {n} out of range"),
                    });
                }
                Ok(self.numbered[n].get_or_insert_with(|| new_slot(req.format, req.tag)))
            }
            AllocationTag::Numbered(None) => {
                let free = self
                    .numbered
                    .iter()
                    .position(|s| s.as_ref().map_or(true, |b| b.borrow().is_idle()));
                match free {
                    Some(n) => {
                        Ok(self.numbered[n].get_or_insert_with(|| new_slot(req.format, req.tag)))
                    }
                    None => Err(Error::AllocationExhausted {
                        stage: stage_name.to_string(),
                    }),
                }
            }
        }
    }

    fn next_static(&mut self, req: BufferRequest) -> &BufferRef {
        self.static_idx ^= 1;
        self.statics[self.static_idx].get_or_insert_with(|| new_slot(req.format, req.tag))
    }

    /// Ensure the slot has storage fitting the request.
    fn prepare_storage(
        &self,
        img: &mut ImageBuffer,
        req: BufferRequest,
        direct_hook: &mut impl FnMut(&mut ImageBuffer) -> bool,
        stage_name: &str,
    ) -> Result<()> {
        let needs_palette =
            req.format.has_palette() && !img.flags.contains(BufferFlags::PALETTE);
        let too_small = img.alloc_width < req.alloc_width || img.alloc_height < req.height;
        let format_changed = img.format != req.format;

        if img.flags.contains(BufferFlags::ALLOCATED)
            && (too_small || format_changed || needs_palette)
        {
            tracing::debug!(
                stage = stage_name,
                from = %img.format,
                to = %req.format,
                "releasing undersized buffer storage for reallocation"
            );
            img.storage = PixelStorage::Empty;
            img.flags.remove(BufferFlags::ALLOCATED | BufferFlags::PALETTE);
        }

        img.format = req.format;
        img.width = req.width;
        img.height = req.height;

        if img.flags.contains(BufferFlags::ALLOCATED) {
            // Existing storage still fits; layout metadata is already right.
            return Ok(());
        }

        // Offer direct rendering before allocating ourselves.
        if direct_hook(img) && img.flags.contains(BufferFlags::DIRECT) {
            img.alloc_width = req.alloc_width;
            img.alloc_height = req.height;
            return Ok(());
        }

        let Some((size, offsets, strides, planes)) =
            ImageBuffer::plan_layout(req.format, req.alloc_width, req.height)
        else {
            return Err(Error::UnsupportedAllocation {
                reason: format!("cannot allocate {} images", req.format),
            });
        };
        img.offsets = offsets;
        img.strides = strides;
        img.planes = planes;
        img.alloc_width = req.alloc_width;
        img.alloc_height = req.height;
        img.storage = PixelStorage::Owned(vec![0u8; size].into_boxed_slice());
        img.flags.insert(BufferFlags::ALLOCATED);
        if req.format.has_palette() {
            img.flags.insert(BufferFlags::PALETTE);
        }
        imgutil::clear_image(img, 0, 0, req.alloc_width, req.height);
        tracing::debug!(
            stage = stage_name,
            format = %req.format,
            width = req.alloc_width,
            height = req.height,
            "allocated image buffer"
        );
        Ok(())
    }

    /// Drop every slot, warning about buffers still in use.
    pub fn release_all(&mut self, stage_name: &str) {
        let check = |slot: &mut Option<BufferRef>| {
            if let Some(buf) = slot.take() {
                let count = buf.borrow().usage_count;
                if count != 0 {
                    tracing::warn!(
                        stage = stage_name,
                        count,
                        "dropping a buffer that is still in use"
                    );
                }
            }
        };
        check(&mut self.export);
        for slot in &mut self.statics {
            check(slot);
        }
        check(&mut self.temp);
        for slot in &mut self.numbered {
            check(slot);
        }
    }

    /// Number of slots currently holding a buffer.
    pub fn occupied(&self) -> usize {
        self.export.iter().count()
            + self.statics.iter().flatten().count()
            + self.temp.iter().count()
            + self.numbered.iter().flatten().count()
    }
}

fn new_slot(format: PixelFormat, tag: AllocationTag) -> BufferRef {
    Rc::new(RefCell::new(ImageBuffer::new(format, tag)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(tag: AllocationTag) -> BufferRequest {
        BufferRequest {
            format: PixelFormat::I420,
            tag,
            flags: BufferFlags::empty(),
            width: 64,
            height: 48,
            alloc_width: 64,
        }
    }

    fn no_direct(_: &mut ImageBuffer) -> bool {
        false
    }

    #[test]
    fn test_temp_slot_reuses_storage() {
        let mut pool = BufferPool::new();
        let a = pool.acquire(request(AllocationTag::Temp), no_direct, "t").unwrap();
        let id = a.borrow().storage_id();
        a.borrow_mut().release_ref("t").unwrap();
        let b = pool.acquire(request(AllocationTag::Temp), no_direct, "t").unwrap();
        assert_eq!(b.borrow().storage_id(), id);
    }

    #[test]
    fn test_static_ping_pong_alternates() {
        let mut pool = BufferPool::new();
        let a = pool
            .acquire(request(AllocationTag::Static), no_direct, "t")
            .unwrap();
        let b = pool
            .acquire(request(AllocationTag::Static), no_direct, "t")
            .unwrap();
        let c = pool
            .acquire(request(AllocationTag::Static), no_direct, "t")
            .unwrap();
        assert_ne!(a.borrow().storage_id(), b.borrow().storage_id());
        assert_eq!(a.borrow().storage_id(), c.borrow().storage_id());
    }

    #[test]
    fn test_realloc_only_when_smaller() {
        let mut pool = BufferPool::new();
        let big = pool.acquire(request(AllocationTag::Temp), no_direct, "t").unwrap();
        let big_id = big.borrow().storage_id();
        big.borrow_mut().release_ref("t").unwrap();

        let mut small = request(AllocationTag::Temp);
        small.width = 32;
        small.height = 24;
        small.alloc_width = 32;
        let reused = pool.acquire(small, no_direct, "t").unwrap();
        // Smaller request fits in the existing storage.
        assert_eq!(reused.borrow().storage_id(), big_id);
        assert_eq!(reused.borrow().width, 32);
        reused.borrow_mut().release_ref("t").unwrap();

        let old_len = reused.borrow().storage_len();
        let mut bigger = request(AllocationTag::Temp);
        bigger.width = 128;
        bigger.height = 96;
        bigger.alloc_width = 128;
        let fresh = pool.acquire(bigger, no_direct, "t").unwrap();
        // Storage grew; a freed-then-reallocated block may reuse the old
        // address, so identity says nothing here.
        assert!(fresh.borrow().storage_len() > old_len);
        assert_eq!(fresh.borrow().width, 128);
    }

    #[test]
    fn test_format_change_reallocates() {
        let mut pool = BufferPool::new();
        let a = pool.acquire(request(AllocationTag::Temp), no_direct, "t").unwrap();
        let old_len = a.borrow().storage_len();
        a.borrow_mut().release_ref("t").unwrap();
        let mut rgb = request(AllocationTag::Temp);
        rgb.format = PixelFormat::Rgb24;
        let b = pool.acquire(rgb, no_direct, "t").unwrap();
        assert_eq!(b.borrow().format, PixelFormat::Rgb24);
        // The storage was rebuilt for the packed layout.
        assert_eq!(b.borrow().storage_len(), 64 * 48 * 3);
        assert_ne!(b.borrow().storage_len(), old_len);
    }

    #[test]
    fn test_odd_height_planar_allocation() {
        let mut pool = BufferPool::new();
        let mut req = request(AllocationTag::Temp);
        req.height = 45;
        let a = pool.acquire(req, no_direct, "t").unwrap();
        let img = a.borrow();
        // Chroma planes are rounded up to cover the odd last luma row, and
        // the neutral fill stays inside the allocation.
        assert_eq!(img.storage_len(), 64 * 45 + 2 * 32 * 23);
        img.with_data(|d| {
            assert_eq!(d[64 * 45 - 1], 0);
            assert_eq!(d[64 * 45], 128);
            assert_eq!(*d.last().unwrap(), 128);
        })
        .unwrap();
    }

    #[test]
    fn test_numbered_auto_assignment_and_exhaustion() {
        let mut pool = BufferPool::new();
        let mut held = Vec::new();
        for _ in 0..NUMBERED_SLOTS {
            held.push(
                pool.acquire(request(AllocationTag::Numbered(None)), no_direct, "t")
                    .unwrap(),
            );
        }
        let err = pool
            .acquire(request(AllocationTag::Numbered(None)), no_direct, "t")
            .unwrap_err();
        assert!(matches!(err, Error::AllocationExhausted { .. }));

        // Releasing one slot makes auto-assignment succeed again.
        held[5].borrow_mut().release_ref("t").unwrap();
        let again = pool
            .acquire(request(AllocationTag::Numbered(None)), no_direct, "t")
            .unwrap();
        assert_eq!(again.borrow().storage_id(), held[5].borrow().storage_id());
    }

    #[test]
    fn test_request_flags_masked_on_reacquire() {
        let mut pool = BufferPool::new();
        let mut req = request(AllocationTag::Temp);
        req.flags = BufferFlags::READABLE | BufferFlags::PRESERVE;
        let a = pool.acquire(req, no_direct, "t").unwrap();
        assert!(a.borrow().flags.contains(BufferFlags::READABLE));
        a.borrow_mut().release_ref("t").unwrap();

        let b = pool
            .acquire(request(AllocationTag::Temp), no_direct, "t")
            .unwrap();
        let flags = b.borrow().flags;
        assert!(!flags.contains(BufferFlags::READABLE));
        assert!(!flags.contains(BufferFlags::PRESERVE));
        assert!(flags.contains(BufferFlags::ALLOCATED));
    }

    #[test]
    fn test_opaque_allocation_rejected() {
        let mut pool = BufferPool::new();
        let mut req = request(AllocationTag::Temp);
        req.format = PixelFormat::Opaque;
        let err = pool.acquire(req, no_direct, "t").unwrap_err();
        assert!(matches!(err, Error::UnsupportedAllocation { .. }));
    }

    #[test]
    fn test_export_allocates_nothing() {
        let mut pool = BufferPool::new();
        let a = pool
            .acquire(request(AllocationTag::Export), no_direct, "t")
            .unwrap();
        assert_eq!(a.borrow().storage_len(), 0);
        assert!(!a.borrow().flags.contains(BufferFlags::ALLOCATED));
    }

    #[test]
    fn test_fresh_buffer_cleared_to_black() {
        let mut pool = BufferPool::new();
        let a = pool.acquire(request(AllocationTag::Temp), no_direct, "t").unwrap();
        a.borrow()
            .with_data(|d| {
                assert_eq!(d[0], 0);
                assert_eq!(d[64 * 48], 128);
            })
            .unwrap();
    }
}
