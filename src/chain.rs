//! The filter chain: an ordered sequence of stages ending in a sink.
//!
//! Stages are stored in a flat vector ordered source to sink; the terminal
//! element is always an adapter wrapping the [`DisplaySink`]. Dispatching
//! into a stage temporarily takes the stage object out of its node and
//! hands it a [`ChainView`] over the downstream tail, so default trait
//! methods can forward through the chain without aliasing it.
//!
//! Adapter stages are spliced in automatically during configuration: a
//! conversion stage when no downstream stage takes the format, and a stride
//! adapter when a stage requires stride acceptance its neighbor lacks.

use crate::error::{Error, Result};
use crate::format::{FormatReply, PixelFormat, StageCaps};
use crate::image::{AllocationTag, BufferFlags, BufferRef};
use crate::imgutil::{self, SliceRegion};
use crate::pool::{BufferPool, BufferRequest};
use crate::registry::StageRegistry;
use crate::sink::DisplaySink;
use crate::spec::{StageArgs, StageSpec};
use crate::stage::{ControlRequest, Stage, StageConfig};
use crate::stages::sink::SinkStage;

/// Name under which conversion adapters are spliced in.
const CONVERT_STAGE: &str = "scale";
/// Name under which stride adapters are spliced in.
const STRIDE_STAGE: &str = "expand";

/// First-configuration geometry, kept to police constant-format stages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Baseline {
    width: u32,
    height: u32,
    format: PixelFormat,
}

/// One stage plus its chain-owned state.
struct StageNode {
    name: String,
    /// `None` only while the stage is dispatched into.
    stage: Option<Box<dyn Stage>>,
    pool: BufferPool,
    baseline: Option<Baseline>,
    /// Input size this stage was configured for; (0, 0) before configuration.
    size: (u32, u32),
    /// Output buffer most recently acquired by this stage, the target for
    /// slice copies when the neighbor does not handle slices itself.
    dest: Option<BufferRef>,
}

impl StageNode {
    fn new(name: impl Into<String>, stage: Box<dyn Stage>) -> Self {
        Self {
            name: name.into(),
            stage: Some(stage),
            pool: BufferPool::new(),
            baseline: None,
            size: (0, 0),
            dest: None,
        }
    }
}

/// An ordered chain of stages terminated by a display sink.
pub struct FilterChain {
    nodes: Vec<StageNode>,
    registry: StageRegistry,
    /// Requirements of whatever feeds the chain (usually the decoder).
    entry_reqs: StageCaps,
    /// Buffer most recently acquired by the chain's feeder.
    entry_dest: Option<BufferRef>,
    torn_down: bool,
}

impl FilterChain {
    /// A chain containing only the sink.
    pub fn new(registry: StageRegistry, sink: Box<dyn DisplaySink>) -> Self {
        let name = sink.name().to_string();
        let stage = SinkStage::new(sink);
        Self {
            nodes: vec![StageNode::new(name, Box::new(stage))],
            registry,
            entry_reqs: StageCaps::empty(),
            entry_dest: None,
            torn_down: false,
        }
    }

    /// Build a chain from parsed stage specs, source side first.
    ///
    /// Stages open sink side first, so a failure tears down only what was
    /// already opened and returns the error.
    pub fn build(
        registry: StageRegistry,
        specs: &[StageSpec],
        sink: Box<dyn DisplaySink>,
    ) -> Result<Self> {
        let mut chain = Self::new(registry, sink);
        for spec in specs.iter().rev() {
            let node = match chain.open_stage(&spec.name, &spec.args) {
                Ok(node) => node,
                Err(err) => {
                    chain.teardown();
                    return Err(err);
                }
            };
            chain.nodes.insert(0, node);
        }
        Ok(chain)
    }

    /// Parse a chain-spec string and build the chain it describes.
    pub fn build_from_str(
        registry: StageRegistry,
        spec: &str,
        sink: Box<dyn DisplaySink>,
    ) -> Result<Self> {
        let specs = crate::spec::parse_chain_spec(spec)?;
        Self::build(registry, &specs, sink)
    }

    /// Resolve, construct and open one stage.
    fn open_stage(&self, name: &str, args: &StageArgs) -> Result<StageNode> {
        let descriptor = self.registry.resolve(name)?;
        let wrap = |err: Error| match err {
            wrapped @ Error::StageOpenFailed { .. } => wrapped,
            other => Error::StageOpenFailed {
                name: name.to_string(),
                reason: other.to_string(),
            },
        };
        let mut stage = (descriptor.construct)(args).map_err(wrap)?;
        stage.open().map_err(wrap)?;
        tracing::info!(stage = name, "opening video filter");
        Ok(StageNode::new(name, stage))
    }

    /// Add a pre-built stage at the head of the chain.
    pub fn prepend_stage(&mut self, name: impl Into<String>, stage: Box<dyn Stage>) {
        self.nodes.insert(0, StageNode::new(name, stage));
    }

    /// Resolve a registered stage and splice it in directly in front of
    /// the sink.
    pub fn insert_before_sink(&mut self, name: &str, args: &StageArgs) -> Result<()> {
        let at = self.nodes.len().saturating_sub(1);
        self.splice(at, name, args)
    }

    /// Open a registered stage and splice it in at `idx`.
    pub(crate) fn splice(&mut self, idx: usize, name: &str, args: &StageArgs) -> Result<()> {
        let node = self.open_stage(name, args)?;
        tracing::info!(stage = name, position = idx, "inserting video filter");
        self.nodes.insert(idx, node);
        Ok(())
    }

    /// Remove the stage at `idx`, closing it and dropping its pool.
    pub(crate) fn remove_stage(&mut self, idx: usize) {
        if idx >= self.nodes.len() {
            return;
        }
        let mut node = self.nodes.remove(idx);
        if let Some(mut stage) = node.stage.take() {
            stage.close();
        }
        node.pool.release_all(&node.name);
    }

    /// Number of stages, including the sink adapter.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the chain has no stages at all (only after teardown).
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Stage names in order, source side first.
    pub fn stage_names(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.name.as_str()).collect()
    }

    pub(crate) fn first_stage_name(&self) -> Option<&str> {
        self.nodes.first().map(|n| n.name.as_str())
    }

    /// Declare what the chain's feeder requires of the first stage.
    ///
    /// A feeder that cannot produce tightly packed buffers sets
    /// [`StageCaps::ACCEPT_STRIDE`] here; configuration then splices a
    /// stride adapter at the head if the first stage lacks it.
    pub fn set_entry_requirements(&mut self, reqs: StageCaps) {
        self.entry_reqs = reqs;
    }

    // ========================================================================
    // Chain-level operations (the feeder-facing API)
    // ========================================================================

    /// Can the chain carry `format` to the sink?
    pub fn query_format(&mut self, format: PixelFormat) -> FormatReply {
        self.query_format_at(0, format)
    }

    /// Configure the whole chain, splicing adapters where needed.
    pub fn configure(&mut self, cfg: StageConfig) -> Result<()> {
        let caller_reqs = self.entry_reqs;
        let mut view = ChainView {
            chain: self,
            from: 0,
            caller_reqs,
        };
        view.configure(cfg)
    }

    /// Acquire a frame buffer from the first stage's pool.
    ///
    /// `width`/`height` default to the configured frame size and must not
    /// be smaller than it.
    pub fn acquire_buffer(
        &mut self,
        format: PixelFormat,
        tag: AllocationTag,
        flags: BufferFlags,
        width: Option<u32>,
        height: Option<u32>,
    ) -> Result<BufferRef> {
        let buf = self.acquire_at(0, format, tag, flags, width, height)?;
        self.entry_dest = Some(buf.clone());
        Ok(buf)
    }

    /// Push one frame into the chain.
    ///
    /// Returns whether a frame reached the sink.
    pub fn push_frame(&mut self, frame: &BufferRef, pts: Option<f64>) -> Result<bool> {
        self.accept_at(0, frame, pts)
    }

    /// Send an out-of-band request down the chain.
    pub fn control(&mut self, req: ControlRequest) -> Result<()> {
        self.control_at(0, req)
    }

    /// Hand a partially drawn region to the chain.
    pub fn draw_slice(&mut self, region: &SliceRegion<'_>) -> Result<()> {
        let handles = self
            .nodes
            .first()
            .and_then(|n| n.stage.as_ref())
            .is_some_and(|s| s.handles_slices());
        if handles {
            return self.with_stage(0, Ok(()), |stage, view| stage.draw_slice(view, region));
        }
        let Some(dest) = self.entry_dest.clone() else {
            tracing::error!("draw_slice without a stored destination image");
            return Ok(());
        };
        imgutil::copy_slice_region(&mut dest.borrow_mut(), region);
        Ok(())
    }

    /// Whether any stage is holding a queued frame.
    pub fn has_queued_frames(&self) -> bool {
        (0..self.nodes.len()).any(|i| self.has_queued_at(i))
    }

    /// Close every stage and drop every pool, sink side first.
    ///
    /// Idempotent; also runs on drop.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.entry_dest = None;
        while let Some(mut node) = self.nodes.pop() {
            tracing::debug!(stage = %node.name, "closing video filter");
            if let Some(mut stage) = node.stage.take() {
                stage.close();
            }
            node.dest = None;
            node.pool.release_all(&node.name);
        }
    }

    // ========================================================================
    // Indexed internals shared with ChainView and the flush loop
    // ========================================================================

    /// Take the stage at `idx` out of its node, run `f` against it with a
    /// view over the downstream tail, and put it back.
    ///
    /// Splices performed through the view land at indices past `idx`, so
    /// the node the stage came from never moves.
    fn with_stage<R>(
        &mut self,
        idx: usize,
        missing: R,
        f: impl FnOnce(&mut Box<dyn Stage>, &mut ChainView<'_>) -> R,
    ) -> R {
        let Some(mut stage) = self.nodes.get_mut(idx).and_then(|n| n.stage.take()) else {
            return missing;
        };
        let caller_reqs = stage.reqs();
        let mut view = ChainView {
            chain: self,
            from: idx + 1,
            caller_reqs,
        };
        let result = f(&mut stage, &mut view);
        if let Some(node) = self.nodes.get_mut(idx) {
            node.stage = Some(stage);
        }
        result
    }

    fn query_format_at(&mut self, idx: usize, format: PixelFormat) -> FormatReply {
        self.with_stage(idx, FormatReply::unsupported(), |stage, view| {
            stage.query_format(view, format)
        })
    }

    /// Dispatch a configuration to the stage at `idx`, enforcing the
    /// constant-format rule against the recorded baseline.
    pub(crate) fn configure_at(&mut self, idx: usize, cfg: StageConfig) -> Result<()> {
        let Some(node) = self.nodes.get_mut(idx) else {
            return Ok(());
        };
        let caps = node
            .stage
            .as_ref()
            .map(|s| s.caps())
            .unwrap_or_default();
        if let Some(baseline) = node.baseline {
            if caps.contains(StageCaps::CONSTANT) {
                if baseline.width != cfg.width
                    || baseline.height != cfg.height
                    || baseline.format != cfg.format
                {
                    return Err(Error::ResolutionMismatch {
                        stage: node.name.clone(),
                        configured_width: baseline.width,
                        configured_height: baseline.height,
                        requested_width: cfg.width,
                        requested_height: cfg.height,
                    });
                }
                // Identical geometry: nothing to redo.
                return Ok(());
            }
        }
        node.baseline = Some(Baseline {
            width: cfg.width,
            height: cfg.height,
            format: cfg.format,
        });
        node.size = (cfg.width, cfg.height);
        let result = self.with_stage(idx, Ok(()), |stage, view| stage.configure(view, cfg));
        if result.is_err() {
            // A failed configuration leaves the stage unconfigured.
            if let Some(node) = self.nodes.get_mut(idx) {
                node.baseline = None;
                node.size = (0, 0);
            }
        }
        result
    }

    /// Acquire a buffer from the pool of the stage at `idx`.
    pub(crate) fn acquire_at(
        &mut self,
        idx: usize,
        format: PixelFormat,
        tag: AllocationTag,
        mut flags: BufferFlags,
        width: Option<u32>,
        height: Option<u32>,
    ) -> Result<BufferRef> {
        let Some(node) = self.nodes.get(idx) else {
            return Err(Error::UnsupportedAllocation {
                reason: "no downstream stage to allocate from".to_string(),
            });
        };
        let (cfg_w, cfg_h) = node.size;
        if cfg_w == 0 || cfg_h == 0 {
            return Err(Error::UnsupportedAllocation {
                reason: format!("stage {} is not configured", node.name),
            });
        }
        let w = width.unwrap_or(cfg_w);
        let h = height.unwrap_or(cfg_h);
        if w < cfg_w || h < cfg_h {
            return Err(Error::UnsupportedAllocation {
                reason: format!(
                    "requested {w}x{h} below the configured {cfg_w}x{cfg_h}"
                ),
            });
        }

        let (intercepts, handles_slices, caps) = match node.stage.as_ref() {
            Some(stage) => (stage.intercepts(), stage.handles_slices(), stage.caps()),
            None => (true, false, StageCaps::empty()),
        };

        if !intercepts && idx + 1 < self.nodes.len() {
            // Transparent stage: allocation falls through to the next pool,
            // and the forwarding hop keeps a reference of its own.
            let buf = self.acquire_at(idx + 1, format, tag, flags, Some(w), Some(h))?;
            buf.borrow_mut().acquire_ref();
            return Ok(buf);
        }

        let aligned = flags.contains(BufferFlags::ACCEPT_ALIGNED_STRIDE)
            || (flags.contains(BufferFlags::PREFER_ALIGNED_STRIDE)
                && caps.contains(StageCaps::ACCEPT_STRIDE));
        let alloc_width = if aligned { imgutil::align_stride(w) } else { w };

        // Slice callbacks only make sense if this stage handles them.
        if !handles_slices {
            flags.remove(BufferFlags::DRAW_CALLBACK);
        }

        let node = &mut self.nodes[idx];
        let name = node.name.clone();
        let pool = &mut node.pool;
        let mut stage = node.stage.as_deref_mut();
        pool.acquire(
            BufferRequest {
                format,
                tag,
                flags,
                width: w,
                height: h,
                alloc_width,
            },
            |img| stage.as_mut().is_some_and(|s| s.provide_direct(img)),
            &name,
        )
    }

    pub(crate) fn accept_at(
        &mut self,
        idx: usize,
        frame: &BufferRef,
        pts: Option<f64>,
    ) -> Result<bool> {
        self.with_stage(idx, Ok(false), |stage, view| stage.accept(view, frame, pts))
    }

    pub(crate) fn control_at(&mut self, idx: usize, req: ControlRequest) -> Result<()> {
        self.with_stage(idx, Ok(()), |stage, view| stage.control(view, req))
    }

    pub(crate) fn has_queued_at(&self, idx: usize) -> bool {
        self.nodes
            .get(idx)
            .and_then(|n| n.stage.as_ref())
            .is_some_and(|s| s.has_queued_frame())
    }

    pub(crate) fn emit_queued_at(&mut self, idx: usize) -> Result<bool> {
        self.with_stage(idx, Ok(false), |stage, view| stage.emit_queued(view))
    }
}

impl Drop for FilterChain {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl std::fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterChain")
            .field("stages", &self.stage_names())
            .field("torn_down", &self.torn_down)
            .finish()
    }
}

/// A stage's window onto the part of the chain downstream of itself.
///
/// All default [`Stage`] method bodies forward through this; intercepting
/// stages use it to allocate output buffers from their neighbor's pool and
/// to pass processed frames along.
pub struct ChainView<'a> {
    chain: &'a mut FilterChain,
    from: usize,
    caller_reqs: StageCaps,
}

impl ChainView<'_> {
    /// Whether there is nothing downstream (only the case inside the sink
    /// adapter itself).
    pub fn is_terminal(&self) -> bool {
        self.from >= self.chain.nodes.len()
    }

    /// Ask the downstream tail whether it can carry `format`.
    pub fn query_format(&mut self, format: PixelFormat) -> FormatReply {
        self.chain.query_format_at(self.from, format)
    }

    /// Configure the downstream tail.
    ///
    /// Splices a conversion stage if the neighbor rejects the format, and a
    /// stride adapter if the caller requires stride acceptance the tail
    /// does not offer.
    pub fn configure(&mut self, cfg: StageConfig) -> Result<()> {
        let mut reply = self.query_format(cfg.format);
        if !reply.support.is_supported() {
            if self.chain.nodes.get(self.from).map(|n| n.name.as_str()) == Some(CONVERT_STAGE) {
                // A conversion stage that cannot feed its own neighbor
                // means no amount of splicing will help.
                return Err(Error::NoColorspace { format: cfg.format });
            }
            self.chain
                .splice(self.from, CONVERT_STAGE, &StageArgs::empty())?;
            reply = self.query_format(cfg.format);
            if !reply.support.is_supported() {
                return Err(Error::NoColorspace { format: cfg.format });
            }
        }
        tracing::debug!(caps = ?reply.caps, reqs = ?self.caller_reqs, "downstream capability check");
        let missing = self.caller_reqs - reply.caps;
        if missing.contains(StageCaps::ACCEPT_STRIDE) {
            self.chain
                .splice(self.from, STRIDE_STAGE, &StageArgs::empty())?;
        }
        self.chain.configure_at(self.from, cfg)
    }

    /// Acquire an output buffer from the neighbor's pool.
    ///
    /// The buffer is also recorded as the caller's slice-copy destination.
    pub fn acquire(
        &mut self,
        format: PixelFormat,
        tag: AllocationTag,
        flags: BufferFlags,
        width: Option<u32>,
        height: Option<u32>,
    ) -> Result<BufferRef> {
        let buf = self
            .chain
            .acquire_at(self.from, format, tag, flags, width, height)?;
        if let Some(caller) = self.from.checked_sub(1) {
            if let Some(node) = self.chain.nodes.get_mut(caller) {
                node.dest = Some(buf.clone());
            }
        }
        Ok(buf)
    }

    /// Hand a frame to the neighbor.
    pub fn accept(&mut self, frame: &BufferRef, pts: Option<f64>) -> Result<bool> {
        self.chain.accept_at(self.from, frame, pts)
    }

    /// Forward an out-of-band request.
    pub fn control(&mut self, req: ControlRequest) -> Result<()> {
        self.chain.control_at(self.from, req)
    }

    /// Forward a partially drawn region.
    ///
    /// If the neighbor handles slices itself it gets the callback;
    /// otherwise the region is copied into the caller's pending output
    /// buffer.
    pub fn draw_slice(&mut self, region: &SliceRegion<'_>) -> Result<()> {
        let neighbor_handles = self
            .chain
            .nodes
            .get(self.from)
            .and_then(|n| n.stage.as_ref())
            .is_some_and(|s| s.handles_slices());
        if neighbor_handles {
            return self
                .chain
                .with_stage(self.from, Ok(()), |stage, view| stage.draw_slice(view, region));
        }
        let dest = self
            .from
            .checked_sub(1)
            .and_then(|i| self.chain.nodes.get(i))
            .and_then(|n| n.dest.clone());
        let Some(dest) = dest else {
            tracing::error!("draw_slice without a stored destination image");
            return Ok(());
        };
        imgutil::copy_slice_region(&mut dest.borrow_mut(), region);
        Ok(())
    }
}
