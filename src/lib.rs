//! # Framepipe
//!
//! A single-threaded video filter chain: decoded frames flow through an
//! ordered sequence of stages into a display sink, with per-stage buffer
//! pools, bidirectional format negotiation, and automatic adapter
//! insertion.
//!
//! ## Features
//!
//! - **Pooled frame buffers**: slot-per-reuse-pattern pools with explicit
//!   usage counting and reallocation only when a request outgrows storage
//! - **Format negotiation**: capability queries flow sink-to-source;
//!   conversion and stride adapters are spliced in automatically
//! - **Direct rendering**: sinks can lend their own memory so frames are
//!   written in place
//! - **Queued-frame draining**: stages may hold frames back; the flush
//!   loop emits them nearest-sink first
//!
//! ## Quick Start
//!
//! ```rust
//! use framepipe::prelude::*;
//!
//! let sink = NullSink::new([PixelFormat::I420]);
//! let specs = parse_chain_spec("identity")?;
//! let mut chain = FilterChain::build(StageRegistry::builtin(), &specs, Box::new(sink))?;
//!
//! chain.configure(StageConfig {
//!     width: 640,
//!     height: 480,
//!     out_width: 640,
//!     out_height: 480,
//!     flags: ConfigFlags::empty(),
//!     format: PixelFormat::I420,
//! })?;
//!
//! let frame = chain.acquire_buffer(
//!     PixelFormat::I420,
//!     AllocationTag::Temp,
//!     BufferFlags::empty(),
//!     None,
//!     None,
//! )?;
//! chain.push_frame(&frame, Some(0.0))?;
//! # Ok::<(), framepipe::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chain;
pub mod dispatch;
pub mod error;
pub mod format;
pub mod image;
pub mod imgutil;
pub mod negotiate;
pub mod pool;
pub mod registry;
pub mod sink;
pub mod spec;
pub mod stage;
pub mod stages;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::chain::{ChainView, FilterChain};
    pub use crate::dispatch::flush_queued;
    pub use crate::error::{Error, Result};
    pub use crate::format::{ConfigFlags, FormatReply, FormatSupport, PixelFormat, StageCaps};
    pub use crate::image::{AllocationTag, BufferFlags, BufferRef, ImageBuffer};
    pub use crate::negotiate::match_colorspace;
    pub use crate::registry::StageRegistry;
    pub use crate::sink::{DisplaySink, NullSink};
    pub use crate::spec::parse_chain_spec;
    pub use crate::stage::{ControlRequest, Stage, StageConfig};
}

pub use error::{Error, Result};
