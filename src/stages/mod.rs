//! Built-in stages.

pub mod expand;
pub mod identity;
pub mod scale;
pub(crate) mod sink;
