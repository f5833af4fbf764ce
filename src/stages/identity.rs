//! Transparent passthrough stage.
//!
//! Overrides nothing, so every hook takes the default forwarding path.
//! Useful for exercising the dispatch machinery and as the smallest
//! possible stage implementation to copy from.

use crate::error::Result;
use crate::spec::StageArgs;
use crate::stage::Stage;

/// A stage that changes nothing.
pub struct IdentityStage;

impl Stage for IdentityStage {}

pub(crate) fn construct(_args: &StageArgs) -> Result<Box<dyn Stage>> {
    Ok(Box::new(IdentityStage))
}
