//! Draining frames that stages have queued internally.
//!
//! Some stages hold a frame back instead of forwarding it (reordering,
//! deinterlacing, frame doubling). After pushing a frame the feeder calls
//! [`flush_queued`] to drain them in the right order: the pending stage
//! nearest the sink always goes first, so frames that are further along
//! their journey leave before earlier ones can overtake them.

use crate::chain::FilterChain;
use crate::error::Result;
use crate::stage::ControlRequest;

/// Emit every queued frame in the chain, nearest the sink first.
///
/// After each frame that reaches the sink, an on-screen-display pass is
/// requested downstream of the emitting stage. Returns how many frames
/// were emitted.
pub fn flush_queued(chain: &mut FilterChain) -> Result<usize> {
    let mut emitted = 0;
    loop {
        let Some(idx) = (0..chain.len()).rev().find(|&i| chain.has_queued_at(i)) else {
            break;
        };
        let before = pending_set(chain);
        let produced = chain.emit_queued_at(idx)?;
        if produced {
            emitted += 1;
            chain.control_at(idx + 1, ControlRequest::DrawOsd)?;
        } else if pending_set(chain) == before {
            // Nothing reached the sink and nothing moved between stages;
            // asking again would loop forever.
            tracing::warn!(position = idx, "stage kept its queued frame; stopping flush");
            break;
        }
    }
    Ok(emitted)
}

fn pending_set(chain: &FilterChain) -> Vec<bool> {
    (0..chain.len()).map(|i| chain.has_queued_at(i)).collect()
}
