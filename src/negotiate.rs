//! Colorspace negotiation between a decoder and the chain.
//!
//! A decoder offers the formats it can emit; [`match_colorspace`] picks the
//! one the chain carries best. Native support anywhere on the list beats
//! support via conversion; if nothing on the list works at all, a
//! conversion stage is spliced at the head of the chain and the list is
//! retried, preferred format first.

use crate::chain::FilterChain;
use crate::error::{Error, Result};
use crate::format::{FormatSupport, PixelFormat};
use crate::spec::StageArgs;

/// Pick the output format a decoder should use for this chain.
///
/// `candidates` is ordered by the decoder's own preference; `preferred` is
/// the format it would pick if everything were equal (tried first after a
/// conversion stage is spliced in). Returns the chosen format or
/// [`Error::NoColorspace`] when even conversion cannot help.
pub fn match_colorspace(
    chain: &mut FilterChain,
    candidates: &[PixelFormat],
    preferred: Option<PixelFormat>,
) -> Result<PixelFormat> {
    if let Some(found) = scan(chain, candidates) {
        return Ok(found);
    }

    let fallback_format = preferred
        .or_else(|| candidates.first().copied())
        .unwrap_or(PixelFormat::Opaque);

    // A conversion stage already at the head means there is nothing left
    // to try.
    if chain.first_stage_name() == Some("scale") {
        return Err(Error::NoColorspace {
            format: fallback_format,
        });
    }

    tracing::info!("no common colorspace, inserting conversion at the chain head");
    chain.splice(0, "scale", &StageArgs::empty())?;

    if let Some(pref) = preferred {
        if chain.query_format(pref).support.is_supported() {
            return Ok(pref);
        }
    }
    if let Some(found) = scan(chain, candidates) {
        return Ok(found);
    }

    // The adapter did not help; take it back out.
    chain.remove_stage(0);
    Err(Error::NoColorspace {
        format: fallback_format,
    })
}

/// One pass over the candidate list: native support wins immediately, the
/// first conversion-backed format is kept as a fallback.
fn scan(chain: &mut FilterChain, candidates: &[PixelFormat]) -> Option<PixelFormat> {
    let mut best = None;
    for &format in candidates {
        let reply = chain.query_format(format);
        tracing::debug!(%format, support = ?reply.support, "colorspace query");
        match reply.support {
            FormatSupport::Direct => return Some(format),
            FormatSupport::WithConversion => {
                best.get_or_insert(format);
            }
            FormatSupport::Unsupported => {}
        }
    }
    best
}
