//! Retry-with-growing-buffer negotiation for variable-length subsystem records

use tracing::trace;

/// Answer to a sized query: either the record, or the capacity it needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Negotiated<T> {
    /// The record fit.
    Ready(T),
    /// The buffer was too small; retry with at least this many bytes.
    NeedsCapacity(usize),
}

/// Run `query` starting at `initial` capacity, regrowing to the reported size
/// until the record fits.
///
/// Bounded by the subsystem's own answers rather than a retry count: a stable
/// required size finishes in at most two calls, a changing one keeps looping
/// until it settles. Errors from `query` end the negotiation immediately.
pub fn negotiate_sized<T, E>(
    initial: usize,
    mut query: impl FnMut(usize) -> Result<Negotiated<T>, E>,
) -> Result<T, E> {
    let mut capacity = initial;
    loop {
        match query(capacity)? {
            Negotiated::Ready(record) => return Ok(record),
            Negotiated::NeedsCapacity(needed) => {
                trace!(
                    "[NEGOTIATE] buffer of {} bytes too small, regrowing to {}",
                    capacity,
                    needed
                );
                capacity = needed;
            }
        }
    }
}
