//! Cancellation for suspension points.
//!
//! Every suspendable operation takes a [`CancellationToken`]. The token is
//! only consulted while the operation is parked on I/O, so work that has
//! already completed (bytes read and framed, a connection accepted) is never
//! thrown away.

use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::error::{LinewireError, Result};

/// Race `fut` against `token`.
///
/// Returns `Cancelled` if the token fires first, including when it was
/// already cancelled before the call.
pub async fn cancellable<F, T>(token: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if token.is_cancelled() {
        return Err(LinewireError::Cancelled);
    }

    tokio::select! {
        biased;
        _ = token.cancelled() => Err(LinewireError::Cancelled),
        res = fut => res,
    }
}
