//! Wall-clock timing of encode/decode steps.

use std::future::Future;
use std::time::Instant;

use crate::executor::{self, CommandSpec};

/// Await `operation` once and return the elapsed seconds.
///
/// The operation's value is discarded; its error is returned unchanged so
/// a failed encode or decode still reaches the caller.
pub async fn time<F, T, E>(operation: F) -> Result<f64, E>
where
    F: Future<Output = Result<T, E>>,
{
    let start = Instant::now();
    operation.await?;
    Ok(start.elapsed().as_secs_f64())
}

/// Run `spec` and return its duration in seconds, or `None` if it failed.
pub async fn time_command(spec: &CommandSpec) -> Option<f64> {
    let start = Instant::now();
    executor::run(spec)
        .await
        .then(|| start.elapsed().as_secs_f64())
}
