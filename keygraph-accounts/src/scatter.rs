//! Bounded scatter/gather over blocking work.
//!
//! Each item is checked on tokio's blocking pool, with at most `limit`
//! checks in flight. Dropping the returned future aborts outstanding tasks
//! through the `JoinSet`.

use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};

/// Returns the first `Some` produced by `check`, aborting the remaining
/// checks. `Ok(None)` means every item was checked without a match.
pub(crate) async fn first_match<T, R, F>(
    items: Vec<T>,
    limit: usize,
    check: F,
) -> Result<Option<R>, JoinError>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Option<R> + Send + Sync + 'static,
{
    let check = Arc::new(check);
    let permits = Arc::new(Semaphore::new(limit.max(1)));
    let mut set = JoinSet::new();

    for item in items {
        let check = Arc::clone(&check);
        let permits = Arc::clone(&permits);
        set.spawn(async move {
            // Never closed, so acquire only fails if the semaphore is dropped.
            let _permit = permits.acquire_owned().await.ok()?;
            tokio::task::spawn_blocking(move || check(item))
                .await
                .ok()
                .flatten()
        });
    }

    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(Some(found)) => {
                set.abort_all();
                return Ok(Some(found));
            }
            Ok(None) => {}
            Err(e) if e.is_cancelled() => {}
            Err(e) => return Err(e),
        }
    }
    Ok(None)
}

/// Applies `f` to every item and returns the results in input order.
pub(crate) async fn map_all<T, R, F>(items: Vec<T>, limit: usize, f: F) -> Result<Vec<R>, JoinError>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> R + Send + Sync + 'static,
{
    let f = Arc::new(f);
    let permits = Arc::new(Semaphore::new(limit.max(1)));
    let mut set = JoinSet::new();
    let len = items.len();

    for (index, item) in items.into_iter().enumerate() {
        let f = Arc::clone(&f);
        let permits = Arc::clone(&permits);
        set.spawn(async move {
            let _permit = permits.acquire_owned().await;
            let result = tokio::task::spawn_blocking(move || f(item)).await?;
            Ok::<_, JoinError>((index, result))
        });
    }

    let mut slots: Vec<Option<R>> = std::iter::repeat_with(|| None).take(len).collect();
    while let Some(joined) = set.join_next().await {
        let (index, result) = joined??;
        slots[index] = Some(result);
    }
    Ok(slots.into_iter().flatten().collect())
}
