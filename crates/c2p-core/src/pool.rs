//! Bounded worker pool on scoped threads.
//!
//! Workers pull items from a shared queue and send `(index, result)` pairs
//! back over a channel. The calling thread consumes results as they arrive
//! and is the only place where shared run state is mutated. Every worker
//! enters the run span, so its log lines carry the run id.

use std::sync::mpsc;
use std::sync::{Mutex, PoisonError};
use std::thread;

use crate::context::RunContext;

/// A worker thread panicked; results may be incomplete.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{panicked} worker thread(s) panicked")]
pub struct PoolError {
    pub panicked: usize,
}

/// Run `work` over `items` on at most `max_workers` threads.
///
/// `on_result` is called on the calling thread, in completion order, with
/// the index of the item in `items` and its result.
///
/// # Errors
///
/// Returns [`PoolError`] if any worker panicked. Results delivered before
/// the panic were already handed to `on_result`.
pub fn for_each_parallel<T, R, W, C>(
    ctx: &RunContext,
    items: Vec<T>,
    max_workers: usize,
    work: W,
    mut on_result: C,
) -> Result<(), PoolError>
where
    T: Send,
    R: Send,
    W: Fn(T) -> R + Sync,
    C: FnMut(usize, R),
{
    if items.is_empty() {
        return Ok(());
    }
    let workers = max_workers.clamp(1, items.len());
    let queue = Mutex::new(items.into_iter().enumerate());
    let (tx, rx) = mpsc::channel::<(usize, R)>();

    thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                let tx = tx.clone();
                let queue = &queue;
                let work = &work;
                scope.spawn(move || {
                    ctx.in_scope(|| {
                        loop {
                            let next = queue.lock().unwrap_or_else(PoisonError::into_inner).next();
                            let Some((idx, item)) = next else {
                                break;
                            };
                            if tx.send((idx, work(item))).is_err() {
                                break;
                            }
                        }
                    });
                })
            })
            .collect();
        drop(tx);

        for (idx, result) in rx {
            on_result(idx, result);
        }

        let panicked = handles
            .into_iter()
            .map(thread::ScopedJoinHandle::join)
            .filter(Result::is_err)
            .count();
        if panicked == 0 {
            Ok(())
        } else {
            Err(PoolError { panicked })
        }
    })
}

/// Like [`for_each_parallel`], collecting results in input order.
///
/// # Errors
///
/// Returns [`PoolError`] if any worker panicked.
pub fn map_parallel<T, R, W>(ctx: &RunContext, items: Vec<T>, max_workers: usize, work: W) -> Result<Vec<R>, PoolError>
where
    T: Send,
    R: Send,
    W: Fn(T) -> R + Sync,
{
    let mut slots: Vec<Option<R>> = std::iter::repeat_with(|| None).take(items.len()).collect();
    for_each_parallel(ctx, items, max_workers, work, |idx, result| {
        slots[idx] = Some(result);
    })?;
    Ok(slots.into_iter().flatten().collect())
}
