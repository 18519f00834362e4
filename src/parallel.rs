//! Parallel loop with a trailing checkpoint
//!
//! Items from an ordered source are handed to a fixed set of worker slots.
//! After every completed item the driving thread emits a checkpoint that
//! never passes an item still in progress:
//!
//! - if some items are still in flight, the exclusive checkpoint of the
//!   oldest of them (everything before it is done)
//! - otherwise the inclusive checkpoint of the newest completed item
//!
//! Checkpoints are therefore emitted in source order and never go backwards,
//! whatever order the workers finish in.
//!
//! # Example
//!
//! ```
//! use chunk_scavenger::parallel::run_with_trailing_checkpoint;
//!
//! let mut emitted = Vec::new();
//! run_with_trailing_checkpoint(
//!     (0u32..4).map(Ok::<_, ()>),
//!     2,
//!     |item| Some(*item),
//!     |item| item.checked_sub(1),
//!     |_slot, _item| Ok(()),
//!     |checkpoint| {
//!         emitted.push(checkpoint);
//!         Ok(())
//!     },
//! )
//! .unwrap();
//!
//! assert_eq!(emitted.len(), 4);
//! assert_eq!(emitted.last(), Some(&Some(3)));
//! ```

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::thread;

use crossbeam::channel;

struct InFlight<C> {
    slot: usize,
    inclusive: C,
    exclusive: C,
    done: bool,
}

struct Completion<E> {
    slot: usize,
    outcome: thread::Result<Result<(), E>>,
}

enum Failure<E> {
    Error(E),
    Panic(Box<dyn Any + Send>),
}

/// Run `process` over `source` on `degree_of_parallelism` worker threads
///
/// `process` receives the slot index (`0..degree_of_parallelism`) and the
/// item. A slot processes one item at a time, so per-slot resources can be
/// indexed by it without contention. `emit_checkpoint` runs on the calling
/// thread after each item completes.
///
/// The checkpoint functions are evaluated on the calling thread when an
/// item is dispatched: `get_inclusive` gives the checkpoint meaning "this
/// item is done", `get_exclusive` the one meaning "everything before this
/// item is done".
///
/// The first error (from the source, an item or `emit_checkpoint`) stops
/// dispatching. Items already running are allowed to finish, then the error
/// is returned. A panic in `process` is re-raised on the calling thread once
/// every slot has stopped.
pub fn run_with_trailing_checkpoint<T, C, E, S, I, X, P, M>(
    source: S,
    degree_of_parallelism: usize,
    get_inclusive: I,
    get_exclusive: X,
    process: P,
    mut emit_checkpoint: M,
) -> Result<(), E>
where
    S: IntoIterator<Item = Result<T, E>>,
    T: Send,
    C: Clone,
    E: Send,
    I: Fn(&T) -> C,
    X: Fn(&T) -> C,
    P: Fn(usize, T) -> Result<(), E> + Sync,
    M: FnMut(C) -> Result<(), E>,
{
    let degree = degree_of_parallelism.max(1);
    let process = &process;

    let failure = thread::scope(|scope| {
        let (done_tx, done_rx) = channel::unbounded::<Completion<E>>();
        let mut senders = Vec::with_capacity(degree);

        for slot in 0..degree {
            let (tx, rx) = channel::bounded::<T>(1);
            let done_tx = done_tx.clone();
            scope.spawn(move || {
                for item in rx {
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| process(slot, item)));
                    if done_tx.send(Completion { slot, outcome }).is_err() {
                        break;
                    }
                }
            });
            senders.push(tx);
        }
        drop(done_tx);

        let mut source = source.into_iter();
        let mut free: VecDeque<usize> = (0..degree).collect();
        let mut in_flight: VecDeque<InFlight<C>> = VecDeque::with_capacity(degree);
        let mut failure: Option<Failure<E>> = None;
        let mut exhausted = false;

        loop {
            while failure.is_none() && !exhausted {
                let Some(slot) = free.pop_front() else {
                    break;
                };
                match source.next() {
                    None => {
                        exhausted = true;
                        free.push_front(slot);
                    }
                    Some(Err(err)) => {
                        failure = Some(Failure::Error(err));
                        free.push_front(slot);
                    }
                    Some(Ok(item)) => {
                        in_flight.push_back(InFlight {
                            slot,
                            inclusive: get_inclusive(&item),
                            exclusive: get_exclusive(&item),
                            done: false,
                        });
                        // never blocks: the slot is free so its queue is empty
                        if senders[slot].send(item).is_err() {
                            in_flight.pop_back();
                            free.push_back(slot);
                        }
                    }
                }
            }

            if in_flight.is_empty() {
                break;
            }

            let Ok(completion) = done_rx.recv() else {
                break;
            };
            free.push_back(completion.slot);

            match completion.outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    if failure.is_none() {
                        failure = Some(Failure::Error(err));
                    }
                }
                Err(payload) => {
                    if !matches!(failure, Some(Failure::Panic(_))) {
                        failure = Some(Failure::Panic(payload));
                    }
                }
            }

            if failure.is_some() {
                in_flight.retain(|entry| !entry.done && entry.slot != completion.slot);
                continue;
            }

            if let Some(entry) = in_flight
                .iter_mut()
                .find(|entry| entry.slot == completion.slot && !entry.done)
            {
                entry.done = true;
            }

            let mut newest_done = None;
            while in_flight.front().map_or(false, |entry| entry.done) {
                newest_done = in_flight.pop_front();
            }

            let checkpoint = match (in_flight.front(), newest_done) {
                (Some(oldest_running), _) => Some(oldest_running.exclusive.clone()),
                (None, Some(newest)) => Some(newest.inclusive),
                (None, None) => None,
            };

            if let Some(checkpoint) = checkpoint {
                if let Err(err) = emit_checkpoint(checkpoint) {
                    failure = Some(Failure::Error(err));
                }
            }
        }

        // closing the queues stops the workers
        drop(senders);
        failure
    });

    match failure {
        None => Ok(()),
        Some(Failure::Error(err)) => Err(err),
        Some(Failure::Panic(payload)) => panic::resume_unwind(payload),
    }
}
