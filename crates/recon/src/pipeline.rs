//! Channel-connected pipeline stages.
//!
//! Every stage owns its threads and hands back the receiving end of a bounded
//! channel. A stage's output closes once its input is drained and all of its
//! threads have exited, so closes travel strictly downstream. When the
//! downstream receiver is dropped, the failed send ends the stage loop.

use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

/// Capacity of every inter-stage channel.
pub const CHANNEL_CAPACITY: usize = 10;

/// Fan `input` out to `workers` threads (at least one) applying `f`.
///
/// Output order is not preserved when more than one worker runs.
pub fn spawn_workers<In, Out, F>(input: Receiver<In>, workers: usize, f: F) -> Receiver<Out>
where
    In: Send + 'static,
    Out: Send + 'static,
    F: Fn(In) -> Out + Send + Sync + 'static,
{
    let (tx, rx) = mpsc::sync_channel(CHANNEL_CAPACITY);
    let input = Arc::new(Mutex::new(input));
    let f = Arc::new(f);

    for worker in 0..workers.max(1) {
        let input = Arc::clone(&input);
        let tx: SyncSender<Out> = tx.clone();
        let f = Arc::clone(&f);
        thread::spawn(move || loop {
            // Hold the lock only for the receive.
            let next = input.lock().unwrap_or_else(PoisonError::into_inner).recv();
            let Ok(item) = next else { break };
            if tx.send(f(item)).is_err() {
                log::warn!("pipeline: worker {worker} stopped, downstream closed");
                break;
            }
        });
    }

    rx
}

/// Single-threaded filter/map. Only `Some` results are forwarded, in
/// input order.
pub fn transform<In, Out, F>(input: Receiver<In>, mut f: F) -> Receiver<Out>
where
    In: Send + 'static,
    Out: Send + 'static,
    F: FnMut(In) -> Option<Out> + Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel(CHANNEL_CAPACITY);
    thread::spawn(move || {
        for item in input {
            let Some(out) = f(item) else { continue };
            if tx.send(out).is_err() {
                log::warn!("pipeline: transform stopped, downstream closed");
                break;
            }
        }
    });
    rx
}

/// Merge several receivers into one. Per-source order is kept; the
/// interleaving across sources is arbitrary.
pub fn combine<T: Send + 'static>(inputs: Vec<Receiver<T>>) -> Receiver<T> {
    let (tx, rx) = mpsc::sync_channel(CHANNEL_CAPACITY);
    for (lane, input) in inputs.into_iter().enumerate() {
        let tx: SyncSender<T> = tx.clone();
        thread::spawn(move || {
            for item in input {
                if tx.send(item).is_err() {
                    log::warn!("pipeline: combine lane {lane} stopped, downstream closed");
                    break;
                }
            }
        });
    }
    rx
}

/// Feed an iterator into a fresh bounded channel from a background thread.
pub fn from_iter<I>(items: I) -> Receiver<I::Item>
where
    I: IntoIterator + Send + 'static,
    I::Item: Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel(CHANNEL_CAPACITY);
    thread::spawn(move || {
        for item in items {
            if tx.send(item).is_err() {
                break;
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workers_process_every_item() {
        let rx = spawn_workers(from_iter(0..100), 4, |n: i32| n * 2);
        let mut out: Vec<i32> = rx.iter().collect();
        out.sort();
        assert_eq!(out, (0..100).map(|n| n * 2).collect::<Vec<_>>());
    }

    #[test]
    fn zero_workers_means_one() {
        let rx = spawn_workers(from_iter(vec!["a", "b"]), 0, |s: &str| s.to_uppercase());
        assert_eq!(rx.iter().collect::<Vec<_>>(), vec!["A", "B"]);
    }

    #[test]
    fn empty_input_closes_output() {
        let rx = spawn_workers(from_iter(Vec::<u8>::new()), 3, |b| b);
        assert_eq!(rx.iter().count(), 0);
    }

    #[test]
    fn transform_filters_and_keeps_order() {
        let rx = transform(from_iter(0..20), |n: u32| (n % 3 == 0).then_some(n + 1));
        assert_eq!(rx.iter().collect::<Vec<_>>(), vec![1, 4, 7, 10, 13, 16, 19]);
    }

    #[test]
    fn transform_can_hold_state() {
        let mut seen = 0;
        let rx = transform(from_iter(vec![5, 5, 5]), move |n: i32| {
            seen += n;
            Some(seen)
        });
        assert_eq!(rx.iter().collect::<Vec<_>>(), vec![5, 10, 15]);
    }

    #[test]
    fn combine_keeps_per_source_order() {
        let rx = combine(vec![from_iter(vec![1, 2, 3]), from_iter(vec![10, 20, 30])]);
        let out: Vec<i32> = rx.iter().collect();
        assert_eq!(out.len(), 6);
        let low: Vec<_> = out.iter().copied().filter(|n| *n < 10).collect();
        let high: Vec<_> = out.iter().copied().filter(|n| *n >= 10).collect();
        assert_eq!(low, vec![1, 2, 3]);
        assert_eq!(high, vec![10, 20, 30]);
    }

    #[test]
    fn combine_of_nothing_is_closed() {
        let rx = combine(Vec::<Receiver<u8>>::new());
        assert!(rx.recv().is_err());
    }

    #[test]
    fn dropped_receiver_stops_stage() {
        let rx = spawn_workers(from_iter(0..10_000), 2, |n: u32| n);
        assert!(rx.recv().is_ok());
        drop(rx);
        // Workers exit on the failed send; nothing to join, just make sure
        // we don't hang here.
    }
}
