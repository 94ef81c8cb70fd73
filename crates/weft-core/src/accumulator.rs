use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};

use crate::config::AccumulatorConfig;

/// Generic time/count-bounded batching buffer.
///
/// Items are fed in through [`add`](Accumulator::add); a background task
/// buffers them and flushes when any threshold fires: absolute item count,
/// maximum time since the first unflushed item, or maximum idle time since
/// the last added item. On flush the buffered items run through `reduce`
/// (e.g. last-write-wins by intent key) and the reduced set is handed to
/// `deliver`. Flushes happen in arrival order, one at a time.
///
/// Must be created inside a tokio runtime.
pub struct Accumulator<T> {
    tx: mpsc::UnboundedSender<T>,
    _task: JoinHandle<()>,
}

impl<T: Send + 'static> Accumulator<T> {
    pub fn new<R, D>(config: AccumulatorConfig, reduce: R, deliver: D) -> Self
    where
        R: Fn(Vec<T>) -> Vec<T> + Send + Sync + 'static,
        D: Fn(Vec<T>) + Send + Sync + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<T>();
        let task = tokio::spawn(async move {
            let mut buf: Vec<T> = Vec::new();
            let mut first_at: Option<Instant> = None;
            let mut last_at = Instant::now();

            let flush = |buf: &mut Vec<T>, first_at: &mut Option<Instant>| {
                let items = std::mem::take(buf);
                *first_at = None;
                if items.is_empty() {
                    return;
                }
                let reduced = reduce(items);
                if !reduced.is_empty() {
                    deliver(reduced);
                }
            };

            loop {
                let deadline = first_at
                    .map(|f| (f + config.max_batch_age).min(last_at + config.max_idle_age))
                    .unwrap_or_else(Instant::now);

                tokio::select! {
                    item = rx.recv() => match item {
                        Some(item) => {
                            buf.push(item);
                            last_at = Instant::now();
                            if first_at.is_none() {
                                first_at = Some(last_at);
                            }
                            if buf.len() >= config.max_items {
                                flush(&mut buf, &mut first_at);
                            }
                        }
                        // Feed closed: flush what is left and stop.
                        None => {
                            flush(&mut buf, &mut first_at);
                            break;
                        }
                    },
                    _ = sleep_until(deadline), if first_at.is_some() => {
                        flush(&mut buf, &mut first_at);
                    }
                }
            }
        });
        Self { tx, _task: task }
    }

    /// Adds an item; never blocks.
    pub fn add(&self, item: T) {
        let _ = self.tx.send(item);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn config(max_items: usize, batch_ms: u64, idle_ms: u64) -> AccumulatorConfig {
        AccumulatorConfig {
            max_items,
            max_batch_age: Duration::from_millis(batch_ms),
            max_idle_age: Duration::from_millis(idle_ms),
        }
    }

    fn collecting() -> (Arc<Mutex<Vec<Vec<(u32, u32)>>>>, impl Fn(Vec<(u32, u32)>)) {
        let flushes: Arc<Mutex<Vec<Vec<(u32, u32)>>>> = Arc::default();
        let sink = flushes.clone();
        (flushes, move |items| sink.lock().unwrap().push(items))
    }

    /// Last-write-wins by the first tuple element.
    fn reduce_by_key(items: Vec<(u32, u32)>) -> Vec<(u32, u32)> {
        let mut out = indexmap::IndexMap::new();
        for (k, v) in items {
            out.insert(k, v);
        }
        out.into_iter().collect()
    }

    #[tokio::test]
    async fn rapid_updates_to_one_key_deliver_once() {
        let (flushes, deliver) = collecting();
        let acc = Accumulator::new(config(10_000, 500, 200), reduce_by_key, deliver);

        for i in 0..1000 {
            acc.add((7, i));
        }
        tokio::time::sleep(Duration::from_millis(300)).await;

        let flushes = flushes.lock().unwrap();
        assert_eq!(flushes.len(), 1);
        assert_eq!(flushes[0], vec![(7, 999)]);
    }

    #[tokio::test]
    async fn item_count_threshold_forces_flush() {
        let (flushes, deliver) = collecting();
        let acc = Accumulator::new(config(3, 60_000, 60_000), |v| v, deliver);

        for i in 0..3 {
            acc.add((i, i));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(flushes.lock().unwrap().len(), 1);
        assert_eq!(flushes.lock().unwrap()[0].len(), 3);
    }

    #[tokio::test]
    async fn idle_threshold_flushes_partial_batch() {
        let (flushes, deliver) = collecting();
        let acc = Accumulator::new(config(1000, 60_000, 20), |v| v, deliver);

        acc.add((1, 1));
        acc.add((2, 2));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(flushes.lock().unwrap().len(), 1);
        assert_eq!(flushes.lock().unwrap()[0].len(), 2);
    }

    #[tokio::test]
    async fn batch_age_bounds_a_steady_trickle() {
        let (flushes, deliver) = collecting();
        let acc = Accumulator::new(config(1000, 80, 50), |v| v, deliver);

        // Keep idle resets coming faster than the idle threshold.
        for i in 0..10 {
            acc.add((i, i));
            tokio::time::sleep(Duration::from_millis(15)).await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(!flushes.lock().unwrap().is_empty());
        let total: usize = flushes.lock().unwrap().iter().map(Vec::len).sum();
        assert_eq!(total, 10);
    }
}
