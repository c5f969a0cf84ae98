//! The streaming producer's coroutine-with-queue: a single-producer,
//! multi-consumer bounded FIFO of intermediate chunks terminated by exactly
//! one sentinel item. Grounded in the original's `StreamingYielder`
//! (`examples/original_source/omniTask/models/task_result.py`), rebuilt on
//! `tokio::sync::broadcast` so every `StreamingTaskGroup` consuming the same
//! producer observes the identical sequence, including the terminal item.

use crate::result::ResultValue;
use serde_json::Value as Json;
use tokio::sync::broadcast;

/// One item observed on a yielder's stream: either an intermediate chunk
/// or the terminal item carrying the producer's final result.
#[derive(Debug, Clone)]
pub enum StreamItem {
    Chunk(Json),
    Done(Box<ResultValue>),
}

impl StreamItem {
    #[must_use]
    pub fn is_done(&self) -> bool {
        matches!(self, StreamItem::Done(_))
    }
}

/// Bounded broadcast channel a streaming producer yields into and any
/// number of `StreamingTaskGroup`s subscribe to. `complete` is idempotent:
/// the first caller wins, further `yield_chunk`/`complete` calls are no-ops.
#[derive(Debug, Clone)]
pub struct Yielder {
    sender: broadcast::Sender<StreamItem>,
    complete: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

impl Yielder {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            complete: std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> YielderStream {
        YielderStream {
            receiver: self.sender.subscribe(),
        }
    }

    /// Emit an intermediate chunk. Ignored once `complete` has been called.
    pub fn yield_chunk(&self, chunk: Json) {
        if self.complete.load(std::sync::atomic::Ordering::Acquire) {
            return;
        }
        // No subscribers is not an error: a late-joining consumer simply
        // misses chunks emitted before it subscribed, same as a lossy fan-out.
        let _ = self.sender.send(StreamItem::Chunk(chunk));
    }

    /// Emit the single terminal item carrying the producer's final result.
    /// Subsequent calls are no-ops, guaranteeing exactly one terminal item.
    pub fn complete(&self, final_result: ResultValue) {
        if self
            .complete
            .swap(true, std::sync::atomic::Ordering::AcqRel)
        {
            return;
        }
        let _ = self.sender.send(StreamItem::Done(Box::new(final_result)));
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.complete.load(std::sync::atomic::Ordering::Acquire)
    }
}

/// A consumer's view of a [`Yielder`]: iterate with [`next`](Self::next)
/// until it returns a [`StreamItem::Done`] or `None` (sender dropped
/// without completing, e.g. producer panicked).
pub struct YielderStream {
    receiver: broadcast::Receiver<StreamItem>,
}

impl YielderStream {
    /// Await the next item, skipping over any broadcast lag (a slow
    /// consumer falling behind loses the oldest un-read chunks, never the
    /// terminal one, since `complete` is always the last item sent).
    pub async fn next(&mut self) -> Option<StreamItem> {
        loop {
            match self.receiver.recv().await {
                Ok(item) => return Some(item),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn emits_chunks_then_single_terminal_item() {
        let yielder = Yielder::new(8);
        let mut stream = yielder.subscribe();

        yielder.yield_chunk(json!({"n": 1}));
        yielder.yield_chunk(json!({"n": 2}));
        yielder.complete(ResultValue::success(json!({"done": true})));
        yielder.complete(ResultValue::success(json!({"ignored": true})));

        let mut seen = Vec::new();
        while let Some(item) = stream.next().await {
            let done = item.is_done();
            seen.push(item);
            if done {
                break;
            }
        }

        assert_eq!(seen.len(), 3);
        assert!(seen[2].is_done());
        let StreamItem::Done(result) = &seen[2] else {
            unreachable!()
        };
        assert_eq!(result.output, json!({"done": true}));
    }

    #[tokio::test]
    async fn chunks_after_complete_are_ignored() {
        let yielder = Yielder::new(8);
        let mut stream = yielder.subscribe();
        yielder.complete(ResultValue::success(json!({})));
        yielder.yield_chunk(json!({"late": true}));

        let item = stream.next().await.unwrap();
        assert!(item.is_done());
    }

    #[tokio::test]
    async fn multiple_subscribers_observe_the_same_sequence() {
        let yielder = Yielder::new(8);
        let mut a = yielder.subscribe();
        let mut b = yielder.subscribe();

        yielder.yield_chunk(json!({"n": 1}));
        yielder.complete(ResultValue::success(json!({})));

        let a_first = a.next().await.unwrap();
        let b_first = b.next().await.unwrap();
        assert!(!a_first.is_done());
        assert!(!b_first.is_done());

        assert!(a.next().await.unwrap().is_done());
        assert!(b.next().await.unwrap().is_done());
    }
}
