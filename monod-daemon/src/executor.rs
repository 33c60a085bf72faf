//! Sequential executor: one FIFO queue, one worker, one object.
//!
//! Session handlers enqueue [`ExecRequest`]s and await their oneshot reply
//! slots; the worker runs on a blocking thread (method bodies are synchronous
//! and may block), dequeues in arrival order, and invokes the singleton. The
//! queue enforces total ordering across all sessions by enqueue time; no two
//! invocations ever overlap. There is no timeout on executor work — a
//! misbehaving method stalls every client.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::object::{CallError, ServiceObject};

/// Queue capacity; enqueueing past this backpressures session handlers.
const QUEUE_DEPTH: usize = 64;

/// One queued method invocation with its reply slot.
#[derive(Debug)]
pub(crate) struct ExecRequest {
    pub method: String,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
    pub reply: oneshot::Sender<Result<Value, CallError>>,
}

/// Spawn the worker inside the current tokio runtime.
///
/// The worker exits when every sender clone is dropped and the queue is
/// drained. Once `draining` is set, dequeued-but-unstarted requests are
/// answered with the shutting-down error instead of being executed; the
/// request already in flight when the flag flips completes normally.
pub(crate) fn spawn(
    object: Box<dyn ServiceObject>,
    draining: Arc<AtomicBool>,
) -> (mpsc::Sender<ExecRequest>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
    let join = tokio::task::spawn_blocking(move || worker(rx, object, draining));
    (tx, join)
}

fn worker(
    mut rx: mpsc::Receiver<ExecRequest>,
    mut object: Box<dyn ServiceObject>,
    draining: Arc<AtomicBool>,
) {
    while let Some(request) = rx.blocking_recv() {
        let ExecRequest {
            method,
            args,
            kwargs,
            reply,
        } = request;
        let outcome = if draining.load(Ordering::Acquire) {
            Err(CallError::shutting_down())
        } else {
            object.call(&method, &args, &kwargs)
        };
        if reply.send(outcome).is_err() {
            // Handler gave up on the reply (client gone); nothing to do.
            tracing::debug!(method = %method, "reply slot dropped before completion");
        }
    }
    tracing::debug!("executor drained, worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug)]
    struct Counter {
        value: i64,
    }

    impl ServiceObject for Counter {
        fn call(
            &mut self,
            method: &str,
            _args: &[Value],
            _kwargs: &Map<String, Value>,
        ) -> Result<Value, CallError> {
            match method {
                "inc" => {
                    self.value += 1;
                    Ok(json!(self.value))
                }
                "boom" => Err(CallError::new("RuntimeError", "nope")),
                other => Err(CallError::no_such_method(other)),
            }
        }
    }

    fn request(method: &str) -> (ExecRequest, oneshot::Receiver<Result<Value, CallError>>) {
        let (reply, rx) = oneshot::channel();
        (
            ExecRequest {
                method: method.to_string(),
                args: vec![],
                kwargs: Map::new(),
                reply,
            },
            rx,
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn requests_complete_in_enqueue_order() {
        let draining = Arc::new(AtomicBool::new(false));
        let (tx, join) = spawn(Box::new(Counter { value: 0 }), draining);

        let mut slots = Vec::new();
        for _ in 0..10 {
            let (req, rx) = request("inc");
            tx.send(req).await.expect("enqueue");
            slots.push(rx);
        }

        let mut values = Vec::new();
        for rx in slots {
            values.push(rx.await.expect("reply").expect("ok"));
        }
        let expected: Vec<Value> = (1..=10).map(|n| json!(n)).collect();
        assert_eq!(values, expected, "FIFO total order, no gaps, no duplicates");

        drop(tx);
        join.await.expect("worker exit");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn method_errors_reach_the_reply_slot() {
        let draining = Arc::new(AtomicBool::new(false));
        let (tx, join) = spawn(Box::new(Counter { value: 0 }), draining);

        let (req, rx) = request("boom");
        tx.send(req).await.expect("enqueue");
        let err = rx.await.expect("reply").unwrap_err();
        assert_eq!(err.kind, "RuntimeError");
        assert_eq!(err.message, "nope");

        // The object survives its own errors.
        let (req, rx) = request("inc");
        tx.send(req).await.expect("enqueue");
        assert_eq!(rx.await.expect("reply").expect("ok"), json!(1));

        drop(tx);
        join.await.expect("worker exit");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn draining_answers_queued_requests_with_shutdown_error() {
        let draining = Arc::new(AtomicBool::new(false));
        let (tx, join) = spawn(Box::new(Counter { value: 0 }), draining.clone());

        // Flag flips before these are dequeued.
        draining.store(true, Ordering::Release);

        let (req, rx) = request("inc");
        tx.send(req).await.expect("enqueue");
        let err = rx.await.expect("reply").unwrap_err();
        assert_eq!(err.kind, monod_wire::SHUTTING_DOWN_KIND);

        drop(tx);
        join.await.expect("worker exit");
    }
}
