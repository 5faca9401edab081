//! Lazy sequence wrapper for generator jobs (spec §4.2 "Generators",
//! §4.4 "Generator handling").
//!
//! Rust has no stable generator syntax, so a generator job is any type
//! implementing [`JobGenerator`]: an object that can be repeatedly
//! `send`-ed a value and yields a step back. The wrapper
//! ([`GeneratorHandle`]) decouples *where* the generator instance lives
//! (the calling task for the local backend, a dedicated worker thread
//! for the thread backend, a spawned task standing in for a worker
//! process) from how callers advance it: every advance is a tiny
//! request/reply round trip over a channel, mirroring how the source
//! pins the live iterator in worker-local storage and dispatches a
//! one-shot task to advance it.

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use super::future::JobOutput;

/// The result of advancing a generator by one step.
pub enum GeneratorStep {
    /// The generator yielded an intermediate value; it is not finished.
    Yielded(JobOutput),
    /// The generator is exhausted; this is its final value (may be a
    /// unit value if the underlying sequence carries no "return value").
    Done(JobOutput),
    /// The generator raised; this is a terminal failure.
    Failed(anyhow::Error),
}

/// A type that can be driven step by step, sync or async under the hood.
#[async_trait]
pub trait JobGenerator: Send {
    /// Advance the generator. `None` corresponds to a plain `next()`;
    /// `Some(v)` corresponds to `send(v)`.
    async fn advance(&mut self, value: Option<JobOutput>) -> GeneratorStep;
}

struct GeneratorRequest {
    value: Option<JobOutput>,
    reply: oneshot::Sender<GeneratorStep>,
}

/// A live handle to a generator job, detached from wherever the
/// generator instance actually runs.
#[derive(Clone)]
pub struct GeneratorHandle {
    tx: mpsc::Sender<GeneratorRequest>,
}

impl GeneratorHandle {
    /// Spawn a driver task that owns `generator` and services advance
    /// requests in order; returns a handle to talk to it. Used by the
    /// local backend (driver runs on the engine's loop) and, with the
    /// generator constructed on a dedicated thread, by the thread backend.
    pub fn spawn<G>(generator: G) -> Self
    where
        G: JobGenerator + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<GeneratorRequest>(1);
        let mut generator = generator;
        tokio::spawn(async move {
            while let Some(req) = rx.recv().await {
                let step = generator.advance(req.value).await;
                let _ = req.reply.send(step);
            }
        });
        Self { tx }
    }

    /// Advance the generator with `next()` semantics.
    pub async fn next(&self) -> GeneratorStep {
        self.advance(None).await
    }

    /// Advance the generator with `send(value)` semantics.
    pub async fn send(&self, value: JobOutput) -> GeneratorStep {
        self.advance(Some(value)).await
    }

    async fn advance(&self, value: Option<JobOutput>) -> GeneratorStep {
        let (reply, reply_rx) = oneshot::channel();
        if self.tx.send(GeneratorRequest { value, reply }).await.is_err() {
            return GeneratorStep::Failed(anyhow::anyhow!("generator driver has stopped"));
        }
        match reply_rx.await {
            Ok(step) => step,
            Err(_) => GeneratorStep::Failed(anyhow::anyhow!("generator driver dropped the reply")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// A generator that accumulates sent values and yields the running
    /// total, matching spec §8 scenario 5.
    struct Accumulator {
        total: i64,
        calls: u32,
    }

    #[async_trait]
    impl JobGenerator for Accumulator {
        async fn advance(&mut self, value: Option<JobOutput>) -> GeneratorStep {
            self.calls += 1;
            if self.calls > 4 {
                return GeneratorStep::Done(Arc::new(self.total));
            }
            if let Some(v) = value {
                self.total += *v.downcast_ref::<i64>().unwrap();
            }
            GeneratorStep::Yielded(Arc::new(self.total))
        }
    }

    #[tokio::test]
    async fn accumulator_generator_yields_running_totals_then_completes() {
        let handle = GeneratorHandle::spawn(Accumulator { total: 0, calls: 0 });

        let step = handle.next().await;
        assert_yielded(step, 0);

        let step = handle.send(Arc::new(1_i64)).await;
        assert_yielded(step, 1);

        let step = handle.send(Arc::new(2_i64)).await;
        assert_yielded(step, 3);

        let step = handle.send(Arc::new(3_i64)).await;
        match step {
            GeneratorStep::Done(v) => assert_eq!(*v.downcast_ref::<i64>().unwrap(), 3),
            _ => panic!("expected Done"),
        }
    }

    fn assert_yielded(step: GeneratorStep, expected: i64) {
        match step {
            GeneratorStep::Yielded(v) => assert_eq!(*v.downcast_ref::<i64>().unwrap(), expected),
            _ => panic!("expected Yielded({expected})"),
        }
    }
}
