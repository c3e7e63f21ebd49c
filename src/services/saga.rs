//! Compensation stack for multi-step writes that have no shared transaction.
//!
//! Each completed step registers how to undo itself. On failure the stack is
//! unwound newest first; every undo runs even if an earlier one failed, and
//! the failures are reported back so the caller can surface them.

use futures::future::{BoxFuture, FutureExt};
use std::future::Future;

type Undo = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send>;

struct Compensation {
    step: &'static str,
    undo: Undo,
}

#[derive(Default)]
pub struct CompensationStack {
    compensations: Vec<Compensation>,
}

/// What happened while unwinding.
#[derive(Debug, Default)]
pub struct UnwindReport {
    pub undone: Vec<&'static str>,
    pub failed: Vec<(&'static str, String)>,
}

impl UnwindReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failed_steps(&self) -> String {
        self.failed
            .iter()
            .map(|(step, err)| format!("{step} ({err})"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl CompensationStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<F, Fut>(&mut self, step: &'static str, undo: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.compensations.push(Compensation {
            step,
            undo: Box::new(move || undo().boxed()),
        });
    }

    pub fn len(&self) -> usize {
        self.compensations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compensations.is_empty()
    }

    /// Drops the registered undos: every step succeeded.
    pub fn commit(mut self) {
        self.compensations.clear();
    }

    pub async fn unwind(mut self) -> UnwindReport {
        let mut report = UnwindReport::default();
        while let Some(Compensation { step, undo }) = self.compensations.pop() {
            match undo().await {
                Ok(()) => {
                    tracing::debug!("Compensated {}", step);
                    report.undone.push(step);
                }
                Err(err) => {
                    tracing::error!("Failed to compensate {}: {:#}", step, err);
                    report.failed.push((step, format!("{err:#}")));
                }
            }
        }
        report
    }
}
