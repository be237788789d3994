//! Scheduler daemon loop.
//!
//! Idle-waits on a short poll cadence. A rebuild happens whenever any control
//! message arrived since the last poll or the forced rebuild interval has
//! elapsed; admission follows every rebuild unless paused.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use job_core::{ExecutionBackend, JobStore, Notifier, TaskDispatcher};
use tokio::time::{Instant, MissedTickBehavior};

use crate::admission::{AdmissionController, AdmissionReport};
use crate::blocking::BlockingRules;
use crate::builder::{BuildSummary, GraphBuilder};
use crate::config::SchedulerConfig;
use crate::context::SchedulingContext;
use crate::control::ControlReceiver;
use crate::error::SchedulerResult;

/// What one tick did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickOutcome {
    /// `None` when the rebuild was aborted or failed.
    pub build: Option<BuildSummary>,
    /// `None` when admission was skipped.
    pub admission: Option<AdmissionReport>,
}

pub struct SchedulerDaemon<R> {
    builder: GraphBuilder,
    admission: AdmissionController,
    control: R,
    ctx: SchedulingContext,
    poll_interval: Duration,
    rebuild_interval: Duration,
}

impl<R: ControlReceiver> SchedulerDaemon<R> {
    pub fn new(
        config: &SchedulerConfig,
        store: Arc<dyn JobStore>,
        backend: Arc<dyn ExecutionBackend>,
        dispatcher: Arc<dyn TaskDispatcher>,
        notifier: Arc<dyn Notifier>,
        control: R,
    ) -> Self {
        Self {
            builder: GraphBuilder::new(store.clone(), backend, notifier.clone()),
            admission: AdmissionController::new(store, dispatcher, notifier),
            control,
            ctx: SchedulingContext::new(config.capacity).paused(config.start_paused),
            poll_interval: config.poll_interval(),
            rebuild_interval: config.rebuild_interval(),
        }
    }

    pub fn with_rules(mut self, rules: BlockingRules) -> Self {
        self.builder = self.builder.with_rules(rules);
        self
    }

    pub fn context(&self) -> &SchedulingContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut SchedulingContext {
        &mut self.ctx
    }

    /// Rebuild, then admit unless paused.
    ///
    /// Store failures are logged and end the tick; the next tick retries.
    pub async fn tick(&mut self) -> TickOutcome {
        let build = match self.builder.rebuild(&mut self.ctx).await {
            Ok(summary) => summary,
            Err(e) => {
                tracing::error!(error = %e, "Graph rebuild failed");
                self.ctx.graph = None;
                None
            }
        };

        if build.is_none() {
            return TickOutcome::default();
        }

        let admission = if self.ctx.paused {
            tracing::debug!("Admission paused");
            None
        } else {
            Some(self.admission.admit(&mut self.ctx).await)
        };

        TickOutcome { build, admission }
    }

    /// Drain every queued control message. Returns whether any arrived.
    fn drain_control(&mut self) -> SchedulerResult<bool> {
        let mut received = false;
        while let Some(message) = self.control.try_recv()? {
            received = true;
            if let Some(paused) = message.pause {
                if paused != self.ctx.paused {
                    tracing::info!(paused, "Scheduler pause state changed");
                }
                self.ctx.paused = paused;
            }
        }
        Ok(received)
    }

    /// Run until `shutdown` resolves.
    ///
    /// Returns an error only when the control queue is gone.
    pub async fn run_until<F>(mut self, shutdown: F) -> SchedulerResult<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_rebuild: Option<Instant> = None;

        tracing::info!(
            capacity = self.ctx.capacity,
            paused = self.ctx.paused,
            "Scheduler daemon started"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {}
            }

            let woken = self.drain_control()?;
            let due = last_rebuild.map_or(true, |at| at.elapsed() >= self.rebuild_interval);
            if woken || due {
                self.tick().await;
                last_rebuild = Some(Instant::now());
            }
        }

        tracing::info!("Scheduler daemon stopped");
        Ok(())
    }
}
