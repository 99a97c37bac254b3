//! The reconciler worker pool.
//!
//! Each worker leases one changeset at a time, plans, executes, and writes the
//! outcome back under its lease. The lease is renewed before every operation
//! after the first. The store's lease is the only mutual exclusion; workers
//! share nothing else.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, info, warn};

use batches_core::{
    CasResult, Changeset, ChangesetId, ChangesetSpec, ChangesetSpecId, Clock, Lease,
    ReconcilerState, Store,
};

use crate::config::ReconcilerConfig;
use crate::error::ReconcilerError;
use crate::executor::Executor;
use crate::plan::{determine_plan, Operation, Operations, Plan};
use crate::source::ChangesetSource;

/// What one reconcile attempt did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    pub changeset_id: ChangesetId,
    /// Planned operations; empty when planning itself failed.
    pub ops: Operations,
    pub state: ReconcilerState,
    pub failure_message: Option<String>,
    /// When the next automatic retry becomes due, if one is scheduled.
    pub retry_at: Option<DateTime<Utc>>,
    pub write_back: CasResult,
}

pub struct Reconciler<S: Store> {
    store: Arc<S>,
    source: Arc<dyn ChangesetSource>,
    clock: Arc<dyn Clock>,
    config: ReconcilerConfig,
}

impl<S: Store> Clone for Reconciler<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            source: Arc::clone(&self.source),
            clock: Arc::clone(&self.clock),
            config: self.config.clone(),
        }
    }
}

impl<S: Store> Reconciler<S> {
    pub fn new(
        store: Arc<S>,
        source: Arc<dyn ChangesetSource>,
        clock: Arc<dyn Clock>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            store,
            source,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // One attempt
    // -----------------------------------------------------------------------

    /// Lease the next due changeset and reconcile it.
    ///
    /// Returns `Ok(None)` when the queue has nothing due. Failures of the
    /// attempt itself are recorded on the row, not returned; only store
    /// errors around leasing and write-back surface here.
    pub async fn reconcile_next(&self, worker_id: &str) -> Result<Option<Attempt>, ReconcilerError> {
        let leased = self
            .store
            .lease_next_changeset(worker_id, self.clock.now(), self.config.lease_duration())
            .await?;
        let Some((changeset, mut lease)) = leased else {
            return Ok(None);
        };
        info!(changeset_id = %changeset.id, worker_id, "leased changeset");

        let mut outcome = changeset;
        let mut ops = Operations::default();
        let result = match self.plan(&outcome).await {
            Ok((plan, current)) => {
                ops = plan.ops.clone();
                debug!(changeset_id = %outcome.id, ops = %plan.ops, "determined plan");
                self.execute(&plan, current.as_ref(), &mut outcome, &mut lease)
                    .await
            }
            Err(err) => Err(err),
        };

        let now = self.clock.now();
        match result {
            Ok(()) => {
                outcome.reconciler_state = ReconcilerState::Completed;
                outcome.failure_message = None;
                outcome.num_failures = 0;
                outcome.process_after = None;
            }
            Err(err) => self.record_failure(&mut outcome, &err, now),
        }
        outcome.updated_at = now;

        let write_back = self.store.finish_lease(&lease, &outcome).await?;
        match write_back {
            CasResult::Success => info!(
                changeset_id = %outcome.id,
                state = %outcome.reconciler_state,
                "reconcile finished"
            ),
            CasResult::LeaseLost => warn!(
                changeset_id = %outcome.id,
                worker_id,
                "lease lost before write-back; outcome dropped"
            ),
            CasResult::NotFound => warn!(
                changeset_id = %outcome.id,
                "changeset deleted while reconciling"
            ),
        }

        Ok(Some(Attempt {
            changeset_id: outcome.id,
            ops,
            state: outcome.reconciler_state,
            failure_message: outcome.failure_message,
            retry_at: outcome.process_after,
            write_back,
        }))
    }

    async fn plan(
        &self,
        changeset: &Changeset,
    ) -> Result<(Plan, Option<ChangesetSpec>), ReconcilerError> {
        let previous = self.load_spec(changeset.previous_spec_id).await?;
        let current = self.load_spec(changeset.current_spec_id).await?;
        let plan = determine_plan(previous.as_ref(), current.as_ref(), changeset)?;
        Ok((plan, current))
    }

    async fn execute(
        &self,
        plan: &Plan,
        current: Option<&ChangesetSpec>,
        changeset: &mut Changeset,
        lease: &mut Lease,
    ) -> Result<(), ReconcilerError> {
        if plan.ops.is_empty() {
            return Ok(());
        }
        let repo = self
            .store
            .get_repo(changeset.repo_id)
            .await?
            .ok_or(ReconcilerError::RepoNotFound(changeset.repo_id))?;
        let executor = Executor::new(
            self.source.as_ref(),
            self.clock.as_ref(),
            self.config.sleep_after_push(),
        );
        let push = current.and_then(ChangesetSpec::branch_push);
        for (n, &op) in plan.ops.iter().enumerate() {
            if n > 0 {
                self.renew(lease, op).await?;
            }
            executor.execute_op(op, &repo, push, changeset).await?;
        }
        Ok(())
    }

    async fn renew(&self, lease: &mut Lease, op: Operation) -> Result<(), ReconcilerError> {
        let renewed = self
            .store
            .renew_lease(lease, self.clock.now(), self.config.lease_duration())
            .await?;
        if renewed.is_success() {
            return Ok(());
        }
        Err(ReconcilerError::LeaseLost {
            changeset_id: lease.changeset_id,
            op,
        })
    }

    async fn load_spec(
        &self,
        id: Option<ChangesetSpecId>,
    ) -> Result<Option<ChangesetSpec>, ReconcilerError> {
        let Some(id) = id else {
            return Ok(None);
        };
        self.store
            .get_changeset_spec(id)
            .await?
            .map(Some)
            .ok_or(ReconcilerError::SpecNotFound(id))
    }

    fn record_failure(&self, changeset: &mut Changeset, err: &ReconcilerError, now: DateTime<Utc>) {
        let retry = &self.config.retry;
        changeset.reconciler_state = ReconcilerState::Errored;
        changeset.failure_message = Some(err.to_string());
        changeset.num_failures = changeset.num_failures.saturating_add(1);

        if err.is_retryable() && retry.should_retry(changeset.num_failures) {
            let backoff = retry.backoff(changeset.num_failures);
            let delay = chrono::Duration::from_std(backoff).unwrap_or(chrono::Duration::zero());
            changeset.process_after = Some(now + delay);
            warn!(
                changeset_id = %changeset.id,
                attempt = changeset.num_failures,
                backoff_secs = backoff.as_secs(),
                error = %err,
                "reconcile failed; retry scheduled"
            );
        } else {
            changeset.process_after = None;
            warn!(
                changeset_id = %changeset.id,
                attempt = changeset.num_failures,
                error = %err,
                "reconcile failed; giving up"
            );
        }
    }

    // -----------------------------------------------------------------------
    // Queue maintenance
    // -----------------------------------------------------------------------

    /// Requeue due retries and reclaim expired leases.
    pub async fn housekeeping(&self) -> Result<(usize, usize), ReconcilerError> {
        let now = self.clock.now();
        let requeued = self
            .store
            .requeue_due_errored(now, self.config.retry.max_attempts)
            .await?;
        let reclaimed = self.store.reset_expired_leases(now).await?;
        if requeued > 0 || reclaimed > 0 {
            info!(requeued, reclaimed, "queue housekeeping");
        }
        Ok((requeued, reclaimed))
    }

    // -----------------------------------------------------------------------
    // Pool
    // -----------------------------------------------------------------------

    /// Run the worker pool until `shutdown` fires.
    ///
    /// A worker finishes its in-flight attempt before it observes shutdown.
    pub async fn run(&self, shutdown: broadcast::Sender<()>) -> Result<(), ReconcilerError> {
        let workers = self.config.workers.max(1);
        info!(workers, "starting reconciler");

        let mut handles = Vec::with_capacity(workers + 1);
        for n in 0..workers {
            let reconciler = self.clone();
            let shutdown_rx = shutdown.subscribe();
            let worker_id = format!("worker-{n}");
            handles.push((
                worker_id.clone(),
                tokio::spawn(async move { reconciler.worker_loop(worker_id, shutdown_rx).await }),
            ));
        }

        let housekeeper = {
            let reconciler = self.clone();
            let shutdown_rx = shutdown.subscribe();
            tokio::spawn(async move { reconciler.housekeeping_loop(shutdown_rx).await })
        };
        handles.push(("housekeeping".to_string(), housekeeper));

        for (task, handle) in handles {
            handle_join(&task, handle.await)?;
        }
        info!("reconciler stopped");
        Ok(())
    }

    async fn worker_loop(
        self,
        worker_id: String,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<(), ReconcilerError> {
        loop {
            if !matches!(shutdown_rx.try_recv(), Err(TryRecvError::Empty)) {
                break;
            }
            match self.reconcile_next(&worker_id).await {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(err) => warn!(worker_id = %worker_id, error = %err, "reconcile attempt failed"),
            }
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
            }
        }
        debug!(worker_id = %worker_id, "worker stopped");
        Ok(())
    }

    async fn housekeeping_loop(
        self,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<(), ReconcilerError> {
        let mut interval = tokio::time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = interval.tick() => {
                    if let Err(err) = self.housekeeping().await {
                        warn!(error = %err, "queue housekeeping failed");
                    }
                }
            }
        }
        Ok(())
    }
}

fn handle_join(
    task: &str,
    result: Result<Result<(), ReconcilerError>, tokio::task::JoinError>,
) -> Result<(), ReconcilerError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(ReconcilerError::Join(format!("{task} task join failure: {err}"))),
    }
}
