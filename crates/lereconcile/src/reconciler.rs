use std::collections::BTreeSet;

use lereprise::{compensation_retry, success, RetryExecutor, RollbackCoordinator};
use serde::Serialize;
use tracing::{info, warn};

use crate::confirm::Confirm;
use crate::plan::{PlanAction, PlanEntry, ReconcilePlan};
use crate::resource::{is_conflict, Resource};
use crate::{ReconcileError, Result};

/// Outcome of a reconciliation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    /// The plan that was shown.
    pub plan: ReconcilePlan,
    /// Resources created by this run, in creation order.
    pub created: Vec<String>,
    /// Resources that appeared between planning and creation.
    pub conflicts: Vec<String>,
    /// Resources left alone because they already existed.
    pub skipped: Vec<String>,
    /// False for dry runs and no-op plans.
    pub applied: bool,
}

/// Diffs declared resources against what exists and creates the delta.
pub struct Reconciler {
    resources: Vec<Box<dyn Resource>>,
    retry: RetryExecutor,
}

impl Reconciler {
    /// Reconciler over `resources` in declared order.
    pub fn new(resources: Vec<Box<dyn Resource>>, retry: RetryExecutor) -> Result<Self> {
        let mut seen = BTreeSet::new();
        for resource in &resources {
            if !seen.insert(resource.name().to_string()) {
                return Err(ReconcileError::DuplicateResource(resource.name().to_string()));
            }
        }
        Ok(Self { resources, retry })
    }

    /// Declared resources.
    pub fn resources(&self) -> &[Box<dyn Resource>] {
        &self.resources
    }

    /// Classify every resource. Existence checks run under the retry policy.
    pub fn plan(&self) -> Result<ReconcilePlan> {
        let mut entries = Vec::with_capacity(self.resources.len());
        for resource in &self.resources {
            let description = format!("check {} `{}`", resource.kind(), resource.name());
            let exists = self
                .retry
                .execute(&description, |_| resource.exists())
                .map_err(|err| ReconcileError::ExistenceUnknown {
                    name: resource.name().to_string(),
                    attempts: err.attempts,
                    source: err.last_error,
                })?;

            entries.push(PlanEntry {
                name: resource.name().to_string(),
                kind: resource.kind().to_string(),
                action: if exists {
                    PlanAction::Skip
                } else {
                    PlanAction::Create
                },
            });
        }
        Ok(ReconcilePlan { entries })
    }

    /// Create every resource `plan` marks for creation, in declared order.
    ///
    /// A conflict is a skip. Any other failure deletes what this call
    /// created, newest first, and aborts. Each delete gets one retry.
    pub fn apply(&self, plan: &ReconcilePlan) -> Result<ApplyReport> {
        let mut report = ApplyReport {
            plan: plan.clone(),
            skipped: plan.to_skip().into_iter().map(str::to_string).collect(),
            applied: true,
            ..ApplyReport::default()
        };
        let to_create: BTreeSet<&str> = plan.to_create().into_iter().collect();
        let mut rollback = RollbackCoordinator::new().with_retry(compensation_retry(&self.retry));

        for resource in &self.resources {
            let resource: &dyn Resource = resource.as_ref();
            let name = resource.name();
            if !to_create.contains(name) {
                continue;
            }

            let description = format!("create {} `{name}`", resource.kind());
            match self
                .retry
                .execute_classified(&description, |_| resource.create(), |err| !is_conflict(err))
            {
                Ok(()) => {
                    success!(resource = name, kind = resource.kind(), "resource created");
                    report.created.push(name.to_string());
                    if resource.is_deletable() {
                        rollback.record(name, move || resource.delete());
                    } else {
                        rollback.record_irreversible(name);
                    }
                }
                Err(err) if is_conflict(&err.last_error) => {
                    info!(resource = name, "already exists; skipping");
                    report.conflicts.push(name.to_string());
                }
                Err(err) => {
                    let rollback = rollback.unwind();
                    if rollback.requires_manual_intervention() {
                        warn!("{}", rollback.summary());
                    }
                    return Err(ReconcileError::CreateFailed {
                        name: name.to_string(),
                        attempts: err.attempts,
                        source: err.last_error,
                        rollback,
                    });
                }
            }
        }

        info!(
            created = report.created.len(),
            conflicts = report.conflicts.len(),
            skipped = report.skipped.len(),
            "reconciliation applied"
        );
        Ok(report)
    }

    /// Plan, present, confirm and apply.
    ///
    /// `dry_run` stops after presenting the plan. A plan with nothing to
    /// create never prompts.
    pub fn reconcile(&self, confirm: &mut dyn Confirm, dry_run: bool) -> Result<ApplyReport> {
        let plan = self.plan()?;
        for line in plan.render().lines() {
            info!("{line}");
        }

        if dry_run || plan.is_noop() {
            if plan.is_noop() {
                success!(resources = plan.entries.len(), "all resources already exist");
            }
            return Ok(ApplyReport {
                skipped: plan.to_skip().into_iter().map(str::to_string).collect(),
                plan,
                ..ApplyReport::default()
            });
        }

        if !confirm.confirm(&plan)? {
            return Err(ReconcileError::Declined);
        }
        self.apply(&plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confirm::AutoApprove;
    use crate::resource::AlreadyExists;
    use lereprise::{RecordingSleeper, RetryPolicy};
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;
    use std::sync::Arc;
    use std::time::Duration;

    type Log = Rc<RefCell<Vec<String>>>;

    struct Fake {
        name: &'static str,
        exists: std::result::Result<bool, &'static str>,
        create: std::result::Result<(), &'static str>,
        deletable: bool,
        log: Log,
    }

    impl Resource for Fake {
        fn name(&self) -> &str {
            self.name
        }
        fn exists(&self) -> anyhow::Result<bool> {
            self.exists.map_err(|m| anyhow::anyhow!(m))
        }
        fn create(&self) -> anyhow::Result<()> {
            self.log.borrow_mut().push(format!("create {}", self.name));
            match self.create {
                Ok(()) => Ok(()),
                Err("conflict") => Err(AlreadyExists(self.name.to_string()).into()),
                Err(m) => Err(anyhow::anyhow!(m)),
            }
        }
        fn is_deletable(&self) -> bool {
            self.deletable
        }
        fn delete(&self) -> anyhow::Result<()> {
            self.log.borrow_mut().push(format!("delete {}", self.name));
            Ok(())
        }
    }

    fn fake(name: &'static str, exists: bool, log: &Log) -> Box<dyn Resource> {
        Box::new(Fake {
            name,
            exists: Ok(exists),
            create: Ok(()),
            deletable: true,
            log: Rc::clone(log),
        })
    }

    fn retry() -> (RetryExecutor, Arc<RecordingSleeper>) {
        let sleeper = Arc::new(RecordingSleeper::default());
        let executor = RetryExecutor::new(RetryPolicy::fixed(3, Duration::from_secs(1)))
            .with_sleeper(sleeper.clone());
        (executor, sleeper)
    }

    #[test]
    fn conflict_during_apply_is_a_skip_without_retry() {
        let log: Log = Rc::default();
        let (executor, sleeper) = retry();
        let resources: Vec<Box<dyn Resource>> = vec![Box::new(Fake {
            name: "assets",
            exists: Ok(false),
            create: Err("conflict"),
            deletable: true,
            log: Rc::clone(&log),
        })];

        let reconciler = Reconciler::new(resources, executor).expect("reconciler");
        let report = reconciler
            .reconcile(&mut AutoApprove, false)
            .expect("conflict is not an error");

        assert_eq!(report.conflicts, vec!["assets"]);
        assert!(report.created.is_empty());
        assert_eq!(log.borrow().len(), 1);
        assert!(sleeper.delays().is_empty());
    }

    #[test]
    fn failed_create_deletes_earlier_creations_in_reverse() {
        let log: Log = Rc::default();
        let (executor, sleeper) = retry();
        let resources: Vec<Box<dyn Resource>> = vec![
            fake("network", false, &log),
            Box::new(Fake {
                name: "dns-zone",
                exists: Ok(false),
                create: Ok(()),
                deletable: false,
                log: Rc::clone(&log),
            }),
            fake("bucket", false, &log),
            Box::new(Fake {
                name: "vm",
                exists: Ok(false),
                create: Err("quota exceeded"),
                deletable: true,
                log: Rc::clone(&log),
            }),
        ];

        let reconciler = Reconciler::new(resources, executor).expect("reconciler");
        let err = reconciler
            .reconcile(&mut AutoApprove, false)
            .expect_err("must fail");

        match &err {
            ReconcileError::CreateFailed {
                name,
                attempts,
                rollback,
                ..
            } => {
                assert_eq!(name, "vm");
                assert_eq!(*attempts, 3);
                assert_eq!(rollback.reverted, vec!["bucket", "network"]);
                assert_eq!(rollback.irreversible, vec!["dns-zone"]);
                assert!(rollback.requires_manual_intervention());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(sleeper.delays().len(), 2);
        let log = log.borrow();
        assert_eq!(
            log[log.len() - 2..],
            ["delete bucket".to_string(), "delete network".to_string()]
        );
    }

    /// Delete fails the first `failures` times, then succeeds.
    struct FlakyDelete {
        name: &'static str,
        failures: u32,
        deletes: Rc<Cell<u32>>,
    }

    impl Resource for FlakyDelete {
        fn name(&self) -> &str {
            self.name
        }
        fn exists(&self) -> anyhow::Result<bool> {
            Ok(false)
        }
        fn create(&self) -> anyhow::Result<()> {
            Ok(())
        }
        fn is_deletable(&self) -> bool {
            true
        }
        fn delete(&self) -> anyhow::Result<()> {
            self.deletes.set(self.deletes.get() + 1);
            if self.deletes.get() <= self.failures {
                Err(anyhow::anyhow!("bucket not empty yet"))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn failed_delete_during_rollback_is_retried_once() {
        let log: Log = Rc::default();
        let (executor, sleeper) = retry();
        let once = Rc::new(Cell::new(0));
        let never = Rc::new(Cell::new(0));
        let resources: Vec<Box<dyn Resource>> = vec![
            Box::new(FlakyDelete {
                name: "logs",
                failures: u32::MAX,
                deletes: Rc::clone(&never),
            }),
            Box::new(FlakyDelete {
                name: "assets",
                failures: 1,
                deletes: Rc::clone(&once),
            }),
            Box::new(Fake {
                name: "vm",
                exists: Ok(false),
                create: Err("quota exceeded"),
                deletable: true,
                log: Rc::clone(&log),
            }),
        ];

        let reconciler = Reconciler::new(resources, executor).expect("reconciler");
        let err = reconciler
            .reconcile(&mut AutoApprove, false)
            .expect_err("must fail");

        assert_eq!(once.get(), 2);
        assert_eq!(never.get(), 2);
        match &err {
            ReconcileError::CreateFailed { rollback, .. } => {
                assert_eq!(rollback.reverted, vec!["assets"]);
                assert_eq!(rollback.failed.len(), 1);
                assert_eq!(rollback.failed[0].step, "logs");
            }
            other => panic!("unexpected error: {other}"),
        }
        // Two waits for the create, one per retried delete.
        assert_eq!(sleeper.delays().len(), 4);
    }

    #[test]
    fn unknown_existence_is_an_error_not_a_guess() {
        let log: Log = Rc::default();
        let (executor, sleeper) = retry();
        let resources: Vec<Box<dyn Resource>> = vec![Box::new(Fake {
            name: "assets",
            exists: Err("503 backend unavailable"),
            create: Ok(()),
            deletable: true,
            log: Rc::clone(&log),
        })];

        let reconciler = Reconciler::new(resources, executor).expect("reconciler");
        let err = reconciler
            .reconcile(&mut AutoApprove, false)
            .expect_err("must fail");

        assert!(matches!(
            err,
            ReconcileError::ExistenceUnknown { ref name, attempts: 3, .. } if name == "assets"
        ));
        assert_eq!(sleeper.delays().len(), 2);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn dry_run_and_declined_plans_create_nothing() {
        let log: Log = Rc::default();
        let (executor, _) = retry();
        let reconciler =
            Reconciler::new(vec![fake("assets", false, &log)], executor).expect("reconciler");

        let report = reconciler
            .reconcile(&mut AutoApprove, true)
            .expect("dry run");
        assert!(!report.applied);
        assert_eq!(report.plan.to_create(), vec!["assets"]);

        struct Decline(Cell<u32>);
        impl Confirm for Decline {
            fn confirm(&mut self, _plan: &ReconcilePlan) -> std::io::Result<bool> {
                self.0.set(self.0.get() + 1);
                Ok(false)
            }
        }
        let mut decline = Decline(Cell::new(0));
        let err = reconciler
            .reconcile(&mut decline, false)
            .expect_err("declined");
        assert!(matches!(err, ReconcileError::Declined));
        assert_eq!(decline.0.get(), 1);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let log: Log = Rc::default();
        let (executor, _) = retry();
        let err = Reconciler::new(
            vec![fake("assets", true, &log), fake("assets", false, &log)],
            executor,
        )
        .err()
        .expect("duplicate");
        assert!(matches!(err, ReconcileError::DuplicateResource(ref n) if n == "assets"));
    }
}
