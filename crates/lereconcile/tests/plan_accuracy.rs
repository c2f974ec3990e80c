//! Check-before-create behaviour over a realistic resource batch.

use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use lereconcile::{AutoApprove, PlanAction, PromptConfirm, Reconciler, Resource};
use lereprise::{RecordingSleeper, RetryExecutor, RetryPolicy};

struct Counted {
    name: &'static str,
    kind: &'static str,
    present: bool,
    creations: Rc<Cell<u32>>,
}

impl Resource for Counted {
    fn name(&self) -> &str {
        self.name
    }

    fn kind(&self) -> &str {
        self.kind
    }

    fn exists(&self) -> anyhow::Result<bool> {
        Ok(self.present)
    }

    fn create(&self) -> anyhow::Result<()> {
        self.creations.set(self.creations.get() + 1);
        Ok(())
    }
}

fn batch(creations: &Rc<Cell<u32>>) -> Vec<Box<dyn Resource>> {
    [
        ("artifacts", "bucket", true),
        ("deployer", "service-account", false),
        ("web", "firewall-rule", true),
    ]
    .into_iter()
    .map(|(name, kind, present)| {
        Box::new(Counted {
            name,
            kind,
            present,
            creations: Rc::clone(creations),
        }) as Box<dyn Resource>
    })
    .collect()
}

fn executor() -> RetryExecutor {
    RetryExecutor::new(RetryPolicy::fixed(5, Duration::from_secs(10)))
        .with_sleeper(Arc::new(RecordingSleeper::default()))
}

#[test]
fn two_of_three_existing_yields_exactly_one_creation() {
    let creations = Rc::new(Cell::new(0));
    let reconciler = Reconciler::new(batch(&creations), executor()).expect("reconciler");

    let plan = reconciler.plan().expect("plan");
    assert_eq!(plan.to_create(), vec!["deployer"]);
    assert_eq!(plan.to_skip(), vec!["artifacts", "web"]);
    assert_eq!(plan.entries[1].action, PlanAction::Create);

    let report = reconciler
        .reconcile(&mut AutoApprove, false)
        .expect("reconcile");
    assert!(report.applied);
    assert_eq!(report.created, vec!["deployer"]);
    assert_eq!(report.skipped, vec!["artifacts", "web"]);
    assert_eq!(creations.get(), 1);
}

#[test]
fn interactive_approval_applies_the_plan() {
    let creations = Rc::new(Cell::new(0));
    let reconciler = Reconciler::new(batch(&creations), executor()).expect("reconciler");

    let mut transcript = Vec::new();
    let mut prompt = PromptConfirm::new("yes\n".as_bytes(), &mut transcript);
    let report = reconciler.reconcile(&mut prompt, false).expect("reconcile");

    assert_eq!(report.created.len(), 1);
    assert_eq!(creations.get(), 1);
    assert!(String::from_utf8_lossy(&transcript).contains("Create 1 resource(s)?"));
}
