use anyhow::{anyhow, Result};

use super::context::PhaseContext;

/// The work behind a phase, enabling test doubles.
///
/// `apply` must be idempotent: the sequencer may call it again after a crash
/// or a failed attempt that left partial state behind.
pub trait PhaseAction {
    /// Bring the host to the phase's end state.
    fn apply(&self, ctx: &PhaseContext) -> Result<()>;

    /// Idempotency predicate: true when the end state is already in place.
    fn is_applied(&self, _ctx: &PhaseContext) -> Result<bool> {
        Ok(false)
    }

    /// True when [`rollback`](Self::rollback) can undo `apply`.
    fn is_reversible(&self) -> bool {
        false
    }

    /// Best-effort reversal of `apply`.
    fn rollback(&self, _ctx: &PhaseContext) -> Result<()> {
        Err(anyhow!("phase is not reversible"))
    }
}

type ActionFn = Box<dyn Fn(&PhaseContext) -> Result<()>>;
type CheckFn = Box<dyn Fn(&PhaseContext) -> Result<bool>>;

/// Phase action assembled from closures.
pub struct FnAction {
    apply: ActionFn,
    check: Option<CheckFn>,
    undo: Option<ActionFn>,
}

impl FnAction {
    /// Action running `apply`.
    pub fn new<F>(apply: F) -> Self
    where
        F: Fn(&PhaseContext) -> Result<()> + 'static,
    {
        Self {
            apply: Box::new(apply),
            check: None,
            undo: None,
        }
    }

    /// Attach an idempotency predicate.
    pub fn with_check<F>(mut self, check: F) -> Self
    where
        F: Fn(&PhaseContext) -> Result<bool> + 'static,
    {
        self.check = Some(Box::new(check));
        self
    }

    /// Attach a compensation.
    pub fn with_rollback<F>(mut self, undo: F) -> Self
    where
        F: Fn(&PhaseContext) -> Result<()> + 'static,
    {
        self.undo = Some(Box::new(undo));
        self
    }
}

impl PhaseAction for FnAction {
    fn apply(&self, ctx: &PhaseContext) -> Result<()> {
        (self.apply)(ctx)
    }

    fn is_applied(&self, ctx: &PhaseContext) -> Result<bool> {
        match &self.check {
            Some(check) => check(ctx),
            None => Ok(false),
        }
    }

    fn is_reversible(&self) -> bool {
        self.undo.is_some()
    }

    fn rollback(&self, ctx: &PhaseContext) -> Result<()> {
        match &self.undo {
            Some(undo) => undo(ctx),
            None => Err(anyhow!("phase `{}` is not reversible", ctx.phase)),
        }
    }
}
