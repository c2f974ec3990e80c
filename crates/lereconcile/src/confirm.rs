use std::io::{self, BufRead, Write};

use crate::plan::ReconcilePlan;

/// Decides whether a plan may be executed.
pub trait Confirm {
    /// Ask for approval of `plan`.
    fn confirm(&mut self, plan: &ReconcilePlan) -> io::Result<bool>;
}

/// Unattended mode: every plan is approved.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

impl Confirm for AutoApprove {
    fn confirm(&mut self, _plan: &ReconcilePlan) -> io::Result<bool> {
        Ok(true)
    }
}

/// Interactive `[y/N]` prompt over any reader/writer pair.
pub struct PromptConfirm<R, W> {
    input: R,
    output: W,
}

impl PromptConfirm<io::StdinLock<'static>, io::Stderr> {
    /// Prompt on stderr, answer from stdin.
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stderr())
    }
}

impl<R: BufRead, W: Write> PromptConfirm<R, W> {
    /// Prompt over `input`/`output`.
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

impl<R: BufRead, W: Write> Confirm for PromptConfirm<R, W> {
    fn confirm(&mut self, plan: &ReconcilePlan) -> io::Result<bool> {
        write!(
            self.output,
            "Create {} resource(s)? [y/N] ",
            plan.create_count()
        )?;
        self.output.flush()?;

        let mut answer = String::new();
        self.input.read_line(&mut answer)?;
        Ok(matches!(
            answer.trim().to_ascii_lowercase().as_str(),
            "y" | "yes"
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("y\n", true)]
    #[case("YES\n", true)]
    #[case("\n", false)]
    #[case("no\n", false)]
    #[case("", false)]
    fn prompt_accepts_only_explicit_yes(#[case] input: &str, #[case] expected: bool) {
        let mut out = Vec::new();
        let mut prompt = PromptConfirm::new(input.as_bytes(), &mut out);
        let approved = prompt
            .confirm(&ReconcilePlan::default())
            .expect("prompt");
        assert_eq!(approved, expected);
        assert!(String::from_utf8_lossy(&out).contains("[y/N]"));
    }
}
