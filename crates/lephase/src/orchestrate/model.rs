use std::fmt;

use super::runner::PhaseAction;

/// One ordered, idempotent unit of host configuration.
pub struct Phase {
    /// Unique name; also the marker key.
    pub name: String,
    /// Secret names exported into the phase environment.
    pub requires: Vec<String>,
    action: Box<dyn PhaseAction>,
}

impl Phase {
    /// Phase running `action`.
    pub fn new(name: impl Into<String>, action: impl PhaseAction + 'static) -> Self {
        Self {
            name: name.into(),
            requires: Vec::new(),
            action: Box::new(action),
        }
    }

    /// Declare the secrets this phase needs.
    pub fn requires<I, S>(mut self, secrets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requires.extend(secrets.into_iter().map(Into::into));
        self
    }

    /// The phase action.
    pub fn action(&self) -> &dyn PhaseAction {
        self.action.as_ref()
    }
}

impl fmt::Debug for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Phase")
            .field("name", &self.name)
            .field("requires", &self.requires)
            .field("reversible", &self.action.is_reversible())
            .finish()
    }
}

/// Marker keys must be safe file-name fragments.
pub(crate) fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}
