//! Construction-time configuration.

use std::fmt;
use std::sync::Arc;

use crate::error::SourceFault;

/// Callback receiving faults from bound fields: `(type_name, field, fault)`.
pub type FaultHook = Arc<dyn Fn(&str, &str, &SourceFault) + Send + Sync>;

/// What a model does when a bound field's source fails.
#[derive(Clone, Default)]
pub enum FaultPolicy {
    /// Store the fault and raise it on the next read of that field.
    #[default]
    Store,
    /// Store the fault and also hand it to the hook as soon as it arrives.
    Escalate(FaultHook),
}

impl fmt::Debug for FaultPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store => f.write_str("Store"),
            Self::Escalate(_) => f.write_str("Escalate(..)"),
        }
    }
}

/// Per-model configuration.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default)]
pub struct ModelConfig {
    pub fault_policy: FaultPolicy,
}

impl ModelConfig {
    /// Escalates bound-field faults to `hook`.
    #[must_use]
    pub fn escalate_faults(hook: impl Fn(&str, &str, &SourceFault) + Send + Sync + 'static) -> Self {
        Self {
            fault_policy: FaultPolicy::Escalate(Arc::new(hook)),
        }
    }
}

/// Limits applied when parsing accessor chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainLimits {
    /// Maximum number of names in a chain.
    pub max_depth: usize,
}

impl ChainLimits {
    /// Limits for operations that name a single field.
    pub const FIELD: Self = Self { max_depth: 1 };
}

impl Default for ChainLimits {
    fn default() -> Self {
        Self { max_depth: 32 }
    }
}
