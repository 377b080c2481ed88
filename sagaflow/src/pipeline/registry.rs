//! Ordered stage registry with build-time validation.

use regex::Regex;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, OnceLock};

use super::StageSpec;
use crate::capabilities::ForwardCapability;
use crate::errors::RegistryError;
use crate::gate::ExternalGate;

fn stage_name_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_.\-]{0,63}$").ok())
        .as_ref()
}

fn validate_name(name: &str) -> Result<(), RegistryError> {
    let reason = if name.trim().is_empty() {
        Some("name cannot be empty")
    } else if stage_name_pattern().is_some_and(|re| !re.is_match(name)) {
        Some("must start with a letter and contain at most 64 letters, digits, '_', '-' or '.'")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(RegistryError::InvalidName {
            name: name.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

/// One registry position: a stage or the gate.
#[derive(Debug, Clone)]
pub enum RegistryEntry {
    /// A forward stage.
    Stage(StageSpec),
    /// The decision gate.
    Gate(ExternalGate),
}

impl RegistryEntry {
    /// Returns the entry name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Stage(stage) => &stage.name,
            Self::Gate(gate) => gate.name(),
        }
    }

    /// Returns the assigned order.
    #[must_use]
    pub fn order(&self) -> u32 {
        match self {
            Self::Stage(stage) => stage.order.unwrap_or_default(),
            Self::Gate(gate) => gate.order().unwrap_or_default(),
        }
    }

    fn explicit_order(&self) -> Option<u32> {
        match self {
            Self::Stage(stage) => stage.order,
            Self::Gate(gate) => gate.order(),
        }
    }

    fn assign_order(&mut self, order: u32) {
        match self {
            Self::Stage(stage) => stage.order = Some(order),
            Self::Gate(gate) => gate.set_order(order),
        }
    }
}

/// Builder for a [`StageRegistry`].
#[derive(Debug)]
pub struct StageRegistryBuilder {
    name: String,
    entries: Vec<RegistryEntry>,
    failure_notification: Option<Arc<dyn ForwardCapability>>,
}

impl StageRegistryBuilder {
    /// Creates a builder for the named pipeline.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
            failure_notification: None,
        }
    }

    /// Appends a stage.
    #[must_use]
    pub fn stage(mut self, stage: StageSpec) -> Self {
        self.entries.push(RegistryEntry::Stage(stage));
        self
    }

    /// Appends the decision gate.
    #[must_use]
    pub fn gate(mut self, gate: ExternalGate) -> Self {
        self.entries.push(RegistryEntry::Gate(gate));
        self
    }

    /// Sets the notification sent after compensation, whatever its outcome.
    #[must_use]
    pub fn failure_notification(mut self, capability: Arc<dyn ForwardCapability>) -> Self {
        self.failure_notification = Some(capability);
        self
    }

    /// Validates and builds the registry.
    ///
    /// Entries without an explicit order are numbered after the previous
    /// entry; the result is sorted by order.
    ///
    /// # Errors
    ///
    /// Returns a `RegistryError` for an empty registry, invalid or duplicate
    /// names, duplicate orders, more than one gate, a gate with no stage
    /// before it, or a notify stage declaring a compensating action.
    pub fn build(self) -> Result<StageRegistry, RegistryError> {
        let Self {
            name,
            mut entries,
            failure_notification,
        } = self;

        if entries.is_empty() {
            return Err(RegistryError::Empty { pipeline: name });
        }

        let mut names = HashSet::new();
        let mut gates = 0usize;
        for entry in &entries {
            validate_name(entry.name())?;
            if !names.insert(entry.name().to_string()) {
                return Err(RegistryError::DuplicateName {
                    name: entry.name().to_string(),
                });
            }
            match entry {
                RegistryEntry::Gate(_) => gates += 1,
                RegistryEntry::Stage(stage)
                    if stage.is_notify() && stage.compensation.is_some() =>
                {
                    return Err(RegistryError::CompensatedNotify {
                        name: stage.name.clone(),
                    });
                }
                RegistryEntry::Stage(_) => {}
            }
        }
        if gates > 1 {
            return Err(RegistryError::MultipleGates { pipeline: name });
        }

        let mut next = 1u32;
        for entry in &mut entries {
            match entry.explicit_order() {
                Some(order) => next = order.saturating_add(1),
                None => {
                    entry.assign_order(next);
                    next = next.saturating_add(1);
                }
            }
        }
        entries.sort_by_key(RegistryEntry::order);

        for pair in entries.windows(2) {
            if pair[0].order() == pair[1].order() {
                return Err(RegistryError::DuplicateOrder {
                    order: pair[0].order(),
                    first: pair[0].name().to_string(),
                    second: pair[1].name().to_string(),
                });
            }
        }

        if let Some(RegistryEntry::Gate(gate)) = entries.first() {
            return Err(RegistryError::GateFirst {
                gate: gate.name().to_string(),
            });
        }

        Ok(StageRegistry {
            name,
            entries,
            failure_notification,
        })
    }
}

/// Ordered, validated list of stages with an optional gate.
#[derive(Clone)]
pub struct StageRegistry {
    name: String,
    entries: Vec<RegistryEntry>,
    failure_notification: Option<Arc<dyn ForwardCapability>>,
}

impl fmt::Debug for StageRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageRegistry")
            .field("name", &self.name)
            .field("entries", &self.entry_names())
            .field("failure_notification", &self.failure_notification.is_some())
            .finish()
    }
}

impl StageRegistry {
    /// Starts a builder.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> StageRegistryBuilder {
        StageRegistryBuilder::new(name)
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns every entry in execution order.
    #[must_use]
    pub fn entries(&self) -> &[RegistryEntry] {
        &self.entries
    }

    /// Returns entry names in execution order.
    #[must_use]
    pub fn entry_names(&self) -> Vec<&str> {
        self.entries.iter().map(RegistryEntry::name).collect()
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always false; an empty registry cannot be built.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks up a stage by name.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageSpec> {
        self.entries.iter().find_map(|entry| match entry {
            RegistryEntry::Stage(stage) if stage.name == name => Some(stage),
            _ => None,
        })
    }

    /// Returns the gate, if configured.
    #[must_use]
    pub fn gate(&self) -> Option<&ExternalGate> {
        self.entries.iter().find_map(|entry| match entry {
            RegistryEntry::Gate(gate) => Some(gate),
            RegistryEntry::Stage(_) => None,
        })
    }

    /// Returns the failure notification.
    #[must_use]
    pub fn failure_notification(&self) -> Option<&Arc<dyn ForwardCapability>> {
        self.failure_notification.as_ref()
    }

    /// Wraps every stage's forward action.
    ///
    /// The wrapper receives the stage name and the current capability.
    #[must_use]
    pub fn intercept<F>(mut self, wrap: F) -> Self
    where
        F: Fn(&str, Arc<dyn ForwardCapability>) -> Arc<dyn ForwardCapability>,
    {
        for entry in &mut self.entries {
            if let RegistryEntry::Stage(stage) = entry {
                stage.forward = wrap(&stage.name, stage.forward.clone());
            }
        }
        self
    }
}
