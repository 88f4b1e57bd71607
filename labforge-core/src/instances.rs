//! Instance directive resolution
//!
//! Turns the `instances` directive of a folder or service into a concrete
//! count and naming prefix, guarded by the configured warn/error thresholds.

use std::sync::Arc;
use tracing::{error, warn};

use crate::config::{ObjectKind, Thresholds};
use crate::error::{LabforgeError, LabforgeResult};
use crate::groups::GroupRegistry;
use crate::spec::InstanceSpec;

/// Resolved instance directive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instances {
    pub count: u64,
    pub prefix: String,
}

impl Instances {
    pub fn single() -> Self {
        Self {
            count: 1,
            prefix: String::new(),
        }
    }

    /// Name of instance `index` (1-based) of an object called `name`.
    ///
    /// Single instances keep the object's name. Multiple instances use the
    /// prefix when there is one, otherwise the name, followed by the padded
    /// index.
    pub fn instance_name(&self, name: &str, index: u64, padding: usize) -> String {
        if self.count <= 1 {
            return name.to_string();
        }
        let base = if self.prefix.is_empty() {
            name
        } else {
            self.prefix.as_str()
        };
        format!("{}{:0width$}", base, index, width = padding)
    }

    /// Name of clone `index` (1-based) of a service entry called `name`:
    /// the prefix, the entry name and, for multiple clones, a space and the
    /// padded index
    pub fn service_instance_name(&self, name: &str, index: u64, padding: usize) -> String {
        if self.count <= 1 {
            return format!("{}{}", self.prefix, name);
        }
        format!("{}{} {:0width$}", self.prefix, name, index, width = padding)
    }
}

#[derive(Debug, Clone)]
pub struct InstanceResolver {
    thresholds: Thresholds,
    groups: Arc<GroupRegistry>,
}

impl InstanceResolver {
    pub fn new(thresholds: Thresholds, groups: Arc<GroupRegistry>) -> Self {
        Self { thresholds, groups }
    }

    /// Resolve the directive attached to `object`.
    ///
    /// Fails with [`LabforgeError::ThresholdExceeded`] when the count is above
    /// the error threshold, and with [`LabforgeError::Unsupported`] when the
    /// count depends on a group whose size is not known.
    pub fn resolve(
        &self,
        spec: Option<&InstanceSpec>,
        object: &str,
        kind: ObjectKind,
    ) -> LabforgeResult<Instances> {
        let instances = match spec {
            None => Instances::single(),
            Some(InstanceSpec::Count(count)) => Instances {
                count: *count,
                prefix: String::new(),
            },
            Some(InstanceSpec::Directive(directive)) => {
                let prefix = directive.prefix.clone().unwrap_or_default();
                let count = if let Some(number) = directive.number {
                    number
                } else if let Some(group) = &directive.size_of {
                    self.groups.size_of(group)?
                } else {
                    error!(
                        "Instances directive of {} '{}' has neither 'number' nor 'size-of'",
                        kind, object
                    );
                    0
                };
                Instances { count, prefix }
            }
        };

        self.check_thresholds(&instances, object, kind)?;
        Ok(instances)
    }

    fn check_thresholds(
        &self,
        instances: &Instances,
        object: &str,
        kind: ObjectKind,
    ) -> LabforgeResult<()> {
        let threshold = self.thresholds.for_kind(kind);
        if instances.count > threshold.error {
            error!(
                "{} instances of {} '{}' is beyond the error threshold of {}",
                instances.count, kind, object, threshold.error
            );
            return Err(LabforgeError::ThresholdExceeded {
                kind: kind.to_string(),
                object: object.to_string(),
                count: instances.count,
                limit: threshold.error,
            });
        }
        if instances.count > threshold.warn {
            warn!(
                "{} instances of {} '{}' is beyond the warning threshold of {}",
                instances.count, kind, object, threshold.warn
            );
        }
        Ok(())
    }
}
