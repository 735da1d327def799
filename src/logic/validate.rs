use crate::error::RestError;
use crate::model::{ColumnValue, Datum, Table};
use crate::store::RowData;
use std::collections::HashMap;

/// The mutation a validator is consulted about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    Create,
    Update,
    Delete,
}

pub struct ValidationArgs<'a> {
    pub op: WriteOp,
    pub table: &'a Table,
    pub row: Option<&'a RowData>,
    /// Computed index of the affected row, when it exists.
    pub index: Option<&'a str>,
}

/// Per-resource policy check, run as part of the write pipeline before
/// any recursive walk begins. A failing validator aborts the whole
/// transaction, including sibling writes staged in the same request.
pub trait ResourceValidator: Send + Sync {
    fn validate(&self, args: &ValidationArgs) -> Result<(), RestError>;
}

/// Static registry mapping table names to their validators, invoked in
/// registration order.
#[derive(Default)]
pub struct ValidatorRegistry {
    validators: HashMap<String, Vec<Box<dyn ResourceValidator>>>,
}

impl ValidatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry for the switch schema: the default bridge, VRF and VLAN
    /// are permanent, and physical interfaces cannot be removed.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(
            "Bridge",
            Box::new(ProtectedRowValidator::new("bridge_normal", "the default bridge")),
        );
        registry.register(
            "VRF",
            Box::new(ProtectedRowValidator::new("vrf_default", "the default VRF")),
        );
        registry.register(
            "VLAN",
            Box::new(ProtectedRowValidator::new("1", "the default VLAN")),
        );
        registry.register("Interface", Box::new(PhysicalInterfaceValidator));
        registry
    }

    pub fn register(&mut self, table: &str, validator: Box<dyn ResourceValidator>) {
        self.validators
            .entry(table.to_string())
            .or_default()
            .push(validator);
    }

    pub fn run(&self, args: &ValidationArgs) -> Result<(), RestError> {
        if let Some(validators) = self.validators.get(&args.table.name) {
            for validator in validators {
                validator.validate(args)?;
            }
        }
        Ok(())
    }
}

/// Refuses deletion of a specific unremovable row, regardless of how the
/// request reached it.
pub struct ProtectedRowValidator {
    index: String,
    what: &'static str,
}

impl ProtectedRowValidator {
    pub fn new(index: impl Into<String>, what: &'static str) -> Self {
        Self {
            index: index.into(),
            what,
        }
    }
}

impl ResourceValidator for ProtectedRowValidator {
    fn validate(&self, args: &ValidationArgs) -> Result<(), RestError> {
        if args.op == WriteOp::Delete && args.index == Some(self.index.as_str()) {
            return Err(RestError::MethodNotAllowed(format!(
                "{} cannot be deleted",
                self.what
            )));
        }
        Ok(())
    }
}

/// Physical (type `system`) interface rows mirror hardware and cannot be
/// removed over REST.
pub struct PhysicalInterfaceValidator;

impl ResourceValidator for PhysicalInterfaceValidator {
    fn validate(&self, args: &ValidationArgs) -> Result<(), RestError> {
        if args.op != WriteOp::Delete {
            return Ok(());
        }
        let is_physical = args
            .row
            .and_then(|row| row.get("type"))
            .map(|v| matches!(v, ColumnValue::Scalar(Datum::Str(t)) if t == "system"))
            .unwrap_or(false);
        if is_physical {
            return Err(RestError::MethodNotAllowed(
                "physical interfaces cannot be deleted".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Schema;
    use crate::seed;

    #[test]
    fn default_bridge_is_protected() {
        let schema = Schema::load(seed::switch_schema()).unwrap();
        let registry = ValidatorRegistry::with_defaults();
        let table = schema.table("Bridge").unwrap();
        let err = registry
            .run(&ValidationArgs {
                op: WriteOp::Delete,
                table,
                row: None,
                index: Some("bridge_normal"),
            })
            .unwrap_err();
        assert!(matches!(err, RestError::MethodNotAllowed(_)));

        // Other bridges delete fine.
        registry
            .run(&ValidationArgs {
                op: WriteOp::Delete,
                table,
                row: None,
                index: Some("br1"),
            })
            .unwrap();
    }

    #[test]
    fn physical_interface_is_protected() {
        let schema = Schema::load(seed::switch_schema()).unwrap();
        let registry = ValidatorRegistry::with_defaults();
        let table = schema.table("Interface").unwrap();
        let mut row = RowData::new(uuid::Uuid::new_v4(), "Interface");
        row.columns.insert(
            "type".to_string(),
            ColumnValue::Scalar(Datum::Str("system".to_string())),
        );
        let err = registry
            .run(&ValidationArgs {
                op: WriteOp::Delete,
                table,
                row: Some(&row),
                index: Some("eth0"),
            })
            .unwrap_err();
        assert!(matches!(err, RestError::MethodNotAllowed(_)));

        // Updates are not blocked.
        registry
            .run(&ValidationArgs {
                op: WriteOp::Update,
                table,
                row: Some(&row),
                index: Some("eth0"),
            })
            .unwrap();
    }
}
