//! Parameter schemas and constraints.
//!
//! Each filter kind declares its parameters up front. Values assigned to a
//! node are checked against the schema when they are set, so evaluation can
//! rely on every stored value having the declared type.

use crate::core::error::{ParameterError, ParameterResult};
use crate::core::types::{ParamType, Value};
use crate::execution::request::ChangedMask;

/// Definition of a node parameter.
#[derive(Debug, Clone)]
pub struct ParameterDefinition {
    /// Unique name within the filter kind (e.g. `"angle"`)
    pub name: String,
    /// Type of the parameter
    pub param_type: ParamType,
    /// Value used until the parameter is set
    pub default_value: Value,
    /// Whether `Value::None` is accepted
    pub optional: bool,
    /// Description for documentation
    pub description: String,
    /// Constraints for validation
    pub constraints: Vec<Constraint>,
    /// Which aspects of the output a change to this parameter affects
    pub affects: ChangedMask,
}

/// Constraints that can be applied to parameter values.
#[derive(Debug, Clone)]
pub enum Constraint {
    /// Numeric value must be within range [min, max]
    Range { min: f64, max: f64 },
    /// Numeric value must be >= 0
    NonNegative,
    /// Value must be one of the specified options
    OneOf(Vec<Value>),
}

impl ParameterDefinition {
    /// Create a new parameter definition. Changes affect pixel data by default.
    pub fn new(name: impl Into<String>, param_type: ParamType, default_value: Value) -> Self {
        Self {
            name: name.into(),
            param_type,
            default_value,
            optional: false,
            description: String::new(),
            constraints: Vec::new(),
            affects: ChangedMask::PIXELS,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Accept `Value::None`.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Add a range constraint.
    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.constraints.push(Constraint::Range { min, max });
        self
    }

    /// Add a constraint.
    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    /// Declare which aspects of the output change with this parameter.
    pub fn affects(mut self, mask: ChangedMask) -> Self {
        self.affects = mask;
        self
    }

    /// Validate a value against this parameter's type and constraints.
    pub fn validate(&self, value: &Value) -> ParameterResult<()> {
        if value.is_none() {
            if self.optional {
                return Ok(());
            }
            return Err(ParameterError::TypeMismatch {
                name: self.name.clone(),
                expected: self.param_type,
                got: ParamType::None,
            });
        }

        if !self.param_type.accepts(value.get_type()) {
            return Err(ParameterError::TypeMismatch {
                name: self.name.clone(),
                expected: self.param_type,
                got: value.get_type(),
            });
        }

        for constraint in &self.constraints {
            constraint
                .validate(value)
                .map_err(|reason| ParameterError::ConstraintViolation {
                    name: self.name.clone(),
                    reason,
                })?;
        }

        Ok(())
    }

    /// Normalise a validated value to the declared type (integers widen).
    pub fn coerce(&self, value: Value) -> Value {
        match (self.param_type, &value) {
            (ParamType::Float, Value::Integer(i)) => Value::Float(*i as f64),
            _ => value,
        }
    }
}

impl Constraint {
    /// Validate a value against this constraint.
    pub fn validate(&self, value: &Value) -> Result<(), String> {
        match self {
            Constraint::Range { min, max } => {
                if let Some(num) = value.as_float() {
                    if num < *min || num > *max {
                        return Err(format!("Value {} is out of range [{}, {}]", num, min, max));
                    }
                }
                Ok(())
            }
            Constraint::NonNegative => match value.as_float() {
                Some(num) if num < 0.0 => Err(format!("Value {} must be non-negative", num)),
                _ => Ok(()),
            },
            Constraint::OneOf(options) => {
                if options.contains(value) {
                    Ok(())
                } else {
                    Err(format!("Value {:?} is not one of the allowed options", value))
                }
            }
        }
    }
}
