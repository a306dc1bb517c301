//! TP-002: Property/attribute assignments.
//!
//! An assignment arrives in one of several YAML shapes. `Assignment::from_value`
//! is the single decision table that classifies them, tried in this order:
//!
//! 1. scalar                                  -> `Literal`
//! 2. `{fn_or_op: scalar}`                    -> `Function` / `Constraint`
//! 3. `{fn_or_op: [ ... ]}`                   -> `Function` / `Constraint`
//! 4. `{fn: {nested_fn: ...}}`                -> `Function` with one nested arg
//! 5. sequence                                -> `Literal`
//! 6. any other mapping                       -> `Literal`
//!
//! The first structurally valid match wins.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Literal values are kept in their YAML form.
pub type Value = serde_yaml_ng::Value;

/// Intrinsic function identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionName {
    Concat,
    GetInput,
    GetProperty,
    GetAttribute,
    // Recognized for parsing; evaluation yields undefined.
    GetOperationOutput,
    GetNodesOfType,
    GetArtifact,
    Token,
}

impl FunctionName {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "concat" => Self::Concat,
            "get_input" => Self::GetInput,
            "get_property" => Self::GetProperty,
            "get_attribute" => Self::GetAttribute,
            "get_operation_output" => Self::GetOperationOutput,
            "get_nodes_of_type" => Self::GetNodesOfType,
            "get_artifact" => Self::GetArtifact,
            "token" => Self::Token,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Concat => "concat",
            Self::GetInput => "get_input",
            Self::GetProperty => "get_property",
            Self::GetAttribute => "get_attribute",
            Self::GetOperationOutput => "get_operation_output",
            Self::GetNodesOfType => "get_nodes_of_type",
            Self::GetArtifact => "get_artifact",
            Self::Token => "token",
        }
    }
}

impl fmt::Display for FunctionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Constraint clause operators. Modeled, never evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstraintOperator {
    Equal,
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
    InRange,
    ValidValues,
    Length,
    MinLength,
    MaxLength,
    Pattern,
}

impl ConstraintOperator {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "equal" => Self::Equal,
            "greater_than" => Self::GreaterThan,
            "greater_or_equal" => Self::GreaterOrEqual,
            "less_than" => Self::LessThan,
            "less_or_equal" => Self::LessOrEqual,
            "in_range" => Self::InRange,
            "valid_values" => Self::ValidValues,
            "length" => Self::Length,
            "min_length" => Self::MinLength,
            "max_length" => Self::MaxLength,
            "pattern" => Self::Pattern,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equal => "equal",
            Self::GreaterThan => "greater_than",
            Self::GreaterOrEqual => "greater_or_equal",
            Self::LessThan => "less_than",
            Self::LessOrEqual => "less_or_equal",
            Self::InRange => "in_range",
            Self::ValidValues => "valid_values",
            Self::Length => "length",
            Self::MinLength => "min_length",
            Self::MaxLength => "max_length",
            Self::Pattern => "pattern",
        }
    }
}

impl fmt::Display for ConstraintOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A function call with positional arguments, each itself an assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub name: FunctionName,
    pub args: Vec<Assignment>,
}

/// `{operator: operand}`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintClause {
    pub operator: ConstraintOperator,
    pub operand: Value,
}

impl ConstraintClause {
    pub fn to_value(&self) -> Value {
        single_entry(self.operator.as_str(), self.operand.clone())
    }
}

/// Exactly one of literal, function call, or constraint expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Assignment {
    Literal(Value),
    Function(FunctionCall),
    Constraint(ConstraintClause),
}

impl Default for Assignment {
    fn default() -> Self {
        Self::Literal(Value::Null)
    }
}

impl Assignment {
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    pub fn function(name: FunctionName, args: Vec<Assignment>) -> Self {
        Self::Function(FunctionCall { name, args })
    }

    /// Classify a raw YAML value. See the module docs for the trial order.
    pub fn from_value(value: Value) -> Self {
        let Value::Mapping(map) = &value else {
            return Self::Literal(value);
        };
        if map.len() != 1 {
            return Self::Literal(value);
        }
        let Some((key, body)) = map.iter().next() else {
            return Self::Literal(value);
        };
        let Some(key) = key.as_str() else {
            return Self::Literal(value);
        };

        if let Some(name) = FunctionName::parse(key) {
            let args = match body {
                Value::Sequence(items) => items.iter().cloned().map(Self::from_value).collect(),
                Value::Mapping(_) => vec![Self::from_value(body.clone())],
                scalar => vec![Self::Literal(scalar.clone())],
            };
            return Self::Function(FunctionCall { name, args });
        }
        if let Some(operator) = ConstraintOperator::parse(key) {
            return Self::Constraint(ConstraintClause {
                operator,
                operand: body.clone(),
            });
        }
        Self::Literal(value)
    }

    /// Inverse of `from_value`, up to the scalar-vs-single-element-list choice.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Literal(v) => v.clone(),
            Self::Function(call) => {
                let body = match call.args.as_slice() {
                    [Self::Literal(v)] if is_scalar(v) => v.clone(),
                    args => Value::Sequence(args.iter().map(Self::to_value).collect()),
                };
                single_entry(call.name.as_str(), body)
            }
            Self::Constraint(c) => c.to_value(),
        }
    }

    pub fn as_literal(&self) -> Option<&Value> {
        match self {
            Self::Literal(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_function(&self) -> bool {
        matches!(self, Self::Function(_))
    }
}

impl From<Value> for Assignment {
    fn from(value: Value) -> Self {
        Self::from_value(value)
    }
}

impl Serialize for Assignment {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Assignment {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Self::from_value)
    }
}

impl Serialize for ConstraintClause {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ConstraintClause {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        match Assignment::from_value(value) {
            Assignment::Constraint(clause) => Ok(clause),
            other => Err(serde::de::Error::custom(format!(
                "expected a constraint clause, got {:?}",
                other.to_value()
            ))),
        }
    }
}

pub fn is_scalar(value: &Value) -> bool {
    matches!(
        value,
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_)
    )
}

fn single_entry(key: &str, body: Value) -> Value {
    let mut map = serde_yaml_ng::Mapping::new();
    map.insert(Value::String(key.to_string()), body);
    Value::Mapping(map)
}
