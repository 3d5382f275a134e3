//! Guard conditions for conditional nodes.
//!
//! Grammar:
//!
//! ```text
//! always | never | <path> | !<path> | <path> == <json> | <path> != <json>
//! ```
//!
//! A path is rooted at `context.<key>...`, `outputs.<node>...` or
//! `status.<node>`. Numeric segments index into arrays. A right-hand side that
//! is not valid JSON is compared as a bare string, so `status.design ==
//! completed` and `status.design == "completed"` are equivalent.

use crate::core::NodeStatus;
use crate::errors::{codes, ErrorInfo, GraphValidationError};
use regex::Regex;
use serde_json::Value;
use std::fmt;
use std::sync::LazyLock;

#[allow(clippy::unwrap_used)]
static CONDITION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(!)?\s*([A-Za-z_][\w\-]*(?:\.[\w\-]+)*)\s*(?:(==|!=)\s*(.+?))?\s*$").unwrap()
});

/// Read access to the values a condition can refer to.
pub trait ConditionScope {
    /// Returns a value from the global context map.
    fn global_value(&self, key: &str) -> Option<&Value>;

    /// Returns the output payload of a node.
    fn node_output(&self, node_id: &str) -> Option<&Value>;

    /// Returns the status of a node.
    fn node_status(&self, node_id: &str) -> Option<NodeStatus>;
}

/// Where a condition path starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionPath {
    /// `context.<key>.<segments>`
    Context {
        /// Top-level key in the global context.
        key: String,
        /// Nested segments below the key.
        segments: Vec<String>,
    },
    /// `outputs.<node>.<segments>`
    Output {
        /// Producing node.
        node: String,
        /// Nested segments below the output root.
        segments: Vec<String>,
    },
    /// `status.<node>`
    Status(String),
}

impl ConditionPath {
    fn resolve(&self, scope: &dyn ConditionScope) -> Option<Value> {
        match self {
            Self::Context { key, segments } => {
                descend(scope.global_value(key)?, segments).cloned()
            }
            Self::Output { node, segments } => {
                descend(scope.node_output(node)?, segments).cloned()
            }
            Self::Status(node) => scope
                .node_status(node)
                .map(|status| Value::String(status.to_string())),
        }
    }

    /// Returns the node this path reads from, if any.
    #[must_use]
    pub fn referenced_node(&self) -> Option<&str> {
        match self {
            Self::Context { .. } => None,
            Self::Output { node, .. } | Self::Status(node) => Some(node),
        }
    }
}

fn descend<'a>(mut value: &'a Value, segments: &[String]) -> Option<&'a Value> {
    for segment in segments {
        value = match value {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(value)
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(map)) => !map.is_empty(),
    }
}

fn values_equal(left: Option<&Value>, right: &Value) -> bool {
    match (left, right) {
        (None, Value::Null) => true,
        (None, _) => false,
        (Some(Value::Number(a)), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => (a - b).abs() < f64::EPSILON,
            _ => a == b,
        },
        (Some(left), right) => left == right,
    }
}

/// A parsed guard condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Always true.
    Always,
    /// Always false.
    Never,
    /// True when the path resolves to a truthy value.
    Truthy(ConditionPath),
    /// True when the path is missing or falsy.
    Falsy(ConditionPath),
    /// True when the path equals the value.
    Equals(ConditionPath, Value),
    /// True when the path differs from the value.
    NotEquals(ConditionPath, Value),
}

impl Condition {
    /// Parses a condition expression.
    ///
    /// # Errors
    ///
    /// Returns a [`GraphValidationError`] with code `GRAPH-006-CONDITION` when
    /// the expression does not match the grammar.
    pub fn parse(expression: &str) -> Result<Self, GraphValidationError> {
        match expression.trim() {
            "always" | "true" => return Ok(Self::Always),
            "never" | "false" => return Ok(Self::Never),
            _ => {}
        }

        let caps = CONDITION_RE
            .captures(expression)
            .ok_or_else(|| condition_error(expression, "expression does not match the grammar"))?;

        let negated = caps.get(1).is_some();
        let path_text = caps.get(2).map_or("", |m| m.as_str());
        let path = parse_path(expression, path_text)?;

        match (caps.get(3).map(|m| m.as_str()), caps.get(4).map(|m| m.as_str())) {
            (None, _) if negated => Ok(Self::Falsy(path)),
            (None, _) => Ok(Self::Truthy(path)),
            (Some(_), _) if negated => Err(condition_error(
                expression,
                "negation cannot be combined with a comparison",
            )),
            (Some(op), Some(rhs)) => {
                let value = serde_json::from_str::<Value>(rhs)
                    .unwrap_or_else(|_| Value::String(rhs.to_string()));
                if op == "==" {
                    Ok(Self::Equals(path, value))
                } else {
                    Ok(Self::NotEquals(path, value))
                }
            }
            (Some(_), None) => Err(condition_error(expression, "comparison is missing a value")),
        }
    }

    /// Evaluates the condition.
    #[must_use]
    pub fn evaluate(&self, scope: &dyn ConditionScope) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::Truthy(path) => truthy(path.resolve(scope).as_ref()),
            Self::Falsy(path) => !truthy(path.resolve(scope).as_ref()),
            Self::Equals(path, value) => values_equal(path.resolve(scope).as_ref(), value),
            Self::NotEquals(path, value) => !values_equal(path.resolve(scope).as_ref(), value),
        }
    }

    /// Returns the node the condition reads from, if any.
    #[must_use]
    pub fn referenced_node(&self) -> Option<&str> {
        match self {
            Self::Always | Self::Never => None,
            Self::Truthy(path)
            | Self::Falsy(path)
            | Self::Equals(path, _)
            | Self::NotEquals(path, _) => path.referenced_node(),
        }
    }
}

impl fmt::Display for ConditionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Context { key, segments } => {
                write!(f, "context.{key}")?;
                segments.iter().try_for_each(|s| write!(f, ".{s}"))
            }
            Self::Output { node, segments } => {
                write!(f, "outputs.{node}")?;
                segments.iter().try_for_each(|s| write!(f, ".{s}"))
            }
            Self::Status(node) => write!(f, "status.{node}"),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Always => write!(f, "always"),
            Self::Never => write!(f, "never"),
            Self::Truthy(path) => write!(f, "{path}"),
            Self::Falsy(path) => write!(f, "!{path}"),
            Self::Equals(path, value) => write!(f, "{path} == {value}"),
            Self::NotEquals(path, value) => write!(f, "{path} != {value}"),
        }
    }
}

fn parse_path(expression: &str, text: &str) -> Result<ConditionPath, GraphValidationError> {
    let mut parts = text.split('.').map(str::to_string);
    let root = parts.next().unwrap_or_default();
    let Some(head) = parts.next() else {
        return Err(condition_error(
            expression,
            "path must have at least two segments, e.g. context.flag",
        ));
    };
    let rest: Vec<String> = parts.collect();

    match root.as_str() {
        "context" => Ok(ConditionPath::Context {
            key: head,
            segments: rest,
        }),
        "outputs" => Ok(ConditionPath::Output {
            node: head,
            segments: rest,
        }),
        "status" if rest.is_empty() => Ok(ConditionPath::Status(head)),
        "status" => Err(condition_error(expression, "status paths take exactly one node id")),
        other => Err(condition_error(
            expression,
            &format!("unknown path root '{other}', expected context, outputs or status"),
        )),
    }
}

fn condition_error(expression: &str, reason: &str) -> GraphValidationError {
    GraphValidationError::new(format!("Invalid condition '{expression}': {reason}")).with_error_info(
        ErrorInfo::new(codes::CONDITION, reason.to_string())
            .with_fix_hint(
                "Use always, never, <path>, !<path>, <path> == <json> or <path> != <json>.",
            )
            .with_context_entry("expression", expression),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[derive(Default)]
    struct Scope {
        global: HashMap<String, Value>,
        outputs: HashMap<String, Value>,
        statuses: HashMap<String, NodeStatus>,
    }

    impl ConditionScope for Scope {
        fn global_value(&self, key: &str) -> Option<&Value> {
            self.global.get(key)
        }

        fn node_output(&self, node_id: &str) -> Option<&Value> {
            self.outputs.get(node_id)
        }

        fn node_status(&self, node_id: &str) -> Option<NodeStatus> {
            self.statuses.get(node_id).copied()
        }
    }

    fn scope() -> Scope {
        let mut scope = Scope::default();
        scope.global.insert("deploy".to_string(), json!(true));
        scope.global.insert("env".to_string(), json!({"name": "staging", "replicas": 2}));
        scope
            .outputs
            .insert("tests".to_string(), json!({"passed": 10, "failures": [], "suites": ["unit"]}));
        scope.statuses.insert("design".to_string(), NodeStatus::Completed);
        scope
    }

    #[test]
    fn test_constants() {
        assert_eq!(Condition::parse("always").unwrap(), Condition::Always);
        assert!(!Condition::parse(" never ").unwrap().evaluate(&scope()));
    }

    #[test]
    fn test_truthy_and_negation() {
        let s = scope();
        assert!(Condition::parse("context.deploy").unwrap().evaluate(&s));
        assert!(!Condition::parse("!context.deploy").unwrap().evaluate(&s));
        assert!(!Condition::parse("context.missing").unwrap().evaluate(&s));
        assert!(Condition::parse("!outputs.tests.failures").unwrap().evaluate(&s));
        assert!(Condition::parse("outputs.tests.suites.0").unwrap().evaluate(&s));
    }

    #[test]
    fn test_comparisons() {
        let s = scope();
        assert!(Condition::parse("context.env.name == \"staging\"").unwrap().evaluate(&s));
        assert!(Condition::parse("context.env.name == staging").unwrap().evaluate(&s));
        assert!(Condition::parse("context.env.replicas == 2.0").unwrap().evaluate(&s));
        assert!(Condition::parse("outputs.tests.passed != 0").unwrap().evaluate(&s));
        assert!(Condition::parse("status.design == completed").unwrap().evaluate(&s));
        assert!(Condition::parse("status.backend == null").unwrap().evaluate(&s));
    }

    #[test]
    fn test_referenced_node() {
        assert_eq!(
            Condition::parse("outputs.tests.passed").unwrap().referenced_node(),
            Some("tests")
        );
        assert_eq!(Condition::parse("context.deploy").unwrap().referenced_node(), None);
    }

    #[test]
    fn test_parse_errors() {
        for bad in ["", "deploy", "env.name", "status.a.b", "!context.a == 1", "context.a ==", "1 + 1"] {
            let err = Condition::parse(bad).unwrap_err();
            assert_eq!(err.code(), Some(codes::CONDITION), "expression: {bad:?}");
        }
    }

    #[test]
    fn test_display_round_trip() {
        let condition = Condition::parse("outputs.tests.passed != 0").unwrap();
        assert_eq!(Condition::parse(&condition.to_string()).unwrap(), condition);
    }
}
