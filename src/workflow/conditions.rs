//! Condition evaluation for step templates
//!
//! A step template may carry a rule set: a JSON object whose keys name
//! predicates over the request payload. The rule set is parsed once into a
//! closed set of [`Predicate`] kinds and evaluated by pattern match.
//!
//! Recognised shapes, keyed by payload field:
//!
//! ```text
//! { "amount":   { "gt": 100000, "lte": 5000000 } }   numeric range
//! { "dept":     { "in": ["OPS", "R&D"] } }           set membership
//! { "currency": { "equals": "KRW" } }                exact equality
//! { "has_role": "CFO" }                              role presence
//! { "urgent":   true }                               equality fallback
//! ```
//!
//! A step is mandatory only when every predicate holds. An entry that
//! cannot be parsed never raises; it makes the whole rule set demand a
//! human signature.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::{debug, warn};

#[cfg(test)]
use mockall::automock;

use super::types::ActorId;

const RANGE_BOUNDS: [&str; 5] = ["lt", "lte", "gt", "gte", "eq"];
const ROLE_PRESENCE_KEY: &str = "has_role";

/// Source of truth for which actors currently hold a role
#[cfg_attr(test, automock)]
pub trait AssignmentContext: Send + Sync {
    /// True when at least one actor is mapped to `role_code`
    fn has_actor_for_role(&self, role_code: &str) -> bool;
}

/// Static role -> actors mapping, usually loaded from configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoleRoster {
    roles: HashMap<String, Vec<ActorId>>,
}

impl RoleRoster {
    pub fn assign(&mut self, role_code: &str, actor_id: ActorId) {
        self.roles
            .entry(role_code.to_string())
            .or_default()
            .push(actor_id);
    }

    pub fn actors_for(&self, role_code: &str) -> &[ActorId] {
        self.roles.get(role_code).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl AssignmentContext for RoleRoster {
    fn has_actor_for_role(&self, role_code: &str) -> bool {
        !self.actors_for(role_code).is_empty()
    }
}

/// Numeric bounds; every supplied bound must hold
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RangeBounds {
    pub lt: Option<f64>,
    pub lte: Option<f64>,
    pub gt: Option<f64>,
    pub gte: Option<f64>,
    pub eq: Option<f64>,
}

impl RangeBounds {
    fn contains(&self, value: f64) -> bool {
        self.lt.map_or(true, |b| value < b)
            && self.lte.map_or(true, |b| value <= b)
            && self.gt.map_or(true, |b| value > b)
            && self.gte.map_or(true, |b| value >= b)
            && self.eq.map_or(true, |b| value == b)
    }
}

/// One parsed rule
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Range { field: String, bounds: RangeBounds },
    OneOf { field: String, values: Vec<Value> },
    Equals { field: String, value: Value },
    RolePresent { role_code: String },
    Malformed { key: String, reason: String },
}

impl Predicate {
    fn parse(key: &str, rule: &Value) -> Predicate {
        if key == ROLE_PRESENCE_KEY {
            return match rule.as_str() {
                Some(role) if !role.is_empty() => Predicate::RolePresent {
                    role_code: role.to_string(),
                },
                _ => malformed(key, "role presence expects a role code string"),
            };
        }

        let Value::Object(ops) = rule else {
            return Predicate::Equals {
                field: key.to_string(),
                value: rule.clone(),
            };
        };

        if ops.is_empty() {
            return malformed(key, "empty operator object");
        }

        if ops.keys().all(|op| RANGE_BOUNDS.contains(&op.as_str())) {
            return parse_range(key, ops);
        }

        match (ops.len(), ops.get("in"), ops.get("equals")) {
            (1, Some(Value::Array(values)), _) => Predicate::OneOf {
                field: key.to_string(),
                values: values.clone(),
            },
            (1, Some(scalar), _) => Predicate::OneOf {
                field: key.to_string(),
                values: vec![scalar.clone()],
            },
            (1, _, Some(value)) => Predicate::Equals {
                field: key.to_string(),
                value: value.clone(),
            },
            _ => malformed(key, "unrecognised operator"),
        }
    }

    /// Whether this predicate holds for `payload`
    pub fn holds(&self, payload: &Value, assignments: Option<&dyn AssignmentContext>) -> bool {
        match self {
            Predicate::Range { field, bounds } => match numeric_field(payload, field) {
                Some(value) => bounds.contains(value),
                None => false,
            },
            Predicate::OneOf { field, values } => lookup(payload, field)
                .map(|actual| values.iter().any(|v| values_equal(actual, v)))
                .unwrap_or(false),
            Predicate::Equals { field, value } => lookup(payload, field)
                .map(|actual| values_equal(actual, value))
                .unwrap_or(false),
            Predicate::RolePresent { role_code } => assignments
                .map(|ctx| ctx.has_actor_for_role(role_code))
                .unwrap_or(false),
            Predicate::Malformed { .. } => false,
        }
    }
}

fn malformed(key: &str, reason: &str) -> Predicate {
    Predicate::Malformed {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_range(field: &str, ops: &Map<String, Value>) -> Predicate {
    let mut bounds = RangeBounds::default();
    for (op, raw) in ops {
        let Some(bound) = as_number(raw) else {
            return malformed(field, &format!("bound `{op}` is not numeric"));
        };
        let slot = match op.as_str() {
            "lt" => &mut bounds.lt,
            "lte" => &mut bounds.lte,
            "gt" => &mut bounds.gt,
            "gte" => &mut bounds.gte,
            _ => &mut bounds.eq,
        };
        *slot = Some(bound);
    }
    Predicate::Range {
        field: field.to_string(),
        bounds,
    }
}

/// Resolve `field` in the payload; dotted names walk nested objects
fn lookup<'a>(payload: &'a Value, field: &str) -> Option<&'a Value> {
    if let Some(direct) = payload.get(field) {
        return Some(direct);
    }
    field
        .split('.')
        .try_fold(payload, |node, segment| node.get(segment))
}

/// Missing or null fields count as zero
fn numeric_field(payload: &Value, field: &str) -> Option<f64> {
    match lookup(payload, field) {
        None | Some(Value::Null) => Some(0.0),
        Some(value) => as_number(value),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn values_equal(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => actual == expected,
    }
}

/// Parsed rule set; keeps the source document for storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub struct RuleSet {
    source: Value,
    predicates: Vec<Predicate>,
}

impl RuleSet {
    pub fn parse(source: Value) -> Self {
        let predicates = match &source {
            Value::Object(rules) => rules
                .iter()
                .map(|(key, rule)| Predicate::parse(key, rule))
                .collect(),
            Value::Null => Vec::new(),
            _ => vec![malformed("<root>", "rule set must be an object")],
        };
        Self { source, predicates }
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn source(&self) -> &Value {
        &self.source
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    pub fn is_malformed(&self) -> bool {
        self.predicates
            .iter()
            .any(|p| matches!(p, Predicate::Malformed { .. }))
    }
}

impl From<Value> for RuleSet {
    fn from(source: Value) -> Self {
        RuleSet::parse(source)
    }
}

impl From<RuleSet> for Value {
    fn from(rules: RuleSet) -> Self {
        rules.source
    }
}

/// Decide whether a step needs a human signature for `payload`.
///
/// Without conditions the template's `required` flag decides. With
/// conditions, the step is mandatory only if every predicate holds,
/// short-circuiting on the first failure. A rule set containing a
/// malformed entry is always mandatory.
pub fn evaluate(
    required: bool,
    conditions: Option<&RuleSet>,
    payload: &Value,
    assignments: Option<&dyn AssignmentContext>,
) -> bool {
    let Some(rules) = conditions.filter(|rules| !rules.is_empty()) else {
        return required;
    };

    if rules.is_malformed() {
        warn!(rules = %rules.source(), "Malformed step conditions, requiring signature");
        return true;
    }

    for predicate in rules.predicates() {
        if !predicate.holds(payload, assignments) {
            debug!(?predicate, "Step condition not satisfied");
            return false;
        }
    }
    true
}
