//! Field schema synthesis.
//!
//! Turns an ordered list of [`FieldDescriptor`]s into a [`Validator`]: one
//! independent [`FieldRule`] per supported field, keyed by slug. Values are
//! coerced the way a lenient form layer does it (numeric strings become
//! numbers, `"true"`/`"false"` become booleans) and the result is the payload
//! sent to the execute endpoint.

use crate::error::{UnsupportedFieldType, ValidationError, ValidationErrors};
use crate::field::{FieldDescriptor, FieldType};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Value kind a rule checks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleKind {
    String,
    Number,
    Boolean,
}

impl RuleKind {
    /// Rule kind for a field type; `None` for unsupported tags.
    pub fn for_type(field_type: &FieldType) -> Option<Self> {
        match field_type {
            FieldType::Text | FieldType::Textarea => Some(RuleKind::String),
            FieldType::Number => Some(RuleKind::Number),
            FieldType::Boolean => Some(RuleKind::Boolean),
            FieldType::Unsupported(_) => None,
        }
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RuleKind::String => "string",
            RuleKind::Number => "number",
            RuleKind::Boolean => "boolean",
        };
        f.write_str(s)
    }
}

/// A validated scalar sent to the execute endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PayloadValue {
    Bool(bool),
    Number(Number),
    Text(String),
}

impl PayloadValue {
    fn from_scalar(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(PayloadValue::Bool(*b)),
            Value::Number(n) => Some(PayloadValue::Number(n.clone())),
            Value::String(s) => Some(PayloadValue::Text(s.clone())),
            _ => None,
        }
    }
}

/// Body of an execute request, keyed by field slug.
pub type ExecutePayload = BTreeMap<String, PayloadValue>;

/// Validation rule for one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRule {
    pub slug: String,
    pub kind: RuleKind,
    pub required: bool,
}

impl FieldRule {
    /// Build the rule for a descriptor; unsupported types get none.
    pub fn for_field(field: &FieldDescriptor) -> Option<Self> {
        RuleKind::for_type(&field.field_type).map(|kind| Self {
            slug: field.slug.clone(),
            kind,
            required: field.required,
        })
    }

    /// Check one value, returning its coerced form (`None` when absent).
    pub fn check(&self, value: Option<&Value>) -> Result<Option<PayloadValue>, ValidationError> {
        let coerced = match value {
            None | Some(Value::Null) => None,
            Some(value) => self.coerce(value)?,
        };
        if coerced.is_none() && self.required {
            return Err(ValidationError::RequiredFieldMissing {
                field: self.slug.clone(),
            });
        }
        Ok(coerced)
    }

    fn coerce(&self, value: &Value) -> Result<Option<PayloadValue>, ValidationError> {
        match (self.kind, value) {
            (RuleKind::String, Value::String(s)) if s.is_empty() => Ok(None),
            (RuleKind::String, Value::String(s)) => Ok(Some(PayloadValue::Text(s.clone()))),
            (RuleKind::String, Value::Number(n)) => Ok(Some(PayloadValue::Text(n.to_string()))),
            (RuleKind::String, Value::Bool(b)) => Ok(Some(PayloadValue::Text(b.to_string()))),

            (RuleKind::Number, Value::Number(n)) => Ok(Some(PayloadValue::Number(n.clone()))),
            (RuleKind::Number, Value::String(s)) if s.trim().is_empty() => Ok(None),
            (RuleKind::Number, Value::String(s)) => parse_number(s.trim())
                .map(|n| Some(PayloadValue::Number(n)))
                .ok_or_else(|| self.mismatch(value)),

            (RuleKind::Boolean, Value::Bool(b)) => Ok(Some(PayloadValue::Bool(*b))),
            (RuleKind::Boolean, Value::String(s)) if s.trim().is_empty() => Ok(None),
            (RuleKind::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(Some(PayloadValue::Bool(true))),
                "false" | "0" => Ok(Some(PayloadValue::Bool(false))),
                _ => Err(self.mismatch(value)),
            },
            (RuleKind::Boolean, Value::Number(n)) => match n.as_f64() {
                Some(x) if x == 1.0 => Ok(Some(PayloadValue::Bool(true))),
                Some(x) if x == 0.0 => Ok(Some(PayloadValue::Bool(false))),
                _ => Err(self.mismatch(value)),
            },

            _ => Err(self.mismatch(value)),
        }
    }

    fn mismatch(&self, value: &Value) -> ValidationError {
        ValidationError::TypeMismatch {
            field: self.slug.clone(),
            expected: self.kind,
            value: value.to_string(),
        }
    }
}

fn parse_number(s: &str) -> Option<Number> {
    if let Ok(i) = s.parse::<i64>() {
        return Some(Number::from(i));
    }
    s.parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .and_then(Number::from_f64)
}

/// Per-field rules synthesized from a field list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validator {
    rules: Vec<FieldRule>,
    unsupported: Vec<UnsupportedFieldType>,
}

impl Validator {
    pub fn rules(&self) -> &[FieldRule] {
        &self.rules
    }

    pub fn rule(&self, slug: &str) -> Option<&FieldRule> {
        self.rules.iter().find(|rule| rule.slug == slug)
    }

    /// Fields passed through without a rule.
    pub fn unsupported_fields(&self) -> &[UnsupportedFieldType] {
        &self.unsupported
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Check a single field, as done on every change of that input.
    ///
    /// Slugs without a rule always pass.
    pub fn validate_field(&self, slug: &str, value: Option<&Value>) -> Result<(), ValidationError> {
        match self.rule(slug) {
            Some(rule) => rule.check(value).map(|_| ()),
            None => Ok(()),
        }
    }

    /// Check every rule against the submitted values.
    ///
    /// On success returns the coerced payload. Values without a rule are
    /// carried over when they are scalars. On failure every failing field is
    /// reported, in descriptor order.
    pub fn validate(&self, values: &Map<String, Value>) -> Result<ExecutePayload, ValidationErrors> {
        let mut payload = ExecutePayload::new();
        let mut errors = Vec::new();

        for (slug, value) in values {
            if self.rule(slug).is_none() {
                if let Some(v) = PayloadValue::from_scalar(value) {
                    payload.insert(slug.clone(), v);
                }
            }
        }

        for rule in &self.rules {
            match rule.check(values.get(&rule.slug)) {
                Ok(Some(v)) => {
                    payload.insert(rule.slug.clone(), v);
                }
                Ok(None) => {}
                Err(err) => errors.push(err),
            }
        }

        if errors.is_empty() {
            Ok(payload)
        } else {
            Err(ValidationErrors::new(errors))
        }
    }
}

/// Synthesize a validator from an ordered field list.
///
/// A repeated slug replaces whatever the earlier descriptor produced, rule or
/// unsupported entry, so each slug ends up in exactly one of the two lists.
pub fn synthesize(fields: &[FieldDescriptor]) -> Validator {
    let mut validator = Validator::default();
    for field in fields {
        match FieldRule::for_field(field) {
            Some(rule) => {
                validator.unsupported.retain(|u| u.slug != rule.slug);
                match validator.rules.iter_mut().find(|r| r.slug == rule.slug) {
                    Some(existing) => *existing = rule,
                    None => validator.rules.push(rule),
                }
            }
            None => {
                validator.rules.retain(|r| r.slug != field.slug);
                let entry = UnsupportedFieldType {
                    slug: field.slug.clone(),
                    type_name: field.field_type.to_string(),
                };
                match validator.unsupported.iter_mut().find(|u| u.slug == field.slug) {
                    Some(existing) => *existing = entry,
                    None => validator.unsupported.push(entry),
                }
            }
        }
    }
    validator
}

/// Validator cache tied to the identity of a shared field list.
///
/// The validator is rebuilt from scratch whenever a different `Arc` is
/// presented, and reused while the same one is.
#[derive(Debug, Default)]
pub struct SchemaMemo {
    source: Option<Arc<[FieldDescriptor]>>,
    validator: Arc<Validator>,
    builds: u64,
}

impl SchemaMemo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validator_for(&mut self, fields: &Arc<[FieldDescriptor]>) -> Arc<Validator> {
        let unchanged = self
            .source
            .as_ref()
            .is_some_and(|source| Arc::ptr_eq(source, fields));
        if !unchanged {
            self.validator = Arc::new(synthesize(fields));
            self.source = Some(Arc::clone(fields));
            self.builds += 1;
        }
        Arc::clone(&self.validator)
    }

    /// Number of times a validator has been synthesized.
    pub fn builds(&self) -> u64 {
        self.builds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn values(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn test_required_number_rejects_missing() {
        let validator = synthesize(&[FieldDescriptor::new("ttl", FieldType::Number).required()]);
        let err = validator.validate(&values(json!({}))).unwrap_err();
        assert_eq!(
            err.errors,
            vec![ValidationError::RequiredFieldMissing {
                field: "ttl".to_string()
            }]
        );
    }

    #[test]
    fn test_required_number_rejects_non_numeric() {
        let validator = synthesize(&[FieldDescriptor::new("ttl", FieldType::Number).required()]);
        let err = validator.validate(&values(json!({"ttl": "abc"}))).unwrap_err();
        assert!(matches!(
            err.errors.as_slice(),
            [ValidationError::TypeMismatch { expected: RuleKind::Number, .. }]
        ));
    }

    #[test]
    fn test_required_number_accepts_number() {
        let validator = synthesize(&[FieldDescriptor::new("ttl", FieldType::Number).required()]);
        let payload = validator.validate(&values(json!({"ttl": 5}))).unwrap();
        assert_eq!(payload.get("ttl"), Some(&PayloadValue::Number(Number::from(5))));
    }

    #[test]
    fn test_number_coerces_numeric_string() {
        let validator = synthesize(&[FieldDescriptor::new("ttl", FieldType::Number)]);
        let payload = validator.validate(&values(json!({"ttl": " 42 "}))).unwrap();
        assert_eq!(payload.get("ttl"), Some(&PayloadValue::Number(Number::from(42))));

        let payload = validator.validate(&values(json!({"ttl": "1.5"}))).unwrap();
        assert_eq!(
            payload.get("ttl"),
            Some(&PayloadValue::Number(Number::from_f64(1.5).unwrap()))
        );
    }

    #[test]
    fn test_optional_boolean_absent_passes() {
        let validator = synthesize(&[FieldDescriptor::new("seed", FieldType::Boolean)]);
        let payload = validator.validate(&values(json!({}))).unwrap();
        assert!(payload.is_empty());
    }

    #[test]
    fn test_boolean_coercion() {
        let validator = synthesize(&[FieldDescriptor::new("seed", FieldType::Boolean)]);
        for (input, expected) in [
            (json!(true), true),
            (json!("false"), false),
            (json!("TRUE"), true),
            (json!(1), true),
            (json!(0), false),
        ] {
            let payload = validator.validate(&values(json!({ "seed": input }))).unwrap();
            assert_eq!(payload.get("seed"), Some(&PayloadValue::Bool(expected)));
        }
        assert!(validator.validate(&values(json!({"seed": "yes"}))).is_err());
        assert!(validator.validate(&values(json!({"seed": 2}))).is_err());
    }

    #[test]
    fn test_required_string_rejects_empty() {
        let validator = synthesize(&[FieldDescriptor::new("name", FieldType::Text).required()]);
        assert!(validator.validate(&values(json!({"name": ""}))).is_err());
        assert!(validator.validate(&values(json!({"name": null}))).is_err());
        assert!(validator.validate(&values(json!({"name": "db"}))).is_ok());
    }

    #[test]
    fn test_string_rule_stringifies_scalars() {
        let validator = synthesize(&[FieldDescriptor::new("notes", FieldType::Textarea)]);
        let payload = validator.validate(&values(json!({"notes": 12}))).unwrap();
        assert_eq!(payload.get("notes"), Some(&PayloadValue::Text("12".to_string())));
        assert!(validator.validate(&values(json!({"notes": ["a"]}))).is_err());
    }

    #[test]
    fn test_unsupported_type_passes_through() {
        let fields = vec![
            FieldDescriptor::new("when", FieldType::Unsupported("date".to_string())).required(),
        ];
        let validator = synthesize(&fields);
        assert!(validator.is_empty());
        assert_eq!(validator.unsupported_fields().len(), 1);
        assert_eq!(
            validator.unsupported_fields()[0].to_string(),
            "unsupported field type: date"
        );

        let payload = validator.validate(&values(json!({}))).unwrap();
        assert!(payload.is_empty());
        let payload = validator.validate(&values(json!({"when": "2024-01-01"}))).unwrap();
        assert_eq!(
            payload.get("when"),
            Some(&PayloadValue::Text("2024-01-01".to_string()))
        );
    }

    #[test]
    fn test_errors_reported_for_every_field() {
        let validator = synthesize(&[
            FieldDescriptor::new("name", FieldType::Text).required(),
            FieldDescriptor::new("ttl", FieldType::Number).required(),
            FieldDescriptor::new("seed", FieldType::Boolean),
        ]);
        let err = validator
            .validate(&values(json!({"ttl": "soon", "seed": true})))
            .unwrap_err();
        let fields: Vec<&str> = err.errors.iter().map(|e| e.field()).collect();
        assert_eq!(fields, vec!["name", "ttl"]);
    }

    #[test]
    fn test_validate_field_single() {
        let validator = synthesize(&[FieldDescriptor::new("ttl", FieldType::Number).required()]);
        assert!(validator.validate_field("ttl", Some(&json!(3))).is_ok());
        assert!(validator.validate_field("ttl", None).is_err());
        assert!(validator.validate_field("unknown", None).is_ok());
    }

    #[test]
    fn test_repeated_slug_replaces_rule() {
        let validator = synthesize(&[
            FieldDescriptor::new("ttl", FieldType::Text),
            FieldDescriptor::new("ttl", FieldType::Number).required(),
        ]);
        assert_eq!(validator.len(), 1);
        assert_eq!(validator.rule("ttl").map(|r| r.kind), Some(RuleKind::Number));
    }

    #[test]
    fn test_repeated_slug_switches_between_supported_and_unsupported() {
        let validator = synthesize(&[
            FieldDescriptor::new("ttl", FieldType::Number).required(),
            FieldDescriptor::new("ttl", FieldType::Unsupported("date".to_string())),
        ]);
        assert!(validator.rule("ttl").is_none());
        assert_eq!(validator.unsupported_fields().len(), 1);
        assert_eq!(validator.unsupported_fields()[0].type_name, "date");
        assert!(validator.validate(&values(json!({"ttl": "tomorrow"}))).is_ok());

        let validator = synthesize(&[
            FieldDescriptor::new("ttl", FieldType::Unsupported("date".to_string())),
            FieldDescriptor::new("ttl", FieldType::Unsupported("duration".to_string())),
            FieldDescriptor::new("ttl", FieldType::Number).required(),
        ]);
        assert!(validator.unsupported_fields().is_empty());
        assert_eq!(validator.rule("ttl").map(|r| r.kind), Some(RuleKind::Number));
        assert!(validator.validate(&values(json!({"ttl": "tomorrow"}))).is_err());
    }

    #[test]
    fn test_schema_memo_rebuilds_on_new_list() {
        let mut memo = SchemaMemo::new();
        let first: Arc<[FieldDescriptor]> =
            Arc::from(vec![FieldDescriptor::new("name", FieldType::Text)]);
        let a = memo.validator_for(&first);
        let b = memo.validator_for(&first);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(memo.builds(), 1);

        // Equal content, different list: rebuilt, not patched.
        let second: Arc<[FieldDescriptor]> =
            Arc::from(vec![FieldDescriptor::new("name", FieldType::Text)]);
        let c = memo.validator_for(&second);
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(memo.builds(), 2);
    }

    #[test]
    fn test_payload_serializes_as_scalars() {
        let validator = synthesize(&[
            FieldDescriptor::new("name", FieldType::Text),
            FieldDescriptor::new("ttl", FieldType::Number),
            FieldDescriptor::new("seed", FieldType::Boolean),
        ]);
        let payload = validator
            .validate(&values(json!({"name": "db", "ttl": "5", "seed": "true"})))
            .unwrap();
        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            json!({"name": "db", "ttl": 5, "seed": true})
        );
    }
}
