//! Per-model field validation.

use crate::value::Value;
use dashmap::DashMap;
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

static EMAIL_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").ok());

/// Predicate used by [`Rule::Custom`].
pub type Predicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// A single validation rule applied to one field.
#[derive(Clone)]
pub enum Rule {
    /// Present, non-null and not an empty string.
    Required,
    /// A string value.
    String,
    /// A numeric value.
    Number,
    /// A string shaped like an e-mail address.
    Email,
    /// Numbers by value, strings by length.
    Min(f64),
    /// Numbers by value, strings by length.
    Max(f64),
    /// Caller-supplied predicate with its failure message.
    Custom {
        message: String,
        predicate: Predicate,
    },
}

impl Rule {
    /// Build a custom rule.
    pub fn custom<F>(message: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        Rule::Custom {
            message: message.into(),
            predicate: Arc::new(predicate),
        }
    }

    /// Check a value; an absent field is checked as `Null`.
    pub fn check(&self, value: &Value) -> bool {
        match self {
            Rule::Required => match value {
                Value::Null => false,
                Value::Text(s) => !s.is_empty(),
                _ => true,
            },
            Rule::String => matches!(value, Value::Text(_)),
            Rule::Number => matches!(value, Value::Int(_) | Value::Float(_)),
            Rule::Email => match (value.as_str(), EMAIL_RE.as_ref()) {
                (Some(s), Some(re)) => re.is_match(s),
                _ => false,
            },
            Rule::Min(min) => measure(value).is_some_and(|n| n >= *min),
            Rule::Max(max) => measure(value).is_some_and(|n| n <= *max),
            Rule::Custom { predicate, .. } => predicate(value),
        }
    }

    /// Message reported when the rule fails.
    pub fn message(&self) -> String {
        match self {
            Rule::Required => "This field is required".to_string(),
            Rule::String => "This field must be a string".to_string(),
            Rule::Number => "This field must be a number".to_string(),
            Rule::Email => "This field must be a valid email".to_string(),
            Rule::Min(min) => format!("This field must be at least {}", min),
            Rule::Max(max) => format!("This field must be at most {}", max),
            Rule::Custom { message, .. } => message.clone(),
        }
    }
}

fn measure(value: &Value) -> Option<f64> {
    match value {
        Value::Int(_) | Value::Float(_) => value.as_f64(),
        Value::Text(s) => Some(s.chars().count() as f64),
        Value::Json(serde_json::Value::Array(items)) => Some(items.len() as f64),
        _ => None,
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rule::Required => f.write_str("Required"),
            Rule::String => f.write_str("String"),
            Rule::Number => f.write_str("Number"),
            Rule::Email => f.write_str("Email"),
            Rule::Min(n) => write!(f, "Min({})", n),
            Rule::Max(n) => write!(f, "Max({})", n),
            Rule::Custom { message, .. } => write!(f, "Custom({:?})", message),
        }
    }
}

/// Failed rules, keyed by field, with every failing message in rule order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    fields: BTreeMap<String, Vec<String>>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.fields.entry(field.into()).or_default().push(message.into());
    }

    /// Messages recorded for a field.
    pub fn messages(&self, field: &str) -> &[String] {
        self.fields.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Fields with at least one failure.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("validation failed")?;
        for (i, (field, messages)) in self.fields.iter().enumerate() {
            f.write_str(if i == 0 { ": " } else { "; " })?;
            write!(f, "{}: {}", field, messages.join(", "))?;
        }
        Ok(())
    }
}

/// Validation rules registered per model name.
#[derive(Debug, Default)]
pub struct Validators {
    rules: DashMap<String, Vec<(String, Rule)>>,
}

impl Validators {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add rules for one field of a model.
    pub fn add(&self, model: &str, field: impl Into<String>, rules: impl IntoIterator<Item = Rule>) {
        let field = field.into();
        let mut entry = self.rules.entry(model.to_string()).or_default();
        entry.extend(rules.into_iter().map(|rule| (field.clone(), rule)));
    }

    /// Check if any rule is registered for a model.
    pub fn has_rules(&self, model: &str) -> bool {
        self.rules.get(model).is_some_and(|r| !r.is_empty())
    }

    /// Run every rule of `model` against values looked up by field name.
    pub fn validate<'a>(
        &self,
        model: &str,
        lookup: impl Fn(&str) -> Option<&'a Value>,
    ) -> Result<(), ValidationErrors> {
        let rules = match self.rules.get(model) {
            Some(rules) => rules.clone(),
            None => return Ok(()),
        };

        let null = Value::Null;
        let mut errors = ValidationErrors::new();
        for (field, rule) in &rules {
            let value = lookup(field).unwrap_or(&null);
            if !rule.check(value) {
                errors.add(field.clone(), rule.message());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
