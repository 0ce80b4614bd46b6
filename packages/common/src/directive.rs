//! Directive context: validated, serializable flags that steer one
//! attachment / promotion operation.
//!
//! Only the keys in [`DirectiveKey`] exist. Anything else is rejected when it
//! is set, so a typo in a batch script fails the call that made it instead of
//! silently doing the default thing inside a background job later.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectiveError {
    #[error("Unrecognized directive '{0}'. Valid directives: {keys}", keys = DirectiveKey::names())]
    UnknownKey(String),

    #[error("Invalid value {value} for directive '{key}'")]
    InvalidValue { key: DirectiveKey, value: String },
}

/// The closed set of recognized directive names.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DirectiveKey {
    /// `true` (background, default), `false`, or `inline`.
    Promote,
    /// `true` or `false` (default).
    SkipCallbacks,
    /// `true` (background, default), `false`, or `inline`.
    CreateDerivatives,
    /// `true` (background, default), `false`, or `inline`.
    Delete,
}

impl DirectiveKey {
    pub const ALL: &'static [DirectiveKey] = &[
        Self::Promote,
        Self::SkipCallbacks,
        Self::CreateDerivatives,
        Self::Delete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Promote => "promote",
            Self::SkipCallbacks => "skip_callbacks",
            Self::CreateDerivatives => "create_derivatives",
            Self::Delete => "delete",
        }
    }

    /// Value used when neither the instance nor the process defaults set the key.
    pub fn default_value(&self) -> DirectiveValue {
        match self {
            Self::SkipCallbacks => DirectiveValue::Bool(false),
            _ => DirectiveValue::Bool(true),
        }
    }

    fn accepts(&self, value: DirectiveValue) -> bool {
        match self {
            Self::SkipCallbacks => matches!(value, DirectiveValue::Bool(_)),
            _ => true,
        }
    }

    fn names() -> String {
        Self::ALL
            .iter()
            .map(|k| k.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for DirectiveKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DirectiveKey {
    type Err = DirectiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| DirectiveError::UnknownKey(s.to_string()))
    }
}

/// A directive value: a boolean or the `inline` symbol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DirectiveValue {
    Bool(bool),
    Inline,
}

impl DirectiveValue {
    /// Primitive representation used on the wire.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Bool(b) => Value::Bool(*b),
            Self::Inline => Value::String("inline".into()),
        }
    }

    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

impl From<bool> for DirectiveValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl fmt::Display for DirectiveValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Inline => f.write_str("inline"),
        }
    }
}

impl FromStr for DirectiveValue {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "true" => Ok(Self::Bool(true)),
            "false" => Ok(Self::Bool(false)),
            "inline" => Ok(Self::Inline),
            _ => Err(()),
        }
    }
}

/// How a directive-controlled step should run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Hand the work to the job queue.
    Background,
    /// Run it in the calling context.
    Inline,
    /// Don't run it.
    Disabled,
}

impl From<DirectiveValue> for ExecutionMode {
    fn from(value: DirectiveValue) -> Self {
        match value {
            DirectiveValue::Bool(true) => Self::Background,
            DirectiveValue::Bool(false) => Self::Disabled,
            DirectiveValue::Inline => Self::Inline,
        }
    }
}

/// A set of directives. Unset keys fall back to whatever this set is layered
/// over, and finally to [`DirectiveKey::default_value`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Directives {
    values: BTreeMap<DirectiveKey, DirectiveValue>,
}

impl Directives {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a directive by name, validating both name and value.
    pub fn set(
        &mut self,
        key: &str,
        value: impl Into<DirectiveValue>,
    ) -> Result<&mut Self, DirectiveError> {
        let key: DirectiveKey = key.parse()?;
        self.set_key(key, value.into())
    }

    pub fn set_key(
        &mut self,
        key: DirectiveKey,
        value: DirectiveValue,
    ) -> Result<&mut Self, DirectiveError> {
        if !key.accepts(value) {
            return Err(DirectiveError::InvalidValue {
                key,
                value: value.to_string(),
            });
        }
        self.values.insert(key, value);
        Ok(self)
    }

    /// Set a directive from its textual form (`true`, `false`, `inline`).
    pub fn set_str(&mut self, key: &str, value: &str) -> Result<&mut Self, DirectiveError> {
        let key: DirectiveKey = key.parse()?;
        let parsed = value
            .parse::<DirectiveValue>()
            .map_err(|_| DirectiveError::InvalidValue {
                key,
                value: format!("'{value}'"),
            })?;
        self.set_key(key, parsed)
    }

    /// Builder-style [`Directives::set`].
    pub fn with(
        mut self,
        key: &str,
        value: impl Into<DirectiveValue>,
    ) -> Result<Self, DirectiveError> {
        self.set(key, value)?;
        Ok(self)
    }

    pub fn unset(&mut self, key: DirectiveKey) -> Option<DirectiveValue> {
        self.values.remove(&key)
    }

    pub fn get(&self, key: DirectiveKey) -> Option<DirectiveValue> {
        self.values.get(&key).copied()
    }

    /// The value in effect for `key`, falling back to the built-in default.
    pub fn effective(&self, key: DirectiveKey) -> DirectiveValue {
        self.get(key).unwrap_or_else(|| key.default_value())
    }

    pub fn promote(&self) -> ExecutionMode {
        self.effective(DirectiveKey::Promote).into()
    }

    pub fn create_derivatives(&self) -> ExecutionMode {
        self.effective(DirectiveKey::CreateDerivatives).into()
    }

    pub fn delete(&self) -> ExecutionMode {
        self.effective(DirectiveKey::Delete).into()
    }

    pub fn skip_callbacks(&self) -> bool {
        self.effective(DirectiveKey::SkipCallbacks) == DirectiveValue::Bool(true)
    }

    /// These directives on top of `defaults`: keys set here win, unset keys
    /// come from `defaults`.
    pub fn layered_over(&self, defaults: &Directives) -> Directives {
        let mut values = defaults.values.clone();
        values.extend(self.values.iter().map(|(k, v)| (*k, *v)));
        Directives { values }
    }

    pub fn iter(&self) -> impl Iterator<Item = (DirectiveKey, DirectiveValue)> + '_ {
        self.values.iter().map(|(k, v)| (*k, *v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Primitive map suitable for a queue payload.
    pub fn to_serialized(&self) -> BTreeMap<String, Value> {
        self.values
            .iter()
            .map(|(k, v)| (k.as_str().to_string(), v.to_json()))
            .collect()
    }

    /// Restore from [`Directives::to_serialized`] output. Unknown keys and
    /// malformed values are errors, never dropped.
    pub fn from_serialized(map: &BTreeMap<String, Value>) -> Result<Self, DirectiveError> {
        let mut directives = Self::new();
        for (name, raw) in map {
            let key: DirectiveKey = name.parse()?;
            let value = DirectiveValue::from_json(raw).ok_or_else(|| {
                DirectiveError::InvalidValue {
                    key,
                    value: raw.to_string(),
                }
            })?;
            directives.set_key(key, value)?;
        }
        Ok(directives)
    }
}

impl Serialize for Directives {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_serialized().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Directives {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = BTreeMap::<String, Value>::deserialize(deserializer)?;
        Self::from_serialized(&map).map_err(serde::de::Error::custom)
    }
}

/// Process-wide directive defaults for one class of assets.
///
/// Cloned handles share state. Instance-level directives are layered over a
/// snapshot taken when an operation starts.
#[derive(Clone, Debug, Default)]
pub struct DirectiveDefaults {
    inner: Arc<RwLock<Directives>>,
}

impl DirectiveDefaults {
    pub fn new(initial: Directives) -> Self {
        Self {
            inner: Arc::new(RwLock::new(initial)),
        }
    }

    pub fn snapshot(&self) -> Directives {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set(&self, key: &str, value: impl Into<DirectiveValue>) -> Result<(), DirectiveError> {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .set(key, value)?;
        Ok(())
    }

    /// Swap in a new set of defaults, returning the previous one.
    pub fn replace(&self, directives: Directives) -> Directives {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, directives)
    }

    /// Drop every default, leaving only the built-in ones.
    pub fn reset(&self) {
        self.replace(Directives::new());
    }

    /// Layer `overrides` over the current defaults until the returned guard
    /// is dropped, then put back what those keys held before.
    ///
    /// Only the overridden keys are restored: defaults set on other keys
    /// while the scope is open survive it. Scopes that override the same key
    /// must be dropped in reverse order of creation, or the outer scope's
    /// value comes back after it ended.
    ///
    /// The override is process-wide: every operation started while the guard
    /// is alive sees it. Intended for batch runs that want one policy for the
    /// whole run.
    pub fn scoped(&self, overrides: &Directives) -> ScopedDefaults {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let previous = overrides
            .iter()
            .map(|(key, value)| (key, guard.values.insert(key, value)))
            .collect();
        ScopedDefaults {
            defaults: self.clone(),
            previous,
        }
    }

    /// Effective directives for an operation configured with `instance`.
    pub fn resolve(&self, instance: &Directives) -> Directives {
        instance.layered_over(&self.snapshot())
    }
}

/// Restores the overridden keys on drop. See [`DirectiveDefaults::scoped`].
#[must_use = "the override is undone as soon as the guard is dropped"]
pub struct ScopedDefaults {
    defaults: DirectiveDefaults,
    /// Each overridden key with the value it had before, if any.
    previous: Vec<(DirectiveKey, Option<DirectiveValue>)>,
}

impl Drop for ScopedDefaults {
    fn drop(&mut self) {
        let mut guard = self
            .defaults
            .inner
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        for (key, value) in self.previous.drain(..) {
            match value {
                Some(value) => guard.values.insert(key, value),
                None => guard.values.remove(&key),
            };
        }
    }
}
