//! Batching strategies.
//!
//! A strategy answers two questions about every inbound message: should it be batched,
//! and if so under which batch id. In-process callers implement [`BatchingStrategy`]
//! directly (or wrap two closures in [`FnStrategy`]). Strategies sent to the transport
//! worker travel as [`SerializedStrategy`], a small expression tree over JSON pointers
//! that is reconstructed into a [`CompiledStrategy`] on the worker side.

use std::error::Error as StdError;
use std::fmt;

use bon::Builder;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Result;
use crate::error::{Error, Kind};

/// Classifies inbound messages for the batcher.
///
/// Implementations run inside the transport worker for every inbound message and must
/// be cheap and free of side effects.
pub trait BatchingStrategy: Send + 'static {
    /// Whether `message` goes into a batch rather than being delivered on its own.
    fn should_batch_message(&self, message: &Value) -> bool;

    /// The batch id `message` is grouped under.
    fn batch_id(&self, message: &Value) -> Result<String>;
}

impl<S: BatchingStrategy + ?Sized> BatchingStrategy for Box<S> {
    fn should_batch_message(&self, message: &Value) -> bool {
        (**self).should_batch_message(message)
    }

    fn batch_id(&self, message: &Value) -> Result<String> {
        (**self).batch_id(message)
    }
}

/// A [`BatchingStrategy`] made of two closures.
pub struct FnStrategy<P, K> {
    should_batch: P,
    batch_id: K,
}

impl<P, K> FnStrategy<P, K>
where
    P: Fn(&Value) -> bool + Send + 'static,
    K: Fn(&Value) -> String + Send + 'static,
{
    pub fn new(should_batch: P, batch_id: K) -> Self {
        Self {
            should_batch,
            batch_id,
        }
    }
}

impl<P, K> BatchingStrategy for FnStrategy<P, K>
where
    P: Fn(&Value) -> bool + Send + 'static,
    K: Fn(&Value) -> String + Send + 'static,
{
    fn should_batch_message(&self, message: &Value) -> bool {
        (self.should_batch)(message)
    }

    fn batch_id(&self, message: &Value) -> Result<String> {
        Ok((self.batch_id)(message))
    }
}

impl<P, K> fmt::Debug for FnStrategy<P, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnStrategy").finish_non_exhaustive()
    }
}

/// Wire form of a batching strategy.
///
/// Serializes as
/// `{"shouldBatchMessage": <predicate>, "getBatchIdFromMessage": <key>}`.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[serde(rename_all = "camelCase")]
pub struct SerializedStrategy {
    /// Decides whether a message is batched
    pub should_batch_message: Predicate,
    /// Derives the batch id of a batched message
    pub get_batch_id_from_message: KeyExpr,
}

impl SerializedStrategy {
    #[must_use]
    pub fn new(should_batch_message: Predicate, get_batch_id_from_message: KeyExpr) -> Self {
        Self {
            should_batch_message,
            get_batch_id_from_message,
        }
    }

    /// Validate the expression trees and turn them into a callable strategy.
    pub fn reconstruct(self) -> Result<CompiledStrategy> {
        self.should_batch_message.validate()?;
        self.get_batch_id_from_message.validate()?;

        Ok(CompiledStrategy {
            should_batch: self.should_batch_message,
            batch_id: self.get_batch_id_from_message,
        })
    }
}

/// Boolean test on a message. Pointers use RFC 6901 syntax (`/payload/kind`).
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Predicate {
    /// Every message matches
    Always,
    /// No message matches
    Never,
    /// The pointer resolves to a non-null value
    Exists { pointer: String },
    /// The pointer resolves to exactly `value`
    Equals { pointer: String, value: Value },
    /// The pointer resolves to one of `values`
    OneOf { pointer: String, values: Vec<Value> },
    /// All nested predicates match
    All { predicates: Vec<Predicate> },
    /// At least one nested predicate matches
    Any { predicates: Vec<Predicate> },
    /// The nested predicate does not match
    Not { predicate: Box<Predicate> },
}

impl Predicate {
    #[must_use]
    pub fn exists<S: Into<String>>(pointer: S) -> Self {
        Self::Exists {
            pointer: pointer.into(),
        }
    }

    #[must_use]
    pub fn equals<S: Into<String>, V: Into<Value>>(pointer: S, value: V) -> Self {
        Self::Equals {
            pointer: pointer.into(),
            value: value.into(),
        }
    }

    fn validate(&self) -> std::result::Result<(), StrategyError> {
        match self {
            Self::Always | Self::Never => Ok(()),
            Self::Exists { pointer }
            | Self::Equals { pointer, .. }
            | Self::OneOf { pointer, .. } => validate_pointer(pointer),
            Self::All { predicates } | Self::Any { predicates } => {
                predicates.iter().try_for_each(Self::validate)
            }
            Self::Not { predicate } => predicate.validate(),
        }
    }

    fn matches(&self, message: &Value) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::Exists { pointer } => message.pointer(pointer).is_some_and(|v| !v.is_null()),
            Self::Equals { pointer, value } => message.pointer(pointer) == Some(value),
            Self::OneOf { pointer, values } => message
                .pointer(pointer)
                .is_some_and(|found| values.contains(found)),
            Self::All { predicates } => predicates.iter().all(|p| p.matches(message)),
            Self::Any { predicates } => predicates.iter().any(|p| p.matches(message)),
            Self::Not { predicate } => !predicate.matches(message),
        }
    }
}

/// Expression producing a batch id from a message.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum KeyExpr {
    /// A fixed id
    Constant { value: String },
    /// A string, number or boolean found at `pointer`; `default` is used when it is absent
    Field {
        pointer: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<String>,
    },
    /// Several ids joined with `separator`
    Concat {
        parts: Vec<KeyExpr>,
        #[serde(default)]
        separator: String,
    },
}

impl KeyExpr {
    #[must_use]
    pub fn constant<S: Into<String>>(value: S) -> Self {
        Self::Constant {
            value: value.into(),
        }
    }

    #[must_use]
    pub fn field<S: Into<String>>(pointer: S) -> Self {
        Self::Field {
            pointer: pointer.into(),
            default: None,
        }
    }

    fn validate(&self) -> std::result::Result<(), StrategyError> {
        match self {
            Self::Constant { .. } => Ok(()),
            Self::Field { pointer, .. } => validate_pointer(pointer),
            Self::Concat { parts, .. } if parts.is_empty() => Err(StrategyError::EmptyConcat),
            Self::Concat { parts, .. } => parts.iter().try_for_each(Self::validate),
        }
    }

    fn evaluate(&self, message: &Value) -> std::result::Result<String, StrategyError> {
        match self {
            Self::Constant { value } => Ok(value.clone()),
            Self::Field { pointer, default } => match message.pointer(pointer) {
                Some(Value::String(s)) => Ok(s.clone()),
                Some(v @ (Value::Number(_) | Value::Bool(_))) => Ok(v.to_string()),
                None | Some(Value::Null) => {
                    default.clone().ok_or_else(|| StrategyError::MissingKey {
                        pointer: pointer.clone(),
                    })
                }
                Some(Value::Array(_) | Value::Object(_)) => Err(StrategyError::UnsupportedKey {
                    pointer: pointer.clone(),
                }),
            },
            Self::Concat { parts, separator } => {
                let parts = parts
                    .iter()
                    .map(|part| part.evaluate(message))
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(parts.join(separator))
            }
        }
    }
}

fn validate_pointer(pointer: &str) -> std::result::Result<(), StrategyError> {
    if pointer.is_empty() || pointer.starts_with('/') {
        Ok(())
    } else {
        Err(StrategyError::InvalidPointer(pointer.to_owned()))
    }
}

/// A [`SerializedStrategy`] that passed validation.
#[derive(Debug, Clone)]
pub struct CompiledStrategy {
    should_batch: Predicate,
    batch_id: KeyExpr,
}

impl BatchingStrategy for CompiledStrategy {
    fn should_batch_message(&self, message: &Value) -> bool {
        self.should_batch.matches(message)
    }

    fn batch_id(&self, message: &Value) -> Result<String> {
        Ok(self.batch_id.evaluate(message)?)
    }
}

/// Failure to reconstruct or apply a [`SerializedStrategy`].
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyError {
    /// A JSON pointer that does not start with `/`
    InvalidPointer(String),
    /// A `concat` key with no parts
    EmptyConcat,
    /// The key field is absent and no default was given
    MissingKey { pointer: String },
    /// The key field is an array or object
    UnsupportedKey { pointer: String },
    /// The batch id collides with a key the [`Batch`](super::Batch) wire form reserves
    ReservedKey(String),
}

impl fmt::Display for StrategyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPointer(pointer) => write!(f, "invalid JSON pointer `{pointer}`"),
            Self::EmptyConcat => write!(f, "concat key expression has no parts"),
            Self::MissingKey { pointer } => write!(f, "message has no batch id at `{pointer}`"),
            Self::UnsupportedKey { pointer } => {
                write!(f, "batch id at `{pointer}` is not a string, number or boolean")
            }
            Self::ReservedKey(batch_id) => write!(f, "batch id `{batch_id}` is reserved"),
        }
    }
}

impl StdError for StrategyError {}

impl From<StrategyError> for Error {
    fn from(e: StrategyError) -> Self {
        Error::with_source(Kind::Strategy, e)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn telemetry_strategy() -> SerializedStrategy {
        SerializedStrategy::builder()
            .should_batch_message(Predicate::equals("/type", "telemetry"))
            .get_batch_id_from_message(KeyExpr::Concat {
                parts: vec![KeyExpr::field("/id/namespace"), KeyExpr::field("/id/key")],
                separator: ":".to_owned(),
            })
            .build()
    }

    #[test]
    fn reconstructs_from_wire_form() {
        let wire = json!({
            "shouldBatchMessage": { "op": "equals", "pointer": "/type", "value": "telemetry" },
            "getBatchIdFromMessage": {
                "op": "concat",
                "separator": ":",
                "parts": [
                    { "op": "field", "pointer": "/id/namespace" },
                    { "op": "field", "pointer": "/id/key" }
                ]
            }
        });

        let serialized: SerializedStrategy = serde_json::from_value(wire).unwrap();
        assert_eq!(serialized, telemetry_strategy());

        let strategy = serialized.reconstruct().unwrap();
        let message = json!({ "type": "telemetry", "id": { "namespace": "sc", "key": "temp" } });
        assert!(strategy.should_batch_message(&message));
        assert_eq!(strategy.batch_id(&message).unwrap(), "sc:temp");
        assert!(!strategy.should_batch_message(&json!({ "type": "event" })));
    }

    #[test]
    fn rejects_relative_pointer() {
        let serialized = SerializedStrategy::new(Predicate::exists("value"), KeyExpr::constant("k"));

        let err = serialized.reconstruct().unwrap_err();

        assert_eq!(err.kind(), Kind::Strategy);
        assert_eq!(
            err.downcast_ref::<StrategyError>(),
            Some(&StrategyError::InvalidPointer("value".to_owned()))
        );
    }

    #[test]
    fn rejects_empty_concat_and_nested_bad_pointer() {
        let empty = SerializedStrategy::new(
            Predicate::Always,
            KeyExpr::Concat {
                parts: Vec::new(),
                separator: String::new(),
            },
        );
        assert!(empty.reconstruct().is_err());

        let nested = SerializedStrategy::new(
            Predicate::Not {
                predicate: Box::new(Predicate::All {
                    predicates: vec![Predicate::Always, Predicate::exists("oops")],
                }),
            },
            KeyExpr::constant("k"),
        );
        assert!(nested.reconstruct().is_err());
    }

    #[test]
    fn unknown_operator_is_rejected_when_parsing() {
        let wire = json!({
            "shouldBatchMessage": { "op": "eval", "source": "() => true" },
            "getBatchIdFromMessage": { "op": "constant", "value": "k" }
        });

        assert!(serde_json::from_value::<SerializedStrategy>(wire).is_err());
    }

    #[test]
    fn missing_key_uses_default_or_fails() {
        let message = json!({ "value": 1 });

        let with_default = SerializedStrategy::new(
            Predicate::Always,
            KeyExpr::Field {
                pointer: "/id".to_owned(),
                default: Some("unkeyed".to_owned()),
            },
        )
        .reconstruct()
        .unwrap();
        assert_eq!(with_default.batch_id(&message).unwrap(), "unkeyed");

        let strict = SerializedStrategy::new(Predicate::Always, KeyExpr::field("/id"))
            .reconstruct()
            .unwrap();
        let err = strict.batch_id(&message).unwrap_err();
        assert_eq!(err.kind(), Kind::Strategy);
    }

    #[test]
    fn numeric_and_boolean_keys_are_stringified() {
        let strategy = SerializedStrategy::new(Predicate::Always, KeyExpr::field("/channel"))
            .reconstruct()
            .unwrap();

        assert_eq!(strategy.batch_id(&json!({ "channel": 7 })).unwrap(), "7");
        assert_eq!(strategy.batch_id(&json!({ "channel": true })).unwrap(), "true");
        assert!(strategy.batch_id(&json!({ "channel": [1] })).is_err());
    }

    #[test]
    fn one_of_and_any_predicates() {
        let predicate = Predicate::Any {
            predicates: vec![
                Predicate::OneOf {
                    pointer: "/kind".to_owned(),
                    values: vec![json!("a"), json!("b")],
                },
                Predicate::exists("/urgent"),
            ],
        };

        assert!(predicate.matches(&json!({ "kind": "b" })));
        assert!(predicate.matches(&json!({ "urgent": 1 })));
        assert!(!predicate.matches(&json!({ "kind": "c", "urgent": null })));
    }
}
