//! Property-based test generators using proptest.
//!
//! Provides strategies for keys, values and operation sequences, plus a
//! reference model to check a store against.

use std::collections::BTreeMap;

use flashenv_core::{EnvError, EnvResult, EnvStore};
use proptest::prelude::*;

/// Strategy for valid user keys of up to `max_len` bytes.
pub fn key_strategy(max_len: usize) -> impl Strategy<Value = String> {
    let max_len = max_len.max(1);
    prop::string::string_regex(&format!("[a-z][a-z0-9_.]{{0,{}}}", max_len - 1))
        .expect("Invalid regex")
}

/// Strategy for keys drawn from a small pool, so operations collide often.
pub fn colliding_key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-d]{1,2}").expect("Invalid regex")
}

/// Strategy for values of up to `max_len` bytes.
pub fn value_strategy(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

/// One step against a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvOp {
    /// Store a value.
    Set(String, Vec<u8>),
    /// Remove a key.
    Delete(String),
    /// Compact the active sector.
    Compact,
    /// Reboot: drop the store and open it again on the same flash.
    Reopen,
}

/// Strategy for a single operation over colliding keys.
pub fn op_strategy(max_value_len: usize) -> impl Strategy<Value = EnvOp> {
    prop_oneof![
        6 => (colliding_key_strategy(), value_strategy(max_value_len))
            .prop_map(|(key, value)| EnvOp::Set(key, value)),
        2 => colliding_key_strategy().prop_map(EnvOp::Delete),
        1 => Just(EnvOp::Compact),
        1 => Just(EnvOp::Reopen),
    ]
}

/// Strategy for operation sequences.
pub fn ops_strategy(max_value_len: usize, max_ops: usize) -> impl Strategy<Value = Vec<EnvOp>> {
    prop::collection::vec(op_strategy(max_value_len), 1..=max_ops)
}

/// Reference model: a sorted map with last-write-wins semantics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvModel {
    entries: BTreeMap<String, Vec<u8>>,
}

impl EnvModel {
    /// An empty model.
    pub fn new() -> Self {
        Self::default()
    }

    /// A model holding `defaults`.
    pub fn with_entries<I, K, V>(defaults: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Vec<u8>>,
    {
        Self {
            entries: defaults
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Applies `op` to the model. Returns whether a delete found its key.
    pub fn apply(&mut self, op: &EnvOp) -> bool {
        match op {
            EnvOp::Set(key, value) => {
                self.entries.insert(key.clone(), value.clone());
                true
            }
            EnvOp::Delete(key) => self.entries.remove(key).is_some(),
            EnvOp::Compact | EnvOp::Reopen => true,
        }
    }

    /// The modelled contents.
    pub fn entries(&self) -> &BTreeMap<String, Vec<u8>> {
        &self.entries
    }

    /// Asserts that `store` holds exactly the modelled contents.
    pub fn assert_matches(&self, store: &EnvStore) {
        let actual: BTreeMap<String, Vec<u8>> = store
            .iter()
            .collect::<EnvResult<_>>()
            .expect("iterate environment");
        assert_eq!(actual, self.entries, "store diverged from model");
    }
}

/// Applies a non-reopen `op` to `store`.
///
/// A delete of an absent key is expected to fail with `KeyNotFound` and is
/// reported as `Ok(false)`.
///
/// # Errors
///
/// Returns any other store error.
pub fn apply_to_store(store: &mut EnvStore, op: &EnvOp) -> EnvResult<bool> {
    match op {
        EnvOp::Set(key, value) => store.set(key, value).map(|()| true),
        EnvOp::Delete(key) => match store.delete(key) {
            Ok(()) => Ok(true),
            Err(EnvError::KeyNotFound { .. }) => Ok(false),
            Err(err) => Err(err),
        },
        EnvOp::Compact => store.compact().map(|_| true),
        EnvOp::Reopen => Ok(true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::strategy::ValueTree;
    use proptest::test_runner::TestRunner;

    #[test]
    fn key_strategy_respects_length() {
        let mut runner = TestRunner::default();
        for _ in 0..64 {
            let key = key_strategy(8).new_tree(&mut runner).unwrap().current();
            assert!(!key.is_empty() && key.len() <= 8, "{key:?}");
        }
    }

    #[test]
    fn model_last_write_wins() {
        let mut model = EnvModel::with_entries([("a", "1")]);
        model.apply(&EnvOp::Set("a".into(), b"2".to_vec()));
        assert!(model.apply(&EnvOp::Delete("a".into())));
        assert!(!model.apply(&EnvOp::Delete("a".into())));
        assert!(model.entries().is_empty());
    }
}
