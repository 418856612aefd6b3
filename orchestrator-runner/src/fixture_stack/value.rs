// Copyright (c) The orchestrator Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The opaque payload a fixture's `SetUp` produces, reused by descendant
//! fixtures and by the tests that depend on it.
//!
//! Same-process consumers get a type-erased [`Arc<dyn Any>`][std::any::Any]
//! back, since there's no need to pay a serialization cost for a value that
//! never leaves the driver process. Cross-process consumers (a local test
//! reading a value set up by a remote fixture, or vice versa) need a
//! representation that can cross the wire, so `FixtureValue` is a small
//! tagged union of primitives plus a structured map of itself.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A `SetUp` return value, shareable with descendant fixtures in-process.
pub type SetupPayload = Arc<dyn Any + Send + Sync>;

/// A wire-transferable fixture value, used when a fixture's `SetUp` result
/// must be visible across the local/remote process boundary.
///
/// See `RemoteValueUnavailableError` for what happens when no such transfer
/// has been implemented for a given pair of sides.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum FixtureValue {
    /// An integer value.
    Int(i64),
    /// A UTF-8 string value.
    Str(String),
    /// An opaque byte blob.
    Bytes(Vec<u8>),
    /// A structured map of further fixture values, for composite results.
    Map(BTreeMap<String, FixtureValue>),
}

impl FixtureValue {
    /// Returns the integer value, if this is an `Int`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            FixtureValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the string value, if this is a `Str`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FixtureValue::Str(v) => Some(v.as_str()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_payload_round_trips_through_any() {
        let payload: SetupPayload = Arc::new(42u32);
        let downcast = payload.downcast_ref::<u32>().copied();
        assert_eq!(downcast, Some(42));
    }

    #[test]
    fn fixture_value_accessors() {
        let v = FixtureValue::Int(7);
        assert_eq!(v.as_int(), Some(7));
        assert_eq!(v.as_str(), None);

        let mut map = BTreeMap::new();
        map.insert("a".to_string(), FixtureValue::Str("b".to_string()));
        let composite = FixtureValue::Map(map);
        assert!(composite.as_int().is_none());
    }
}
