//! Property-based tests for the binary value codec.
//!
//! Tests the following properties:
//! - decompile(compile(v)) == v for nested values
//! - decoding consumes exactly the encoded length
//! - concatenated encodings decode back in order
//! - cutting an encoding short never decodes

use hermes::code::Instructions;
use hermes::codec::{self, CodecError};
use hermes::value::{HashKey, Value};
use proptest::prelude::*;

// =============================================================================
// Strategies for generating values
// =============================================================================

/// Finite floats only; NaN never equals itself.
fn arb_float() -> impl Strategy<Value = f64> {
    prop_oneof![-1.0e12f64..1.0e12f64, Just(0.0), Just(-0.0), Just(f64::INFINITY)]
}

fn arb_hash_key() -> impl Strategy<Value = HashKey> {
    prop_oneof![
        any::<i32>().prop_map(HashKey::Integer),
        any::<bool>().prop_map(HashKey::Boolean),
        "[a-z]{0,6}".prop_map(HashKey::String),
    ]
}

fn arb_function() -> impl Strategy<Value = Value> {
    (prop::collection::vec(any::<u8>(), 0..24), 0usize..8, 0usize..16).prop_map(
        |(code, parameters, locals)| Value::function(Instructions::from(code), parameters, locals.max(parameters)),
    )
}

fn arb_leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<i32>().prop_map(Value::Integer),
        arb_float().prop_map(Value::Float),
        any::<bool>().prop_map(Value::Boolean),
        "\\PC{0,12}".prop_map(Value::String),
        arb_function(),
    ]
}

/// Arrays and hashes nested up to four levels.
fn arb_value() -> impl Strategy<Value = Value> {
    arb_leaf().prop_recursive(4, 64, 5, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..5).prop_map(Value::Array),
            prop::collection::vec((arb_hash_key(), inner), 0..5).prop_map(Value::hash),
        ]
    })
}

/// Always at least three levels deep: `[[{k: leaf}]]`-shaped and richer.
fn arb_deep_value() -> impl Strategy<Value = Value> {
    (arb_value(), arb_hash_key()).prop_map(|(value, key)| {
        let inner = Value::hash([(key, value)]);
        Value::Array(vec![Value::Array(vec![inner])])
    })
}

fn depth(value: &Value) -> usize {
    match value {
        Value::Array(items) => 1 + items.iter().map(depth).max().unwrap_or(0),
        Value::Hash(pairs) => 1 + pairs.values().map(depth).max().unwrap_or(0),
        _ => 0,
    }
}

// =============================================================================
// Round trips
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn round_trip_preserves_value(value in arb_value()) {
        let bytes = codec::compile(&value).unwrap();
        let (decoded, read) = codec::decompile(&bytes).unwrap();
        prop_assert_eq!(&decoded, &value);
        prop_assert_eq!(read, bytes.len());
    }

    #[test]
    fn deep_round_trip(value in arb_deep_value()) {
        prop_assert!(depth(&value) >= 3);
        let bytes = value.compile().unwrap();
        let (decoded, read) = Value::decompile(&bytes).unwrap();
        prop_assert_eq!(&decoded, &value);
        prop_assert_eq!(read, bytes.len());
    }

    #[test]
    fn decoding_ignores_what_follows(value in arb_value(), tail in prop::collection::vec(any::<u8>(), 1..8)) {
        let mut bytes = codec::compile(&value).unwrap();
        let encoded = bytes.len();
        bytes.extend(tail);
        let (decoded, read) = codec::decompile(&bytes).unwrap();
        prop_assert_eq!(decoded, value);
        prop_assert_eq!(read, encoded);
    }

    #[test]
    fn concatenated_values_decode_in_order(values in prop::collection::vec(arb_value(), 0..6)) {
        let mut bytes = Vec::new();
        for value in &values {
            codec::compile_into(value, &mut bytes).unwrap();
        }
        prop_assert_eq!(codec::decompile_all(&bytes).unwrap(), values);
    }

    #[test]
    fn truncated_encoding_fails(value in arb_value(), cut in any::<prop::sample::Index>()) {
        let bytes = codec::compile(&value).unwrap();
        let cut = cut.index(bytes.len());
        let result = codec::decompile(&bytes[..cut]);
        prop_assert!(
            matches!(result, Err(CodecError::CantDecompileValue { .. })),
            "decoding {} of {} bytes gave {:?}", cut, bytes.len(), result
        );
    }
}
