use std::fmt::Debug;

use proptest::{
    arbitrary::{any, Arbitrary},
    prop_assert_eq, proptest,
    strategy::Strategy,
    test_runner::Config,
};
use serde::{de::DeserializeOwned, Serialize};
use strum::VariantArray;

/// Quickly create a [`serde_json::Value`] canonical roundtrip proptest. This
/// test is useful for dictionary-like types that serialize to/from a JSON
/// object.
///
/// We compare [`serde_json::Value`]s rather than serialized strings since the
/// `Value` comparison is field order-invariant.
pub fn json_value_canonical_proptest<T>()
where
    T: Arbitrary + PartialEq + Serialize + DeserializeOwned,
{
    json_value_custom(any::<T>(), Config::default());
}

/// Create a [`serde_json::Value`] canonical roundtrip proptest using a custom
/// strategy and custom proptest [`Config`]. Useful for testing foreign types
/// for which we cannot implement [`Arbitrary`], or for reducing the number of
/// iterations on proptests that would otherwise take too long.
pub fn json_value_custom<S, T>(strategy: S, config: Config)
where
    S: Strategy<Value = T>,
    T: PartialEq + Serialize + DeserializeOwned + Debug,
{
    proptest!(config, |(value1 in strategy)| {
        let json_value1 = serde_json::to_value(&value1).unwrap();
        let value2 = serde_json::from_value(json_value1.clone()).unwrap();
        let json_value2 = serde_json::to_value(&value2).unwrap();

        prop_assert_eq!(&value1, &value2);
        prop_assert_eq!(&json_value1, &json_value2);
    });
}

/// Quickly create a JSON string roundtrip proptest. This test is useful for
/// simple data types that map to/from a single base JSON type (string, int).
pub fn json_string_roundtrip_proptest<T>()
where
    T: Arbitrary + PartialEq + Serialize + DeserializeOwned,
{
    proptest!(|(value1: T)| {
        let json_value1 = serde_json::to_string(&value1).unwrap();
        let value2 = serde_json::from_str::<T>(&json_value1).unwrap();
        prop_assert_eq!(&value1, &value2);
    });
}

/// Checks that the serialized forms of a unit enum's variants match a
/// hard-coded JSON array, catching accidental renames that would break data
/// already persisted by a store or sent by an external service.
///
/// ```ignore
/// let expected_ser = r#"["pending","completed","failed","reversed"]"#;
/// json_unit_enum_backwards_compat::<TxnStatus>(expected_ser);
/// ```
pub fn json_unit_enum_backwards_compat<T>(expected_ser: &str)
where
    T: VariantArray + PartialEq + Debug + Serialize + DeserializeOwned,
{
    let variants = T::VARIANTS;
    let actual_ser = serde_json::to_string(variants).unwrap();
    assert_eq!(actual_ser, expected_ser);

    let deserialized = serde_json::from_str::<Vec<T>>(expected_ser).unwrap();
    assert_eq!(deserialized.as_slice(), variants);
}
