use aqlbridge::query::{UpdateMode, normalize, render_filter};
use proptest::prelude::*;
use serde_json::{Map, Value, json};

fn field() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,8}".prop_filter("combinator keys", |f| f != "and" && f != "or")
}

fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i64>().prop_map(Value::from),
        any::<bool>().prop_map(Value::from),
        "[a-zA-Z ]{0,12}".prop_map(Value::from),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        failure_persistence: Some(Box::new(proptest::test_runner::FileFailurePersistence::WithSource("proptest-regressions"))),
        .. ProptestConfig::default()
    })]

    #[test]
    fn equality_renders_field_and_literal(f in field(), v in scalar()) {
        let text = render_filter(&json!({ f.clone(): v.clone() })).unwrap();
        prop_assert!(text.starts_with(&format!("record.{f} == ")), "{}", text);
    }

    #[test]
    fn single_in_equals_equality(f in field(), v in scalar()) {
        let one = render_filter(&json!({ f.clone(): {"$in": [v.clone()]} })).unwrap();
        let eq = render_filter(&json!({ f: v })).unwrap();
        prop_assert_eq!(one, eq);
    }

    #[test]
    fn multi_in_keeps_order(f in field(), vs in proptest::collection::vec(any::<u32>(), 2..6)) {
        let text = render_filter(&json!({ f.clone(): {"$in": vs.clone()} })).unwrap();
        let joined = vs.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ");
        prop_assert_eq!(text, format!("record.{f} IN [{joined}]"));
    }

    #[test]
    fn normalize_plain_is_fixed_point(m in proptest::collection::btree_map(field(), scalar(), 0..6)) {
        let input = Value::Object(m.into_iter().collect::<Map<_, _>>());
        let once = normalize(&input, UpdateMode::Value).unwrap();
        let plain = once.final_values.to_plain().unwrap();
        prop_assert_eq!(&Value::Object(plain.clone()), &input);
        let twice = normalize(&Value::Object(plain), UpdateMode::Value).unwrap();
        prop_assert_eq!(once, twice);
    }
}
