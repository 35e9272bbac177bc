//! Connection keys are canonical over argument order.

use proptest::prelude::*;
use recgraph_test_utils::generators::{arb_argument_value, arb_field_name};
use recgraph_test_utils::{key_for_connection, ArgumentValue, Arguments, Variables};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_object_argument_order_does_not_change_key(
        field in arb_field_name(),
        entries in prop::collection::btree_map("[a-z]{1,6}", arb_argument_value(), 1..6),
    ) {
        let forward: Vec<(String, ArgumentValue)> = entries.into_iter().collect();
        let mut reversed = forward.clone();
        reversed.reverse();

        let a = Arguments::new().with("where", ArgumentValue::Object(forward));
        let b = Arguments::new().with("where", ArgumentValue::Object(reversed));
        let vars = Variables::new();
        prop_assert_eq!(
            key_for_connection("uiapi__query", &field, &a, &vars).unwrap(),
            key_for_connection("uiapi__query", &field, &b, &vars).unwrap()
        );
    }

    #[test]
    fn prop_literal_arguments_always_serialize(value in arb_argument_value()) {
        let args = Arguments::new().with("filter", value);
        let key = key_for_connection("uiapi__query", "Account", &args, &Variables::new());
        prop_assert!(key.is_ok());
        prop_assert!(key.unwrap().starts_with("uiapi__query__Account(filter:"));
    }
}
