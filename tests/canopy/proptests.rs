use canopy_prolog::*;
use proptest::prelude::*;

fn term() -> impl Strategy<Value = String> {
    let leaf = prop_oneof![
        Just("a".to_string()),
        Just("b".to_string()),
        Just("X".to_string()),
        Just("Y".to_string()),
        Just("Z".to_string()),
        (0..3i64).prop_map(|n| n.to_string()),
        Just("[]".to_string()),
    ];

    leaf.prop_recursive(4, 24, 3, |inner| {
        prop_oneof![
            inner.clone().prop_map(|t| format!("f({})", t)),
            (inner.clone(), inner.clone()).prop_map(|(t, u)| format!("g({}, {})", t, u)),
            (inner.clone(), inner).prop_map(|(t, u)| format!("[{}|{}]", t, u)),
        ]
    })
}

fn succeeds(machine: &mut Machine, query: &str) -> bool {
    machine
        .run_query(query)
        .next()
        .map(|answer| matches!(answer, Ok(answer) if answer.maybe_succeeded()))
        .unwrap_or(false)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn unification_is_symmetric(t in term(), u in term()) {
        let mut machine = MachineBuilder::new().build().unwrap();

        let forward = succeeds(&mut machine, &format!("unify_with_occurs_check({}, {}).", t, u));
        let backward = succeeds(&mut machine, &format!("unify_with_occurs_check({}, {}).", u, t));

        prop_assert_eq!(forward, backward);
    }

    #[test]
    fn unifiers_make_terms_identical(t in term(), u in term()) {
        let mut machine = MachineBuilder::new().build().unwrap();

        let unifies = succeeds(&mut machine, &format!("unify_with_occurs_check({}, {}).", t, u));
        let identical = succeeds(&mut machine, &format!("unify_with_occurs_check({0}, {1}), {0} == {1}.", t, u));

        prop_assert_eq!(unifies, identical);
    }

    #[test]
    fn copies_unify_with_their_originals(t in term()) {
        let mut machine = MachineBuilder::new().build().unwrap();
        let query = format!(
            "T = {}, copy_term(T, C), \\+ \\+ T = C, ( ground(T) -> T == C ; T \\== C ).",
            t
        );

        prop_assert!(succeeds(&mut machine, &query));
    }
}
