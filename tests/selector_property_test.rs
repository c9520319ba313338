use content_db::Selector;
use proptest::prelude::*;

const FIELDS: [&str; 3] = ["a", "b", "c"];

fn field() -> impl Strategy<Value = String> {
    return prop_oneof![Just(FIELDS[0]), Just(FIELDS[1]), Just(FIELDS[2])].prop_map(String::from);
}

fn leaf() -> impl Strategy<Value = Selector> {
    return prop_oneof![
        Just(Selector::Include),
        Just(Selector::Exclude),
        Just(Selector::Star),
        Just(Selector::All),
        proptest::collection::vec(field(), 0..3).prop_map(Selector::Fields),
    ];
}

fn selector() -> impl Strategy<Value = Selector> {
    return leaf().prop_recursive(3, 24, 3, |inner| prop_oneof![
        proptest::collection::btree_map(field(), inner.clone(), 0..3).prop_map(Selector::Map),
        proptest::collection::vec(inner, 0..3).prop_map(Selector::Union),
    ]);
}

proptest! {
    #[test]
    fn union_ignores_member_order(
        (members, shuffled) in proptest::collection::vec(selector(), 1..4)
            .prop_flat_map(|v| (Just(v.clone()), Just(v).prop_shuffle()))
    ) {
        let original = Selector::Union(members);
        let permuted = Selector::Union(shuffled);
        for name in FIELDS {
            prop_assert_eq!(original.descend(name), permuted.descend(name));
        }
    }

    #[test]
    fn union_ignores_grouping(a in selector(), b in selector(), c in selector()) {
        let nested = Selector::Union(vec![a.clone(), Selector::Union(vec![b.clone(), c.clone()])]);
        let flat = Selector::Union(vec![a, b, c]);
        for name in FIELDS {
            prop_assert_eq!(nested.descend(name), flat.descend(name));
        }
    }

    #[test]
    fn everything_absorbs_other_members(other in selector()) {
        let union = Selector::Union(vec![other, Selector::All]);
        for name in FIELDS {
            prop_assert_eq!(union.descend(name), Some(Selector::All));
        }
    }

    #[test]
    fn included_fields_stop_descending(name in field()) {
        let include = Selector::from_list(&name).descend(&name);
        prop_assert_eq!(include.clone(), Some(Selector::Include));
        prop_assert_eq!(include.and_then(|s| s.descend(&name)), None);
    }
}
