//! Replaying any edit sequence converges on the graph obtained by compiling
//! only the surviving units from scratch.

use std::collections::BTreeMap;

use proptest::prelude::*;

use metagraph_compiler::fragment::{self, call, class, function, property};
use metagraph_compiler::{Delta, IncrementalCompiler, UnitSource, ValueFragment};
use metagraph_core::m3::props;
use metagraph_core::UnitId;

const UNITS: [&str; 4] = ["a.pure", "b.pure", "g.pure", "h.pure"];

/// Two content variants per unit. Some depend on others, so a fraction of
/// the generated edits fail and must leave no trace.
fn source(unit: usize, variant: usize) -> UnitSource {
    let id = UNITS[unit];
    let element = match (unit, variant) {
        (0, 0) => class("test", "A"),
        (0, _) => class("test", "A")
            .node
            .with(props::PROPERTIES, property("size", "Integer", "1"))
            .into_element("test"),
        (1, 0) => class("test", "B")
            .node
            .with(props::GENERALIZATIONS, ValueFragment::reference("A"))
            .into_element("test"),
        (1, _) => class("test", "B")
            .node
            .with(props::PROPERTIES, property("owner", "A", "0..1"))
            .into_element("test"),
        (2, v) => function(
            "test",
            "g",
            &[],
            "Integer",
            "1",
            vec![fragment::integer(v as i64)],
        ),
        (_, 0) => function("test", "h", &[], "Integer", "1", vec![call("g", vec![])]),
        (_, _) => function(
            "test",
            "h",
            &[],
            "Boolean",
            "1",
            vec![call("not", vec![fragment::boolean(true)])],
        ),
    };
    UnitSource::new(id).element(element)
}

#[derive(Debug, Clone)]
enum Edit {
    Upsert(usize, usize),
    Remove(usize),
}

fn edit() -> impl Strategy<Value = Edit> {
    prop_oneof![
        3 => (0..UNITS.len(), 0..2usize).prop_map(|(u, v)| Edit::Upsert(u, v)),
        1 => (0..UNITS.len()).prop_map(Edit::Remove),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn convergent_edits_match_a_fresh_compile(edits in prop::collection::vec(edit(), 1..12)) {
        let mut live = IncrementalCompiler::new().unwrap();
        let mut surviving: BTreeMap<usize, usize> = BTreeMap::new();

        for edit in &edits {
            match *edit {
                Edit::Upsert(u, v) => {
                    if live.add_or_update(source(u, v)).is_ok() {
                        surviving.insert(u, v);
                    }
                }
                Edit::Remove(u) => {
                    if live.remove(&UnitId::new(UNITS[u])).is_ok() {
                        surviving.remove(&u);
                    }
                }
            }
            prop_assert!(live.integrity_check().is_empty(), "{:?}", live.integrity_check());
        }

        let mut fresh = IncrementalCompiler::new().unwrap();
        let mut delta = Delta::new();
        for (u, v) in &surviving {
            delta = delta.upsert(source(*u, *v));
        }
        fresh.apply(delta).unwrap();

        prop_assert_eq!(live.snapshot(), fresh.snapshot());
        let live_units: Vec<UnitId> = live.units().map(|u| u.id.clone()).collect();
        let fresh_units: Vec<UnitId> = fresh.units().map(|u| u.id.clone()).collect();
        prop_assert_eq!(live_units, fresh_units);
    }
}
