use std::cell::Cell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use proptest::prelude::*;
use sprout_core::{Component, Element, MemoryBackend, NodeId, Props, RenderCx, Tree};

fn keyed_list(keys: &[u8]) -> Element {
    Element::host(
        "column",
        Props::new(),
        keys.iter()
            .map(|key| {
                Element::leaf("text", Props::new().with("value", i64::from(*key))).keyed(key)
            })
            .collect(),
    )
}

fn new_tree() -> Tree<MemoryBackend> {
    let _ = env_logger::builder().is_test(true).try_init();
    Tree::new(MemoryBackend::new())
}

fn ids_by_value(tree: &Tree<MemoryBackend>) -> HashMap<i64, NodeId> {
    let root = tree.root().expect("root");
    tree.children_of(root)
        .iter()
        .filter_map(|id| {
            let render = tree.render_tree().get(tree.render_node_of(*id)?)?;
            Some((render.props().int("value")?, *id))
        })
        .collect()
}

/// Values in the order the host shows them.
fn surface_values(tree: &Tree<MemoryBackend>) -> Vec<i64> {
    let column = tree.root().and_then(|root| tree.render_node_of(root));
    tree.backend()
        .attached_children(column)
        .iter()
        .filter_map(|id| tree.render_tree().get(*id)?.props().int("value"))
        .collect()
}

fn distinct_keys() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::hash_set(0u8..32, 0..12)
        .prop_map(|keys| keys.into_iter().collect::<Vec<_>>())
        .prop_shuffle()
}

struct Tally {
    renders: Rc<Cell<usize>>,
}

impl Component for Tally {
    type State = u64;

    fn init_state(&self) -> u64 {
        0
    }

    fn render(&self, cx: &RenderCx<'_, u64>) -> anyhow::Result<Element> {
        self.renders.set(self.renders.get() + 1);
        let total = cx.read(|total| *total)? as i64;
        Ok(Element::leaf("text", Props::new().with("value", total)))
    }
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

    #[test]
    fn keyed_permutation_reuses_every_node(
        order in (1usize..12).prop_flat_map(|len| Just((0..len as u8).collect::<Vec<_>>()).prop_shuffle())
    ) {
        let mut tree = new_tree();
        let mut sorted = order.clone();
        sorted.sort_unstable();
        tree.mount(keyed_list(&sorted)).expect("mount");
        let before = ids_by_value(&tree);

        let report = tree.mount(keyed_list(&order)).expect("permute");

        prop_assert_eq!(report.created, 0);
        prop_assert_eq!(report.destroyed, 0);
        prop_assert_eq!(ids_by_value(&tree), before);
        let expected: Vec<i64> = order.iter().map(|key| i64::from(*key)).collect();
        prop_assert_eq!(surface_values(&tree), expected);
    }

    #[test]
    fn keyed_transition_touches_only_changed_keys(old in distinct_keys(), new in distinct_keys()) {
        let mut tree = new_tree();
        tree.mount(keyed_list(&old)).expect("mount");
        let before = ids_by_value(&tree);

        let report = tree.mount(keyed_list(&new)).expect("transition");

        let old_set: HashSet<u8> = old.iter().copied().collect();
        let new_set: HashSet<u8> = new.iter().copied().collect();
        prop_assert_eq!(report.created, new_set.difference(&old_set).count());
        prop_assert_eq!(report.destroyed, old_set.difference(&new_set).count());

        let after = ids_by_value(&tree);
        for key in old_set.intersection(&new_set) {
            let value = i64::from(*key);
            prop_assert_eq!(after.get(&value), before.get(&value));
        }
        for (value, id) in &before {
            let survives = new_set.contains(&(*value as u8));
            prop_assert_eq!(tree.is_live(*id), survives);
        }
        let expected: Vec<i64> = new.iter().map(|key| i64::from(*key)).collect();
        prop_assert_eq!(surface_values(&tree), expected);
    }

    #[test]
    fn any_number_of_mutations_rebuilds_once(increments in prop::collection::vec(1u64..100, 1..20)) {
        let renders = Rc::new(Cell::new(0));
        let mut tree = new_tree();
        tree.mount(Element::component(Tally { renders: renders.clone() })).expect("mount");
        let state = tree
            .root()
            .and_then(|root| tree.state_handle::<u64>(root))
            .expect("state handle");

        for increment in &increments {
            state.request_mutation(|total| *total += increment).expect("mutate");
        }
        prop_assert_eq!(tree.scheduler().dirty_len(), 1);

        let report = tree.flush().expect("flush");
        prop_assert_eq!(report.rebuilt, 1);
        prop_assert_eq!(renders.get(), 2);
        prop_assert_eq!(state.read(|total| *total), Ok(increments.iter().sum::<u64>()));
        prop_assert!(!tree.needs_flush());
    }
}
