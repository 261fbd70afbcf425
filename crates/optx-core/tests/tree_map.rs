//! Counting and ranking properties of the tree enumeration map.

use optx_core::error::OptError;
use optx_core::tree_map::TreeMap;
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Tree(String, Vec<Tree>);

type Rehydrate = fn(&String, Vec<Tree>, &()) -> Tree;

fn rebuild(value: &String, children: Vec<Tree>, _: &()) -> Tree {
    Tree(value.clone(), children)
}

fn map() -> TreeMap<String, Tree, (), Rehydrate> {
    TreeMap::new(rebuild as Rehydrate)
}

fn leaf(name: &str) -> Tree {
    Tree(name.to_string(), vec![])
}

fn edge(m: &mut TreeMap<String, Tree, (), Rehydrate>, parent: &str, slot: usize, child: &str) {
    m.insert_edge(parent.to_string(), slot, child.to_string()).unwrap();
}

#[test]
fn test_mixed_radix_ranks() {
    // p has two slots: {x, y} and {u, v, w}.
    let mut m = map();
    m.insert_root("p".to_string());
    for child in ["x", "y"] {
        edge(&mut m, "p", 0, child);
    }
    for child in ["u", "v", "w"] {
        edge(&mut m, "p", 1, child);
    }
    assert_eq!(m.count().unwrap(), 6);

    let slot0 = ["x", "y"];
    let slot1 = ["u", "v", "w"];
    for rank in 0..6u64 {
        let expected = Tree(
            "p".to_string(),
            vec![leaf(slot0[(rank % 2) as usize]), leaf(slot1[(rank / 2) as usize])],
        );
        assert_eq!(m.unrank(rank, &()).unwrap(), expected, "rank {rank}");
    }
    assert_eq!(
        m.unrank(6, &()).unwrap_err(),
        OptError::RankOutOfRange { rank: 6, count: 6 }
    );
}

#[test]
fn test_unrank_is_a_bijection_over_shared_subtrees() {
    // Two top-level alternatives sharing the subtree below s.
    //   r1 -> [s | t] [s | leaf1]
    //   r2 -> [s]
    //   s  -> [a | b]
    let mut m = map();
    m.insert_root("r1".to_string());
    m.insert_root("r2".to_string());
    edge(&mut m, "r1", 0, "s");
    edge(&mut m, "r1", 0, "t");
    edge(&mut m, "r1", 1, "s");
    edge(&mut m, "r1", 1, "leaf1");
    edge(&mut m, "r2", 0, "s");
    edge(&mut m, "s", 0, "a");
    edge(&mut m, "s", 0, "b");

    // r1: (2 + 1) * (2 + 1) = 9, r2: 2.
    let count = m.count().unwrap();
    assert_eq!(count, 11);
    assert_eq!(m.count_of(&"r1".to_string()), Some(9));
    assert_eq!(m.count_of(&"s".to_string()), Some(2));

    let trees: HashSet<Tree> = (0..count).map(|r| m.unrank(r, &()).unwrap()).collect();
    assert_eq!(trees.len() as u64, count);
}

#[test]
fn test_repeated_edges_are_ignored() {
    let mut m = map();
    m.insert_root("p".to_string());
    for _ in 0..3 {
        edge(&mut m, "p", 0, "x");
        edge(&mut m, "p", 0, "y");
    }
    m.insert_root("p".to_string());
    assert_eq!(m.count().unwrap(), 2);
    assert_eq!(m.len(), 3);
}

#[test]
fn test_count_picks_up_new_edges() {
    let mut m = map();
    edge(&mut m, "p", 0, "x");
    assert_eq!(m.count().unwrap(), 1);
    edge(&mut m, "p", 0, "y");
    assert_eq!(m.count().unwrap(), 2);
    assert_eq!(
        m.unrank(1, &()).unwrap(),
        Tree("p".to_string(), vec![leaf("y")])
    );
}

#[test]
fn test_cycle_is_reported() {
    let mut m = map();
    edge(&mut m, "a", 0, "b");
    edge(&mut m, "b", 0, "c");
    edge(&mut m, "c", 0, "a");
    assert!(matches!(m.count(), Err(OptError::StructuralCycle(_))));
    // Still reported on a second attempt.
    assert!(matches!(m.count(), Err(OptError::StructuralCycle(_))));
}

#[test]
fn test_count_saturates() {
    // 64 levels, each doubling the count: 2^64 trees do not fit in a u64.
    let mut m = map();
    m.insert_root("level0".to_string());
    for level in 0..64 {
        let node = format!("level{level}");
        edge(&mut m, &node, 0, &format!("left{level}"));
        edge(&mut m, &node, 0, &format!("right{level}"));
        edge(&mut m, &node, 1, &format!("level{}", level + 1));
    }
    assert_eq!(m.count().unwrap(), u64::MAX);
    assert_eq!(m.count_of(&"level1".to_string()), Some(1u64 << 63));
    assert!(m.unrank(u64::MAX - 1, &()).is_ok());
}

#[test]
fn test_empty_and_single_leaf() {
    let mut m = map();
    assert!(m.is_empty());
    assert_eq!(m.count().unwrap(), 0);

    m.insert_node("only".to_string(), 0);
    assert_eq!(m.count().unwrap(), 1);
    assert_eq!(m.unrank(0, &()).unwrap(), leaf("only"));
}
