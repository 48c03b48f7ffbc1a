//! Black-box insert tests driven through the public `Tree` API only —
//! no reaching into `btree::insert` internals (those already have their
//! own `#[cfg(test)]` unit tests next to the code).

mod common;

use common::new_tree;
use small_tree::page::Value;

#[test]
fn splitting_a_full_root_leaf_preserves_every_key() {
    let (tree, _tmp) = new_tree(5, 5);
    for k in 0..50u64 {
        tree.insert(k, Value::zero()).unwrap();
    }
    let keys: Vec<u64> = tree.find_range(0, u64::MAX).unwrap().iter().map(|r| r.key).collect();
    assert_eq!(keys, (0..50).collect::<Vec<_>>());
}

#[test]
fn inserting_into_a_three_level_tree_keeps_every_leaf_reachable_from_the_root() {
    let (tree, _tmp) = new_tree(4, 4);
    for k in 0..300u64 {
        tree.insert(k, Value::zero()).unwrap();
    }
    for k in 0..300u64 {
        assert!(tree.find(k).unwrap().is_some(), "key {} must still be findable", k);
    }
    assert!(tree.find(300).unwrap().is_none());
}

#[test]
fn update_overwrites_value_without_changing_key_order() {
    let (tree, _tmp) = new_tree(5, 5);
    for k in 0..10u64 {
        tree.insert(k, Value::from_slice(b"old")).unwrap();
    }
    assert!(tree.update(5, Value::from_slice(b"new")).unwrap());
    let record = tree.find(5).unwrap().unwrap();
    assert_eq!(String::from_utf8_lossy(&record.value.0).trim_end_matches('\0'), "new");

    let keys: Vec<u64> = tree.find_range(0, u64::MAX).unwrap().iter().map(|r| r.key).collect();
    assert_eq!(keys, (0..10).collect::<Vec<_>>());
}

#[test]
fn update_of_a_missing_key_reports_false_rather_than_inserting() {
    let (tree, _tmp) = new_tree(5, 5);
    tree.insert(1, Value::zero()).unwrap();
    assert!(!tree.update(99, Value::zero()).unwrap());
    assert!(tree.find(99).unwrap().is_none());
}
