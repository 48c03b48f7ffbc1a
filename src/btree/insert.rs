//! Insertion: `insert_into_leaf` / `insert_into_leaf_after_splitting`,
//! `insert_into_parent`, `insert_into_new_root`,
//! `insert_into_node_after_splitting` — the classic recovery-free
//! B+ tree insert path.

use log::{debug, trace};

use crate::error::DbResult;
use crate::page::{Entry, InternalNode, LeafNode, PageNum, Record, INVALID_PAGENUM};

use super::{cut, iter, node_io, Tree};

pub(crate) fn insert(tree: &Tree, record: Record) -> DbResult<()> {
    let root = tree.file.root_page_number()?;
    if root == INVALID_PAGENUM {
        let mut handle = tree.pool.new_page(&tree.file)?;
        let pagenum = handle.pagenum();
        let mut leaf = LeafNode::empty(INVALID_PAGENUM);
        leaf.insert_sorted(record);
        node_io::write_leaf(&mut handle, &leaf)?;
        drop(handle);
        tree.file.set_root_page_number(pagenum)?;
        debug!("insert: started new tree with root leaf {}", pagenum);
        return Ok(());
    }

    let leaf_pn = iter::descend_to_leaf(tree, root, record.key)?;
    let mut handle = tree.pool.buffering(&tree.file, leaf_pn)?;
    let mut leaf = node_io::read_leaf(&mut handle)?;

    if leaf.records.len() < tree.config.leaf_capacity() {
        leaf.insert_sorted(record);
        node_io::write_leaf(&mut handle, &leaf)?;
        Ok(())
    } else {
        drop(handle);
        insert_into_leaf_after_splitting(tree, leaf_pn, leaf, record)
    }
}

fn insert_into_leaf_after_splitting(
    tree: &Tree,
    leaf_pn: PageNum,
    leaf: LeafNode,
    record: Record,
) -> DbResult<()> {
    let mut records = leaf.records;
    let pos = records
        .binary_search_by_key(&record.key, |r| r.key)
        .expect_err("duplicate key must already be rejected by Tree::insert");
    records.insert(pos, record);

    let split = cut(tree.config.leaf_order);
    let new_records = records.split_off(split);
    let old_records = records;

    let old_parent = leaf.header.parent;
    let old_right_sibling = leaf.header.special;

    let mut new_leaf = LeafNode::empty(old_parent);
    new_leaf.records = new_records;
    new_leaf.set_right_sibling(old_right_sibling);
    let new_first_key = new_leaf.first_key().expect("split always leaves both halves non-empty");

    let mut new_handle = tree.pool.new_page(&tree.file)?;
    let new_pn = new_handle.pagenum();
    node_io::write_leaf(&mut new_handle, &new_leaf)?;
    drop(new_handle);

    let mut old_leaf = LeafNode::empty(old_parent);
    old_leaf.records = old_records;
    old_leaf.set_right_sibling(new_pn);
    let mut handle = tree.pool.buffering(&tree.file, leaf_pn)?;
    node_io::write_leaf(&mut handle, &old_leaf)?;
    drop(handle);

    trace!(
        "insert_into_leaf_after_splitting: leaf {} split into {} and {}",
        leaf_pn, leaf_pn, new_pn
    );
    insert_into_parent(tree, leaf_pn, new_first_key, new_pn)
}

fn insert_into_parent(tree: &Tree, left_pn: PageNum, key: u64, right_pn: PageNum) -> DbResult<()> {
    let parent_pn = node_io::read_parent(&tree.pool, &tree.file, left_pn)?;

    if parent_pn == INVALID_PAGENUM {
        return insert_into_new_root(tree, left_pn, key, right_pn);
    }

    let mut handle = tree.pool.buffering(&tree.file, parent_pn)?;
    let parent = node_io::read_internal(&mut handle)?;

    if parent.entries.len() < tree.config.internal_capacity() {
        let mut parent = parent;
        parent.insert_after_child(left_pn, key, right_pn);
        node_io::write_internal(&mut handle, &parent)?;
        drop(handle);
        node_io::set_parent(&tree.pool, &tree.file, right_pn, parent_pn)?;
        Ok(())
    } else {
        drop(handle);
        insert_into_node_after_splitting(tree, parent_pn, left_pn, key, right_pn)
    }
}

fn insert_into_new_root(tree: &Tree, left_pn: PageNum, key: u64, right_pn: PageNum) -> DbResult<()> {
    let mut handle = tree.pool.new_page(&tree.file)?;
    let new_root_pn = handle.pagenum();

    let mut root_node = InternalNode::empty(INVALID_PAGENUM, left_pn);
    root_node.insert_sorted(Entry { key, child: right_pn });
    node_io::write_internal(&mut handle, &root_node)?;
    drop(handle);

    node_io::set_parent(&tree.pool, &tree.file, left_pn, new_root_pn)?;
    node_io::set_parent(&tree.pool, &tree.file, right_pn, new_root_pn)?;
    tree.file.set_root_page_number(new_root_pn)?;
    debug!("insert_into_new_root: new root {} over {} and {}", new_root_pn, left_pn, right_pn);
    Ok(())
}

/// `left_child_pn` names the child of `old_pn` immediately to the left
/// of the new `(key, right_child_pn)` pair; `old_pn`'s entries are
/// already full (`internal_capacity()`), so the conceptual temporary
/// array (entries + 1) is materialized and split.
fn insert_into_node_after_splitting(
    tree: &Tree,
    old_pn: PageNum,
    left_child_pn: PageNum,
    key: u64,
    right_child_pn: PageNum,
) -> DbResult<()> {
    let mut handle = tree.pool.buffering(&tree.file, old_pn)?;
    let old = node_io::read_internal(&mut handle)?;
    let old_parent = old.header.parent;

    let mut children = old.children();
    let mut keys: Vec<u64> = old.entries.iter().map(|e| e.key).collect();

    let pos = children
        .iter()
        .position(|&c| c == left_child_pn)
        .expect("left_child_pn must be a child of old_pn");
    children.insert(pos + 1, right_child_pn);
    keys.insert(pos, key);

    let order = tree.config.internal_order;
    let split = cut(order);

    let k_prime = keys[split - 1];
    let old_children: Vec<PageNum> = children[0..split].to_vec();
    let old_keys: Vec<u64> = keys[0..split - 1].to_vec();
    let new_children: Vec<PageNum> = children[split..].to_vec();
    let new_keys: Vec<u64> = keys[split..].to_vec();

    let mut old_node = InternalNode::empty(old_parent, old_children[0]);
    for (child, key) in old_children[1..].iter().zip(old_keys.iter()) {
        old_node.entries.push(Entry { key: *key, child: *child });
    }
    node_io::write_internal(&mut handle, &old_node)?;
    drop(handle);

    let mut new_handle = tree.pool.new_page(&tree.file)?;
    let new_pn = new_handle.pagenum();
    let mut new_node = InternalNode::empty(old_parent, new_children[0]);
    for (child, key) in new_children[1..].iter().zip(new_keys.iter()) {
        new_node.entries.push(Entry { key: *key, child: *child });
    }
    node_io::write_internal(&mut new_handle, &new_node)?;
    drop(new_handle);

    for &child in &new_children {
        node_io::set_parent(&tree.pool, &tree.file, child, new_pn)?;
    }

    trace!("insert_into_node_after_splitting: node {} split into {} and {}", old_pn, old_pn, new_pn);
    insert_into_parent(tree, old_pn, k_prime, new_pn)
}
