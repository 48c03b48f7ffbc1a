//! Deletion: remove a record, then `delete_entry` recovery — delayed
//! merge, sibling redistribution, and merge with parent-key
//! interpolation.

use log::{debug, trace};

use crate::error::{DbError, DbResult};
use crate::page::{Entry, InternalNode, LeafNode, PageNum, Record, INVALID_PAGENUM};

use super::{cut, iter, node_io, Tree};

pub(crate) fn delete(tree: &Tree, key: u64) -> DbResult<Record> {
    let root = tree.file.root_page_number()?;
    if root == INVALID_PAGENUM {
        return Err(DbError::NotFound);
    }

    let leaf_pn = iter::descend_to_leaf(tree, root, key)?;
    let mut handle = tree.pool.buffering(&tree.file, leaf_pn)?;
    let mut leaf = node_io::read_leaf(&mut handle)?;
    let removed = leaf.remove(key).ok_or(DbError::NotFound)?;
    node_io::write_leaf(&mut handle, &leaf)?;
    drop(handle);

    delete_entry(tree, leaf_pn)?;
    Ok(removed)
}

/// Locate `node_pn` among `parent`'s children, and its nominated
/// neighbor: the left sibling, unless `node_pn` is the leftmost child,
/// in which case the right sibling. Returns `(node's
/// index, neighbor's pagenum, the parent entry index of the separating
/// key)`.
fn locate_in_parent(parent: &InternalNode, node_pn: PageNum) -> (usize, PageNum, usize) {
    let children = parent.children();
    let idx_node = children
        .iter()
        .position(|&c| c == node_pn)
        .expect("node must be a child of its recorded parent");
    let idx_neighbor = if idx_node == 0 { 1 } else { idx_node - 1 };
    let neighbor_pn = children[idx_neighbor];
    let k_prime_idx = idx_node.min(idx_neighbor);
    (idx_node, neighbor_pn, k_prime_idx)
}

/// Recovery logic applied to a node that has just lost a record/entry.
/// Recurses up the tree through merges; stops at the first node that is
/// no longer underfull, or at the root.
fn delete_entry(tree: &Tree, node_pn: PageNum) -> DbResult<()> {
    let mut handle = tree.pool.buffering(&tree.file, node_pn)?;
    let is_leaf = node_io::is_leaf(&mut handle)?;

    if is_leaf {
        let node = node_io::read_leaf(&mut handle)?;
        drop(handle);

        if node.header.parent == INVALID_PAGENUM {
            if node.records.is_empty() {
                tree.pool.free_page(&tree.file, node_pn)?;
                tree.file.set_root_page_number(INVALID_PAGENUM)?;
                debug!("delete_entry: tree emptied, root leaf {} freed", node_pn);
            }
            return Ok(());
        }

        if tree.config.delayed_merge && !node.records.is_empty() {
            return Ok(());
        }

        if node.records.len() >= cut(tree.config.leaf_order) {
            return Ok(());
        }

        resolve_leaf_underflow(tree, node_pn, node)
    } else {
        let node = node_io::read_internal(&mut handle)?;
        drop(handle);

        if node.header.parent == INVALID_PAGENUM {
            if node.entries.is_empty() {
                let new_root = node.header.special;
                node_io::set_parent(&tree.pool, &tree.file, new_root, INVALID_PAGENUM)?;
                tree.pool.free_page(&tree.file, node_pn)?;
                tree.file.set_root_page_number(new_root)?;
                debug!("delete_entry: root {} collapsed, new root {}", node_pn, new_root);
            }
            return Ok(());
        }

        let min_children = cut(tree.config.internal_order);
        if node.entries.len() + 1 >= min_children {
            return Ok(());
        }

        resolve_internal_underflow(tree, node_pn, node)
    }
}

fn resolve_leaf_underflow(tree: &Tree, node_pn: PageNum, mut node: LeafNode) -> DbResult<()> {
    let parent_pn = node.header.parent;
    let mut parent_handle = tree.pool.buffering(&tree.file, parent_pn)?;
    let mut parent = node_io::read_internal(&mut parent_handle)?;
    let (idx_node, neighbor_pn, k_prime_idx) = locate_in_parent(&parent, node_pn);

    let mut neighbor_handle = tree.pool.buffering(&tree.file, neighbor_pn)?;
    let mut neighbor = node_io::read_leaf(&mut neighbor_handle)?;

    let idx_neighbor = locate_in_parent(&parent, neighbor_pn).0;
    let node_is_left = idx_node < idx_neighbor;
    let (left_pn, left, right_pn, right) = if node_is_left {
        (node_pn, &mut node, neighbor_pn, &mut neighbor)
    } else {
        (neighbor_pn, &mut neighbor, node_pn, &mut node)
    };

    let combined = left.records.len() + right.records.len();
    if combined <= tree.config.leaf_capacity() {
        // merge: always fold the right page into the left page.
        left.records.extend(right.records.iter().cloned());
        left.set_right_sibling(right.header.special);
        node_io::write_leaf(&mut tree.pool.buffering(&tree.file, left_pn)?, left)?;
        drop(neighbor_handle);
        tree.pool.free_page(&tree.file, right_pn)?;

        parent.entries.retain(|e| e.child != right_pn);
        node_io::write_internal(&mut parent_handle, &parent)?;
        drop(parent_handle);

        trace!("delete: merged leaf {} into {}", right_pn, left_pn);
        delete_entry(tree, parent_pn)
    } else if node_is_left {
        // node (left) borrows the neighbor's (right) first record.
        let borrowed = right.records.remove(0);
        left.records.push(borrowed);
        let new_key = right.records[0].key;
        node_io::write_leaf(&mut tree.pool.buffering(&tree.file, left_pn)?, left)?;
        node_io::write_leaf(&mut tree.pool.buffering(&tree.file, right_pn)?, right)?;
        drop(neighbor_handle);
        parent.entries[k_prime_idx].key = new_key;
        node_io::write_internal(&mut parent_handle, &parent)?;
        Ok(())
    } else {
        // node (right) borrows the neighbor's (left) last record.
        let borrowed = left.records.pop().unwrap();
        let new_key = borrowed.key;
        right.records.insert(0, borrowed);
        node_io::write_leaf(&mut tree.pool.buffering(&tree.file, left_pn)?, left)?;
        node_io::write_leaf(&mut tree.pool.buffering(&tree.file, right_pn)?, right)?;
        drop(neighbor_handle);
        parent.entries[k_prime_idx].key = new_key;
        node_io::write_internal(&mut parent_handle, &parent)?;
        Ok(())
    }
}

fn resolve_internal_underflow(tree: &Tree, node_pn: PageNum, mut node: InternalNode) -> DbResult<()> {
    let parent_pn = node.header.parent;
    let mut parent_handle = tree.pool.buffering(&tree.file, parent_pn)?;
    let mut parent = node_io::read_internal(&mut parent_handle)?;
    let (idx_node, neighbor_pn, k_prime_idx) = locate_in_parent(&parent, node_pn);

    let mut neighbor_handle = tree.pool.buffering(&tree.file, neighbor_pn)?;
    let mut neighbor = node_io::read_internal(&mut neighbor_handle)?;

    let idx_neighbor = locate_in_parent(&parent, neighbor_pn).0;
    let node_is_left = idx_node < idx_neighbor;
    let (left_pn, left, right_pn, right) = if node_is_left {
        (node_pn, &mut node, neighbor_pn, &mut neighbor)
    } else {
        (neighbor_pn, &mut neighbor, node_pn, &mut node)
    };

    let k_prime = parent.entries[k_prime_idx].key;
    let combined_keys = left.entries.len() + 1 + right.entries.len();

    if combined_keys <= tree.config.internal_capacity() {
        // merge: interpolate k_prime and the right node's special
        // pointer as the first newly absorbed child.
        left.entries.push(Entry { key: k_prime, child: right.header.special });
        left.entries.extend(right.entries.iter().cloned());
        let moved: Vec<PageNum> = right.children();
        node_io::write_internal(&mut tree.pool.buffering(&tree.file, left_pn)?, left)?;
        for child in moved {
            node_io::set_parent(&tree.pool, &tree.file, child, left_pn)?;
        }
        drop(parent_handle);
        drop(neighbor_handle);
        tree.pool.free_page(&tree.file, right_pn)?;

        let mut parent_handle = tree.pool.buffering(&tree.file, parent_pn)?;
        parent.entries.retain(|e| e.child != right_pn);
        node_io::write_internal(&mut parent_handle, &parent)?;
        drop(parent_handle);

        trace!("delete: merged internal {} into {}", right_pn, left_pn);
        delete_entry(tree, parent_pn)
    } else if node_is_left {
        // node (left) borrows the neighbor's leftmost child; k_prime
        // becomes the separator inside node between its old last
        // subtree and the newly received one.
        let borrowed_child = right.header.special;
        let new_k_prime = right.entries[0].key;
        right.header.special = right.entries[0].child;
        right.entries.remove(0);

        left.entries.push(Entry { key: k_prime, child: borrowed_child });
        node_io::write_internal(&mut tree.pool.buffering(&tree.file, left_pn)?, left)?;
        node_io::write_internal(&mut tree.pool.buffering(&tree.file, right_pn)?, right)?;
        drop(neighbor_handle);
        node_io::set_parent(&tree.pool, &tree.file, borrowed_child, left_pn)?;

        parent.entries[k_prime_idx].key = new_k_prime;
        node_io::write_internal(&mut parent_handle, &parent)?;
        Ok(())
    } else {
        // node (right) borrows the neighbor's rightmost child, which
        // becomes node's new special (leftmost) pointer.
        let borrowed_entry = left.entries.pop().unwrap();
        let new_k_prime = borrowed_entry.key;

        right.entries.insert(0, Entry { key: k_prime, child: right.header.special });
        right.header.special = borrowed_entry.child;
        node_io::write_internal(&mut tree.pool.buffering(&tree.file, left_pn)?, left)?;
        node_io::write_internal(&mut tree.pool.buffering(&tree.file, right_pn)?, right)?;
        drop(neighbor_handle);
        node_io::set_parent(&tree.pool, &tree.file, borrowed_entry.child, right_pn)?;

        parent.entries[k_prime_idx].key = new_k_prime;
        node_io::write_internal(&mut parent_handle, &parent)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferPool;
    use crate::config::{EngineConfig, TreeConfig};
    use crate::file_manager::FileManager;
    use crate::page::Value;
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    fn tree_with(leaf_order: usize, internal_order: usize, delayed_merge: bool) -> (Tree, NamedTempFile) {
        let tmp = NamedTempFile::new().unwrap();
        let pool = BufferPool::new(EngineConfig::default());
        let file = Arc::new(FileManager::open_or_create(tmp.path()).unwrap());
        let config = TreeConfig {
            leaf_order,
            internal_order,
            delayed_merge,
            verbose: false,
        };
        (Tree::open(pool, file, config), tmp)
    }

    fn v(k: u64) -> Value {
        Value::from_slice(format!("v{}", k).as_bytes())
    }

    #[test]
    fn insert_then_delete_is_not_found() {
        let (tree, _tmp) = tree_with(5, 5, true);
        tree.insert(1, v(1)).unwrap();
        assert_eq!(tree.delete(1).unwrap().key, 1);
        assert!(tree.find(1).unwrap().is_none());
        assert!(tree.delete(1).is_err());
    }

    #[test]
    fn deleting_last_key_empties_the_tree() {
        let (tree, _tmp) = tree_with(5, 5, true);
        tree.insert(1, v(1)).unwrap();
        tree.delete(1).unwrap();
        assert_eq!(tree.file.root_page_number().unwrap(), INVALID_PAGENUM);
    }

    #[test]
    fn delayed_merge_tolerates_underfull_leaves() {
        let (tree, _tmp) = tree_with(5, 5, true);
        for k in 0..20 {
            tree.insert(k, v(k)).unwrap();
        }
        // delete enough keys from one leaf region to go underfull but
        // not empty; with delayed merge the tree must still find every
        // remaining key without restructuring failures.
        for k in 0..3 {
            tree.delete(k).unwrap();
        }
        let remaining: Vec<u64> = tree.find_range(0, u64::MAX).unwrap().iter().map(|r| r.key).collect();
        let expected: Vec<u64> = (3..20).collect();
        assert_eq!(remaining, expected);
    }

    #[test]
    fn deleting_every_key_in_any_order_leaves_an_empty_tree() {
        let (tree, _tmp) = tree_with(4, 4, false);
        let mut keys: Vec<u64> = (0..80).collect();
        for k in &keys {
            tree.insert(*k, v(*k)).unwrap();
        }
        keys.sort_by_key(|k| (*k * 2654435761u64) % 9973);
        for k in &keys {
            tree.delete(*k).unwrap();
        }
        assert_eq!(tree.file.root_page_number().unwrap(), INVALID_PAGENUM);
    }

    #[test]
    fn non_delayed_merge_keeps_every_node_at_or_above_cut() {
        let (tree, _tmp) = tree_with(4, 4, false);
        let keys: Vec<u64> = (0..60).collect();
        for k in &keys {
            tree.insert(*k, v(*k)).unwrap();
        }
        for k in (0..40).rev() {
            tree.delete(k).unwrap();
        }
        let remaining: Vec<u64> = tree.find_range(0, u64::MAX).unwrap().iter().map(|r| r.key).collect();
        let expected: Vec<u64> = (40..60).collect();
        assert_eq!(remaining, expected);
    }

    #[test]
    fn delete_missing_key_fails() {
        let (tree, _tmp) = tree_with(5, 5, true);
        tree.insert(1, v(1)).unwrap();
        assert!(tree.delete(2).is_err());
    }
}
