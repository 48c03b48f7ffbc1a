//! Thin decode/encode glue between `Handle` and the node types in
//! `page.rs`. Kept separate from `insert.rs`/`delete.rs` so the
//! algorithms read as tree surgery, not byte shuffling.

use std::sync::Arc;

use crate::buffer::{BufferPool, Handle};
use crate::error::DbResult;
use crate::file_manager::FileManager;
use crate::page::{InternalNode, LeafNode, NodeHeader, PageNum};

pub(crate) fn read_leaf(handle: &mut Handle) -> DbResult<LeafNode> {
    handle.read(|buf| LeafNode::decode(buf))?
}

pub(crate) fn write_leaf(handle: &mut Handle, node: &LeafNode) -> DbResult<()> {
    handle.write(|buf| node.encode(buf))
}

pub(crate) fn read_internal(handle: &mut Handle) -> DbResult<InternalNode> {
    handle.read(|buf| InternalNode::decode(buf))?
}

pub(crate) fn write_internal(handle: &mut Handle, node: &InternalNode) -> DbResult<()> {
    handle.write(|buf| node.encode(buf))
}

pub(crate) fn is_leaf(handle: &mut Handle) -> DbResult<bool> {
    handle.read(|buf| NodeHeader::decode(buf).is_leaf)
}

/// Patch a page's parent pointer in place, regardless of whether it
/// currently holds a leaf or an internal node — both share the same
/// 128-byte header layout.
pub(crate) fn set_parent(
    pool: &Arc<BufferPool>,
    file: &Arc<FileManager>,
    pagenum: PageNum,
    parent: PageNum,
) -> DbResult<()> {
    let mut handle = pool.buffering(file, pagenum)?;
    handle.write(|buf| {
        let mut header = NodeHeader::decode(buf);
        header.parent = parent;
        header.encode(buf);
    })
}

pub(crate) fn read_parent(
    pool: &Arc<BufferPool>,
    file: &Arc<FileManager>,
    pagenum: PageNum,
) -> DbResult<PageNum> {
    let mut handle = pool.buffering(file, pagenum)?;
    handle.read(|buf| NodeHeader::decode(buf).parent)
}
