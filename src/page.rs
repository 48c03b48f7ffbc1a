//! On-disk page layout: the 4096-byte page, its common 128-byte header,
//! and the two payload flavors (leaf records, internal entries).
//!
//! Encoded and decoded with explicit byte offsets rather than a derive
//! macro — the on-disk format is a packed struct array with no
//! padding, so hand-rolled `encode`/`decode` keep the layout exact.

use crate::error::{DbError, DbResult};

pub const PAGE_SIZE: usize = 4096;
pub const HEADER_SIZE: usize = 128;
pub const PAGE_PAYLOAD_SIZE: usize = PAGE_SIZE - HEADER_SIZE;
pub const VALUE_SIZE: usize = 120;
pub const RECORD_SIZE: usize = 8 + VALUE_SIZE; // key + value
pub const ENTRY_SIZE: usize = 8 + 8; // key + child page number

/// Sentinel page number meaning "no such page" (invalid child/parent/
/// sibling reference, or an empty tree's root).
pub const INVALID_PAGENUM: u64 = 0;

pub type PageNum = u64;

/// A fixed-size 120-byte opaque value.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Value(pub [u8; VALUE_SIZE]);

impl Value {
    pub fn zero() -> Self {
        Value([0u8; VALUE_SIZE])
    }

    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut buf = [0u8; VALUE_SIZE];
        let n = bytes.len().min(VALUE_SIZE);
        buf[..n].copy_from_slice(&bytes[..n]);
        Value(buf)
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Value({})", hex::encode(&self.0[..8.min(self.0.len())]))
    }
}

/// `(key, value)` pair stored in a leaf page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Record {
    pub key: u64,
    pub value: Value,
}

impl Record {
    pub fn new(key: u64, value: Value) -> Self {
        Self { key, value }
    }

    fn encode(&self, out: &mut [u8]) {
        debug_assert_eq!(out.len(), RECORD_SIZE);
        out[0..8].copy_from_slice(&self.key.to_le_bytes());
        out[8..RECORD_SIZE].copy_from_slice(&self.value.0);
    }

    fn decode(buf: &[u8]) -> Self {
        debug_assert_eq!(buf.len(), RECORD_SIZE);
        let key = u64::from_le_bytes(buf[0..8].try_into().unwrap());
        Record {
            key,
            value: Value::from_slice(&buf[8..RECORD_SIZE]),
        }
    }
}

/// `(key, child_page_number)` pair stored in an internal page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Entry {
    pub key: u64,
    pub child: PageNum,
}

impl Entry {
    fn encode(&self, out: &mut [u8]) {
        debug_assert_eq!(out.len(), ENTRY_SIZE);
        out[0..8].copy_from_slice(&self.key.to_le_bytes());
        out[8..ENTRY_SIZE].copy_from_slice(&self.child.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Self {
        debug_assert_eq!(buf.len(), ENTRY_SIZE);
        let key = u64::from_le_bytes(buf[0..8].try_into().unwrap());
        let child = u64::from_le_bytes(buf[8..ENTRY_SIZE].try_into().unwrap());
        Entry { key, child }
    }
}

const OFF_PARENT: usize = 0;
const OFF_IS_LEAF: usize = 8;
const OFF_NUM_KEYS: usize = 12;
const OFF_SPECIAL: usize = 16;

/// The 128-byte header common to leaf and internal pages.
#[derive(Clone, Copy, Debug)]
pub struct NodeHeader {
    pub parent: PageNum,
    pub is_leaf: bool,
    pub number_of_keys: u32,
    /// Leftmost child (internal) or right-sibling page (leaf).
    pub special: PageNum,
}

impl NodeHeader {
    pub fn encode(&self, buf: &mut [u8; PAGE_SIZE]) {
        buf[OFF_PARENT..OFF_PARENT + 8].copy_from_slice(&self.parent.to_le_bytes());
        buf[OFF_IS_LEAF] = self.is_leaf as u8;
        buf[OFF_NUM_KEYS..OFF_NUM_KEYS + 4]
            .copy_from_slice(&self.number_of_keys.to_le_bytes());
        buf[OFF_SPECIAL..OFF_SPECIAL + 8].copy_from_slice(&self.special.to_le_bytes());
    }

    pub fn decode(buf: &[u8; PAGE_SIZE]) -> Self {
        let parent = u64::from_le_bytes(buf[OFF_PARENT..OFF_PARENT + 8].try_into().unwrap());
        let is_leaf = buf[OFF_IS_LEAF] != 0;
        let number_of_keys =
            u32::from_le_bytes(buf[OFF_NUM_KEYS..OFF_NUM_KEYS + 4].try_into().unwrap());
        let special =
            u64::from_le_bytes(buf[OFF_SPECIAL..OFF_SPECIAL + 8].try_into().unwrap());
        NodeHeader {
            parent,
            is_leaf,
            number_of_keys,
            special,
        }
    }
}

fn slot_offset(slot: usize, elem_size: usize) -> usize {
    HEADER_SIZE + slot * elem_size
}

/// A leaf node's records, decoded from a raw page buffer.
#[derive(Clone, Debug)]
pub struct LeafNode {
    pub header: NodeHeader,
    pub records: Vec<Record>,
}

impl LeafNode {
    pub fn empty(parent: PageNum) -> Self {
        LeafNode {
            header: NodeHeader {
                parent,
                is_leaf: true,
                number_of_keys: 0,
                special: INVALID_PAGENUM,
            },
            records: Vec::new(),
        }
    }

    pub fn right_sibling(&self) -> PageNum {
        self.header.special
    }

    pub fn set_right_sibling(&mut self, pagenum: PageNum) {
        self.header.special = pagenum;
    }

    pub fn decode(buf: &[u8; PAGE_SIZE]) -> DbResult<Self> {
        let header = NodeHeader::decode(buf);
        if !header.is_leaf {
            return Err(DbError::corrupt("expected leaf page"));
        }
        let mut records = Vec::with_capacity(header.number_of_keys as usize);
        for i in 0..header.number_of_keys as usize {
            let off = slot_offset(i, RECORD_SIZE);
            records.push(Record::decode(&buf[off..off + RECORD_SIZE]));
        }
        Ok(LeafNode { header, records })
    }

    pub fn encode(&self, buf: &mut [u8; PAGE_SIZE]) {
        let mut header = self.header;
        header.number_of_keys = self.records.len() as u32;
        header.encode(buf);
        for (i, rec) in self.records.iter().enumerate() {
            let off = slot_offset(i, RECORD_SIZE);
            rec.encode(&mut buf[off..off + RECORD_SIZE]);
        }
    }

    /// Insert into sorted position; fails (no-op, returns false) on a
    /// duplicate key.
    pub fn insert_sorted(&mut self, rec: Record) -> bool {
        match self.records.binary_search_by_key(&rec.key, |r| r.key) {
            Ok(_) => false,
            Err(idx) => {
                self.records.insert(idx, rec);
                true
            }
        }
    }

    pub fn find(&self, key: u64) -> Option<&Record> {
        self.records.iter().find(|r| r.key == key)
    }

    pub fn remove(&mut self, key: u64) -> Option<Record> {
        if let Some(idx) = self.records.iter().position(|r| r.key == key) {
            Some(self.records.remove(idx))
        } else {
            None
        }
    }

    pub fn first_key(&self) -> Option<u64> {
        self.records.first().map(|r| r.key)
    }
}

/// An internal node's entries, decoded from a raw page buffer. The
/// node's leftmost child is `header.special`; `entries[i].child` is the
/// `i+1`-th child (`c_0 = special`, `c_i =
/// entries[i-1].child` for `i >= 1`).
#[derive(Clone, Debug)]
pub struct InternalNode {
    pub header: NodeHeader,
    pub entries: Vec<Entry>,
}

impl InternalNode {
    pub fn empty(parent: PageNum, leftmost_child: PageNum) -> Self {
        InternalNode {
            header: NodeHeader {
                parent,
                is_leaf: false,
                number_of_keys: 0,
                special: leftmost_child,
            },
            entries: Vec::new(),
        }
    }

    pub fn decode(buf: &[u8; PAGE_SIZE]) -> DbResult<Self> {
        let header = NodeHeader::decode(buf);
        if header.is_leaf {
            return Err(DbError::corrupt("expected internal page"));
        }
        let mut entries = Vec::with_capacity(header.number_of_keys as usize);
        for i in 0..header.number_of_keys as usize {
            let off = slot_offset(i, ENTRY_SIZE);
            entries.push(Entry::decode(&buf[off..off + ENTRY_SIZE]));
        }
        Ok(InternalNode { header, entries })
    }

    pub fn encode(&self, buf: &mut [u8; PAGE_SIZE]) {
        let mut header = self.header;
        header.number_of_keys = self.entries.len() as u32;
        header.encode(buf);
        for (i, entry) in self.entries.iter().enumerate() {
            let off = slot_offset(i, ENTRY_SIZE);
            entry.encode(&mut buf[off..off + ENTRY_SIZE]);
        }
    }

    /// Every child pointer of this node, in order: the leftmost special
    /// pointer followed by each entry's child.
    pub fn children(&self) -> Vec<PageNum> {
        let mut out = Vec::with_capacity(self.entries.len() + 1);
        out.push(self.header.special);
        out.extend(self.entries.iter().map(|e| e.child));
        out
    }

    /// Descend for `key`: `special` if `key` is less than every entry
    /// key, else the child of the largest entry whose key is `<= key`.
    pub fn child_for_key(&self, key: u64) -> PageNum {
        match self.entries.iter().rposition(|e| e.key <= key) {
            Some(idx) => self.entries[idx].child,
            None => self.header.special,
        }
    }

    /// Insert `(key, child)` in sorted position.
    pub fn insert_sorted(&mut self, entry: Entry) {
        let idx = self
            .entries
            .binary_search_by_key(&entry.key, |e| e.key)
            .unwrap_or_else(|idx| idx);
        self.entries.insert(idx, entry);
    }

    /// Insert `(key, right_child)` immediately to the right of
    /// `left_child` among this node's child pointers.
    pub fn insert_after_child(&mut self, left_child: PageNum, key: u64, right_child: PageNum) {
        if self.header.special == left_child {
            self.entries.insert(0, Entry { key, child: right_child });
            return;
        }
        let idx = self
            .entries
            .iter()
            .position(|e| e.child == left_child)
            .expect("left_child must be a child of this node");
        self.entries
            .insert(idx + 1, Entry { key, child: right_child });
    }

    pub fn first_key(&self) -> Option<u64> {
        self.entries.first().map(|e| e.key)
    }
}

/// Page 0 of every table file.
#[derive(Clone, Copy, Debug)]
pub struct FileHeader {
    pub free_page_number: PageNum,
    pub root_page_number: PageNum,
    pub number_of_pages: u64,
}

impl FileHeader {
    pub fn empty() -> Self {
        FileHeader {
            free_page_number: INVALID_PAGENUM,
            root_page_number: INVALID_PAGENUM,
            number_of_pages: 1, // the header page itself
        }
    }

    pub fn encode(&self, buf: &mut [u8; PAGE_SIZE]) {
        buf[0..8].copy_from_slice(&self.free_page_number.to_le_bytes());
        buf[8..16].copy_from_slice(&self.root_page_number.to_le_bytes());
        buf[16..24].copy_from_slice(&self.number_of_pages.to_le_bytes());
    }

    pub fn decode(buf: &[u8; PAGE_SIZE]) -> Self {
        FileHeader {
            free_page_number: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            root_page_number: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
            number_of_pages: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
        }
    }
}

/// Read/write the next-free-page link stored in a free page's first 8
/// bytes.
pub fn free_page_next(buf: &[u8; PAGE_SIZE]) -> PageNum {
    u64::from_le_bytes(buf[0..8].try_into().unwrap())
}

pub fn free_page_set_next(buf: &mut [u8; PAGE_SIZE], next: PageNum) {
    buf[0..8].copy_from_slice(&next.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_round_trips_through_bytes() {
        let mut leaf = LeafNode::empty(7);
        leaf.insert_sorted(Record::new(3, Value::from_slice(b"three")));
        leaf.insert_sorted(Record::new(1, Value::from_slice(b"one")));
        leaf.insert_sorted(Record::new(2, Value::from_slice(b"two")));
        leaf.set_right_sibling(42);

        let mut buf = [0u8; PAGE_SIZE];
        leaf.encode(&mut buf);

        let decoded = LeafNode::decode(&buf).unwrap();
        assert_eq!(decoded.header.parent, 7);
        assert_eq!(decoded.right_sibling(), 42);
        let keys: Vec<u64> = decoded.records.iter().map(|r| r.key).collect();
        assert_eq!(keys, vec![1, 2, 3]);
    }

    #[test]
    fn internal_child_for_key_uses_special_below_first_entry() {
        let mut node = InternalNode::empty(INVALID_PAGENUM, 100);
        node.insert_sorted(Entry { key: 10, child: 200 });
        node.insert_sorted(Entry { key: 20, child: 300 });

        assert_eq!(node.child_for_key(0), 100);
        assert_eq!(node.child_for_key(9), 100);
        assert_eq!(node.child_for_key(10), 200);
        assert_eq!(node.child_for_key(15), 200);
        assert_eq!(node.child_for_key(20), 300);
        assert_eq!(node.child_for_key(999), 300);
    }

    #[test]
    fn internal_round_trips_through_bytes() {
        let mut node = InternalNode::empty(5, 100);
        node.insert_sorted(Entry { key: 10, child: 200 });
        node.insert_sorted(Entry { key: 20, child: 300 });

        let mut buf = [0u8; PAGE_SIZE];
        node.encode(&mut buf);

        let decoded = InternalNode::decode(&buf).unwrap();
        assert_eq!(decoded.header.parent, 5);
        assert_eq!(decoded.children(), vec![100, 200, 300]);
    }

    #[test]
    fn file_header_round_trips() {
        let header = FileHeader {
            free_page_number: 3,
            root_page_number: 7,
            number_of_pages: 12,
        };
        let mut buf = [0u8; PAGE_SIZE];
        header.encode(&mut buf);
        let decoded = FileHeader::decode(&buf);
        assert_eq!(decoded.free_page_number, 3);
        assert_eq!(decoded.root_page_number, 7);
        assert_eq!(decoded.number_of_pages, 12);
    }
}
