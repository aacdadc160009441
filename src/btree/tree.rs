//! B-tree core implementation.
//!
//! Nodes are decoded into a cell vector, edited, and re-encoded through
//! the [`PageSink`]; a node that no longer fits is split in two by bytes.
//! Leaf splits copy the first key of the right half into the parent,
//! interior splits promote their middle cell. A node left below
//! [`UNDERFLOW_THRESHOLD`] bytes by a delete is merged with a sibling, or
//! rebalanced against it when the two do not fit on one page.

use crate::btree::{Cursor, PageSink, PageSource};
use crate::error::{Result, StorageError};
use crate::page::{Cell, CellValue, OverflowPage, PageHeader, SlottedPage, OVERFLOW_CAPACITY};
use crate::types::{PageId, PageType, INLINE_VALUE_LIMIT, MAX_KEY_SIZE, UNDERFLOW_THRESHOLD};
use std::collections::HashSet;
use tracing::trace;

/// A B-tree rooted at `root`, reading and writing pages through `pages`
pub struct BTree<S> {
    pages: S,
    /// Root page ID (none means empty tree)
    root: PageId,
    /// Number of levels (0 when empty)
    height: u32,
}

/// Result of rewriting one node
struct Written {
    page: PageId,
    /// Separator and right sibling when the node had to split
    split: Option<(Vec<u8>, PageId)>,
    cell_count: usize,
    underflow: bool,
}

impl Written {
    fn unchanged(page_id: PageId, page: &SlottedPage) -> Self {
        Self {
            page: page_id,
            split: None,
            cell_count: page.cell_count(),
            underflow: false,
        }
    }
}

impl<S> BTree<S> {
    /// Open the tree described by a root page and height
    pub fn new(pages: S, root: PageId, height: u32) -> Self {
        Self {
            pages,
            root,
            height,
        }
    }

    /// Get the root page ID
    pub fn root(&self) -> PageId {
        self.root
    }

    /// Get the height of the tree
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Check if the tree holds no entries
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }
}

impl<S: PageSource> BTree<S> {
    /// Look up a key and return its value
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if self.root.is_none() {
            return Ok(None);
        }

        let mut page_id = self.root;
        loop {
            let page = self.pages.node(page_id)?;
            if page.is_leaf() {
                return match page.search(key)? {
                    Ok(index) => {
                        let cell = page.get_cell(index)?;
                        Ok(Some(read_value(&self.pages, &cell.value)?))
                    }
                    Err(_) => Ok(None),
                };
            }
            page_id = page.child_at(page.child_slot(key)?)?;
        }
    }

    /// Cursor over every entry in key order
    pub fn cursor(&self) -> Cursor<&S> {
        Cursor::new(&self.pages, self.root)
    }

    /// Cursor starting at the first key `>= key`
    pub fn seek(&self, key: &[u8]) -> Cursor<&S> {
        Cursor::seek(&self.pages, self.root, key)
    }

    /// Check the structural invariants of the tree.
    ///
    /// Keys must be strictly ascending and inside the range their parent
    /// separators allow, all leaves must sit at depth `height`, and no
    /// node other than the root may be empty. Returns the entry count.
    pub fn verify(&self) -> Result<usize> {
        if self.root.is_none() {
            if self.height != 0 {
                return Err(StorageError::corruption("empty tree with non-zero height"));
            }
            return Ok(0);
        }
        self.verify_node(self.root, 1, None, None)
    }

    fn verify_node(
        &self,
        page_id: PageId,
        depth: u32,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
    ) -> Result<usize> {
        let page = self.pages.node(page_id)?;
        let cells = page.cells()?;
        let fail = |what: &str| Err(StorageError::corruption(format!("page {}: {}", page_id, what)));

        for pair in cells.windows(2) {
            if pair[0].key >= pair[1].key {
                return fail("keys out of order");
            }
        }
        if let (Some(first), Some(lower)) = (cells.first(), lower) {
            if first.key.as_slice() < lower {
                return fail("key below parent separator");
            }
        }
        if let (Some(last), Some(upper)) = (cells.last(), upper) {
            if last.key.as_slice() >= upper {
                return fail("key above parent separator");
            }
        }

        if page.is_leaf() {
            if depth != self.height {
                return fail("leaf at wrong depth");
            }
            if cells.is_empty() && page_id != self.root {
                return fail("empty non-root leaf");
            }
            return Ok(cells.len());
        }

        if depth >= self.height {
            return fail("interior page at leaf depth");
        }
        let mut count = self.verify_node(
            page.leftmost_child(),
            depth + 1,
            lower,
            cells.first().map(|c| c.key.as_slice()).or(upper),
        )?;
        for (i, cell) in cells.iter().enumerate() {
            let next = cells.get(i + 1).map(|c| c.key.as_slice()).or(upper);
            count += self.verify_node(cell.child, depth + 1, Some(&cell.key), next)?;
        }
        Ok(count)
    }

    /// Every page the tree references, overflow pages included
    pub fn page_ids(&self) -> Result<Vec<PageId>> {
        let mut ids = Vec::new();
        let mut seen = HashSet::new();
        if self.root.is_some() {
            self.collect_pages(self.root, &mut ids, &mut seen)?;
        }
        Ok(ids)
    }

    fn collect_pages(
        &self,
        page_id: PageId,
        ids: &mut Vec<PageId>,
        seen: &mut HashSet<PageId>,
    ) -> Result<()> {
        if !seen.insert(page_id) {
            return Err(StorageError::corruption(format!(
                "page {} is referenced twice",
                page_id
            )));
        }
        ids.push(page_id);

        let page = self.pages.node(page_id)?;
        if page.is_leaf() {
            for cell in page.cells()? {
                if let CellValue::Overflow { head, len } = cell.value {
                    walk_overflow(&self.pages, head, len, |id, _| {
                        ids.push(id);
                        Ok(())
                    })?;
                }
            }
            return Ok(());
        }

        self.collect_pages(page.leftmost_child(), ids, seen)?;
        for cell in page.cells()? {
            self.collect_pages(cell.child, ids, seen)?;
        }
        Ok(())
    }
}

impl<S: PageSink> BTree<S> {
    /// Insert or update a key-value pair, returning the value it replaced
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<Option<Vec<u8>>> {
        validate_key(key)?;

        let stored = if value.len() > INLINE_VALUE_LIMIT {
            CellValue::Overflow {
                head: self.write_overflow(value)?,
                len: value.len() as u64,
            }
        } else {
            CellValue::Inline(value.to_vec())
        };
        let cell = Cell::with_value(key.to_vec(), stored);

        if self.root.is_none() {
            let page = SlottedPage::build(PageType::Leaf, PageId::NONE, &[cell])?;
            self.root = self.pages.write_node(None, page)?;
            self.height = 1;
            trace!(root = %self.root, "created root leaf");
            return Ok(None);
        }

        let (written, replaced) = self.insert_into(self.root, cell)?;
        self.root = written.page;
        if let Some((separator, right)) = written.split {
            self.grow(separator, right)?;
        }

        match replaced {
            Some(old) => self.take_value(old).map(Some),
            None => Ok(None),
        }
    }

    /// Delete a key from the tree
    ///
    /// Returns the removed value, or `None` if the key was missing, in
    /// which case nothing is written.
    pub fn delete(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if self.root.is_none() {
            return Ok(None);
        }

        let Some((written, removed)) = self.remove_from(self.root, key)? else {
            return Ok(None);
        };
        self.root = written.page;

        if let Some((separator, right)) = written.split {
            self.grow(separator, right)?;
        } else if written.cell_count == 0 {
            self.shrink()?;
        }

        self.take_value(removed).map(Some)
    }

    /// Read a value that left the tree and free its overflow chain
    fn take_value(&mut self, value: CellValue) -> Result<Vec<u8>> {
        let bytes = read_value(&self.pages, &value)?;
        if let CellValue::Overflow { head, len } = value {
            self.free_overflow(head, len)?;
        }
        Ok(bytes)
    }

    /// Put a new root above a split one
    fn grow(&mut self, separator: Vec<u8>, right: PageId) -> Result<()> {
        let cells = [Cell::new_interior(separator, right)];
        let root = SlottedPage::build(PageType::Interior, self.root, &cells)?;
        self.root = self.pages.write_node(None, root)?;
        self.height += 1;
        trace!(root = %self.root, height = self.height, "tree grew");
        Ok(())
    }

    /// Collapse empty roots: an interior root without separators is
    /// replaced by its only child, an empty leaf root empties the tree
    fn shrink(&mut self) -> Result<()> {
        while self.root.is_some() {
            let page = self.pages.node(self.root)?;
            if page.cell_count() > 0 {
                break;
            }
            self.pages.release(self.root);
            if page.is_leaf() {
                self.root = PageId::NONE;
                self.height = 0;
            } else {
                self.root = page.leftmost_child();
                self.height -= 1;
            }
            trace!(root = %self.root, height = self.height, "tree shrank");
        }
        Ok(())
    }

    fn insert_into(&mut self, page_id: PageId, cell: Cell) -> Result<(Written, Option<CellValue>)> {
        let page = self.pages.node(page_id)?;

        if page.is_leaf() {
            let mut cells = page.cells()?;
            let replaced = match search_cells(&cells, &cell.key) {
                Ok(index) => Some(std::mem::replace(&mut cells[index], cell).value),
                Err(index) => {
                    cells.insert(index, cell);
                    None
                }
            };
            let written = self.write_cells(page_id, PageType::Leaf, PageId::NONE, cells)?;
            return Ok((written, replaced));
        }

        let slot = page.child_slot(&cell.key)?;
        let child = page.child_at(slot)?;
        let (outcome, replaced) = self.insert_into(child, cell)?;
        if outcome.page == child && outcome.split.is_none() {
            return Ok((Written::unchanged(page_id, &page), replaced));
        }

        let mut cells = page.cells()?;
        let mut leftmost = page.leftmost_child();
        set_child(&mut cells, &mut leftmost, slot, outcome.page);
        if let Some((separator, right)) = outcome.split {
            cells.insert(slot, Cell::new_interior(separator, right));
        }
        let written = self.write_cells(page_id, PageType::Interior, leftmost, cells)?;
        Ok((written, replaced))
    }

    fn remove_from(&mut self, page_id: PageId, key: &[u8]) -> Result<Option<(Written, CellValue)>> {
        let page = self.pages.node(page_id)?;

        if page.is_leaf() {
            let mut cells = page.cells()?;
            let Ok(index) = search_cells(&cells, key) else {
                return Ok(None);
            };
            let removed = cells.remove(index);
            let written = self.write_cells(page_id, PageType::Leaf, PageId::NONE, cells)?;
            return Ok(Some((written, removed.value)));
        }

        let slot = page.child_slot(key)?;
        let child = page.child_at(slot)?;
        let Some((outcome, removed)) = self.remove_from(child, key)? else {
            return Ok(None);
        };
        if outcome.page == child && outcome.split.is_none() && !outcome.underflow {
            return Ok(Some((Written::unchanged(page_id, &page), removed)));
        }

        let mut cells = page.cells()?;
        let mut leftmost = page.leftmost_child();
        set_child(&mut cells, &mut leftmost, slot, outcome.page);
        if let Some((separator, right)) = outcome.split {
            cells.insert(slot, Cell::new_interior(separator, right));
        } else if outcome.underflow && !cells.is_empty() {
            self.rebalance(&mut cells, &mut leftmost, slot.saturating_sub(1))?;
        }

        let written = self.write_cells(page_id, PageType::Interior, leftmost, cells)?;
        Ok(Some((written, removed)))
    }

    /// Merge or redistribute the children at `left_slot` and
    /// `left_slot + 1`, updating the parent's cells to match
    fn rebalance(&mut self, cells: &mut Vec<Cell>, leftmost: &mut PageId, left_slot: usize) -> Result<()> {
        let left_id = child_of(cells, *leftmost, left_slot);
        let right_id = cells[left_slot].child;
        let left = self.pages.node(left_id)?;
        let right = self.pages.node(right_id)?;
        if left.page_type() != right.page_type() {
            return Err(StorageError::corruption(format!(
                "siblings {} and {} have different page types",
                left_id, right_id
            )));
        }

        let page_type = left.page_type();
        let first_child = left.leftmost_child();
        let mut combined = left.cells()?;
        if page_type.is_interior() {
            combined.push(Cell::new_interior(cells[left_slot].key.clone(), right.leftmost_child()));
        }
        combined.extend(right.cells()?);

        if fits(page_type, &combined) {
            let merged = SlottedPage::build(page_type, first_child, &combined)?;
            let merged_id = self.pages.write_node(Some(left_id), merged)?;
            self.pages.release(right_id);
            cells.remove(left_slot);
            set_child(cells, leftmost, left_slot, merged_id);
            trace!(left = %left_id, right = %right_id, merged = %merged_id, "merged siblings");
        } else {
            let (new_left, separator, new_right) =
                self.write_pair(Some(left_id), Some(right_id), page_type, first_child, combined)?;
            cells[left_slot] = Cell::new_interior(separator, new_right);
            set_child(cells, leftmost, left_slot, new_left);
            trace!(left = %new_left, right = %new_right, "redistributed siblings");
        }
        Ok(())
    }

    /// Write a node's cells over `previous`, splitting if they do not fit
    fn write_cells(
        &mut self,
        previous: PageId,
        page_type: PageType,
        leftmost: PageId,
        cells: Vec<Cell>,
    ) -> Result<Written> {
        if fits(page_type, &cells) {
            let used = PageHeader::size_for(page_type) + footprint(&cells);
            let cell_count = cells.len();
            let page = SlottedPage::build(page_type, leftmost, &cells)?;
            return Ok(Written {
                page: self.pages.write_node(Some(previous), page)?,
                split: None,
                cell_count,
                underflow: cell_count == 0 || used < UNDERFLOW_THRESHOLD,
            });
        }

        let (left, separator, right) = self.write_pair(Some(previous), None, page_type, leftmost, cells)?;
        trace!(left = %left, right = %right, "split page");
        Ok(Written {
            page: left,
            split: Some((separator, right)),
            cell_count: 0,
            underflow: false,
        })
    }

    /// Spread `cells` over two pages, returning (left, separator, right)
    fn write_pair(
        &mut self,
        left_previous: Option<PageId>,
        right_previous: Option<PageId>,
        page_type: PageType,
        leftmost: PageId,
        mut cells: Vec<Cell>,
    ) -> Result<(PageId, Vec<u8>, PageId)> {
        let too_large = |cells: &[Cell]| StorageError::PageFull {
            needed: footprint(cells),
            available: SlottedPage::capacity(page_type),
        };

        let (left, right, separator) = if page_type.is_leaf() {
            let at = leaf_split_point(&cells).ok_or_else(|| too_large(&cells))?;
            let right_cells = cells.split_off(at);
            let separator = right_cells[0].key.clone();
            (
                SlottedPage::build(page_type, PageId::NONE, &cells)?,
                SlottedPage::build(page_type, PageId::NONE, &right_cells)?,
                separator,
            )
        } else {
            let at = interior_split_point(&cells).ok_or_else(|| too_large(&cells))?;
            let right_cells = cells.split_off(at + 1);
            let promoted = cells.pop().ok_or_else(|| too_large(&right_cells))?;
            (
                SlottedPage::build(page_type, leftmost, &cells)?,
                SlottedPage::build(page_type, promoted.child, &right_cells)?,
                promoted.key,
            )
        };

        let left = self.pages.write_node(left_previous, left)?;
        let right = self.pages.write_node(right_previous, right)?;
        Ok((left, separator, right))
    }

    /// Store a value in a chain of overflow pages, returning its head.
    ///
    /// The chain is written back to front so each page can link to the
    /// next one's final location.
    fn write_overflow(&mut self, value: &[u8]) -> Result<PageId> {
        let mut next = PageId::NONE;
        for chunk in value.chunks(OVERFLOW_CAPACITY).rev() {
            next = self.pages.write_raw(OverflowPage::build(chunk, next))?;
        }
        trace!(head = %next, len = value.len(), "wrote overflow chain");
        Ok(next)
    }

    fn free_overflow(&mut self, head: PageId, len: u64) -> Result<()> {
        let mut chain = Vec::new();
        walk_overflow(&self.pages, head, len, |id, _| {
            chain.push(id);
            Ok(())
        })?;
        for id in chain {
            self.pages.release(id);
        }
        Ok(())
    }
}

/// Load a leaf value, following its overflow chain if it has one
pub(crate) fn read_value<S: PageSource + ?Sized>(pages: &S, value: &CellValue) -> Result<Vec<u8>> {
    match value {
        CellValue::Inline(bytes) => Ok(bytes.clone()),
        CellValue::Overflow { head, len } => {
            let mut out = Vec::with_capacity(usize::try_from(*len).unwrap_or(0));
            walk_overflow(pages, *head, *len, |_, chunk| {
                out.extend_from_slice(chunk);
                Ok(())
            })?;
            Ok(out)
        }
    }
}

/// Visit each page of an overflow chain holding `len` bytes.
///
/// Fails if the chain is longer or shorter than `len` implies.
fn walk_overflow<S, F>(pages: &S, head: PageId, len: u64, mut visit: F) -> Result<()>
where
    S: PageSource + ?Sized,
    F: FnMut(PageId, &[u8]) -> Result<()>,
{
    let expected_pages = len.div_ceil(OVERFLOW_CAPACITY as u64);
    let mut remaining = len;
    let mut page_id = head;

    for _ in 0..expected_pages {
        if page_id.is_none() {
            break;
        }
        let buf = pages.raw(page_id)?;
        let (chunk, next) = OverflowPage::parse(page_id, &buf)?;
        if chunk.len() as u64 > remaining {
            break;
        }
        remaining -= chunk.len() as u64;
        visit(page_id, chunk)?;
        page_id = next;
    }

    if remaining != 0 || page_id.is_some() {
        return Err(StorageError::corruption(format!(
            "overflow chain at {} does not hold {} bytes",
            head, len
        )));
    }
    Ok(())
}

/// Reject keys the tree cannot store
pub(crate) fn validate_key(key: &[u8]) -> Result<()> {
    if key.is_empty() {
        return Err(StorageError::EmptyKey);
    }
    if key.len() > MAX_KEY_SIZE {
        return Err(StorageError::KeyTooLarge {
            size: key.len(),
            max: MAX_KEY_SIZE,
        });
    }
    Ok(())
}

fn search_cells(cells: &[Cell], key: &[u8]) -> std::result::Result<usize, usize> {
    cells.binary_search_by(|cell| cell.key.as_slice().cmp(key))
}

fn footprint(cells: &[Cell]) -> usize {
    cells.iter().map(Cell::footprint).sum()
}

fn fits(page_type: PageType, cells: &[Cell]) -> bool {
    footprint(cells) <= SlottedPage::capacity(page_type)
}

fn child_of(cells: &[Cell], leftmost: PageId, slot: usize) -> PageId {
    if slot == 0 {
        leftmost
    } else {
        cells[slot - 1].child
    }
}

fn set_child(cells: &mut [Cell], leftmost: &mut PageId, slot: usize, child: PageId) {
    if slot == 0 {
        *leftmost = child;
    } else {
        cells[slot - 1].child = child;
    }
}

/// Index of the first cell of the right half, balancing bytes on both
/// sides. Both halves keep at least one cell.
fn leaf_split_point(cells: &[Cell]) -> Option<usize> {
    let total = footprint(cells);
    let mut left = 0;
    let mut best: Option<(usize, usize)> = None;
    for at in 1..cells.len() {
        left += cells[at - 1].footprint();
        let worst = left.max(total - left);
        if best.map_or(true, |(w, _)| worst < w) {
            best = Some((worst, at));
        }
    }
    best.map(|(_, at)| at)
}

/// Index of the cell to promote, balancing bytes on both sides. Both
/// halves keep at least one cell.
fn interior_split_point(cells: &[Cell]) -> Option<usize> {
    let total = footprint(cells);
    let mut left = 0;
    let mut best: Option<(usize, usize)> = None;
    for at in 1..cells.len().saturating_sub(1) {
        left += cells[at - 1].footprint();
        let right = total - left - cells[at].footprint();
        let worst = left.max(right);
        if best.map_or(true, |(w, _)| worst < w) {
            best = Some((worst, at));
        }
    }
    best.map(|(_, at)| at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::testing::MemPages;
    use rand::seq::SliceRandom;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use std::collections::BTreeMap;

    fn tree(pages: &mut MemPages) -> BTree<&mut MemPages> {
        BTree::new(pages, PageId::NONE, 0)
    }

    fn key(i: usize) -> Vec<u8> {
        format!("key{:05}", i).into_bytes()
    }

    #[test]
    fn test_btree_empty() -> Result<()> {
        let mut pages = MemPages::default();
        let mut btree = tree(&mut pages);
        assert_eq!(btree.get(b"key")?, None);
        assert_eq!(btree.delete(b"key")?, None);
        assert_eq!(btree.verify()?, 0);
        Ok(())
    }

    #[test]
    fn test_btree_insert_update_delete() -> Result<()> {
        let mut pages = MemPages::default();
        let mut btree = tree(&mut pages);

        assert_eq!(btree.put(b"c", b"3")?, None);
        btree.put(b"a", b"1")?;
        btree.put(b"b", b"2")?;
        assert_eq!(btree.get(b"a")?, Some(b"1".to_vec()));
        assert_eq!(btree.get(b"d")?, None);

        assert_eq!(btree.put(b"a", b"updated")?, Some(b"1".to_vec()));
        assert_eq!(btree.get(b"a")?, Some(b"updated".to_vec()));

        assert_eq!(btree.delete(b"a")?, Some(b"updated".to_vec()));
        assert_eq!(btree.delete(b"a")?, None);
        assert_eq!(btree.get(b"a")?, None);
        assert_eq!(btree.verify()?, 2);
        Ok(())
    }

    #[test]
    fn test_btree_rejects_bad_keys() {
        let mut pages = MemPages::default();
        let mut btree = tree(&mut pages);

        assert!(matches!(btree.put(b"", b"v"), Err(StorageError::EmptyKey)));
        let long = vec![b'k'; MAX_KEY_SIZE + 1];
        assert!(matches!(
            btree.put(&long, b"v"),
            Err(StorageError::KeyTooLarge { .. })
        ));
        assert!(btree.put(&long[..MAX_KEY_SIZE], b"v").is_ok());
    }

    #[test]
    fn test_btree_splits_and_collapses() -> Result<()> {
        let mut pages = MemPages::default();
        let mut btree = tree(&mut pages);

        for i in 0..2000 {
            btree.put(&key(i), format!("value{}", i).as_bytes())?;
        }
        assert!(btree.height() >= 2);
        assert_eq!(btree.verify()?, 2000);
        assert_eq!(btree.get(&key(1234))?, Some(b"value1234".to_vec()));

        for i in 0..2000 {
            assert!(btree.delete(&key(i))?.is_some(), "missing {}", i);
        }
        assert!(btree.is_empty());
        assert_eq!(btree.height(), 0);
        drop(btree);
        assert_eq!(pages.live(), 0);
        Ok(())
    }

    #[test]
    fn test_btree_large_keys_force_interior_splits() -> Result<()> {
        let mut pages = MemPages::default();
        let mut btree = tree(&mut pages);

        for i in 0..600 {
            let mut k = vec![b'x'; MAX_KEY_SIZE];
            k[..8].copy_from_slice(format!("{:08}", i).as_bytes());
            btree.put(&k, &[1u8; 8])?;
        }
        assert!(btree.height() >= 3);
        assert_eq!(btree.verify()?, 600);
        Ok(())
    }

    #[test]
    fn test_btree_overflow_values() -> Result<()> {
        let mut pages = MemPages::default();
        let mut btree = tree(&mut pages);

        let big: Vec<u8> = (0..3 * OVERFLOW_CAPACITY + 17).map(|i| i as u8).collect();
        btree.put(b"big", &big)?;
        btree.put(b"small", b"x")?;
        assert_eq!(btree.get(b"big")?, Some(big.clone()));

        // 1 leaf + 4 overflow pages
        assert_eq!(btree.page_ids()?.len(), 5);

        assert_eq!(btree.put(b"big", b"now inline")?, Some(big.clone()));
        assert_eq!(btree.get(b"big")?, Some(b"now inline".to_vec()));
        assert_eq!(btree.page_ids()?.len(), 1);

        btree.put(b"big", &big)?;
        assert_eq!(btree.delete(b"big")?, Some(big));
        drop(btree);
        assert_eq!(pages.live(), 1);
        Ok(())
    }

    #[test]
    fn test_btree_value_at_inline_limit() -> Result<()> {
        let mut pages = MemPages::default();
        let mut btree = tree(&mut pages);

        let at_limit = vec![7u8; INLINE_VALUE_LIMIT];
        let over = vec![8u8; INLINE_VALUE_LIMIT + 1];
        btree.put(b"a", &at_limit)?;
        btree.put(b"b", &over)?;
        assert_eq!(btree.page_ids()?.len(), 2);
        assert_eq!(btree.get(b"a")?, Some(at_limit));
        assert_eq!(btree.get(b"b")?, Some(over));
        Ok(())
    }

    #[test]
    fn test_btree_missing_delete_writes_nothing() -> Result<()> {
        let mut pages = MemPages::default();
        let mut btree = tree(&mut pages);
        for i in 0..500 {
            btree.put(&key(i), b"v")?;
        }
        let root = btree.root();
        let ids = btree.page_ids()?;

        assert_eq!(btree.delete(b"absent")?, None);
        assert_eq!(btree.root(), root);
        assert_eq!(btree.page_ids()?, ids);
        Ok(())
    }

    #[test]
    fn test_btree_matches_model() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut pages = MemPages::default();
        let mut btree = tree(&mut pages);
        let mut model = BTreeMap::new();

        let mut keys: Vec<usize> = (0..1500).collect();
        keys.shuffle(&mut rng);

        for round in 0..6000 {
            let k = key(keys[rng.gen_range(0..keys.len())]);
            if rng.gen_bool(0.6) {
                let len = if rng.gen_bool(0.05) { 5000 } else { rng.gen_range(0..200) };
                let v = vec![(round % 251) as u8; len];
                let old = btree.put(&k, &v)?;
                assert_eq!(old, model.insert(k, v));
            } else {
                assert_eq!(btree.delete(&k)?, model.remove(&k));
            }

            if round % 1000 == 999 {
                assert_eq!(btree.verify()?, model.len());
            }
        }

        let entries: Vec<(Vec<u8>, Vec<u8>)> = btree.cursor().collect::<Result<_>>()?;
        let expected: Vec<(Vec<u8>, Vec<u8>)> = model.into_iter().collect();
        assert_eq!(entries, expected);

        let in_use = btree.page_ids()?.len();
        drop(btree);
        assert_eq!(pages.live(), in_use);
        Ok(())
    }
}
