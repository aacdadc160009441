//! B-tree cursor for iteration.
//!
//! The cursor walks the leaves of one snapshot in key order. It keeps a
//! stack of (page, index) frames for the path from the root to the
//! current leaf, so only one root-to-leaf path is held at a time and
//! entries are decoded as they are yielded.

use crate::btree::{read_value, PageSource};
use crate::error::Result;
use crate::page::SlottedPage;
use crate::types::PageId;
use std::sync::Arc;

/// One level of the path from the root to the current leaf.
///
/// For a leaf, `index` is the next cell to yield; for an interior page,
/// the child slot currently being visited.
struct Frame {
    page: Arc<SlottedPage>,
    index: usize,
}

enum State {
    /// Not positioned yet; the first call to `next` descends from the root
    Start(Option<Vec<u8>>),
    Active,
    Done,
}

/// A cursor for iterating over B-tree entries
///
/// Yields `Result<(key, value)>`. After an error the cursor is fused.
pub struct Cursor<S> {
    pages: S,
    root: PageId,
    stack: Vec<Frame>,
    state: State,
}

impl<S: PageSource> Cursor<S> {
    /// Create a cursor starting at the first entry
    pub fn new(pages: S, root: PageId) -> Self {
        Self {
            pages,
            root,
            stack: Vec::new(),
            state: State::Start(None),
        }
    }

    /// Create a cursor starting at the first key `>= key`
    pub fn seek(pages: S, root: PageId, key: &[u8]) -> Self {
        Self {
            pages,
            root,
            stack: Vec::new(),
            state: State::Start(Some(key.to_vec())),
        }
    }

    fn position(&mut self, target: Option<&[u8]>) -> Result<()> {
        let mut page_id = self.root;
        while page_id.is_some() {
            let page = self.pages.node(page_id)?;
            let (index, child) = match (target, page.is_leaf()) {
                (Some(key), true) => (page.search(key)?.unwrap_or_else(|insert_at| insert_at), None),
                (Some(key), false) => {
                    let slot = page.child_slot(key)?;
                    (slot, Some(page.child_at(slot)?))
                }
                (None, true) => (0, None),
                (None, false) => (0, Some(page.leftmost_child())),
            };
            self.stack.push(Frame { page, index });
            page_id = child.unwrap_or(PageId::NONE);
        }
        Ok(())
    }

    fn advance(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        loop {
            let Some(frame) = self.stack.last_mut() else {
                return Ok(None);
            };

            if frame.page.is_leaf() {
                if frame.index < frame.page.cell_count() {
                    let cell = frame.page.get_cell(frame.index)?;
                    frame.index += 1;
                    let value = read_value(&self.pages, &cell.value)?;
                    return Ok(Some((cell.key, value)));
                }
                self.stack.pop();
                continue;
            }

            // interior: move to the next child subtree, if any
            frame.index += 1;
            if frame.index > frame.page.cell_count() {
                self.stack.pop();
                continue;
            }
            let child = frame.page.child_at(frame.index)?;
            let mut page_id = child;
            loop {
                let page = self.pages.node(page_id)?;
                let next = if page.is_leaf() {
                    None
                } else {
                    Some(page.leftmost_child())
                };
                self.stack.push(Frame { page, index: 0 });
                match next {
                    Some(id) => page_id = id,
                    None => break,
                }
            }
        }
    }
}

impl<S: PageSource> Iterator for Cursor<S> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if let State::Start(target) = std::mem::replace(&mut self.state, State::Active) {
            if let Err(e) = self.position(target.as_deref()) {
                self.state = State::Done;
                return Some(Err(e));
            }
        }
        if matches!(self.state, State::Done) {
            return None;
        }

        match self.advance() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.state = State::Done;
                self.stack.clear();
                None
            }
            Err(e) => {
                self.state = State::Done;
                self.stack.clear();
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::btree::testing::MemPages;
    use crate::btree::{BTree, Cursor};
    use crate::error::{Result, StorageError};
    use crate::types::PageId;

    fn filled(count: usize) -> Result<(MemPages, PageId)> {
        let mut pages = MemPages::default();
        let mut btree = BTree::new(&mut pages, PageId::NONE, 0);
        for i in (0..count).rev() {
            let value = if i % 97 == 0 { vec![b'v'; 3000] } else { i.to_string().into_bytes() };
            btree.put(format!("k{:05}", i).as_bytes(), &value)?;
        }
        let root = btree.root();
        Ok((pages, root))
    }

    #[test]
    fn test_cursor_empty_tree() {
        let pages = MemPages::default();
        let mut cursor = Cursor::new(&pages, PageId::NONE);
        assert!(cursor.next().is_none());
    }

    #[test]
    fn test_cursor_yields_sorted_entries() -> Result<()> {
        let (pages, root) = filled(1000)?;

        let keys: Vec<Vec<u8>> = Cursor::new(&pages, root)
            .map(|entry| entry.map(|(k, _)| k))
            .collect::<Result<_>>()?;
        assert_eq!(keys.len(), 1000);
        assert!(keys.windows(2).all(|w| w[0] < w[1]));

        let (k, v) = Cursor::new(&pages, root).nth(194).unwrap()?;
        assert_eq!(k, b"k00194");
        assert_eq!(v, vec![b'v'; 3000]);
        Ok(())
    }

    #[test]
    fn test_cursor_seek() -> Result<()> {
        let (pages, root) = filled(1000)?;

        let mut cursor = Cursor::seek(&pages, root, b"k00500");
        assert_eq!(cursor.next().unwrap()?.0, b"k00500");

        // between keys: lands on the next one
        let mut cursor = Cursor::seek(&pages, root, b"k00500x");
        assert_eq!(cursor.next().unwrap()?.0, b"k00501");
        assert_eq!(cursor.count(), 498);

        assert!(Cursor::seek(&pages, root, b"z").next().is_none());
        assert_eq!(Cursor::seek(&pages, root, b"a").count(), 1000);
        Ok(())
    }

    #[test]
    fn test_cursor_fuses_after_error() -> Result<()> {
        let (mut pages, root) = filled(1000)?;

        // drop a leaf from the middle of the tree
        let victim = *pages
            .nodes
            .iter()
            .find(|(id, page)| page.is_leaf() && **id != root)
            .map(|(id, _)| id)
            .unwrap();
        pages.nodes.remove(&victim);

        let mut cursor = Cursor::new(&pages, root);
        let mut saw_error = false;
        for entry in cursor.by_ref() {
            if let Err(e) = entry {
                assert!(matches!(e, StorageError::PageNotFound(_)));
                saw_error = true;
            }
        }
        assert!(saw_error);
        assert!(cursor.next().is_none());
        Ok(())
    }
}
