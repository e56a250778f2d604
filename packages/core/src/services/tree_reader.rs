//! TreeReader - read-only hierarchy queries
//!
//! Children, pre-order descendants, ancestor chains and has-children checks.
//! Every method runs inside a caller-supplied transaction so cascades can
//! capture a subtree and mutate it against the same snapshot.
//!
//! # Traversal
//!
//! Descendants are gathered from one bulk fetch of the root's space, indexed by
//! parent id, then walked with an explicit stack (no recursion, no recursive SQL).
//! A visited set turns a corrupted, cyclic parent chain into `TraversalLimit`
//! instead of an endless loop.
//!
//! `max_depth` bounds placements, not reads: the mutator asks [`TreeReader::depth_in`]
//! and [`TreeReader::subtree_height_in`] before nesting a page, and every acyclic
//! tree stays traversable whatever its depth.

use crate::db::PageTransaction;
use crate::models::{Page, PageSummary};
use crate::services::error::{TreeError, TreeResult};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
pub struct TreeReader {
    max_depth: usize,
}

impl Default for TreeReader {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl TreeReader {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    /// Deepest level a page may be placed at (root level is 0)
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Fetch a page regardless of deletion state
    pub async fn get_page_in(&self, tx: &mut dyn PageTransaction, page_id: &str) -> TreeResult<Page> {
        tx.find_by_id(page_id)
            .await?
            .ok_or_else(|| TreeError::page_not_found(page_id))
    }

    /// Whether `page_id` has at least one active child
    pub async fn has_children_in(&self, tx: &mut dyn PageTransaction, page_id: &str) -> TreeResult<bool> {
        Ok(tx.has_children(page_id, false).await?)
    }

    async fn summarize(&self, tx: &mut dyn PageTransaction, page: Page) -> TreeResult<PageSummary> {
        let has_children = self.has_children_in(tx, &page.id).await?;
        Ok(PageSummary { page, has_children })
    }

    /// Direct children of `parent_id` (root level when `None`), in position order
    pub async fn children_in(
        &self,
        tx: &mut dyn PageTransaction,
        space_id: &str,
        parent_id: Option<&str>,
        include_deleted: bool,
    ) -> TreeResult<Vec<PageSummary>> {
        let pages = tx.find_children(space_id, parent_id, include_deleted).await?;
        tracing::debug!(
            "Loaded {} child(ren) of {:?} in space {}",
            pages.len(),
            parent_id,
            space_id
        );

        let mut summaries = Vec::with_capacity(pages.len());
        for page in pages {
            summaries.push(self.summarize(tx, page).await?);
        }
        Ok(summaries)
    }

    /// Pre-order subtree of `root_id`, root first, siblings in position order
    ///
    /// Without `include_deleted`, a deleted page hides its whole subtree, and a
    /// deleted root yields an empty list.
    ///
    /// # Errors
    ///
    /// - `PageNotFound` if the root does not exist
    /// - `TraversalLimit` if the walk revisits a page
    pub async fn descendants_in(
        &self,
        tx: &mut dyn PageTransaction,
        root_id: &str,
        include_deleted: bool,
    ) -> TreeResult<Vec<Page>> {
        let ordered = self.capture(tx, root_id, include_deleted).await?;
        tracing::debug!(
            "Captured {} page(s) under {} (include_deleted={})",
            ordered.len(),
            root_id,
            include_deleted
        );
        Ok(ordered.into_iter().map(|(page, _)| page).collect())
    }

    /// Levels below `root_id` in its subtree, deleted pages included (0 for a leaf)
    pub async fn subtree_height_in(&self, tx: &mut dyn PageTransaction, root_id: &str) -> TreeResult<usize> {
        let captured = self.capture(tx, root_id, true).await?;
        Ok(captured.iter().map(|(_, depth)| *depth).max().unwrap_or(0))
    }

    /// Number of ancestors above `page_id` (0 for a root-level page)
    ///
    /// A dangling parent reference ends the count like a missing parent would.
    pub async fn depth_in(&self, tx: &mut dyn PageTransaction, page_id: &str) -> TreeResult<usize> {
        let mut current = self.get_page_in(tx, page_id).await?;
        let mut visited = HashSet::from([current.id.clone()]);
        let mut depth = 0;

        while let Some(parent_id) = current.parent_page_id.take() {
            if !visited.insert(parent_id.clone()) {
                return Err(TreeError::traversal_limit(&parent_id, depth));
            }
            let Some(parent) = tx.find_by_id(&parent_id).await? else {
                break;
            };
            depth += 1;
            current = parent;
        }
        Ok(depth)
    }

    /// Pre-order subtree of `root_id`, each page with its depth relative to the root
    async fn capture(
        &self,
        tx: &mut dyn PageTransaction,
        root_id: &str,
        include_deleted: bool,
    ) -> TreeResult<Vec<(Page, usize)>> {
        let root = self.get_page_in(tx, root_id).await?;
        if !include_deleted && root.is_deleted() {
            return Ok(Vec::new());
        }

        let space_pages = tx.find_by_space(&root.space_id).await?;
        walk(root, &space_pages, include_deleted)
    }

    /// Root-to-node chain ending with `page_id` itself
    ///
    /// The walk stops at the first page without a parent or at a dangling parent
    /// reference.
    pub async fn ancestors_in(
        &self,
        tx: &mut dyn PageTransaction,
        page_id: &str,
    ) -> TreeResult<Vec<PageSummary>> {
        let mut current = self.get_page_in(tx, page_id).await?;
        let mut visited = HashSet::from([current.id.clone()]);
        let mut chain = Vec::new();

        while let Some(parent_id) = current.parent_page_id.clone() {
            if !visited.insert(parent_id.clone()) {
                return Err(TreeError::traversal_limit(&parent_id, visited.len()));
            }
            let Some(parent) = tx.find_by_id(&parent_id).await? else {
                tracing::warn!("Page {} references missing parent {}", current.id, parent_id);
                break;
            };
            chain.push(std::mem::replace(&mut current, parent));
        }
        chain.push(current);
        chain.reverse();

        let mut summaries = Vec::with_capacity(chain.len());
        for page in chain {
            summaries.push(self.summarize(tx, page).await?);
        }
        Ok(summaries)
    }
}

/// Pre-order walk from `root` over the adjacency index of `space_pages`
fn walk(root: Page, space_pages: &[Page], include_deleted: bool) -> TreeResult<Vec<(Page, usize)>> {
    // `space_pages` arrives in position order, so each child list does too
    let mut index: HashMap<&str, Vec<&Page>> = HashMap::new();
    for page in space_pages {
        if let Some(parent_id) = page.parent_page_id.as_deref() {
            index.entry(parent_id).or_default().push(page);
        }
    }

    let mut visited: HashSet<&str> = HashSet::from([root.id.as_str()]);
    let mut stack: Vec<(&Page, usize)> = Vec::new();
    push_children(&mut stack, &index, &root.id, 1, include_deleted);

    let mut ordered = vec![(root.clone(), 0)];
    while let Some((page, depth)) = stack.pop() {
        if !visited.insert(page.id.as_str()) {
            tracing::warn!(
                "Traversal under {} revisited {} (depth {})",
                root.id,
                page.id,
                depth
            );
            return Err(TreeError::traversal_limit(&page.id, depth));
        }
        ordered.push((page.clone(), depth));
        push_children(&mut stack, &index, &page.id, depth + 1, include_deleted);
    }
    Ok(ordered)
}

/// Push the children of `parent_id` so the first sibling is popped first
fn push_children<'a>(
    stack: &mut Vec<(&'a Page, usize)>,
    index: &HashMap<&str, Vec<&'a Page>>,
    parent_id: &str,
    depth: usize,
    include_deleted: bool,
) {
    if let Some(children) = index.get(parent_id) {
        stack.extend(
            children
                .iter()
                .rev()
                .filter(|child| include_deleted || !child.is_deleted())
                .map(|child| (*child, depth)),
        );
    }
}

// Comprehensive tests in separate module
#[cfg(test)]
#[path = "tree_reader_test.rs"]
mod tree_reader_test;
