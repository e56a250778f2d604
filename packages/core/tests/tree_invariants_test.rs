//! Tree Invariant Tests
//!
//! Property and stress tests for the structural guarantees of the hierarchy:
//! - Random move sequences never produce a cycle or a cross-space parent link
//! - Sibling positions stay unique and strictly ordered
//! - Cascades touch exactly the captured subtree, also while unrelated inserts race them
//! - Concurrent appends on the libsql store all land with distinct positions

use anyhow::Result;
use pagespace_core::config::TreeConfig;
use pagespace_core::db::fractional_ordering::generate_key_between;
use pagespace_core::db::{MemoryStore, PageStore, PageTransaction, SqliteStore};
use pagespace_core::models::{NewPage, Page};
use pagespace_core::services::{ErrorKind, PageTreeService};
use proptest::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::Barrier;

async fn all_pages(store: &Arc<dyn PageStore>, space_id: &str) -> Vec<Page> {
    let mut tx = store.begin().await.unwrap();
    let pages = tx.find_by_space(space_id).await.unwrap();
    tx.rollback().await.unwrap();
    pages
}

/// Walk every parent chain; a chain longer than the page count means a cycle
fn assert_acyclic(pages: &[Page]) {
    let by_id: HashMap<&str, &Page> = pages.iter().map(|p| (p.id.as_str(), p)).collect();
    for page in pages {
        let mut current = page.parent_page_id.as_deref();
        let mut steps = 0;
        while let Some(parent_id) = current {
            steps += 1;
            assert!(steps <= pages.len(), "cycle through page {}", page.id);
            let parent = by_id
                .get(parent_id)
                .unwrap_or_else(|| panic!("dangling parent {}", parent_id));
            assert_eq!(parent.space_id, page.space_id);
            current = parent.parent_page_id.as_deref();
        }
    }
}

fn assert_unique_sibling_positions(pages: &[Page]) {
    let mut seen = HashSet::new();
    for page in pages {
        let key = (page.parent_page_id.clone(), page.position.clone());
        assert!(seen.insert(key), "duplicate sibling position {}", page.position);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_random_moves_keep_tree_acyclic(
        moves in prop::collection::vec((0usize..8, 0usize..9), 1..40)
    ) {
        tokio_test::block_on(async {
            let store: Arc<dyn PageStore> = Arc::new(MemoryStore::new());
            let service = PageTreeService::new(store.clone(), TreeConfig::default()).unwrap();

            let mut ids = Vec::new();
            for i in 0..8 {
                let page = service
                    .create(NewPage::new("c1").with_title(format!("P{}", i)))
                    .await
                    .unwrap();
                ids.push(page.id);
            }

            for (page_idx, parent_idx) in moves {
                // parent_idx == 8 moves the page back to the root level
                let parent = ids.get(parent_idx).map(String::as_str);
                let children = service.children("c1", parent, true).await.unwrap();
                let last = children.last().map(|s| s.page.position.clone());
                let position = generate_key_between(last.as_deref(), None).unwrap();

                match service.move_page(&ids[page_idx], &position, parent).await {
                    Ok(moved) => {
                        assert_eq!(moved.parent_page_id.as_deref(), parent);
                        assert_eq!(moved.position, position);
                    }
                    Err(e) => assert_eq!(e.kind(), ErrorKind::BadRequest, "unexpected {}", e),
                }
            }

            let pages = all_pages(&store, "c1").await;
            assert_eq!(pages.len(), 8);
            assert_acyclic(&pages);
            assert_unique_sibling_positions(&pages);
        });
    }
}

#[tokio::test]
async fn test_cascade_touches_exactly_the_subtree() -> Result<()> {
    let store: Arc<dyn PageStore> = Arc::new(MemoryStore::new());
    let service = PageTreeService::new(store.clone(), TreeConfig::default())?;

    let root = service.create(NewPage::new("c1")).await?;
    let sibling = service.create(NewPage::new("c1")).await?;
    let mut expected = vec![root.id.clone()];
    let mut frontier = vec![root.id.clone()];
    for _ in 0..3 {
        let mut next = Vec::new();
        for parent_id in &frontier {
            for _ in 0..2 {
                let page = service.create(NewPage::new("c1").with_parent(parent_id)).await?;
                expected.push(page.id.clone());
                next.push(page.id);
            }
        }
        frontier = next;
    }
    let outside_child = service.create(NewPage::new("c1").with_parent(&sibling.id)).await?;

    let result = service.soft_delete_tree(&root.id, "user-1").await?;
    assert_eq!(result.affected_count(), 15);
    let affected: HashSet<_> = result.affected_ids.iter().cloned().collect();
    let expected: HashSet<_> = expected.into_iter().collect();
    assert_eq!(affected, expected);

    for page in all_pages(&store, "c1").await {
        assert_eq!(page.is_deleted(), expected.contains(&page.id), "page {}", page.id);
    }
    assert!(!service.get_page(&outside_child.id).await?.is_deleted());
    Ok(())
}

const RACING_INSERTS: usize = 6;

/// Race `soft_delete_tree(root)` against creates under the root, under a nested page
/// of the subtree, and under an unrelated root-level sibling
async fn race_cascade_against_inserts(store: Arc<dyn PageStore>) -> Result<()> {
    let service = PageTreeService::new(store, TreeConfig::default())?;
    let root = service.create(NewPage::new("c1").with_title("Root")).await?;
    let branch = service.create(NewPage::new("c1").with_parent(&root.id)).await?;
    let sibling = service.create(NewPage::new("c1").with_title("Sibling")).await?;

    let barrier = Arc::new(Barrier::new(2 * RACING_INSERTS + 1));
    let mut inside = Vec::new();
    let mut outside = Vec::new();
    for i in 0..RACING_INSERTS {
        let parent_id = if i % 2 == 0 { root.id.clone() } else { branch.id.clone() };
        let (svc, gate) = (service.clone(), barrier.clone());
        inside.push(tokio::spawn(async move {
            gate.wait().await;
            svc.create(NewPage::new("c1").with_parent(&parent_id)).await
        }));

        let (svc, gate, sibling_id) = (service.clone(), barrier.clone(), sibling.id.clone());
        outside.push(tokio::spawn(async move {
            gate.wait().await;
            svc.create(NewPage::new("c1").with_parent(&sibling_id)).await
        }));
    }
    let cascade = {
        let (svc, gate, root_id) = (service.clone(), barrier.clone(), root.id.clone());
        tokio::spawn(async move {
            gate.wait().await;
            svc.soft_delete_tree(&root_id, "user-1").await
        })
    };

    let cascade = cascade.await??;
    let affected: HashSet<String> = cascade.affected_ids.iter().cloned().collect();
    assert!(affected.contains(&root.id) && affected.contains(&branch.id));

    let mut committed_before = 0;
    for handle in inside {
        match handle.await? {
            // Committed before the cascade captured the subtree
            Ok(page) => {
                assert!(affected.contains(&page.id), "insert {} escaped the cascade", page.id);
                assert!(service.get_page(&page.id).await?.is_deleted());
                committed_before += 1;
            }
            // Ran after the commit, when its parent was already deleted
            Err(e) => assert_eq!(e.kind(), ErrorKind::NotFound, "unexpected {}", e),
        }
    }
    assert_eq!(affected.len(), 2 + committed_before);

    for handle in outside {
        let page = handle.await??;
        assert!(!affected.contains(&page.id));
        assert!(!service.get_page(&page.id).await?.is_deleted());
    }
    assert_eq!(
        service.children("c1", Some(sibling.id.as_str()), false).await?.len(),
        RACING_INSERTS
    );

    // Nothing under the root was left active or missed
    let subtree: HashSet<String> = service
        .descendants(&root.id, true)
        .await?
        .into_iter()
        .map(|p| p.id)
        .collect();
    assert_eq!(subtree, affected);
    assert!(!service.get_page(&sibling.id).await?.is_deleted());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cascade_races_inserts_on_memory_store() -> Result<()> {
    for _ in 0..8 {
        race_cascade_against_inserts(Arc::new(MemoryStore::new())).await?;
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cascade_races_inserts_on_sqlite() -> Result<()> {
    for round in 0..3 {
        let temp_dir = TempDir::new()?;
        let store = SqliteStore::new(temp_dir.path().join(format!("race-{}.db", round))).await?;
        race_cascade_against_inserts(Arc::new(store)).await?;
    }
    Ok(())
}

#[tokio::test]
async fn test_restore_is_idempotent() -> Result<()> {
    let service = PageTreeService::new(Arc::new(MemoryStore::new()), TreeConfig::default())?;
    let root = service.create(NewPage::new("c1")).await?;
    let child = service.create(NewPage::new("c1").with_parent(&root.id)).await?;

    service.soft_delete_tree(&root.id, "user-1").await?;
    let first = service.restore_tree(&root.id, "user-1").await?;
    let second = service.restore_tree(&root.id, "user-1").await?;
    assert_eq!(first.affected_ids, second.affected_ids);

    let root_after = service.get_page(&root.id).await?;
    let child_after = service.get_page(&child.id).await?;
    assert!(!root_after.is_deleted() && !child_after.is_deleted());
    assert_eq!(root_after.position, root.position);
    assert_eq!(child_after.position, child.position);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_appends_on_sqlite() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let store = SqliteStore::new(temp_dir.path().join("test.db")).await?;
    let service = PageTreeService::new(Arc::new(store), TreeConfig::default())?;
    let root = service.create(NewPage::new("c1")).await?;

    let mut handles = Vec::new();
    for i in 0..8 {
        let service = service.clone();
        let parent_id = root.id.clone();
        handles.push(tokio::spawn(async move {
            service
                .create(NewPage::new("c1").with_parent(&parent_id).with_title(format!("P{}", i)))
                .await
        }));
    }
    for handle in handles {
        handle.await??;
    }

    let children = service.children("c1", Some(root.id.as_str()), false).await?;
    assert_eq!(children.len(), 8);
    let positions: Vec<_> = children.iter().map(|s| s.page.position.clone()).collect();
    let mut sorted = positions.clone();
    sorted.sort();
    sorted.dedup();
    assert_eq!(positions, sorted);
    Ok(())
}
