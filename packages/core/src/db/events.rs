//! Tree Events
//!
//! Domain events emitted by `PageTreeService` after a hierarchy change commits.
//! They follow the observer pattern: any number of subscribers (sync layers,
//! search indexers, UI bridges) receive them through a tokio broadcast channel
//! without coupling to the storage layer.
//!
//! # Event Flow
//!
//! 1. A service operation commits its transaction
//! 2. The matching `TreeEvent` is sent on the broadcast channel
//! 3. All subscribers receive it asynchronously; lagging subscribers may miss events
//!
//! Events are never sent for rolled-back work.

use crate::models::Page;
use serde::{Deserialize, Serialize};

/// Hierarchy change notifications
///
/// Serialized with an internal `type` tag so consumers in other languages can
/// switch on a single field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TreeEvent {
    /// A page was created
    #[serde(rename = "page:created")]
    PageCreated { page: Page },

    /// A page changed parent and/or position within its space
    #[serde(rename = "page:moved", rename_all = "camelCase")]
    PageMoved {
        id: String,
        parent_page_id: Option<String>,
        position: String,
    },

    /// A subtree moved to another space (root first)
    #[serde(rename = "pages:movedToSpace", rename_all = "camelCase")]
    PagesMovedToSpace { ids: Vec<String>, space_id: String },

    /// Pages were soft-deleted
    #[serde(rename = "pages:softDeleted")]
    PagesSoftDeleted { ids: Vec<String> },

    /// Pages were restored from the trash
    #[serde(rename = "pages:restored")]
    PagesRestored { ids: Vec<String> },

    /// Pages were permanently removed
    #[serde(rename = "pages:purged")]
    PagesPurged { ids: Vec<String> },
}

impl TreeEvent {
    /// String representation of the event type, matching the serialized tag
    pub fn event_type(&self) -> &'static str {
        match self {
            TreeEvent::PageCreated { .. } => "page:created",
            TreeEvent::PageMoved { .. } => "page:moved",
            TreeEvent::PagesMovedToSpace { .. } => "pages:movedToSpace",
            TreeEvent::PagesSoftDeleted { .. } => "pages:softDeleted",
            TreeEvent::PagesRestored { .. } => "pages:restored",
            TreeEvent::PagesPurged { .. } => "pages:purged",
        }
    }

    /// Ids of every page the event touches
    pub fn page_ids(&self) -> Vec<&str> {
        match self {
            TreeEvent::PageCreated { page } => vec![page.id.as_str()],
            TreeEvent::PageMoved { id, .. } => vec![id.as_str()],
            TreeEvent::PagesMovedToSpace { ids, .. }
            | TreeEvent::PagesSoftDeleted { ids }
            | TreeEvent::PagesRestored { ids }
            | TreeEvent::PagesPurged { ids } => ids.iter().map(String::as_str).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewPage;
    use chrono::Utc;

    /// Contract test: documents the exact JSON shape consumers depend on
    ///
    /// Internally-tagged: the `type` discriminator sits next to the variant fields.
    #[test]
    fn test_tree_event_serialization_contract() {
        let moved = TreeEvent::PageMoved {
            id: "page-1".to_string(),
            parent_page_id: None,
            position: "a0".to_string(),
        };
        let parsed = serde_json::to_value(&moved).unwrap();
        assert_eq!(parsed.get("type").unwrap(), "page:moved");
        assert_eq!(parsed.get("id").unwrap(), "page-1");
        assert!(parsed.get("parentPageId").unwrap().is_null());
        assert_eq!(parsed.get("position").unwrap(), "a0");

        let to_space = TreeEvent::PagesMovedToSpace {
            ids: vec!["a".to_string(), "b".to_string()],
            space_id: "space-2".to_string(),
        };
        let parsed = serde_json::to_value(&to_space).unwrap();
        assert_eq!(parsed.get("type").unwrap(), to_space.event_type());
        assert_eq!(parsed.get("spaceId").unwrap(), "space-2");
        assert_eq!(parsed.get("ids").unwrap().as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_created_event_carries_page() {
        let page = NewPage::new("space-1")
            .with_id("page-1")
            .into_page("a0".to_string(), Utc::now());
        let event = TreeEvent::PageCreated { page };
        let parsed = serde_json::to_value(&event).unwrap();
        assert_eq!(parsed.get("type").unwrap(), "page:created");
        assert_eq!(parsed["page"]["spaceId"], "space-1");
        assert_eq!(event.page_ids(), vec!["page-1"]);

        let back: TreeEvent = serde_json::from_value(parsed).unwrap();
        assert_eq!(back, event);
    }
}
