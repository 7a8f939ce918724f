//! Client-side id → parent lookups for like and comment rows.
//!
//! Delete events for likes and comments normally carry only the deleted
//! row's id. Recording the parent post (and liking user) when a row is
//! first seen lets those deletes be applied to the right item later.

use crate::events::DeletedRow;
use crate::models::{FeedItem, LikeRecord};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
struct LikeOwner {
    post_id: String,
    user_id: String,
}

#[derive(Debug, Default)]
pub struct ParentIndex {
    likes: HashMap<String, LikeOwner>,
    comments: HashMap<String, String>,
    /// Comment id → post, for deletes already applied.
    deleted_comments: HashMap<String, String>,
}

impl ParentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_like(&mut self, like: &LikeRecord) {
        if let Some(id) = &like.id {
            self.likes.insert(
                id.clone(),
                LikeOwner {
                    post_id: like.post_id.clone(),
                    user_id: like.user_id.clone(),
                },
            );
        }
    }

    /// Indexes every like id carried by freshly loaded items.
    pub fn record_items(&mut self, items: &[FeedItem]) {
        for item in items {
            for like in item.likes.iter() {
                self.record_like(like);
            }
        }
    }

    /// Fills in the post and user of a like delete, consuming the entry.
    pub fn resolve_like(&mut self, deleted: &DeletedRow) -> Option<DeletedRow> {
        let known = self.likes.remove(&deleted.id);
        let post_id = deleted
            .post_id
            .clone()
            .or_else(|| known.as_ref().map(|owner| owner.post_id.clone()))?;
        let user_id = deleted
            .user_id
            .clone()
            .or_else(|| known.map(|owner| owner.user_id));
        Some(DeletedRow {
            id: deleted.id.clone(),
            post_id: Some(post_id),
            user_id,
        })
    }

    /// Records a comment on first sight. Returns `false` for an id already
    /// seen, so a replayed insert is not counted twice.
    pub fn record_comment(&mut self, comment_id: &str, post_id: &str) -> bool {
        if self.deleted_comments.contains_key(comment_id) || self.comments.contains_key(comment_id) {
            return false;
        }
        self.comments
            .insert(comment_id.to_string(), post_id.to_string());
        true
    }

    /// Post a deleted comment belonged to. Each comment id resolves at most
    /// once; a delete whose post is unknown leaves no trace.
    pub fn resolve_comment(&mut self, deleted: &DeletedRow) -> Option<String> {
        if self.deleted_comments.contains_key(&deleted.id) {
            return None;
        }
        let known = self.comments.remove(&deleted.id);
        let post_id = deleted.post_id.clone().or(known)?;
        self.deleted_comments
            .insert(deleted.id.clone(), post_id.clone());
        Some(post_id)
    }

    /// Drops entries belonging to a post that left the page.
    pub fn forget_post(&mut self, post_id: &str) {
        self.likes.retain(|_, owner| owner.post_id != post_id);
        self.comments.retain(|_, parent| parent != post_id);
        self.deleted_comments.retain(|_, parent| parent != post_id);
    }

    pub fn len(&self) -> usize {
        self.likes.len() + self.comments.len() + self.deleted_comments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn like(id: &str, post: &str, user: &str) -> LikeRecord {
        LikeRecord {
            id: Some(id.into()),
            post_id: post.into(),
            user_id: user.into(),
            created_at: None,
        }
    }

    #[test]
    fn like_delete_resolves_through_index() {
        let mut index = ParentIndex::new();
        index.record_like(&like("l1", "p1", "u1"));
        let resolved = index
            .resolve_like(&DeletedRow::id_only("l1"))
            .expect("resolved");
        assert_eq!(resolved.post_id.as_deref(), Some("p1"));
        assert_eq!(resolved.user_id.as_deref(), Some("u1"));
        assert!(index.resolve_like(&DeletedRow::id_only("l1")).is_none());
    }

    #[test]
    fn payload_parent_wins_over_index() {
        let mut index = ParentIndex::new();
        let deleted = DeletedRow {
            id: "l9".into(),
            post_id: Some("p4".into()),
            user_id: None,
        };
        let resolved = index.resolve_like(&deleted).expect("resolved");
        assert_eq!(resolved.post_id.as_deref(), Some("p4"));
        assert_eq!(resolved.user_id, None);
    }

    #[test]
    fn pending_likes_are_not_indexed() {
        let mut index = ParentIndex::new();
        index.record_like(&LikeRecord::pending("p1", "u1"));
        assert!(index.is_empty());
    }

    #[test]
    fn comment_ids_resolve_once() {
        let mut index = ParentIndex::new();
        assert!(index.record_comment("c1", "p1"));
        assert!(!index.record_comment("c1", "p1"));
        assert_eq!(
            index.resolve_comment(&DeletedRow::id_only("c1")).as_deref(),
            Some("p1")
        );
        assert_eq!(index.resolve_comment(&DeletedRow::id_only("c1")), None);
        assert!(!index.record_comment("c1", "p1"));
    }

    #[test]
    fn unknown_comment_stays_unresolved() {
        let mut index = ParentIndex::new();
        assert_eq!(index.resolve_comment(&DeletedRow::id_only("c7")), None);
    }

    #[test]
    fn forgetting_a_post_prunes_its_rows() {
        let mut index = ParentIndex::new();
        index.record_like(&like("l1", "p1", "u1"));
        index.record_like(&like("l2", "p2", "u1"));
        index.record_comment("c1", "p1");
        index.forget_post("p1");
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn forgetting_a_post_prunes_its_deleted_comments() {
        let mut index = ParentIndex::new();
        index.record_comment("c1", "p1");
        index.record_comment("c2", "p2");
        index.resolve_comment(&DeletedRow::id_only("c1"));
        index.resolve_comment(&DeletedRow::id_only("c2"));
        assert_eq!(index.len(), 2);

        index.forget_post("p1");
        assert_eq!(index.len(), 1);
        assert!(index.record_comment("c1", "p1"));
        assert!(!index.record_comment("c2", "p2"));
    }

    #[test]
    fn unresolved_comment_deletes_are_not_kept() {
        let mut index = ParentIndex::new();
        for n in 0..50 {
            index.resolve_comment(&DeletedRow::id_only(&format!("c{n}")));
        }
        assert!(index.is_empty());
    }
}
