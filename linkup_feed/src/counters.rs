//! Folding like/comment/post change events into a single feed item.
//!
//! Every function here is pure and idempotent where the event allows it;
//! they report whether the item changed so callers can skip republishing.

use crate::events::{Change, CommentEvent, LikeEvent, PostEvent};
use crate::models::FeedItem;

pub fn apply_like(item: &mut FeedItem, event: &LikeEvent) -> bool {
    match event {
        Change::Inserted(like) => {
            if like.post_id != item.id {
                return false;
            }
            item.likes.insert(like.clone())
        }
        Change::Updated(_) => false,
        Change::Deleted(deleted) => {
            let removed = match deleted.user_id.as_deref() {
                Some(user_id) => item.likes.remove_user(user_id),
                None => item.likes.remove_like(&deleted.id),
            };
            removed.is_some()
        }
    }
}

/// Deletes only reach this function once the caller has matched the
/// deleted comment to this item; the count never drops below zero.
pub fn apply_comment(item: &mut FeedItem, event: &CommentEvent) -> bool {
    match event {
        Change::Inserted(_) => {
            item.comment_count = item.comment_count.saturating_add(1);
            true
        }
        Change::Updated(_) => false,
        Change::Deleted(_) => {
            if item.comment_count == 0 {
                return false;
            }
            item.comment_count -= 1;
            true
        }
    }
}

pub fn apply_post_fields(item: &mut FeedItem, event: &PostEvent) -> bool {
    let Change::Updated(row) = event else {
        return false;
    };
    if row.id != item.id {
        return false;
    }
    let changed = item.body != row.body || item.file != row.file;
    item.body = row.body.clone();
    item.file = row.file.clone();
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::DeletedRow;
    use crate::models::{AuthorSummary, CommentRow, LikeRecord, PostRow};
    use chrono::{TimeZone, Utc};

    fn item() -> FeedItem {
        FeedItem::from_row(
            PostRow {
                id: "p1".into(),
                user_id: "owner".into(),
                body: "first".into(),
                file: None,
                created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            },
            AuthorSummary::placeholder("owner"),
        )
    }

    fn like(id: &str, user: &str) -> LikeEvent {
        Change::Inserted(LikeRecord {
            id: Some(id.into()),
            post_id: "p1".into(),
            user_id: user.into(),
            created_at: None,
        })
    }

    fn unlike(user: &str) -> LikeEvent {
        Change::Deleted(DeletedRow {
            id: format!("gone-{user}"),
            post_id: Some("p1".into()),
            user_id: Some(user.into()),
        })
    }

    fn comment(id: &str) -> CommentEvent {
        Change::Inserted(CommentRow {
            id: id.into(),
            post_id: "p1".into(),
            user_id: "u9".into(),
            text: "nice".into(),
            created_at: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
        })
    }

    #[test]
    fn like_set_reflects_latest_event_per_user() {
        let mut item = item();
        let events = [
            like("l1", "a"),
            like("l2", "b"),
            unlike("a"),
            like("l3", "c"),
            like("l4", "a"),
            unlike("b"),
            like("l5", "c"),
        ];
        for event in &events {
            apply_like(&mut item, event);
        }
        let users: Vec<_> = item.likes.user_ids().collect();
        assert_eq!(users, vec!["a", "c"]);
    }

    #[test]
    fn duplicate_like_insert_is_a_no_op() {
        let mut item = item();
        assert!(apply_like(&mut item, &like("l1", "u")));
        assert!(!apply_like(&mut item, &like("l1", "u")));
        assert_eq!(item.likes.len(), 1);
    }

    #[test]
    fn like_delete_without_user_falls_back_to_like_id() {
        let mut item = item();
        apply_like(&mut item, &like("l1", "u"));
        let event = Change::Deleted(DeletedRow::id_only("l1"));
        assert!(apply_like(&mut item, &event));
        assert!(item.likes.is_empty());
    }

    #[test]
    fn like_for_another_post_is_ignored() {
        let mut item = item();
        let event = Change::Inserted(LikeRecord {
            id: Some("l1".into()),
            post_id: "p2".into(),
            user_id: "u".into(),
            created_at: None,
        });
        assert!(!apply_like(&mut item, &event));
    }

    #[test]
    fn comment_count_tracks_inserts_and_saturates() {
        let mut item = item();
        item.comment_count = 2;
        for n in 0..5 {
            apply_comment(&mut item, &comment(&format!("c{n}")));
        }
        assert_eq!(item.comment_count, 7);

        item.comment_count = 0;
        assert!(!apply_comment(&mut item, &Change::Deleted(DeletedRow::id_only("c1"))));
        assert_eq!(item.comment_count, 0);
    }

    #[test]
    fn post_update_touches_only_presentation_fields() {
        let mut item = item();
        let original_created = item.created_at;
        let event = Change::Updated(PostRow {
            id: "p1".into(),
            user_id: "someone-else".into(),
            body: "edited".into(),
            file: Some("postImages/a.png".into()),
            created_at: Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap(),
        });
        assert!(apply_post_fields(&mut item, &event));
        assert_eq!(item.body, "edited");
        assert_eq!(item.file.as_deref(), Some("postImages/a.png"));
        assert_eq!(item.user_id, "owner");
        assert_eq!(item.created_at, original_created);
        assert!(!apply_post_fields(&mut item, &event));
    }
}
