//! Realtime reconciliation for the LinkUp social feed.
//!
//! A [`FeedEngine`] keeps a newest-first window of posts consistent with a
//! hosted backend: it loads pages by re-fetching a growing window and folds
//! live change events (posts, comments, likes) into the held items. A
//! [`DetailReconciler`] does the same for one post and its comments, and a
//! [`NotificationInbox`] for a user's notifications.

pub mod backend;
pub mod config;
pub mod counters;
pub mod detail;
pub mod engine;
pub mod error;
pub mod events;
pub mod index;
pub mod models;
pub mod notifications;
pub mod page;
pub mod subscription;
mod worker;

pub use backend::Backend;
pub use config::FeedConfig;
pub use detail::{DetailReconciler, DetailSnapshot};
pub use engine::{FeedEngine, FeedOptions, FeedSnapshot, LoadTrigger};
pub use error::{FeedError, Result};
pub use events::{
    Change, ChangeKind, CommentEvent, DeletedRow, EventFilter, LikeEvent, NotificationEvent,
    PostEvent, RawChange, SubscriptionRequest, Topic, TopicRow,
};
pub use models::{
    AuthorSummary, CommentItem, CommentRow, FeedItem, LikeRecord, LikeSet, NewComment,
    NewNotification, NotificationItem, NotificationRow, PostDetails, PostFields, PostRow,
};
pub use notifications::{InboxSnapshot, NotificationInbox};
pub use page::{FeedPage, LoadKind, LoadOutcome, LoadTicket};
pub use subscription::{Subscription, TypedSubscription};
