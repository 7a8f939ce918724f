use crate::backend::Backend;
use crate::counters;
use crate::error::Result;
use crate::events::{Change, CommentEvent, LikeEvent, PostEvent};
use crate::models::FeedItem;

/// Handed out by [`FeedPage::begin_load`]; must be returned to
/// [`FeedPage::finish_load`] or [`FeedPage::abandon_load`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTicket {
    pub limit: usize,
    pub kind: LoadKind,
    generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadKind {
    /// Grow the window to a larger cumulative size.
    Grow,
    /// Re-fetch the current window without touching `exhausted`.
    Refresh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The held sequence was replaced with the response.
    Replaced { added: usize },
    /// The page will not grow any further this session.
    Exhausted,
    /// The ticket no longer matches the outstanding load.
    Stale,
}

/// Live mutations applied while a load is outstanding, replayed onto the
/// response so they survive the replacement.
#[derive(Debug, Clone)]
enum Replay {
    Prepended(String),
    Removed(String),
    Like { post_id: String, event: LikeEvent },
    Fields(PostEvent),
    Comment { post_id: String },
}

/// Newest-first window over the feed, grown by re-fetching from offset 0.
#[derive(Debug, Clone, Default)]
pub struct FeedPage {
    items: Vec<FeedItem>,
    limit: usize,
    exhausted: bool,
    author_filter: Option<String>,
    generation: u64,
    in_flight: Option<u64>,
    journal: Vec<Replay>,
}

impl FeedPage {
    pub fn new(author_filter: Option<String>) -> Self {
        Self {
            author_filter,
            ..Self::default()
        }
    }

    pub fn items(&self) -> &[FeedItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn author_filter(&self) -> Option<&str> {
        self.author_filter.as_deref()
    }

    pub fn get(&self, id: &str) -> Option<&FeedItem> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Fetches the window sized to `page_size` and folds it in.
    pub async fn load(&mut self, backend: &dyn Backend, page_size: usize) -> Result<&[FeedItem]> {
        let Some(ticket) = self.begin_load(page_size) else {
            return Ok(&self.items);
        };
        match backend
            .fetch_page(ticket.limit, self.author_filter.as_deref())
            .await
        {
            Ok(rows) => {
                self.finish_load(&ticket, rows);
                Ok(&self.items)
            }
            Err(err) => {
                self.abandon_load(&ticket);
                Err(err)
            }
        }
    }

    /// Starts growing the window. Returns `None` once exhausted.
    pub fn begin_load(&mut self, page_size: usize) -> Option<LoadTicket> {
        if self.exhausted {
            return None;
        }
        Some(self.open_ticket(page_size.max(self.limit), LoadKind::Grow))
    }

    /// Starts re-fetching the current window.
    pub fn begin_refresh(&mut self) -> LoadTicket {
        self.open_ticket(self.limit.max(self.items.len()), LoadKind::Refresh)
    }

    fn open_ticket(&mut self, limit: usize, kind: LoadKind) -> LoadTicket {
        self.generation += 1;
        self.in_flight = Some(self.generation);
        self.journal.clear();
        LoadTicket {
            limit,
            kind,
            generation: self.generation,
        }
    }

    pub fn finish_load(&mut self, ticket: &LoadTicket, mut rows: Vec<FeedItem>) -> LoadOutcome {
        if self.in_flight != Some(ticket.generation) {
            return LoadOutcome::Stale;
        }
        self.in_flight = None;
        let journal = std::mem::take(&mut self.journal);
        self.limit = self.limit.max(ticket.limit);

        let previous = self.items.len();
        if ticket.kind == LoadKind::Grow && rows.len() == previous {
            self.exhausted = true;
            return LoadOutcome::Exhausted;
        }

        let short = rows.len() < ticket.limit;
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.dedup_by(|a, b| a.id == b.id);
        let held = std::mem::replace(&mut self.items, rows);
        for entry in journal {
            self.replay(entry, &held);
        }

        if ticket.kind == LoadKind::Grow && short {
            self.exhausted = true;
            return LoadOutcome::Exhausted;
        }
        LoadOutcome::Replaced {
            added: self.items.len().saturating_sub(previous),
        }
    }

    /// Drops an outstanding load after a failed fetch; held items stay as they are.
    pub fn abandon_load(&mut self, ticket: &LoadTicket) {
        if self.in_flight == Some(ticket.generation) {
            self.in_flight = None;
            self.journal.clear();
        }
    }

    /// `held` is the window as it stood when the response arrived, with every
    /// live mutation already applied.
    fn replay(&mut self, entry: Replay, held: &[FeedItem]) {
        match entry {
            Replay::Prepended(id) => {
                if self.contains(&id) {
                    return;
                }
                if let Some(item) = held.iter().find(|item| item.id == id) {
                    self.items.insert(0, item.clone());
                }
            }
            Replay::Removed(id) => {
                self.items.retain(|item| item.id != id);
            }
            Replay::Like { post_id, event } => {
                self.update_where(&post_id, |item| counters::apply_like(item, &event));
            }
            Replay::Fields(event) => {
                if let Change::Updated(row) = &event {
                    let id = row.id.clone();
                    self.update_where(&id, |item| counters::apply_post_fields(item, &event));
                }
            }
            // Rows carry no comment ids, so a response count may or may not
            // include a live comment. The held count saw every one of them.
            Replay::Comment { post_id } => {
                if let Some(count) = held
                    .iter()
                    .find(|item| item.id == post_id)
                    .map(|item| item.comment_count)
                {
                    self.update_where(&post_id, |item| item.comment_count = count);
                }
            }
        }
    }

    fn record(&mut self, entry: Replay) {
        if self.in_flight.is_some() {
            self.journal.push(entry);
        }
    }

    /// Puts a stream-inserted item at the head, ahead of everything held.
    pub fn prepend(&mut self, item: FeedItem) {
        self.items.retain(|held| held.id != item.id);
        self.record(Replay::Prepended(item.id.clone()));
        self.items.insert(0, item);
    }

    pub fn remove(&mut self, id: &str) -> Option<FeedItem> {
        self.record(Replay::Removed(id.to_string()));
        let index = self.items.iter().position(|item| item.id == id)?;
        Some(self.items.remove(index))
    }

    /// Runs `mutator` against the current state of the item, if held.
    pub fn update_where<R>(&mut self, id: &str, mutator: impl FnOnce(&mut FeedItem) -> R) -> Option<R> {
        self.items.iter_mut().find(|item| item.id == id).map(mutator)
    }

    pub fn apply_like(&mut self, post_id: &str, event: &LikeEvent) -> bool {
        self.record(Replay::Like {
            post_id: post_id.to_string(),
            event: event.clone(),
        });
        self.update_where(post_id, |item| counters::apply_like(item, event))
            .unwrap_or(false)
    }

    pub fn apply_comment(&mut self, post_id: &str, event: &CommentEvent) -> bool {
        self.record(Replay::Comment {
            post_id: post_id.to_string(),
        });
        self.update_where(post_id, |item| counters::apply_comment(item, event))
            .unwrap_or(false)
    }

    pub fn apply_post_fields(&mut self, event: &PostEvent) -> bool {
        let Change::Updated(row) = event else {
            return false;
        };
        let id = row.id.clone();
        self.record(Replay::Fields(event.clone()));
        self.update_where(&id, |item| counters::apply_post_fields(item, event))
            .unwrap_or(false)
    }
}
