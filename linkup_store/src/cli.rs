use crate::backend::LocalBackend;
use crate::utils::short_id;
use anyhow::{anyhow, Result};
use linkup_feed::{
    AuthorSummary, Backend, DetailReconciler, FeedConfig, FeedEngine, FeedItem, FeedOptions,
    LoadOutcome, LoadTrigger, NotificationInbox, PostFields,
};
use std::io::{self, Write};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Run the interactive CLI: a live home feed for one user, with a post
/// detail view and the user's notifications alongside it.
pub async fn run_cli(backend: LocalBackend, config: FeedConfig, user: Option<String>) -> Result<()> {
    let backend = Arc::new(backend);
    let viewer = pick_user(&backend, user.as_deref())?;
    let mut session = CliSession::start(backend, config, viewer).await?;

    println!("LinkUp CLI ready. Type 'help' for a list of commands.");
    println!("Signed in as {} ({})", session.viewer.name, short_id(&session.viewer.id));

    let stdin = tokio::io::stdin();
    let mut reader = BufReader::new(stdin);

    loop {
        print!("linkup> ");
        io::stdout().flush()?;

        let mut line = String::new();
        let read = reader.read_line(&mut line).await?;
        if read == 0 {
            println!("Exiting");
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let tokens = match shell_words::split(trimmed) {
            Ok(tokens) if !tokens.is_empty() => tokens,
            Ok(_) => continue,
            Err(err) => {
                println!("Unable to parse command: {err}");
                continue;
            }
        };

        match session.handle_command(&tokens).await {
            Ok(LoopAction::Continue) => {}
            Ok(LoopAction::Exit) => break,
            Err(err) => {
                println!("Error: {err:#}");
            }
        }
    }

    session.shutdown().await;
    Ok(())
}

/// `user` may be an id, an id prefix or a display name. Without one the
/// first known user is used, and an empty store gets a fresh account.
fn pick_user(backend: &LocalBackend, user: Option<&str>) -> Result<AuthorSummary> {
    let users = backend.list_users()?;
    match user {
        Some(wanted) => users
            .into_iter()
            .find(|candidate| {
                candidate.id.starts_with(wanted) || candidate.name.eq_ignore_ascii_case(wanted)
            })
            .ok_or_else(|| anyhow!("no user matches '{wanted}'")),
        None => match users.into_iter().next() {
            Some(first) => Ok(first),
            None => backend.create_user("me", None),
        },
    }
}

struct CliSession {
    backend: Arc<LocalBackend>,
    config: FeedConfig,
    viewer: AuthorSummary,
    engine: FeedEngine,
    detail: Option<DetailReconciler>,
    inbox: NotificationInbox,
}

enum LoopAction {
    Continue,
    Exit,
}

impl CliSession {
    async fn start(
        backend: Arc<LocalBackend>,
        config: FeedConfig,
        viewer: AuthorSummary,
    ) -> Result<Self> {
        let shared: Arc<dyn Backend> = backend.clone();
        let engine = FeedEngine::start(
            shared.clone(),
            config.clone(),
            FeedOptions::home(viewer.id.clone()),
        )
        .await?;
        let inbox = NotificationInbox::open(shared, config.clone(), viewer.id.clone()).await?;
        engine.ready().await?;
        Ok(Self {
            backend,
            config,
            viewer,
            engine,
            detail: None,
            inbox,
        })
    }

    async fn shutdown(self) {
        if let Some(detail) = self.detail {
            detail.shutdown().await;
        }
        self.inbox.shutdown().await;
        self.engine.shutdown().await;
    }

    async fn handle_command(&mut self, tokens: &[String]) -> Result<LoopAction> {
        let command = tokens[0].as_str();
        match command {
            "help" => {
                self.print_help();
                Ok(LoopAction::Continue)
            }
            "feed" | "ls" => {
                let limit = tokens.get(1).and_then(|v| v.parse::<usize>().ok());
                self.print_feed(limit);
                Ok(LoopAction::Continue)
            }
            "more" => {
                let trigger = self.engine.request_more().await?;
                self.report_load(trigger).await?;
                Ok(LoopAction::Continue)
            }
            "refresh" => {
                let trigger = self.engine.refresh().await?;
                self.report_load(trigger).await?;
                Ok(LoopAction::Continue)
            }
            "post" => {
                if tokens.len() < 2 {
                    println!("Usage: post \"message\"");
                    return Ok(LoopAction::Continue);
                }
                let row = self
                    .engine
                    .publish_post(PostFields {
                        id: None,
                        user_id: self.viewer.id.clone(),
                        body: tokens[1..].join(" "),
                        file: None,
                    })
                    .await?;
                println!("Posted {}", short_id(&row.id));
                Ok(LoopAction::Continue)
            }
            "edit" => {
                if tokens.len() < 3 {
                    println!("Usage: edit <post> \"new message\"");
                    return Ok(LoopAction::Continue);
                }
                let post_id = self.resolve_post(&tokens[1])?;
                let file = self
                    .engine
                    .snapshot()
                    .get(&post_id)
                    .and_then(|item| item.file.clone());
                self.engine
                    .publish_post(PostFields {
                        id: Some(post_id.clone()),
                        user_id: self.viewer.id.clone(),
                        body: tokens[2..].join(" "),
                        file,
                    })
                    .await?;
                println!("Edited {}", short_id(&post_id));
                Ok(LoopAction::Continue)
            }
            "delete" | "rm" => {
                if tokens.len() < 2 {
                    println!("Usage: delete <post>");
                    return Ok(LoopAction::Continue);
                }
                let post_id = self.resolve_post(&tokens[1])?;
                self.engine.delete_post(&post_id).await?;
                if self.detail.as_ref().map(|detail| detail.post_id()) == Some(post_id.as_str()) {
                    self.close_detail().await;
                }
                println!("Deleted {}", short_id(&post_id));
                Ok(LoopAction::Continue)
            }
            "like" => {
                if tokens.len() < 2 {
                    println!("Usage: like <post>");
                    return Ok(LoopAction::Continue);
                }
                let post_id = self.resolve_post(&tokens[1])?;
                let liked = self.engine.toggle_like(&post_id).await?;
                let verb = if liked { "Liked" } else { "Unliked" };
                println!("{verb} {}", short_id(&post_id));
                Ok(LoopAction::Continue)
            }
            "open" | "view" => {
                if tokens.len() < 2 {
                    println!("Usage: open <post>");
                    return Ok(LoopAction::Continue);
                }
                let post_id = self.resolve_post(&tokens[1])?;
                self.open_detail(post_id).await?;
                Ok(LoopAction::Continue)
            }
            "show" => {
                self.print_detail()?;
                Ok(LoopAction::Continue)
            }
            "comment" => {
                if tokens.len() < 2 {
                    println!("Usage: comment \"message\"");
                    return Ok(LoopAction::Continue);
                }
                let detail = self.open_post()?;
                let comment = detail.submit_comment(&tokens[1..].join(" ")).await?;
                println!("Commented {}", short_id(&comment.id));
                Ok(LoopAction::Continue)
            }
            "uncomment" => {
                if tokens.len() < 2 {
                    println!("Usage: uncomment <comment>");
                    return Ok(LoopAction::Continue);
                }
                let comment_id = self.resolve_comment(&tokens[1])?;
                if self.open_post()?.remove_comment(&comment_id).await? {
                    println!("Removed comment {}", short_id(&comment_id));
                } else {
                    println!("Comment {} is already gone", short_id(&comment_id));
                }
                Ok(LoopAction::Continue)
            }
            "close" => {
                self.close_detail().await;
                Ok(LoopAction::Continue)
            }
            "notifications" | "inbox" => {
                self.print_notifications().await?;
                Ok(LoopAction::Continue)
            }
            "users" => {
                for user in self.backend.list_users()? {
                    let marker = if user.id == self.viewer.id { " (you)" } else { "" };
                    println!("  [{}] {}{}", short_id(&user.id), user.name, marker);
                }
                Ok(LoopAction::Continue)
            }
            "act-as" | "login" => {
                if tokens.len() < 2 {
                    println!("Usage: act-as <user>");
                    return Ok(LoopAction::Continue);
                }
                self.switch_user(&tokens[1]).await?;
                Ok(LoopAction::Continue)
            }
            "quit" | "exit" => Ok(LoopAction::Exit),
            "clear" => {
                print!("\x1B[2J\x1B[1;1H");
                Ok(LoopAction::Continue)
            }
            other => {
                println!("Unknown command '{other}'. Type 'help' for a list of commands.");
                Ok(LoopAction::Continue)
            }
        }
    }

    fn print_help(&self) {
        println!("Available commands:");
        println!("  help                 Show this help message");
        println!("  feed [N]             Show the held feed window (or its first N posts)");
        println!("  more                 Grow the feed window by one page");
        println!("  refresh              Re-fetch the current window");
        println!("  post MSG             Publish a post");
        println!("  edit <post> MSG      Rewrite one of your posts");
        println!("  delete <post>        Delete one of your posts");
        println!("  like <post>          Like or unlike a post");
        println!("  open <post>          Open a post with its comments");
        println!("  show                 Show the open post again");
        println!("  comment MSG          Comment on the open post");
        println!("  uncomment <comment>  Remove a comment from the open post");
        println!("  close                Close the open post");
        println!("  notifications        List your notifications");
        println!("  users                List known users");
        println!("  act-as <user>        Switch to another user");
        println!("  clear                Clear the screen");
        println!("  exit                 Quit the CLI");
        println!("Posts and comments may be referred to by any unique id prefix.");
    }

    fn print_feed(&self, limit: Option<usize>) {
        let snapshot = self.engine.snapshot();
        if let Some(err) = &snapshot.last_error {
            println!("(last load failed: {err})");
        }
        if snapshot.items.is_empty() {
            println!("No posts yet. Use 'post' to write one.");
            return;
        }
        let shown = limit.unwrap_or(snapshot.items.len());
        for item in snapshot.items.iter().take(shown) {
            self.print_item(item);
        }
        let tail = if snapshot.exhausted {
            "end of feed"
        } else {
            "type 'more' for older posts"
        };
        println!(
            "-- {} of {} posts, {tail}",
            shown.min(snapshot.items.len()),
            snapshot.items.len()
        );
    }

    fn print_item(&self, item: &FeedItem) {
        let liked = if item.liked_by(&self.viewer.id) { "*" } else { " " };
        let name = if item.author.is_placeholder() {
            short_id(&item.user_id)
        } else {
            item.author.name.as_str()
        };
        println!(
            "{liked}[{}] {name} @ {}: {}",
            short_id(&item.id),
            item.created_at.format("%Y-%m-%d %H:%M"),
            item.body
        );
        if let Some(file) = &item.file {
            println!("     attachment: {file}");
        }
        println!(
            "     likes: {}  comments: {}",
            item.likes.len(),
            item.comment_count
        );
    }

    async fn report_load(&self, trigger: LoadTrigger) -> Result<()> {
        match trigger {
            LoadTrigger::Coalesced => println!("A load is already running."),
            LoadTrigger::Exhausted | LoadTrigger::Loaded(LoadOutcome::Exhausted) => {
                println!("No older posts.")
            }
            LoadTrigger::Loaded(LoadOutcome::Replaced { added }) => {
                println!("Loaded {added} more posts.")
            }
            LoadTrigger::Loaded(LoadOutcome::Stale) => {}
        }
        let snapshot = self.engine.ready().await?;
        if let Some(err) = snapshot.last_error {
            println!("Load failed: {err}");
        }
        Ok(())
    }

    fn resolve_post(&self, prefix: &str) -> Result<String> {
        let snapshot = self.engine.snapshot();
        let mut matches = snapshot
            .items
            .iter()
            .filter(|item| item.id.starts_with(prefix))
            .map(|item| item.id.clone());
        match (matches.next(), matches.next()) {
            (Some(id), None) => Ok(id),
            (Some(_), Some(_)) => Err(anyhow!("'{prefix}' matches more than one post")),
            (None, _) => Err(anyhow!("no post in the feed matches '{prefix}'")),
        }
    }

    fn resolve_comment(&self, prefix: &str) -> Result<String> {
        let snapshot = self.open_post()?.snapshot();
        let mut matches = snapshot
            .comments
            .iter()
            .filter(|comment| comment.id.starts_with(prefix))
            .map(|comment| comment.id.clone());
        match (matches.next(), matches.next()) {
            (Some(id), None) => Ok(id),
            (Some(_), Some(_)) => Err(anyhow!("'{prefix}' matches more than one comment")),
            (None, _) => Err(anyhow!("no comment matches '{prefix}'")),
        }
    }

    fn open_post(&self) -> Result<&DetailReconciler> {
        self.detail
            .as_ref()
            .ok_or_else(|| anyhow!("no post is open; use 'open <post>' first"))
    }

    async fn open_detail(&mut self, post_id: String) -> Result<()> {
        self.close_detail().await;
        let shared: Arc<dyn Backend> = self.backend.clone();
        let detail =
            DetailReconciler::open(shared, self.config.clone(), post_id, self.viewer.id.clone())
                .await?;
        detail.ready().await?;
        self.detail = Some(detail);
        self.print_detail()
    }

    async fn close_detail(&mut self) {
        if let Some(detail) = self.detail.take() {
            detail.shutdown().await;
        }
    }

    fn print_detail(&self) -> Result<()> {
        let detail = self.open_post()?;
        let snapshot = detail.snapshot();
        let Some(post) = &snapshot.post else {
            println!("Post {} is not available", short_id(detail.post_id()));
            return Ok(());
        };
        self.print_item(post);
        if snapshot.comments.is_empty() {
            println!("     (no comments yet)");
        }
        for comment in &snapshot.comments {
            let marker = if detail.can_delete(comment) { "x" } else { " " };
            println!(
                "   {marker}[{}] {}: {}",
                short_id(&comment.id),
                comment.author.name,
                comment.text
            );
        }
        Ok(())
    }

    async fn print_notifications(&self) -> Result<()> {
        let snapshot = self.inbox.ready().await?;
        if snapshot.items.is_empty() {
            println!("No notifications.");
            return Ok(());
        }
        println!("Notifications ({} new):", snapshot.unread);
        for item in &snapshot.items {
            let sender = item
                .sender
                .as_ref()
                .map(|sender| sender.name.clone())
                .unwrap_or_else(|| short_id(&item.sender_id).to_string());
            let post = item.post_id().map(short_id).unwrap_or("-");
            println!(
                "  {} {} {} [{post}]",
                item.created_at.format("%Y-%m-%d %H:%M"),
                sender,
                item.title
            );
        }
        self.inbox.mark_seen().await?;
        Ok(())
    }

    async fn switch_user(&mut self, wanted: &str) -> Result<()> {
        let viewer = pick_user(&self.backend, Some(wanted))?;
        let next = CliSession::start(self.backend.clone(), self.config.clone(), viewer).await?;
        let previous = std::mem::replace(self, next);
        previous.shutdown().await;
        println!("Signed in as {} ({})", self.viewer.name, short_id(&self.viewer.id));
        Ok(())
    }
}
