use crate::backend::LocalBackend;
use anyhow::Result;
use linkup_feed::{AuthorSummary, Backend, NewComment, PostFields};

const NAMES: &[&str] = &[
    "Ada", "Grace", "Linus", "Barbara", "Ken", "Margaret", "Dennis", "Radia",
];

const BODIES: &[&str] = &[
    "Shipping the new release today.",
    "Anyone up for a code review?",
    "Coffee first, then compilers.",
    "Finally fixed that flaky test.",
    "Reading about CRDTs this weekend.",
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub users: usize,
    pub posts: usize,
    pub likes: usize,
    pub comments: usize,
}

/// Fills the store with deterministic demo content. Writes go through the
/// backend, so any open feed sees them arrive.
pub async fn seed(backend: &LocalBackend, users: usize, posts: usize) -> Result<SeedSummary> {
    let users = users.max(1);
    let mut authors: Vec<AuthorSummary> = Vec::with_capacity(users);
    for n in 0..users {
        let base = NAMES[n % NAMES.len()];
        let name = if n < NAMES.len() {
            base.to_string()
        } else {
            format!("{base} {}", n / NAMES.len() + 1)
        };
        authors.push(backend.create_user(&name, None)?);
    }

    let mut summary = SeedSummary {
        users: authors.len(),
        ..SeedSummary::default()
    };
    for i in 0..posts {
        let owner = &authors[i % authors.len()];
        let row = backend
            .create_or_update_post(PostFields {
                id: None,
                user_id: owner.id.clone(),
                body: format!("{} (#{})", BODIES[i % BODIES.len()], i + 1),
                file: None,
            })
            .await?;
        summary.posts += 1;

        for (j, liker) in authors.iter().enumerate() {
            if (i + j) % 3 == 0 {
                backend.create_like(&row.id, &liker.id).await?;
                summary.likes += 1;
            }
        }

        if i % 4 == 0 {
            let commenter = &authors[(i + 1) % authors.len()];
            backend
                .create_comment(NewComment {
                    post_id: row.id.clone(),
                    user_id: commenter.id.clone(),
                    text: format!("Nice one, {}!", owner.name),
                })
                .await?;
            summary.comments += 1;
        }
    }

    tracing::info!(
        users = summary.users,
        posts = summary.posts,
        likes = summary.likes,
        comments = summary.comments,
        "seeded demo content"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn seeds_a_predictable_data_set() {
        let backend = LocalBackend::in_memory().expect("backend");
        let summary = seed(&backend, 3, 6).await.expect("seed");
        assert_eq!(
            summary,
            SeedSummary {
                users: 3,
                posts: 6,
                likes: 6,
                comments: 2,
            }
        );
        let page = backend.fetch_page(10, None).await.expect("page");
        assert_eq!(page.len(), 6);
        let likes: usize = page.iter().map(|item| item.likes.len()).sum();
        assert_eq!(likes, 6);
        let comments: u32 = page.iter().map(|item| item.comment_count).sum();
        assert_eq!(comments, 2);
    }
}
