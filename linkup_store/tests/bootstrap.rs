use linkup_feed::{Backend, PostFields};
use linkup_store::bootstrap;
use linkup_store::config::{StoreConfig, StorePaths};
use tempfile::tempdir;

#[tokio::test]
async fn store_survives_a_reopen() {
    let dir = tempdir().expect("tempdir");
    let config = StoreConfig::new(StorePaths::from_base_dir(dir.path()).expect("paths"));

    let first = bootstrap::initialize(&config).expect("first open");
    assert!(first.database_initialized);
    assert_eq!(first.directories_created.len(), 1);
    let ada = first.backend.create_user("Ada", None).expect("user");
    first
        .backend
        .create_or_update_post(PostFields {
            id: None,
            user_id: ada.id.clone(),
            body: "persisted".into(),
            file: None,
        })
        .await
        .expect("post");
    drop(first);

    let second = bootstrap::initialize(&config).expect("second open");
    assert!(!second.database_initialized);
    assert!(second.directories_created.is_empty());
    let page = second.backend.fetch_page(10, None).await.expect("page");
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].body, "persisted");
    assert_eq!(page[0].author.name, "Ada");
}
