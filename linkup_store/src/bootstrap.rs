use crate::backend::LocalBackend;
use crate::config::StoreConfig;
use crate::database::Database;
use crate::realtime::ChangeHub;
use anyhow::Result;
use std::fs;

pub struct BootstrapResources {
    pub directories_created: Vec<String>,
    pub database_initialized: bool,
    pub backend: LocalBackend,
}

/// Creates the data directory, opens and migrates the database, and wires
/// the backend to a fresh change hub.
pub fn initialize(config: &StoreConfig) -> Result<BootstrapResources> {
    let mut directories_created = Vec::new();
    create_dir_if_missing(&config.paths.data_dir, &mut directories_created)?;

    let database = Database::connect(&config.paths)?;
    let database_initialized = database.ensure_migrations()?;
    let backend = LocalBackend::new(database, ChangeHub::new(config.change_buffer));

    tracing::info!(
        db_path = %config.paths.db_path.display(),
        database_initialized,
        "store ready"
    );
    Ok(BootstrapResources {
        directories_created,
        database_initialized,
        backend,
    })
}

fn create_dir_if_missing(path: &std::path::Path, created: &mut Vec<String>) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)?;
        created.push(path.display().to_string());
    }
    Ok(())
}
