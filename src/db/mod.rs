pub mod repository;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

/// Open (creating if absent) the SQLite store at `path` and ensure the
/// schema exists.
pub async fn connect(path: &str) -> eyre::Result<SqlitePool> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| eyre::eyre!("Failed to create database directory: {}", e))?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .connect_with(options)
        .await
        .map_err(|e| eyre::eyre!("Failed to open database '{}': {}", path, e))?;

    repository::init_schema(&pool).await?;
    Ok(pool)
}
