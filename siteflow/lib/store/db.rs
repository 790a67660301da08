use std::path::Path;

use sqlx::{migrate::Migrator, sqlite::SqlitePoolOptions, Pool, Sqlite};
use tokio::fs;

use crate::SiteflowResult;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The migrator covering the audit log and backup run tables.
pub static MIGRATOR: Migrator = sqlx::migrate!("lib/store/migrations");

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Opens (creating if needed) the siteflow database and runs migrations.
pub async fn init_db(db_path: &Path) -> SiteflowResult<Pool<Sqlite>> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&format!("sqlite://{}?mode=rwc", db_path.display()))
        .await?;

    MIGRATOR.run(&pool).await?;
    Ok(pool)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
