//! SurrealDB schema migrations and initialization
//!
//! Sets up the `checkpoints` table with its uniqueness constraint and
//! lookup indexes. Safe to call on every connection.

use crate::Result;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

/// Initialize all Draftsman tables in SurrealDB (idempotent).
pub async fn init_schema(db: &Surreal<Any>) -> Result<()> {
    info!("Initializing draftsman SurrealDB schema");
    init_checkpoints_table(db).await?;
    info!("draftsman schema initialization complete");
    Ok(())
}

/// Initialize `checkpoints` table with constraints and indexes
///
/// Schema:
/// ```text
/// TABLE checkpoints {
///   run_id:      STRING (indexed)
///   seq:         INT    (1-based, monotonic within run)
///   label:       STRING
///   digest:      STRING (sha-256 of state_json)
///   state_json:  STRING
///   created_at:  STRING (RFC 3339)
/// }
/// ```
///
/// Constraints:
/// - `(run_id, seq)` is unique, so two writers cannot both append seq N.
/// - Rows are never updated; deletion happens only through explicit run deletion.
async fn init_checkpoints_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing checkpoints table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS checkpoints AS
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR read FULL
                FOR update NONE
                FOR delete FULL;

        DEFINE INDEX IF NOT EXISTS idx_run_id_seq ON TABLE checkpoints COLUMNS run_id, seq UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_run_id ON TABLE checkpoints COLUMNS run_id;
        DEFINE INDEX IF NOT EXISTS idx_created_at ON TABLE checkpoints COLUMNS created_at;
    "#;

    db.query(sql).await?;
    info!("checkpoints table initialized");
    Ok(())
}
