//! Ordered schema migrations, dispatched by [`super::schema_manager`].
//! Each step runs inside its own transaction; `migrate` stops at the first
//! failure rather than attempting partial forward progress, matching the
//! teacher's `migrations::migrate(pool, from, to)` loop.

use super::{Db, DbError};

pub fn migrate(db: &Db, from: i64, to: i64) -> Result<(), DbError> {
    let mut version = from;
    while version < to {
        let next = version + 1;
        tracing::info!(from = version, to = next, "applying schema migration");
        run_migration(db, version, next)?;
        db.set_schema_version(next)?;
        version = next;
    }
    Ok(())
}

fn run_migration(db: &Db, from: i64, to: i64) -> Result<(), DbError> {
    match (from, to) {
        // Databases created before schema_version tracking existed already
        // have the full current table set (create_schema always writes every
        // table); this step only needs to backfill the metadata row.
        (0, 1) => Ok(()),
        _ => {
            let _ = db;
            Err(DbError::Corruption(format!(
                "no migration path from schema version {from} to {to}"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;

    #[test]
    fn migrate_zero_to_one_is_a_noop_that_bumps_version() {
        let db = Db::open_in_memory().unwrap();
        db.init_schema().unwrap();
        migrate(&db, 0, 1).unwrap();
        assert_eq!(db.schema_version().unwrap(), 1);
    }

    #[test]
    fn migrate_rejects_unknown_path() {
        let db = Db::open_in_memory().unwrap();
        db.init_schema().unwrap();
        let err = migrate(&db, 5, 6).unwrap_err();
        assert!(matches!(err, DbError::Corruption(_)));
    }
}
