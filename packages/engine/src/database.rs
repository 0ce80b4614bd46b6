use std::time::Duration;

use sea_orm::sea_query::{
    Index, IndexCreateStatement, PostgresQueryBuilder, SqliteQueryBuilder, TableCreateStatement,
};
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbBackend, DbErr, Schema,
};
use tracing::{info, warn};

use crate::entity::{asset, derivative};

/// Name of the unique index backing the one-row-per-(asset, key) rule.
pub const DERIVATIVE_KEY_INDEX: &str = "idx_derivative_asset_key";

pub async fn init_db(db_url: &str, max_connections: u32) -> Result<DatabaseConnection, DbErr> {
    let mut opt = ConnectOptions::new(db_url.to_owned());

    opt.max_connections(pool_size(db_url, max_connections))
        .min_connections(1)
        .connect_timeout(Duration::from_secs(8))
        .acquire_timeout(Duration::from_secs(30))
        .sqlx_logging(false);

    let db = Database::connect(opt).await?;
    ensure_schema(&db).await?;

    Ok(db)
}

/// SQLite ignores `FOR UPDATE`, and a second pooled connection would fail
/// with `SQLITE_BUSY` instead of waiting for the guard. Writers there share
/// one connection, which serializes them the way the asset lock does on
/// Postgres.
fn pool_size(db_url: &str, requested: u32) -> u32 {
    if db_url.starts_with("sqlite:") && requested > 1 {
        warn!(requested, "SQLite database, limiting pool to one connection");
        return 1;
    }
    requested
}

/// Create the asset and derivative tables if they don't exist yet.
pub async fn ensure_schema(db: &DatabaseConnection) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    let mut tables = [
        schema.create_table_from_entity(asset::Entity),
        schema.create_table_from_entity(derivative::Entity),
    ];
    for table in tables.iter_mut() {
        table.if_not_exists();
        db.execute_unprepared(&table_sql(backend, table)).await?;
    }

    ensure_indexes(db).await
}

/// Ensure required database indexes exist.
///
/// The `(asset_id, key)` unique index is what keeps concurrent writers from
/// creating duplicate derivatives, so failing to create it is fatal.
pub async fn ensure_indexes(db: &DatabaseConnection) -> Result<(), DbErr> {
    let backend = db.get_database_backend();

    let stmt = Index::create()
        .if_not_exists()
        .unique()
        .name(DERIVATIVE_KEY_INDEX)
        .table(derivative::Entity)
        .col(derivative::Column::AssetId)
        .col(derivative::Column::Key)
        .to_owned();

    db.execute_unprepared(&index_sql(backend, &stmt)).await?;
    info!("Ensured index {} exists", DERIVATIVE_KEY_INDEX);

    Ok(())
}

fn table_sql(backend: DbBackend, stmt: &TableCreateStatement) -> String {
    match backend {
        DbBackend::Sqlite => stmt.to_string(SqliteQueryBuilder),
        _ => stmt.to_string(PostgresQueryBuilder),
    }
}

fn index_sql(backend: DbBackend, stmt: &IndexCreateStatement) -> String {
    match backend {
        DbBackend::Sqlite => stmt.to_string(SqliteQueryBuilder),
        _ => stmt.to_string(PostgresQueryBuilder),
    }
}
