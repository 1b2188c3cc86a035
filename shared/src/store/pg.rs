use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::sql_types::Text;
use diesel::PgConnection;
use diesel_async::pooled_connection::bb8::Pool;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use serde_json::Value;
use tracing::info;

use super::schema::documents;
use super::{apply_write, Backend, DocPath, ReadRecord, Snapshot, StoreError, Write};

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

type DbPool = Pool<AsyncPgConnection>;

#[derive(Debug, Clone, Queryable, QueryableByName, Selectable, Insertable)]
#[diesel(table_name = documents)]
struct DbDocument {
    collection: String,
    id: String,
    version: i64,
    data: Value,
}

impl From<DbDocument> for Snapshot {
    fn from(row: DbDocument) -> Self {
        Snapshot {
            path: DocPath::new(row.collection, row.id),
            version: row.version as u64,
            data: row.data,
        }
    }
}

impl From<DieselError> for StoreError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::DatabaseError(DatabaseErrorKind::SerializationFailure, _) => StoreError::Conflict,
            other => StoreError::Backend(other.to_string()),
        }
    }
}

pub fn run_migrations(database_url: &str) -> Result<()> {
    info!("Running database migrations...");
    let mut conn = PgConnection::establish(database_url)?;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| anyhow::anyhow!("Migration error: {}", e))?;
    info!("Migrations completed successfully");
    Ok(())
}

/// Documents stored as JSONB rows in a single `documents` table.
#[derive(Clone)]
pub struct PgBackend {
    pool: DbPool,
}

impl PgBackend {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
        let pool = Pool::builder().build(config).await?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl Backend for PgBackend {
    async fn get(&self, path: &DocPath) -> Result<Option<Snapshot>, StoreError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let row = documents::table
            .find((path.collection.as_str(), path.id.as_str()))
            .select(DbDocument::as_select())
            .first::<DbDocument>(&mut conn)
            .await
            .optional()?;
        Ok(row.map(Snapshot::from))
    }

    async fn find_one(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<Option<Snapshot>, StoreError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let row = diesel::sql_query(
            "SELECT collection, id, version, data FROM documents \
             WHERE collection = $1 AND data ->> $2 = $3 \
             ORDER BY id LIMIT 1",
        )
        .bind::<Text, _>(collection)
        .bind::<Text, _>(field)
        .bind::<Text, _>(value)
        .get_result::<DbDocument>(&mut conn)
        .await
        .optional()?;
        Ok(row.map(Snapshot::from))
    }

    async fn commit(&self, reads: Vec<ReadRecord>, writes: Vec<Write>) -> Result<(), StoreError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        conn.build_transaction()
            .serializable()
            .run::<_, StoreError, _>(|conn| {
                Box::pin(async move {
                    for read in &reads {
                        let current = documents::table
                            .find((read.path.collection.as_str(), read.path.id.as_str()))
                            .select(documents::version)
                            .for_update()
                            .first::<i64>(conn)
                            .await
                            .optional()?;
                        if current.map(|v| v as u64) != read.version {
                            return Err(StoreError::Conflict);
                        }
                    }

                    let mut staged: HashMap<DocPath, (u64, Option<Value>)> = HashMap::new();
                    for write in &writes {
                        let path = write.path();
                        if !staged.contains_key(path) {
                            let current = documents::table
                                .find((path.collection.as_str(), path.id.as_str()))
                                .select((documents::version, documents::data))
                                .for_update()
                                .first::<(i64, Value)>(conn)
                                .await
                                .optional()?;
                            staged.insert(
                                path.clone(),
                                current.map_or((0, None), |(v, data)| (v as u64, Some(data))),
                            );
                        }
                        if let Some(entry) = staged.get_mut(path) {
                            apply_write(&mut entry.1, write)?;
                        }
                    }

                    for (path, (version, data)) in staged {
                        let Some(data) = data else { continue };
                        let row = DbDocument {
                            collection: path.collection,
                            id: path.id,
                            version: version as i64 + 1,
                            data,
                        };
                        diesel::insert_into(documents::table)
                            .values(&row)
                            .on_conflict((documents::collection, documents::id))
                            .do_update()
                            .set((
                                documents::version.eq(row.version),
                                documents::data.eq(row.data.clone()),
                                documents::updated_at.eq(diesel::dsl::now),
                            ))
                            .execute(conn)
                            .await?;
                    }
                    Ok(())
                })
            })
            .await
    }
}
