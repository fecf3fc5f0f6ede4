//! sqlite-adapter — SQLite implementation of the GoodsRepository port.
//!
//! Purpose
//! - Provide a file-based relational store for goods and goods categories.
//! - `SqliteStore` is the shared store handle owned by the application;
//!   `SqliteGoodsRepo` borrows a clone of it for its lifetime.
//! - Tables are defined from the `domain::schema` descriptors, and the
//!   category/goods relationship becomes a foreign key plus the join used
//!   by `goods_with_category`.
//!
//! Notes
//! - Uses `rusqlite` with the `bundled` feature for portability.
//! - rusqlite is blocking; every repository call runs on
//!   `tokio::task::spawn_blocking` so async callers are never stalled.
//! - Stores timestamps as signed milliseconds since UNIX_EPOCH; instants
//!   before the epoch are negative and round-trip at millisecond precision.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use domain::schema::{EntitySchema, HasMany, CATEGORY_HAS_GOODS, GOODS, GOODS_CATEGORY};
use domain::{
    category_projection, goods_projection, CategoryField, CategoryRecord, CoreError, Goods,
    GoodsCategory, GoodsField, GoodsQuery, GoodsRecord, GoodsRepository, GoodsWithCategoryQuery,
    Page,
};
use rusqlite::{params, Connection, Row};
use tracing::debug;

/// Shared SQLite connection. Cloning shares the same connection.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CoreError> {
        let conn = Connection::open(path).map_err(map_sqerr)?;
        Self::from_connection(conn)
    }

    /// Private in-memory database, mostly for tests.
    pub fn open_in_memory() -> Result<Self, CoreError> {
        let conn = Connection::open_in_memory().map_err(map_sqerr)?;
        Self::from_connection(conn)
    }

    /// Construct from env var `DB_PATH` (defaults to `./data/goods.db`).
    pub fn from_env() -> Result<Self, CoreError> {
        let path = std::env::var("DB_PATH").unwrap_or_else(|_| "./data/goods.db".to_string());
        // Ensure directory exists
        if let Some(dir) = Path::new(&path).parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        Self::open(path)
    }

    fn from_connection(conn: Connection) -> Result<Self, CoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(map_sqerr)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create the table for `schema` if missing. Relations whose child is
    /// `schema` become foreign keys with an index on the key column.
    pub fn define_model(
        &self,
        schema: &EntitySchema,
        relations: &[&HasMany],
    ) -> Result<(), CoreError> {
        let ddl = table_ddl(schema, relations);
        debug!(table = %schema.table_name(), "defining model");
        let conn = self.lock()?;
        conn.execute_batch(&ddl).map_err(map_sqerr)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, CoreError> {
        self.conn
            .lock()
            .map_err(|_| CoreError::Repository("mutex poisoned".into()))
    }

    /// Run blocking work against the connection off the async executor.
    async fn run<T, F>(&self, f: F) -> Result<T, CoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, CoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| CoreError::Repository("mutex poisoned".into()))?;
            f(&conn)
        })
        .await
        .map_err(|e| CoreError::Repository(format!("blocking task failed: {e}")))?
    }
}

fn table_ddl(schema: &EntitySchema, relations: &[&HasMany]) -> String {
    let table = schema.table_name();
    let mut defs: Vec<String> = schema
        .columns()
        .iter()
        .map(|c| {
            let mut def = format!("{} {}", c.column, c.sql_type.as_sql());
            if c.primary_key {
                def.push_str(" PRIMARY KEY");
            }
            if !c.nullable {
                def.push_str(" NOT NULL");
            }
            def
        })
        .collect();
    let mut indexes = Vec::new();
    for rel in relations.iter().filter(|r| r.child.name == schema.name) {
        let parent_pk = rel.parent.primary_key().unwrap_or("uuid");
        defs.push(format!(
            "FOREIGN KEY ({}) REFERENCES {}({})",
            rel.foreign_key,
            rel.parent.table_name(),
            parent_pk
        ));
        indexes.push(format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_{fk} ON {table}({fk});",
            fk = rel.foreign_key
        ));
    }
    let mut ddl = format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n);\n",
        table,
        defs.join(",\n    ")
    );
    if schema.options.timestamps {
        indexes.push(format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_org_created ON {table}(org_uuid, created_time);"
        ));
    }
    for idx in indexes {
        ddl.push_str(&idx);
        ddl.push('\n');
    }
    ddl
}

fn map_sqerr<E: std::fmt::Display>(e: E) -> CoreError {
    CoreError::Repository(format!("sqlite error: {e}"))
}

fn map_insert_err(e: rusqlite::Error) -> CoreError {
    if let rusqlite::Error::SqliteFailure(err, _) = &e {
        match err.extended_code {
            rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY | rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE => {
                return CoreError::AlreadyExists
            }
            rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY => {
                return CoreError::ForeignKey(e.to_string())
            }
            _ => {}
        }
    }
    map_sqerr(e)
}

/// Saturates at the `i64` range, far outside any real timestamp.
fn system_time_to_millis(t: SystemTime) -> i64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(after) => i64::try_from(after.as_millis()).unwrap_or(i64::MAX),
        Err(before) => i64::try_from(before.duration().as_millis())
            .map(|ms| -ms)
            .unwrap_or(i64::MIN),
    }
}

fn millis_to_system_time(ms: i64) -> SystemTime {
    let magnitude = Duration::from_millis(ms.unsigned_abs());
    if ms >= 0 {
        UNIX_EPOCH + magnitude
    } else {
        UNIX_EPOCH - magnitude
    }
}

fn select_list<'a>(columns: impl Iterator<Item = &'a str>) -> String {
    columns.collect::<Vec<_>>().join(", ")
}

fn read_goods_field(
    row: &Row,
    idx: usize,
    field: GoodsField,
    rec: &mut GoodsRecord,
) -> rusqlite::Result<()> {
    match field {
        GoodsField::Uuid => rec.uuid = Some(row.get(idx)?),
        GoodsField::OrgUuid => rec.org_uuid = Some(row.get(idx)?),
        GoodsField::CategoryUuid => rec.category_uuid = Some(row.get(idx)?),
        GoodsField::Name => rec.name = Some(row.get(idx)?),
        GoodsField::Price => rec.price = Some(row.get(idx)?),
        GoodsField::Stock => rec.stock = Some(row.get(idx)?),
        GoodsField::Description => rec.description = row.get(idx)?,
        GoodsField::CreatedTime => {
            rec.created_time = Some(millis_to_system_time(row.get(idx)?))
        }
        GoodsField::UpdatedTime => {
            rec.updated_time = Some(millis_to_system_time(row.get(idx)?))
        }
    }
    Ok(())
}

fn read_category_field(
    row: &Row,
    idx: usize,
    field: CategoryField,
    rec: &mut CategoryRecord,
) -> rusqlite::Result<()> {
    match field {
        CategoryField::Uuid => rec.uuid = Some(row.get(idx)?),
        CategoryField::OrgUuid => rec.org_uuid = Some(row.get(idx)?),
        CategoryField::Name => rec.name = Some(row.get(idx)?),
        CategoryField::Description => rec.description = row.get(idx)?,
    }
    Ok(())
}

/// Read projected goods columns starting at `offset`.
fn row_to_goods_record(
    row: &Row,
    offset: usize,
    fields: &[GoodsField],
) -> Result<GoodsRecord, CoreError> {
    let mut rec = GoodsRecord::default();
    for (i, field) in fields.iter().enumerate() {
        read_goods_field(row, offset + i, *field, &mut rec).map_err(map_sqerr)?;
    }
    Ok(rec)
}

fn row_to_goods(row: &Row) -> Result<Goods, CoreError> {
    let created: i64 = row.get(7).map_err(map_sqerr)?;
    let updated: i64 = row.get(8).map_err(map_sqerr)?;
    Ok(Goods {
        uuid: row.get(0).map_err(map_sqerr)?,
        org_uuid: row.get(1).map_err(map_sqerr)?,
        category_uuid: row.get(2).map_err(map_sqerr)?,
        name: row.get(3).map_err(map_sqerr)?,
        price: row.get(4).map_err(map_sqerr)?,
        stock: row.get(5).map_err(map_sqerr)?,
        description: row.get(6).map_err(map_sqerr)?,
        created_time: millis_to_system_time(created),
        updated_time: millis_to_system_time(updated),
    })
}

/// SQLite-backed goods repository.
#[derive(Clone)]
pub struct SqliteGoodsRepo {
    store: SqliteStore,
}

impl SqliteGoodsRepo {
    /// Define both entities and their relationship on `store`.
    ///
    /// Table creation is idempotent, but construction is meant to happen once
    /// during startup.
    pub fn new(store: SqliteStore) -> Result<Self, CoreError> {
        store.define_model(&GOODS_CATEGORY, &[])?;
        store.define_model(&GOODS, &[&CATEGORY_HAS_GOODS])?;
        Ok(Self { store })
    }

    /// Construct on top of `SqliteStore::from_env()`.
    pub fn from_env() -> Result<Self, CoreError> {
        Self::new(SqliteStore::from_env()?)
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    /// Insert a category row (fixtures and data loading).
    pub fn insert_category(&self, category: &GoodsCategory) -> Result<(), CoreError> {
        let conn = self.store.lock()?;
        conn.execute(
            &format!(
                "INSERT INTO {}(uuid, org_uuid, name, description) VALUES (?1, ?2, ?3, ?4)",
                GOODS_CATEGORY.table_name()
            ),
            params![
                category.uuid,
                category.org_uuid,
                category.name,
                category.description
            ],
        )
        .map_err(map_insert_err)?;
        Ok(())
    }

    /// Insert a goods row. The referenced category must exist.
    pub fn insert_goods(&self, goods: &Goods) -> Result<(), CoreError> {
        let conn = self.store.lock()?;
        conn.execute(
            &format!(
                "INSERT INTO {}(uuid, org_uuid, category_uuid, name, price, stock, description, created_time, updated_time) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                GOODS.table_name()
            ),
            params![
                goods.uuid,
                goods.org_uuid,
                goods.category_uuid,
                goods.name,
                goods.price,
                goods.stock,
                goods.description,
                system_time_to_millis(goods.created_time),
                system_time_to_millis(goods.updated_time),
            ],
        )
        .map_err(map_insert_err)?;
        Ok(())
    }
}

#[async_trait]
impl GoodsRepository for SqliteGoodsRepo {
    async fn goods_with_category(
        &self,
        query: &GoodsWithCategoryQuery,
    ) -> Result<Vec<CategoryRecord>, CoreError> {
        let cat_fields = category_projection(query.category_attributes.as_deref());
        let goods_fields = goods_projection(query.goods_attributes.as_deref());
        let merchant_uuid = query.merchant_uuid.clone();
        self.store
            .run(move |conn| {
                let rel = &CATEGORY_HAS_GOODS;
                let parent_pk = rel.parent.primary_key().unwrap_or("uuid");

                // Categories of the merchant; the key column always leads.
                let sql = format!(
                    "SELECT {}, {} FROM {} WHERE org_uuid = ?1 ORDER BY rowid",
                    parent_pk,
                    select_list(cat_fields.iter().map(|f| f.column())),
                    rel.parent.table_name()
                );
                let mut stmt = conn.prepare(&sql).map_err(map_sqerr)?;
                let mut rows = stmt.query(params![merchant_uuid]).map_err(map_sqerr)?;
                let mut keys: Vec<String> = Vec::new();
                let mut out: Vec<CategoryRecord> = Vec::new();
                while let Some(row) = rows.next().map_err(map_sqerr)? {
                    keys.push(row.get(0).map_err(map_sqerr)?);
                    let mut rec = CategoryRecord::default();
                    for (i, field) in cat_fields.iter().enumerate() {
                        read_category_field(row, i + 1, *field, &mut rec).map_err(map_sqerr)?;
                    }
                    out.push(rec);
                }
                if out.is_empty() {
                    return Ok(out);
                }

                // Goods of those categories, joined through the foreign key.
                let goods_columns: Vec<String> = goods_fields
                    .iter()
                    .map(|f| format!("g.{}", f.column()))
                    .collect();
                let sql = format!(
                    "SELECT g.{fk}, {} FROM {} g JOIN {} c ON c.{pk} = g.{fk} \
                     WHERE c.org_uuid = ?1 ORDER BY g.rowid",
                    select_list(goods_columns.iter().map(String::as_str)),
                    rel.child.table_name(),
                    rel.parent.table_name(),
                    fk = rel.foreign_key,
                    pk = parent_pk,
                );
                let position: HashMap<&str, usize> = keys
                    .iter()
                    .enumerate()
                    .map(|(i, k)| (k.as_str(), i))
                    .collect();
                let mut stmt = conn.prepare(&sql).map_err(map_sqerr)?;
                let mut rows = stmt.query(params![merchant_uuid]).map_err(map_sqerr)?;
                while let Some(row) = rows.next().map_err(map_sqerr)? {
                    let fk: String = row.get(0).map_err(map_sqerr)?;
                    let rec = row_to_goods_record(row, 1, &goods_fields)?;
                    if let Some(&i) = position.get(fk.as_str()) {
                        out[i].goods.push(rec);
                    }
                }
                Ok(out)
            })
            .await
    }

    async fn count_by_category(&self, category_uuid: &str) -> Result<u64, CoreError> {
        let category_uuid = category_uuid.to_string();
        self.store
            .run(move |conn| {
                let count: i64 = conn
                    .query_row(
                        &format!(
                            "SELECT COUNT(*) FROM {} WHERE category_uuid = ?1",
                            GOODS.table_name()
                        ),
                        params![category_uuid],
                        |r| r.get(0),
                    )
                    .map_err(map_sqerr)?;
                Ok(count as u64)
            })
            .await
    }

    async fn query(&self, query: &GoodsQuery) -> Result<Page<GoodsRecord>, CoreError> {
        let pagination = query.pagination.unwrap_or_default();
        pagination.validate()?;
        let fields = goods_projection(query.attributes.as_deref());
        let query = query.clone();
        self.store
            .run(move |conn| {
                // Organization scope first; filter fields only narrow it.
                let mut conditions = vec!["org_uuid = ?1".to_string()];
                let mut params_values: Vec<Box<dyn rusqlite::ToSql>> =
                    vec![Box::new(query.user_uuid.clone())];
                let f = &query.filter;
                if let Some(ref c) = f.category_uuid {
                    conditions.push(format!("category_uuid = ?{}", params_values.len() + 1));
                    params_values.push(Box::new(c.clone()));
                }
                if let Some(ref n) = f.name {
                    conditions.push(format!("name = ?{}", params_values.len() + 1));
                    params_values.push(Box::new(n.clone()));
                }
                if let Some(p) = f.price {
                    conditions.push(format!("price = ?{}", params_values.len() + 1));
                    params_values.push(Box::new(p));
                }
                if let Some(s) = f.stock {
                    conditions.push(format!("stock = ?{}", params_values.len() + 1));
                    params_values.push(Box::new(s));
                }
                let where_clause = format!("WHERE {}", conditions.join(" AND "));
                let table = GOODS.table_name();

                // Count total, ignoring pagination
                let count_sql = format!("SELECT COUNT(*) FROM {} {}", table, where_clause);
                let total: i64 = {
                    let mut stmt = conn.prepare(&count_sql).map_err(map_sqerr)?;
                    let params_refs: Vec<&dyn rusqlite::ToSql> =
                        params_values.iter().map(|b| b.as_ref()).collect();
                    stmt.query_row(params_refs.as_slice(), |r| r.get(0))
                        .map_err(map_sqerr)?
                };

                // An offset beyond the i64 range is past every row.
                let offset = match i64::try_from(pagination.offset()) {
                    Ok(offset) => offset,
                    Err(_) => {
                        return Ok(Page {
                            page: pagination.page,
                            count: total as u64,
                            rows: Vec::new(),
                        })
                    }
                };

                // Fetch the page
                let select_sql = format!(
                    "SELECT {} FROM {} {} ORDER BY created_time DESC, uuid ASC LIMIT ?{} OFFSET ?{}",
                    select_list(fields.iter().map(|f| f.column())),
                    table,
                    where_clause,
                    params_values.len() + 1,
                    params_values.len() + 2
                );
                params_values.push(Box::new(pagination.limit() as i64));
                params_values.push(Box::new(offset));

                let mut stmt = conn.prepare(&select_sql).map_err(map_sqerr)?;
                let params_refs: Vec<&dyn rusqlite::ToSql> =
                    params_values.iter().map(|b| b.as_ref()).collect();
                let mut rows = stmt.query(params_refs.as_slice()).map_err(map_sqerr)?;
                let mut items = Vec::new();
                while let Some(row) = rows.next().map_err(map_sqerr)? {
                    items.push(row_to_goods_record(row, 0, &fields)?);
                }

                Ok(Page {
                    page: pagination.page,
                    count: total as u64,
                    rows: items,
                })
            })
            .await
    }

    async fn get(&self, uuid: &str) -> Result<Option<Goods>, CoreError> {
        let uuid = uuid.to_string();
        self.store
            .run(move |conn| {
                let sql = format!(
                    "SELECT uuid, org_uuid, category_uuid, name, price, stock, description, created_time, updated_time FROM {} WHERE uuid = ?1",
                    GOODS.table_name()
                );
                let mut stmt = conn.prepare(&sql).map_err(map_sqerr)?;
                let mut rows = stmt.query(params![uuid]).map_err(map_sqerr)?;
                if let Some(row) = rows.next().map_err(map_sqerr)? {
                    Ok(Some(row_to_goods(row)?))
                } else {
                    Ok(None)
                }
            })
            .await
    }

    async fn get_category(&self, uuid: &str) -> Result<Option<GoodsCategory>, CoreError> {
        let uuid = uuid.to_string();
        self.store
            .run(move |conn| {
                let sql = format!(
                    "SELECT uuid, org_uuid, name, description FROM {} WHERE uuid = ?1",
                    GOODS_CATEGORY.table_name()
                );
                let mut stmt = conn.prepare(&sql).map_err(map_sqerr)?;
                let mut rows = stmt.query(params![uuid]).map_err(map_sqerr)?;
                match rows.next().map_err(map_sqerr)? {
                    Some(row) => Ok(Some(GoodsCategory {
                        uuid: row.get(0).map_err(map_sqerr)?,
                        org_uuid: row.get(1).map_err(map_sqerr)?,
                        name: row.get(2).map_err(map_sqerr)?,
                        description: row.get(3).map_err(map_sqerr)?,
                    })),
                    None => Ok(None),
                }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{GoodsFilter, Pagination};

    fn tmp_db() -> (SqliteGoodsRepo, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.db");
        let repo = SqliteGoodsRepo::new(SqliteStore::open(path).unwrap()).unwrap();
        (repo, dir)
    }

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn seeded() -> SqliteGoodsRepo {
        let repo = SqliteGoodsRepo::new(SqliteStore::open_in_memory().unwrap()).unwrap();
        repo.insert_category(&GoodsCategory::new("c1", "org1", "Drinks")).unwrap();
        repo.insert_category(&GoodsCategory::new("c2", "org1", "Snacks")).unwrap();
        repo.insert_category(&GoodsCategory::new("c3", "org1", "Empty")).unwrap();
        repo.insert_category(&GoodsCategory::new("c9", "org2", "Elsewhere")).unwrap();
        repo.insert_goods(&Goods::new("g1", "org1", "c1", "Tea", 300, at(10))).unwrap();
        repo.insert_goods(&Goods::new("g2", "org1", "c1", "Coffee", 400, at(20))).unwrap();
        repo.insert_goods(&Goods::new("g3", "org1", "c2", "Chips", 250, at(30))).unwrap();
        repo.insert_goods(&Goods::new("g9", "org2", "c9", "Soap", 100, at(40))).unwrap();
        repo
    }

    #[test]
    fn ddl_declares_foreign_key_and_frozen_name() {
        let ddl = table_ddl(&GOODS, &[&CATEGORY_HAS_GOODS]);
        assert!(ddl.contains("CREATE TABLE IF NOT EXISTS goods ("));
        assert!(ddl.contains("FOREIGN KEY (category_uuid) REFERENCES goodscategory(uuid)"));
        assert!(ddl.contains("created_time INTEGER NOT NULL"));
        let ddl = table_ddl(&GOODS_CATEGORY, &[&CATEGORY_HAS_GOODS]);
        assert!(ddl.contains("CREATE TABLE IF NOT EXISTS goodscategory ("));
        assert!(!ddl.contains("FOREIGN KEY"));
        assert!(!ddl.contains("created_time"));
    }

    #[tokio::test]
    async fn construction_is_idempotent_on_a_file() {
        let (repo, dir) = tmp_db();
        repo.insert_category(&GoodsCategory::new("c1", "org1", "Drinks")).unwrap();
        drop(repo);
        let reopened =
            SqliteGoodsRepo::new(SqliteStore::open(dir.path().join("t.db")).unwrap()).unwrap();
        assert_eq!(reopened.count_by_category("c1").await.unwrap(), 0);
        let err = reopened
            .insert_category(&GoodsCategory::new("c1", "org1", "Again"))
            .unwrap_err();
        assert!(matches!(err, CoreError::AlreadyExists));
    }

    #[test]
    fn goods_require_existing_category() {
        let (repo, _dir) = tmp_db();
        let err = repo
            .insert_goods(&Goods::new("g1", "org1", "missing", "Tea", 1, at(0)))
            .unwrap_err();
        assert!(matches!(err, CoreError::ForeignKey(_)));
    }

    #[tokio::test]
    async fn query_returns_newest_first_with_total_count() {
        let repo = seeded();
        let page = repo
            .query(&GoodsQuery {
                user_uuid: "org1".into(),
                pagination: Some(Pagination { page: 1, page_size: 2 }),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.page, 1);
        assert_eq!(page.count, 3);
        let uuids: Vec<_> = page.rows.iter().map(|r| r.uuid.clone().unwrap()).collect();
        assert_eq!(uuids, vec!["g3", "g2"]);
        for pair in page.rows.windows(2) {
            assert!(pair[0].created_time >= pair[1].created_time);
        }

        let last = repo
            .query(&GoodsQuery {
                user_uuid: "org1".into(),
                pagination: Some(Pagination { page: 2, page_size: 2 }),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(last.count, 3);
        assert_eq!(last.rows.len(), 1);
        assert_eq!(last.rows[0].uuid.as_deref(), Some("g1"));
    }

    #[tokio::test]
    async fn query_defaults_pagination_and_projects() {
        let repo = seeded();
        let page = repo
            .query(&GoodsQuery {
                user_uuid: "org1".into(),
                attributes: Some(vec![GoodsField::Name, GoodsField::Price]),
                filter: GoodsFilter {
                    category_uuid: Some("c1".into()),
                    ..Default::default()
                },
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.page, 1);
        assert_eq!(page.count, 2);
        assert_eq!(page.rows[0].name.as_deref(), Some("Coffee"));
        assert_eq!(page.rows[0].price, Some(400));
        assert!(page.rows[0].uuid.is_none());
        assert!(page.rows[0].created_time.is_none());
    }

    #[tokio::test]
    async fn query_cannot_escape_org_scope() {
        let repo = seeded();
        let page = repo
            .query(&GoodsQuery {
                user_uuid: "org1".into(),
                filter: GoodsFilter {
                    category_uuid: Some("c9".into()),
                    ..Default::default()
                },
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.count, 0);
        assert!(page.rows.is_empty());
    }

    #[tokio::test]
    async fn query_rejects_page_zero() {
        let repo = seeded();
        let err = repo
            .query(&GoodsQuery {
                user_uuid: "org1".into(),
                pagination: Some(Pagination { page: 0, page_size: 10 }),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidPagination(_)));
    }

    #[tokio::test]
    async fn goods_with_category_nests_goods_under_their_category() {
        let repo = seeded();
        let cats = repo
            .goods_with_category(&GoodsWithCategoryQuery {
                merchant_uuid: "org1".into(),
                category_attributes: Some(vec![CategoryField::Uuid, CategoryField::Name]),
                goods_attributes: Some(vec![GoodsField::Uuid, GoodsField::CategoryUuid]),
            })
            .await
            .unwrap();
        assert_eq!(cats.len(), 3);
        assert_eq!(cats[0].name.as_deref(), Some("Drinks"));
        assert_eq!(cats[0].goods.len(), 2);
        assert_eq!(cats[1].goods.len(), 1);
        // Categories without goods are still listed
        assert!(cats[2].goods.is_empty());
        for cat in &cats {
            assert!(cat.org_uuid.is_none());
            for g in &cat.goods {
                assert_eq!(g.category_uuid, cat.uuid);
                assert!(g.name.is_none());
            }
        }
    }

    #[tokio::test]
    async fn goods_with_category_round_trips_all_fields() {
        let repo = SqliteGoodsRepo::new(SqliteStore::open_in_memory().unwrap()).unwrap();
        let mut cat = GoodsCategory::new("c1", "org1", "Drinks");
        cat.description = Some("hot and cold".into());
        repo.insert_category(&cat).unwrap();
        let mut g = Goods::new("g1", "org1", "c1", "Tea", 300, at(5));
        g.stock = 12;
        g.description = Some("green".into());
        g.updated_time = at(6);
        repo.insert_goods(&g).unwrap();

        let cats = repo
            .goods_with_category(&GoodsWithCategoryQuery {
                merchant_uuid: "org1".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(cats.len(), 1);
        let mut expected = CategoryRecord::project(&cat, &CategoryField::ALL);
        expected.goods = vec![GoodsRecord::project(&g, &GoodsField::ALL)];
        assert_eq!(cats[0], expected);
    }

    #[tokio::test]
    async fn goods_with_category_unknown_merchant_is_empty() {
        let repo = seeded();
        let cats = repo
            .goods_with_category(&GoodsWithCategoryQuery {
                merchant_uuid: "nobody".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(cats.is_empty());
    }

    #[tokio::test]
    async fn count_by_category_counts_and_zero_for_unknown() {
        let repo = seeded();
        assert_eq!(repo.count_by_category("c1").await.unwrap(), 2);
        assert_eq!(repo.count_by_category("c3").await.unwrap(), 0);
        assert_eq!(repo.count_by_category("does-not-exist").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn get_by_primary_key() {
        let repo = seeded();
        let got = repo.get("g2").await.unwrap().unwrap();
        assert_eq!(got.name, "Coffee");
        assert_eq!(got.category_uuid, "c1");
        assert_eq!(got.created_time, at(20));
        assert!(repo.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn get_category_by_primary_key() {
        let repo = seeded();
        let cat = repo.get_category("c9").await.unwrap().unwrap();
        assert_eq!(cat.org_uuid, "org2");
        assert_eq!(cat.name, "Elsewhere");
        assert!(repo.get_category("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn equal_created_time_orders_by_uuid() {
        let repo = SqliteGoodsRepo::new(SqliteStore::open_in_memory().unwrap()).unwrap();
        repo.insert_category(&GoodsCategory::new("c1", "org1", "Drinks")).unwrap();
        // Inserted out of uuid order on purpose
        repo.insert_goods(&Goods::new("gb", "org1", "c1", "Tea", 1, at(7))).unwrap();
        repo.insert_goods(&Goods::new("ga", "org1", "c1", "Coffee", 1, at(7))).unwrap();
        repo.insert_goods(&Goods::new("gc", "org1", "c1", "Juice", 1, at(8))).unwrap();
        let page = repo
            .query(&GoodsQuery {
                user_uuid: "org1".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let uuids: Vec<_> = page.rows.iter().map(|r| r.uuid.clone().unwrap()).collect();
        assert_eq!(uuids, vec!["gc", "ga", "gb"]);
    }

    #[tokio::test]
    async fn page_past_the_end_is_empty() {
        let repo = seeded();
        let page = repo
            .query(&GoodsQuery {
                user_uuid: "org1".into(),
                pagination: Some(Pagination { page: u32::MAX, page_size: u32::MAX }),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.page, u32::MAX);
        assert_eq!(page.count, 3);
        assert!(page.rows.is_empty());
    }

    #[tokio::test]
    async fn goods_with_category_handles_many_categories() {
        let repo = SqliteGoodsRepo::new(SqliteStore::open_in_memory().unwrap()).unwrap();
        // More categories than SQLite allows bound variables in one statement
        for i in 0..33_000 {
            repo.insert_category(&GoodsCategory::new(format!("c{i}"), "org1", "Bulk"))
                .unwrap();
        }
        repo.insert_goods(&Goods::new("g1", "org1", "c32999", "Tea", 1, at(1))).unwrap();
        let cats = repo
            .goods_with_category(&GoodsWithCategoryQuery {
                merchant_uuid: "org1".into(),
                category_attributes: Some(vec![CategoryField::Uuid]),
                goods_attributes: Some(vec![GoodsField::Uuid]),
            })
            .await
            .unwrap();
        assert_eq!(cats.len(), 33_000);
        assert_eq!(cats[32_999].goods.len(), 1);
        assert_eq!(cats[32_999].goods[0].uuid.as_deref(), Some("g1"));
    }

    #[tokio::test]
    async fn timestamps_before_the_epoch_round_trip() {
        let repo = SqliteGoodsRepo::new(SqliteStore::open_in_memory().unwrap()).unwrap();
        repo.insert_category(&GoodsCategory::new("c1", "org1", "Drinks")).unwrap();
        let before = UNIX_EPOCH - Duration::from_millis(86_400_123);
        let mut g = Goods::new("old", "org1", "c1", "Antique", 1, before);
        g.updated_time = UNIX_EPOCH - Duration::from_millis(1);
        repo.insert_goods(&g).unwrap();
        repo.insert_goods(&Goods::new("new", "org1", "c1", "Fresh", 1, at(1))).unwrap();

        let got = repo.get("old").await.unwrap().unwrap();
        assert_eq!(got.created_time, before);
        assert_eq!(got.updated_time, g.updated_time);

        let page = repo
            .query(&GoodsQuery {
                user_uuid: "org1".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let uuids: Vec<_> = page.rows.iter().map(|r| r.uuid.clone().unwrap()).collect();
        assert_eq!(uuids, vec!["new", "old"]);
    }

    #[test]
    fn millis_conversion_is_signed() {
        assert_eq!(system_time_to_millis(UNIX_EPOCH - Duration::from_millis(5)), -5);
        assert_eq!(millis_to_system_time(-5), UNIX_EPOCH - Duration::from_millis(5));
        assert_eq!(millis_to_system_time(0), UNIX_EPOCH);
    }
}
