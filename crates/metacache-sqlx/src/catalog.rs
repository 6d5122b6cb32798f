//! Schema, table and column caches over the backend's system catalog.
//!
//! PostgreSQL and MySQL are read through `information_schema`. SQLite has a
//! single `main` schema read from `sqlite_master` and `pragma_table_info`.

use crate::database::DatabaseType;
use crate::provider::SqlxSessionProvider;
use metacache_core::{
    CacheError, CacheOptions, FixedParents, KeyColumns, MetadataCache, MetadataObject,
    ObjectFactory, ObjectHandle, Row, Session, Statement,
};
use std::sync::Arc;

const SQLITE_SCHEMA: &str = "main";

/// The connected database, root of the schema cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Database {
    pub name: String,
}

impl MetadataObject for Database {
    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlSchema {
    pub name: String,
}

impl MetadataObject for SqlSchema {
    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Table,
    View,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlTable {
    pub schema: String,
    pub name: String,
    pub kind: TableKind,
    pub comment: Option<String>,
}

impl MetadataObject for SqlTable {
    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlColumn {
    pub name: String,
    pub position: i64,
    pub data_type: Option<String>,
    pub nullable: bool,
}

impl MetadataObject for SqlColumn {
    fn name(&self) -> &str {
        &self.name
    }
}

pub type SchemaCache = MetadataCache<SqlxSessionProvider, Database, SqlSchema>;
pub type TableCache = MetadataCache<SqlxSessionProvider, SqlSchema, SqlTable>;
pub type ColumnCache = MetadataCache<SqlxSessionProvider, SqlTable, SqlColumn>;

/// Schemas, their tables and the tables' columns, wired as dependent caches.
///
/// The provider doubles as the owner passed to every call:
///
/// ```no_run
/// use metacache_core::{CacheOptions, LoadContext};
/// use metacache_sqlx::{CatalogCaches, ProviderConfig, SqlxSessionProvider};
/// use std::sync::Arc;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let provider = Arc::new(SqlxSessionProvider::connect(&ProviderConfig::new("sqlite://app.db"))?);
/// let caches = CatalogCaches::new(Arc::clone(&provider), CacheOptions::default());
/// let ctx = LoadContext::default();
/// for table in caches.tables.get_all(&ctx, &provider, None)? {
///     println!("{}", table.name());
/// }
/// # Ok(())
/// # }
/// ```
pub struct CatalogCaches {
    pub schemas: Arc<SchemaCache>,
    pub tables: Arc<TableCache>,
    pub columns: Arc<ColumnCache>,
}

impl CatalogCaches {
    pub fn new(provider: Arc<SqlxSessionProvider>, options: CacheOptions) -> Self {
        let dialect = provider.dialect();
        let root = ObjectHandle::new(Database {
            name: provider.schema_filter().unwrap_or("default").to_string(),
        });
        let schemas = MetadataCache::new(
            Arc::new(SchemaFactory),
            provider.clone(),
            Arc::new(FixedParents::single(root)),
            dialect,
            options.clone(),
        );
        let tables = MetadataCache::new(
            Arc::new(TableFactory),
            provider.clone(),
            schemas.clone(),
            dialect,
            options.clone(),
        );
        let columns = MetadataCache::new(
            Arc::new(ColumnFactory),
            provider,
            tables.clone(),
            dialect,
            options,
        );
        Self {
            schemas,
            tables,
            columns,
        }
    }
}

/// Builds a statement with backend-specific placeholders. Each `{}` in
/// `template` takes the next placeholder.
fn statement(db: DatabaseType, template: &str, params: &[&str]) -> Statement {
    let mut sql = String::with_capacity(template.len());
    let mut pieces = template.split("{}");
    if let Some(head) = pieces.next() {
        sql.push_str(head);
    }
    for (position, piece) in pieces.enumerate() {
        sql.push_str(&db.placeholder(position + 1));
        sql.push_str(piece);
    }
    params
        .iter()
        .fold(Statement::new(sql), |stmt, param| stmt.bind(*param))
}

/// Schemas of the backend's own bookkeeping, never listed.
const SYSTEM_SCHEMAS: &str =
    "('information_schema', 'pg_catalog', 'pg_toast', 'mysql', 'performance_schema', 'sys')";

// Select lists cast catalog domains (sql_identifier, cardinal_number, unsigned
// integers) to types the Any driver decodes.

const PG_SCHEMAS: &str = "SELECT schema_name::text AS schema_name FROM information_schema.schemata";
const MYSQL_SCHEMAS: &str = "SELECT SCHEMA_NAME AS schema_name FROM information_schema.SCHEMATA";

const PG_TABLES: &str = "SELECT table_schema::text AS table_schema, table_name::text AS table_name, \
     table_type::text AS table_type, \
     obj_description(format('%I.%I', table_schema, table_name)::regclass, 'pg_class') AS table_comment \
     FROM information_schema.tables";
const MYSQL_TABLES: &str = "SELECT TABLE_SCHEMA AS table_schema, TABLE_NAME AS table_name, \
     TABLE_TYPE AS table_type, TABLE_COMMENT AS table_comment FROM information_schema.TABLES";
const SQLITE_TABLES: &str = "SELECT 'main' AS table_schema, name AS table_name, type AS table_type, \
     NULL AS table_comment FROM sqlite_master \
     WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%'";

const PG_COLUMNS: &str = "SELECT table_schema::text AS table_schema, table_name::text AS table_name, \
     column_name::text AS column_name, ordinal_position::int8 AS ordinal_position, \
     data_type::text AS data_type, is_nullable::text AS is_nullable \
     FROM information_schema.columns";
const MYSQL_COLUMNS: &str = "SELECT TABLE_SCHEMA AS table_schema, TABLE_NAME AS table_name, \
     COLUMN_NAME AS column_name, CAST(ORDINAL_POSITION AS SIGNED) AS ordinal_position, \
     DATA_TYPE AS data_type, IS_NULLABLE AS is_nullable FROM information_schema.COLUMNS";
const SQLITE_COLUMNS: &str = "SELECT 'main' AS table_schema, m.name AS table_name, \
     p.name AS column_name, p.cid + 1 AS ordinal_position, p.type AS data_type, \
     CASE WHEN p.\"notnull\" = 0 THEN 'YES' ELSE 'NO' END AS is_nullable \
     FROM sqlite_master m JOIN pragma_table_info(m.name) p \
     WHERE m.type IN ('table', 'view') AND m.name NOT LIKE 'sqlite_%'";

pub struct SchemaFactory;

impl SchemaFactory {
    fn query(db: DatabaseType, filter: Option<&str>) -> Statement {
        let base = match db {
            DatabaseType::Sqlite => {
                return match filter {
                    Some(name) => statement(
                        db,
                        &format!("SELECT '{SQLITE_SCHEMA}' AS schema_name WHERE {{}} = '{SQLITE_SCHEMA}' COLLATE NOCASE"),
                        &[name],
                    ),
                    None => Statement::new(format!("SELECT '{SQLITE_SCHEMA}' AS schema_name")),
                };
            }
            DatabaseType::Postgres => PG_SCHEMAS,
            DatabaseType::Mysql => MYSQL_SCHEMAS,
        };
        match filter {
            Some(name) => statement(db, &format!("{base} WHERE schema_name = {{}}"), &[name]),
            None => Statement::new(format!(
                "{base} WHERE schema_name NOT IN {SYSTEM_SCHEMAS} ORDER BY schema_name"
            )),
        }
    }
}

impl ObjectFactory<SqlxSessionProvider, Database, SqlSchema> for SchemaFactory {
    /// Lists every user schema, or only the provider's schema filter.
    fn prepare_objects(
        &self,
        owner: &SqlxSessionProvider,
        _parent: Option<&ObjectHandle<Database>>,
    ) -> Statement {
        Self::query(owner.database_type(), owner.schema_filter())
    }

    fn prepare_lookup(
        &self,
        owner: &SqlxSessionProvider,
        _parent: Option<&ObjectHandle<Database>>,
        name: &str,
    ) -> Option<Statement> {
        Some(Self::query(owner.database_type(), Some(name)))
    }

    fn key_columns(&self, _parent: Option<&ObjectHandle<Database>>) -> KeyColumns {
        KeyColumns::child_only("schema_name")
    }

    fn create(
        &self,
        _session: &mut dyn Session,
        _owner: &SqlxSessionProvider,
        _parent: &ObjectHandle<Database>,
        row: &Row,
    ) -> Result<Option<SqlSchema>, CacheError> {
        Ok(row.get_str("schema_name").map(|name| SqlSchema {
            name: name.to_string(),
        }))
    }
}

pub struct TableFactory;

impl TableFactory {
    fn query(db: DatabaseType, schema: Option<&str>, name: Option<&str>) -> Statement {
        if db == DatabaseType::Sqlite {
            return match name {
                Some(name) => statement(
                    db,
                    &format!("{SQLITE_TABLES} AND name = {{}} COLLATE NOCASE"),
                    &[name],
                ),
                None => Statement::new(format!("{SQLITE_TABLES} ORDER BY name")),
            };
        }
        let base = match db {
            DatabaseType::Mysql => MYSQL_TABLES,
            _ => PG_TABLES,
        };
        match (schema, name) {
            (Some(schema), Some(name)) => statement(
                db,
                &format!("{base} WHERE table_schema = {{}} AND table_name = {{}}"),
                &[schema, name],
            ),
            (Some(schema), None) => statement(
                db,
                &format!("{base} WHERE table_schema = {{}} ORDER BY table_name"),
                &[schema],
            ),
            (None, _) => Statement::new(format!(
                "{base} WHERE table_schema NOT IN {SYSTEM_SCHEMAS} ORDER BY table_schema, table_name"
            )),
        }
    }
}

impl ObjectFactory<SqlxSessionProvider, SqlSchema, SqlTable> for TableFactory {
    fn prepare_objects(
        &self,
        owner: &SqlxSessionProvider,
        parent: Option<&ObjectHandle<SqlSchema>>,
    ) -> Statement {
        let schema = parent.map(ObjectHandle::name);
        Self::query(owner.database_type(), schema.as_deref(), None)
    }

    fn prepare_lookup(
        &self,
        owner: &SqlxSessionProvider,
        parent: Option<&ObjectHandle<SqlSchema>>,
        name: &str,
    ) -> Option<Statement> {
        let schema = parent?.name();
        Some(Self::query(owner.database_type(), Some(schema.as_str()), Some(name)))
    }

    fn key_columns(&self, _parent: Option<&ObjectHandle<SqlSchema>>) -> KeyColumns {
        KeyColumns::new("table_schema", "table_name")
    }

    fn create(
        &self,
        _session: &mut dyn Session,
        _owner: &SqlxSessionProvider,
        parent: &ObjectHandle<SqlSchema>,
        row: &Row,
    ) -> Result<Option<SqlTable>, CacheError> {
        let name = row
            .get_str("table_name")
            .ok_or_else(|| CacheError::Factory("table row without table_name".into()))?;
        let kind = match row.get_str("table_type") {
            Some(kind) if kind.eq_ignore_ascii_case("view") => TableKind::View,
            _ => TableKind::Table,
        };
        Ok(Some(SqlTable {
            schema: parent.name(),
            name: name.to_string(),
            kind,
            comment: row
                .get_str("table_comment")
                .filter(|comment| !comment.is_empty())
                .map(str::to_string),
        }))
    }
}

pub struct ColumnFactory;

impl ColumnFactory {
    fn query(db: DatabaseType, table: Option<&SqlTable>, name: Option<&str>) -> Statement {
        if db == DatabaseType::Sqlite {
            return match (table, name) {
                (Some(table), Some(name)) => statement(
                    db,
                    &format!("{SQLITE_COLUMNS} AND m.name = {{}} AND p.name = {{}} COLLATE NOCASE"),
                    &[&table.name, name],
                ),
                (Some(table), None) => statement(
                    db,
                    &format!("{SQLITE_COLUMNS} AND m.name = {{}} ORDER BY p.cid"),
                    &[&table.name],
                ),
                (None, _) => Statement::new(format!("{SQLITE_COLUMNS} ORDER BY m.name, p.cid")),
            };
        }
        let base = match db {
            DatabaseType::Mysql => MYSQL_COLUMNS,
            _ => PG_COLUMNS,
        };
        match (table, name) {
            (Some(table), Some(name)) => statement(
                db,
                &format!(
                    "{base} WHERE table_schema = {{}} AND table_name = {{}} AND column_name = {{}}"
                ),
                &[&table.schema, &table.name, name],
            ),
            (Some(table), None) => statement(
                db,
                &format!(
                    "{base} WHERE table_schema = {{}} AND table_name = {{}} ORDER BY ordinal_position"
                ),
                &[&table.schema, &table.name],
            ),
            (None, _) => Statement::new(format!(
                "{base} WHERE table_schema NOT IN {SYSTEM_SCHEMAS} \
                 ORDER BY table_schema, table_name, ordinal_position"
            )),
        }
    }
}

impl ObjectFactory<SqlxSessionProvider, SqlTable, SqlColumn> for ColumnFactory {
    fn prepare_objects(
        &self,
        owner: &SqlxSessionProvider,
        parent: Option<&ObjectHandle<SqlTable>>,
    ) -> Statement {
        let table = parent.map(|table| table.read().clone());
        Self::query(owner.database_type(), table.as_ref(), None)
    }

    fn prepare_lookup(
        &self,
        owner: &SqlxSessionProvider,
        parent: Option<&ObjectHandle<SqlTable>>,
        name: &str,
    ) -> Option<Statement> {
        let table = parent?.read().clone();
        Some(Self::query(owner.database_type(), Some(&table), Some(name)))
    }

    fn key_columns(&self, _parent: Option<&ObjectHandle<SqlTable>>) -> KeyColumns {
        KeyColumns::new("table_name", "column_name")
    }

    fn parent_key(&self, parent: &SqlTable) -> String {
        format!("{}.{}", parent.schema, parent.name)
    }

    fn row_parent_key(&self, row: &Row, _columns: &KeyColumns) -> Option<String> {
        Some(format!(
            "{}.{}",
            row.get_str("table_schema")?,
            row.get_str("table_name")?
        ))
    }

    fn create(
        &self,
        _session: &mut dyn Session,
        _owner: &SqlxSessionProvider,
        _parent: &ObjectHandle<SqlTable>,
        row: &Row,
    ) -> Result<Option<SqlColumn>, CacheError> {
        let name = row
            .get_str("column_name")
            .ok_or_else(|| CacheError::Factory("column row without column_name".into()))?;
        Ok(Some(SqlColumn {
            name: name.to_string(),
            position: row.get_i64("ordinal_position").unwrap_or_default(),
            data_type: row
                .get_str("data_type")
                .filter(|data_type| !data_type.is_empty())
                .map(str::to_string),
            nullable: !row
                .get_str("is_nullable")
                .is_some_and(|nullable| nullable.eq_ignore_ascii_case("no")),
        }))
    }
}
