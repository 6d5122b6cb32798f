//! An in-memory remote catalog (schemas, tables, columns, indexes) with query
//! accounting and fault injection, plus the factories that read it.

#![allow(dead_code)]

use metacache_core::{
    CacheError, CacheOptions, CancelToken, Dialect, FixedParents, KeyColumns, MetadataCache,
    MetadataObject, ObjectFactory, ObjectHandle, Row, RowCursor, Session, SessionError,
    SessionProvider, Statement, Value,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

pub const SCHEMAS_SQL: &str = "SELECT schema_name FROM information_schema.schemata";
pub const TABLES_SQL: &str =
    "SELECT table_schema, table_name, table_comment FROM information_schema.tables";
pub const TABLE_LOOKUP_SQL: &str = "SELECT table_schema, table_name, table_comment FROM information_schema.tables WHERE table_schema = ? AND table_name = ?";
pub const COLUMNS_SQL: &str =
    "SELECT table_schema, table_name, column_name, ordinal_position FROM information_schema.columns";
pub const INDEXES_SQL: &str =
    "SELECT table_schema, table_name, index_name, column_name FROM information_schema.statistics";

#[derive(Debug, Clone)]
pub struct RemoteTable {
    pub name: String,
    pub comment: Option<String>,
    pub columns: Vec<String>,
    /// `(index name, column)` rows, one per indexed column.
    pub index_columns: Vec<(String, String)>,
}

#[derive(Debug, Default)]
struct CatalogState {
    schemas: Vec<(String, Vec<RemoteTable>)>,
    case_insensitive: bool,
    queries: usize,
    statements: Vec<String>,
    open_sessions: isize,
    fail_next: Option<SessionError>,
    unsupported: HashSet<&'static str>,
    cancel_after: Option<(usize, CancelToken)>,
    delay: Option<Duration>,
}

/// The remote side. Also serves as the cache owner.
#[derive(Debug, Default)]
pub struct FakeCatalog {
    state: Arc<Mutex<CatalogState>>,
}

impl FakeCatalog {
    /// A catalog whose name matching ignores case, like MSSQL or SQLite.
    pub fn case_insensitive() -> Arc<Self> {
        let catalog = Self::default();
        catalog.state.lock().case_insensitive = true;
        Arc::new(catalog)
    }

    pub fn case_sensitive() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_schema(&self, schema: &str) {
        let mut state = self.state.lock();
        if !state.schemas.iter().any(|(s, _)| s == schema) {
            state.schemas.push((schema.to_string(), Vec::new()));
        }
    }

    pub fn add_table(&self, schema: &str, table: &str, columns: &[&str]) {
        self.add_schema(schema);
        let mut state = self.state.lock();
        if let Some((_, tables)) = state.schemas.iter_mut().find(|(s, _)| s == schema) {
            tables.push(RemoteTable {
                name: table.to_string(),
                comment: None,
                columns: columns.iter().map(|c| c.to_string()).collect(),
                index_columns: Vec::new(),
            });
        }
    }

    pub fn add_index(&self, schema: &str, table: &str, index: &str, columns: &[&str]) {
        self.with_table(schema, table, |t| {
            for column in columns {
                t.index_columns.push((index.to_string(), column.to_string()));
            }
        });
    }

    pub fn drop_table(&self, schema: &str, table: &str) {
        let mut state = self.state.lock();
        if let Some((_, tables)) = state.schemas.iter_mut().find(|(s, _)| s == schema) {
            tables.retain(|t| t.name != table);
        }
    }

    pub fn rename_table(&self, schema: &str, table: &str, new_name: &str) {
        self.with_table(schema, table, |t| t.name = new_name.to_string());
    }

    pub fn set_comment(&self, schema: &str, table: &str, comment: &str) {
        self.with_table(schema, table, |t| t.comment = Some(comment.to_string()));
    }

    fn with_table(&self, schema: &str, table: &str, f: impl FnOnce(&mut RemoteTable)) {
        let mut state = self.state.lock();
        let table = state
            .schemas
            .iter_mut()
            .filter(|(s, _)| s == schema)
            .flat_map(|(_, tables)| tables.iter_mut())
            .find(|t| t.name == table);
        if let Some(table) = table {
            f(table);
        }
    }

    pub fn queries(&self) -> usize {
        self.state.lock().queries
    }

    pub fn statements(&self) -> Vec<String> {
        self.state.lock().statements.clone()
    }

    pub fn open_sessions(&self) -> isize {
        self.state.lock().open_sessions
    }

    /// The next query fails with `err`.
    pub fn fail_next(&self, err: SessionError) {
        self.state.lock().fail_next = Some(err);
    }

    /// Queries starting with `sql` report "feature not supported".
    pub fn unsupported(&self, sql: &'static str) {
        self.state.lock().unsupported.insert(sql);
    }

    /// Fires `token` once `rows` rows of the next result set were read.
    pub fn cancel_after(&self, rows: usize, token: CancelToken) {
        self.state.lock().cancel_after = Some((rows, token));
    }

    /// Every query takes at least `delay`.
    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().delay = Some(delay);
    }

    fn matches(state: &CatalogState, wanted: &str, actual: &str) -> bool {
        if state.case_insensitive {
            wanted.eq_ignore_ascii_case(actual)
        } else {
            wanted == actual
        }
    }

    fn answer(state: &CatalogState, statement: &Statement) -> Result<Vec<Row>, SessionError> {
        let params: Vec<&str> = statement.params.iter().filter_map(Value::as_str).collect();
        let sql = statement.sql.as_str();
        let mut rows = Vec::new();

        if sql.starts_with(SCHEMAS_SQL) {
            for (schema, _) in &state.schemas {
                if params.first().map_or(true, |p| Self::matches(state, p, schema)) {
                    rows.push(Row::from_pairs([("schema_name", schema.as_str())]));
                }
            }
        } else if sql.starts_with(TABLES_SQL) {
            for (schema, table) in Self::tables(state, &params) {
                rows.push(Row::from_pairs([
                    ("table_schema", Value::from(schema)),
                    ("table_name", Value::from(table.name.as_str())),
                    ("table_comment", Value::from(table.comment.clone())),
                ]));
            }
        } else if sql.starts_with(COLUMNS_SQL) {
            let (tables, column) = match params.len() {
                3 => (&params[..2], Some(params[2])),
                _ => (&params[..], None),
            };
            for (schema, table) in Self::tables(state, tables) {
                for (pos, name) in table.columns.iter().enumerate() {
                    if column.map_or(true, |c| Self::matches(state, c, name)) {
                        rows.push(Row::from_pairs([
                            ("table_schema", Value::from(schema)),
                            ("table_name", Value::from(table.name.as_str())),
                            ("column_name", Value::from(name.as_str())),
                            ("ordinal_position", Value::Int(pos as i64 + 1)),
                        ]));
                    }
                }
            }
        } else if sql.starts_with(INDEXES_SQL) {
            for (schema, table) in Self::tables(state, &params) {
                for (index, column) in &table.index_columns {
                    rows.push(Row::from_pairs([
                        ("table_schema", schema),
                        ("table_name", table.name.as_str()),
                        ("index_name", index.as_str()),
                        ("column_name", column.as_str()),
                    ]));
                }
            }
        } else {
            return Err(SessionError::sql(format!("unknown statement: {sql}")));
        }
        Ok(rows)
    }

    /// Tables filtered by up to two params: schema, then table name.
    fn tables<'a>(state: &'a CatalogState, params: &[&str]) -> Vec<(&'a str, &'a RemoteTable)> {
        state
            .schemas
            .iter()
            .filter(|(schema, _)| params.first().map_or(true, |p| Self::matches(state, p, schema)))
            .flat_map(|(schema, tables)| tables.iter().map(move |t| (schema.as_str(), t)))
            .filter(|(_, t)| params.get(1).map_or(true, |p| Self::matches(state, p, &t.name)))
            .collect()
    }
}

impl SessionProvider<FakeCatalog> for FakeCatalog {
    fn open(&self, _owner: &FakeCatalog, _purpose: &str) -> Result<Box<dyn Session>, SessionError> {
        self.state.lock().open_sessions += 1;
        Ok(Box::new(FakeSession {
            state: Arc::clone(&self.state),
        }))
    }
}

struct FakeSession {
    state: Arc<Mutex<CatalogState>>,
}

impl Session for FakeSession {
    fn query(
        &mut self,
        statement: &Statement,
        cancel: &CancelToken,
    ) -> Result<Box<dyn RowCursor>, SessionError> {
        let delay = self.state.lock().delay;
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        if cancel.is_cancelled() {
            return Err(SessionError::Cancelled);
        }

        let mut state = self.state.lock();
        state.queries += 1;
        state.statements.push(statement.to_string());
        if let Some(err) = state.fail_next.take() {
            return Err(err);
        }
        if state
            .unsupported
            .iter()
            .any(|sql| statement.sql.starts_with(sql))
        {
            return Err(SessionError::FeatureNotSupported(statement.sql.clone()));
        }
        let rows = FakeCatalog::answer(&state, statement)?;
        Ok(Box::new(FakeCursor {
            rows: rows.into_iter(),
            read: 0,
            cancel_after: state.cancel_after.take(),
        }))
    }

    fn close(&mut self) {
        self.state.lock().open_sessions -= 1;
    }
}

struct FakeCursor {
    rows: std::vec::IntoIter<Row>,
    read: usize,
    cancel_after: Option<(usize, CancelToken)>,
}

impl RowCursor for FakeCursor {
    fn next_row(&mut self) -> Result<Option<Row>, SessionError> {
        if let Some((limit, token)) = &self.cancel_after {
            if self.read >= *limit {
                token.cancel();
            }
        }
        self.read += 1;
        Ok(self.rows.next())
    }
}

// Domain objects

#[derive(Debug, Clone, PartialEq)]
pub struct Database {
    pub name: String,
}

impl MetadataObject for Database {
    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    pub name: String,
}

impl MetadataObject for Schema {
    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub schema: String,
    pub name: String,
    pub comment: Option<String>,
    pub persisted: bool,
    /// Local-only state that must survive refreshes.
    pub pinned: bool,
}

impl Table {
    pub fn draft(schema: &str, name: &str) -> Self {
        Self {
            schema: schema.to_string(),
            name: name.to_string(),
            comment: None,
            persisted: false,
            pinned: false,
        }
    }
}

impl MetadataObject for Table {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_persisted(&self) -> bool {
        self.persisted
    }

    fn merge_from(&mut self, fresh: Self) {
        let pinned = self.pinned;
        *self = fresh;
        self.pinned = pinned;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub position: i64,
}

impl MetadataObject for Column {
    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Index {
    pub name: String,
    pub columns: Vec<String>,
}

impl MetadataObject for Index {
    fn name(&self) -> &str {
        &self.name
    }
}

// Factories

pub struct SchemaFactory;

impl ObjectFactory<FakeCatalog, Database, Schema> for SchemaFactory {
    fn prepare_objects(&self, _owner: &FakeCatalog, _parent: Option<&ObjectHandle<Database>>) -> Statement {
        Statement::new(SCHEMAS_SQL)
    }

    fn prepare_lookup(
        &self,
        _owner: &FakeCatalog,
        _parent: Option<&ObjectHandle<Database>>,
        name: &str,
    ) -> Option<Statement> {
        Some(Statement::new(format!("{SCHEMAS_SQL} WHERE schema_name = ?")).bind(name))
    }

    fn key_columns(&self, _parent: Option<&ObjectHandle<Database>>) -> KeyColumns {
        KeyColumns::child_only("schema_name")
    }

    fn create(
        &self,
        _session: &mut dyn Session,
        _owner: &FakeCatalog,
        _parent: &ObjectHandle<Database>,
        row: &Row,
    ) -> Result<Option<Schema>, CacheError> {
        Ok(row.get_str("schema_name").map(|name| Schema {
            name: name.to_string(),
        }))
    }
}

#[derive(Default)]
pub struct TableFactory {
    /// Whether targeted lookups are offered.
    pub no_lookup: bool,
}

impl ObjectFactory<FakeCatalog, Schema, Table> for TableFactory {
    fn prepare_objects(&self, _owner: &FakeCatalog, parent: Option<&ObjectHandle<Schema>>) -> Statement {
        match parent {
            Some(schema) => {
                Statement::new(format!("{TABLES_SQL} WHERE table_schema = ?")).bind(schema.name())
            }
            None => Statement::new(TABLES_SQL),
        }
    }

    fn prepare_lookup(
        &self,
        _owner: &FakeCatalog,
        parent: Option<&ObjectHandle<Schema>>,
        name: &str,
    ) -> Option<Statement> {
        if self.no_lookup {
            return None;
        }
        let schema = parent?;
        Some(
            Statement::new(TABLE_LOOKUP_SQL)
                .bind(schema.name())
                .bind(name),
        )
    }

    fn key_columns(&self, _parent: Option<&ObjectHandle<Schema>>) -> KeyColumns {
        KeyColumns::new("table_schema", "table_name")
    }

    fn create(
        &self,
        _session: &mut dyn Session,
        _owner: &FakeCatalog,
        parent: &ObjectHandle<Schema>,
        row: &Row,
    ) -> Result<Option<Table>, CacheError> {
        let name = row
            .get_str("table_name")
            .ok_or_else(|| CacheError::Factory("table row without name".into()))?;
        Ok(Some(Table {
            schema: parent.name(),
            name: name.to_string(),
            comment: row.get_str("table_comment").map(str::to_string),
            persisted: true,
            pinned: false,
        }))
    }
}

pub struct ColumnFactory;

impl ObjectFactory<FakeCatalog, Table, Column> for ColumnFactory {
    fn prepare_objects(&self, _owner: &FakeCatalog, parent: Option<&ObjectHandle<Table>>) -> Statement {
        match parent {
            Some(table) => {
                let table = table.read();
                Statement::new(format!("{COLUMNS_SQL} WHERE table_schema = ? AND table_name = ?"))
                    .bind(table.schema.as_str())
                    .bind(table.name.as_str())
            }
            None => Statement::new(COLUMNS_SQL),
        }
    }

    fn prepare_lookup(
        &self,
        _owner: &FakeCatalog,
        parent: Option<&ObjectHandle<Table>>,
        name: &str,
    ) -> Option<Statement> {
        let table = parent?.read();
        Some(
            Statement::new(format!(
                "{COLUMNS_SQL} WHERE table_schema = ? AND table_name = ? AND column_name = ?"
            ))
            .bind(table.schema.as_str())
            .bind(table.name.as_str())
            .bind(name),
        )
    }

    fn key_columns(&self, _parent: Option<&ObjectHandle<Table>>) -> KeyColumns {
        KeyColumns::new("table_name", "column_name")
    }

    fn parent_key(&self, parent: &Table) -> String {
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
        _owner: &FakeCatalog,
        _parent: &ObjectHandle<Table>,
        row: &Row,
    ) -> Result<Option<Column>, CacheError> {
        Ok(row.get_str("column_name").map(|name| Column {
            name: name.to_string(),
            position: row.get_i64("ordinal_position").unwrap_or_default(),
        }))
    }
}

/// Indexes arrive as one row per indexed column.
pub struct IndexFactory;

impl ObjectFactory<FakeCatalog, Table, Index> for IndexFactory {
    fn prepare_objects(&self, _owner: &FakeCatalog, parent: Option<&ObjectHandle<Table>>) -> Statement {
        match parent {
            Some(table) => {
                let table = table.read();
                Statement::new(format!("{INDEXES_SQL} WHERE table_schema = ? AND table_name = ?"))
                    .bind(table.schema.as_str())
                    .bind(table.name.as_str())
            }
            None => Statement::new(INDEXES_SQL),
        }
    }

    fn key_columns(&self, _parent: Option<&ObjectHandle<Table>>) -> KeyColumns {
        KeyColumns::new("table_name", "index_name")
    }

    fn parent_key(&self, parent: &Table) -> String {
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
        _owner: &FakeCatalog,
        _parent: &ObjectHandle<Table>,
        row: &Row,
    ) -> Result<Option<Index>, CacheError> {
        Ok(row.get_str("index_name").map(|name| Index {
            name: name.to_string(),
            columns: row.get_str("column_name").map(str::to_string).into_iter().collect(),
        }))
    }

    fn absorb_row(&self, index: &mut Index, row: &Row) -> Result<bool, CacheError> {
        if let Some(column) = row.get_str("column_name") {
            index.columns.push(column.to_string());
        }
        Ok(true)
    }
}

// Cache wiring

pub type SchemaCache = MetadataCache<FakeCatalog, Database, Schema>;
pub type TableCache = MetadataCache<FakeCatalog, Schema, Table>;
pub type ColumnCache = MetadataCache<FakeCatalog, Table, Column>;
pub type IndexCache = MetadataCache<FakeCatalog, Table, Index>;

pub struct Caches {
    pub catalog: Arc<FakeCatalog>,
    pub schemas: Arc<SchemaCache>,
    pub tables: Arc<TableCache>,
    pub columns: Arc<ColumnCache>,
    pub indexes: Arc<IndexCache>,
}

impl Caches {
    pub fn new(catalog: Arc<FakeCatalog>, dialect: Dialect) -> Self {
        Self::with_options(catalog, dialect, CacheOptions::default(), TableFactory::default())
    }

    pub fn with_options(
        catalog: Arc<FakeCatalog>,
        dialect: Dialect,
        options: CacheOptions,
        tables: TableFactory,
    ) -> Self {
        let root = FixedParents::single(ObjectHandle::new(Database {
            name: "db".to_string(),
        }));
        let schemas = MetadataCache::new(
            Arc::new(SchemaFactory),
            catalog.clone(),
            Arc::new(root),
            dialect,
            options.clone(),
        );
        let tables = MetadataCache::new(
            Arc::new(tables),
            catalog.clone(),
            schemas.clone(),
            dialect,
            options.clone(),
        );
        let columns = MetadataCache::new(
            Arc::new(ColumnFactory),
            catalog.clone(),
            tables.clone(),
            dialect,
            options.clone(),
        );
        let indexes = MetadataCache::new(
            Arc::new(IndexFactory),
            catalog.clone(),
            tables.clone(),
            dialect,
            options,
        );
        Self {
            catalog,
            schemas,
            tables,
            columns,
            indexes,
        }
    }

    pub fn owner(&self) -> &FakeCatalog {
        &self.catalog
    }

    pub fn schema(&self, name: &str) -> ObjectHandle<Schema> {
        self.schemas
            .get(&Default::default(), self.owner(), None, name)
            .unwrap()
            .unwrap_or_else(|| panic!("schema {name} exists"))
    }
}

pub fn names<T: MetadataObject>(handles: &[ObjectHandle<T>]) -> Vec<String> {
    handles.iter().map(ObjectHandle::name).collect()
}
