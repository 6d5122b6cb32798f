//! Identifier rules per SQL dialect.
//!
//! Every cached object is keyed by a folded form of its name. How a name folds,
//! whether a lookup may match a different case, and how quoting is recognised all
//! depend on the remote dialect. [`NameRules`] is the capability the stores consume;
//! [`IdentifierRules`] is the implementation derived from a [`Dialect`] and an
//! optional [`CaseSensitivity`] override.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// SQL dialect of the remote data source.
///
/// Different dialects fold unquoted identifiers differently and use different
/// delimiters for quoted identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Generic,
    Ansi,
    Bigquery,
    Clickhouse,
    Databricks,
    Duckdb,
    Hive,
    Mssql,
    Mysql,
    Postgres,
    Redshift,
    Snowflake,
    Sqlite,
}

impl Dialect {
    pub fn to_sqlparser_dialect(&self) -> Box<dyn sqlparser::dialect::Dialect> {
        use sqlparser::dialect::{
            AnsiDialect, BigQueryDialect, ClickHouseDialect, DatabricksDialect, DuckDbDialect,
            GenericDialect, HiveDialect, MsSqlDialect, MySqlDialect, PostgreSqlDialect,
            RedshiftSqlDialect, SQLiteDialect, SnowflakeDialect,
        };
        match self {
            Self::Generic => Box::new(GenericDialect {}),
            Self::Ansi => Box::new(AnsiDialect {}),
            Self::Bigquery => Box::new(BigQueryDialect {}),
            Self::Clickhouse => Box::new(ClickHouseDialect {}),
            Self::Databricks => Box::new(DatabricksDialect {}),
            Self::Duckdb => Box::new(DuckDbDialect {}),
            Self::Hive => Box::new(HiveDialect {}),
            Self::Mssql => Box::new(MsSqlDialect {}),
            Self::Mysql => Box::new(MySqlDialect {}),
            Self::Postgres => Box::new(PostgreSqlDialect {}),
            Self::Redshift => Box::new(RedshiftSqlDialect {}),
            Self::Snowflake => Box::new(SnowflakeDialect {}),
            Self::Sqlite => Box::new(SQLiteDialect {}),
        }
    }

    /// Get the normalization strategy for this dialect.
    pub const fn normalization_strategy(&self) -> NormalizationStrategy {
        match self {
            Dialect::Bigquery => NormalizationStrategy::CaseInsensitive,
            Dialect::Clickhouse => NormalizationStrategy::CaseSensitive,
            Dialect::Databricks => NormalizationStrategy::CaseInsensitive,
            Dialect::Duckdb => NormalizationStrategy::CaseInsensitive,
            Dialect::Hive => NormalizationStrategy::CaseInsensitive,
            Dialect::Mssql => NormalizationStrategy::CaseInsensitive,
            Dialect::Mysql => NormalizationStrategy::CaseSensitive,
            Dialect::Postgres => NormalizationStrategy::Lowercase,
            Dialect::Redshift => NormalizationStrategy::CaseInsensitive,
            Dialect::Snowflake => NormalizationStrategy::Uppercase,
            Dialect::Sqlite => NormalizationStrategy::CaseInsensitive,
            Dialect::Generic => NormalizationStrategy::CaseInsensitive,
            Dialect::Ansi => NormalizationStrategy::Uppercase,
        }
    }

    /// Get the case sensitivity behavior for this dialect.
    pub fn default_case_sensitivity(&self) -> CaseSensitivity {
        match self.normalization_strategy() {
            NormalizationStrategy::Lowercase => CaseSensitivity::Lower,
            NormalizationStrategy::Uppercase => CaseSensitivity::Upper,
            NormalizationStrategy::CaseSensitive => CaseSensitivity::Exact,
            // CaseInsensitive dialects use lowercase folding for comparison
            NormalizationStrategy::CaseInsensitive => CaseSensitivity::Lower,
        }
    }
}

/// Normalization strategy for identifier handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalizationStrategy {
    /// Fold to lowercase (Postgres, Redshift)
    Lowercase,
    /// Fold to uppercase (Snowflake, Oracle)
    Uppercase,
    /// Case-insensitive comparison without folding
    CaseInsensitive,
    /// Case-sensitive, preserve exactly
    CaseSensitive,
}

impl NormalizationStrategy {
    /// Applies this normalization strategy to a string.
    ///
    /// Returns a `Cow<str>` to avoid allocation when the string is already in the
    /// folded form. `CaseInsensitive` uses lowercase folding as the canonical form.
    ///
    /// ```
    /// use std::borrow::Cow;
    /// use metacache_core::NormalizationStrategy;
    ///
    /// assert_eq!(NormalizationStrategy::Lowercase.apply("MyTable"), "mytable");
    /// assert!(matches!(
    ///     NormalizationStrategy::CaseSensitive.apply("MyTable"),
    ///     Cow::Borrowed(_)
    /// ));
    /// ```
    pub fn apply<'a>(&self, s: &'a str) -> Cow<'a, str> {
        match self {
            Self::CaseSensitive => Cow::Borrowed(s),
            Self::Lowercase | Self::CaseInsensitive => {
                if s.chars().any(|c| c.is_uppercase()) {
                    Cow::Owned(s.to_lowercase())
                } else {
                    Cow::Borrowed(s)
                }
            }
            Self::Uppercase => {
                if s.chars().any(|c| c.is_lowercase()) {
                    Cow::Owned(s.to_uppercase())
                } else {
                    Cow::Borrowed(s)
                }
            }
        }
    }

    /// True when two names differing only by case designate the same object.
    pub const fn is_case_insensitive(&self) -> bool {
        !matches!(self, Self::CaseSensitive)
    }
}

/// Case sensitivity override for identifier normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum CaseSensitivity {
    /// Use dialect default
    #[default]
    Dialect,
    /// Lowercase normalization (Postgres)
    Lower,
    /// Uppercase normalization (Snowflake)
    Upper,
    /// Case-sensitive as-is (MySQL on Linux)
    Exact,
}

impl CaseSensitivity {
    /// Resolves this setting to a concrete normalization strategy.
    ///
    /// When `self` is `Dialect`, uses the dialect's default strategy.
    pub fn resolve(&self, dialect: Dialect) -> NormalizationStrategy {
        match self {
            Self::Dialect => dialect.normalization_strategy(),
            Self::Lower => NormalizationStrategy::Lowercase,
            Self::Upper => NormalizationStrategy::Uppercase,
            Self::Exact => NormalizationStrategy::CaseSensitive,
        }
    }
}

/// Naming capability consumed by the stores and loaders.
pub trait NameRules: fmt::Debug + Send + Sync {
    /// Folds an unquoted name to the form used as a store key.
    fn fold_case<'a>(&self, name: &'a str) -> Cow<'a, str>;

    /// True when the remote matches names without regard to case.
    fn is_case_insensitive_match(&self) -> bool;

    /// True when `name` is wrapped in this dialect's identifier delimiters.
    fn is_quoted_identifier(&self, name: &str) -> bool;

    /// Strips identifier delimiters, collapsing escaped (doubled) closing delimiters.
    fn unquote<'a>(&self, name: &'a str) -> Cow<'a, str>;

    /// The key a name is stored and looked up under.
    fn lookup_key(&self, name: &str) -> String {
        if self.is_quoted_identifier(name) {
            let unquoted = self.unquote(name);
            self.fold_case(&unquoted).into_owned()
        } else {
            self.fold_case(name).into_owned()
        }
    }

    /// True when `candidate` satisfies a lookup for `requested`.
    fn names_match(&self, requested: &str, candidate: &str) -> bool {
        if self.is_case_insensitive_match() {
            self.lookup_key(requested) == self.lookup_key(candidate)
        } else {
            self.unquote(requested) == candidate
        }
    }
}

/// [`NameRules`] derived from a dialect's normalization strategy and quoting syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentifierRules {
    dialect: Dialect,
    strategy: NormalizationStrategy,
}

impl IdentifierRules {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            strategy: dialect.normalization_strategy(),
        }
    }

    /// Applies an explicit case sensitivity override.
    pub fn with_case_sensitivity(mut self, case_sensitivity: CaseSensitivity) -> Self {
        self.strategy = case_sensitivity.resolve(self.dialect);
        self
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn strategy(&self) -> NormalizationStrategy {
        self.strategy
    }

    fn closing_delimiter(&self, first: char) -> Option<char> {
        if !self.dialect.to_sqlparser_dialect().is_delimited_identifier_start(first) {
            return None;
        }
        Some(if first == '[' { ']' } else { first })
    }
}

impl Default for IdentifierRules {
    fn default() -> Self {
        Self::new(Dialect::Generic)
    }
}

impl NameRules for IdentifierRules {
    fn fold_case<'a>(&self, name: &'a str) -> Cow<'a, str> {
        self.strategy.apply(name)
    }

    fn is_case_insensitive_match(&self) -> bool {
        self.strategy.is_case_insensitive()
    }

    fn is_quoted_identifier(&self, name: &str) -> bool {
        let trimmed = name.trim();
        let mut chars = trimmed.chars();
        let (Some(first), Some(last)) = (chars.next(), chars.next_back()) else {
            return false;
        };
        self.closing_delimiter(first) == Some(last)
    }

    fn unquote<'a>(&self, name: &'a str) -> Cow<'a, str> {
        if !self.is_quoted_identifier(name) {
            return Cow::Borrowed(name);
        }
        let trimmed = name.trim();
        let mut chars = trimmed.chars();
        let first = chars.next();
        let last = chars.next_back();
        let inner = chars.as_str();
        match (first.and_then(|c| self.closing_delimiter(c)), last) {
            (Some(close), Some(_)) => {
                let escaped: String = [close, close].iter().collect();
                if inner.contains(&escaped) {
                    Cow::Owned(inner.replace(&escaped, &close.to_string()))
                } else {
                    Cow::Borrowed(inner)
                }
            }
            _ => Cow::Borrowed(trimmed),
        }
    }
}
