//! Declarative table catalog and DDL rendering.
//!
//! Every table the loader touches is described once here. The diesel
//! `table!` definitions in [`crate::db::schema`] mirror these shapes.

use std::fmt::Write as _;

/// Semantic column type, rendered to a SQLite type name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    /// Load-ordered surrogate row id (`INTEGER PRIMARY KEY`).
    RowId,
    Varchar(Option<u16>),
    Char(u16),
    Integer,
    BigInt,
    Numeric { precision: u8, scale: u8 },
    Timestamp,
    Time,
}

impl SqlType {
    fn render(&self) -> String {
        match self {
            SqlType::RowId => "INTEGER".to_string(),
            SqlType::Varchar(None) => "VARCHAR".to_string(),
            SqlType::Varchar(Some(len)) => format!("VARCHAR({len})"),
            SqlType::Char(len) => format!("CHAR({len})"),
            SqlType::Integer => "INT".to_string(),
            SqlType::BigInt => "BIGINT".to_string(),
            SqlType::Numeric { precision, scale } => format!("NUMERIC({precision},{scale})"),
            SqlType::Timestamp => "TIMESTAMP".to_string(),
            SqlType::Time => "TIME".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignKey {
    pub table: &'static str,
    pub column: &'static str,
}

/// One column of a [`TableDef`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: &'static str,
    pub sql_type: SqlType,
    pub non_null: bool,
    pub primary_key: bool,
    pub references: Option<ForeignKey>,
    /// Key looked up in a source record when loading with the `auto` layout.
    pub source_key: Option<&'static str>,
}

impl ColumnDef {
    pub const fn new(name: &'static str, sql_type: SqlType) -> Self {
        Self {
            name,
            sql_type,
            non_null: false,
            primary_key: false,
            references: None,
            source_key: None,
        }
    }

    pub const fn not_null(mut self) -> Self {
        self.non_null = true;
        self
    }

    pub const fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.non_null = true;
        self
    }

    pub const fn references(mut self, table: &'static str, column: &'static str) -> Self {
        self.references = Some(ForeignKey { table, column });
        self
    }

    pub const fn source_key(mut self, key: &'static str) -> Self {
        self.source_key = Some(key);
        self
    }

    /// Key used to find this column in a JSON record.
    pub fn json_key(&self) -> &'static str {
        self.source_key.unwrap_or(self.name)
    }

    /// Whether the loader fills this column from source data.
    pub fn is_loaded(&self) -> bool {
        self.sql_type != SqlType::RowId
    }

    fn render(&self) -> String {
        let mut sql = format!("{} {}", quote(self.name), self.sql_type.render());
        if self.primary_key {
            sql.push_str(" PRIMARY KEY");
        }
        if self.non_null {
            sql.push_str(" NOT NULL");
        }
        if let Some(fk) = self.references {
            let _ = write!(sql, " REFERENCES {}({})", quote(fk.table), quote(fk.column));
        }
        sql
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Staging,
    Dimension,
    Fact,
}

/// Physical distribution hint. Carried for documentation; SQLite ignores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Distribution {
    Even,
    All,
    Key(&'static str),
}

pub struct TableDef {
    pub name: &'static str,
    pub kind: TableKind,
    pub columns: &'static [ColumnDef],
    pub distribution: Distribution,
    pub sort_key: &'static [&'static str],
}

impl TableDef {
    pub fn drop_statement(&self) -> String {
        format!("DROP TABLE IF EXISTS {}", quote(self.name))
    }

    /// `CREATE TABLE IF NOT EXISTS` plus the sort-key index, if any.
    pub fn create_statements(&self) -> Vec<String> {
        let columns = self
            .columns
            .iter()
            .map(ColumnDef::render)
            .collect::<Vec<_>>()
            .join(",\n    ");
        let mut statements = vec![format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
            quote(self.name),
            columns
        )];

        if !self.sort_key.is_empty() {
            statements.push(format!(
                "CREATE INDEX IF NOT EXISTS {} ON {}({})",
                quote(&format!("idx_{}_sortkey", self.name)),
                quote(self.name),
                self.sort_key
                    .iter()
                    .map(|c| quote(c))
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }
        statements
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Columns filled from source records, in declaration order.
    pub fn loaded_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns.iter().filter(|c| c.is_loaded())
    }

    /// Human-readable DDL including the layout hints as SQL comments.
    pub fn describe(&self) -> String {
        let mut out = format!("-- {} ({:?})\n", self.name, self.kind);
        let distribution = match self.distribution {
            Distribution::Even => "EVEN".to_string(),
            Distribution::All => "ALL".to_string(),
            Distribution::Key(column) => format!("KEY({column})"),
        };
        let _ = writeln!(out, "-- distribution: {distribution}");
        if !self.sort_key.is_empty() {
            let _ = writeln!(out, "-- sort key: ({})", self.sort_key.join(", "));
        }
        for statement in self.create_statements() {
            let _ = writeln!(out, "{statement};");
        }
        out
    }
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

// ============================================================================
// Catalog
// ============================================================================

const NUMERIC_10_5: SqlType = SqlType::Numeric {
    precision: 10,
    scale: 5,
};
const NUMERIC_8_5: SqlType = SqlType::Numeric {
    precision: 8,
    scale: 5,
};

pub const STAGING_EVENTS: TableDef = TableDef {
    name: "staging_events",
    kind: TableKind::Staging,
    columns: &[
        ColumnDef::new("event_id", SqlType::RowId).primary_key(),
        ColumnDef::new("artist", SqlType::Varchar(None)),
        ColumnDef::new("auth", SqlType::Varchar(None)),
        ColumnDef::new("first_name", SqlType::Varchar(None)).source_key("firstName"),
        ColumnDef::new("gender", SqlType::Varchar(None)),
        ColumnDef::new("item_in_session", SqlType::BigInt).source_key("itemInSession"),
        ColumnDef::new("last_name", SqlType::Varchar(None)).source_key("lastName"),
        ColumnDef::new("length", NUMERIC_10_5),
        ColumnDef::new("level", SqlType::Varchar(None)),
        ColumnDef::new("location", SqlType::Varchar(None)),
        ColumnDef::new("method", SqlType::Varchar(None)),
        ColumnDef::new("page", SqlType::Varchar(None)),
        ColumnDef::new("registration", SqlType::BigInt),
        ColumnDef::new("session_id", SqlType::BigInt).source_key("sessionId"),
        ColumnDef::new("song", SqlType::Varchar(None)),
        ColumnDef::new("status", SqlType::Integer),
        ColumnDef::new("ts", SqlType::Timestamp),
        ColumnDef::new("user_agent", SqlType::Varchar(None)).source_key("userAgent"),
        ColumnDef::new("user_id", SqlType::BigInt).source_key("userId"),
    ],
    distribution: Distribution::Even,
    sort_key: &[],
};

pub const STAGING_SONGS: TableDef = TableDef {
    name: "staging_songs",
    kind: TableKind::Staging,
    columns: &[
        ColumnDef::new("staging_song_id", SqlType::RowId).primary_key(),
        ColumnDef::new("artist_id", SqlType::Varchar(None)),
        ColumnDef::new("artist_latitude", NUMERIC_8_5),
        ColumnDef::new("artist_longitude", NUMERIC_8_5),
        ColumnDef::new("artist_location", SqlType::Varchar(None)),
        ColumnDef::new("artist_name", SqlType::Varchar(None)),
        ColumnDef::new("song_id", SqlType::Varchar(None)),
        ColumnDef::new("title", SqlType::Varchar(None)),
        ColumnDef::new("duration", NUMERIC_10_5),
        ColumnDef::new("year", SqlType::Integer),
    ],
    distribution: Distribution::Even,
    sort_key: &[],
};

pub const USERS: TableDef = TableDef {
    name: "users",
    kind: TableKind::Dimension,
    columns: &[
        ColumnDef::new("user_id", SqlType::BigInt).primary_key(),
        ColumnDef::new("first_name", SqlType::Varchar(None)).not_null(),
        ColumnDef::new("last_name", SqlType::Varchar(None)).not_null(),
        ColumnDef::new("gender", SqlType::Char(1)).not_null(),
        ColumnDef::new("level", SqlType::Varchar(Some(4))).not_null(),
    ],
    distribution: Distribution::All,
    sort_key: &["user_id"],
};

pub const ARTISTS: TableDef = TableDef {
    name: "artists",
    kind: TableKind::Dimension,
    columns: &[
        ColumnDef::new("artist_id", SqlType::Varchar(None)).primary_key(),
        ColumnDef::new("name", SqlType::Varchar(None)).not_null(),
        ColumnDef::new("location", SqlType::Varchar(None)),
        ColumnDef::new("latitude", NUMERIC_8_5),
        ColumnDef::new("longitude", NUMERIC_8_5),
    ],
    distribution: Distribution::Key("artist_id"),
    sort_key: &["artist_id"],
};

pub const SONGS: TableDef = TableDef {
    name: "songs",
    kind: TableKind::Dimension,
    columns: &[
        ColumnDef::new("song_id", SqlType::Varchar(None)).primary_key(),
        ColumnDef::new("title", SqlType::Varchar(None)).not_null(),
        ColumnDef::new("artist_id", SqlType::Varchar(None))
            .not_null()
            .references("artists", "artist_id"),
        ColumnDef::new("year", SqlType::Integer).not_null(),
        ColumnDef::new("duration", NUMERIC_10_5).not_null(),
    ],
    distribution: Distribution::All,
    sort_key: &["artist_id", "song_id"],
};

pub const TIME: TableDef = TableDef {
    name: "time",
    kind: TableKind::Dimension,
    columns: &[
        ColumnDef::new("timestamp", SqlType::Timestamp).primary_key(),
        ColumnDef::new("start_time", SqlType::Time).not_null(),
        ColumnDef::new("hour", SqlType::Integer).not_null(),
        ColumnDef::new("day", SqlType::Integer).not_null(),
        ColumnDef::new("week", SqlType::Integer).not_null(),
        ColumnDef::new("month", SqlType::Integer).not_null(),
        ColumnDef::new("year", SqlType::Integer).not_null(),
        ColumnDef::new("weekday", SqlType::Integer).not_null(),
    ],
    distribution: Distribution::Even,
    sort_key: &["timestamp"],
};

pub const SONGPLAYS: TableDef = TableDef {
    name: "songplays",
    kind: TableKind::Fact,
    columns: &[
        ColumnDef::new("songplay_id", SqlType::BigInt).primary_key(),
        ColumnDef::new("start_timestamp", SqlType::Timestamp)
            .not_null()
            .references("time", "timestamp"),
        ColumnDef::new("user_id", SqlType::BigInt)
            .not_null()
            .references("users", "user_id"),
        ColumnDef::new("level", SqlType::Varchar(Some(4))).not_null(),
        ColumnDef::new("song_id", SqlType::Varchar(None))
            .not_null()
            .references("songs", "song_id"),
        ColumnDef::new("artist_id", SqlType::Varchar(None))
            .not_null()
            .references("artists", "artist_id"),
        ColumnDef::new("session_id", SqlType::BigInt).not_null(),
        ColumnDef::new("location", SqlType::Varchar(None)).not_null(),
        ColumnDef::new("user_agent", SqlType::Varchar(Some(100))).not_null(),
    ],
    distribution: Distribution::Key("artist_id"),
    sort_key: &["start_timestamp", "user_id"],
};

/// All tables in creation order: every table follows the tables it references.
pub const CATALOG: [&TableDef; 7] = [
    &STAGING_EVENTS,
    &STAGING_SONGS,
    &USERS,
    &ARTISTS,
    &SONGS,
    &TIME,
    &SONGPLAYS,
];

/// Tables in the order they must be created.
pub fn create_order() -> impl Iterator<Item = &'static TableDef> {
    CATALOG.into_iter()
}

/// Tables in the order they must be dropped (referencing tables first).
pub fn drop_order() -> impl Iterator<Item = &'static TableDef> {
    CATALOG.into_iter().rev()
}
