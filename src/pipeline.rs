//! The batch run: reset the schema, stage the raw sources, build the star schema.
//!
//! Warehouse tables are filled in a dependency order computed from [`Stage`]
//! dependencies. Each stage runs in its own transaction.

use std::fmt;

use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use petgraph::{Directed, Direction, Graph};
use thiserror::Error;

use crate::config::{Config, ConfigError, Sources};
use crate::db::ddl::{self, TableDef};
use crate::db::{IntegrityViolation, Warehouse, WarehouseError, repository};
use crate::staging::{
    CopyOutcome, CopyRequest, LoadError, StagingLoader, StagingTable, TimeFormat,
};
use crate::transform::{self, TransformError};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Warehouse error: {0}")]
    Warehouse(#[from] WarehouseError),

    #[error("Staging load failed: {0}")]
    Load(#[from] LoadError),

    #[error("Building {stage} failed: {source}")]
    Transform {
        stage: Stage,
        #[source]
        source: TransformError,
    },

    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("Stage dependencies contain a cycle")]
    CyclicStages,

    #[error("Referential integrity violated: {}", describe_violations(.0))]
    Integrity(Vec<IntegrityViolation>),
}

fn describe_violations(violations: &[IntegrityViolation]) -> String {
    violations
        .iter()
        .map(|v| {
            format!(
                "{} songplays with no {} row for {}",
                v.orphaned_rows, v.referenced_table, v.column
            )
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// One insert step of the star schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Artists,
    Songs,
    Users,
    Songplays,
    Time,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Artists,
        Stage::Songs,
        Stage::Users,
        Stage::Songplays,
        Stage::Time,
    ];

    pub fn table(self) -> &'static TableDef {
        match self {
            Stage::Artists => &ddl::ARTISTS,
            Stage::Songs => &ddl::SONGS,
            Stage::Users => &ddl::USERS,
            Stage::Songplays => &ddl::SONGPLAYS,
            Stage::Time => &ddl::TIME,
        }
    }

    /// Stages whose rows must exist before this one runs.
    pub fn depends_on(self) -> &'static [Stage] {
        match self {
            Stage::Artists | Stage::Users => &[],
            Stage::Songs => &[Stage::Artists],
            Stage::Songplays => &[Stage::Artists, Stage::Songs, Stage::Users],
            // Time rows are derived from the fact table.
            Stage::Time => &[Stage::Songplays],
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table().name)
    }
}

/// Topologically order `stages`, breaking ties by their position in the slice.
fn topological_order<F>(stages: &[Stage], depends_on: F) -> Result<Vec<Stage>, PipelineError>
where
    F: Fn(Stage) -> &'static [Stage],
{
    let mut graph = Graph::<Stage, (), Directed>::new();
    let nodes: Vec<_> = stages.iter().map(|&s| graph.add_node(s)).collect();
    let index_of = |stage: Stage| stages.iter().position(|&s| s == stage);

    for (&stage, &node) in stages.iter().zip(&nodes) {
        for &dependency in depends_on(stage) {
            if let Some(dep) = index_of(dependency) {
                graph.add_edge(nodes[dep], node, ());
            }
        }
    }

    // petgraph's toposort and Topo visit ready nodes in their own order, not slice order.
    // A pass that finds no ready stage means the rest form a cycle.
    let mut remaining: Vec<usize> = nodes
        .iter()
        .map(|&n| graph.neighbors_directed(n, Direction::Incoming).count())
        .collect();
    let mut done = vec![false; nodes.len()];
    let mut order = Vec::with_capacity(nodes.len());

    while order.len() < nodes.len() {
        let next = (0..nodes.len())
            .find(|&i| !done[i] && remaining[i] == 0)
            .ok_or(PipelineError::CyclicStages)?;
        done[next] = true;
        order.push(graph[nodes[next]]);
        for successor in graph.neighbors_directed(nodes[next], Direction::Outgoing) {
            remaining[successor.index()] -= 1;
        }
    }
    Ok(order)
}

/// The order in which warehouse tables are filled.
pub fn insert_order() -> Result<Vec<Stage>, PipelineError> {
    topological_order(&Stage::ALL, Stage::depends_on)
}

/// Rows written by one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOutcome {
    pub stage: Stage,
    pub rows: usize,
}

/// Summary of a full run.
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub copies: Vec<CopyOutcome>,
    pub stages: Vec<StageOutcome>,
    /// Song plays with no catalog match.
    pub unmatched: usize,
    /// Song plays matching several catalog songs.
    pub ambiguous: usize,
}

impl LoadReport {
    pub fn rows_for(&self, stage: Stage) -> usize {
        self.stages
            .iter()
            .find(|o| o.stage == stage)
            .map_or(0, |o| o.rows)
    }

    pub fn rejected_rows(&self) -> usize {
        self.copies.iter().map(|c| c.rejected.len()).sum()
    }
}

/// Drives a run against one warehouse session.
pub struct Pipeline<'a> {
    config: &'a Config,
    sources: Sources,
    loader: StagingLoader,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a Config) -> Result<Self, PipelineError> {
        Ok(Self {
            config,
            sources: config.sources()?,
            loader: StagingLoader::new(config.load.object_store_root.clone()),
        })
    }

    /// Drop and recreate every table.
    pub fn create_tables(&self, warehouse: &mut Warehouse) -> Result<(), PipelineError> {
        tracing::info!("Resetting warehouse schema");
        warehouse.reset_schema()?;
        Ok(())
    }

    /// Bulk-copy event logs and the song catalog into staging.
    pub fn load_staging(
        &self,
        warehouse: &mut Warehouse,
    ) -> Result<Vec<CopyOutcome>, PipelineError> {
        let event_layout = self
            .loader
            .resolve_layout(self.sources.log_jsonpath.as_ref())?;

        let requests = [
            CopyRequest {
                table: StagingTable::Events,
                source: self.sources.log_data.clone(),
                layout: event_layout,
                credentials: self.config.credentials(),
                region: self.config.s3.region.clone(),
                time_format: TimeFormat::EpochMillis,
                tolerance: self.config.tolerance(),
            },
            CopyRequest {
                table: StagingTable::Songs,
                source: self.sources.song_data.clone(),
                layout: Default::default(),
                credentials: self.config.credentials(),
                region: self.config.s3.region.clone(),
                time_format: TimeFormat::EpochMillis,
                tolerance: self.config.tolerance(),
            },
        ];

        let mut outcomes = Vec::with_capacity(requests.len());
        for request in &requests {
            outcomes.push(self.loader.copy(warehouse.conn(), request)?);
        }
        Ok(outcomes)
    }

    /// Fill the dimension and fact tables from staging.
    pub fn insert_tables(&self, warehouse: &mut Warehouse) -> Result<LoadReport, PipelineError> {
        let mut report = LoadReport::default();
        for stage in insert_order()? {
            let rows = warehouse
                .conn()
                .transaction::<_, PipelineError, _>(|conn| run_stage(conn, stage, &mut report))?;
            tracing::info!("Inserted {} rows into {}", rows, stage);
            report.stages.push(StageOutcome { stage, rows });
        }
        Ok(report)
    }

    /// Check that every songplay resolves to its dimension rows.
    pub fn verify(&self, warehouse: &mut Warehouse) -> Result<(), PipelineError> {
        let violations = repository::find_integrity_violations(warehouse.conn())?;
        if violations.is_empty() {
            tracing::debug!("Referential integrity verified");
            Ok(())
        } else {
            Err(PipelineError::Integrity(violations))
        }
    }

    /// Reset, stage, insert and verify.
    pub fn run(&self, warehouse: &mut Warehouse) -> Result<LoadReport, PipelineError> {
        self.create_tables(warehouse)?;
        let copies = self.load_staging(warehouse)?;
        let mut report = self.insert_tables(warehouse)?;
        report.copies = copies;
        self.verify(warehouse)?;
        Ok(report)
    }
}

fn run_stage(
    conn: &mut SqliteConnection,
    stage: Stage,
    report: &mut LoadReport,
) -> Result<usize, PipelineError> {
    let failed = |source| PipelineError::Transform { stage, source };

    let rows = match stage {
        Stage::Artists => {
            let songs = repository::load_staging_songs(conn)?;
            let rows = transform::build_artists(&songs).map_err(failed)?;
            repository::insert_artists(conn, &rows)?
        }
        Stage::Songs => {
            let songs = repository::load_staging_songs(conn)?;
            let rows = transform::build_songs(&songs).map_err(failed)?;
            repository::insert_songs(conn, &rows)?
        }
        Stage::Users => {
            let events = repository::load_staging_events(conn)?;
            let rows = transform::build_users(&events).map_err(failed)?;
            repository::insert_users(conn, &rows)?
        }
        Stage::Songplays => {
            let events = repository::load_song_play_events(conn)?;
            let songs = repository::load_staging_songs(conn)?;
            let build = transform::build_songplays(&events, &songs).map_err(failed)?;
            if build.unmatched > 0 || build.ambiguous > 0 {
                tracing::info!(
                    "{} song plays unmatched, {} ambiguous",
                    build.unmatched,
                    build.ambiguous
                );
            }
            report.unmatched = build.unmatched;
            report.ambiguous = build.ambiguous;
            repository::insert_songplays(conn, &build.rows)?
        }
        Stage::Time => {
            let timestamps = repository::songplay_timestamps(conn)?;
            let rows = transform::build_time(&timestamps);
            repository::insert_time(conn, &rows)?
        }
    };
    Ok(rows)
}
