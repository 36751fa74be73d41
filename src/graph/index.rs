//! SQLite-backed asset index: the production [`GraphDataSource`].
//!
//! A `rusqlite::Connection` may move between threads but must not be shared,
//! so an index is opened on the home thread and queried only from there.

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::db::{migrate, Db};
use crate::error::{RefgraphError, Result};
use crate::graph::{AssetMatch, AssetQuery, GraphDataSource, NodeInfo, NodeRef};

const DEPENDENCIES_SQL: &str =
    "SELECT target FROM asset_dependencies WHERE source = ?1 ORDER BY rowid";
const REFERENCERS_SQL: &str =
    "SELECT source FROM asset_dependencies WHERE target = ?1 ORDER BY rowid";
const DESCRIBE_SQL: &str = "SELECT name, class FROM assets WHERE path = ?1";
const SEARCH_SQL: &str = "SELECT path, name, class FROM assets ORDER BY path";

/// Graph data source reading the `assets` / `asset_dependencies` tables.
pub struct SqliteAssetIndex {
    conn: Connection,
}

impl SqliteAssetIndex {
    /// Open the index stored in `db`. Fails if migrations have not been run.
    pub fn open(db: &Db) -> Result<Self> {
        Self::from_connection(db.open_connection()?)
    }

    pub fn from_connection(conn: Connection) -> Result<Self> {
        let missing = migrate::missing_tables(&conn)?;
        if !missing.is_empty() {
            return Err(RefgraphError::Config(format!(
                "Asset index is missing tables: {} (run migrations first)",
                missing.join(", ")
            )));
        }
        Ok(Self { conn })
    }

    fn query_paths(&self, sql: &str, node: &str) -> Result<Vec<NodeRef>> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let rows = stmt
            .query_map([node], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
        Ok(rows)
    }
}

impl GraphDataSource for SqliteAssetIndex {
    fn dependencies(&self, node: &str) -> Result<Vec<NodeRef>> {
        self.query_paths(DEPENDENCIES_SQL, node)
    }

    fn referencers(&self, node: &str) -> Result<Vec<NodeRef>> {
        self.query_paths(REFERENCERS_SQL, node)
    }

    fn describe(&self, node: &str) -> NodeInfo {
        let lookup = self.conn.prepare_cached(DESCRIBE_SQL).and_then(|mut stmt| {
            stmt.query_row([node], |row| {
                Ok(NodeInfo {
                    name: row.get(0)?,
                    kind: row.get(1)?,
                })
            })
            .optional()
        });

        match lookup {
            Ok(info) => info.unwrap_or_default(),
            Err(e) => {
                log::warn!("describe({}) failed: {}", node, e);
                NodeInfo::default()
            }
        }
    }

    fn search(&self, query: &AssetQuery) -> Result<Vec<AssetMatch>> {
        let mut stmt = self.conn.prepare_cached(SEARCH_SQL)?;
        let rows = stmt.query_map([], |row| {
            Ok(AssetMatch {
                path: row.get(0)?,
                name: row.get(1)?,
                kind: row.get(2)?,
            })
        })?;

        let mut matches = Vec::new();
        for row in rows {
            let asset = row?;
            if query.matches(&asset.name, &asset.kind) {
                matches.push(asset);
            }
        }
        log::debug!("search '{}' matched {} assets", query.pattern(), matches.len());
        Ok(matches)
    }
}

/// JSON manifest accepted by `refgraph import`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssetIndexManifest {
    pub assets: Vec<ManifestAsset>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestAsset {
    pub path: NodeRef,
    /// Defaults to the last path segment
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub class: String,
    #[serde(default)]
    pub dependencies: Vec<NodeRef>,
}

/// Counts of rows written by [`import_manifest`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportStats {
    pub assets: usize,
    pub new_edges: usize,
}

/// Upsert a manifest into the index in one transaction. Re-importing is idempotent.
pub fn import_manifest(conn: &mut Connection, manifest: &AssetIndexManifest) -> Result<ImportStats> {
    let tx = conn.transaction()?;
    let mut stats = ImportStats::default();
    {
        let mut upsert_asset = tx.prepare(
            "INSERT INTO assets (path, name, class) VALUES (?1, ?2, ?3)
             ON CONFLICT(path) DO UPDATE SET name = excluded.name, class = excluded.class",
        )?;
        let mut insert_edge = tx.prepare(
            "INSERT OR IGNORE INTO asset_dependencies (source, target) VALUES (?1, ?2)",
        )?;

        for asset in &manifest.assets {
            if asset.path.trim().is_empty() {
                return Err(RefgraphError::InvalidInput(
                    "manifest asset with empty path".to_string(),
                ));
            }
            let name = if asset.name.is_empty() {
                asset.path.rsplit('/').next().unwrap_or(&asset.path)
            } else {
                asset.name.as_str()
            };
            upsert_asset.execute(params![asset.path, name, asset.class])?;
            stats.assets += 1;

            for target in &asset.dependencies {
                stats.new_edges += insert_edge.execute(params![asset.path, target])?;
            }
        }
    }
    tx.commit()?;

    log::info!(
        "Imported {} assets, {} new dependency edges",
        stats.assets,
        stats.new_edges
    );
    Ok(stats)
}
