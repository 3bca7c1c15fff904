//! Project, structure and file metadata.
//!
//! The core only talks to [`MetadataStore`]; [`SqliteStore`] is the shipped
//! engine. Identity tuples are backed by unique indexes and every write runs
//! in its own transaction, so insert-or-get never produces duplicates even
//! when two callers race on the same new identity.

use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{StageError, StageResult};
use crate::pipeline::util::{normalize_path, to_posix};

pub type ProjectId = i64;
pub type StructureDbId = i64;
pub type FileId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Active,
    Archived,
}

impl ProjectStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Archived => "archived",
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectStatus {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "archived" => Ok(Self::Archived),
            other => Err(format!("unknown project status `{other}`")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Project {
    pub id: ProjectId,
    pub project_number: String,
    pub date: String,
    pub crew_initials: String,
    pub status: ProjectStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Structure {
    pub id: StructureDbId,
    pub project_id: ProjectId,
    pub project_location: String,
    pub structure_id: String,
    pub collection_date: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRecord {
    pub id: FileId,
    pub structure_id: StructureDbId,
    pub filename: String,
    /// Relative to the storage root, `/` separated.
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StructureSummary {
    pub structure_db_id: StructureDbId,
    pub structure_id: String,
    pub date: String,
}

/// project_number → site (project_location) → structures.
pub type ProjectSites = BTreeMap<String, BTreeMap<String, Vec<StructureSummary>>>;

pub trait MetadataStore {
    fn insert_or_get_project(
        &self,
        project_number: &str,
        date: &str,
        crew_initials: &str,
    ) -> StageResult<ProjectId>;

    fn update_project_status(&self, id: ProjectId, status: ProjectStatus) -> StageResult<bool>;

    fn insert_or_get_structure(
        &self,
        project_id: ProjectId,
        project_location: &str,
        structure_id: &str,
        collection_date: &str,
    ) -> StageResult<StructureDbId>;

    /// Record a stored file; `absolute_path` must live under the storage root.
    fn insert_file(
        &self,
        structure_id: StructureDbId,
        filename: &str,
        absolute_path: &Path,
    ) -> StageResult<FileId>;

    fn get_project(&self, id: ProjectId) -> StageResult<Option<Project>>;
    fn get_structure(&self, id: StructureDbId) -> StageResult<Option<Structure>>;
    fn list_projects(&self) -> StageResult<Vec<Project>>;
    fn list_structures_for_project(&self, project_id: ProjectId) -> StageResult<Vec<Structure>>;
    fn list_files_for_structure(&self, structure_id: StructureDbId)
    -> StageResult<Vec<FileRecord>>;

    /// Loose filter: keeps records whose stored path contains `date` anywhere.
    fn list_files_for_structure_and_date(
        &self,
        structure_id: StructureDbId,
        date: &str,
    ) -> StageResult<Vec<FileRecord>>;

    fn list_projects_with_sites_and_dates(&self) -> StageResult<ProjectSites>;
}

/// Express `path` relative to `root`, or fail with `PathOutsideRoot`.
pub fn storage_relative(root: &Path, path: &Path) -> StageResult<String> {
    let root = normalize_path(root);
    let full = normalize_path(path);
    let rel = full
        .strip_prefix(&root)
        .map_err(|_| StageError::PathOutsideRoot {
            path: full.clone(),
            root: root.clone(),
        })?;
    let rendered = to_posix(rel);
    if rendered.is_empty() {
        return Err(StageError::PathOutsideRoot { path: full, root });
    }
    Ok(rendered)
}

pub struct SqliteStore {
    conn: Connection,
    storage_root: PathBuf,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS Projects (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_number TEXT NOT NULL,
    date TEXT NOT NULL,
    crew_initials TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active'
);
CREATE TABLE IF NOT EXISTS Structures (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id INTEGER NOT NULL,
    project_location TEXT NOT NULL,
    structure_id TEXT NOT NULL,
    collection_date TEXT NOT NULL,
    FOREIGN KEY (project_id) REFERENCES Projects (id)
);
CREATE TABLE IF NOT EXISTS Files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    structure_id INTEGER NOT NULL,
    filename TEXT NOT NULL,
    path TEXT NOT NULL,
    FOREIGN KEY (structure_id) REFERENCES Structures (id)
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_projects_identity
    ON Projects (project_number, date, crew_initials);
CREATE UNIQUE INDEX IF NOT EXISTS idx_structures_identity
    ON Structures (project_id, project_location, structure_id, collection_date);
CREATE INDEX IF NOT EXISTS idx_files_structure ON Files (structure_id);
";

fn project_from_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    let status: String = row.get(4)?;
    Ok(Project {
        id: row.get(0)?,
        project_number: row.get(1)?,
        date: row.get(2)?,
        crew_initials: row.get(3)?,
        status: status.parse().unwrap_or(ProjectStatus::Active),
    })
}

fn structure_from_row(row: &Row<'_>) -> rusqlite::Result<Structure> {
    Ok(Structure {
        id: row.get(0)?,
        project_id: row.get(1)?,
        project_location: row.get(2)?,
        structure_id: row.get(3)?,
        collection_date: row.get(4)?,
    })
}

fn file_from_row(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    Ok(FileRecord {
        id: row.get(0)?,
        structure_id: row.get(1)?,
        filename: row.get(2)?,
        path: row.get(3)?,
    })
}

impl SqliteStore {
    pub fn open(db_path: &Path, storage_root: &Path) -> StageResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| {
                StageError::Configuration(format!(
                    "failed to create database dir {}: {err}",
                    parent.display()
                ))
            })?;
        }
        let conn = Connection::open(db_path)?;
        Self::init(conn, storage_root)
    }

    pub fn open_in_memory(storage_root: &Path) -> StageResult<Self> {
        Self::init(Connection::open_in_memory()?, storage_root)
    }

    fn init(conn: Connection, storage_root: &Path) -> StageResult<Self> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn,
            storage_root: storage_root.to_path_buf(),
        })
    }
}

impl MetadataStore for SqliteStore {
    fn insert_or_get_project(
        &self,
        project_number: &str,
        date: &str,
        crew_initials: &str,
    ) -> StageResult<ProjectId> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO Projects (project_number, date, crew_initials, status)
             VALUES (?1, ?2, ?3, 'active')
             ON CONFLICT (project_number, date, crew_initials) DO NOTHING",
            params![project_number, date, crew_initials],
        )?;
        let id = tx.query_row(
            "SELECT id FROM Projects
             WHERE project_number = ?1 AND date = ?2 AND crew_initials = ?3",
            params![project_number, date, crew_initials],
            |row| row.get(0),
        )?;
        tx.commit()?;
        Ok(id)
    }

    fn update_project_status(&self, id: ProjectId, status: ProjectStatus) -> StageResult<bool> {
        let changed = self.conn.execute(
            "UPDATE Projects SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id],
        )?;
        Ok(changed > 0)
    }

    fn insert_or_get_structure(
        &self,
        project_id: ProjectId,
        project_location: &str,
        structure_id: &str,
        collection_date: &str,
    ) -> StageResult<StructureDbId> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO Structures (project_id, project_location, structure_id, collection_date)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (project_id, project_location, structure_id, collection_date) DO NOTHING",
            params![project_id, project_location, structure_id, collection_date],
        )?;
        let id = tx.query_row(
            "SELECT id FROM Structures
             WHERE project_id = ?1 AND project_location = ?2
               AND structure_id = ?3 AND collection_date = ?4",
            params![project_id, project_location, structure_id, collection_date],
            |row| row.get(0),
        )?;
        tx.commit()?;
        Ok(id)
    }

    fn insert_file(
        &self,
        structure_id: StructureDbId,
        filename: &str,
        absolute_path: &Path,
    ) -> StageResult<FileId> {
        let relative = storage_relative(&self.storage_root, absolute_path)?;
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO Files (structure_id, filename, path) VALUES (?1, ?2, ?3)",
            params![structure_id, filename, relative],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(id)
    }

    fn get_project(&self, id: ProjectId) -> StageResult<Option<Project>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, project_number, date, crew_initials, status
                 FROM Projects WHERE id = ?1",
                params![id],
                project_from_row,
            )
            .optional()?)
    }

    fn get_structure(&self, id: StructureDbId) -> StageResult<Option<Structure>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, project_id, project_location, structure_id, collection_date
                 FROM Structures WHERE id = ?1",
                params![id],
                structure_from_row,
            )
            .optional()?)
    }

    fn list_projects(&self) -> StageResult<Vec<Project>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, project_number, date, crew_initials, status
             FROM Projects ORDER BY id",
        )?;
        let rows = stmt.query_map([], project_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn list_structures_for_project(&self, project_id: ProjectId) -> StageResult<Vec<Structure>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, project_id, project_location, structure_id, collection_date
             FROM Structures WHERE project_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![project_id], structure_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn list_files_for_structure(
        &self,
        structure_id: StructureDbId,
    ) -> StageResult<Vec<FileRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, structure_id, filename, path
             FROM Files WHERE structure_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![structure_id], file_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn list_files_for_structure_and_date(
        &self,
        structure_id: StructureDbId,
        date: &str,
    ) -> StageResult<Vec<FileRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, structure_id, filename, path
             FROM Files WHERE structure_id = ?1 AND instr(path, ?2) > 0 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![structure_id, date], file_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn list_projects_with_sites_and_dates(&self) -> StageResult<ProjectSites> {
        let mut stmt = self.conn.prepare(
            "SELECT p.project_number, s.id, s.project_location, s.structure_id, s.collection_date
             FROM Projects p
             JOIN Structures s ON p.id = s.project_id
             ORDER BY p.project_number, s.project_location, s.collection_date",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(2)?,
                StructureSummary {
                    structure_db_id: row.get(1)?,
                    structure_id: row.get(3)?,
                    date: row.get(4)?,
                },
            ))
        })?;

        let mut out = ProjectSites::new();
        for row in rows {
            let (project_number, site, summary) = row?;
            out.entry(project_number)
                .or_default()
                .entry(site)
                .or_default()
                .push(summary);
        }
        Ok(out)
    }
}
