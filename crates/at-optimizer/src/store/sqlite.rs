//! `SQLite`-backed study store for resumable, multi-process searches.

use std::path::Path;
use std::time::Duration;

use at_types::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use tracing::debug;

use super::{conflict, not_found, Study, StudyStore};
use crate::trial::{ObjectiveDirection, Trial};

/// Database file used when no store path is configured.
pub const DEFAULT_STORE_PATH: &str = "opt.db";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS studies (
    name       TEXT PRIMARY KEY,
    direction  TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS trials (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    study       TEXT NOT NULL REFERENCES studies(name),
    trial_index INTEGER NOT NULL,
    state       TEXT NOT NULL,
    objective   REAL,
    data        TEXT NOT NULL,
    UNIQUE (study, trial_index)
);";

/// Study store persisted in a `SQLite` database.
///
/// WAL mode lets several tuner processes read the same file while one of
/// them writes. Each append runs in an immediate transaction that checks the
/// expected next `trial_index`; the `UNIQUE (study, trial_index)` constraint
/// backs that check up at the storage level.
pub struct SqliteStudyStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteStudyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStudyStore").finish_non_exhaustive()
    }
}

fn db(e: rusqlite::Error) -> StoreError {
    StoreError::Database {
        message: e.to_string(),
    }
}

fn corrupt(identity: &str, message: impl Into<String>) -> StoreError {
    StoreError::Corrupt {
        study: identity.to_string(),
        message: message.into(),
    }
}

impl SqliteStudyStore {
    /// Open (or create) the database at `path`.
    ///
    /// # Errors
    ///
    /// [`StoreError::Database`] if the file cannot be opened or the schema
    /// cannot be created.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path.as_ref()).map_err(db)?;

        // WAL mode: concurrent readers, single writer.
        let mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .map_err(db)?;
        debug!(path = %path.as_ref().display(), journal_mode = %mode, "opened study store");

        Self::with_connection(conn)
    }

    /// A private database that disappears with the store.
    pub fn in_memory() -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory().map_err(db)?)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        conn.busy_timeout(Duration::from_secs(5)).map_err(db)?;
        conn.execute_batch(SCHEMA).map_err(db)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl StudyStore for SqliteStudyStore {
    fn create_or_load(&self, identity: &str, direction: ObjectiveDirection) -> StoreResult<Study> {
        {
            let conn = self.conn.lock();
            conn.execute(
                "INSERT OR IGNORE INTO studies (name, direction, created_at) VALUES (?1, ?2, ?3)",
                params![identity, direction.as_str(), Utc::now().to_rfc3339()],
            )
            .map_err(db)?;
        }
        self.study(identity)
    }

    fn append_trial(&self, identity: &str, trial: &Trial) -> StoreResult<()> {
        let data = serde_json::to_string(trial).map_err(|e| corrupt(identity, e.to_string()))?;
        let index = i64::try_from(trial.trial_index)
            .map_err(|_| corrupt(identity, format!("trial index {} too large", trial.trial_index)))?;

        let mut conn = self.conn.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db)?;

        let known: bool = tx
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM studies WHERE name = ?1)",
                [identity],
                |row| row.get(0),
            )
            .map_err(db)?;
        if !known {
            return Err(not_found(identity));
        }

        let count: i64 = tx
            .query_row(
                "SELECT COUNT(*) FROM trials WHERE study = ?1",
                [identity],
                |row| row.get(0),
            )
            .map_err(db)?;
        let actual = usize::try_from(count).unwrap_or(usize::MAX);
        if actual != trial.trial_index {
            return Err(conflict(identity, trial.trial_index, actual));
        }

        tx.execute(
            "INSERT INTO trials (study, trial_index, state, objective, data)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                identity,
                index,
                trial.status.as_str(),
                trial.objective_value,
                data
            ],
        )
        .map_err(|e| match e.sqlite_error_code() {
            Some(ErrorCode::ConstraintViolation) => {
                conflict(identity, trial.trial_index, actual.saturating_add(1))
            }
            _ => db(e),
        })?;

        tx.commit().map_err(db)
    }

    fn study(&self, identity: &str) -> StoreResult<Study> {
        let conn = self.conn.lock();

        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT direction, created_at FROM studies WHERE name = ?1",
                [identity],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(db)?;
        let (direction, created_at) = row.ok_or_else(|| not_found(identity))?;

        let direction = ObjectiveDirection::parse(&direction)
            .ok_or_else(|| corrupt(identity, format!("unknown direction {direction:?}")))?;
        let created_at = DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| corrupt(identity, format!("bad created_at: {e}")))?
            .with_timezone(&Utc);

        let trials = load_trials(&conn, identity)?;

        Ok(Study {
            identity: identity.to_string(),
            direction,
            created_at,
            trials,
        })
    }

    fn list_studies(&self) -> StoreResult<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT name FROM studies ORDER BY name")
            .map_err(db)?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(db)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db)?;
        Ok(names)
    }
}

/// Load every trial of `identity`, ordered by index, checking the sequence
/// has no gaps.
fn load_trials(conn: &Connection, identity: &str) -> StoreResult<Vec<Trial>> {
    let mut stmt = conn
        .prepare("SELECT trial_index, data FROM trials WHERE study = ?1 ORDER BY trial_index")
        .map_err(db)?;
    let rows = stmt
        .query_map([identity], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })
        .map_err(db)?;

    let mut trials = Vec::new();
    for row in rows {
        let (index, data) = row.map_err(db)?;
        let trial: Trial = serde_json::from_str(&data)
            .map_err(|e| corrupt(identity, format!("trial {index}: {e}")))?;
        if i64::try_from(trial.trial_index).ok() != Some(index) || trial.trial_index != trials.len() {
            return Err(corrupt(
                identity,
                format!(
                    "trial stored at index {index} claims index {} (expected {})",
                    trial.trial_index,
                    trials.len()
                ),
            ));
        }
        trials.push(trial);
    }

    Ok(trials)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::{ParamSet, ParameterValue};
    use at_types::ScoreSummary;
    use tempfile::tempdir;

    fn completed(index: usize, objective: f64) -> Trial {
        let mut params = ParamSet::new();
        params.insert("mc_run".into(), ParameterValue::Int(7));
        params.insert("cut_off".into(), ParameterValue::Float(3.25));
        let summary = ScoreSummary {
            mean_score: objective + 1.0,
            mean_log_score: objective,
            mean_run_count: 12.5,
        };
        Trial::completed(index, params, summary, 1, Utc::now())
    }

    fn failed(index: usize) -> Trial {
        Trial::failed(index, ParamSet::new(), "engine down".into(), 3, Utc::now())
    }

    #[test]
    fn trials_survive_reopening() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("opt.db");

        {
            let store = SqliteStudyStore::open(&path).unwrap();
            store.create_or_load("8_100", ObjectiveDirection::Minimize).unwrap();
            store.append_trial("8_100", &completed(0, 1.5)).unwrap();
            store.append_trial("8_100", &failed(1)).unwrap();
            store.append_trial("8_100", &completed(2, 0.75)).unwrap();
        }

        let store = SqliteStudyStore::open(&path).unwrap();
        let study = store.create_or_load("8_100", ObjectiveDirection::Minimize).unwrap();
        assert_eq!(study.trials.len(), 3);
        assert_eq!(study.next_index(), 3);
        assert_eq!(study.trials[0].objective_value, Some(1.5));
        assert_eq!(study.trials[0].summary.unwrap().mean_run_count, 12.5);
        assert_eq!(study.trials[1].error.as_deref(), Some("engine down"));

        let best = store.best_trial("8_100").unwrap().unwrap();
        assert_eq!(best.trial_index, 2);
        assert_eq!(best.params["cut_off"], ParameterValue::Float(3.25));
        assert_eq!(best.params["mc_run"], ParameterValue::Int(7));
    }

    #[test]
    fn second_writer_with_stale_view_conflicts() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("opt.db");
        let a = SqliteStudyStore::open(&path).unwrap();
        let b = SqliteStudyStore::open(&path).unwrap();

        let seen_by_a = a.create_or_load("5_100", ObjectiveDirection::Minimize).unwrap();
        let seen_by_b = b.create_or_load("5_100", ObjectiveDirection::Minimize).unwrap();
        assert_eq!(seen_by_a.next_index(), 0);
        assert_eq!(seen_by_b.next_index(), 0);

        a.append_trial("5_100", &completed(seen_by_a.next_index(), 1.0)).unwrap();
        let err = b
            .append_trial("5_100", &completed(seen_by_b.next_index(), 2.0))
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Conflict {
                expected: 0,
                actual: 1,
                ..
            }
        ));

        assert_eq!(b.trials("5_100").unwrap().len(), 1);
    }

    #[test]
    fn best_trial_of_empty_study_is_none() {
        let store = SqliteStudyStore::in_memory().unwrap();
        store.create_or_load("5_100", ObjectiveDirection::Minimize).unwrap();
        assert!(store.best_trial("5_100").unwrap().is_none());
        store.append_trial("5_100", &failed(0)).unwrap();
        assert!(store.best_trial("5_100").unwrap().is_none());
    }

    #[test]
    fn unknown_study_is_not_found() {
        let store = SqliteStudyStore::in_memory().unwrap();
        assert!(matches!(store.study("7_100"), Err(StoreError::NotFound { .. })));
        assert!(matches!(
            store.append_trial("7_100", &completed(0, 1.0)),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn existing_study_keeps_its_direction() {
        let store = SqliteStudyStore::in_memory().unwrap();
        store.create_or_load("x", ObjectiveDirection::Maximize).unwrap();
        let again = store.create_or_load("x", ObjectiveDirection::Minimize).unwrap();
        assert_eq!(again.direction, ObjectiveDirection::Maximize);
    }

    #[test]
    fn lists_studies() {
        let store = SqliteStudyStore::in_memory().unwrap();
        store.create_or_load("6_100", ObjectiveDirection::Minimize).unwrap();
        store.create_or_load("5_100", ObjectiveDirection::Minimize).unwrap();
        assert_eq!(store.list_studies().unwrap(), vec!["5_100", "6_100"]);
    }
}
