use rusqlite::{OptionalExtension, Row, params};
use tracing::debug;

use super::files::relocate_in;
use super::sqlite::{Store, now_rfc3339, parse_optional_timestamp, parse_text, parse_timestamp, path_from_row, path_value};
use crate::config::DestinationMode;
use crate::error::{Error, Result};
use crate::session::{ActionOutcome, MoveAction, NewAction, Session, SessionStatus};

const SESSION_COLUMNS: &str = "id, name, created_at, finished_at, status, destination_mode, \
                               total, processed, skipped, errors";

const ACTION_COLUMNS: &str = "id, session_id, original_path, destination_path, tags, \
                              timestamp, outcome, message, undone_at";

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    let created_at: String = row.get(2)?;
    let status: String = row.get(4)?;
    let destination_mode: String = row.get(5)?;
    Ok(Session {
        id: row.get(0)?,
        name: row.get(1)?,
        created_at: parse_timestamp(2, &created_at)?,
        finished_at: parse_optional_timestamp(3, row.get(3)?)?,
        status: parse_text(4, &status)?,
        destination_mode: parse_text(5, &destination_mode)?,
        total: row.get::<_, i64>(6)? as u64,
        processed: row.get::<_, i64>(7)? as u64,
        skipped: row.get::<_, i64>(8)? as u64,
        errors: row.get::<_, i64>(9)? as u64,
    })
}

fn action_from_row(row: &Row<'_>) -> rusqlite::Result<MoveAction> {
    let tags_json: String = row.get(4)?;
    let timestamp: String = row.get(5)?;
    let outcome: String = row.get(6)?;
    let tags: Vec<String> = serde_json::from_str(&tags_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(MoveAction {
        id: row.get(0)?,
        session_id: row.get(1)?,
        original_path: path_from_row(row, 2)?,
        destination_path: path_from_row(row, 3)?,
        tags,
        timestamp: parse_timestamp(5, &timestamp)?,
        outcome: parse_text::<ActionOutcome>(6, &outcome)?,
        message: row.get(7)?,
        undone_at: parse_optional_timestamp(8, row.get(8)?)?,
    })
}

impl Store {
    // ── Sessions ─────────────────────────────────────────────────

    pub fn create_session(
        &self,
        name: &str,
        total: usize,
        destination_mode: DestinationMode,
    ) -> Result<Session> {
        let id = {
            let conn = self.connection();
            conn.execute(
                "INSERT INTO sessions (name, created_at, status, destination_mode, total) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    name,
                    now_rfc3339(),
                    SessionStatus::Active.as_str(),
                    destination_mode.as_str(),
                    total as i64
                ],
            )?;
            conn.last_insert_rowid()
        };
        debug!("Created session {} '{}' for {} file(s)", id, name, total);
        self.session(id)
    }

    pub fn get_session(&self, session_id: i64) -> Result<Option<Session>> {
        let sql = format!("SELECT {} FROM sessions WHERE id = ?1", SESSION_COLUMNS);
        let session = self
            .connection()
            .query_row(&sql, params![session_id], session_from_row)
            .optional()?;
        Ok(session)
    }

    /// Like [`Store::get_session`], but a missing session is an error.
    pub fn session(&self, session_id: i64) -> Result<Session> {
        self.get_session(session_id)?
            .ok_or(Error::SessionNotFound(session_id))
    }

    /// Sessions newest first.
    pub fn list_sessions(&self, limit: usize) -> Result<Vec<Session>> {
        let sql = format!(
            "SELECT {} FROM sessions ORDER BY id DESC LIMIT ?1",
            SESSION_COLUMNS
        );
        let conn = self.connection();
        let mut stmt = conn.prepare(&sql)?;
        let sessions = stmt
            .query_map(params![limit as i64], session_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(sessions)
    }

    /// Most recent session that still has moves left to reverse.
    pub fn latest_undoable_session(&self) -> Result<Option<Session>> {
        let sql = format!(
            "SELECT {} FROM sessions s \
             WHERE s.status != 'undone' AND EXISTS ( \
                 SELECT 1 FROM actions a \
                 WHERE a.session_id = s.id AND a.outcome = 'moved' AND a.undone_at IS NULL) \
             ORDER BY s.id DESC LIMIT 1",
            SESSION_COLUMNS
        );
        let session = self
            .connection()
            .query_row(&sql, [], session_from_row)
            .optional()?;
        Ok(session)
    }

    /// Sets the final status and stamps `finished_at`.
    pub fn finish_session(&self, session_id: i64, status: SessionStatus) -> Result<Session> {
        let changed = self.connection().execute(
            "UPDATE sessions SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![status.as_str(), now_rfc3339(), session_id],
        )?;
        if changed == 0 {
            return Err(Error::SessionNotFound(session_id));
        }
        debug!("Session {} finished as {}", session_id, status);
        self.session(session_id)
    }

    pub fn set_session_status(&self, session_id: i64, status: SessionStatus) -> Result<()> {
        let changed = self.connection().execute(
            "UPDATE sessions SET status = ?1 WHERE id = ?2",
            params![status.as_str(), session_id],
        )?;
        if changed == 0 {
            return Err(Error::SessionNotFound(session_id));
        }
        Ok(())
    }

    // ── Actions ──────────────────────────────────────────────────

    /// Appends an action and bumps the matching session counter atomically.
    ///
    /// Fails without writing anything if the session already holds `total`
    /// actions.
    pub fn append_action(&self, session_id: i64, action: &NewAction) -> Result<MoveAction> {
        let counter = match action.outcome {
            ActionOutcome::Moved => "processed",
            ActionOutcome::Skipped => "skipped",
            ActionOutcome::Error => "errors",
        };
        let tags_json = serde_json::to_string(&action.tags).unwrap_or_else(|_| "[]".to_string());
        let timestamp = now_rfc3339();

        let mut conn = self.connection();
        let tx = conn.transaction()?;
        let bumped = tx.execute(
            &format!(
                "UPDATE sessions SET {counter} = {counter} + 1 \
                 WHERE id = ?1 AND processed + skipped + errors < total"
            ),
            params![session_id],
        )?;
        if bumped == 0 {
            return Err(Error::consistency(
                &action.original_path,
                format!("session {} cannot take another action", session_id),
            ));
        }
        tx.execute(
            "INSERT INTO actions (session_id, original_path, destination_path, tags, \
             timestamp, outcome, message) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                session_id,
                path_value(&action.original_path),
                path_value(&action.destination_path),
                tags_json,
                timestamp,
                action.outcome.as_str(),
                action.message,
            ],
        )?;
        let id = tx.last_insert_rowid();
        let recorded = tx.query_row(
            &format!("SELECT {} FROM actions WHERE id = ?1", ACTION_COLUMNS),
            params![id],
            action_from_row,
        )?;
        tx.commit()?;
        Ok(recorded)
    }

    /// All actions of a session in the order they were recorded.
    pub fn actions_for_session(&self, session_id: i64) -> Result<Vec<MoveAction>> {
        let sql = format!(
            "SELECT {} FROM actions WHERE session_id = ?1 ORDER BY id ASC",
            ACTION_COLUMNS
        );
        let conn = self.connection();
        let mut stmt = conn.prepare(&sql)?;
        let actions = stmt
            .query_map(params![session_id], action_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(actions)
    }

    /// Moved actions of a session, newest first.
    pub fn moved_actions_newest_first(&self, session_id: i64) -> Result<Vec<MoveAction>> {
        let sql = format!(
            "SELECT {} FROM actions WHERE session_id = ?1 AND outcome = 'moved' \
             ORDER BY id DESC",
            ACTION_COLUMNS
        );
        let conn = self.connection();
        let mut stmt = conn.prepare(&sql)?;
        let actions = stmt
            .query_map(params![session_id], action_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(actions)
    }

    /// Records a restored move: the index row follows the file back and the
    /// action is marked undone, both or neither.
    pub fn record_undo(&self, action: &MoveAction) -> Result<()> {
        let mut conn = self.connection();
        let tx = conn.transaction()?;
        relocate_in(&tx, &action.destination_path, &action.original_path)?;
        tx.execute(
            "UPDATE actions SET undone_at = ?1 WHERE id = ?2 AND undone_at IS NULL",
            params![now_rfc3339(), action.id],
        )?;
        tx.commit()?;
        Ok(())
    }
}
