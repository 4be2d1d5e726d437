//! Append-only journal of logged gate scans.

use crate::{open_database, StoreError};
use chrono::{DateTime, SecondsFormat, Utc};
use gatecheck_core::session::ScanEvent;
use rusqlite::{params, Connection};
use serde::Serialize;
use std::path::Path;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JournalEntry {
    pub id: String,
    pub gate: String,
    pub name: String,
    pub identity_key: Option<String>,
    pub similarity: f32,
    pub logged_at: DateTime<Utc>,
}

pub struct ScanJournal {
    conn: Mutex<Connection>,
}

impl ScanJournal {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Ok(Self {
            conn: Mutex::new(open_database(path)?),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Append `event` stamped with the current UTC time.
    ///
    /// Callers journal only events whose cooldown decision was `Log`.
    pub fn record(&self, event: &ScanEvent) -> Result<JournalEntry, StoreError> {
        self.record_at(event, Utc::now())
    }

    pub fn record_at(
        &self,
        event: &ScanEvent,
        logged_at: DateTime<Utc>,
    ) -> Result<JournalEntry, StoreError> {
        let entry = JournalEntry {
            id: Uuid::new_v4().to_string(),
            gate: event.gate.clone(),
            name: event.name.clone(),
            identity_key: event.identity_key.clone(),
            similarity: event.similarity,
            logged_at,
        };
        self.conn().execute(
            "INSERT INTO scan_log (id, gate, name, identity_key, similarity, logged_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.id,
                entry.gate,
                entry.name,
                entry.identity_key,
                stored_similarity(entry.similarity),
                entry.logged_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            ],
        )?;
        Ok(entry)
    }

    /// Most recent entries first.
    pub fn recent(&self, limit: usize) -> Result<Vec<JournalEntry>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, gate, name, identity_key, similarity, logged_at
             FROM scan_log ORDER BY logged_at DESC, rowid DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, f64>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, gate, name, identity_key, similarity, logged_at) = row?;
            entries.push(JournalEntry {
                id,
                gate,
                name,
                identity_key,
                similarity: similarity as f32,
                logged_at: DateTime::parse_from_rfc3339(&logged_at)?.with_timezone(&Utc),
            });
        }
        Ok(entries)
    }
}

/// Reported scores carry two decimals; widen without picking up f32 noise.
fn stored_similarity(similarity: f32) -> f64 {
    (f64::from(similarity) * 100.0).round() / 100.0
}
