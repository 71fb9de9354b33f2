//! The artifact store: lectures, cards, and takeaways.
//!
//! Each operation grabs a pooled connection on the blocking thread pool,
//! runs a short statement or two, and returns the affected record. Card and
//! takeaway identities are chosen server-side, so one call inserts exactly
//! one row.

use std::path::Path;

use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Deserialize;
use uuid::Uuid;

use lectern_domain::error::{Error, Result};
use lectern_domain::lecture::{
    BadgeKind, Card, CardKind, Citation, Lecture, LectureDetail, LectureOverview, LectureStatus,
    Takeaway,
};

use crate::schema;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inputs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Inputs for a new card row.
#[derive(Debug, Clone)]
pub struct NewCard {
    pub lecture_id: String,
    pub kind: CardKind,
    pub term: String,
    pub content: String,
    pub citations: Vec<Citation>,
    pub badge: BadgeKind,
    pub lecture_timestamp_seconds: u64,
}

/// Inputs for a new takeaway row.
#[derive(Debug, Clone)]
pub struct NewTakeaway {
    pub lecture_id: String,
    pub text: String,
    pub lecture_timestamp_seconds: u64,
}

/// Partial lecture update accepted over REST.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LecturePatch {
    pub title: Option<String>,
    pub status: Option<LectureStatus>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ArtifactStore {
    pool: Pool<SqliteConnectionManager>,
}

impl ArtifactStore {
    /// Open (or create) the database at `path` and apply the schema.
    pub fn open(path: &Path) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.execute_batch(
                "PRAGMA foreign_keys = ON;\n\
                 PRAGMA journal_mode = WAL;\n\
                 PRAGMA busy_timeout = 5000;",
            )
        });
        let pool = Pool::builder()
            .max_size(8)
            .build(manager)
            .map_err(|e| Error::Store(format!("pool: {e}")))?;

        let conn = pool
            .get()
            .map_err(|e| Error::Store(format!("pool: {e}")))?;
        schema::init_schema(&conn)?;

        tracing::info!(path = %path.display(), "artifact store ready");
        Ok(Self { pool })
    }

    /// Run `f` with a pooled connection on the blocking thread pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool
                .get()
                .map_err(|e| Error::Store(format!("pool: {e}")))?;
            f(&conn)
        })
        .await
        .map_err(|e| Error::Store(format!("store task join: {e}")))?
    }

    // ── Lectures ───────────────────────────────────────────────────

    pub async fn create_lecture(&self, title: &str) -> Result<Lecture> {
        let title = title.to_owned();
        self.with_conn(move |conn| {
            let now = Utc::now();
            let lecture = Lecture {
                id: Uuid::new_v4().to_string(),
                title,
                status: LectureStatus::Idle,
                summary: None,
                transcript: None,
                duration_seconds: 0,
                created_at: now,
                updated_at: now,
            };
            conn.execute(
                "INSERT INTO lectures (id, title, status, summary, transcript, duration_seconds, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    lecture.id,
                    lecture.title,
                    lecture.status.as_str(),
                    lecture.summary,
                    lecture.transcript,
                    lecture.duration_seconds as i64,
                    fmt_dt(lecture.created_at),
                    fmt_dt(lecture.updated_at),
                ],
            )
            .map_err(from_sqlite)?;
            Ok(lecture)
        })
        .await
    }

    /// All lectures, newest-updated first, each with its card count.
    pub async fn list_lectures(&self) -> Result<Vec<LectureOverview>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT l.id, l.title, l.status, l.summary, l.transcript,
                            l.duration_seconds, l.created_at, l.updated_at,
                            (SELECT COUNT(*) FROM cards c WHERE c.lecture_id = l.id)
                     FROM lectures l
                     ORDER BY l.updated_at DESC",
                )
                .map_err(from_sqlite)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(LectureOverview {
                        lecture: lecture_from_row(row)?,
                        card_count: row.get::<_, i64>(8)? as u64,
                    })
                })
                .map_err(from_sqlite)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(from_sqlite)
        })
        .await
    }

    /// Full detail for one lecture, with its cards and takeaways.
    pub async fn get_lecture(&self, lecture_id: &str) -> Result<Option<LectureDetail>> {
        let lecture_id = lecture_id.to_owned();
        self.with_conn(move |conn| {
            let Some(lecture) = load_lecture(conn, &lecture_id)? else {
                return Ok(None);
            };

            let mut stmt = conn
                .prepare(
                    "SELECT id, lecture_id, kind, term, content, citations, badge,
                            lecture_timestamp_seconds, created_at
                     FROM cards WHERE lecture_id = ?1 ORDER BY created_at",
                )
                .map_err(from_sqlite)?;
            let cards = stmt
                .query_map([&lecture_id], card_from_row)
                .map_err(from_sqlite)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(from_sqlite)?;

            let mut stmt = conn
                .prepare(
                    "SELECT id, lecture_id, text, lecture_timestamp_seconds, created_at
                     FROM takeaways WHERE lecture_id = ?1 ORDER BY created_at",
                )
                .map_err(from_sqlite)?;
            let takeaways = stmt
                .query_map([&lecture_id], takeaway_from_row)
                .map_err(from_sqlite)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(from_sqlite)?;

            Ok(Some(LectureDetail {
                card_count: cards.len() as u64,
                lecture,
                cards,
                takeaways,
            }))
        })
        .await
    }

    /// Apply a partial update. Returns the updated lecture, or `None` when
    /// the lecture does not exist.
    pub async fn patch_lecture(
        &self,
        lecture_id: &str,
        patch: LecturePatch,
    ) -> Result<Option<Lecture>> {
        let lecture_id = lecture_id.to_owned();
        self.with_conn(move |conn| {
            let Some(mut lecture) = load_lecture(conn, &lecture_id)? else {
                return Ok(None);
            };
            if let Some(title) = patch.title {
                lecture.title = title;
            }
            if let Some(status) = patch.status {
                lecture.status = status;
            }
            lecture.updated_at = Utc::now();
            conn.execute(
                "UPDATE lectures SET title = ?1, status = ?2, updated_at = ?3 WHERE id = ?4",
                params![
                    lecture.title,
                    lecture.status.as_str(),
                    fmt_dt(lecture.updated_at),
                    lecture_id,
                ],
            )
            .map_err(from_sqlite)?;
            Ok(Some(lecture))
        })
        .await
    }

    /// Delete a lecture; cards and takeaways cascade. Returns whether a row
    /// was removed.
    pub async fn delete_lecture(&self, lecture_id: &str) -> Result<bool> {
        let lecture_id = lecture_id.to_owned();
        self.with_conn(move |conn| {
            let changed = conn
                .execute("DELETE FROM lectures WHERE id = ?1", [&lecture_id])
                .map_err(from_sqlite)?;
            Ok(changed > 0)
        })
        .await
    }

    // ── Session-runtime mutations ──────────────────────────────────

    /// Move the lecture to `status`, unless it is already completed — a
    /// completed lecture is never reopened.
    pub async fn update_status(&self, lecture_id: &str, status: LectureStatus) -> Result<()> {
        let lecture_id = lecture_id.to_owned();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE lectures SET status = ?1, updated_at = ?2
                 WHERE id = ?3 AND status != 'completed'",
                params![status.as_str(), fmt_dt(Utc::now()), lecture_id],
            )
            .map_err(from_sqlite)?;
            Ok(())
        })
        .await
    }

    /// Overwrite the running transcript snapshot.
    pub async fn update_transcript(&self, lecture_id: &str, transcript: &str) -> Result<()> {
        let lecture_id = lecture_id.to_owned();
        let transcript = transcript.to_owned();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE lectures SET transcript = ?1, updated_at = ?2 WHERE id = ?3",
                params![transcript, fmt_dt(Utc::now()), lecture_id],
            )
            .map_err(from_sqlite)?;
            Ok(())
        })
        .await
    }

    /// Overwrite the rolling summary (last writer wins).
    pub async fn update_summary(&self, lecture_id: &str, summary: &str) -> Result<()> {
        let lecture_id = lecture_id.to_owned();
        let summary = summary.to_owned();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE lectures SET summary = ?1, updated_at = ?2 WHERE id = ?3",
                params![summary, fmt_dt(Utc::now()), lecture_id],
            )
            .map_err(from_sqlite)?;
            Ok(())
        })
        .await
    }

    /// Terminal update: completed status, final duration, and whatever
    /// summary/transcript the session ended with. Absent fields keep their
    /// current values.
    pub async fn finalize_lecture(
        &self,
        lecture_id: &str,
        duration_seconds: u64,
        summary: Option<String>,
        transcript: Option<String>,
    ) -> Result<()> {
        let lecture_id = lecture_id.to_owned();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE lectures
                 SET status = 'completed',
                     duration_seconds = ?1,
                     summary = COALESCE(?2, summary),
                     transcript = COALESCE(?3, transcript),
                     updated_at = ?4
                 WHERE id = ?5",
                params![
                    duration_seconds as i64,
                    summary,
                    transcript,
                    fmt_dt(Utc::now()),
                    lecture_id,
                ],
            )
            .map_err(from_sqlite)?;
            Ok(())
        })
        .await
    }

    // ── Cards & takeaways ──────────────────────────────────────────

    pub async fn insert_card(&self, new: NewCard) -> Result<Card> {
        self.with_conn(move |conn| {
            let card = Card {
                id: Uuid::new_v4().to_string(),
                lecture_id: new.lecture_id,
                kind: new.kind,
                term: new.term,
                content: new.content,
                citations: new.citations,
                badge: new.badge,
                lecture_timestamp_seconds: new.lecture_timestamp_seconds,
                created_at: Utc::now(),
            };
            let citations_json = serde_json::to_string(&card.citations)
                .map_err(|e| Error::Store(format!("serializing citations: {e}")))?;
            conn.execute(
                "INSERT INTO cards (id, lecture_id, kind, term, content, citations, badge,
                                    lecture_timestamp_seconds, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    card.id,
                    card.lecture_id,
                    card.kind.as_str(),
                    card.term,
                    card.content,
                    citations_json,
                    card.badge.as_str(),
                    card.lecture_timestamp_seconds as i64,
                    fmt_dt(card.created_at),
                ],
            )
            .map_err(from_sqlite)?;
            Ok(card)
        })
        .await
    }

    pub async fn get_card(&self, card_id: &str) -> Result<Option<Card>> {
        let card_id = card_id.to_owned();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT id, lecture_id, kind, term, content, citations, badge,
                        lecture_timestamp_seconds, created_at
                 FROM cards WHERE id = ?1",
                [&card_id],
                card_from_row,
            )
            .optional()
            .map_err(from_sqlite)
        })
        .await
    }

    pub async fn insert_takeaway(&self, new: NewTakeaway) -> Result<Takeaway> {
        self.with_conn(move |conn| {
            let takeaway = Takeaway {
                id: Uuid::new_v4().to_string(),
                lecture_id: new.lecture_id,
                text: new.text,
                lecture_timestamp_seconds: new.lecture_timestamp_seconds,
                created_at: Utc::now(),
            };
            conn.execute(
                "INSERT INTO takeaways (id, lecture_id, text, lecture_timestamp_seconds, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    takeaway.id,
                    takeaway.lecture_id,
                    takeaway.text,
                    takeaway.lecture_timestamp_seconds as i64,
                    fmt_dt(takeaway.created_at),
                ],
            )
            .map_err(from_sqlite)?;
            Ok(takeaway)
        })
        .await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Row mapping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn load_lecture(conn: &Connection, lecture_id: &str) -> Result<Option<Lecture>> {
    conn.query_row(
        "SELECT id, title, status, summary, transcript, duration_seconds, created_at, updated_at
         FROM lectures WHERE id = ?1",
        [lecture_id],
        lecture_from_row,
    )
    .optional()
    .map_err(from_sqlite)
}

fn lecture_from_row(row: &Row<'_>) -> rusqlite::Result<Lecture> {
    Ok(Lecture {
        id: row.get(0)?,
        title: row.get(1)?,
        status: parse_status(row, 2)?,
        summary: row.get(3)?,
        transcript: row.get(4)?,
        duration_seconds: row.get::<_, i64>(5)? as u64,
        created_at: parse_dt(row, 6)?,
        updated_at: parse_dt(row, 7)?,
    })
}

fn card_from_row(row: &Row<'_>) -> rusqlite::Result<Card> {
    let citations_json: String = row.get(5)?;
    Ok(Card {
        id: row.get(0)?,
        lecture_id: row.get(1)?,
        kind: CardKind::parse(&row.get::<_, String>(2)?).unwrap_or(CardKind::AutoDefine),
        term: row.get(3)?,
        content: row.get(4)?,
        citations: serde_json::from_str(&citations_json).unwrap_or_default(),
        badge: BadgeKind::parse(&row.get::<_, String>(6)?).unwrap_or(BadgeKind::Concept),
        lecture_timestamp_seconds: row.get::<_, i64>(7)? as u64,
        created_at: parse_dt(row, 8)?,
    })
}

fn takeaway_from_row(row: &Row<'_>) -> rusqlite::Result<Takeaway> {
    Ok(Takeaway {
        id: row.get(0)?,
        lecture_id: row.get(1)?,
        text: row.get(2)?,
        lecture_timestamp_seconds: row.get::<_, i64>(3)? as u64,
        created_at: parse_dt(row, 4)?,
    })
}

fn parse_status(row: &Row<'_>, idx: usize) -> rusqlite::Result<LectureStatus> {
    let raw: String = row.get(idx)?;
    LectureStatus::parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unknown lecture status: {raw}").into(),
        )
    })
}

fn fmt_dt(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_dt(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

pub(crate) fn from_sqlite(e: rusqlite::Error) -> Error {
    Error::Store(e.to_string())
}
