use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result, bail};
use rusqlite::{Connection, OptionalExtension, params};

use crate::model::{ArticleKey, OutcomeCounts};
use crate::util::{ensure_directory, now_utc_string};

const PROGRESS_SCHEMA_VERSION: &str = "1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArticleStatus {
    Done,
    Skipped,
    Failed,
}

impl ArticleStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Done => "done",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "done" => Ok(Self::Done),
            "skipped" => Ok(Self::Skipped),
            "failed" => Ok(Self::Failed),
            other => bail!("unknown article status '{other}' in progress store"),
        }
    }
}

/// Position and counts of a run. Replaced wholesale at every checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressRecord {
    pub last_issue_index: usize,
    pub last_article_key: Option<ArticleKey>,
    pub counts: OutcomeCounts,
    pub output_file_offset: u64,
}

impl ProgressRecord {
    /// The record after one more article has reached a terminal state.
    pub fn advance(
        &self,
        issue_index: usize,
        key: ArticleKey,
        status: ArticleStatus,
        output_file_offset: u64,
    ) -> Self {
        let mut counts = self.counts.clone();
        match status {
            ArticleStatus::Done => counts.processed += 1,
            ArticleStatus::Skipped => counts.skipped += 1,
            ArticleStatus::Failed => counts.failed += 1,
        }

        Self {
            last_issue_index: issue_index,
            last_article_key: Some(key),
            counts,
            output_file_offset,
        }
    }
}

/// One ledger row per article that reached a terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutcomeRow {
    pub key: ArticleKey,
    pub status: ArticleStatus,
    pub stage: String,
    pub category: Option<String>,
    pub detail: Option<String>,
    pub pdf_path: Option<String>,
    pub pdf_sha256: Option<String>,
}

pub struct ProgressStore {
    connection: Connection,
}

impl ProgressStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            ensure_directory(parent)?;
        }

        let connection = Connection::open(path)
            .with_context(|| format!("failed to open progress store {}", path.display()))?;
        configure_connection(&connection)?;
        ensure_schema(&connection)?;
        Ok(Self { connection })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let connection = Connection::open_in_memory()?;
        ensure_schema(&connection)?;
        Ok(Self { connection })
    }

    pub fn load(&self) -> Result<Option<ProgressRecord>> {
        let row = self
            .connection
            .query_row(
                "
                SELECT last_issue_index, last_issue_id, last_pdf_url,
                       processed, skipped, failed, output_file_offset
                FROM checkpoint
                WHERE id = 1
                ",
                [],
                |row| {
                    let issue_id: Option<String> = row.get(1)?;
                    let pdf_url: Option<String> = row.get(2)?;
                    Ok(ProgressRecord {
                        last_issue_index: row.get::<_, i64>(0)? as usize,
                        last_article_key: issue_id
                            .zip(pdf_url)
                            .map(|(issue_id, pdf_url)| ArticleKey { issue_id, pdf_url }),
                        counts: OutcomeCounts {
                            processed: row.get::<_, i64>(3)? as u64,
                            skipped: row.get::<_, i64>(4)? as u64,
                            failed: row.get::<_, i64>(5)? as u64,
                        },
                        output_file_offset: row.get::<_, i64>(6)? as u64,
                    })
                },
            )
            .optional()
            .context("failed to read checkpoint")?;

        Ok(row)
    }

    /// Writes the outcomes gathered since the last checkpoint and the new
    /// record in one transaction.
    pub fn save(&mut self, record: &ProgressRecord, outcomes: &[OutcomeRow]) -> Result<()> {
        let now = now_utc_string();
        let tx = self.connection.transaction()?;

        {
            let mut statement = tx.prepare(
                "
                INSERT INTO article_outcomes(
                  issue_id, pdf_url, status, stage, category, detail, pdf_path, pdf_sha256, recorded_at
                )
                VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                ON CONFLICT(issue_id, pdf_url) DO UPDATE SET
                  status=excluded.status,
                  stage=excluded.stage,
                  category=excluded.category,
                  detail=excluded.detail,
                  pdf_path=excluded.pdf_path,
                  pdf_sha256=excluded.pdf_sha256,
                  recorded_at=excluded.recorded_at
                ",
            )?;

            for outcome in outcomes {
                statement.execute(params![
                    &outcome.key.issue_id,
                    &outcome.key.pdf_url,
                    outcome.status.as_str(),
                    &outcome.stage,
                    &outcome.category,
                    &outcome.detail,
                    &outcome.pdf_path,
                    &outcome.pdf_sha256,
                    &now,
                ])?;
            }
        }

        tx.execute(
            "
            INSERT OR REPLACE INTO checkpoint(
              id, last_issue_index, last_issue_id, last_pdf_url,
              processed, skipped, failed, output_file_offset, updated_at
            )
            VALUES(1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ",
            params![
                record.last_issue_index as i64,
                record.last_article_key.as_ref().map(|key| key.issue_id.as_str()),
                record.last_article_key.as_ref().map(|key| key.pdf_url.as_str()),
                record.counts.processed as i64,
                record.counts.skipped as i64,
                record.counts.failed as i64,
                record.output_file_offset as i64,
                &now,
            ],
        )?;

        tx.commit().context("failed to commit checkpoint")?;
        Ok(())
    }

    pub fn done_keys(&self) -> Result<HashSet<ArticleKey>> {
        let mut statement = self
            .connection
            .prepare("SELECT issue_id, pdf_url FROM article_outcomes WHERE status = 'done'")?;
        let rows = statement.query_map([], |row| {
            Ok(ArticleKey {
                issue_id: row.get(0)?,
                pdf_url: row.get(1)?,
            })
        })?;

        let mut keys = HashSet::new();
        for row in rows {
            keys.insert(row?);
        }
        Ok(keys)
    }

    pub fn reason_counts(&self, status: ArticleStatus) -> Result<BTreeMap<String, u64>> {
        let mut statement = self.connection.prepare(
            "
            SELECT COALESCE(category, 'unknown'), COUNT(*)
            FROM article_outcomes
            WHERE status = ?1
            GROUP BY 1
            ",
        )?;
        let rows = statement.query_map([status.as_str()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
        })?;

        let mut counts = BTreeMap::new();
        for row in rows {
            let (category, count) = row?;
            counts.insert(category, count);
        }
        Ok(counts)
    }

    pub fn ledger_counts(&self) -> Result<OutcomeCounts> {
        let mut statement = self
            .connection
            .prepare("SELECT status, COUNT(*) FROM article_outcomes GROUP BY status")?;
        let rows = statement.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
        })?;

        let mut counts = OutcomeCounts::default();
        for row in rows {
            let (status, count) = row?;
            match ArticleStatus::parse(&status)? {
                ArticleStatus::Done => counts.processed = count,
                ArticleStatus::Skipped => counts.skipped = count,
                ArticleStatus::Failed => counts.failed = count,
            }
        }
        Ok(counts)
    }

    pub fn reset(&mut self) -> Result<()> {
        self.connection
            .execute_batch(
                "
                DELETE FROM checkpoint;
                DELETE FROM article_outcomes;
                ",
            )
            .context("failed to reset progress store")
    }
}

fn configure_connection(connection: &Connection) -> Result<()> {
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to set journal_mode=WAL")?;
    connection
        .pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous=NORMAL")?;
    Ok(())
}

fn ensure_schema(connection: &Connection) -> Result<()> {
    connection.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS metadata (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS checkpoint (
          id INTEGER PRIMARY KEY CHECK (id = 1),
          last_issue_index INTEGER NOT NULL,
          last_issue_id TEXT,
          last_pdf_url TEXT,
          processed INTEGER NOT NULL DEFAULT 0,
          skipped INTEGER NOT NULL DEFAULT 0,
          failed INTEGER NOT NULL DEFAULT 0,
          output_file_offset INTEGER NOT NULL DEFAULT 0,
          updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS article_outcomes (
          issue_id TEXT NOT NULL,
          pdf_url TEXT NOT NULL,
          status TEXT NOT NULL,
          stage TEXT NOT NULL,
          category TEXT,
          detail TEXT,
          pdf_path TEXT,
          pdf_sha256 TEXT,
          recorded_at TEXT NOT NULL,
          PRIMARY KEY (issue_id, pdf_url)
        );

        CREATE INDEX IF NOT EXISTS idx_article_outcomes_status ON article_outcomes(status);
        ",
    )?;

    connection.execute(
        "INSERT INTO metadata(key, value) VALUES('schema_version', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [PROGRESS_SCHEMA_VERSION],
    )?;

    Ok(())
}
