use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Context as _, Result};
use rusqlite::{Connection, OptionalExtension as _, params};

use super::AcceptedQuote;
use super::accept::AcceptanceLedger;
use crate::error::FlyoverError;
use crate::quote::{Direction, Quote, QuoteHash, ValidatedQuote};
use crate::signer::QuoteSignature;

#[derive(Debug)]
pub struct SqliteQuoteStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

struct QuoteRow {
    quote_hash: String,
    provider_id: i64,
    direction: String,
    quote_json: String,
}

struct AcceptedRow {
    quote: QuoteRow,
    signature: String,
    deposit_address: String,
    client_signature: Option<String>,
}

const SELECT_ACCEPTED: &str = r#"
SELECT
  q.quote_hash,
  q.provider_id,
  q.direction,
  q.quote_json,
  a.signature,
  a.deposit_address,
  a.client_signature
FROM accepted_quotes a
JOIN quotes q ON q.quote_hash = a.quote_hash
"#;

impl SqliteQuoteStore {
    pub fn open(path: PathBuf) -> Result<Self> {
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create quote store dir {}", dir.display()))?;
        }

        let conn =
            Connection::open(&path).with_context(|| format!("open sqlite {}", path.display()))?;
        conn.busy_timeout(Duration::from_secs(5))
            .context("set sqlite busy_timeout")?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")
            .context("configure sqlite pragmas")?;

        migrate(&conn).context("migrate sqlite schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores a validated quote. Storing the same hash again is a no-op.
    pub fn insert_quote(&self, quote: &ValidatedQuote) -> Result<()> {
        let conn = self.conn();
        insert_quote_row(&conn, quote)
    }

    pub fn get_quote(&self, quote_hash: &QuoteHash) -> Result<Option<ValidatedQuote>> {
        let row = self
            .conn()
            .query_row(
                r#"
SELECT quote_hash, provider_id, direction, quote_json
FROM quotes
WHERE quote_hash = ?1
"#,
                params![quote_hash.to_string()],
                |row| {
                    Ok(QuoteRow {
                        quote_hash: row.get(0)?,
                        provider_id: row.get(1)?,
                        direction: row.get(2)?,
                        quote_json: row.get(3)?,
                    })
                },
            )
            .optional()
            .with_context(|| format!("get quote {quote_hash}"))?;
        row.map(quote_from_row).transpose()
    }

    /// Records an acceptance and returns the stored record, which is the earlier one when the
    /// hash was already accepted.
    pub fn insert_accepted(&self, accepted: &AcceptedQuote) -> Result<AcceptedQuote> {
        let hash = accepted.hash().to_string();
        {
            let mut conn = self.conn();
            let tx = conn.transaction().context("begin accept transaction")?;
            insert_quote_row(&tx, accepted.quote())?;
            tx.execute(
                r#"
INSERT OR IGNORE INTO accepted_quotes (
  quote_hash,
  signature,
  deposit_address,
  client_signature
) VALUES (?1, ?2, ?3, ?4)
"#,
                params![
                    &hash,
                    accepted.signature().as_str(),
                    accepted.deposit_address(),
                    accepted.client_signature().map(QuoteSignature::as_str),
                ],
            )
            .with_context(|| format!("insert accepted quote {hash}"))?;
            tx.commit().context("commit accept transaction")?;
        }

        self.get_accepted(accepted.hash())?
            .with_context(|| format!("accepted quote {hash} missing after insert"))
    }

    pub fn get_accepted(&self, quote_hash: &QuoteHash) -> Result<Option<AcceptedQuote>> {
        let row = self
            .conn()
            .query_row(
                &format!("{SELECT_ACCEPTED} WHERE a.quote_hash = ?1"),
                params![quote_hash.to_string()],
                accepted_row,
            )
            .optional()
            .with_context(|| format!("get accepted quote {quote_hash}"))?;
        row.map(accepted_from_row).transpose()
    }

    pub fn list_accepted(&self) -> Result<Vec<AcceptedQuote>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!("{SELECT_ACCEPTED} ORDER BY a.accepted_at, a.quote_hash"))
            .context("prepare list accepted quotes")?;

        let rows = stmt
            .query_map([], accepted_row)
            .context("query list accepted quotes")?;

        let mut out = Vec::new();
        for row in rows {
            let row = row.context("read accepted quote row")?;
            out.push(accepted_from_row(row)?);
        }
        Ok(out)
    }
}

impl AcceptanceLedger for SqliteQuoteStore {
    fn find(&self, quote_hash: &QuoteHash) -> crate::error::Result<Option<AcceptedQuote>> {
        self.get_accepted(quote_hash).map_err(storage_error)
    }

    fn record(&self, accepted: &AcceptedQuote) -> crate::error::Result<AcceptedQuote> {
        self.insert_accepted(accepted).map_err(storage_error)
    }
}

fn storage_error(err: anyhow::Error) -> FlyoverError {
    FlyoverError::Storage(format!("{err:#}"))
}

fn insert_quote_row(conn: &Connection, quote: &ValidatedQuote) -> Result<()> {
    let hash = quote.hash().to_string();
    let quote_json = serde_json::to_string(quote.quote()).context("encode quote json")?;
    let provider_id =
        i64::try_from(quote.provider_id()).context("provider id does not fit in sqlite")?;
    conn.execute(
        r#"
INSERT OR IGNORE INTO quotes (
  quote_hash,
  provider_id,
  direction,
  quote_json
) VALUES (?1, ?2, ?3, ?4)
"#,
        params![&hash, provider_id, quote.direction().as_str(), &quote_json],
    )
    .with_context(|| format!("insert quote {hash}"))?;
    Ok(())
}

fn accepted_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AcceptedRow> {
    Ok(AcceptedRow {
        quote: QuoteRow {
            quote_hash: row.get(0)?,
            provider_id: row.get(1)?,
            direction: row.get(2)?,
            quote_json: row.get(3)?,
        },
        signature: row.get(4)?,
        deposit_address: row.get(5)?,
        client_signature: row.get(6)?,
    })
}

fn quote_from_row(row: QuoteRow) -> Result<ValidatedQuote> {
    let hash: QuoteHash = row
        .quote_hash
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid stored quote hash {}: {e}", row.quote_hash))?;
    let direction: Direction = row
        .direction
        .parse()
        .map_err(|e| anyhow::anyhow!("quote {hash}: {e}"))?;
    let quote: Quote = serde_json::from_str(&row.quote_json)
        .with_context(|| format!("decode stored quote {hash}"))?;
    anyhow::ensure!(
        quote.direction() == direction,
        "quote {hash} stored as {direction} but body is {}",
        quote.direction()
    );
    let provider_id = u64::try_from(row.provider_id)
        .with_context(|| format!("invalid provider_id {} for quote {hash}", row.provider_id))?;
    ValidatedQuote::restore(provider_id, quote, &hash).map_err(anyhow::Error::from)
}

fn accepted_from_row(row: AcceptedRow) -> Result<AcceptedQuote> {
    let quote = quote_from_row(row.quote)?;
    Ok(AcceptedQuote::new(
        quote,
        QuoteSignature::from(row.signature),
        row.deposit_address,
        row.client_signature.map(QuoteSignature::from),
    ))
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS quotes (
  quote_hash TEXT PRIMARY KEY,
  provider_id INTEGER NOT NULL,
  direction TEXT NOT NULL,
  quote_json TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS accepted_quotes (
  quote_hash TEXT PRIMARY KEY REFERENCES quotes(quote_hash),
  signature TEXT NOT NULL,
  deposit_address TEXT NOT NULL,
  client_signature TEXT,
  accepted_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS quotes_provider_idx ON quotes(provider_id, direction);
"#,
    )
    .context("create tables")?;
    Ok(())
}
