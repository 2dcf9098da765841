use crate::aggregate::AggregateRow;
use crate::consolidate::Manifest;
use crate::enrich::EnrichedRecord;
use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;

/// One aggregated line as the query service reads it back.
#[derive(Debug, Clone, Serialize)]
pub struct AggregatedExpense {
    pub registro_ans: String,
    pub razao_social: String,
    pub uf: String,
    pub total_despesas: Decimal,
    pub media_trimestral: Decimal,
    pub desvio_padrao: Decimal,
}

/// Totals for the statistics endpoint, recomputed exactly from the store.
#[derive(Debug, Clone, Serialize)]
pub struct ExpenseStats {
    pub total_geral: Decimal,
    /// (uf, total) pairs, largest total first
    pub distribuicao_uf: Vec<(String, Decimal)>,
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Runs Table - one row per publication
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS runs (
            run_id TEXT PRIMARY KEY,
            published_at TEXT NOT NULL,
            periods TEXT NOT NULL,
            record_count INTEGER NOT NULL,
            aggregate_count INTEGER NOT NULL,
            consolidated_schema TEXT NOT NULL,
            aggregated_schema TEXT NOT NULL,
            consolidated_sha256 TEXT NOT NULL,
            aggregated_sha256 TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Enriched Table - the consolidated records of a run
    // Amounts live as TEXT so they round-trip exactly
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS enriched (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL,
            registro_ans TEXT NOT NULL,
            cnpj TEXT,
            razao_social TEXT,
            modalidade TEXT,
            uf TEXT,
            conta TEXT NOT NULL,
            ano INTEGER NOT NULL,
            trimestre INTEGER NOT NULL,
            valor TEXT NOT NULL,
            cnpj_valido INTEGER NOT NULL,
            reconciliado INTEGER NOT NULL,
            source_file TEXT NOT NULL,
            line_number INTEGER NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Aggregates Table - one row per operator (or the unreconciled bucket)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS aggregates (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL,
            registro_ans TEXT NOT NULL,
            razao_social TEXT NOT NULL,
            uf TEXT NOT NULL,
            total_despesas TEXT NOT NULL,
            media_trimestral TEXT NOT NULL,
            desvio_padrao TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enriched_run ON enriched(run_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enriched_registro ON enriched(registro_ans)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_aggregates_run ON aggregates(run_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_aggregates_registro ON aggregates(registro_ans)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_aggregates_uf ON aggregates(uf)",
        [],
    )?;

    Ok(())
}

/// Persist one run inside a single transaction. Either the run row, every
/// enriched record, and every aggregate land together, or none of them do.
pub fn publish_run(
    conn: &mut Connection,
    manifest: &Manifest,
    records: &[EnrichedRecord],
    aggregates: &[AggregateRow],
) -> Result<()> {
    let tx = conn.transaction()?;

    tx.execute(
        "INSERT INTO runs (
            run_id, published_at, periods, record_count, aggregate_count,
            consolidated_schema, aggregated_schema, consolidated_sha256, aggregated_sha256
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            manifest.run_id,
            manifest.generated_at.to_rfc3339(),
            serde_json::to_string(&manifest.periods)?,
            records.len() as i64,
            aggregates.len() as i64,
            manifest.consolidated.schema,
            manifest.aggregated.schema,
            manifest.consolidated.sha256,
            manifest.aggregated.sha256,
        ],
    )?;

    {
        let mut stmt = tx.prepare(
            "INSERT INTO enriched (
                run_id, registro_ans, cnpj, razao_social, modalidade, uf,
                conta, ano, trimestre, valor, cnpj_valido, reconciliado,
                source_file, line_number
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        )?;

        for r in records {
            stmt.execute(params![
                manifest.run_id,
                r.record.registro_ans,
                r.cnpj,
                r.razao_social,
                r.modalidade,
                r.uf,
                r.record.conta,
                r.record.period.year,
                r.record.period.quarter,
                r.record.valor.to_string(),
                r.cnpj_valido,
                r.is_reconciled(),
                r.record.source_file,
                r.record.line_number as i64,
            ])?;
        }
    }

    {
        let mut stmt = tx.prepare(
            "INSERT INTO aggregates (
                run_id, registro_ans, razao_social, uf,
                total_despesas, media_trimestral, desvio_padrao
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;

        for a in aggregates {
            stmt.execute(params![
                manifest.run_id,
                a.registro_ans,
                a.razao_social,
                a.uf,
                a.total_despesas.to_string(),
                a.media_trimestral.to_string(),
                a.desvio_padrao.to_string(),
            ])?;
        }
    }

    tx.commit()?;
    Ok(())
}

/// The run the query service should serve: newest publication wins.
pub fn latest_run_id(conn: &Connection) -> Result<Option<String>> {
    let run_id = conn
        .query_row(
            "SELECT run_id FROM runs ORDER BY published_at DESC, rowid DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?;

    Ok(run_id)
}

pub fn count_enriched(conn: &Connection, run_id: &str) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM enriched WHERE run_id = ?1",
        [run_id],
        |row| row.get(0),
    )?;

    Ok(count)
}

pub fn count_aggregates(conn: &Connection, run_id: &str) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM aggregates WHERE run_id = ?1",
        [run_id],
        |row| row.get(0),
    )?;

    Ok(count)
}

/// Page through the aggregates of one run, optionally filtered by a
/// case-insensitive name search. Returns the page plus the total count
/// matching the filter. An offset past the end yields an empty page.
pub fn query_aggregates(
    conn: &Connection,
    run_id: &str,
    search: Option<&str>,
    limit: u32,
    offset: u64,
) -> Result<(Vec<AggregatedExpense>, u32)> {
    let pattern = format!("%{}%", search.unwrap_or(""));

    let total: i64 = conn.query_row(
        "SELECT COUNT(*) FROM aggregates WHERE run_id = ?1 AND razao_social LIKE ?2",
        params![run_id, pattern],
        |row| row.get(0),
    )?;

    // Amounts are TEXT for exactness; the CAST exists only to order them
    let mut stmt = conn.prepare(
        "SELECT registro_ans, razao_social, uf, total_despesas, media_trimestral, desvio_padrao
         FROM aggregates
         WHERE run_id = ?1 AND razao_social LIKE ?2
         ORDER BY CAST(total_despesas AS REAL) DESC, registro_ans ASC
         LIMIT ?3 OFFSET ?4",
    )?;

    let rows = stmt
        .query_map(params![run_id, pattern, limit, offset as i64], |row| {
            let total_despesas: String = row.get(3)?;
            let media_trimestral: String = row.get(4)?;
            let desvio_padrao: String = row.get(5)?;

            Ok(AggregatedExpense {
                registro_ans: row.get(0)?,
                razao_social: row.get(1)?,
                uf: row.get(2)?,
                total_despesas: total_despesas
                    .parse::<Decimal>()
                    .map_err(|_| rusqlite::Error::InvalidQuery)?,
                media_trimestral: media_trimestral
                    .parse::<Decimal>()
                    .map_err(|_| rusqlite::Error::InvalidQuery)?,
                desvio_padrao: desvio_padrao
                    .parse::<Decimal>()
                    .map_err(|_| rusqlite::Error::InvalidQuery)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok((rows, total as u32))
}

/// Grand total plus per-UF distribution for one run, summed in `Decimal`
/// on this side so no floating point ever touches the figures.
pub fn expense_stats(conn: &Connection, run_id: &str) -> Result<ExpenseStats> {
    let mut stmt =
        conn.prepare("SELECT uf, total_despesas FROM aggregates WHERE run_id = ?1")?;

    let pairs = stmt
        .query_map([run_id], |row| {
            let uf: String = row.get(0)?;
            let total: String = row.get(1)?;
            let total = total
                .parse::<Decimal>()
                .map_err(|_| rusqlite::Error::InvalidQuery)?;
            Ok((uf, total))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut total_geral = Decimal::ZERO;
    let mut by_uf: HashMap<String, Decimal> = HashMap::new();

    for (uf, total) in pairs {
        total_geral += total;
        *by_uf.entry(uf).or_insert(Decimal::ZERO) += total;
    }

    let mut distribuicao_uf: Vec<(String, Decimal)> = by_uf.into_iter().collect();
    distribuicao_uf.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    Ok(ExpenseStats {
        total_geral,
        distribuicao_uf,
    })
}
