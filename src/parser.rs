// 📄 Source File Parsing - ANS portal CSVs
// Both inputs arrive Latin-1 encoded with `;` delimiters and header names
// that drift between publications, so columns are resolved by fragment.

use crate::period::Period;
use crate::registry::OperatorIdentity;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;

// ============================================================================
// CORE TYPES
// ============================================================================

/// One expense figure lifted from a quarterly accounting statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisclosureRecord {
    /// ANS registration number of the filing operator
    pub registro_ans: String,

    /// Account code, or the account description for files without codes
    pub conta: String,

    /// Closing balance for the quarter, kept exact
    pub valor: Decimal,

    /// Competence period, taken from where the file sits in the tree.
    /// In-row dates are unreliable and never consulted.
    pub period: Period,

    // Provenance (siempre presente)
    pub source_file: String,
    pub line_number: u64,
}

/// Outcome of parsing one statement file.
#[derive(Debug)]
pub struct ParsedStatement {
    pub records: Vec<DisclosureRecord>,

    /// Rows dropped for a missing registro or unparseable valor.
    /// Each one is logged; this count feeds the run report.
    pub malformed: usize,
}

// ============================================================================
// DECODING HELPERS
// ============================================================================

/// Latin-1 to UTF-8. Every byte maps to the code point of the same value,
/// so this conversion cannot fail.
fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// Parse an amount written in Brazilian convention: "1.234,56" is 1234.56.
///
/// Dots are thousands separators and the comma is the decimal mark, so
/// dots are stripped unconditionally before the comma becomes a point.
/// Blank or non-numeric input yields `None`.
pub fn parse_brazilian_decimal(raw: &str) -> Option<Decimal> {
    let normalized = raw.trim().replace('.', "").replace(',', ".");
    if normalized.is_empty() {
        return None;
    }
    normalized.parse::<Decimal>().ok()
}

/// Find the first header containing `fragment` (case-insensitive).
///
/// The portal renames columns between publications ("REG_ANS",
/// "Registro_ANS", ...), so exact names cannot be trusted.
fn locate(headers: &csv::StringRecord, fragment: &str) -> Option<usize> {
    headers
        .iter()
        .position(|h| h.trim().to_uppercase().contains(fragment))
}

// ============================================================================
// QUARTERLY STATEMENTS
// ============================================================================

/// Parse one quarterly statement already decoded to UTF-8.
///
/// Rows missing the operator key or carrying an unparseable amount are
/// counted as malformed and logged, never silently lost. A file without
/// the essential columns is an error: skipping it whole would understate
/// every total downstream.
pub fn parse_statement_str(
    input: &str,
    period: Period,
    source_file: &str,
) -> Result<ParsedStatement> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .flexible(true)
        .from_reader(input.as_bytes());

    let headers = reader
        .headers()
        .with_context(|| format!("Failed to read headers of {}", source_file))?
        .clone();

    let reg_col = locate(&headers, "REG_ANS")
        .with_context(|| format!("{}: no REG_ANS column found", source_file))?;

    // Older publications carry VL_SALDO only. The FINAL fragment is tried
    // first because VL_SALDO_INICIAL also matches the shorter one.
    let val_col = locate(&headers, "VL_SALDO_FINAL")
        .or_else(|| locate(&headers, "VL_SALDO"))
        .with_context(|| format!("{}: no VL_SALDO column found", source_file))?;

    let conta_col = locate(&headers, "CD_CONTA").or_else(|| locate(&headers, "DESCRICAO"));

    let mut records = Vec::new();
    let mut malformed = 0;

    for result in reader.records() {
        let row = match result {
            Ok(row) => row,
            Err(e) => {
                malformed += 1;
                log::warn!("{}: unreadable row dropped: {}", source_file, e);
                continue;
            }
        };

        let line_number = row.position().map(|p| p.line()).unwrap_or(0);

        let registro_ans = row.get(reg_col).unwrap_or("").trim().to_string();
        if registro_ans.is_empty() {
            malformed += 1;
            log::warn!("{}:{}: row without REG_ANS dropped", source_file, line_number);
            continue;
        }

        let raw_valor = row.get(val_col).unwrap_or("");
        let valor = match parse_brazilian_decimal(raw_valor) {
            Some(v) => v,
            None => {
                malformed += 1;
                log::warn!(
                    "{}:{}: unparseable valor {:?} dropped",
                    source_file,
                    line_number,
                    raw_valor
                );
                continue;
            }
        };

        let conta = conta_col
            .and_then(|i| row.get(i))
            .unwrap_or("")
            .trim()
            .to_string();

        records.push(DisclosureRecord {
            registro_ans,
            conta,
            valor,
            period,
            source_file: source_file.to_string(),
            line_number,
        });
    }

    Ok(ParsedStatement { records, malformed })
}

/// Read one statement file from disk, decode it, and parse it.
pub fn parse_statement_file(path: &Path, period: Period) -> Result<ParsedStatement> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read statement file: {}", path.display()))?;

    let source_file = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown.csv")
        .to_string();

    parse_statement_str(&decode_latin1(&bytes), period, &source_file)
}

// ============================================================================
// CADOP REGISTRY
// ============================================================================

/// Parse the CADOP operator snapshot already decoded to UTF-8.
///
/// Only the registration number column is essential. Identity fields the
/// snapshot does not carry come back empty; the index layer decides what
/// to do with blank keys.
pub fn parse_registry_str(input: &str) -> Result<Vec<OperatorIdentity>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .flexible(true)
        .from_reader(input.as_bytes());

    let headers = reader
        .headers()
        .context("Failed to read registry headers")?
        .clone();

    // "REGISTRO" also matches Data_Registro_ANS, but Registro_ANS comes
    // first in every published snapshot and locate takes the first hit.
    let registro_col =
        locate(&headers, "REGISTRO").context("registry has no REGISTRO column")?;
    let cnpj_col = locate(&headers, "CNPJ");
    let razao_col = locate(&headers, "RAZAO");
    let modalidade_col = locate(&headers, "MODALIDADE");
    let uf_col = locate(&headers, "UF");

    let mut operators = Vec::new();

    for result in reader.records() {
        let row = result.context("Failed to read registry row")?;

        operators.push(OperatorIdentity {
            registro_ans: row.get(registro_col).unwrap_or("").trim().to_string(),
            cnpj: cnpj_col
                .and_then(|i| row.get(i))
                .unwrap_or("")
                .trim()
                .to_string(),
            razao_social: razao_col
                .and_then(|i| row.get(i))
                .unwrap_or("")
                .trim()
                .to_string(),
            modalidade: modalidade_col
                .and_then(|i| row.get(i))
                .unwrap_or("")
                .trim()
                .to_string(),
            uf: uf_col
                .and_then(|i| row.get(i))
                .unwrap_or("")
                .trim()
                .to_string(),
        });
    }

    Ok(operators)
}

/// Read the registry snapshot from disk, decode it, and parse it.
pub fn parse_registry_file(path: &Path) -> Result<Vec<OperatorIdentity>> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read registry file: {}", path.display()))?;

    parse_registry_str(&decode_latin1(&bytes))
}

// ============================================================================
// TESTS
// ============================================================================
