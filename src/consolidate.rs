// 📦 Consolidation Writer - stable artifacts, published atomically
//
// Two CSV artifacts plus a JSON manifest leave this module. Everything is
// rendered and checksummed in memory first, staged under temp names, and
// renamed into place only after every byte reached disk. A failed run
// leaves the previous publication untouched.

use crate::aggregate::AggregateRow;
use crate::enrich::EnrichedRecord;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

// ============================================================================
// ARTIFACT CONTRACTS
// ============================================================================

pub const CONSOLIDATED_FILE: &str = "consolidado_despesas.csv";
pub const AGGREGATED_FILE: &str = "despesas_agregadas.csv";
pub const MANIFEST_FILE: &str = "manifest.json";

// Schema versions bump whenever a column is added, removed, or renamed.
// Downstream readers key on these, not on column sniffing.
pub const CONSOLIDATED_SCHEMA: &str = "consolidado-v1";
pub const AGGREGATED_SCHEMA: &str = "agregado-v1";

const CONSOLIDATED_HEADERS: [&str; 11] = [
    "CNPJ",
    "Razao_Social",
    "RegistroANS",
    "Modalidade",
    "UF",
    "Conta",
    "Ano",
    "Trimestre",
    "Valor",
    "CNPJ_Valido",
    "Reconciliado",
];

const AGGREGATED_HEADERS: [&str; 6] = [
    "Razao_Social",
    "UF",
    "RegistroANS",
    "Total_Despesas",
    "Media_Trimestral",
    "Desvio_Padrao",
];

/// Checksummed description of one published artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactEntry {
    pub file: String,
    pub schema: String,
    pub rows: usize,
    pub sha256: String,
}

/// Written alongside the artifacts so a consumer can verify what it reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub periods: Vec<String>,
    pub consolidated: ArtifactEntry,
    pub aggregated: ArtifactEntry,
}

/// Where everything landed, handed back to the caller.
#[derive(Debug)]
pub struct WriteReceipt {
    pub consolidated_path: PathBuf,
    pub aggregated_path: PathBuf,
    pub manifest_path: PathBuf,
    pub manifest: Manifest,
}

// ============================================================================
// WRITER
// ============================================================================

pub struct ConsolidationWriter {
    output_dir: PathBuf,
}

impl ConsolidationWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        ConsolidationWriter {
            output_dir: output_dir.into(),
        }
    }

    /// Publish both artifacts and the manifest for one run.
    ///
    /// The staged temp files become visible in a final rename pass, so a
    /// reader of the output directory sees the previous run or this one,
    /// never a mixture of torn files.
    pub fn write(
        &self,
        run_id: &str,
        records: &[EnrichedRecord],
        aggregates: &[AggregateRow],
    ) -> Result<WriteReceipt> {
        fs::create_dir_all(&self.output_dir).with_context(|| {
            format!(
                "Failed to create output directory: {}",
                self.output_dir.display()
            )
        })?;

        let consolidated_bytes = render_consolidated(records)?;
        let aggregated_bytes = render_aggregated(aggregates)?;

        let periods: Vec<String> = records
            .iter()
            .map(|r| r.record.period)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(|p| p.label())
            .collect();

        let manifest = Manifest {
            run_id: run_id.to_string(),
            generated_at: Utc::now(),
            periods,
            consolidated: ArtifactEntry {
                file: CONSOLIDATED_FILE.to_string(),
                schema: CONSOLIDATED_SCHEMA.to_string(),
                rows: records.len(),
                sha256: sha256_hex(&consolidated_bytes),
            },
            aggregated: ArtifactEntry {
                file: AGGREGATED_FILE.to_string(),
                schema: AGGREGATED_SCHEMA.to_string(),
                rows: aggregates.len(),
                sha256: sha256_hex(&aggregated_bytes),
            },
        };

        let manifest_bytes =
            serde_json::to_vec_pretty(&manifest).context("Failed to serialize manifest")?;

        let plan: [(&str, &[u8]); 3] = [
            (CONSOLIDATED_FILE, &consolidated_bytes),
            (AGGREGATED_FILE, &aggregated_bytes),
            (MANIFEST_FILE, &manifest_bytes),
        ];

        // Stage everything first. Any failure removes what was staged and
        // leaves the directory exactly as the previous run published it.
        let mut staged: Vec<PathBuf> = Vec::new();
        for (name, bytes) in &plan {
            let tmp = self.output_dir.join(format!("{}.tmp", name));
            if let Err(e) = fs::write(&tmp, bytes) {
                for t in &staged {
                    let _ = fs::remove_file(t);
                }
                return Err(e).with_context(|| format!("Failed to stage {}", tmp.display()));
            }
            staged.push(tmp);
        }

        // Commit point: same-directory renames.
        for (tmp, (name, _)) in staged.iter().zip(plan.iter()) {
            let target = self.output_dir.join(name);
            if let Err(e) = fs::rename(tmp, &target) {
                for t in &staged {
                    let _ = fs::remove_file(t);
                }
                return Err(e).with_context(|| format!("Failed to publish {}", target.display()));
            }
        }

        Ok(WriteReceipt {
            consolidated_path: self.output_dir.join(CONSOLIDATED_FILE),
            aggregated_path: self.output_dir.join(AGGREGATED_FILE),
            manifest_path: self.output_dir.join(MANIFEST_FILE),
            manifest,
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

// ============================================================================
// RENDERING
// ============================================================================

fn render_consolidated(records: &[EnrichedRecord]) -> Result<Vec<u8>> {
    let mut wtr = csv::Writer::from_writer(Vec::new());

    // Header goes out explicitly so an empty run still publishes the schema
    wtr.write_record(CONSOLIDATED_HEADERS)?;

    for r in records {
        let ano = r.record.period.year.to_string();
        let trimestre = r.record.period.quarter.to_string();
        let valor = r.record.valor.to_string();
        let cnpj_valido = r.cnpj_valido.to_string();
        let reconciliado = r.is_reconciled().to_string();

        wtr.write_record([
            r.cnpj.as_deref().unwrap_or(""),
            r.razao_social.as_deref().unwrap_or(""),
            r.record.registro_ans.as_str(),
            r.modalidade.as_deref().unwrap_or(""),
            r.uf.as_deref().unwrap_or(""),
            r.record.conta.as_str(),
            ano.as_str(),
            trimestre.as_str(),
            valor.as_str(),
            cnpj_valido.as_str(),
            reconciliado.as_str(),
        ])?;
    }

    Ok(wtr.into_inner()?)
}

fn render_aggregated(aggregates: &[AggregateRow]) -> Result<Vec<u8>> {
    let mut wtr = csv::Writer::from_writer(Vec::new());

    wtr.write_record(AGGREGATED_HEADERS)?;

    for a in aggregates {
        // Totals print at source scale; the two statistical columns are
        // centavo figures and always carry two decimals
        let total = a.total_despesas.to_string();
        let media = format!("{:.2}", a.media_trimestral);
        let desvio = format!("{:.2}", a.desvio_padrao);

        wtr.write_record([
            a.razao_social.as_str(),
            a.uf.as_str(),
            a.registro_ans.as_str(),
            total.as_str(),
            media.as_str(),
            desvio.as_str(),
        ])?;
    }

    Ok(wtr.into_inner()?)
}

fn sha256_hex(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// TESTS
// ============================================================================
