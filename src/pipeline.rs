// 🔄 Pipeline - registry to published artifacts, one run
//
// registry → statements → enrich → validate → aggregate → publish, single
// threaded with the whole snapshot in memory. A run either publishes both
// artifacts or leaves the previous publication alone.

use crate::aggregate::{aggregate, AggregateRow};
use crate::config::PipelineConfig;
use crate::consolidate::{ConsolidationWriter, WriteReceipt};
use crate::enrich::{EnrichedRecord, Enricher};
use crate::parser::{parse_registry_file, parse_statement_file, DisclosureRecord};
use crate::period::Period;
use crate::registry::OperatorIndex;
use crate::validation::{RecordValidator, ValidationSummary};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

pub struct Pipeline {
    config: PipelineConfig,
}

/// Everything a run produced, for callers that keep going (the CLI hands
/// records and aggregates straight to the SQLite store).
pub struct PipelineOutput {
    pub records: Vec<EnrichedRecord>,
    pub aggregates: Vec<AggregateRow>,
    pub receipt: WriteReceipt,
    pub report: RunReport,
}

/// The numbers an operator wants to see after a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,

    pub registry_operators: usize,
    pub registry_blank_keys: usize,

    pub statement_files: usize,
    pub rows_parsed: usize,
    pub rows_malformed: usize,
    pub rows_unmatched: usize,

    pub validation: ValidationSummary,

    pub periods: Vec<String>,
    /// Aggregate rows written: one per operator, plus the unreconciled
    /// bucket when any record missed the registry
    pub operators_aggregated: usize,

    pub consolidated_path: String,
    pub aggregated_path: String,
    pub manifest_path: String,
}

impl RunReport {
    pub fn summary(&self) -> String {
        format!(
            "Run {}\n\
             Registry: {} operators ({} blank keys skipped)\n\
             Statements: {} files across {} periods\n\
             Rows: {} kept, {} malformed dropped, {} unmatched\n\
             CNPJ check: {} valid, {} flagged\n\
             Aggregates: {} rows",
            self.run_id,
            self.registry_operators,
            self.registry_blank_keys,
            self.statement_files,
            self.periods.len(),
            self.rows_parsed,
            self.rows_malformed,
            self.rows_unmatched,
            self.validation.valid,
            self.validation.invalid,
            self.operators_aggregated,
        )
    }
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Pipeline { config }
    }

    /// Execute one full run.
    pub fn run(&self) -> Result<PipelineOutput> {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();

        // Registry first: it is the identity source for everything else
        let registry_path = self.config.registry_path();
        log::info!("loading registry {}", registry_path.display());
        let index = OperatorIndex::build(parse_registry_file(&registry_path)?);
        if index.is_empty() {
            return Err(anyhow::anyhow!(
                "registry {} has no usable operators",
                registry_path.display()
            ));
        }
        let registry_operators = index.len();
        let registry_blank_keys = index.skipped_blank();
        log::info!("registry: {} operators indexed", registry_operators);

        let statements = self.discover_statements()?;
        if statements.is_empty() {
            return Err(anyhow::anyhow!(
                "no quarterly statements under {}",
                self.config.data_dir.display()
            ));
        }

        let mut parsed: Vec<DisclosureRecord> = Vec::new();
        let mut rows_malformed = 0;
        for (period, path) in &statements {
            log::debug!("parsing {} as {}", path.display(), period);
            let statement = parse_statement_file(path, *period)?;
            log::info!(
                "{}: {} rows kept, {} malformed",
                path.display(),
                statement.records.len(),
                statement.malformed
            );
            rows_malformed += statement.malformed;
            parsed.extend(statement.records);
        }
        let rows_parsed = parsed.len();

        let enricher = Enricher::new(index);
        let mut enriched = enricher.enrich_batch(parsed);

        // Malformed rows were the only permitted drop point. From here on
        // every parsed row must reach the artifacts.
        if enriched.len() != rows_parsed {
            return Err(anyhow::anyhow!(
                "enrichment changed the record count: {} in, {} out",
                rows_parsed,
                enriched.len()
            ));
        }

        let validation = RecordValidator::new().validate_batch(&mut enriched);
        let rows_unmatched = enriched.iter().filter(|r| !r.is_reconciled()).count();
        log::info!(
            "enriched {} rows, {} unmatched, {} flagged CNPJs",
            enriched.len(),
            rows_unmatched,
            validation.invalid
        );

        let aggregates = aggregate(&enriched);
        log::info!("{} aggregate rows", aggregates.len());

        let writer = ConsolidationWriter::new(&self.config.output_dir);
        let receipt = writer.write(&run_id, &enriched, &aggregates)?;

        let report = RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            registry_operators,
            registry_blank_keys,
            statement_files: statements.len(),
            rows_parsed,
            rows_malformed,
            rows_unmatched,
            validation,
            periods: receipt.manifest.periods.clone(),
            operators_aggregated: aggregates.len(),
            consolidated_path: receipt.consolidated_path.display().to_string(),
            aggregated_path: receipt.aggregated_path.display().to_string(),
            manifest_path: receipt.manifest_path.display().to_string(),
        };

        Ok(PipelineOutput {
            records: enriched,
            aggregates,
            receipt,
            report,
        })
    }

    /// Walk `<data_dir>/<year>/` for quarterly files, oldest first.
    ///
    /// Only 4-digit directory names count as year partitions, which also
    /// keeps the registry snapshot at the data root out of the walk.
    fn discover_statements(&self) -> Result<Vec<(Period, PathBuf)>> {
        let mut found = Vec::new();

        let entries = fs::read_dir(&self.config.data_dir).with_context(|| {
            format!("Failed to read data dir: {}", self.config.data_dir.display())
        })?;

        for entry in entries {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }

            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name.to_string(),
                None => continue,
            };
            if name.len() != 4 || !name.bytes().all(|b| b.is_ascii_digit()) {
                continue;
            }

            for file in fs::read_dir(&path)? {
                let file_path = file?.path();
                if !file_path.is_file() {
                    continue;
                }

                let is_csv = file_path
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| e.eq_ignore_ascii_case("csv"))
                    .unwrap_or(false);
                if !is_csv {
                    continue;
                }

                match Period::from_partition(&file_path) {
                    Some(period) => found.push((period, file_path)),
                    None => log::debug!("ignoring non-quarterly file {}", file_path.display()),
                }
            }
        }

        found.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        Ok(found)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::UNRECONCILED_LABEL;
    use rust_decimal::Decimal;
    use std::path::Path;

    fn write_latin1(path: &Path, text: &str) {
        let bytes: Vec<u8> = text.chars().map(|c| c as u32 as u8).collect();
        fs::write(path, bytes).unwrap();
    }

    fn seed_data_dir(root: &Path) {
        write_latin1(
            &root.join("relatorio_cadop.csv"),
            "Registro_ANS;CNPJ;Razao_Social;Modalidade;UF\n\
             123456;11222333000181;ALFA SAUDE LTDA;Cooperativa Médica;SP\n",
        );

        fs::create_dir_all(root.join("2023")).unwrap();
        write_latin1(
            &root.join("2023").join("1T2023.csv"),
            "REG_ANS;CD_CONTA_CONTABIL;VL_SALDO_FINAL\n\
             123456;41111;100,00\n\
             999999;41112;50,00\n",
        );
        write_latin1(
            &root.join("2023").join("2T2023.csv"),
            "REG_ANS;CD_CONTA_CONTABIL;VL_SALDO_FINAL\n\
             123456;41111;300,00\n",
        );
    }

    fn config_for(root: &Path) -> PipelineConfig {
        PipelineConfig {
            data_dir: root.to_path_buf(),
            output_dir: root.join("out"),
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn test_end_to_end_run() {
        let dir = tempfile::tempdir().unwrap();
        seed_data_dir(dir.path());

        let output = Pipeline::new(config_for(dir.path())).run().unwrap();
        let report = &output.report;

        assert_eq!(report.registry_operators, 1);
        assert_eq!(report.statement_files, 2);
        assert_eq!(report.rows_parsed, 3);
        assert_eq!(report.rows_malformed, 0);
        assert_eq!(report.rows_unmatched, 1);
        assert_eq!(report.periods, vec!["1T2023", "2T2023"]);
        assert_eq!(output.records.len(), 3, "Every parsed row survives");

        // Operator series [100, 300]: total 400, mean 200, deviation 100
        let operator = output
            .aggregates
            .iter()
            .find(|a| a.registro_ans == "123456")
            .unwrap();
        assert_eq!(operator.razao_social, "ALFA SAUDE LTDA");
        assert_eq!(operator.total_despesas, Decimal::new(40000, 2));
        assert_eq!(operator.media_trimestral, Decimal::new(20000, 2));
        assert_eq!(operator.desvio_padrao, Decimal::new(10000, 2));

        // The registro nobody knows still shows up, in the bucket
        let bucket = output
            .aggregates
            .iter()
            .find(|a| a.registro_ans.is_empty())
            .unwrap();
        assert_eq!(bucket.razao_social, UNRECONCILED_LABEL);
        assert_eq!(bucket.total_despesas, Decimal::new(5000, 2));

        // Valid CNPJ from the registry flows onto the matched records
        let matched = output
            .records
            .iter()
            .find(|r| r.record.registro_ans == "123456")
            .unwrap();
        assert!(matched.cnpj_valido);

        assert!(output.receipt.consolidated_path.exists());
        assert!(output.receipt.aggregated_path.exists());
        assert!(output.receipt.manifest_path.exists());

        println!("✅ {}", report.summary());
    }

    #[test]
    fn test_missing_registry_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("2023")).unwrap();
        write_latin1(
            &dir.path().join("2023").join("1T2023.csv"),
            "REG_ANS;VL_SALDO_FINAL\n123456;100,00\n",
        );

        let result = Pipeline::new(config_for(dir.path())).run();
        assert!(result.is_err());
    }

    #[test]
    fn test_registry_without_usable_rows_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write_latin1(
            &dir.path().join("relatorio_cadop.csv"),
            "Registro_ANS;Razao_Social\n",
        );

        let result = Pipeline::new(config_for(dir.path())).run();
        assert!(result.is_err());
    }

    #[test]
    fn test_no_statements_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write_latin1(
            &dir.path().join("relatorio_cadop.csv"),
            "Registro_ANS;Razao_Social\n123456;ALFA SAUDE LTDA\n",
        );

        let result = Pipeline::new(config_for(dir.path())).run();
        assert!(result.is_err());
    }

    #[test]
    fn test_malformed_rows_reported_not_published() {
        let dir = tempfile::tempdir().unwrap();
        write_latin1(
            &dir.path().join("relatorio_cadop.csv"),
            "Registro_ANS;Razao_Social\n123456;ALFA SAUDE LTDA\n",
        );
        fs::create_dir_all(dir.path().join("2023")).unwrap();
        write_latin1(
            &dir.path().join("2023").join("1T2023.csv"),
            "REG_ANS;VL_SALDO_FINAL\n123456;100,00\n;50,00\n",
        );

        let output = Pipeline::new(config_for(dir.path())).run().unwrap();

        assert_eq!(output.report.rows_parsed, 1);
        assert_eq!(output.report.rows_malformed, 1);
        assert_eq!(output.records.len(), 1);
    }

    #[test]
    fn test_non_quarterly_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        seed_data_dir(dir.path());
        // Stray files that must not be picked up as statements
        write_latin1(&dir.path().join("2023").join("leiame.txt"), "notas\n");
        write_latin1(
            &dir.path().join("2023").join("resumo.csv"),
            "REG_ANS;VL_SALDO_FINAL\n123456;999,99\n",
        );

        let output = Pipeline::new(config_for(dir.path())).run().unwrap();

        assert_eq!(output.report.statement_files, 2);
        assert_eq!(output.report.rows_parsed, 3);
    }
}
