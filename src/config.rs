// ⚙️ Pipeline Configuration
// Defaults match the layout the fetcher produces; a JSON file can override
// any subset of fields.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Root of the partitioned source tree: `<data_dir>/<year>/<quarter>.csv`
    pub data_dir: PathBuf,

    /// Where the artifacts are published
    pub output_dir: PathBuf,

    /// SQLite store consumed by the query service
    pub db_path: PathBuf,

    /// CADOP snapshot file name inside `data_dir`
    pub registry_file: String,

    /// How many of the newest quarters the fetcher pulls
    pub max_quarters: usize,

    /// ANS open-data directory listing the quarterly statements
    pub demonstracoes_url: String,

    /// ANS open-data directory listing the operator registry
    pub cadop_url: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            data_dir: PathBuf::from("data"),
            output_dir: PathBuf::from("data"),
            db_path: PathBuf::from("consolidado.db"),
            registry_file: "relatorio_cadop.csv".to_string(),
            max_quarters: 3,
            demonstracoes_url: "https://dadosabertos.ans.gov.br/FTP/PDA/demonstracoes_contabeis/"
                .to_string(),
            cadop_url: "https://dadosabertos.ans.gov.br/FTP/PDA/operadoras_de_plano_de_saude_ativas/"
                .to_string(),
        }
    }
}

impl PipelineConfig {
    /// Load a JSON config file. Fields absent from the file keep their
    /// defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: PipelineConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Full path of the registry snapshot.
    pub fn registry_path(&self) -> PathBuf {
        self.data_dir.join(&self.registry_file)
    }
}

// ============================================================================
// TESTS
// ============================================================================
