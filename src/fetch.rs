// 📥 Fetcher - pulls ANS open-data files into the local layout
//
// The portal serves plain directory listings. This walks them with an
// HTML link scrape, picks the CADOP snapshot and the newest quarters, and
// writes them exactly where the pipeline expects to read them. The core
// pipeline itself never touches the network.

use crate::config::PipelineConfig;
use crate::period::Period;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub struct Fetcher {
    client: reqwest::blocking::Client,
    demonstracoes_url: String,
    cadop_url: String,
    data_dir: PathBuf,
    registry_file: String,
    max_quarters: usize,
}

#[derive(Debug)]
pub struct FetchReport {
    pub registry: PathBuf,
    pub statements: Vec<PathBuf>,
}

impl FetchReport {
    pub fn summary(&self) -> String {
        format!(
            "registry snapshot + {} statement files in place",
            self.statements.len()
        )
    }
}

impl Fetcher {
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Fetcher {
            client,
            demonstracoes_url: config.demonstracoes_url.clone(),
            cadop_url: config.cadop_url.clone(),
            data_dir: config.data_dir.clone(),
            registry_file: config.registry_file.clone(),
            max_quarters: config.max_quarters,
        })
    }

    /// Registry snapshot plus the newest quarterly statements.
    pub fn fetch_all(&self) -> Result<FetchReport> {
        let registry = self.fetch_registry()?;
        let statements = self.fetch_statements()?;
        Ok(FetchReport {
            registry,
            statements,
        })
    }

    /// Download the CADOP snapshot to `<data_dir>/<registry_file>`.
    pub fn fetch_registry(&self) -> Result<PathBuf> {
        log::info!("listing {}", self.cadop_url);
        let links = self.list_links(&self.cadop_url)?;
        let csvs: Vec<&str> = links
            .iter()
            .map(|l| l.as_str())
            .filter(|l| l.to_lowercase().ends_with(".csv"))
            .collect();

        let chosen = pick_registry_link(&csvs)
            .ok_or_else(|| anyhow::anyhow!("no CSV links at {}", self.cadop_url))?;

        fs::create_dir_all(&self.data_dir).with_context(|| {
            format!("Failed to create data dir: {}", self.data_dir.display())
        })?;

        let target = self.data_dir.join(&self.registry_file);
        self.download(&join_url(&self.cadop_url, chosen), &target)?;
        Ok(target)
    }

    /// Walk year directories newest-first and download quarterly files
    /// until `max_quarters` are in place.
    pub fn fetch_statements(&self) -> Result<Vec<PathBuf>> {
        log::info!("listing {}", self.demonstracoes_url);
        let links = self.list_links(&self.demonstracoes_url)?;

        let mut years: Vec<String> = links.iter().filter_map(|l| year_dir_name(l)).collect();
        years.sort();
        years.reverse();
        years.dedup();

        let mut downloaded = Vec::new();

        for year in years {
            if downloaded.len() >= self.max_quarters {
                break;
            }

            let year_url = join_url(&self.demonstracoes_url, &format!("{}/", year));
            let year_dir = self.data_dir.join(&year);
            fs::create_dir_all(&year_dir)
                .with_context(|| format!("Failed to create {}", year_dir.display()))?;

            let mut files: Vec<String> = self
                .list_links(&year_url)?
                .into_iter()
                .filter(|l| l.to_lowercase().ends_with(".csv"))
                .collect();
            // "4T2023.csv" sorts after "1T2023.csv", so reversing walks the
            // newest quarter of the year first
            files.sort();
            files.reverse();

            for file in files {
                if downloaded.len() >= self.max_quarters {
                    break;
                }

                let target = year_dir.join(&file);
                if Period::from_partition(&target).is_none() {
                    log::debug!("skipping non-quarterly link {}", file);
                    continue;
                }

                self.download(&join_url(&year_url, &file), &target)?;
                downloaded.push(target);
            }
        }

        Ok(downloaded)
    }

    /// All href targets on one listing page.
    fn list_links(&self, url: &str) -> Result<Vec<String>> {
        let body = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("Failed to fetch {}", url))?
            .error_for_status()
            .with_context(|| format!("Bad response from {}", url))?
            .text()
            .with_context(|| format!("Failed to read body of {}", url))?;

        let document = scraper::Html::parse_document(&body);
        let selector = scraper::Selector::parse("a")
            .map_err(|e| anyhow::anyhow!("bad selector: {:?}", e))?;

        Ok(document
            .select(&selector)
            .filter_map(|a| a.value().attr("href"))
            .map(|href| href.to_string())
            .collect())
    }

    fn download(&self, url: &str, target: &Path) -> Result<()> {
        log::info!("downloading {}", url);

        let bytes = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("Failed to fetch {}", url))?
            .error_for_status()
            .with_context(|| format!("Bad response from {}", url))?
            .bytes()
            .with_context(|| format!("Failed to read {}", url))?;

        fs::write(target, &bytes)
            .with_context(|| format!("Failed to write {}", target.display()))?;

        println!("✓ {} ({} bytes)", target.display(), bytes.len());
        Ok(())
    }
}

// ============================================================================
// LINK HELPERS
// ============================================================================

/// Relative year-directory links look like "2023/".
fn year_dir_name(link: &str) -> Option<String> {
    let name = link.trim_end_matches('/');
    if link.ends_with('/') && name.len() == 4 && name.bytes().all(|b| b.is_ascii_digit()) {
        Some(name.to_string())
    } else {
        None
    }
}

/// Prefer the canonical CADOP report name; any CSV works as a fallback.
fn pick_registry_link<'a>(links: &[&'a str]) -> Option<&'a str> {
    links
        .iter()
        .find(|l| {
            let lower = l.to_lowercase();
            lower.contains("relatorio") || lower.contains("cadop")
        })
        .copied()
        .or_else(|| links.first().copied())
}

fn join_url(base: &str, link: &str) -> String {
    if link.starts_with("http://") || link.starts_with("https://") {
        link.to_string()
    } else if base.ends_with('/') {
        format!("{}{}", base, link)
    } else {
        format!("{}/{}", base, link)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_year_dir_links() {
        assert_eq!(year_dir_name("2023/"), Some("2023".to_string()));
        assert_eq!(year_dir_name("2024/"), Some("2024".to_string()));

        assert_eq!(year_dir_name("2023"), None, "Files are not year dirs");
        assert_eq!(year_dir_name("abcd/"), None);
        assert_eq!(year_dir_name("20234/"), None);
        assert_eq!(year_dir_name("../"), None);
        assert_eq!(year_dir_name(""), None);
    }

    #[test]
    fn test_pick_registry_link_prefers_cadop_names() {
        let links = ["outros_dados.csv", "Relatorio_cadop.csv", "extra.csv"];
        assert_eq!(pick_registry_link(&links), Some("Relatorio_cadop.csv"));

        let fallback = ["operadoras.csv", "extra.csv"];
        assert_eq!(pick_registry_link(&fallback), Some("operadoras.csv"));

        assert_eq!(pick_registry_link(&[]), None);
    }

    #[test]
    fn test_join_url() {
        assert_eq!(
            join_url("https://example.com/base/", "2023/"),
            "https://example.com/base/2023/"
        );
        assert_eq!(
            join_url("https://example.com/base", "file.csv"),
            "https://example.com/base/file.csv"
        );
        assert_eq!(
            join_url("https://example.com/base/", "https://mirror.example.com/file.csv"),
            "https://mirror.example.com/file.csv"
        );
    }
}
