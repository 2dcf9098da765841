// ANS Consolidator - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod aggregate;
pub mod config;
pub mod consolidate;
pub mod db;
pub mod enrich;
pub mod parser;
pub mod period;
pub mod pipeline;
pub mod registry;
pub mod validation;

#[cfg(feature = "fetch")]
pub mod fetch;

// Re-export commonly used types
pub use aggregate::{aggregate, AggregateRow, UNRECONCILED_LABEL, UNRECONCILED_UF};
pub use config::PipelineConfig;
pub use consolidate::{ArtifactEntry, ConsolidationWriter, Manifest, WriteReceipt};
pub use db::{
    count_aggregates, count_enriched, expense_stats, latest_run_id, publish_run,
    query_aggregates, setup_database, AggregatedExpense, ExpenseStats,
};
pub use enrich::{EnrichedRecord, Enricher};
pub use parser::{
    parse_brazilian_decimal, parse_registry_file, parse_statement_file, DisclosureRecord,
    ParsedStatement,
};
pub use period::Period;
pub use pipeline::{Pipeline, PipelineOutput, RunReport};
pub use registry::{OperatorIdentity, OperatorIndex};
pub use validation::{validate_cnpj, RecordValidator, ValidationSummary};

#[cfg(feature = "fetch")]
pub use fetch::{FetchReport, Fetcher};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
