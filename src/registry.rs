// 🏥 Operator Registry - identity index over the CADOP snapshot
//
// "Which operator is registro 123456?" is answered here and only here.
// The registry snapshot is the single source of truth for operator
// identity; statement files contribute numbers, never names.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// OPERATOR IDENTITY
// ============================================================================

/// One health-plan operator as registered with the ANS.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorIdentity {
    /// ANS registration number - the stable key everything joins on
    pub registro_ans: String,

    /// 14-digit company tax id (validated separately, kept verbatim here)
    pub cnpj: String,

    /// Legal name (razão social)
    pub razao_social: String,

    /// Operator modality, e.g. "Cooperativa Médica"
    pub modalidade: String,

    /// Two-letter federal unit code
    pub uf: String,
}

// ============================================================================
// OPERATOR INDEX
// ============================================================================

/// Read-only lookup table keyed by `registro_ans`, built once per run.
pub struct OperatorIndex {
    by_registro: HashMap<String, OperatorIdentity>,
    skipped_blank: usize,
}

impl OperatorIndex {
    /// Build the index from registry rows in file order.
    ///
    /// A repeated `registro_ans` keeps the later row, so a corrected entry
    /// further down the snapshot supersedes the earlier one. Rows with a
    /// blank key can never be joined against; they are tallied and skipped.
    pub fn build(rows: Vec<OperatorIdentity>) -> Self {
        let mut by_registro = HashMap::new();
        let mut skipped_blank = 0;

        for row in rows {
            let key = row.registro_ans.trim().to_string();
            if key.is_empty() {
                skipped_blank += 1;
                continue;
            }
            by_registro.insert(key, row);
        }

        OperatorIndex {
            by_registro,
            skipped_blank,
        }
    }

    /// Look up an operator by registration number.
    pub fn lookup(&self, registro_ans: &str) -> Option<&OperatorIdentity> {
        self.by_registro.get(registro_ans.trim())
    }

    /// Number of distinct operators indexed.
    pub fn len(&self) -> usize {
        self.by_registro.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_registro.is_empty()
    }

    /// Registry rows that arrived without a usable `registro_ans`.
    pub fn skipped_blank(&self) -> usize {
        self.skipped_blank
    }
}

// ============================================================================
// TESTS
// ============================================================================
