// 🔗 Enrichment - joining statement rows to operator identity
//
// The CADOP registry is the only source of operator identity. A statement
// row that matches nothing keeps flowing with null identity fields; the
// aggregation layer routes it to the unreconciled bucket.

use crate::parser::DisclosureRecord;
use crate::registry::OperatorIndex;
use serde::{Deserialize, Serialize};

/// A statement row joined against the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedRecord {
    /// The figure as parsed, untouched by the join
    pub record: DisclosureRecord,

    // Identity from the registry. All None when the registro matched
    // nothing; statement files carry none of these themselves.
    pub cnpj: Option<String>,
    pub razao_social: Option<String>,
    pub modalidade: Option<String>,
    pub uf: Option<String>,

    /// Set by the validator after enrichment, false until then
    pub cnpj_valido: bool,
}

impl EnrichedRecord {
    /// Whether the registro resolved to a registered operator.
    pub fn is_reconciled(&self) -> bool {
        self.razao_social.is_some()
    }
}

// ============================================================================
// ENRICHER
// ============================================================================

/// Joins parsed statement rows to the operator index.
pub struct Enricher {
    index: OperatorIndex,
}

impl Enricher {
    pub fn new(index: OperatorIndex) -> Self {
        Enricher { index }
    }

    pub fn index(&self) -> &OperatorIndex {
        &self.index
    }

    /// Join one record. Every input record produces exactly one output
    /// record, matched or not.
    pub fn enrich(&self, record: DisclosureRecord) -> EnrichedRecord {
        match self.index.lookup(&record.registro_ans) {
            Some(operator) => EnrichedRecord {
                record,
                cnpj: Some(operator.cnpj.clone()),
                razao_social: Some(operator.razao_social.clone()),
                modalidade: Some(operator.modalidade.clone()),
                uf: Some(operator.uf.clone()),
                cnpj_valido: false,
            },
            None => EnrichedRecord {
                record,
                cnpj: None,
                razao_social: None,
                modalidade: None,
                uf: None,
                cnpj_valido: false,
            },
        }
    }

    /// Join a whole batch, preserving order and count.
    pub fn enrich_batch(&self, records: Vec<DisclosureRecord>) -> Vec<EnrichedRecord> {
        records.into_iter().map(|r| self.enrich(r)).collect()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::period::Period;
    use crate::registry::OperatorIdentity;
    use rust_decimal::Decimal;

    fn test_index() -> OperatorIndex {
        OperatorIndex::build(vec![OperatorIdentity {
            registro_ans: "123456".to_string(),
            cnpj: "11222333000181".to_string(),
            razao_social: "ALFA SAUDE LTDA".to_string(),
            modalidade: "Cooperativa Médica".to_string(),
            uf: "SP".to_string(),
        }])
    }

    fn disclosure(registro: &str) -> DisclosureRecord {
        DisclosureRecord {
            registro_ans: registro.to_string(),
            conta: "41111".to_string(),
            valor: Decimal::new(10000, 2),
            period: Period::new(2023, 1),
            source_file: "1T2023.csv".to_string(),
            line_number: 2,
        }
    }

    #[test]
    fn test_match_copies_identity_from_registry() {
        let enricher = Enricher::new(test_index());
        let enriched = enricher.enrich(disclosure("123456"));

        assert!(enriched.is_reconciled());
        assert_eq!(enriched.cnpj.as_deref(), Some("11222333000181"));
        assert_eq!(enriched.razao_social.as_deref(), Some("ALFA SAUDE LTDA"));
        assert_eq!(enriched.modalidade.as_deref(), Some("Cooperativa Médica"));
        assert_eq!(enriched.uf.as_deref(), Some("SP"));
        assert_eq!(enriched.record.valor, Decimal::new(10000, 2));

        println!("✅ Matched record carries registry identity");
    }

    #[test]
    fn test_miss_leaves_identity_null() {
        let enricher = Enricher::new(test_index());
        let enriched = enricher.enrich(disclosure("999999"));

        assert!(!enriched.is_reconciled());
        assert!(enriched.cnpj.is_none());
        assert!(enriched.razao_social.is_none());
        assert!(enriched.modalidade.is_none());
        assert!(enriched.uf.is_none());
        assert_eq!(
            enriched.record.registro_ans, "999999",
            "The figure itself is untouched"
        );
    }

    #[test]
    fn test_batch_preserves_order_and_count() {
        let enricher = Enricher::new(test_index());
        let batch = vec![
            disclosure("123456"),
            disclosure("999999"),
            disclosure("123456"),
        ];

        let enriched = enricher.enrich_batch(batch);

        assert_eq!(enriched.len(), 3, "Join must be lossless");
        assert!(enriched[0].is_reconciled());
        assert!(!enriched[1].is_reconciled());
        assert!(enriched[2].is_reconciled());
    }

    #[test]
    fn test_validation_flag_starts_false() {
        let enricher = Enricher::new(test_index());
        let enriched = enricher.enrich(disclosure("123456"));

        assert!(!enriched.cnpj_valido, "The validator sets this, not the join");
    }
}
