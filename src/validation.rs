// ✅ Record Validation - CNPJ check digits
// Suspect records are flagged, never dropped. A figure filed under a bad
// tax id is still part of the consolidated totals; the flag travels with
// the record into the artifacts so downstream consumers can filter.

use crate::enrich::EnrichedRecord;
use serde::{Deserialize, Serialize};

// Pesos do módulo 11: primeiro dígito verificador sobre os 12 primeiros
// dígitos, segundo sobre os 13 primeiros.
const FIRST_DIGIT_WEIGHTS: [u32; 12] = [5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];
const SECOND_DIGIT_WEIGHTS: [u32; 13] = [6, 5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];

/// Validate a CNPJ against its two módulo-11 check digits.
///
/// Accepts formatted (`11.222.333/0001-81`) or bare (`11222333000181`)
/// input; punctuation is stripped. Anything that is not exactly 14 digits
/// afterwards is invalid, as are sequences of a single repeated digit.
pub fn validate_cnpj(cnpj: &str) -> bool {
    let digits: Vec<u32> = cnpj.chars().filter_map(|c| c.to_digit(10)).collect();

    if digits.len() != 14 {
        return false;
    }

    // "00000000000000" satisfies the arithmetic but is not a real CNPJ
    if digits.iter().all(|&d| d == digits[0]) {
        return false;
    }

    digits[12] == check_digit(&digits[..12], &FIRST_DIGIT_WEIGHTS)
        && digits[13] == check_digit(&digits[..13], &SECOND_DIGIT_WEIGHTS)
}

fn check_digit(digits: &[u32], weights: &[u32]) -> u32 {
    let sum: u32 = digits.iter().zip(weights).map(|(d, w)| d * w).sum();
    let remainder = sum % 11;
    if remainder < 2 {
        0
    } else {
        11 - remainder
    }
}

// ============================================================================
// RECORD VALIDATOR
// ============================================================================

/// Sets the CNPJ validity flag on enriched records.
///
/// Runs after enrichment: a statement row carries no tax id of its own, the
/// CNPJ only arrives through the registry join. Records whose identity never
/// resolved have no CNPJ and are flagged false like any malformed one.
pub struct RecordValidator;

impl RecordValidator {
    pub fn new() -> Self {
        RecordValidator
    }

    /// Flag one record. Nothing else about the record changes.
    pub fn validate(&self, record: &mut EnrichedRecord) -> bool {
        let valid = record
            .cnpj
            .as_deref()
            .map(validate_cnpj)
            .unwrap_or(false);
        record.cnpj_valido = valid;
        valid
    }

    /// Flag a whole batch and tally the outcome for the run report.
    pub fn validate_batch(&self, records: &mut [EnrichedRecord]) -> ValidationSummary {
        let mut summary = ValidationSummary {
            total: records.len(),
            valid: 0,
            invalid: 0,
        };

        for record in records.iter_mut() {
            if self.validate(record) {
                summary.valid += 1;
            } else {
                summary.invalid += 1;
            }
        }

        summary
    }
}

impl Default for RecordValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub total: usize,
    pub valid: usize,
    pub invalid: usize,
}

impl ValidationSummary {
    pub fn summary(&self) -> String {
        format!(
            "{} records checked: {} valid CNPJs, {} flagged",
            self.total, self.valid, self.invalid
        )
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::DisclosureRecord;
    use crate::period::Period;
    use rust_decimal::Decimal;

    fn record_with_cnpj(cnpj: Option<&str>) -> EnrichedRecord {
        EnrichedRecord {
            record: DisclosureRecord {
                registro_ans: "123456".to_string(),
                conta: "41111".to_string(),
                valor: Decimal::new(10000, 2),
                period: Period::new(2023, 1),
                source_file: "1T2023.csv".to_string(),
                line_number: 2,
            },
            cnpj: cnpj.map(|c| c.to_string()),
            razao_social: cnpj.map(|_| "OPERADORA TESTE".to_string()),
            modalidade: cnpj.map(|_| "Cooperativa Médica".to_string()),
            uf: cnpj.map(|_| "SP".to_string()),
            cnpj_valido: false,
        }
    }

    #[test]
    fn test_valid_cnpjs() {
        assert!(validate_cnpj("11222333000181"));
        assert!(validate_cnpj("11.222.333/0001-81"));
        assert!(validate_cnpj("00000000000191"));

        println!("✅ Known-good CNPJs accepted");
    }

    #[test]
    fn test_invalid_check_digits() {
        assert!(!validate_cnpj("11222333000180"));
        assert!(!validate_cnpj("11222333000191"));
        assert!(!validate_cnpj("00000000000192"));
    }

    #[test]
    fn test_malformed_cnpjs() {
        assert!(!validate_cnpj(""));
        assert!(!validate_cnpj("123"));
        assert!(!validate_cnpj("1122233300018"));
        assert!(!validate_cnpj("112223330001811"));
        assert!(!validate_cnpj("abcdefghijklmn"));
    }

    #[test]
    fn test_repeated_digit_sequences_rejected() {
        assert!(!validate_cnpj("00000000000000"));
        assert!(!validate_cnpj("11111111111111"));
        assert!(!validate_cnpj("99.999.999/9999-99"));
    }

    #[test]
    fn test_validator_flags_without_dropping() {
        let validator = RecordValidator::new();
        let mut records = vec![
            record_with_cnpj(Some("11222333000181")),
            record_with_cnpj(Some("11222333000180")),
            record_with_cnpj(None), // never matched the registry
        ];

        let summary = validator.validate_batch(&mut records);

        assert_eq!(records.len(), 3, "validation must never drop records");
        assert!(records[0].cnpj_valido);
        assert!(!records[1].cnpj_valido);
        assert!(!records[2].cnpj_valido);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.valid, 1);
        assert_eq!(summary.invalid, 2);

        println!("✅ Validation summary: {}", summary.summary());
    }

    #[test]
    fn test_validator_only_touches_the_flag() {
        let validator = RecordValidator::new();
        let mut record = record_with_cnpj(Some("11222333000181"));
        let valor_before = record.record.valor;
        let razao_before = record.razao_social.clone();

        validator.validate(&mut record);

        assert_eq!(record.record.valor, valor_before);
        assert_eq!(record.razao_social, razao_before);
    }
}
