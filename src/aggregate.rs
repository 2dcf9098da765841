// 📊 Aggregation - per-operator expense series
//
// Records group by registro_ans, never by name: names get corrected
// between snapshots, the registration number survives. Each competence
// period is summed first, then total / quarterly mean / standard
// deviation are derived over the period sums. Records that matched no
// operator all share the single unreconciled bucket, so the books still
// balance against the sources.

use crate::enrich::EnrichedRecord;
use crate::period::Period;
use rust_decimal::{Decimal, MathematicalOps, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Name shown for the bucket of records with no registry identity.
pub const UNRECONCILED_LABEL: &str = "NAO RECONCILIADO";

/// Region code shown for the unreconciled bucket.
pub const UNRECONCILED_UF: &str = "ND";

/// One aggregated line: an operator, or the unreconciled bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateRow {
    /// Empty for the unreconciled bucket
    pub registro_ans: String,
    pub razao_social: String,
    pub uf: String,

    /// Exact sum over every record in the group
    pub total_despesas: Decimal,

    /// Mean of the period sums, rounded to centavos
    pub media_trimestral: Decimal,

    /// Population standard deviation of the period sums, rounded to centavos
    pub desvio_padrao: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum GroupKey {
    Operator(String),
    Unreconciled,
}

struct GroupSeries {
    razao_social: String,
    uf: String,
    by_period: BTreeMap<Period, Decimal>,
}

// ============================================================================
// AGGREGATION
// ============================================================================

/// Fold enriched records into one row per operator plus, when any record
/// failed to reconcile, the unreconciled bucket. Rows come back ordered by
/// total descending, registration number ascending on ties.
pub fn aggregate(records: &[EnrichedRecord]) -> Vec<AggregateRow> {
    let mut groups: HashMap<GroupKey, GroupSeries> = HashMap::new();

    for record in records {
        let key = if record.is_reconciled() {
            GroupKey::Operator(record.record.registro_ans.clone())
        } else {
            GroupKey::Unreconciled
        };

        // Identity comes from the first record of the group; every record
        // of one registro carries the same registry entry.
        let series = groups.entry(key).or_insert_with(|| GroupSeries {
            razao_social: record
                .razao_social
                .clone()
                .unwrap_or_else(|| UNRECONCILED_LABEL.to_string()),
            uf: record
                .uf
                .clone()
                .unwrap_or_else(|| UNRECONCILED_UF.to_string()),
            by_period: BTreeMap::new(),
        });

        let slot = series
            .by_period
            .entry(record.record.period)
            .or_insert(Decimal::ZERO);
        *slot += record.record.valor;
    }

    let mut rows: Vec<AggregateRow> = groups
        .into_iter()
        .map(|(key, series)| {
            let registro_ans = match key {
                GroupKey::Operator(registro) => registro,
                GroupKey::Unreconciled => String::new(),
            };

            let (total, media, desvio) = expense_stats(&series.by_period);

            AggregateRow {
                registro_ans,
                razao_social: series.razao_social,
                uf: series.uf,
                total_despesas: total,
                media_trimestral: media,
                desvio_padrao: desvio,
            }
        })
        .collect();

    rows.sort_by(|a, b| {
        b.total_despesas
            .cmp(&a.total_despesas)
            .then_with(|| a.registro_ans.cmp(&b.registro_ans))
    });

    rows
}

/// Total, quarterly mean, and population standard deviation over the
/// period sums of one group.
///
/// `by_period` is never empty: a group only exists once a record joined
/// it. Population form, so a single observed period deviates by exactly
/// zero rather than being undefined.
fn expense_stats(by_period: &BTreeMap<Period, Decimal>) -> (Decimal, Decimal, Decimal) {
    let count = Decimal::from(by_period.len());
    let total: Decimal = by_period.values().copied().sum();

    // The exact mean feeds the variance; only the reported figures round.
    let mean = total / count;

    let variance = by_period
        .values()
        .map(|v| {
            let d = *v - mean;
            d * d
        })
        .sum::<Decimal>()
        / count;

    // Rounding only ever trims scale: a whole-number result (the sqrt of
    // a zero variance in particular) would keep scale 0 and print as "0".
    // Both reported figures are padded to centavo scale.
    let mut media = mean.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    let mut desvio = variance
        .sqrt()
        .unwrap_or(Decimal::ZERO)
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    media.rescale(2);
    desvio.rescale(2);

    (total, media, desvio)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::DisclosureRecord;

    fn enriched(registro: &str, matched: bool, period: Period, valor_cents: i64) -> EnrichedRecord {
        EnrichedRecord {
            record: DisclosureRecord {
                registro_ans: registro.to_string(),
                conta: "41111".to_string(),
                valor: Decimal::new(valor_cents, 2),
                period,
                source_file: format!("{}.csv", period.label()),
                line_number: 2,
            },
            cnpj: matched.then(|| "11222333000181".to_string()),
            razao_social: matched.then(|| format!("OPERADORA {}", registro)),
            modalidade: matched.then(|| "Medicina de Grupo".to_string()),
            uf: matched.then(|| "SP".to_string()),
            cnpj_valido: false,
        }
    }

    #[test]
    fn test_two_quarter_series() {
        // 100.00 in Q1 and 300.00 in Q2
        let records = vec![
            enriched("123456", true, Period::new(2023, 1), 10000),
            enriched("123456", true, Period::new(2023, 2), 30000),
        ];

        let rows = aggregate(&records);

        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.registro_ans, "123456");
        assert_eq!(row.total_despesas, Decimal::new(40000, 2), "400.00 total");
        assert_eq!(row.media_trimestral, Decimal::new(20000, 2), "200.00 mean");
        assert_eq!(
            row.desvio_padrao,
            Decimal::new(10000, 2),
            "population deviation of [100, 300] is 100.00"
        );

        println!("✅ Two-quarter series: {}", row.total_despesas);
    }

    #[test]
    fn test_single_period_deviation_is_zero() {
        let records = vec![enriched("123456", true, Period::new(2023, 1), 12345)];

        let rows = aggregate(&records);

        assert_eq!(rows[0].desvio_padrao, Decimal::ZERO);
        assert_eq!(rows[0].media_trimestral, Decimal::new(12345, 2));
        assert_eq!(rows[0].total_despesas, Decimal::new(12345, 2));
    }

    #[test]
    fn test_stat_figures_keep_centavo_scale() {
        // A zero deviation is still a money figure: it must render "0.00",
        // not "0", or the aggregated columns come out ragged
        let records = vec![enriched("123456", true, Period::new(2023, 1), 10000)];

        let rows = aggregate(&records);

        assert_eq!(rows[0].desvio_padrao.to_string(), "0.00");
        assert_eq!(rows[0].media_trimestral.to_string(), "100.00");
        println!("✅ Stats carry centavo scale: {}", rows[0].desvio_padrao);
    }

    #[test]
    fn test_same_period_records_sum_before_stats() {
        // Q1 has two rows (100.00 + 200.00), Q2 has one (300.00).
        // The series is [300, 300], not [100, 200, 300].
        let records = vec![
            enriched("123456", true, Period::new(2023, 1), 10000),
            enriched("123456", true, Period::new(2023, 1), 20000),
            enriched("123456", true, Period::new(2023, 2), 30000),
        ];

        let rows = aggregate(&records);

        assert_eq!(rows[0].total_despesas, Decimal::new(60000, 2));
        assert_eq!(rows[0].media_trimestral, Decimal::new(30000, 2));
        assert_eq!(rows[0].desvio_padrao, Decimal::ZERO, "flat series");
    }

    #[test]
    fn test_unmatched_records_share_one_bucket() {
        let records = vec![
            enriched("999111", false, Period::new(2023, 1), 5000),
            enriched("999222", false, Period::new(2023, 1), 2500),
        ];

        let rows = aggregate(&records);

        assert_eq!(rows.len(), 1, "Different registros, same bucket");
        assert_eq!(rows[0].registro_ans, "");
        assert_eq!(rows[0].razao_social, UNRECONCILED_LABEL);
        assert_eq!(rows[0].uf, UNRECONCILED_UF);
        assert_eq!(rows[0].total_despesas, Decimal::new(7500, 2));
    }

    #[test]
    fn test_mixed_matched_and_unmatched() {
        let records = vec![
            enriched("123456", true, Period::new(2023, 1), 10000),
            enriched("123456", true, Period::new(2023, 2), 30000),
            enriched("999999", false, Period::new(2023, 1), 5000),
        ];

        let rows = aggregate(&records);

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].registro_ans, "123456", "Largest total first");
        assert_eq!(rows[0].total_despesas, Decimal::new(40000, 2));
        assert_eq!(rows[1].razao_social, UNRECONCILED_LABEL);
        assert_eq!(rows[1].total_despesas, Decimal::new(5000, 2));

        println!("✅ Unreconciled bucket holds {}", rows[1].total_despesas);
    }

    #[test]
    fn test_bucket_gets_stats_like_any_group() {
        let records = vec![
            enriched("999111", false, Period::new(2023, 1), 5000),
            enriched("999222", false, Period::new(2023, 2), 15000),
        ];

        let rows = aggregate(&records);

        assert_eq!(rows[0].media_trimestral, Decimal::new(10000, 2));
        assert_eq!(rows[0].desvio_padrao, Decimal::new(5000, 2));
    }

    #[test]
    fn test_flagged_cnpj_rows_still_counted() {
        let mut suspect = enriched("123456", true, Period::new(2023, 1), 10000);
        suspect.cnpj = Some("11222333000180".to_string());
        let mut clean = enriched("123456", true, Period::new(2023, 1), 20000);
        clean.cnpj_valido = true;

        let rows = aggregate(&[suspect, clean]);

        assert_eq!(
            rows[0].total_despesas,
            Decimal::new(30000, 2),
            "Validation flags never exclude a figure"
        );
    }

    #[test]
    fn test_ordering_total_desc_then_registro() {
        let records = vec![
            enriched("300300", true, Period::new(2023, 1), 5000),
            enriched("100100", true, Period::new(2023, 1), 30000),
            enriched("200200", true, Period::new(2023, 1), 30000),
        ];

        let rows = aggregate(&records);

        let order: Vec<&str> = rows.iter().map(|r| r.registro_ans.as_str()).collect();
        assert_eq!(order, vec!["100100", "200200", "300300"]);
    }

    #[test]
    fn test_sums_are_exact() {
        // Ten times 0.10 is exactly 1.00, no float drift
        let records: Vec<EnrichedRecord> = (0..10)
            .map(|_| enriched("123456", true, Period::new(2023, 1), 10))
            .collect();

        let rows = aggregate(&records);

        assert_eq!(rows[0].total_despesas, Decimal::new(100, 2));
    }

    #[test]
    fn test_media_rounds_half_away_from_zero() {
        // Period sums 100.00 and 100.01, mean 100.005
        let records = vec![
            enriched("123456", true, Period::new(2023, 1), 10000),
            enriched("123456", true, Period::new(2023, 2), 10001),
        ];

        let rows = aggregate(&records);

        assert_eq!(rows[0].media_trimestral, Decimal::new(10001, 2));
    }

    #[test]
    fn test_empty_input_produces_no_rows() {
        assert!(aggregate(&[]).is_empty());
    }
}
