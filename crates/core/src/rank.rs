use crate::domain::analysis::{AnalysisOutcome, AnalysisScore};
use crate::domain::ranking::RankedResult;
use crate::domain::stock::code_from_symbol;

pub const DEFAULT_TOP_COUNT: usize = 10;
pub const DEFAULT_DETAIL_URL_TEMPLATE: &str = "https://kabutan.jp/stock/?code={code}";

/// Builds the per-stock detail page link shown next to each ranked line.
#[derive(Debug, Clone)]
pub struct DetailLink {
    template: String,
}

impl DetailLink {
    pub fn new(template: impl Into<String>) -> anyhow::Result<Self> {
        let template = template.into();
        anyhow::ensure!(
            template.contains("{code}"),
            "detail url template must contain {{code}} (got {template})"
        );
        Ok(Self { template })
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let template = std::env::var("DETAIL_URL_TEMPLATE")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DETAIL_URL_TEMPLATE.to_string());
        Self::new(template)
    }

    pub fn for_symbol(&self, symbol: &str) -> String {
        self.template.replace("{code}", code_from_symbol(symbol))
    }
}

impl Default for DetailLink {
    fn default() -> Self {
        Self {
            template: DEFAULT_DETAIL_URL_TEMPLATE.to_string(),
        }
    }
}

/// Successful outcomes ordered by score desc, confidence desc, symbol asc, cut to `n`.
/// Failed outcomes never reach the output.
pub fn top_n(outcomes: &[AnalysisOutcome], n: usize, link: &DetailLink) -> Vec<RankedResult> {
    let mut scored: Vec<(&AnalysisOutcome, &AnalysisScore)> = outcomes
        .iter()
        .filter_map(|o| o.score().map(|s| (o, s)))
        .collect();

    scored.sort_by(|(oa, a), (ob, b)| {
        unsigned_zero(b.overall_score)
            .total_cmp(&unsigned_zero(a.overall_score))
            .then_with(|| unsigned_zero(b.confidence).total_cmp(&unsigned_zero(a.confidence)))
            .then_with(|| oa.symbol.cmp(&ob.symbol))
    });

    scored
        .into_iter()
        .take(n)
        .enumerate()
        .map(|(i, (outcome, score))| RankedResult {
            rank: i + 1,
            symbol: outcome.symbol.clone(),
            company_name: outcome.company_name.clone(),
            overall_score: score.overall_score,
            confidence: score.confidence,
            recommendation: score.recommendation,
            risk_assessment: score.risk_assessment,
            detail_url: link.for_symbol(&outcome.symbol),
        })
        .collect()
}

// total_cmp orders -0.0 below 0.0; scores compare by value.
fn unsigned_zero(v: f64) -> f64 {
    v + 0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::error::{AnalysisError, AnalysisErrorKind};
    use crate::domain::analysis::{Recommendation, RiskAssessment};

    fn ok(symbol: &str, score: f64, confidence: f64) -> AnalysisOutcome {
        AnalysisOutcome {
            symbol: symbol.to_string(),
            company_name: format!("Co {symbol}"),
            result: Ok(AnalysisScore {
                overall_score: score,
                confidence,
                recommendation: Recommendation::Buy,
                risk_assessment: RiskAssessment::Low,
            }),
        }
    }

    fn failed(symbol: &str) -> AnalysisOutcome {
        AnalysisOutcome {
            symbol: symbol.to_string(),
            company_name: String::new(),
            result: Err(AnalysisError::new(symbol, AnalysisErrorKind::Timeout, "slow")),
        }
    }

    fn symbols(r: &[RankedResult]) -> Vec<&str> {
        r.iter().map(|x| x.symbol.as_str()).collect()
    }

    #[test]
    fn score_tie_is_broken_by_confidence() {
        let outcomes = vec![ok("7203.T", 0.8, 0.9), ok("6758.T", 0.8, 0.95), failed("9999.T")];
        let top = top_n(&outcomes, 2, &DetailLink::default());
        assert_eq!(symbols(&top), ["6758.T", "7203.T"]);
        assert_eq!(top[0].rank, 1);
        assert_eq!(top[1].rank, 2);
    }

    #[test]
    fn full_tie_is_broken_by_symbol_regardless_of_input_order() {
        let a = vec![ok("9432.T", 0.7, 0.7), ok("1301.T", 0.7, 0.7), ok("4755.T", 0.7, 0.7)];
        let mut b = a.clone();
        b.reverse();

        let link = DetailLink::default();
        assert_eq!(symbols(&top_n(&a, 3, &link)), ["1301.T", "4755.T", "9432.T"]);
        assert_eq!(top_n(&a, 3, &link), top_n(&b, 3, &link));
    }

    #[test]
    fn ordering_rule_holds_pairwise() {
        let outcomes: Vec<_> = (0..40)
            .map(|i| {
                let score = ((i * 7) % 5) as f64 / 5.0;
                let confidence = ((i * 3) % 4) as f64 / 4.0;
                ok(&format!("{}.T", 1000 + i), score, confidence)
            })
            .collect();

        let top = top_n(&outcomes, 40, &DetailLink::default());
        for w in top.windows(2) {
            let (a, b) = (&w[0], &w[1]);
            assert!(
                a.overall_score > b.overall_score
                    || (a.overall_score == b.overall_score && a.confidence >= b.confidence)
            );
        }
    }

    #[test]
    fn signed_zero_scores_tie_and_fall_through_to_confidence() {
        let outcomes = vec![ok("2222.T", 0.0, 0.1), ok("1111.T", -0.0, 0.9)];
        let top = top_n(&outcomes, 2, &DetailLink::default());
        assert_eq!(symbols(&top), ["1111.T", "2222.T"]);
    }

    #[test]
    fn truncates_to_min_of_n_and_successes() {
        let outcomes = vec![ok("1.T", 0.1, 0.1), failed("2.T"), ok("3.T", 0.3, 0.1), failed("4.T")];
        let link = DetailLink::default();
        assert_eq!(top_n(&outcomes, 0, &link).len(), 0);
        assert_eq!(top_n(&outcomes, 1, &link).len(), 1);
        assert_eq!(top_n(&outcomes, 10, &link).len(), 2);
    }

    #[test]
    fn all_failures_yield_empty_ranking() {
        let outcomes = vec![failed("1.T"), failed("2.T")];
        assert!(top_n(&outcomes, 5, &DetailLink::default()).is_empty());
    }

    #[test]
    fn detail_url_uses_bare_code() {
        let top = top_n(&[ok("7203.T", 0.5, 0.5)], 1, &DetailLink::default());
        assert_eq!(top[0].detail_url, "https://kabutan.jp/stock/?code=7203");

        let link = DetailLink::new("https://example.jp/q/{code}/chart").unwrap();
        assert_eq!(link.for_symbol("6758.T"), "https://example.jp/q/6758/chart");
        assert!(DetailLink::new("https://example.jp/q").is_err());
    }

    #[test]
    fn input_is_left_untouched() {
        let outcomes = vec![ok("1.T", 0.1, 0.1), ok("2.T", 0.9, 0.1)];
        let _ = top_n(&outcomes, 2, &DetailLink::default());
        assert_eq!(outcomes[0].symbol, "1.T");
        assert_eq!(outcomes[1].symbol, "2.T");
    }
}
