use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::phase::PillarKind;
use crate::store::models::{ContentUnit, UnitStatus};

/// Everything a generator sees when producing one pillar.
///
/// The survey is always present; `pillars` carries the content of every
/// complete unit of a strictly preceding kind. The parsed audit results and
/// the enrichment synthesis are attached only for the kinds that consume
/// them.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationContext {
    pub strategy_id: String,
    pub kind: PillarKind,
    pub survey: serde_json::Value,
    pub pillars: BTreeMap<PillarKind, PillarInput>,
    pub risk: Option<RiskAuditResult>,
    pub track: Option<TrendTrackResult>,
    pub enrichment: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PillarInput {
    pub content: serde_json::Value,
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskSeverity {
    Low,
    Medium,
    High,
}

/// Parsed shape of a completed `risk_audit` unit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskAuditResult {
    #[serde(default)]
    pub analyses: Vec<RiskAnalysis>,
    #[serde(default)]
    pub opportunities: Vec<RiskOpportunity>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAnalysis {
    pub area: String,
    pub severity: RiskSeverity,
    #[serde(default)]
    pub note: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskOpportunity {
    pub title: String,
    #[serde(default)]
    pub description: String,
}

/// Parsed shape of a completed `trend_track` unit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrendTrackResult {
    #[serde(default)]
    pub macro_trends: Vec<TrendItem>,
    #[serde(default)]
    pub weak_signals: Vec<TrendItem>,
    #[serde(default)]
    pub emerging_patterns: Vec<TrendItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendItem {
    pub title: String,
    #[serde(default)]
    pub description: String,
}

/// Parse a completed unit's content into `T`, tolerating shape drift.
/// Content written by older generators may not match the current shape;
/// a parse failure degrades to `None` with a warning instead of blocking
/// downstream generation.
pub fn parse_unit_content<T: for<'de> Deserialize<'de>>(unit: &ContentUnit) -> Option<T> {
    let content = unit.content.clone()?;
    match serde_json::from_value(content) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            warn!(
                unit_id = %unit.id,
                kind = %unit.kind,
                "unparseable unit content, continuing without it: {}",
                e
            );
            None
        }
    }
}

impl GenerationContext {
    /// Assemble the context for generating `kind`.
    ///
    /// `units` is the strategy's full unit list; `enrichment` is the latest
    /// market-enrichment synthesis, if one was recorded.
    pub fn assemble(
        strategy_id: &str,
        kind: PillarKind,
        survey: serde_json::Value,
        units: &[ContentUnit],
        enrichment: Option<serde_json::Value>,
    ) -> Self {
        let by_kind: BTreeMap<PillarKind, &ContentUnit> =
            units.iter().map(|u| (u.kind, u)).collect();

        let mut pillars = BTreeMap::new();
        for prior in kind.preceding() {
            if let Some(unit) = by_kind.get(&prior) {
                if unit.status == UnitStatus::Complete {
                    if let Some(content) = &unit.content {
                        pillars.insert(
                            prior,
                            PillarInput {
                                content: content.clone(),
                                summary: unit.summary.clone(),
                            },
                        );
                    }
                }
            }
        }

        let wants_risk = matches!(
            kind,
            PillarKind::TrendTrack | PillarKind::Roadmap | PillarKind::Activation
        );
        let wants_track = matches!(kind, PillarKind::Roadmap | PillarKind::Activation);
        let wants_enrichment = matches!(kind, PillarKind::Roadmap | PillarKind::Activation);

        let risk = if wants_risk {
            by_kind
                .get(&PillarKind::RiskAudit)
                .filter(|u| u.status == UnitStatus::Complete)
                .and_then(|u| parse_unit_content(u))
        } else {
            None
        };
        let track = if wants_track {
            by_kind
                .get(&PillarKind::TrendTrack)
                .filter(|u| u.status == UnitStatus::Complete)
                .and_then(|u| parse_unit_content(u))
        } else {
            None
        };

        Self {
            strategy_id: strategy_id.to_string(),
            kind,
            survey,
            pillars,
            risk,
            track,
            enrichment: if wants_enrichment { enrichment } else { None },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn unit(kind: PillarKind, status: UnitStatus, content: Option<serde_json::Value>) -> ContentUnit {
        ContentUnit {
            id: format!("u-{}", kind),
            strategy_id: "s".into(),
            kind,
            status,
            content,
            summary: None,
            version: 1,
            stale_reason: None,
            stale_since: None,
            error_message: None,
            generated_at: None,
        }
    }

    #[test]
    fn context_includes_only_complete_preceding_units() {
        let units = vec![
            unit(PillarKind::BrandCore, UnitStatus::Complete, Some(json!({"essence": "x"}))),
            unit(PillarKind::Audience, UnitStatus::Pending, None),
            unit(PillarKind::Voice, UnitStatus::Complete, Some(json!({"tone": "dry"}))),
        ];
        let ctx = GenerationContext::assemble("s", PillarKind::Positioning, json!({}), &units, None);
        assert!(ctx.pillars.contains_key(&PillarKind::BrandCore));
        assert!(!ctx.pillars.contains_key(&PillarKind::Audience));
        // Voice follows positioning in generation order, so it never appears.
        assert!(!ctx.pillars.contains_key(&PillarKind::Voice));
    }

    #[test]
    fn trend_track_gets_parsed_risk_result() {
        let risk_content = json!({
            "analyses": [{"area": "pricing", "severity": "high", "note": "undercut"}],
            "opportunities": []
        });
        let units = vec![unit(PillarKind::RiskAudit, UnitStatus::Complete, Some(risk_content))];
        let ctx = GenerationContext::assemble("s", PillarKind::TrendTrack, json!({}), &units, None);
        let risk = ctx.risk.expect("risk result");
        assert_eq!(risk.analyses.len(), 1);
        assert_eq!(risk.analyses[0].severity, RiskSeverity::High);
        assert!(ctx.track.is_none());
        assert!(ctx.enrichment.is_none());
    }

    #[test]
    fn roadmap_gets_enrichment_and_both_audit_results() {
        let units = vec![
            unit(PillarKind::RiskAudit, UnitStatus::Complete, Some(json!({"analyses": []}))),
            unit(
                PillarKind::TrendTrack,
                UnitStatus::Complete,
                Some(json!({"macro_trends": [{"title": "ai"}]})),
            ),
        ];
        let ctx = GenerationContext::assemble(
            "s",
            PillarKind::Roadmap,
            json!({}),
            &units,
            Some(json!({"competitors": 3})),
        );
        assert!(ctx.risk.is_some());
        assert_eq!(ctx.track.expect("track").macro_trends.len(), 1);
        assert_eq!(ctx.enrichment, Some(json!({"competitors": 3})));
    }

    #[test]
    fn malformed_audit_content_degrades_to_none() {
        let units = vec![unit(
            PillarKind::RiskAudit,
            UnitStatus::Complete,
            Some(json!({"analyses": "not-a-list"})),
        )];
        let ctx = GenerationContext::assemble("s", PillarKind::TrendTrack, json!({}), &units, None);
        assert!(ctx.risk.is_none());
        // The raw content still flows through as a preceding pillar.
        assert!(ctx.pillars.contains_key(&PillarKind::RiskAudit));
    }
}
