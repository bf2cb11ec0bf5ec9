use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Value, json};

use crate::phase::PillarKind;
use super::context::GenerationContext;

/// Output of one pillar generation.
#[derive(Debug, Clone)]
pub struct GeneratedPillar {
    pub content: Value,
    pub summary: Option<String>,
}

/// The seam to whatever produces pillar content. Production wires an
/// external model behind this; tests substitute deterministic or failing
/// implementations.
#[async_trait]
pub trait PillarGenerator: Send + Sync {
    async fn generate(&self, kind: PillarKind, ctx: &GenerationContext) -> Result<GeneratedPillar>;
}

/// Deterministic generator that builds skeleton content from the survey and
/// the preceding pillars. Used as the default backend so the server is fully
/// functional without an external model, and as the test generator.
pub struct TemplateGenerator;

impl TemplateGenerator {
    fn survey_str(ctx: &GenerationContext, key: &str) -> String {
        ctx.survey
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or("unspecified")
            .to_string()
    }
}

#[async_trait]
impl PillarGenerator for TemplateGenerator {
    async fn generate(&self, kind: PillarKind, ctx: &GenerationContext) -> Result<GeneratedPillar> {
        let sector = Self::survey_str(ctx, "sector");
        let content = match kind {
            PillarKind::BrandCore => json!({
                "essence": format!("A focused {} brand", sector),
                "mission": Self::survey_str(ctx, "mission"),
                "values": ctx.survey.get("values").cloned().unwrap_or_else(|| json!([])),
            }),
            PillarKind::Audience => json!({
                "segments": [
                    {"name": format!("{} early adopters", sector), "priority": "primary"},
                    {"name": format!("{} mainstream buyers", sector), "priority": "secondary"},
                ],
            }),
            PillarKind::Positioning => {
                let essence = ctx
                    .pillars
                    .get(&PillarKind::BrandCore)
                    .and_then(|p| p.content.get("essence"))
                    .cloned()
                    .unwrap_or_else(|| json!("unknown"));
                json!({
                    "statement": format!("For the {} market", sector),
                    "anchored_in": essence,
                    "differentiators": ["clarity", "speed"],
                })
            }
            PillarKind::Voice => json!({
                "tone": "direct",
                "principles": ["plain words", "no filler"],
            }),
            PillarKind::RiskAudit => json!({
                "analyses": [
                    {"area": "market", "severity": "medium", "note": format!("{} volatility", sector)},
                    {"area": "positioning", "severity": "low", "note": "narrow differentiation"},
                ],
                "opportunities": [
                    {"title": "underserved segment", "description": "secondary audience gap"},
                ],
            }),
            PillarKind::TrendTrack => {
                // High-severity findings seed extra weak signals to watch.
                let high_risk = ctx
                    .risk
                    .as_ref()
                    .map(|r| {
                        r.analyses
                            .iter()
                            .filter(|a| a.severity == super::context::RiskSeverity::High)
                            .count()
                    })
                    .unwrap_or(0);
                let mut weak = vec![json!({"title": format!("{} niche tooling", sector)})];
                if high_risk > 0 {
                    weak.push(json!({"title": "risk-driven counter-trend"}));
                }
                json!({
                    "macro_trends": [{"title": format!("{} consolidation", sector)}],
                    "weak_signals": weak,
                    "emerging_patterns": [{"title": "community-led growth"}],
                })
            }
            PillarKind::Roadmap => json!({
                "initiatives": [
                    {"title": "Message architecture rollout", "horizon": "now"},
                    {"title": "Channel expansion", "horizon": "next"},
                    {"title": "Category repositioning", "horizon": "later"},
                ],
            }),
            PillarKind::Activation => json!({
                "channels": ["site", "sales deck", "launch campaign"],
                "launch_sequence": ["internal", "soft", "public"],
            }),
        };
        Ok(GeneratedPillar {
            summary: Some(format!("{} draft for the {} market", kind, sector)),
            content,
        })
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;

    /// Generator that always fails, for error-path tests.
    pub struct FailingGenerator;

    #[async_trait]
    impl PillarGenerator for FailingGenerator {
        async fn generate(&self, _: PillarKind, _: &GenerationContext) -> Result<GeneratedPillar> {
            Err(anyhow::anyhow!("model timeout"))
        }
    }
}
