//! Pillar generation orchestration.
//!
//! - `context` assembles the input a generator sees for one pillar
//! - `generator` is the seam to the content backend
//! - `Orchestrator` drives the whole flow: phase gating, the generating
//!   claim, versioning and snapshots, automatic phase advancement, and the
//!   staleness fallout of a content change

pub mod context;
pub mod generator;

use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::errors::{OrchestratorError, PhaseTransitionError};
use crate::hooks::{self, SharedRecalculator};
use crate::phase::{PillarKind, StrategyPhase};
use crate::staleness;
use crate::store::DbHandle;
use crate::store::models::{
    ContentUnit, MarketEnrichment, SnapshotSource, Strategy, StrategyStatus, UnitSnapshot,
    UnitStatus,
};
use crate::widgets;
use context::GenerationContext;
use generator::PillarGenerator;

/// A strategy together with all of its content units.
#[derive(Debug, Clone, Serialize)]
pub struct StrategyOverview {
    #[serde(flatten)]
    pub strategy: Strategy,
    pub units: Vec<ContentUnit>,
}

pub struct Orchestrator {
    db: DbHandle,
    generator: Arc<dyn PillarGenerator>,
    recalc: SharedRecalculator,
}

type OpResult<T> = Result<T, OrchestratorError>;

impl Orchestrator {
    pub fn new(db: DbHandle, generator: Arc<dyn PillarGenerator>, recalc: SharedRecalculator) -> Self {
        Self { db, generator, recalc }
    }

    pub async fn create_strategy(&self, name: String, survey: serde_json::Value) -> OpResult<Strategy> {
        self.db
            .call(move |db| db.create_strategy(&name, &survey))
            .await
            .map_err(OrchestratorError::Other)
    }

    pub async fn list_strategies(&self) -> OpResult<Vec<Strategy>> {
        self.db
            .call(|db| db.list_strategies())
            .await
            .map_err(OrchestratorError::Other)
    }

    pub async fn get_overview(&self, strategy_id: &str) -> OpResult<StrategyOverview> {
        let sid = strategy_id.to_string();
        self.db
            .call(move |db| {
                let strategy = match db.get_strategy(&sid)? {
                    Some(s) => s,
                    None => return Ok(Err(OrchestratorError::StrategyNotFound { id: sid })),
                };
                let units = db.list_units(&sid)?;
                Ok(Ok(StrategyOverview { strategy, units }))
            })
            .await
            .map_err(OrchestratorError::Other)?
    }

    pub async fn delete_strategy(&self, strategy_id: &str) -> OpResult<()> {
        let sid = strategy_id.to_string();
        self.db
            .call(move |db| {
                if db.delete_strategy(&sid)? {
                    Ok(Ok(()))
                } else {
                    Ok(Err(OrchestratorError::StrategyNotFound { id: sid }))
                }
            })
            .await
            .map_err(OrchestratorError::Other)?
    }

    /// Generate (or regenerate) one pillar.
    ///
    /// Claims the unit, assembles the context, calls the generator without
    /// holding the DB lock, then records the outcome. A successful overwrite
    /// of existing content flags dependents stale and kicks the widget and
    /// scoring side effects off in the background.
    pub async fn generate_unit(
        &self,
        strategy_id: &str,
        kind: PillarKind,
        actor: &str,
    ) -> OpResult<ContentUnit> {
        let sid = strategy_id.to_string();
        let (ctx, prior_status, had_content, status) = self
            .db
            .call(move |db| {
                let strategy = match db.get_strategy(&sid)? {
                    Some(s) => s,
                    None => return Ok(Err(OrchestratorError::StrategyNotFound { id: sid })),
                };
                if strategy.phase.rank() < kind.unlock_phase().rank() {
                    return Ok(Err(OrchestratorError::KindLocked {
                        kind,
                        phase: strategy.phase,
                        unlock: kind.unlock_phase(),
                    }));
                }
                let unit = match db.get_unit(&sid, kind)? {
                    Some(u) => u,
                    None => {
                        return Ok(Err(OrchestratorError::UnitNotFound {
                            strategy_id: sid,
                            kind,
                        }));
                    }
                };
                if !db.claim_generation(&sid, kind)? {
                    return Ok(Err(OrchestratorError::AlreadyGenerating {
                        strategy_id: sid,
                        kind,
                    }));
                }
                // Past this point the unit is claimed; a failure must hand
                // the claim back or the unit stays stuck in `generating`.
                let assembled = db.list_units(&sid).and_then(|units| {
                    let enrichment = db.latest_enrichment(&sid)?.map(|e| e.synthesis);
                    Ok(GenerationContext::assemble(
                        &sid,
                        kind,
                        strategy.survey.clone(),
                        &units,
                        enrichment,
                    ))
                });
                let ctx = match assembled {
                    Ok(ctx) => ctx,
                    Err(e) => {
                        if let Err(release) = db.release_claim(&sid, kind, unit.status) {
                            warn!(kind = kind.as_str(), "failed to release claim: {:#}", release);
                        }
                        return Err(e);
                    }
                };
                Ok(Ok((ctx, unit.status, unit.content.is_some(), strategy.status)))
            })
            .await
            .map_err(OrchestratorError::Other)??;

        let generated = match self.generator.generate(kind, &ctx).await {
            Ok(g) => g,
            Err(e) => {
                let message = format!("{:#}", e);
                let sid = strategy_id.to_string();
                let msg = message.clone();
                self.db
                    .call(move |db| db.fail_generation(&sid, kind, &msg))
                    .await
                    .map_err(OrchestratorError::Other)?;
                return Err(OrchestratorError::Generation { kind, message });
            }
        };

        let sid = strategy_id.to_string();
        let actor = actor.to_string();
        let recorded = self
            .db
            .call(move |db| {
                let source = if had_content {
                    SnapshotSource::Regeneration
                } else {
                    SnapshotSource::Generation
                };
                let unit = db.overwrite_unit_content(
                    &sid,
                    kind,
                    &generated.content,
                    generated.summary.as_deref(),
                    source,
                    &actor,
                )?;
                if had_content {
                    staleness::propagate(db, &sid, kind)?;
                    staleness::invalidate_briefs(db, &sid, kind)?;
                }
                if status == StrategyStatus::Draft {
                    db.set_strategy_status(&sid, StrategyStatus::Generating)?;
                }
                maybe_advance(db, &sid, kind)?;
                Ok(unit)
            })
            .await;
        let unit = match recorded {
            Ok(u) => u,
            Err(e) => {
                let sid = strategy_id.to_string();
                if let Err(release) = self
                    .db
                    .call(move |db| db.release_claim(&sid, kind, prior_status))
                    .await
                {
                    warn!(kind = kind.as_str(), "failed to release claim: {:#}", release);
                }
                return Err(OrchestratorError::Other(e));
            }
        };

        self.spawn_content_change_hooks(strategy_id, kind, had_content);
        Ok(unit)
    }

    /// Explicit phase advancement for the steps no generation triggers:
    /// leaving intake, leaving (or skipping) enrichment, and closing out
    /// review into delivery.
    pub async fn advance_phase(&self, strategy_id: &str, to: StrategyPhase) -> OpResult<Strategy> {
        let sid = strategy_id.to_string();
        self.db
            .call(move |db| {
                let strategy = match db.get_strategy(&sid)? {
                    Some(s) => s,
                    None => return Ok(Err(OrchestratorError::StrategyNotFound { id: sid })),
                };
                let from = strategy.phase;
                if !from.can_enter(to) {
                    return Ok(Err(PhaseTransitionError {
                        from,
                        to,
                        allowed: from.allowed_next(),
                    }
                    .into()));
                }
                // A generation-gated phase cannot be left by hand before its
                // units are in.
                if let Some(rule) = PillarKind::ALL
                    .into_iter()
                    .filter_map(|k| k.advance_rule())
                    .find(|r| r.from == from)
                {
                    let units = db.list_units(&sid)?;
                    let missing: Vec<PillarKind> = rule
                        .require_complete
                        .iter()
                        .filter(|k| {
                            !units
                                .iter()
                                .any(|u| u.kind == **k && u.status == UnitStatus::Complete)
                        })
                        .copied()
                        .collect();
                    if !missing.is_empty() {
                        return Ok(Err(OrchestratorError::PhaseRequirementsUnmet {
                            phase: from,
                            missing,
                        }));
                    }
                }
                let strategy = db.set_strategy_phase(&sid, to)?;
                let strategy = if to == StrategyPhase::Delivery {
                    db.set_strategy_status(&sid, StrategyStatus::Complete)?
                } else {
                    strategy
                };
                Ok(Ok(strategy))
            })
            .await
            .map_err(OrchestratorError::Other)?
    }

    /// Record a market-enrichment synthesis. Roadmap and activation content
    /// generated against an older synthesis is flagged stale.
    pub async fn record_enrichment(
        &self,
        strategy_id: &str,
        synthesis: serde_json::Value,
        actor: &str,
    ) -> OpResult<MarketEnrichment> {
        let sid = strategy_id.to_string();
        let actor = actor.to_string();
        self.db
            .call(move |db| {
                let strategy = match db.get_strategy(&sid)? {
                    Some(s) => s,
                    None => return Ok(Err(OrchestratorError::StrategyNotFound { id: sid })),
                };
                if strategy.phase.rank() < StrategyPhase::Enrichment.rank() {
                    return Ok(Err(OrchestratorError::EnrichmentLocked {
                        phase: strategy.phase,
                    }));
                }
                let enrichment = db.record_enrichment(&sid, &synthesis, &actor)?;
                for kind in [PillarKind::Roadmap, PillarKind::Activation] {
                    if let Some(unit) = db.get_unit(&sid, kind)? {
                        if unit.version > 0 {
                            db.mark_unit_stale(&sid, kind, "market enrichment updated")?;
                        }
                    }
                }
                Ok(Ok(enrichment))
            })
            .await
            .map_err(OrchestratorError::Other)?
    }

    /// Replace a unit's content by hand. Versioned and snapshotted exactly
    /// like a regeneration.
    pub async fn edit_unit(
        &self,
        strategy_id: &str,
        kind: PillarKind,
        content: serde_json::Value,
        summary: Option<String>,
        actor: &str,
    ) -> OpResult<ContentUnit> {
        let sid = strategy_id.to_string();
        let actor = actor.to_string();
        let unit = self
            .db
            .call(move |db| {
                let unit = match self_unit(db, &sid, kind)? {
                    Ok(u) => u,
                    Err(e) => return Ok(Err(e)),
                };
                if unit.status == UnitStatus::Generating {
                    return Ok(Err(OrchestratorError::AlreadyGenerating {
                        strategy_id: sid,
                        kind,
                    }));
                }
                let updated = db.overwrite_unit_content(
                    &sid,
                    kind,
                    &content,
                    summary.as_deref(),
                    SnapshotSource::ManualEdit,
                    &actor,
                )?;
                staleness::propagate(db, &sid, kind)?;
                staleness::invalidate_briefs(db, &sid, kind)?;
                maybe_advance(db, &sid, kind)?;
                Ok(Ok(updated))
            })
            .await
            .map_err(OrchestratorError::Other)??;
        self.spawn_content_change_hooks(strategy_id, kind, true);
        Ok(unit)
    }

    /// Roll a unit back to a snapshotted version. The rollback itself is an
    /// overwrite: current content is snapshotted and the version still goes
    /// up by one, so history stays linear.
    pub async fn restore_snapshot(
        &self,
        strategy_id: &str,
        kind: PillarKind,
        version: i64,
        actor: &str,
    ) -> OpResult<ContentUnit> {
        let sid = strategy_id.to_string();
        let actor = actor.to_string();
        let unit = self
            .db
            .call(move |db| {
                let unit = match self_unit(db, &sid, kind)? {
                    Ok(u) => u,
                    Err(e) => return Ok(Err(e)),
                };
                if unit.status == UnitStatus::Generating {
                    return Ok(Err(OrchestratorError::AlreadyGenerating {
                        strategy_id: sid,
                        kind,
                    }));
                }
                let snapshot = match db.get_snapshot(&unit.id, version)? {
                    Some(s) => s,
                    None => {
                        return Ok(Err(OrchestratorError::SnapshotNotFound {
                            unit_id: unit.id,
                            version,
                        }));
                    }
                };
                let restored = db.overwrite_unit_content(
                    &sid,
                    kind,
                    &snapshot.content,
                    snapshot.summary.as_deref(),
                    SnapshotSource::Restore,
                    &actor,
                )?;
                staleness::propagate(db, &sid, kind)?;
                staleness::invalidate_briefs(db, &sid, kind)?;
                Ok(Ok(restored))
            })
            .await
            .map_err(OrchestratorError::Other)??;
        self.spawn_content_change_hooks(strategy_id, kind, true);
        Ok(unit)
    }

    pub async fn list_snapshots(&self, strategy_id: &str, kind: PillarKind) -> OpResult<Vec<UnitSnapshot>> {
        let sid = strategy_id.to_string();
        self.db
            .call(move |db| {
                let unit = match self_unit(db, &sid, kind)? {
                    Ok(u) => u,
                    Err(e) => return Ok(Err(e)),
                };
                Ok(Ok(db.list_snapshots(&unit.id)?))
            })
            .await
            .map_err(OrchestratorError::Other)?
    }

    /// Widget invalidation and score recalculation run detached: their
    /// failure must never surface into the content operation that triggered
    /// them.
    fn spawn_content_change_hooks(&self, strategy_id: &str, kind: PillarKind, content_changed: bool) {
        if content_changed {
            let db = self.db.clone();
            let sid = strategy_id.to_string();
            hooks::spawn_logged("widget-invalidation", async move {
                db.call(move |db| {
                    widgets::invalidate_for(db, &sid, kind)?;
                    Ok(())
                })
                .await
            });
        }
        let recalc = self.recalc.clone();
        let sid = strategy_id.to_string();
        hooks::spawn_logged("score-recalculation", async move {
            recalc.recalculate(&sid, "content-change").await
        });
    }
}

fn self_unit(
    db: &crate::store::StrategyDb,
    strategy_id: &str,
    kind: PillarKind,
) -> anyhow::Result<Result<ContentUnit, OrchestratorError>> {
    if db.get_strategy(strategy_id)?.is_none() {
        return Ok(Err(OrchestratorError::StrategyNotFound {
            id: strategy_id.to_string(),
        }));
    }
    match db.get_unit(strategy_id, kind)? {
        Some(u) => Ok(Ok(u)),
        None => Ok(Err(OrchestratorError::UnitNotFound {
            strategy_id: strategy_id.to_string(),
            kind,
        })),
    }
}

/// Apply the automatic phase-advancement rule for `kind`, if its conditions
/// hold. Idempotent: once the strategy has moved on, the rule's `from` no
/// longer matches.
fn maybe_advance(db: &crate::store::StrategyDb, strategy_id: &str, kind: PillarKind) -> anyhow::Result<()> {
    let Some(rule) = kind.advance_rule() else {
        return Ok(());
    };
    let Some(strategy) = db.get_strategy(strategy_id)? else {
        return Ok(());
    };
    if strategy.phase != rule.from {
        return Ok(());
    }
    let units = db.list_units(strategy_id)?;
    let all_complete = rule.require_complete.iter().all(|k| {
        units
            .iter()
            .any(|u| u.kind == *k && u.status == UnitStatus::Complete)
    });
    if all_complete {
        db.set_strategy_phase(strategy_id, rule.to)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::NoopRecalculator;
    use crate::store::StrategyDb;
    use generator::TemplateGenerator;
    use generator::testing::FailingGenerator;
    use serde_json::json;

    fn orchestrator_with(generator: Arc<dyn PillarGenerator>) -> Orchestrator {
        let db = DbHandle::new(StrategyDb::new_in_memory().expect("db"));
        Orchestrator::new(db, generator, Arc::new(NoopRecalculator))
    }

    fn orchestrator() -> Orchestrator {
        orchestrator_with(Arc::new(TemplateGenerator))
    }

    async fn strategy_in_discovery(orch: &Orchestrator) -> Strategy {
        let s = orch
            .create_strategy("Acme".into(), json!({"sector": "saas"}))
            .await
            .unwrap();
        orch.advance_phase(&s.id, StrategyPhase::Discovery).await.unwrap()
    }

    #[tokio::test]
    async fn generation_is_blocked_before_the_kind_unlocks() {
        let orch = orchestrator();
        let s = orch.create_strategy("Acme".into(), json!({})).await.unwrap();
        // Still in intake.
        let err = orch
            .generate_unit(&s.id, PillarKind::BrandCore, "tester")
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::KindLocked { .. }));
    }

    #[tokio::test]
    async fn completing_discovery_pillars_advances_the_phase() {
        let orch = orchestrator();
        let s = strategy_in_discovery(&orch).await;
        orch.generate_unit(&s.id, PillarKind::BrandCore, "tester").await.unwrap();
        let mid = orch.get_overview(&s.id).await.unwrap();
        assert_eq!(mid.strategy.phase, StrategyPhase::Discovery);
        orch.generate_unit(&s.id, PillarKind::Audience, "tester").await.unwrap();
        let done = orch.get_overview(&s.id).await.unwrap();
        assert_eq!(done.strategy.phase, StrategyPhase::Positioning);
        assert_eq!(done.strategy.status, crate::store::models::StrategyStatus::Generating);
    }

    #[tokio::test]
    async fn failed_generation_records_the_error_and_releases_nothing() {
        let orch = orchestrator_with(Arc::new(FailingGenerator));
        let s = strategy_in_discovery(&orch).await;
        let err = orch
            .generate_unit(&s.id, PillarKind::BrandCore, "tester")
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Generation { .. }));
        let overview = orch.get_overview(&s.id).await.unwrap();
        let unit = overview
            .units
            .iter()
            .find(|u| u.kind == PillarKind::BrandCore)
            .unwrap();
        assert_eq!(unit.status, UnitStatus::Error);
        assert_eq!(unit.version, 0);
        assert!(unit.error_message.as_deref().unwrap().contains("model timeout"));
    }

    #[tokio::test]
    async fn failed_generation_never_leaves_the_claim_held() {
        let orch = orchestrator_with(Arc::new(FailingGenerator));
        let s = strategy_in_discovery(&orch).await;
        orch.generate_unit(&s.id, PillarKind::BrandCore, "tester")
            .await
            .unwrap_err();
        // A retry must reach the generator again rather than bounce off a
        // claim the failed attempt left behind.
        let err = orch
            .generate_unit(&s.id, PillarKind::BrandCore, "tester")
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Generation { .. }));
    }

    #[tokio::test]
    async fn regeneration_flags_dependents_stale() {
        let orch = orchestrator();
        let s = strategy_in_discovery(&orch).await;
        orch.generate_unit(&s.id, PillarKind::BrandCore, "tester").await.unwrap();
        orch.generate_unit(&s.id, PillarKind::Audience, "tester").await.unwrap();
        orch.generate_unit(&s.id, PillarKind::Positioning, "tester").await.unwrap();
        // Regenerate brand_core: positioning depends on it.
        let regenerated = orch
            .generate_unit(&s.id, PillarKind::BrandCore, "tester")
            .await
            .unwrap();
        assert_eq!(regenerated.version, 2);
        let overview = orch.get_overview(&s.id).await.unwrap();
        let positioning = overview
            .units
            .iter()
            .find(|u| u.kind == PillarKind::Positioning)
            .unwrap();
        assert_eq!(positioning.stale_reason.as_deref(), Some("brand_core changed"));
    }

    #[tokio::test]
    async fn manual_advance_is_refused_while_units_are_missing() {
        let orch = orchestrator();
        let s = strategy_in_discovery(&orch).await;
        let err = orch
            .advance_phase(&s.id, StrategyPhase::Positioning)
            .await
            .unwrap_err();
        match err {
            OrchestratorError::PhaseRequirementsUnmet { missing, .. } => {
                assert_eq!(missing, vec![PillarKind::BrandCore, PillarKind::Audience]);
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[tokio::test]
    async fn illegal_phase_jump_reports_the_allowed_set() {
        let orch = orchestrator();
        let s = orch.create_strategy("Acme".into(), json!({})).await.unwrap();
        let err = orch
            .advance_phase(&s.id, StrategyPhase::Delivery)
            .await
            .unwrap_err();
        match err {
            OrchestratorError::PhaseTransition(e) => {
                assert_eq!(e.from, StrategyPhase::Intake);
                assert_eq!(e.allowed, vec![StrategyPhase::Discovery]);
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[tokio::test]
    async fn enrichment_phase_can_be_left_without_recording_anything() {
        let orch = orchestrator();
        let s = strategy_in_discovery(&orch).await;
        for kind in [
            PillarKind::BrandCore,
            PillarKind::Audience,
            PillarKind::Positioning,
            PillarKind::Voice,
            PillarKind::RiskAudit,
            PillarKind::TrendTrack,
        ] {
            orch.generate_unit(&s.id, kind, "tester").await.unwrap();
        }
        // Completing both audits moved the strategy into enrichment.
        let overview = orch.get_overview(&s.id).await.unwrap();
        assert_eq!(overview.strategy.phase, StrategyPhase::Enrichment);
        let advanced = orch.advance_phase(&s.id, StrategyPhase::Roadmap).await.unwrap();
        assert_eq!(advanced.phase, StrategyPhase::Roadmap);
    }

    #[tokio::test]
    async fn restore_is_a_versioned_overwrite() {
        let orch = orchestrator();
        let s = strategy_in_discovery(&orch).await;
        orch.generate_unit(&s.id, PillarKind::BrandCore, "tester").await.unwrap();
        let edited = orch
            .edit_unit(
                &s.id,
                PillarKind::BrandCore,
                json!({"essence": "rewritten"}),
                Some("hand edit".into()),
                "ana",
            )
            .await
            .unwrap();
        assert_eq!(edited.version, 2);
        let restored = orch
            .restore_snapshot(&s.id, PillarKind::BrandCore, 1, "ana")
            .await
            .unwrap();
        assert_eq!(restored.version, 3);
        let snapshots = orch
            .list_snapshots(&s.id, PillarKind::BrandCore)
            .await
            .unwrap();
        assert_eq!(snapshots.len(), 2);
        // Version 2 snapshot holds the manual edit we rolled away from.
        assert_eq!(snapshots[0].version, 2);
        assert_eq!(snapshots[0].source, SnapshotSource::Restore);
        assert_eq!(snapshots[0].content, json!({"essence": "rewritten"}));
    }

    #[tokio::test]
    async fn restore_of_unknown_version_is_refused() {
        let orch = orchestrator();
        let s = strategy_in_discovery(&orch).await;
        orch.generate_unit(&s.id, PillarKind::BrandCore, "tester").await.unwrap();
        let err = orch
            .restore_snapshot(&s.id, PillarKind::BrandCore, 7, "ana")
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::SnapshotNotFound { version: 7, .. }));
    }

    #[tokio::test]
    async fn enrichment_flags_consumers_stale() {
        let orch = orchestrator();
        let s = strategy_in_discovery(&orch).await;
        for kind in [
            PillarKind::BrandCore,
            PillarKind::Audience,
            PillarKind::Positioning,
            PillarKind::Voice,
            PillarKind::RiskAudit,
            PillarKind::TrendTrack,
        ] {
            orch.generate_unit(&s.id, kind, "tester").await.unwrap();
        }
        orch.record_enrichment(&s.id, json!({"competitors": 2}), "ana").await.unwrap();
        orch.advance_phase(&s.id, StrategyPhase::Roadmap).await.unwrap();
        orch.generate_unit(&s.id, PillarKind::Roadmap, "tester").await.unwrap();
        // A fresh synthesis arrives after roadmap was generated.
        orch.record_enrichment(&s.id, json!({"competitors": 5}), "ana").await.unwrap();
        let overview = orch.get_overview(&s.id).await.unwrap();
        let roadmap = overview
            .units
            .iter()
            .find(|u| u.kind == PillarKind::Roadmap)
            .unwrap();
        assert_eq!(roadmap.stale_reason.as_deref(), Some("market enrichment updated"));
    }
}
