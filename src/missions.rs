//! Mission workflow: operational service-delivery engagements attached to a
//! strategy.
//!
//! Missions walk a fixed seven-state chain; review may loop back to
//! in_progress for rework or close out. Closing requires a debrief, and the
//! debrief feeds observations back into the signal engine and the pricing
//! reference table on a best-effort basis.

use chrono::Utc;
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use crate::errors::MissionError;
use crate::phase::PillarKind;
use crate::staleness;
use crate::store::{DbHandle, StrategyDb};
use crate::store::models::{
    Confidence, DebriefData, Mission, MissionDebrief, MissionStatus, Signal,
};

#[derive(Debug, Clone, Deserialize)]
pub struct NewMission {
    pub title: String,
    #[serde(default)]
    pub assignments: Vec<String>,
    #[serde(default)]
    pub deliverables: Vec<String>,
}

#[derive(Clone)]
pub struct MissionEngine {
    db: DbHandle,
}

type OpResult<T> = Result<T, MissionError>;

impl MissionEngine {
    pub fn new(db: DbHandle) -> Self {
        Self { db }
    }

    pub async fn create(&self, strategy_id: &str, new: NewMission) -> OpResult<Mission> {
        let sid = strategy_id.to_string();
        self.db
            .call(move |db| {
                if db.get_strategy(&sid)?.is_none() {
                    return Ok(Err(MissionError::StrategyNotFound { id: sid }));
                }
                Ok(Ok(db.create_mission(&sid, &new.title, &new.assignments, &new.deliverables)?))
            })
            .await
            .map_err(MissionError::Other)?
    }

    pub async fn get(&self, mission_id: &str) -> OpResult<Mission> {
        let id = mission_id.to_string();
        self.db
            .call(move |db| match db.get_mission(&id)? {
                Some(m) => Ok(Ok(m)),
                None => Ok(Err(MissionError::MissionNotFound { id })),
            })
            .await
            .map_err(MissionError::Other)?
    }

    pub async fn list(&self, strategy_id: &str) -> OpResult<Vec<Mission>> {
        let sid = strategy_id.to_string();
        self.db
            .call(move |db| db.list_missions(&sid))
            .await
            .map_err(MissionError::Other)
    }

    /// Move a mission along the workflow. Closing is refused until the
    /// debrief is in.
    pub async fn transition(&self, mission_id: &str, to: MissionStatus) -> OpResult<Mission> {
        let id = mission_id.to_string();
        self.db
            .call(move |db| {
                let mission = match db.get_mission(&id)? {
                    Some(m) => m,
                    None => return Ok(Err(MissionError::MissionNotFound { id })),
                };
                if !mission.status.can_transition_to(to) {
                    return Ok(Err(MissionError::InvalidTransition {
                        from: mission.status,
                        to,
                        allowed: mission.status.allowed_next().to_vec(),
                    }));
                }
                if to == MissionStatus::Closed && db.get_debrief(&id)?.is_none() {
                    return Ok(Err(MissionError::DebriefRequired { mission_id: id }));
                }
                Ok(Ok(db.set_mission_status(&id, to)?))
            })
            .await
            .map_err(MissionError::Other)?
    }

    /// Record the one-and-only debrief for a mission in review, then feed
    /// its observations back: suggested signals are registered at their
    /// layer's entry status and pricing insights upserted into the
    /// reference table. Feedback failures are logged, never surfaced; the
    /// debrief stands regardless.
    pub async fn complete_debrief(
        &self,
        mission_id: &str,
        data: DebriefData,
        actor: &str,
    ) -> OpResult<MissionDebrief> {
        let id = mission_id.to_string();
        let actor = actor.to_string();
        self.db
            .call(move |db| {
                let mission = match db.get_mission(&id)? {
                    Some(m) => m,
                    None => return Ok(Err(MissionError::MissionNotFound { id })),
                };
                if mission.status != MissionStatus::Review {
                    return Ok(Err(MissionError::DebriefWrongState {
                        mission_id: id,
                        status: mission.status,
                    }));
                }
                let debrief = MissionDebrief {
                    id: Uuid::new_v4().to_string(),
                    mission_id: id.clone(),
                    summary: data.summary.clone(),
                    outcome_rating: data.outcome_rating,
                    suggested_signals: data.suggested_signals.clone(),
                    pricing_insights: data.pricing_insights.clone(),
                    created_by: actor.clone(),
                    created_at: Utc::now().to_rfc3339(),
                };
                if !db.insert_debrief(&debrief)? {
                    return Ok(Err(MissionError::DebriefAlreadyExists { mission_id: id }));
                }

                for suggested in &debrief.suggested_signals {
                    let ts = Utc::now().to_rfc3339();
                    let signal = Signal {
                        id: Uuid::new_v4().to_string(),
                        strategy_id: mission.strategy_id.clone(),
                        layer: suggested.layer,
                        status: suggested.layer.default_status(),
                        pillar_ref: suggested.pillar_ref,
                        title: suggested.title.clone(),
                        description: suggested.description.clone(),
                        source: format!("mission:{}", mission.id),
                        confidence: suggested.confidence.unwrap_or(Confidence::Medium),
                        detected_at: ts.clone(),
                        last_checked_at: ts,
                    };
                    if let Err(e) = db.insert_signal(&signal) {
                        warn!(mission_id = %mission.id, "debrief signal feedback failed: {:#}", e);
                        continue;
                    }
                    // A suggested signal that points at a pillar puts that
                    // pillar's content in question.
                    if let Some(kind) = suggested.pillar_ref {
                        if let Err(e) = flag_referenced_pillar(db, &mission.strategy_id, kind, &suggested.title) {
                            warn!(mission_id = %mission.id, "debrief staleness feedback failed: {:#}", e);
                        }
                    }
                }
                for insight in &debrief.pricing_insights {
                    if let Err(e) = db.upsert_pricing(insight, Some(&mission.id)) {
                        warn!(mission_id = %mission.id, "debrief pricing feedback failed: {:#}", e);
                    }
                }
                Ok(Ok(debrief))
            })
            .await
            .map_err(MissionError::Other)?
    }

    pub async fn get_debrief(&self, mission_id: &str) -> OpResult<Option<MissionDebrief>> {
        let id = mission_id.to_string();
        self.db
            .call(move |db| {
                if db.get_mission(&id)?.is_none() {
                    return Ok(Err(MissionError::MissionNotFound { id }));
                }
                Ok(Ok(db.get_debrief(&id)?))
            })
            .await
            .map_err(MissionError::Other)?
    }
}

/// Mark a pillar a debrief-suggested signal refers to as stale, and let the
/// flag propagate. Pillars without content are left alone.
fn flag_referenced_pillar(
    db: &StrategyDb,
    strategy_id: &str,
    kind: PillarKind,
    signal_title: &str,
) -> anyhow::Result<()> {
    let Some(unit) = db.get_unit(strategy_id, kind)? else {
        return Ok(());
    };
    if unit.version > 0 {
        let reason = format!("debrief signal: {}", signal_title);
        db.mark_unit_stale(strategy_id, kind, &reason)?;
        staleness::propagate(db, strategy_id, kind)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StrategyDb;
    use crate::store::models::{
        PricingInsight, SignalLayer, SignalStatus, SnapshotSource, SuggestedSignal,
    };
    use serde_json::json;

    fn engine() -> (MissionEngine, DbHandle) {
        let db = DbHandle::new(StrategyDb::new_in_memory().expect("db"));
        (MissionEngine::new(db.clone()), db)
    }

    async fn strategy(db: &DbHandle) -> String {
        db.call(|db| db.create_strategy("s", &json!({})))
            .await
            .unwrap()
            .id
    }

    async fn mission_in(engine: &MissionEngine, sid: &str, target: MissionStatus) -> Mission {
        let mut mission = engine
            .create(
                sid,
                NewMission {
                    title: "brand workshop".into(),
                    assignments: vec!["ana".into()],
                    deliverables: vec!["deck".into()],
                },
            )
            .await
            .unwrap();
        let chain = [
            MissionStatus::Scoped,
            MissionStatus::Scheduled,
            MissionStatus::InProgress,
            MissionStatus::Delivered,
            MissionStatus::Review,
        ];
        for next in chain {
            if mission.status == target {
                break;
            }
            mission = engine.transition(&mission.id, next).await.unwrap();
        }
        mission
    }

    fn debrief_data() -> DebriefData {
        DebriefData {
            summary: "strong outcome".into(),
            outcome_rating: Some(5),
            suggested_signals: vec![],
            pricing_insights: vec![],
        }
    }

    #[tokio::test]
    async fn missions_start_in_draft_and_walk_the_chain() {
        let (engine, db) = engine();
        let sid = strategy(&db).await;
        let mission = mission_in(&engine, &sid, MissionStatus::Review).await;
        assert_eq!(mission.status, MissionStatus::Review);
    }

    #[tokio::test]
    async fn skipping_states_is_refused() {
        let (engine, db) = engine();
        let sid = strategy(&db).await;
        let mission = mission_in(&engine, &sid, MissionStatus::Draft).await;
        let err = engine
            .transition(&mission.id, MissionStatus::Delivered)
            .await
            .unwrap_err();
        match err {
            MissionError::InvalidTransition { from, allowed, .. } => {
                assert_eq!(from, MissionStatus::Draft);
                assert_eq!(allowed, vec![MissionStatus::Scoped]);
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[tokio::test]
    async fn review_can_loop_back_for_rework() {
        let (engine, db) = engine();
        let sid = strategy(&db).await;
        let mission = mission_in(&engine, &sid, MissionStatus::Review).await;
        let reworked = engine
            .transition(&mission.id, MissionStatus::InProgress)
            .await
            .unwrap();
        assert_eq!(reworked.status, MissionStatus::InProgress);
    }

    #[tokio::test]
    async fn closing_without_a_debrief_is_refused() {
        let (engine, db) = engine();
        let sid = strategy(&db).await;
        let mission = mission_in(&engine, &sid, MissionStatus::Review).await;
        let err = engine
            .transition(&mission.id, MissionStatus::Closed)
            .await
            .unwrap_err();
        assert!(matches!(err, MissionError::DebriefRequired { .. }));
        engine
            .complete_debrief(&mission.id, debrief_data(), "ana")
            .await
            .unwrap();
        let closed = engine
            .transition(&mission.id, MissionStatus::Closed)
            .await
            .unwrap();
        assert_eq!(closed.status, MissionStatus::Closed);
    }

    #[tokio::test]
    async fn debrief_outside_review_is_refused() {
        let (engine, db) = engine();
        let sid = strategy(&db).await;
        let mission = mission_in(&engine, &sid, MissionStatus::InProgress).await;
        let err = engine
            .complete_debrief(&mission.id, debrief_data(), "ana")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MissionError::DebriefWrongState {
                status: MissionStatus::InProgress,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn second_debrief_is_refused() {
        let (engine, db) = engine();
        let sid = strategy(&db).await;
        let mission = mission_in(&engine, &sid, MissionStatus::Review).await;
        engine
            .complete_debrief(&mission.id, debrief_data(), "ana")
            .await
            .unwrap();
        let err = engine
            .complete_debrief(&mission.id, debrief_data(), "ben")
            .await
            .unwrap_err();
        assert!(matches!(err, MissionError::DebriefAlreadyExists { .. }));
    }

    #[tokio::test]
    async fn debrief_feedback_registers_signals_and_pricing() {
        let (engine, db) = engine();
        let sid = strategy(&db).await;
        let mission = mission_in(&engine, &sid, MissionStatus::Review).await;
        let data = DebriefData {
            summary: "learned a lot".into(),
            outcome_rating: Some(4),
            suggested_signals: vec![SuggestedSignal {
                layer: SignalLayer::Weak,
                title: "client asked about video".into(),
                description: "twice".into(),
                pillar_ref: None,
                confidence: None,
            }],
            pricing_insights: vec![PricingInsight {
                market: "DE".into(),
                category: "workshop".into(),
                subcategory: "brand-sprint".into(),
                day_rate: 1900.0,
                currency: "EUR".into(),
                note: None,
            }],
        };
        engine.complete_debrief(&mission.id, data, "ana").await.unwrap();

        let sid2 = sid.clone();
        let signals = db.call(move |db| db.list_signals(&sid2)).await.unwrap();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].status, SignalStatus::Watch);
        assert_eq!(signals[0].source, format!("mission:{}", mission.id));

        let pricing = db.call(|db| db.list_pricing()).await.unwrap();
        assert_eq!(pricing.len(), 1);
        assert_eq!(pricing[0].source_mission_id.as_deref(), Some(mission.id.as_str()));
    }

    #[tokio::test]
    async fn debrief_signal_with_pillar_ref_flags_that_pillar_stale() {
        let (engine, db) = engine();
        let sid = strategy(&db).await;
        let sid2 = sid.clone();
        db.call(move |db| {
            for kind in [PillarKind::Positioning, PillarKind::Voice] {
                db.overwrite_unit_content(
                    &sid2,
                    kind,
                    &json!({"k": kind.as_str()}),
                    None,
                    SnapshotSource::Generation,
                    "t",
                )?;
            }
            Ok(())
        })
        .await
        .unwrap();

        let mission = mission_in(&engine, &sid, MissionStatus::Review).await;
        let data = DebriefData {
            summary: "positioning did not land".into(),
            outcome_rating: Some(2),
            suggested_signals: vec![
                SuggestedSignal {
                    layer: SignalLayer::Weak,
                    title: "positioning confused the room".into(),
                    description: "three attendees".into(),
                    pillar_ref: Some(PillarKind::Positioning),
                    confidence: None,
                },
                // References a pillar that was never generated.
                SuggestedSignal {
                    layer: SignalLayer::Weak,
                    title: "roadmap questions".into(),
                    description: String::new(),
                    pillar_ref: Some(PillarKind::Roadmap),
                    confidence: None,
                },
            ],
            pricing_insights: vec![],
        };
        engine.complete_debrief(&mission.id, data, "ana").await.unwrap();

        let sid2 = sid.clone();
        let units = db.call(move |db| db.list_units(&sid2)).await.unwrap();
        let unit = |k: PillarKind| units.iter().find(|u| u.kind == k).unwrap();
        assert_eq!(
            unit(PillarKind::Positioning).stale_reason.as_deref(),
            Some("debrief signal: positioning confused the room")
        );
        // Voice holds content and depends on positioning, so the flag spreads.
        assert_eq!(
            unit(PillarKind::Voice).stale_reason.as_deref(),
            Some("positioning changed")
        );
        assert!(unit(PillarKind::Roadmap).stale_reason.is_none());
    }
}
