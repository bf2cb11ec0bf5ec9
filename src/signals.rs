//! The three-layer signal engine.
//!
//! Signals live in one of three layers (METRIC, STRONG, WEAK), each with its
//! own closed status set. Every status change lands with an audit row in the
//! same transaction, and a signal reaching its layer's designated critical
//! status spawns at most one decision, no matter how often it gets there.

use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::SignalError;
use crate::hooks::{self, SharedRecalculator};
use crate::phase::PillarKind;
use crate::pillars::context::{RiskAuditResult, RiskSeverity, TrendTrackResult, parse_unit_content};
use crate::staleness;
use crate::store::{DbHandle, StrategyDb};
use crate::store::models::{
    Confidence, DeadlineType, Decision, DecisionPriority, DecisionStatus, Signal, SignalLayer,
    SignalMutation, SignalStatus,
};

#[derive(Debug, Clone, Deserialize)]
pub struct NewSignal {
    pub layer: SignalLayer,
    /// Defaults to the layer's entry status when absent.
    #[serde(default)]
    pub status: Option<SignalStatus>,
    #[serde(default)]
    pub pillar_ref: Option<PillarKind>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub confidence: Option<Confidence>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewDecision {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub priority: DecisionPriority,
    #[serde(default)]
    pub deadline_type: Option<DeadlineType>,
}

/// A signal operation's outcome, carrying the decision it escalated into,
/// if any.
#[derive(Debug, Clone, Serialize)]
pub struct SignalOutcome {
    pub signal: Signal,
    pub decision: Option<Decision>,
}

#[derive(Clone)]
pub struct SignalEngine {
    db: DbHandle,
    recalc: SharedRecalculator,
}

type OpResult<T> = Result<T, SignalError>;

impl SignalEngine {
    pub fn new(db: DbHandle, recalc: SharedRecalculator) -> Self {
        Self { db, recalc }
    }

    pub async fn create(&self, strategy_id: &str, new: NewSignal) -> OpResult<SignalOutcome> {
        let sid = strategy_id.to_string();
        let outcome = self
            .db
            .call(move |db| {
                if db.get_strategy(&sid)?.is_none() {
                    return Ok(Err(SignalError::StrategyNotFound { id: sid }));
                }
                let status = new.status.unwrap_or_else(|| new.layer.default_status());
                if !new.layer.allows(status) {
                    return Ok(Err(SignalError::InvalidStatus {
                        layer: new.layer,
                        status,
                        allowed: new.layer.status_set().to_vec(),
                    }));
                }
                let signal = build_signal(&sid, &new, status);
                db.insert_signal(&signal)?;
                let decision = escalate_if_critical(db, &signal)?;
                Ok(Ok(SignalOutcome { signal, decision }))
            })
            .await
            .map_err(SignalError::Other)??;
        if outcome.decision.is_some() {
            self.spawn_recalc(&outcome.signal.strategy_id, "signal-escalation");
        }
        Ok(outcome)
    }

    /// Move a signal to a new status within its layer.
    ///
    /// The change and its audit row commit together. Arriving at the layer's
    /// critical status escalates into a decision; re-arriving reuses the one
    /// already spawned.
    pub async fn mutate(
        &self,
        signal_id: &str,
        to: SignalStatus,
        reason: &str,
        actor: &str,
    ) -> OpResult<SignalOutcome> {
        let id = signal_id.to_string();
        let reason = reason.to_string();
        let actor = actor.to_string();
        let outcome = self
            .db
            .call(move |db| {
                let signal = match db.get_signal(&id)? {
                    Some(s) => s,
                    None => return Ok(Err(SignalError::SignalNotFound { id })),
                };
                if !signal.layer.allows(to) {
                    return Ok(Err(SignalError::InvalidStatus {
                        layer: signal.layer,
                        status: to,
                        allowed: signal.layer.status_set().to_vec(),
                    }));
                }
                let mutated = db.mutate_signal(&id, signal.status, to, &reason, &actor)?;
                let decision = escalate_if_critical(db, &mutated)?;
                Ok(Ok(SignalOutcome { signal: mutated, decision }))
            })
            .await
            .map_err(SignalError::Other)??;
        if outcome.decision.is_some() {
            self.spawn_recalc(&outcome.signal.strategy_id, "signal-escalation");
        }
        Ok(outcome)
    }

    /// An escalation shifts the strategy's risk picture, so derived scores
    /// get refreshed off the request path.
    fn spawn_recalc(&self, strategy_id: &str, trigger: &'static str) {
        let recalc = self.recalc.clone();
        let sid = strategy_id.to_string();
        hooks::spawn_logged("score-recalculation", async move {
            recalc.recalculate(&sid, trigger).await
        });
    }

    /// Seed signals from the completed audit pillars.
    ///
    /// Macro trends register as STRONG/ACTIVE, weak signals as WEAK/WATCH,
    /// emerging patterns and opportunities as WEAK/PROBE, and high-severity
    /// risk findings as STRONG/DECLINING. Absent or unparseable audit
    /// content contributes nothing.
    pub async fn bulk_create_from_audit(&self, strategy_id: &str) -> OpResult<Vec<Signal>> {
        let sid = strategy_id.to_string();
        self.db
            .call(move |db| {
                if db.get_strategy(&sid)?.is_none() {
                    return Ok(Err(SignalError::StrategyNotFound { id: sid }));
                }
                let mut signals = Vec::new();
                let track: Option<TrendTrackResult> = db
                    .get_unit(&sid, PillarKind::TrendTrack)?
                    .as_ref()
                    .and_then(parse_unit_content);
                if let Some(track) = track {
                    for item in &track.macro_trends {
                        signals.push(audit_signal(
                            &sid,
                            SignalLayer::Strong,
                            SignalStatus::Active,
                            PillarKind::TrendTrack,
                            &item.title,
                            &item.description,
                        ));
                    }
                    for item in &track.weak_signals {
                        signals.push(audit_signal(
                            &sid,
                            SignalLayer::Weak,
                            SignalStatus::Watch,
                            PillarKind::TrendTrack,
                            &item.title,
                            &item.description,
                        ));
                    }
                    for item in &track.emerging_patterns {
                        signals.push(audit_signal(
                            &sid,
                            SignalLayer::Weak,
                            SignalStatus::Probe,
                            PillarKind::TrendTrack,
                            &item.title,
                            &item.description,
                        ));
                    }
                }
                let risk: Option<RiskAuditResult> = db
                    .get_unit(&sid, PillarKind::RiskAudit)?
                    .as_ref()
                    .and_then(parse_unit_content);
                if let Some(risk) = risk {
                    for analysis in risk
                        .analyses
                        .iter()
                        .filter(|a| a.severity == RiskSeverity::High)
                    {
                        signals.push(audit_signal(
                            &sid,
                            SignalLayer::Strong,
                            SignalStatus::Declining,
                            PillarKind::RiskAudit,
                            &format!("Risk: {}", analysis.area),
                            &analysis.note,
                        ));
                    }
                    for opportunity in &risk.opportunities {
                        signals.push(audit_signal(
                            &sid,
                            SignalLayer::Weak,
                            SignalStatus::Probe,
                            PillarKind::RiskAudit,
                            &opportunity.title,
                            &opportunity.description,
                        ));
                    }
                }
                for signal in &signals {
                    db.insert_signal(signal)?;
                }
                Ok(Ok(signals))
            })
            .await
            .map_err(SignalError::Other)?
    }

    pub async fn get(&self, signal_id: &str) -> OpResult<Signal> {
        let id = signal_id.to_string();
        self.db
            .call(move |db| match db.get_signal(&id)? {
                Some(s) => Ok(Ok(s)),
                None => Ok(Err(SignalError::SignalNotFound { id })),
            })
            .await
            .map_err(SignalError::Other)?
    }

    pub async fn list(&self, strategy_id: &str) -> OpResult<Vec<Signal>> {
        let sid = strategy_id.to_string();
        self.db
            .call(move |db| db.list_signals(&sid))
            .await
            .map_err(SignalError::Other)
    }

    pub async fn history(&self, signal_id: &str) -> OpResult<Vec<SignalMutation>> {
        let id = signal_id.to_string();
        self.db
            .call(move |db| {
                if db.get_signal(&id)?.is_none() {
                    return Ok(Err(SignalError::SignalNotFound { id }));
                }
                Ok(Ok(db.list_mutations(&id)?))
            })
            .await
            .map_err(SignalError::Other)?
    }

    /// Record a decision by hand, unattached to any signal.
    pub async fn create_decision(&self, strategy_id: &str, new: NewDecision) -> OpResult<Decision> {
        let sid = strategy_id.to_string();
        self.db
            .call(move |db| {
                if db.get_strategy(&sid)?.is_none() {
                    return Ok(Err(SignalError::StrategyNotFound { id: sid }));
                }
                let ts = now();
                let decision = Decision {
                    id: Uuid::new_v4().to_string(),
                    strategy_id: sid.clone(),
                    title: new.title.clone(),
                    description: new.description.clone(),
                    priority: new.priority,
                    status: DecisionStatus::Pending,
                    deadline_type: new.deadline_type,
                    signal_id: None,
                    created_at: ts.clone(),
                    updated_at: ts,
                };
                db.insert_decision(&decision)?;
                Ok(Ok(decision))
            })
            .await
            .map_err(SignalError::Other)?
    }

    pub async fn list_decisions(&self, strategy_id: &str) -> OpResult<Vec<Decision>> {
        let sid = strategy_id.to_string();
        self.db
            .call(move |db| db.list_decisions(&sid))
            .await
            .map_err(SignalError::Other)
    }

    pub async fn set_decision_status(&self, decision_id: &str, status: DecisionStatus) -> OpResult<Decision> {
        let id = decision_id.to_string();
        self.db
            .call(move |db| {
                if db.get_decision(&id)?.is_none() {
                    return Ok(Err(SignalError::DecisionNotFound { id }));
                }
                Ok(Ok(db.set_decision_status(&id, status)?))
            })
            .await
            .map_err(SignalError::Other)?
    }
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

fn build_signal(strategy_id: &str, new: &NewSignal, status: SignalStatus) -> Signal {
    let ts = now();
    Signal {
        id: Uuid::new_v4().to_string(),
        strategy_id: strategy_id.to_string(),
        layer: new.layer,
        status,
        pillar_ref: new.pillar_ref,
        title: new.title.clone(),
        description: new.description.clone(),
        source: new.source.clone(),
        confidence: new.confidence.unwrap_or(Confidence::Medium),
        detected_at: ts.clone(),
        last_checked_at: ts,
    }
}

fn audit_signal(
    strategy_id: &str,
    layer: SignalLayer,
    status: SignalStatus,
    pillar: PillarKind,
    title: &str,
    description: &str,
) -> Signal {
    let ts = now();
    Signal {
        id: Uuid::new_v4().to_string(),
        strategy_id: strategy_id.to_string(),
        layer,
        status,
        pillar_ref: Some(pillar),
        title: title.to_string(),
        description: description.to_string(),
        source: format!("{} audit", pillar),
        confidence: Confidence::Medium,
        detected_at: ts.clone(),
        last_checked_at: ts,
    }
}

/// Spawn the decision a critical signal calls for. Backed by the unique
/// signal index, so a second arrival at critical hands back the decision
/// created the first time. A referenced pillar with content goes stale,
/// and the staleness propagates from there.
fn escalate_if_critical(db: &StrategyDb, signal: &Signal) -> Result<Option<Decision>> {
    if signal.layer.critical_status() != Some(signal.status) {
        return Ok(None);
    }
    let (priority, deadline, title) = match signal.layer {
        SignalLayer::Metric => (
            DecisionPriority::P0,
            DeadlineType::Immediate,
            format!("Respond to critical metric: {}", signal.title),
        ),
        SignalLayer::Weak => (
            DecisionPriority::P2,
            DeadlineType::Exploratory,
            format!("Evaluate bet: {}", signal.title),
        ),
        SignalLayer::Strong => return Ok(None),
    };
    let ts = now();
    let decision = Decision {
        id: Uuid::new_v4().to_string(),
        strategy_id: signal.strategy_id.clone(),
        title,
        description: Some(signal.description.clone()),
        priority,
        status: DecisionStatus::Pending,
        deadline_type: Some(deadline),
        signal_id: Some(signal.id.clone()),
        created_at: ts.clone(),
        updated_at: ts,
    };
    let decision = db.insert_decision_for_signal(&decision)?;
    if let Some(kind) = signal.pillar_ref {
        if let Some(unit) = db.get_unit(&signal.strategy_id, kind)? {
            if unit.version > 0 {
                let reason = format!("critical signal: {}", signal.title);
                db.mark_unit_stale(&signal.strategy_id, kind, &reason)?;
                staleness::propagate(db, &signal.strategy_id, kind)?;
            }
        }
    }
    Ok(Some(decision))
}
