//! Dashboard widget computation.
//!
//! Each widget is a pure function over completed pillar content. Results are
//! persisted per `(strategy, widget)`; invalidation flips a result back to
//! `pending` without discarding its last data, so the dashboard keeps
//! showing the previous value while recomputation is outstanding.

use std::collections::BTreeMap;

use anyhow::Result;
use serde_json::{Value, json};
use tracing::warn;

use crate::errors::WidgetError;
use crate::phase::{PillarKind, StrategyPhase};
use crate::pillars::context::{RiskAuditResult, RiskSeverity, TrendTrackResult, parse_unit_content};
use crate::store::DbHandle;
use crate::store::models::{ContentUnit, UnitStatus, WidgetResult};

type UnitMap = BTreeMap<PillarKind, ContentUnit>;
type ComputeFn = fn(&UnitMap) -> Result<Value>;

pub struct WidgetDef {
    pub id: &'static str,
    /// Pillars that must be complete before this widget can compute.
    pub requires: &'static [PillarKind],
    /// Earliest phase at which the widget becomes available.
    pub min_phase: StrategyPhase,
    /// Top-level keys the output is expected to carry. A miss is logged,
    /// not fatal; the result is stored either way.
    pub required_keys: &'static [&'static str],
    compute: ComputeFn,
}

pub static WIDGETS: [WidgetDef; 6] = [
    WidgetDef {
        id: "brand_health",
        requires: &[PillarKind::BrandCore, PillarKind::Voice],
        min_phase: StrategyPhase::Positioning,
        required_keys: &["score", "components"],
        compute: brand_health,
    },
    WidgetDef {
        id: "audience_coverage",
        requires: &[PillarKind::Audience, PillarKind::Positioning],
        min_phase: StrategyPhase::Audit,
        required_keys: &["segments", "differentiators", "coverage_ratio"],
        compute: audience_coverage,
    },
    WidgetDef {
        id: "risk_matrix",
        requires: &[PillarKind::RiskAudit],
        min_phase: StrategyPhase::Enrichment,
        required_keys: &["high", "medium", "low"],
        compute: risk_matrix,
    },
    WidgetDef {
        id: "trend_momentum",
        requires: &[PillarKind::TrendTrack],
        min_phase: StrategyPhase::Enrichment,
        required_keys: &["macro_trends", "weak_signals", "momentum"],
        compute: trend_momentum,
    },
    WidgetDef {
        id: "roadmap_velocity",
        requires: &[PillarKind::Roadmap],
        min_phase: StrategyPhase::Activation,
        required_keys: &["now", "next", "later", "total"],
        compute: roadmap_velocity,
    },
    WidgetDef {
        id: "activation_readiness",
        requires: &[PillarKind::Activation, PillarKind::Roadmap],
        min_phase: StrategyPhase::Review,
        required_keys: &["channels", "steps", "ready"],
        compute: activation_readiness,
    },
];

pub fn widget_def(id: &str) -> Option<&'static WidgetDef> {
    WIDGETS.iter().find(|d| d.id == id)
}

/// Widget ids whose inputs include `kind`; a content change to that pillar
/// invalidates all of them.
pub fn affected_by(kind: PillarKind) -> Vec<&'static str> {
    WIDGETS
        .iter()
        .filter(|d| d.requires.contains(&kind))
        .map(|d| d.id)
        .collect()
}

// ── Compute functions ─────────────────────────────────────────────────

fn arr_len(value: Option<&Value>) -> usize {
    value.and_then(Value::as_array).map_or(0, |a| a.len())
}

fn brand_health(units: &UnitMap) -> Result<Value> {
    let core = units
        .get(&PillarKind::BrandCore)
        .and_then(|u| u.content.as_ref());
    let voice = units.get(&PillarKind::Voice).and_then(|u| u.content.as_ref());

    let clarity = ["essence", "mission", "values"]
        .iter()
        .filter(|k| core.and_then(|c| c.get(**k)).is_some_and(|v| !v.is_null()))
        .count() as u64
        * 33;
    let consistency = (arr_len(voice.and_then(|v| v.get("principles"))).min(5) * 20) as u64;
    let stale = units
        .values()
        .filter(|u| u.stale_reason.is_some())
        .count();
    let freshness: u64 = match stale {
        0 => 100,
        1 => 60,
        _ => 20,
    };
    let score = (clarity.min(100) + consistency + freshness) / 3;
    Ok(json!({
        "score": score,
        "components": {
            "clarity": clarity.min(100),
            "consistency": consistency,
            "freshness": freshness,
        },
    }))
}

fn audience_coverage(units: &UnitMap) -> Result<Value> {
    let segments = arr_len(
        units
            .get(&PillarKind::Audience)
            .and_then(|u| u.content.as_ref())
            .and_then(|c| c.get("segments")),
    );
    let differentiators = arr_len(
        units
            .get(&PillarKind::Positioning)
            .and_then(|u| u.content.as_ref())
            .and_then(|c| c.get("differentiators")),
    );
    let ratio = if segments == 0 {
        0.0
    } else {
        differentiators.min(segments) as f64 / segments as f64
    };
    Ok(json!({
        "segments": segments,
        "differentiators": differentiators,
        "coverage_ratio": ratio,
    }))
}

fn risk_matrix(units: &UnitMap) -> Result<Value> {
    let risk: RiskAuditResult = units
        .get(&PillarKind::RiskAudit)
        .and_then(parse_unit_content)
        .unwrap_or_default();
    let count = |s: RiskSeverity| risk.analyses.iter().filter(|a| a.severity == s).count();
    Ok(json!({
        "high": count(RiskSeverity::High),
        "medium": count(RiskSeverity::Medium),
        "low": count(RiskSeverity::Low),
        "opportunities": risk.opportunities.len(),
    }))
}

fn trend_momentum(units: &UnitMap) -> Result<Value> {
    let track: TrendTrackResult = units
        .get(&PillarKind::TrendTrack)
        .and_then(parse_unit_content)
        .unwrap_or_default();
    let momentum =
        track.macro_trends.len() * 3 + track.emerging_patterns.len() * 2 + track.weak_signals.len();
    Ok(json!({
        "macro_trends": track.macro_trends.len(),
        "weak_signals": track.weak_signals.len(),
        "emerging_patterns": track.emerging_patterns.len(),
        "momentum": momentum,
    }))
}

fn roadmap_velocity(units: &UnitMap) -> Result<Value> {
    let initiatives = units
        .get(&PillarKind::Roadmap)
        .and_then(|u| u.content.as_ref())
        .and_then(|c| c.get("initiatives"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let horizon = |h: &str| {
        initiatives
            .iter()
            .filter(|i| i.get("horizon").and_then(Value::as_str) == Some(h))
            .count()
    };
    Ok(json!({
        "now": horizon("now"),
        "next": horizon("next"),
        "later": horizon("later"),
        "total": initiatives.len(),
    }))
}

fn activation_readiness(units: &UnitMap) -> Result<Value> {
    let activation = units
        .get(&PillarKind::Activation)
        .and_then(|u| u.content.as_ref());
    let channels = arr_len(activation.and_then(|c| c.get("channels")));
    let steps = arr_len(activation.and_then(|c| c.get("launch_sequence")));
    Ok(json!({
        "channels": channels,
        "steps": steps,
        "ready": channels > 0 && steps > 0,
    }))
}

// ── Engine ────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct WidgetEngine {
    db: DbHandle,
}

impl WidgetEngine {
    pub fn new(db: DbHandle) -> Self {
        Self { db }
    }

    /// Compute one widget and persist the result.
    ///
    /// A compute failure is stored as an `error` result, not returned as an
    /// operational error; missing inputs and too-early phases are.
    pub async fn compute(&self, strategy_id: &str, widget_id: &str) -> Result<WidgetResult, WidgetError> {
        let def = widget_def(widget_id).ok_or_else(|| WidgetError::UnknownWidget {
            id: widget_id.to_string(),
        })?;
        let sid = strategy_id.to_string();
        self.db
            .call(move |db| Ok(compute_one(db, &sid, def)))
            .await
            .map_err(WidgetError::Other)?
    }

    /// Compute every widget whose phase gate and input pillars are
    /// satisfied, skipping the rest.
    pub async fn compute_available(&self, strategy_id: &str) -> Result<Vec<WidgetResult>, WidgetError> {
        let sid = strategy_id.to_string();
        self.db
            .call(move |db| {
                let strategy = match db.get_strategy(&sid)? {
                    Some(s) => s,
                    None => return Ok(Err(WidgetError::StrategyNotFound { id: sid.clone() })),
                };
                let units = unit_map(db, &sid)?;
                let mut results = Vec::new();
                for def in &WIDGETS {
                    if strategy.phase.rank() < def.min_phase.rank() {
                        continue;
                    }
                    if !inputs_complete(&units, def) {
                        continue;
                    }
                    match compute_one(db, &sid, def) {
                        Ok(result) => results.push(result),
                        // Gates were checked above; anything left is storage.
                        Err(WidgetError::Other(e)) => return Err(e),
                        Err(_) => {}
                    }
                }
                Ok(Ok(results))
            })
            .await
            .map_err(WidgetError::Other)?
    }

    pub async fn list(&self, strategy_id: &str) -> Result<Vec<WidgetResult>, WidgetError> {
        let sid = strategy_id.to_string();
        self.db
            .call(move |db| db.list_widget_results(&sid))
            .await
            .map_err(WidgetError::Other)
    }
}

fn unit_map(db: &crate::store::StrategyDb, strategy_id: &str) -> Result<UnitMap> {
    Ok(db
        .list_units(strategy_id)?
        .into_iter()
        .map(|u| (u.kind, u))
        .collect())
}

fn inputs_complete(units: &UnitMap, def: &WidgetDef) -> bool {
    def.requires
        .iter()
        .all(|k| units.get(k).is_some_and(|u| u.status == UnitStatus::Complete))
}

fn compute_one(
    db: &crate::store::StrategyDb,
    strategy_id: &str,
    def: &'static WidgetDef,
) -> Result<WidgetResult, WidgetError> {
    let strategy = db
        .get_strategy(strategy_id)
        .map_err(WidgetError::Other)?
        .ok_or_else(|| WidgetError::StrategyNotFound {
            id: strategy_id.to_string(),
        })?;
    if strategy.phase.rank() < def.min_phase.rank() {
        return Err(WidgetError::PhaseTooEarly {
            widget: def.id.to_string(),
            minimum: def.min_phase,
            current: strategy.phase,
        });
    }
    let units = unit_map(db, strategy_id).map_err(WidgetError::Other)?;
    let missing: Vec<PillarKind> = def
        .requires
        .iter()
        .filter(|k| !units.get(k).is_some_and(|u| u.status == UnitStatus::Complete))
        .copied()
        .collect();
    if !missing.is_empty() {
        return Err(WidgetError::MissingUnits {
            widget: def.id.to_string(),
            missing,
        });
    }

    db.set_widget_computing(strategy_id, def.id)
        .map_err(WidgetError::Other)?;
    match (def.compute)(&units) {
        Ok(data) => {
            for key in def.required_keys {
                if data.get(key).is_none() {
                    warn!(widget = def.id, key, "widget output missing expected key");
                }
            }
            db.store_widget_success(strategy_id, def.id, &data)
                .map_err(WidgetError::Other)
        }
        Err(e) => db
            .store_widget_error(strategy_id, def.id, &format!("{:#}", e))
            .map_err(WidgetError::Other),
    }
}

/// Flip widgets fed by `changed` back to pending. Sync; callers wrap it in
/// the background-task helper.
pub fn invalidate_for(
    db: &crate::store::StrategyDb,
    strategy_id: &str,
    changed: PillarKind,
) -> Result<usize> {
    let affected = affected_by(changed);
    db.invalidate_widgets(strategy_id, &affected)
}
