//! Typed error hierarchy for the strata orchestration core.
//!
//! Four top-level enums cover the four subsystems:
//! - `OrchestratorError`: pillar generation and phase gating failures
//! - `SignalError`: signal creation/mutation failures
//! - `MissionError`: mission workflow and debrief failures
//! - `WidgetError`: widget registry and compute failures
//!
//! Validation variants carry the legal-alternatives set so callers can
//! surface what would have been allowed. Nothing here is ever partially
//! applied: a returned error means no writes happened for that operation,
//! except `Generation`, which records the upstream failure on the unit.

use thiserror::Error;

use crate::phase::{PillarKind, StrategyPhase};
use crate::store::models::{MissionStatus, SignalLayer, SignalStatus};

/// An out-of-order phase transition, naming the allowed next phases.
#[derive(Debug, Error)]
#[error("Illegal phase transition {from} -> {to}; allowed next: {allowed:?}")]
pub struct PhaseTransitionError {
    pub from: StrategyPhase,
    pub to: StrategyPhase,
    pub allowed: Vec<StrategyPhase>,
}

/// Errors from the pillar generation orchestrator.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Strategy {id} not found")]
    StrategyNotFound { id: String },

    #[error("Unit {kind} not found for strategy {strategy_id}")]
    UnitNotFound {
        strategy_id: String,
        kind: PillarKind,
    },

    #[error("Pillar {kind} is locked: strategy is in phase {phase}, unlocks at {unlock}")]
    KindLocked {
        kind: PillarKind,
        phase: StrategyPhase,
        unlock: StrategyPhase,
    },

    #[error("Generation already in flight for {kind} on strategy {strategy_id}")]
    AlreadyGenerating {
        strategy_id: String,
        kind: PillarKind,
    },

    #[error("Generation of {kind} failed upstream: {message}")]
    Generation { kind: PillarKind, message: String },

    #[error("Snapshot version {version} not found for unit {unit_id}")]
    SnapshotNotFound { unit_id: String, version: i64 },

    #[error("Cannot leave phase {phase}: units not complete: {missing:?}")]
    PhaseRequirementsUnmet {
        phase: StrategyPhase,
        missing: Vec<PillarKind>,
    },

    #[error("Market enrichment opens at the enrichment phase, strategy is in {phase}")]
    EnrichmentLocked { phase: StrategyPhase },

    #[error(transparent)]
    PhaseTransition(#[from] PhaseTransitionError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the signal engine.
#[derive(Debug, Error)]
pub enum SignalError {
    #[error("Strategy {id} not found")]
    StrategyNotFound { id: String },

    #[error("Signal {id} not found")]
    SignalNotFound { id: String },

    #[error("Status {status:?} is not valid for layer {layer:?}; allowed: {allowed:?}")]
    InvalidStatus {
        layer: SignalLayer,
        status: SignalStatus,
        allowed: Vec<SignalStatus>,
    },

    #[error("Decision {id} not found")]
    DecisionNotFound { id: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the mission workflow.
#[derive(Debug, Error)]
pub enum MissionError {
    #[error("Strategy {id} not found")]
    StrategyNotFound { id: String },

    #[error("Mission {id} not found")]
    MissionNotFound { id: String },

    #[error("Illegal mission transition {from:?} -> {to:?}; allowed: {allowed:?}")]
    InvalidTransition {
        from: MissionStatus,
        to: MissionStatus,
        allowed: Vec<MissionStatus>,
    },

    #[error("Mission {mission_id} cannot close without a completed debrief")]
    DebriefRequired { mission_id: String },

    #[error("Mission {mission_id} already has a debrief")]
    DebriefAlreadyExists { mission_id: String },

    #[error("Debrief requires mission in review, but mission {mission_id} is {status:?}")]
    DebriefWrongState {
        mission_id: String,
        status: MissionStatus,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the widget compute engine.
#[derive(Debug, Error)]
pub enum WidgetError {
    #[error("Strategy {id} not found")]
    StrategyNotFound { id: String },

    #[error("Unknown widget: {id}")]
    UnknownWidget { id: String },

    #[error("Widget {widget} requires complete units: {missing:?}")]
    MissingUnits {
        widget: String,
        missing: Vec<PillarKind>,
    },

    #[error("Widget {widget} unlocks at phase {minimum}, strategy is in {current}")]
    PhaseTooEarly {
        widget: String,
        minimum: StrategyPhase,
        current: StrategyPhase,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
