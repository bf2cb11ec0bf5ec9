use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::phase::{PillarKind, StrategyPhase};

// ── Strategy ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum StrategyStatus {
    Draft,
    Generating,
    Complete,
    Archived,
}

impl StrategyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Generating => "generating",
            Self::Complete => "complete",
            Self::Archived => "archived",
        }
    }
}

impl FromStr for StrategyStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "generating" => Ok(Self::Generating),
            "complete" => Ok(Self::Complete),
            "archived" => Ok(Self::Archived),
            _ => Err(format!("Invalid strategy status: {}", s)),
        }
    }
}

/// Aggregate root. Owns all content units, signals, decisions, missions and
/// widget results; deleting a strategy cascades to all of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    pub id: String,
    pub name: String,
    pub phase: StrategyPhase,
    pub status: StrategyStatus,
    /// Immutable survey answers captured at intake, fed into every
    /// generation context.
    pub survey: serde_json::Value,
    pub created_at: String,
    pub updated_at: String,
}

// ── Content units (pillars) ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Pending,
    Generating,
    Complete,
    Error,
}

impl UnitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Generating => "generating",
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }
}

impl FromStr for UnitStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "generating" => Ok(Self::Generating),
            "complete" => Ok(Self::Complete),
            "error" => Ok(Self::Error),
            _ => Err(format!("Invalid unit status: {}", s)),
        }
    }
}

/// One generated section ("pillar") of the strategy document.
///
/// `version` increases by exactly 1 on every content overwrite, and every
/// overwrite of non-empty content is preceded by a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentUnit {
    pub id: String,
    pub strategy_id: String,
    pub kind: PillarKind,
    pub status: UnitStatus,
    pub content: Option<serde_json::Value>,
    pub summary: Option<String>,
    pub version: i64,
    pub stale_reason: Option<String>,
    pub stale_since: Option<String>,
    pub error_message: Option<String>,
    pub generated_at: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotSource {
    Generation,
    Regeneration,
    ManualEdit,
    Restore,
}

impl SnapshotSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generation => "generation",
            Self::Regeneration => "regeneration",
            Self::ManualEdit => "manual_edit",
            Self::Restore => "restore",
        }
    }
}

impl FromStr for SnapshotSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generation" => Ok(Self::Generation),
            "regeneration" => Ok(Self::Regeneration),
            "manual_edit" => Ok(Self::ManualEdit),
            "restore" => Ok(Self::Restore),
            _ => Err(format!("Invalid snapshot source: {}", s)),
        }
    }
}

/// Immutable prior-value record, created once per content overwrite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitSnapshot {
    pub id: String,
    pub unit_id: String,
    /// The version the overwritten content carried.
    pub version: i64,
    pub content: serde_json::Value,
    pub summary: Option<String>,
    pub source: SnapshotSource,
    pub created_by: String,
    pub created_at: String,
}

/// Market-enrichment synthesis recorded during the optional enrichment phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketEnrichment {
    pub id: String,
    pub strategy_id: String,
    pub synthesis: serde_json::Value,
    pub created_by: String,
    pub created_at: String,
}

// ── Signals ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SignalLayer {
    #[serde(rename = "METRIC")]
    Metric,
    #[serde(rename = "STRONG")]
    Strong,
    #[serde(rename = "WEAK")]
    Weak,
}

impl SignalLayer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Metric => "METRIC",
            Self::Strong => "STRONG",
            Self::Weak => "WEAK",
        }
    }

    /// The fixed status set for this layer. A signal's status is always a
    /// member of its layer's set, never a value from another layer.
    pub fn status_set(&self) -> &'static [SignalStatus] {
        match self {
            Self::Metric => &[
                SignalStatus::Normal,
                SignalStatus::Drifting,
                SignalStatus::Critical,
                SignalStatus::Recovered,
            ],
            Self::Strong => &[
                SignalStatus::Active,
                SignalStatus::Confirmed,
                SignalStatus::Declining,
                SignalStatus::Archived,
            ],
            Self::Weak => &[
                SignalStatus::Watch,
                SignalStatus::Probe,
                SignalStatus::Bet,
                SignalStatus::Dismissed,
            ],
        }
    }

    pub fn allows(&self, status: SignalStatus) -> bool {
        self.status_set().contains(&status)
    }

    /// The layer's designated escalation value, if it has one. Reaching it
    /// spawns a decision.
    pub fn critical_status(&self) -> Option<SignalStatus> {
        match self {
            Self::Metric => Some(SignalStatus::Critical),
            Self::Strong => None,
            Self::Weak => Some(SignalStatus::Bet),
        }
    }

    /// Default status for signals suggested by a mission debrief.
    pub fn default_status(&self) -> SignalStatus {
        match self {
            Self::Metric => SignalStatus::Normal,
            Self::Strong => SignalStatus::Active,
            Self::Weak => SignalStatus::Watch,
        }
    }
}

impl FromStr for SignalLayer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "METRIC" => Ok(Self::Metric),
            "STRONG" => Ok(Self::Strong),
            "WEAK" => Ok(Self::Weak),
            _ => Err(format!("Invalid signal layer: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalStatus {
    // METRIC
    Normal,
    Drifting,
    Critical,
    Recovered,
    // STRONG
    Active,
    Confirmed,
    Declining,
    Archived,
    // WEAK
    Watch,
    Probe,
    Bet,
    Dismissed,
}

impl SignalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::Drifting => "DRIFTING",
            Self::Critical => "CRITICAL",
            Self::Recovered => "RECOVERED",
            Self::Active => "ACTIVE",
            Self::Confirmed => "CONFIRMED",
            Self::Declining => "DECLINING",
            Self::Archived => "ARCHIVED",
            Self::Watch => "WATCH",
            Self::Probe => "PROBE",
            Self::Bet => "BET",
            Self::Dismissed => "DISMISSED",
        }
    }
}

impl FromStr for SignalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NORMAL" => Ok(Self::Normal),
            "DRIFTING" => Ok(Self::Drifting),
            "CRITICAL" => Ok(Self::Critical),
            "RECOVERED" => Ok(Self::Recovered),
            "ACTIVE" => Ok(Self::Active),
            "CONFIRMED" => Ok(Self::Confirmed),
            "DECLINING" => Ok(Self::Declining),
            "ARCHIVED" => Ok(Self::Archived),
            "WATCH" => Ok(Self::Watch),
            "PROBE" => Ok(Self::Probe),
            "BET" => Ok(Self::Bet),
            "DISMISSED" => Ok(Self::Dismissed),
            _ => Err(format!("Invalid signal status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        }
    }
}

impl FromStr for Confidence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LOW" => Ok(Self::Low),
            "MEDIUM" => Ok(Self::Medium),
            "HIGH" => Ok(Self::High),
            _ => Err(format!("Invalid confidence: {}", s)),
        }
    }
}

/// An observation about the strategy's market or risk context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: String,
    pub strategy_id: String,
    pub layer: SignalLayer,
    pub status: SignalStatus,
    /// The pillar this observation is about, if any.
    pub pillar_ref: Option<PillarKind>,
    pub title: String,
    pub description: String,
    pub source: String,
    pub confidence: Confidence,
    pub detected_at: String,
    pub last_checked_at: String,
}

/// Append-only audit record: one row per signal status change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalMutation {
    pub id: i64,
    pub signal_id: String,
    pub from_status: SignalStatus,
    pub to_status: SignalStatus,
    pub reason: String,
    pub mutated_by: String,
    pub created_at: String,
}

// ── Decisions ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DecisionPriority {
    P0,
    P1,
    P2,
}

impl DecisionPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::P0 => "P0",
            Self::P1 => "P1",
            Self::P2 => "P2",
        }
    }
}

impl FromStr for DecisionPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "P0" => Ok(Self::P0),
            "P1" => Ok(Self::P1),
            "P2" => Ok(Self::P2),
            _ => Err(format!("Invalid decision priority: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionStatus {
    Pending,
    InProgress,
    Resolved,
    Deferred,
}

impl DecisionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::InProgress => "IN_PROGRESS",
            Self::Resolved => "RESOLVED",
            Self::Deferred => "DEFERRED",
        }
    }
}

impl FromStr for DecisionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "RESOLVED" => Ok(Self::Resolved),
            "DEFERRED" => Ok(Self::Deferred),
            _ => Err(format!("Invalid decision status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeadlineType {
    Immediate,
    Scheduled,
    Exploratory,
}

impl DeadlineType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Immediate => "IMMEDIATE",
            Self::Scheduled => "SCHEDULED",
            Self::Exploratory => "EXPLORATORY",
        }
    }
}

impl FromStr for DeadlineType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IMMEDIATE" => Ok(Self::Immediate),
            "SCHEDULED" => Ok(Self::Scheduled),
            "EXPLORATORY" => Ok(Self::Exploratory),
            _ => Err(format!("Invalid deadline type: {}", s)),
        }
    }
}

/// A prioritized action item, often auto-spawned from an escalated signal.
/// At most one decision exists per signal (unique `signal_id`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub id: String,
    pub strategy_id: String,
    pub title: String,
    pub description: Option<String>,
    pub priority: DecisionPriority,
    pub status: DecisionStatus,
    pub deadline_type: Option<DeadlineType>,
    pub signal_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

// ── Missions ──────────────────────────────────────────────────────────

/// The seven mission workflow states. Transitions follow a fixed table:
/// a forward chain, except `Review`, which may close or loop back to
/// `InProgress` for rework.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MissionStatus {
    Draft,
    Scoped,
    Scheduled,
    InProgress,
    Delivered,
    Review,
    Closed,
}

impl MissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Scoped => "scoped",
            Self::Scheduled => "scheduled",
            Self::InProgress => "in_progress",
            Self::Delivered => "delivered",
            Self::Review => "review",
            Self::Closed => "closed",
        }
    }

    /// Legal successor states for this state.
    pub fn allowed_next(&self) -> &'static [MissionStatus] {
        match self {
            Self::Draft => &[Self::Scoped],
            Self::Scoped => &[Self::Scheduled],
            Self::Scheduled => &[Self::InProgress],
            Self::InProgress => &[Self::Delivered],
            Self::Delivered => &[Self::Review],
            Self::Review => &[Self::Closed, Self::InProgress],
            Self::Closed => &[],
        }
    }

    pub fn can_transition_to(&self, target: MissionStatus) -> bool {
        self.allowed_next().contains(&target)
    }
}

impl FromStr for MissionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "scoped" => Ok(Self::Scoped),
            "scheduled" => Ok(Self::Scheduled),
            "in_progress" => Ok(Self::InProgress),
            "delivered" => Ok(Self::Delivered),
            "review" => Ok(Self::Review),
            "closed" => Ok(Self::Closed),
            _ => Err(format!("Invalid mission status: {}", s)),
        }
    }
}

/// An operational service-delivery workflow attached to a strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mission {
    pub id: String,
    pub strategy_id: String,
    pub title: String,
    pub status: MissionStatus,
    pub assignments: Vec<String>,
    pub deliverables: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// A signal suggested by a completed mission debrief.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestedSignal {
    pub layer: SignalLayer,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub pillar_ref: Option<PillarKind>,
    #[serde(default)]
    pub confidence: Option<Confidence>,
}

/// A pricing observation from a completed mission, upserted into the
/// market-pricing reference table keyed by (market, category, subcategory).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingInsight {
    pub market: String,
    pub category: String,
    pub subcategory: String,
    pub day_rate: f64,
    pub currency: String,
    #[serde(default)]
    pub note: Option<String>,
}

/// Debrief payload supplied when a mission's review completes. Created
/// exactly once per mission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebriefData {
    pub summary: String,
    #[serde(default)]
    pub outcome_rating: Option<u8>,
    #[serde(default)]
    pub suggested_signals: Vec<SuggestedSignal>,
    #[serde(default)]
    pub pricing_insights: Vec<PricingInsight>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissionDebrief {
    pub id: String,
    pub mission_id: String,
    pub summary: String,
    pub outcome_rating: Option<u8>,
    pub suggested_signals: Vec<SuggestedSignal>,
    pub pricing_insights: Vec<PricingInsight>,
    pub created_by: String,
    pub created_at: String,
}

/// One row of the market-pricing reference table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingRef {
    pub market: String,
    pub category: String,
    pub subcategory: String,
    pub day_rate: f64,
    pub currency: String,
    pub note: Option<String>,
    pub source_mission_id: Option<String>,
    pub updated_at: String,
}

// ── Widgets ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WidgetStatus {
    Pending,
    Computing,
    Ready,
    Error,
}

impl WidgetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Computing => "computing",
            Self::Ready => "ready",
            Self::Error => "error",
        }
    }
}

impl FromStr for WidgetStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "computing" => Ok(Self::Computing),
            "ready" => Ok(Self::Ready),
            "error" => Ok(Self::Error),
            _ => Err(format!("Invalid widget status: {}", s)),
        }
    }
}

/// Persisted output of one widget computation, keyed by
/// `(strategy_id, widget)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WidgetResult {
    pub strategy_id: String,
    pub widget: String,
    pub status: WidgetStatus,
    pub data: Option<serde_json::Value>,
    pub computed_at: Option<String>,
    pub error_message: Option<String>,
}

// ── Translated briefs ─────────────────────────────────────────────────

/// A translated/derived brief rendered from declared source pillars by the
/// external rendering collaborator. Only its staleness is tracked here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslatedBrief {
    pub id: String,
    pub strategy_id: String,
    pub locale: String,
    pub doc_type: String,
    pub source_kinds: Vec<PillarKind>,
    pub stale_reason: Option<String>,
    pub stale_since: Option<String>,
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layer_status_sets_are_disjoint() {
        let layers = [SignalLayer::Metric, SignalLayer::Strong, SignalLayer::Weak];
        for (i, a) in layers.iter().enumerate() {
            for b in layers.iter().skip(i + 1) {
                for status in a.status_set() {
                    assert!(
                        !b.allows(*status),
                        "{} leaks into {}",
                        status.as_str(),
                        b.as_str()
                    );
                }
            }
        }
    }

    #[test]
    fn critical_statuses_belong_to_their_layer() {
        assert_eq!(
            SignalLayer::Metric.critical_status(),
            Some(SignalStatus::Critical)
        );
        assert_eq!(SignalLayer::Weak.critical_status(), Some(SignalStatus::Bet));
        assert_eq!(SignalLayer::Strong.critical_status(), None);
        for layer in [SignalLayer::Metric, SignalLayer::Weak] {
            assert!(layer.allows(layer.critical_status().unwrap()));
        }
    }

    #[test]
    fn default_statuses_are_members_of_their_layer() {
        for layer in [SignalLayer::Metric, SignalLayer::Strong, SignalLayer::Weak] {
            assert!(layer.allows(layer.default_status()));
        }
    }

    #[test]
    fn review_is_the_only_branching_mission_state() {
        let branching: Vec<_> = [
            MissionStatus::Draft,
            MissionStatus::Scoped,
            MissionStatus::Scheduled,
            MissionStatus::InProgress,
            MissionStatus::Delivered,
            MissionStatus::Review,
            MissionStatus::Closed,
        ]
        .into_iter()
        .filter(|s| s.allowed_next().len() > 1)
        .collect();
        assert_eq!(branching, vec![MissionStatus::Review]);
        assert!(MissionStatus::Review.can_transition_to(MissionStatus::InProgress));
        assert!(MissionStatus::Review.can_transition_to(MissionStatus::Closed));
    }

    #[test]
    fn closed_is_terminal() {
        assert!(MissionStatus::Closed.allowed_next().is_empty());
        assert!(!MissionStatus::Closed.can_transition_to(MissionStatus::Draft));
    }

    #[test]
    fn status_enums_round_trip_through_str() {
        for s in SignalLayer::Metric
            .status_set()
            .iter()
            .chain(SignalLayer::Strong.status_set())
            .chain(SignalLayer::Weak.status_set())
        {
            assert_eq!(s.as_str().parse::<SignalStatus>().unwrap(), *s);
        }
        assert_eq!("P0".parse::<DecisionPriority>().unwrap(), DecisionPriority::P0);
        assert_eq!(
            "in_progress".parse::<MissionStatus>().unwrap(),
            MissionStatus::InProgress
        );
        assert_eq!(
            "manual_edit".parse::<SnapshotSource>().unwrap(),
            SnapshotSource::ManualEdit
        );
    }

    #[test]
    fn debrief_data_parses_with_defaults() {
        let json = r#"{ "summary": "went well" }"#;
        let data: DebriefData = serde_json::from_str(json).unwrap();
        assert!(data.suggested_signals.is_empty());
        assert!(data.pricing_insights.is_empty());
        assert!(data.outcome_rating.is_none());
    }
}
