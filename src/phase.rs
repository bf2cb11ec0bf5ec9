//! Pipeline phases and pillar kinds for the strata orchestrator.
//!
//! This module provides:
//! - `StrategyPhase`: the nine ordered pipeline phases a strategy moves through
//! - `PillarKind`: the eight content-unit kinds, totally ordered by generation order
//! - Transition validation and the per-kind phase-advancement rules

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The nine ordered phases of the strategy pipeline.
///
/// Phases gate which pillar kinds may be generated. A strategy only moves
/// forward, one phase at a time, with a single exception: `Enrichment` is
/// optional and may be skipped (`Audit` directly to `Roadmap`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyPhase {
    /// Survey captured, nothing generated yet
    Intake,
    /// Brand core and audience generation
    Discovery,
    /// Positioning and voice generation
    Positioning,
    /// Risk audit and trend tracking
    Audit,
    /// Optional market-enrichment synthesis (skippable)
    Enrichment,
    /// Strategic roadmap generation
    Roadmap,
    /// Activation playbook generation
    Activation,
    /// Final review
    Review,
    /// Terminal: strategy delivered
    Delivery,
}

impl StrategyPhase {
    /// All phases in rank order.
    pub const ALL: [StrategyPhase; 9] = [
        Self::Intake,
        Self::Discovery,
        Self::Positioning,
        Self::Audit,
        Self::Enrichment,
        Self::Roadmap,
        Self::Activation,
        Self::Review,
        Self::Delivery,
    ];

    /// Integer rank of this phase (0 = intake).
    pub fn rank(self) -> u8 {
        self as u8
    }

    /// The phase immediately after this one, if any.
    pub fn next(self) -> Option<StrategyPhase> {
        Self::ALL.get(self.rank() as usize + 1).copied()
    }

    /// Whether this phase may be skipped entirely.
    pub fn is_skippable(self) -> bool {
        matches!(self, Self::Enrichment)
    }

    /// The set of phases legally reachable from this one in a single step.
    ///
    /// That is `next(self)`, plus the skip target when the next phase is the
    /// skippable one.
    pub fn allowed_next(self) -> Vec<StrategyPhase> {
        let mut allowed = Vec::with_capacity(2);
        if let Some(next) = self.next() {
            allowed.push(next);
            if next.is_skippable() {
                if let Some(after) = next.next() {
                    allowed.push(after);
                }
            }
        }
        allowed
    }

    /// Validate a transition from this phase to `target`.
    pub fn can_enter(self, target: StrategyPhase) -> bool {
        self.allowed_next().contains(&target)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Intake => "intake",
            Self::Discovery => "discovery",
            Self::Positioning => "positioning",
            Self::Audit => "audit",
            Self::Enrichment => "enrichment",
            Self::Roadmap => "roadmap",
            Self::Activation => "activation",
            Self::Review => "review",
            Self::Delivery => "delivery",
        }
    }
}

impl fmt::Display for StrategyPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("Invalid phase: {}", s))
    }
}

/// The eight pillar kinds, in generation order.
///
/// Every kind's generation context includes the content of all `complete`
/// units of strictly preceding kinds, which makes the content dependency
/// graph acyclic by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PillarKind {
    BrandCore,
    Audience,
    Positioning,
    Voice,
    RiskAudit,
    TrendTrack,
    Roadmap,
    Activation,
}

impl PillarKind {
    /// All kinds in generation order.
    pub const ALL: [PillarKind; 8] = [
        Self::BrandCore,
        Self::Audience,
        Self::Positioning,
        Self::Voice,
        Self::RiskAudit,
        Self::TrendTrack,
        Self::Roadmap,
        Self::Activation,
    ];

    /// The four base pillars every later kind builds on.
    pub const BASE: [PillarKind; 4] = [
        Self::BrandCore,
        Self::Audience,
        Self::Positioning,
        Self::Voice,
    ];

    /// Position of this kind in the generation order.
    pub fn order(self) -> u8 {
        self as u8
    }

    /// Kinds strictly preceding this one in generation order.
    pub fn preceding(self) -> impl Iterator<Item = PillarKind> {
        Self::ALL.into_iter().filter(move |k| k.order() < self.order())
    }

    /// The earliest phase at which this kind may be generated.
    pub fn unlock_phase(self) -> StrategyPhase {
        match self {
            Self::BrandCore | Self::Audience => StrategyPhase::Discovery,
            Self::Positioning | Self::Voice => StrategyPhase::Positioning,
            Self::RiskAudit | Self::TrendTrack => StrategyPhase::Audit,
            Self::Roadmap => StrategyPhase::Roadmap,
            Self::Activation => StrategyPhase::Activation,
        }
    }

    /// Statically declared staleness dependencies: kinds whose change makes
    /// units of this kind stale. Base inputs (survey answers) are immutable
    /// and carry no entry here.
    pub fn depends_on(self) -> &'static [PillarKind] {
        match self {
            Self::BrandCore | Self::Audience => &[],
            Self::Positioning => &[Self::BrandCore, Self::Audience],
            Self::Voice => &[Self::BrandCore, Self::Positioning],
            Self::RiskAudit | Self::TrendTrack => {
                &[Self::BrandCore, Self::Audience, Self::Positioning, Self::Voice]
            }
            Self::Roadmap => &[Self::RiskAudit, Self::TrendTrack, Self::Positioning],
            Self::Activation => &[Self::Roadmap, Self::Voice],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::BrandCore => "brand_core",
            Self::Audience => "audience",
            Self::Positioning => "positioning",
            Self::Voice => "voice",
            Self::RiskAudit => "risk_audit",
            Self::TrendTrack => "trend_track",
            Self::Roadmap => "roadmap",
            Self::Activation => "activation",
        }
    }
}

impl fmt::Display for PillarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PillarKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("Invalid pillar kind: {}", s))
    }
}

/// A phase-advancement rule attached to a pillar kind: once every kind in
/// `require_complete` is complete and the strategy sits in `from`, it moves
/// to `to` automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvanceRule {
    pub require_complete: &'static [PillarKind],
    pub from: StrategyPhase,
    pub to: StrategyPhase,
}

impl PillarKind {
    /// The phase-advancement rule triggered by a successful generation of
    /// this kind, if any. No kind advances past `Review`; that last step is
    /// the explicit advance-after-review action.
    pub fn advance_rule(self) -> Option<AdvanceRule> {
        match self {
            Self::BrandCore | Self::Audience => Some(AdvanceRule {
                require_complete: &[Self::BrandCore, Self::Audience],
                from: StrategyPhase::Discovery,
                to: StrategyPhase::Positioning,
            }),
            Self::Positioning | Self::Voice => Some(AdvanceRule {
                require_complete: &[Self::Positioning, Self::Voice],
                from: StrategyPhase::Positioning,
                to: StrategyPhase::Audit,
            }),
            Self::RiskAudit | Self::TrendTrack => Some(AdvanceRule {
                require_complete: &[Self::RiskAudit, Self::TrendTrack],
                from: StrategyPhase::Audit,
                to: StrategyPhase::Enrichment,
            }),
            Self::Roadmap => Some(AdvanceRule {
                require_complete: &[Self::Roadmap],
                from: StrategyPhase::Roadmap,
                to: StrategyPhase::Activation,
            }),
            Self::Activation => Some(AdvanceRule {
                require_complete: &[Self::Activation],
                from: StrategyPhase::Activation,
                to: StrategyPhase::Review,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_are_totally_ordered() {
        for pair in StrategyPhase::ALL.windows(2) {
            assert!(pair[0] < pair[1]);
            assert_eq!(pair[0].rank() + 1, pair[1].rank());
        }
    }

    #[test]
    fn next_walks_the_full_chain() {
        assert_eq!(StrategyPhase::Intake.next(), Some(StrategyPhase::Discovery));
        assert_eq!(StrategyPhase::Review.next(), Some(StrategyPhase::Delivery));
        assert_eq!(StrategyPhase::Delivery.next(), None);
    }

    #[test]
    fn only_enrichment_is_skippable() {
        let skippable: Vec<_> = StrategyPhase::ALL
            .into_iter()
            .filter(|p| p.is_skippable())
            .collect();
        assert_eq!(skippable, vec![StrategyPhase::Enrichment]);
    }

    #[test]
    fn audit_may_skip_enrichment() {
        assert_eq!(
            StrategyPhase::Audit.allowed_next(),
            vec![StrategyPhase::Enrichment, StrategyPhase::Roadmap]
        );
        assert!(StrategyPhase::Audit.can_enter(StrategyPhase::Roadmap));
    }

    #[test]
    fn no_backward_or_jump_transitions() {
        assert!(!StrategyPhase::Roadmap.can_enter(StrategyPhase::Audit));
        assert!(!StrategyPhase::Intake.can_enter(StrategyPhase::Positioning));
        assert!(!StrategyPhase::Discovery.can_enter(StrategyPhase::Discovery));
        assert!(StrategyPhase::Delivery.allowed_next().is_empty());
    }

    #[test]
    fn kind_round_trips_through_str() {
        for kind in PillarKind::ALL {
            assert_eq!(kind.as_str().parse::<PillarKind>().unwrap(), kind);
        }
        assert!("branding".parse::<PillarKind>().is_err());
    }

    #[test]
    fn phase_round_trips_through_str() {
        for phase in StrategyPhase::ALL {
            assert_eq!(phase.as_str().parse::<StrategyPhase>().unwrap(), phase);
        }
    }

    #[test]
    fn preceding_respects_generation_order() {
        let before_risk: Vec<_> = PillarKind::RiskAudit.preceding().collect();
        assert_eq!(before_risk, PillarKind::BASE.to_vec());
        assert_eq!(PillarKind::BrandCore.preceding().count(), 0);
    }

    #[test]
    fn dependency_map_is_acyclic_by_order() {
        for kind in PillarKind::ALL {
            for dep in kind.depends_on() {
                assert!(
                    dep.order() < kind.order(),
                    "{} must not depend on later kind {}",
                    kind,
                    dep
                );
            }
        }
    }

    #[test]
    fn risk_audit_advances_into_enrichment() {
        let rule = PillarKind::RiskAudit.advance_rule().unwrap();
        assert_eq!(rule.from, StrategyPhase::Audit);
        assert_eq!(rule.to, StrategyPhase::Enrichment);
        assert!(rule.require_complete.contains(&PillarKind::TrendTrack));
    }

    #[test]
    fn unlock_phases_never_decrease_along_generation_order() {
        for pair in PillarKind::ALL.windows(2) {
            assert!(pair[0].unlock_phase() <= pair[1].unlock_phase());
        }
    }
}
