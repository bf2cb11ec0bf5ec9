//! Staleness propagation across the pillar dependency graph.
//!
//! When a pillar's content changes, every unit that (transitively) declares
//! a dependency on it is flagged stale rather than regenerated. Regeneration
//! stays a human decision; the flags only tell the user what is out of date.

use anyhow::Result;

use crate::phase::PillarKind;
use crate::store::StrategyDb;

/// Kinds that directly depend on `changed`.
pub fn dependents_of(changed: PillarKind) -> Vec<PillarKind> {
    PillarKind::ALL
        .into_iter()
        .filter(|k| k.depends_on().contains(&changed))
        .collect()
}

/// Transitive closure of `dependents_of`, in generation order.
pub fn transitive_dependents(changed: PillarKind) -> Vec<PillarKind> {
    let mut affected = Vec::new();
    let mut queue = vec![changed];
    while let Some(kind) = queue.pop() {
        for dep in dependents_of(kind) {
            if !affected.contains(&dep) {
                affected.push(dep);
                queue.push(dep);
            }
        }
    }
    affected.sort_by_key(|k| k.order());
    affected
}

/// Flag every transitive dependent of `changed` as stale.
///
/// Only units that already hold content are flagged; a pillar that was never
/// generated has nothing to be stale relative to. Safe to run repeatedly:
/// the reason is refreshed but `stale_since` keeps its first value.
///
/// Returns the kinds that were actually flagged.
pub fn propagate(
    db: &StrategyDb,
    strategy_id: &str,
    changed: PillarKind,
) -> Result<Vec<PillarKind>> {
    let reason = format!("{} changed", changed);
    let mut flagged = Vec::new();
    for dependent in transitive_dependents(changed) {
        let unit = db.get_unit(strategy_id, dependent)?;
        if let Some(unit) = unit {
            if unit.version > 0 {
                db.mark_unit_stale(strategy_id, dependent, &reason)?;
                flagged.push(dependent);
            }
        }
    }
    Ok(flagged)
}

/// Flag translated briefs whose declared sources include `changed`.
///
/// Briefs go stale only when a source pillar's content actually changes, not
/// when the source is itself merely flagged stale.
pub fn invalidate_briefs(db: &StrategyDb, strategy_id: &str, changed: PillarKind) -> Result<usize> {
    let reason = format!("{} changed", changed);
    let mut flagged = 0;
    for brief in db.list_briefs(strategy_id)? {
        if brief.source_kinds.contains(&changed) {
            db.mark_brief_stale(&brief.id, &reason)?;
            flagged += 1;
        }
    }
    Ok(flagged)
}
