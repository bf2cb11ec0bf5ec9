//! Strata: a content strategy orchestration engine.
//!
//! A strategy moves through a fixed sequence of phases. Within each phase a
//! set of content units (pillars) is generated, versioned, and kept fresh by
//! a staleness propagator. Around that core sit a three-layer signal engine
//! with decision escalation, a mission workflow with debrief feedback, and a
//! widget compute layer that summarizes the current state of a strategy.

pub mod api;
pub mod errors;
pub mod hooks;
pub mod missions;
pub mod phase;
pub mod pillars;
pub mod server;
pub mod signals;
pub mod staleness;
pub mod store;
pub mod widgets;
