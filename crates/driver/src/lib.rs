//! UI-driven rendering orchestration for the avatar studio.
//!
//! The studio has no programmatic API, so the driver recovers workflow
//! state entirely from the observed page over the Chrome DevTools
//! Protocol: fallback element locators, bounded polling loops, and
//! per-segment failure isolation.

pub mod batch;
pub mod cdp;
pub mod compose;
pub mod download;
pub mod locator;
pub mod poll;
pub mod session;
pub mod workflow;

pub use batch::{run, BatchSummary};
pub use session::{Session, SessionMode};
pub use workflow::{RenderBackend, RenderResult, RenderSegment, Segment, Stage, StudioRenderer};
