//! Mod management for game servers.
//!
//! Everything here is pure: given the same catalog and active set the
//! resolver yields the same load order, so callers recompute it on every
//! provisioning or update pass instead of persisting it.

pub mod catalog;
pub mod conflicts;
pub mod export;
pub mod graph;
pub mod resolver;
pub mod schedule;
pub mod updater;

pub use catalog::{ModCatalog, ModCatalogEntry};
pub use conflicts::{ConflictSeverity, KnownConflict, KnownConflicts, ModConflict};
pub use export::{EXPORT_FORMAT_VERSION, ModExport, ModProfile};
pub use graph::ModGraph;
pub use resolver::{
    CompatibilityReport, LoadOrder, LoadOrderEntry, ModResolver, SkipReason, SkippedMod,
};
pub use schedule::{Frequency, UpdateSchedule};
pub use updater::{AutoUpdater, ModUpdateResult, UpdateReport, UpdateStatus};
