//! The batch enrichment pipeline: input loading, incremental planning,
//! worker fan-out over the enricher, and the snapshot/stream output sinks.
mod enrich;
mod plan;
mod platform;
mod run;
mod sink;
#[cfg(test)]
pub(crate) mod testkit;

pub use platform::FoundryPlatform;
pub use run::{run_foundry, run_local, FoundryRunParams};
