//! Error types for the simulator.
//!
//! Only configuration and domain errors are represented here; reception
//! failures, capacity exhaustion and scheduling misses are event outcomes
//! recorded in traces and metrics, never `Err` values.

use thiserror::Error;

/// Represents the fatal error conditions of the simulator.
#[derive(Debug, Error)]
pub enum SimulationError {
    /// Invalid scenario content (frequency plan, region, class settings).
    #[error("configuration error: {0}")]
    Config(String),

    /// A scenario file could not be read from disk.
    #[error("failed to read scenario '{path}': {source}")]
    ScenarioRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A scenario file could not be parsed.
    #[error("failed to parse scenario '{path}': {reason}")]
    ScenarioParse { path: String, reason: String },

    /// Propagation models are undefined for non-positive distances.
    #[error("path loss undefined for non-positive distance {0} m")]
    NonPositiveDistance(f64),

    /// Spreading factor outside the LoRa range 7..=12.
    #[error("unknown spreading factor SF{0}")]
    UnknownSpreadingFactor(u8),
}

pub type Result<T> = std::result::Result<T, SimulationError>;
