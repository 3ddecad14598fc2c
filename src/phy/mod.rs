//! Radio channel and physical-layer model.
//!
//! Everything in this module is a pure function of its inputs (plus, for
//! shadowing, a caller-provided RNG stream). No simulator state leaks in:
//! the gateway and node layers call down here, never the other way around.
//!
//! ## Module organization
//!
//! - `airtime`: LoRa symbol/preamble/frame timing arithmetic
//! - `path_loss`: propagation models, RSSI and dBm/mW conversions
//! - `tables`: sensitivity, noise-floor and required-SNR tables
//! - `per`: packet error rate curves (logistic and analytic)
//! - `capture`: inter-SF capture matrix and the capture-window rule

pub mod airtime;
pub mod capture;
pub mod path_loss;
pub mod per;
pub mod tables;

pub use airtime::{LoraModulation, airtime, symbol_time};
pub use capture::{NON_ORTH_DELTA, capture_window_begin, survives_interference};
pub use path_loss::{PathLossModel, dbm_to_mw, mw_to_dbm, rssi, snr};
pub use per::{PerModel, packet_error_rate};
pub use tables::{
    DEFAULT_ENERGY_DETECTION_DBM, noise_floor_dbm, required_snr_db, sensitivity_dbm,
};
