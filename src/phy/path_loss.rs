//! Propagation models, RSSI and power-unit conversions.
//!
//! Three path-loss models are supported as tagged variants; the log-normal
//! model is the calibration reference. Shadowing is sampled by the caller
//! from the dedicated RNG stream and passed in, keeping these functions
//! pure and the sampling order reproducible.

use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SimulationError};

/// Reference log-normal intercept in dB.
pub const LOG_NORMAL_PL0_DB: f64 = 127.41;
/// Reference log-normal anchor distance in meters.
pub const LOG_NORMAL_D0_M: f64 = 40.0;
/// Reference log-normal path-loss exponent.
pub const LOG_NORMAL_GAMMA: f64 = 2.08;
/// Reference log-normal shadowing deviation in dB.
pub const LOG_NORMAL_SIGMA_DB: f64 = 3.57;

fn default_pl0() -> f64 {
    LOG_NORMAL_PL0_DB
}
fn default_d0() -> f64 {
    LOG_NORMAL_D0_M
}
fn default_gamma() -> f64 {
    LOG_NORMAL_GAMMA
}
fn default_sigma() -> f64 {
    LOG_NORMAL_SIGMA_DB
}
fn default_hata_k1() -> f64 {
    127.5
}
fn default_hata_k2() -> f64 {
    35.2
}
fn default_oulu_b() -> f64 {
    128.95
}
fn default_oulu_n() -> f64 {
    2.32
}
fn default_oulu_d0() -> f64 {
    1000.0
}

/// Path-loss model of the radio channel.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum PathLossModel {
    /// Log-distance model with log-normal shadowing:
    /// `PL = PL0 + 10*gamma*log10(d/d0) + N(0, sigma^2)`.
    LogNormal {
        #[serde(default = "default_pl0")]
        pl0_db: f64,
        #[serde(default = "default_d0")]
        d0_m: f64,
        #[serde(default = "default_gamma")]
        gamma: f64,
        #[serde(default = "default_sigma")]
        sigma_db: f64,
    },
    /// Hata-Okumura fit: `PL = K1 + K2*log10(d_km)`.
    HataOkumura {
        #[serde(default = "default_hata_k1")]
        k1: f64,
        #[serde(default = "default_hata_k2")]
        k2: f64,
    },
    /// Oulu campaign fit: `PL = B + 10*n*log10(d/d0) - G_antenna`.
    Oulu {
        #[serde(default = "default_oulu_b")]
        b: f64,
        #[serde(default = "default_oulu_n")]
        n: f64,
        #[serde(default = "default_oulu_d0")]
        d0_m: f64,
        #[serde(default)]
        antenna_gain_db: f64,
    },
}

impl Default for PathLossModel {
    fn default() -> Self {
        PathLossModel::LogNormal {
            pl0_db: LOG_NORMAL_PL0_DB,
            d0_m: LOG_NORMAL_D0_M,
            gamma: LOG_NORMAL_GAMMA,
            sigma_db: LOG_NORMAL_SIGMA_DB,
        }
    }
}

impl PathLossModel {
    /// Deterministic path loss in dB at `distance_m` meters.
    ///
    /// The shadowing term is *not* included here; add a sample from
    /// [`PathLossModel::sample_shadowing`] where the scenario calls for it.
    /// Distances `<= 0` are a domain error for every model.
    pub fn path_loss_db(&self, distance_m: f64) -> Result<f64> {
        if distance_m <= 0.0 {
            return Err(SimulationError::NonPositiveDistance(distance_m));
        }
        Ok(match self {
            PathLossModel::LogNormal { pl0_db, d0_m, gamma, .. } => {
                pl0_db + 10.0 * gamma * (distance_m / d0_m).log10()
            }
            PathLossModel::HataOkumura { k1, k2 } => k1 + k2 * (distance_m / 1000.0).log10(),
            PathLossModel::Oulu { b, n, d0_m, antenna_gain_db } => {
                b + 10.0 * n * (distance_m / d0_m).log10() - antenna_gain_db
            }
        })
    }

    /// Draw one shadowing sample in dB from the model's deviation.
    ///
    /// Models without a stochastic term always return 0.0 and do not touch
    /// the RNG, so enabling them never shifts other streams.
    pub fn sample_shadowing(&self, rng: &mut StdRng) -> f64 {
        match self {
            PathLossModel::LogNormal { sigma_db, .. } if *sigma_db > 0.0 => {
                let normal = Normal::new(0.0, *sigma_db).expect("invalid shadowing sigma");
                normal.sample(rng)
            }
            _ => 0.0,
        }
    }
}

/// Received signal strength in dBm.
///
/// `RSSI = P_tx + G_antennas - L_cable - PL - L_obstacles - X_shadow`
pub fn rssi(
    tx_power_dbm: f64,
    path_loss_db: f64,
    antenna_gains_db: f64,
    cable_loss_db: f64,
    obstacle_loss_db: f64,
    shadowing_db: f64,
) -> f64 {
    tx_power_dbm + antenna_gains_db - cable_loss_db - path_loss_db - obstacle_loss_db - shadowing_db
}

/// Signal-to-noise ratio in dB.
///
/// The LoRa despreading processing gain `10*log10(2^SF)` is off by default;
/// the reference calibrates its thresholds without it.
pub fn snr(rssi_dbm: f64, noise_dbm: f64, spreading_factor: u8, processing_gain: bool) -> f64 {
    let base = rssi_dbm - noise_dbm;
    if processing_gain {
        base + 10.0 * 2f64.powi(spreading_factor as i32).log10()
    } else {
        base
    }
}

/// Convert power from dBm to milliwatts: `P(mW) = 10^(P(dBm)/10)`.
pub fn dbm_to_mw(dbm: f64) -> f64 {
    10f64.powf(dbm / 10.0)
}

/// Convert power from milliwatts to dBm: `P(dBm) = 10*log10(P(mW))`.
pub fn mw_to_dbm(mw: f64) -> f64 {
    10.0 * mw.log10()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn log_normal_at_anchor_distance_is_intercept() {
        let model = PathLossModel::default();
        let pl = model.path_loss_db(LOG_NORMAL_D0_M).unwrap();
        assert!((pl - LOG_NORMAL_PL0_DB).abs() < 1e-12);
    }

    #[test]
    fn log_normal_decade_adds_ten_gamma() {
        let model = PathLossModel::default();
        let near = model.path_loss_db(40.0).unwrap();
        let far = model.path_loss_db(400.0).unwrap();
        assert!((far - near - 10.0 * LOG_NORMAL_GAMMA).abs() < 1e-9);
    }

    #[test]
    fn hata_at_one_km_is_k1() {
        let model = PathLossModel::HataOkumura { k1: 127.5, k2: 35.2 };
        assert!((model.path_loss_db(1000.0).unwrap() - 127.5).abs() < 1e-12);
    }

    #[test]
    fn oulu_subtracts_antenna_gain() {
        let model = PathLossModel::Oulu {
            b: 128.95,
            n: 2.32,
            d0_m: 1000.0,
            antenna_gain_db: 6.0,
        };
        assert!((model.path_loss_db(1000.0).unwrap() - 122.95).abs() < 1e-12);
    }

    #[test]
    fn non_positive_distance_is_domain_error() {
        for model in [
            PathLossModel::default(),
            PathLossModel::HataOkumura { k1: 127.5, k2: 35.2 },
        ] {
            assert!(matches!(
                model.path_loss_db(0.0),
                Err(SimulationError::NonPositiveDistance(_))
            ));
            assert!(matches!(
                model.path_loss_db(-3.0),
                Err(SimulationError::NonPositiveDistance(_))
            ));
        }
    }

    #[test]
    fn shadowing_is_zero_without_sigma() {
        let mut rng = StdRng::seed_from_u64(1);
        let model = PathLossModel::LogNormal {
            pl0_db: 127.41,
            d0_m: 40.0,
            gamma: 2.08,
            sigma_db: 0.0,
        };
        assert_eq!(model.sample_shadowing(&mut rng), 0.0);
    }

    #[test]
    fn dbm_mw_roundtrip() {
        for v in [-120.0, -90.0, -30.0, 0.0, 14.0] {
            let back = mw_to_dbm(dbm_to_mw(v));
            assert!((v - back).abs() < 1e-9);
        }
    }

    #[test]
    fn processing_gain_adds_sf_term() {
        let without = snr(-110.0, -117.0, 7, false);
        let with = snr(-110.0, -117.0, 7, true);
        assert!((without - 7.0).abs() < 1e-12);
        assert!((with - without - 10.0 * 128f64.log10()).abs() < 1e-9);
    }
}
