//! Packet error rate models.
//!
//! Two curves are provided: the logistic fit the reference was calibrated
//! with, and the analytic Croce model built from a BER expression. Both
//! map an SNIR to a loss probability for a frame of a given length.

use serde::{Deserialize, Serialize};

use super::tables::required_snr_db;

/// Packet error model selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PerModel {
    /// Logistic fit around the per-SF demodulation threshold. Default in
    /// reference mode.
    #[default]
    Logistic,
    /// Analytic BER/SER model after Croce et al.
    Croce,
}

/// Packet error probability in [0, 1] for a frame at the given SNIR.
pub fn packet_error_rate(model: PerModel, snr_db: f64, spreading_factor: u8, payload_bytes: usize) -> f64 {
    match model {
        PerModel::Logistic => logistic_per(snr_db, spreading_factor),
        PerModel::Croce => croce_per(snr_db, spreading_factor, payload_bytes),
    }
}

/// Logistic curve centered 2 dB above the demodulation threshold:
/// `PER = 1 / (1 + exp(2*(snr - (th(SF) + 2))))`.
fn logistic_per(snr_db: f64, spreading_factor: u8) -> f64 {
    let midpoint = required_snr_db(spreading_factor) + 2.0;
    1.0 / (1.0 + (2.0 * (snr_db - midpoint)).exp())
}

/// Analytic model: chip-level BER, symbol error rate, then frame loss as
/// the worse of the per-bit and per-symbol aggregates.
fn croce_per(snr_db: f64, spreading_factor: u8, payload_bytes: usize) -> f64 {
    let snir_lin = 10f64.powf(snr_db / 10.0);
    let sf = spreading_factor as f64;
    let n_chips = 2f64.powi(spreading_factor as i32);

    let ber = 0.5 * erfc((snir_lin * n_chips / (2.0 * std::f64::consts::PI)).sqrt());
    let ser = 1.0 - (1.0 - ber).powf(sf);

    let bits = (payload_bytes * 8) as f64;
    let symbols = (bits / sf).ceil();
    let per_from_bits = 1.0 - (1.0 - ber).powf(bits);
    let per_from_symbols = 1.0 - (1.0 - ser).powf(symbols);
    per_from_bits.max(per_from_symbols).clamp(0.0, 1.0)
}

/// Complementary error function, Abramowitz & Stegun 7.1.26 rational
/// approximation (|error| < 1.5e-7), extended to negative arguments via
/// `erfc(-x) = 2 - erfc(x)`.
fn erfc(x: f64) -> f64 {
    if x < 0.0 {
        return 2.0 - erfc(-x);
    }
    const P: f64 = 0.3275911;
    const A1: f64 = 0.254829592;
    const A2: f64 = -0.284496736;
    const A3: f64 = 1.421413741;
    const A4: f64 = -1.453152027;
    const A5: f64 = 1.061405429;

    let t = 1.0 / (1.0 + P * x);
    let poly = t * (A1 + t * (A2 + t * (A3 + t * (A4 + t * A5))));
    poly * (-x * x).exp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logistic_is_half_at_midpoint() {
        for sf in 7..=12 {
            let midpoint = required_snr_db(sf) + 2.0;
            let per = packet_error_rate(PerModel::Logistic, midpoint, sf, 20);
            assert!((per - 0.5).abs() < 1e-12);
        }
    }

    #[test]
    fn logistic_saturates_away_from_midpoint() {
        let high = packet_error_rate(PerModel::Logistic, 10.0, 7, 20);
        let low = packet_error_rate(PerModel::Logistic, -30.0, 7, 20);
        assert!(high < 1e-6);
        assert!(low > 1.0 - 1e-6);
    }

    #[test]
    fn croce_decreases_with_snr_and_increases_with_length() {
        let worse = packet_error_rate(PerModel::Croce, -22.0, 12, 20);
        let better = packet_error_rate(PerModel::Croce, -10.0, 12, 20);
        assert!(worse > better);

        let short = packet_error_rate(PerModel::Croce, -12.0, 9, 10);
        let long = packet_error_rate(PerModel::Croce, -12.0, 9, 200);
        assert!(long >= short);
    }

    #[test]
    fn croce_stays_in_unit_interval() {
        for snr in [-40.0, -20.0, -5.0, 0.0, 20.0] {
            for sf in 7..=12 {
                let per = packet_error_rate(PerModel::Croce, snr, sf, 51);
                assert!((0.0..=1.0).contains(&per), "per={per} snr={snr} sf={sf}");
            }
        }
    }

    #[test]
    fn erfc_reference_points() {
        assert!((erfc(0.0) - 1.0).abs() < 1e-7);
        // erfc(1) = 0.157299...
        assert!((erfc(1.0) - 0.1572992).abs() < 1e-6);
        assert!((erfc(-1.0) - (2.0 - 0.1572992)).abs() < 1e-6);
        assert!(erfc(5.0) < 1e-10);
    }
}
