//! Inter-SF capture model.
//!
//! LoRa spreading factors are not mutually orthogonal: a transmission can
//! still be decoded under a concurrent one when its power advantage clears
//! a margin that depends on both spreading factors. The margin matrix and
//! the capture-window rule below decide which of two co-channel signals a
//! gateway keeps.

use super::airtime::symbol_time;

/// Power margin matrix in dB, indexed `[sf_signal - 7][sf_interferer - 7]`.
///
/// A signal survives an interferer iff
/// `RSSI_signal - RSSI_interferer >= NON_ORTH_DELTA[SFs-7][SFi-7]`.
/// The diagonal is the co-SF capture margin; off-diagonal entries reflect
/// the partial orthogonality between distinct spreading factors.
pub const NON_ORTH_DELTA: [[i8; 6]; 6] = [
    [1, -8, -9, -9, -9, -9],
    [-11, 1, -11, -12, -13, -13],
    [-15, -13, 1, -13, -14, -15],
    [-19, -18, -17, 1, -17, -18],
    [-22, -22, -21, -20, 1, -20],
    [-25, -25, -25, -24, -23, 1],
];

/// Number of preamble symbols a receiver needs to lock onto a signal. An
/// interferer that disappears while at least this many preamble symbols
/// remain cannot defeat the reception.
pub const CAPTURE_WINDOW_SYMBOLS: f64 = 6.0;

/// True when `rssi_signal` clears the capture margin over `rssi_interferer`.
///
/// Spreading factors outside 7..=12 are clamped onto the matrix edge.
pub fn survives_interference(rssi_signal_dbm: f64, sf_signal: u8, rssi_interferer_dbm: f64, sf_interferer: u8) -> bool {
    let row = (sf_signal.clamp(7, 12) - 7) as usize;
    let col = (sf_interferer.clamp(7, 12) - 7) as usize;
    rssi_signal_dbm - rssi_interferer_dbm >= NON_ORTH_DELTA[row][col] as f64
}

/// Start of the capture-sensitive part of a signal.
///
/// `cs_begin = start + Ts * (preamble_symbols - 6)`: interference whose
/// overlap with the signal ends before this instant is ignored for capture
/// decisions, regardless of power.
pub fn capture_window_begin(start_time: f64, spreading_factor: u8, bandwidth_hz: u32, preamble_symbols: f64) -> f64 {
    let ts = symbol_time(spreading_factor, bandwidth_hz);
    start_time + ts * (preamble_symbols - CAPTURE_WINDOW_SYMBOLS).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sf7_signal_survives_sf9_interferer_at_minus_nine() {
        // SF7 at -97 dBm against SF9 at -90 dBm: -7 >= -9, decoded.
        assert!(survives_interference(-97.0, 7, -90.0, 9));
        // Two dB weaker and it is gone.
        assert!(!survives_interference(-100.0, 7, -90.0, 9));
    }

    #[test]
    fn co_sf_capture_needs_one_db() {
        assert!(survives_interference(-90.0, 9, -91.0, 9));
        assert!(!survives_interference(-90.5, 9, -90.0, 9));
    }

    #[test]
    fn matrix_is_consistent_with_clamping() {
        // SF outside the LoRa range maps onto the matrix edge instead of
        // panicking on an out-of-bounds index.
        assert!(survives_interference(-80.0, 6, -90.0, 13));
    }

    #[test]
    fn capture_window_is_two_symbols_for_default_preamble() {
        let ts = symbol_time(7, 125_000);
        let begin = capture_window_begin(10.0, 7, 125_000, 8.0);
        assert!((begin - (10.0 + 2.0 * ts)).abs() < 1e-12);
    }

    #[test]
    fn short_preambles_clamp_window_to_start() {
        let begin = capture_window_begin(5.0, 7, 125_000, 4.0);
        assert_eq!(begin, 5.0);
    }
}
