//! Aggregate run metrics.
//!
//! Counters are updated by the simulator as events resolve and exported
//! once at the end of a run, both as a serializable structure and as
//! `.sca`-style scalar lines an external comparator can diff against the
//! reference outputs.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::energy::EnergyBreakdown;

/// Sent/delivered tallies of one aggregation bucket.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DeliveryStats {
    pub sent: u64,
    pub delivered: u64,
}

impl DeliveryStats {
    pub fn pdr(&self) -> f64 {
        if self.sent == 0 {
            0.0
        } else {
            self.delivered as f64 / self.sent as f64
        }
    }
}

/// Per-node summary row.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NodeStats {
    pub sent: u64,
    pub delivered: u64,
    pub energy: EnergyBreakdown,
}

/// Aggregate metrics of one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Metrics {
    pub tx_started: u64,
    pub tx_completed: u64,
    /// Unique uplink events acted upon by the server.
    pub unique_uplinks_delivered: u64,
    /// Successful gateway receptions (all copies).
    pub gateway_receptions: u64,
    pub collisions: u64,
    pub below_sensitivity: u64,
    pub below_energy_detection: u64,
    pub packet_errors: u64,
    pub downlinks_sent: u64,
    pub downlinks_delivered: u64,
    pub downlinks_missed: u64,
    pub duty_cycle_deferrals: u64,
    pub nodes_depleted: u64,
    pub joins_performed: u64,

    pub per_sf: BTreeMap<u8, DeliveryStats>,
    pub per_gateway: BTreeMap<usize, DeliveryStats>,
    pub per_node: Vec<NodeStats>,

    /// Total uplink airtime emitted, seconds.
    pub total_airtime_s: f64,
    /// Application bytes delivered end to end.
    pub delivered_payload_bytes: u64,

    sum_delay_s: f64,
    delay_samples: u64,
    sum_snr_db: f64,
    snr_samples: u64,
}

impl Metrics {
    /// Global packet delivery ratio.
    pub fn pdr(&self) -> f64 {
        if self.tx_started == 0 {
            0.0
        } else {
            self.unique_uplinks_delivered as f64 / self.tx_started as f64
        }
    }

    pub fn record_delay(&mut self, delay_s: f64) {
        self.sum_delay_s += delay_s;
        self.delay_samples += 1;
    }

    pub fn record_snr(&mut self, snr_db: f64) {
        self.sum_snr_db += snr_db;
        self.snr_samples += 1;
    }

    pub fn mean_delay_s(&self) -> f64 {
        if self.delay_samples == 0 {
            0.0
        } else {
            self.sum_delay_s / self.delay_samples as f64
        }
    }

    pub fn mean_snr_db(&self) -> f64 {
        if self.snr_samples == 0 {
            0.0
        } else {
            self.sum_snr_db / self.snr_samples as f64
        }
    }

    /// Delivered application throughput over the run, bits per second.
    pub fn throughput_bps(&self, duration_s: f64) -> f64 {
        if duration_s <= 0.0 {
            0.0
        } else {
            self.delivered_payload_bytes as f64 * 8.0 / duration_s
        }
    }

    /// Fraction of the run the medium carried uplink energy.
    pub fn airtime_utilization(&self, duration_s: f64) -> f64 {
        if duration_s <= 0.0 {
            0.0
        } else {
            self.total_airtime_s / duration_s
        }
    }

    /// `.sca`-style scalar lines with the fields the reference comparator
    /// expects.
    pub fn sca_summary(&self, run_name: &str, duration_s: f64) -> String {
        let mut out = String::new();
        let mut push = |name: &str, value: f64| {
            out.push_str(&format!("scalar {run_name} {name} {value}\n"));
        };
        push("pdr", self.pdr());
        push("sentPackets", self.tx_started as f64);
        push("receivedPackets", self.unique_uplinks_delivered as f64);
        push("collisions", self.collisions as f64);
        push("meanSnr", self.mean_snr_db());
        push("meanDelay", self.mean_delay_s());
        push("airtimeUtilization", self.airtime_utilization(duration_s));
        for (sf, stats) in &self.per_sf {
            push(&format!("pdrSf{sf}"), stats.pdr());
        }
        for (gw, stats) in &self.per_gateway {
            push(&format!("receivedGw{gw}"), stats.delivered as f64);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pdr_counts_unique_deliveries() {
        let mut m = Metrics::default();
        m.tx_started = 10;
        m.unique_uplinks_delivered = 7;
        assert!((m.pdr() - 0.7).abs() < 1e-12);
        assert_eq!(Metrics::default().pdr(), 0.0);
    }

    #[test]
    fn means_are_sample_averages() {
        let mut m = Metrics::default();
        m.record_delay(1.0);
        m.record_delay(3.0);
        m.record_snr(-10.0);
        m.record_snr(-20.0);
        assert!((m.mean_delay_s() - 2.0).abs() < 1e-12);
        assert!((m.mean_snr_db() + 15.0).abs() < 1e-12);
    }

    #[test]
    fn sca_summary_contains_reference_fields() {
        let mut m = Metrics::default();
        m.tx_started = 4;
        m.unique_uplinks_delivered = 2;
        m.collisions = 1;
        m.per_sf.insert(7, DeliveryStats { sent: 4, delivered: 2 });
        let sca = m.sca_summary("run-0", 600.0);
        assert!(sca.contains("scalar run-0 pdr 0.5"));
        assert!(sca.contains("scalar run-0 collisions 1"));
        assert!(sca.contains("meanSnr"));
        assert!(sca.contains("pdrSf7"));
    }
}
