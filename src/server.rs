//! Network server.
//!
//! Deduplicates uplinks arriving through multiple gateways, maintains
//! per-(node, gateway) SNIR history, computes ADR corrections and plans
//! downlink placement per device class. The server never touches the
//! event heap itself; it returns planning decisions and the simulator
//! turns them into events.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::Deserialize;

use crate::gateway::Gateway;
use crate::node::LinkAdrReq;
use crate::phy::required_snr_db;
use crate::types::{GatewayId, NodeId};

/// Bound on the per-(node, gateway) SNIR history.
pub const SNIR_WINDOW_LEN: usize = 20;

/// Bound on the deduplication LRU.
const DEDUP_CAPACITY: usize = 4096;

/// ADR aggregation method over the SNIR windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AdrMethod {
    /// Best gateway's windowed average.
    #[default]
    Avg,
    /// Maximum across every gateway's window.
    Max,
}

/// One gateway's report of a decoded uplink.
#[derive(Debug, Clone, Copy)]
pub struct UplinkDelivery {
    pub node: NodeId,
    pub gateway: GatewayId,
    pub fcnt: u32,
    pub frame_hash: u64,
    pub rssi_dbm: f64,
    pub snir_db: f64,
    pub spreading_factor: u8,
    pub frequency_hz: u32,
}

/// A sample in the per-gateway ADR history.
#[derive(Debug, Clone, Copy)]
struct SnirSample {
    rssi_dbm: f64,
    snir_db: f64,
}

/// Bounded LRU of recently-seen uplink events keyed
/// `(node, FCntUp, frame hash)`.
#[derive(Debug, Default)]
struct DedupCache {
    seen: HashSet<(NodeId, u32, u64)>,
    order: VecDeque<(NodeId, u32, u64)>,
}

impl DedupCache {
    /// Insert the event; returns true when it was not seen before.
    fn insert(&mut self, key: (NodeId, u32, u64)) -> bool {
        if !self.seen.insert(key) {
            return false;
        }
        self.order.push_back(key);
        if self.order.len() > DEDUP_CAPACITY {
            if let Some(old) = self.order.pop_front() {
                self.seen.remove(&old);
            }
        }
        true
    }
}

/// Planned downlink placement, produced by the server and executed by the
/// simulator.
#[derive(Debug, Clone)]
pub struct DownlinkPlan {
    pub node: NodeId,
    pub gateway: GatewayId,
    pub start_time: f64,
    pub frequency_hz: u32,
    pub spreading_factor: u8,
    pub bandwidth_hz: u32,
    pub link_adr: Option<LinkAdrReq>,
}

/// The LoRaWAN network server.
pub struct NetworkServer {
    dedup: DedupCache,
    /// SNIR windows keyed by (node, gateway); bounded to
    /// [`SNIR_WINDOW_LEN`], oldest evicted first.
    snir_windows: HashMap<(NodeId, GatewayId), VecDeque<SnirSample>>,
    pub adr_enabled: bool,
    pub adr_method: AdrMethod,
    /// Installation margin subtracted from the measured SNR, dB.
    pub device_margin_db: f64,
    /// Last SF/power the server assigned per node, to emit LinkADRReq only
    /// on change.
    last_assignment: HashMap<NodeId, (u8, f64)>,
}

impl NetworkServer {
    pub fn new(adr_enabled: bool, adr_method: AdrMethod, device_margin_db: f64) -> Self {
        Self {
            dedup: DedupCache::default(),
            snir_windows: HashMap::new(),
            adr_enabled,
            adr_method,
            device_margin_db,
            last_assignment: HashMap::new(),
        }
    }

    /// Ingest one gateway's copy of an uplink.
    ///
    /// Every copy updates that gateway's SNIR window; the return value is
    /// true only for the first copy of the event, which is the one acted
    /// upon.
    pub fn ingest(&mut self, delivery: &UplinkDelivery) -> bool {
        let window = self
            .snir_windows
            .entry((delivery.node, delivery.gateway))
            .or_default();
        if window.len() >= SNIR_WINDOW_LEN {
            window.pop_front();
        }
        window.push_back(SnirSample { rssi_dbm: delivery.rssi_dbm, snir_db: delivery.snir_db });

        self.dedup.insert((delivery.node, delivery.fcnt, delivery.frame_hash))
    }

    /// Aggregate SNR input for the ADR decision over the node's windows.
    ///
    /// `avg` averages each gateway's window and takes the best gateway;
    /// `max` takes the maximum sample across all windows. Gateways are
    /// visited in index order so the computation is reproducible.
    pub fn adr_snr_input(&self, node: NodeId, gateway_count: usize) -> Option<f64> {
        let mut best: Option<f64> = None;
        for gw in 0..gateway_count {
            let Some(window) = self.snir_windows.get(&(node, gw)) else {
                continue;
            };
            if window.is_empty() {
                continue;
            }
            let value = match self.adr_method {
                AdrMethod::Avg => {
                    window.iter().map(|s| s.snir_db).sum::<f64>() / window.len() as f64
                }
                AdrMethod::Max => window
                    .iter()
                    .map(|s| s.snir_db)
                    .fold(f64::NEG_INFINITY, f64::max),
            };
            best = Some(match best {
                Some(b) => b.max(value),
                None => value,
            });
        }
        best
    }

    /// Windowed mean RSSI at the strongest gateway, for diagnostics.
    pub fn best_gateway_rssi(&self, node: NodeId, gateway_count: usize) -> Option<f64> {
        let mut best: Option<f64> = None;
        for gw in 0..gateway_count {
            if let Some(window) = self.snir_windows.get(&(node, gw)) {
                if window.is_empty() {
                    continue;
                }
                let mean = window.iter().map(|s| s.rssi_dbm).sum::<f64>() / window.len() as f64;
                best = Some(best.map_or(mean, |b: f64| b.max(mean)));
            }
        }
        best
    }

    /// Number of samples currently held for (node, gateway). Test hook.
    pub fn window_len(&self, node: NodeId, gateway: GatewayId) -> usize {
        self.snir_windows.get(&(node, gateway)).map_or(0, |w| w.len())
    }

    /// Compute an ADR correction for a node.
    ///
    /// `margin = SNR - requiredSNR(SF) - device_margin`, `Nstep` is the
    /// margin in 3 dB steps. Positive steps first lower the spreading
    /// factor to SF7, then the power in 3 dB decrements down to `p_min`;
    /// negative steps first restore power to `p_max`, then raise the
    /// spreading factor. A request is emitted only when something changed.
    pub fn adr_decision(
        &mut self,
        node: NodeId,
        current_sf: u8,
        current_power_dbm: f64,
        channel_mask: &[bool],
        nb_trans: u8,
        gateway_count: usize,
        p_min_dbm: f64,
        p_max_dbm: f64,
    ) -> Option<LinkAdrReq> {
        if !self.adr_enabled {
            return None;
        }
        let snr = self.adr_snr_input(node, gateway_count)?;
        let margin = snr - required_snr_db(current_sf) - self.device_margin_db;
        let mut nstep = (margin / 3.0).round() as i32;

        let mut sf = current_sf;
        let mut power = current_power_dbm;

        while nstep > 0 {
            if sf > 7 {
                sf -= 1;
            } else if power - 3.0 >= p_min_dbm {
                power -= 3.0;
            } else {
                break;
            }
            nstep -= 1;
        }
        while nstep < 0 {
            if power + 3.0 <= p_max_dbm {
                power += 3.0;
            } else if sf < 12 {
                sf += 1;
            } else {
                break;
            }
            nstep += 1;
        }

        if sf == current_sf && (power - current_power_dbm).abs() < f64::EPSILON {
            return None;
        }
        if self.last_assignment.get(&node) == Some(&(sf, power)) {
            return None;
        }
        self.last_assignment.insert(node, (sf, power));
        Some(LinkAdrReq {
            spreading_factor: sf,
            tx_power_dbm: power,
            channel_mask: channel_mask.to_vec(),
            nb_trans,
        })
    }

    /// Place a class-A downlink into RX1 or RX2; first fit wins.
    ///
    /// `decision_time` already includes network latency and processing
    /// delay. `airtime_s` is the on-air duration of the downlink at the
    /// respective window's data rate. Returns `None` when both windows
    /// close before the server can reach them or the gateway transmitter
    /// is booked.
    #[allow(clippy::too_many_arguments)]
    pub fn plan_class_a_downlink(
        &self,
        node: NodeId,
        gateway: &Gateway,
        decision_time: f64,
        uplink_end: f64,
        rx_delay_s: f64,
        uplink_freq_hz: u32,
        uplink_sf: u8,
        uplink_bw_hz: u32,
        rx2_freq_hz: u32,
        rx2_sf: u8,
        rx2_bw_hz: u32,
        rx1_airtime_s: f64,
        rx2_airtime_s: f64,
        link_adr: Option<LinkAdrReq>,
    ) -> Option<DownlinkPlan> {
        let rx1 = uplink_end + rx_delay_s;
        let rx2 = uplink_end + rx_delay_s + 1.0;

        if decision_time <= rx1 && gateway.free_for(rx1, rx1_airtime_s) {
            return Some(DownlinkPlan {
                node,
                gateway: gateway.id,
                start_time: rx1,
                frequency_hz: uplink_freq_hz,
                spreading_factor: uplink_sf,
                bandwidth_hz: uplink_bw_hz,
                link_adr,
            });
        }
        if decision_time <= rx2 && gateway.free_for(rx2, rx2_airtime_s) {
            return Some(DownlinkPlan {
                node,
                gateway: gateway.id,
                start_time: rx2,
                frequency_hz: rx2_freq_hz,
                spreading_factor: rx2_sf,
                bandwidth_hz: rx2_bw_hz,
                link_adr,
            });
        }
        None
    }

    /// Place a class-B downlink on the next free ping slot.
    ///
    /// Slots tick at `ping_slot_interval` from the node's beacon reference;
    /// the chosen slot must start at or after `decision_time + airtime`
    /// headroom and the gateway must be idle at slot start.
    #[allow(clippy::too_many_arguments)]
    pub fn plan_class_b_downlink(
        &self,
        node: NodeId,
        gateway: &Gateway,
        decision_time: f64,
        airtime_s: f64,
        beacon_reference: f64,
        ping_slot_interval_s: f64,
        beacon_interval_s: f64,
        rx2_freq_hz: u32,
        rx2_sf: u8,
        rx2_bw_hz: u32,
        link_adr: Option<LinkAdrReq>,
    ) -> Option<DownlinkPlan> {
        let not_before = decision_time + airtime_s;
        let mut slot = beacon_reference;
        while slot < not_before {
            slot += ping_slot_interval_s;
        }
        // Search the remainder of the current beacon period.
        let horizon = beacon_reference + 2.0 * beacon_interval_s;
        while slot <= horizon {
            if gateway.free_for(slot, airtime_s) {
                return Some(DownlinkPlan {
                    node,
                    gateway: gateway.id,
                    start_time: slot,
                    frequency_hz: rx2_freq_hz,
                    spreading_factor: rx2_sf,
                    bandwidth_hz: rx2_bw_hz,
                    link_adr,
                });
            }
            slot += ping_slot_interval_s;
        }
        None
    }

    /// Place a class-C downlink at the earliest instant the gateway is
    /// idle for the whole transmission; the node listens continuously.
    #[allow(clippy::too_many_arguments)]
    pub fn plan_class_c_downlink(
        &self,
        node: NodeId,
        gateway: &Gateway,
        decision_time: f64,
        airtime_s: f64,
        rx2_freq_hz: u32,
        rx2_sf: u8,
        rx2_bw_hz: u32,
        link_adr: Option<LinkAdrReq>,
    ) -> DownlinkPlan {
        DownlinkPlan {
            node,
            gateway: gateway.id,
            start_time: gateway.next_free_interval(decision_time, airtime_s),
            frequency_hz: rx2_freq_hz,
            spreading_factor: rx2_sf,
            bandwidth_hz: rx2_bw_hz,
            link_adr,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Position;

    fn delivery(node: NodeId, gateway: GatewayId, fcnt: u32, snir: f64) -> UplinkDelivery {
        UplinkDelivery {
            node,
            gateway,
            fcnt,
            frame_hash: 0xfeed,
            rssi_dbm: -100.0,
            snir_db: snir,
            spreading_factor: 12,
            frequency_hz: 868_100_000,
        }
    }

    #[test]
    fn duplicate_copies_update_windows_but_fire_once() {
        let mut server = NetworkServer::new(true, AdrMethod::Avg, 10.0);
        assert!(server.ingest(&delivery(0, 0, 1, 5.0)));
        assert!(!server.ingest(&delivery(0, 1, 1, 8.0)));
        assert_eq!(server.window_len(0, 0), 1);
        assert_eq!(server.window_len(0, 1), 1);
    }

    #[test]
    fn snir_window_is_bounded_to_twenty() {
        let mut server = NetworkServer::new(true, AdrMethod::Avg, 10.0);
        for fcnt in 0..50 {
            server.ingest(&delivery(3, 0, fcnt, fcnt as f64));
        }
        assert_eq!(server.window_len(3, 0), SNIR_WINDOW_LEN);
        // Oldest samples were evicted: the average reflects the last 20.
        let expected: f64 = (30..50).map(|v| v as f64).sum::<f64>() / 20.0;
        let got = server.adr_snr_input(3, 1).unwrap();
        assert!((got - expected).abs() < 1e-9);
    }

    #[test]
    fn avg_method_takes_best_gateway_average() {
        let mut server = NetworkServer::new(true, AdrMethod::Avg, 10.0);
        for fcnt in 0..4 {
            server.ingest(&delivery(0, 0, fcnt, 0.0));
            server.ingest(&delivery(0, 1, fcnt, 6.0));
        }
        assert!((server.adr_snr_input(0, 2).unwrap() - 6.0).abs() < 1e-9);
    }

    #[test]
    fn max_method_takes_global_maximum() {
        let mut server = NetworkServer::new(true, AdrMethod::Max, 10.0);
        server.ingest(&delivery(0, 0, 0, -3.0));
        server.ingest(&delivery(0, 1, 1, 4.0));
        server.ingest(&delivery(0, 0, 2, 1.0));
        assert!((server.adr_snr_input(0, 2).unwrap() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn positive_margin_lowers_sf_then_power() {
        let mut server = NetworkServer::new(true, AdrMethod::Max, 10.0);
        // SF12 with SNR 5: margin = 5 - (-20) - 10 = 15 -> 5 steps.
        server.ingest(&delivery(0, 0, 0, 5.0));
        let req = server
            .adr_decision(0, 12, 14.0, &[], 1, 1, 2.0, 14.0)
            .expect("adr request");
        assert_eq!(req.spreading_factor, 7);
        assert_eq!(req.tx_power_dbm, 14.0);

        // A huge margin walks power down after reaching SF7.
        let mut server = NetworkServer::new(true, AdrMethod::Max, 0.0);
        server.ingest(&delivery(1, 0, 0, 10.0));
        // margin = 10 + 20 = 30 -> 10 steps: 5 to SF7, 4 more in power
        // (14 -> 2), one discarded at the floor.
        let req = server
            .adr_decision(1, 12, 14.0, &[], 1, 1, 2.0, 14.0)
            .expect("adr request");
        assert_eq!(req.spreading_factor, 7);
        assert!((req.tx_power_dbm - 2.0).abs() < 1e-9);
    }

    #[test]
    fn negative_margin_raises_power_then_sf() {
        let mut server = NetworkServer::new(true, AdrMethod::Max, 10.0);
        // SF9 with SNR -14.5: margin = -14.5 + 12.5 - 10 = -12 -> -4 steps.
        server.ingest(&delivery(0, 0, 0, -14.5));
        let req = server
            .adr_decision(0, 9, 8.0, &[], 1, 1, 2.0, 14.0)
            .expect("adr request");
        // Two steps restore power 8 -> 14, two more raise SF 9 -> 11.
        assert!((req.tx_power_dbm - 14.0).abs() < 1e-9);
        assert_eq!(req.spreading_factor, 11);
    }

    #[test]
    fn unchanged_assignment_emits_nothing() {
        let mut server = NetworkServer::new(true, AdrMethod::Max, 10.0);
        // SF7 at minimum power with a margin the steps cannot use.
        server.ingest(&delivery(0, 0, 0, 30.0));
        let first = server.adr_decision(0, 7, 2.0, &[], 1, 1, 2.0, 14.0);
        assert!(first.is_none());
    }

    #[test]
    fn class_a_prefers_rx1_and_falls_back_to_rx2() {
        let server = NetworkServer::new(false, AdrMethod::Avg, 10.0);
        let gw = Gateway::new(0, Position::default());

        // Fast server: decision lands before RX1 opens.
        let plan = server
            .plan_class_a_downlink(
                0, &gw, 100.5, 100.0, 1.0, 868_100_000, 9, 125_000, 869_525_000, 12, 125_000, 0.3,
                1.3, None,
            )
            .expect("plan");
        assert_eq!(plan.start_time, 101.0);
        assert_eq!(plan.frequency_hz, 868_100_000);

        // Slow server: RX1 already gone, RX2 still reachable.
        let plan = server
            .plan_class_a_downlink(
                0, &gw, 101.3, 100.0, 1.0, 868_100_000, 9, 125_000, 869_525_000, 12, 125_000, 0.3,
                1.3, None,
            )
            .expect("plan");
        assert_eq!(plan.start_time, 102.0);
        assert_eq!(plan.frequency_hz, 869_525_000);
        assert_eq!(plan.spreading_factor, 12);

        // Too slow for both windows.
        assert!(
            server
                .plan_class_a_downlink(
                    0, &gw, 102.5, 100.0, 1.0, 868_100_000, 9, 125_000, 869_525_000, 12, 125_000,
                    0.3, 1.3, None,
                )
                .is_none()
        );
    }

    #[test]
    fn class_b_lands_on_slot_boundaries() {
        let server = NetworkServer::new(false, AdrMethod::Avg, 10.0);
        let gw = Gateway::new(0, Position::default());
        let plan = server
            .plan_class_b_downlink(
                0, &gw, 130.4, 0.3, 128.0, 1.0, 128.0, 869_525_000, 12, 125_000, None,
            )
            .expect("plan");
        // First slot at or after 130.7 on the 1 s grid from 128.0.
        assert_eq!(plan.start_time, 131.0);
        let offset = plan.start_time - 128.0;
        assert!((offset - offset.round()).abs() < 1e-9);
    }

    #[test]
    fn class_c_waits_only_for_the_gateway() {
        let server = NetworkServer::new(false, AdrMethod::Avg, 10.0);
        let mut gw = Gateway::new(0, Position::default());
        gw.reserve_downlink(40.0, 50.0);
        let plan = server.plan_class_c_downlink(0, &gw, 42.0, 1.0, 869_525_000, 12, 125_000, None);
        assert_eq!(plan.start_time, 50.0);
    }
}
