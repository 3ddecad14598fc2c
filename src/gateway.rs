//! Gateway reception state machine.
//!
//! A gateway tracks one reception slot per concurrent transmission it can
//! hear. Slots are allocated at TX_START after the energy-detection and
//! sensitivity gates, accumulate interference from co-channel slots while
//! live, and are resolved at TX_END. A slot declared lost is held until
//! its end time regardless: the energy is still on the air and keeps
//! degrading everyone else's SNIR.

use serde::Serialize;

use crate::phy::{self, capture};
use crate::types::{GatewayId, NodeId, Packet, PacketId, Position};

/// Why a reception did not produce a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LossReason {
    /// Gateway transmitting a downlink; half-duplex radios hear nothing.
    GatewayBusy,
    /// RSSI below the energy-detection threshold.
    BelowEnergyDetection,
    /// RSSI below the (SF, BW) sensitivity threshold.
    BelowSensitivity,
    /// Defeated by a concurrent co-channel transmission.
    Captured,
    /// SNIR after interference accumulation below the demodulation floor.
    BelowSnirThreshold,
    /// Lost to the packet-error sampling despite a decodable SNIR.
    PacketError,
}

/// One tracked transmission at a gateway.
#[derive(Debug, Clone)]
pub struct ReceptionSlot {
    pub slot_id: u64,
    pub node: NodeId,
    pub packet: PacketId,
    pub frequency_hz: u32,
    pub bandwidth_hz: u32,
    pub spreading_factor: u8,
    pub start_time: f64,
    pub end_time: f64,
    pub rssi_dbm: f64,
    /// Noise floor memoized on the packet at creation.
    pub noise_dbm: f64,
    /// Start of the capture-sensitive region of this signal.
    pub cs_begin: f64,
    /// Accumulated co-channel interference in mW.
    pub interference_mw: f64,
    pub lost: Option<LossReason>,
}

/// Outcome of `start_reception`.
#[derive(Debug, Clone, Copy)]
pub enum StartReception {
    /// A slot was allocated; it may still be marked lost by capture.
    Started { slot_id: u64 },
    /// No slot allocated; the gateway never locked onto the signal.
    Rejected { reason: LossReason },
}

/// Resolved reception handed to the network server.
#[derive(Debug, Clone, Copy)]
pub struct Reception {
    pub rssi_dbm: f64,
    pub snir_db: f64,
    pub spreading_factor: u8,
    pub frequency_hz: u32,
    pub success: bool,
    pub reason: Option<LossReason>,
}

/// A LoRaWAN gateway with its antenna characteristics and live slots.
#[derive(Debug, Clone)]
pub struct Gateway {
    pub id: GatewayId,
    pub position: Position,
    pub antenna_gain_db: f64,
    pub cable_loss_db: f64,
    pub energy_detection_dbm: f64,
    /// Reserved downlink transmission intervals, sorted, non-overlapping.
    reservations: Vec<(f64, f64)>,
    slots: Vec<ReceptionSlot>,
    next_slot_id: u64,
}

impl Gateway {
    pub fn new(id: GatewayId, position: Position) -> Self {
        Self {
            id,
            position,
            antenna_gain_db: 0.0,
            cable_loss_db: 0.0,
            // Wide open by default: gateways demodulate down to the
            // sensitivity floor. Scenarios model a deaf front-end by
            // raising this (the -90 dBm carrier-sense figure lives in
            // `phy::DEFAULT_ENERGY_DETECTION_DBM`).
            energy_detection_dbm: -140.0,
            reservations: Vec::new(),
            slots: Vec::new(),
            next_slot_id: 0,
        }
    }

    /// Begin tracking an uplink arriving with the given RSSI.
    ///
    /// Gate order: half-duplex busy, energy detection, sensitivity. A
    /// transmission that passes the gates gets a slot; the capture rule is
    /// then applied symmetrically against every live slot that overlaps in
    /// time on exactly the same (frequency, bandwidth). Signals on other
    /// carriers or bandwidths neither defeat this one nor suffer from it.
    pub fn start_reception(&mut self, packet: &Packet, rssi_dbm: f64, preamble_symbols: f64) -> StartReception {
        let now = packet.start_time;
        self.prune(now);

        if self.is_transmitting(now) {
            return StartReception::Rejected { reason: LossReason::GatewayBusy };
        }
        if rssi_dbm < self.energy_detection_dbm {
            return StartReception::Rejected { reason: LossReason::BelowEnergyDetection };
        }
        if rssi_dbm < phy::sensitivity_dbm(packet.spreading_factor, packet.bandwidth_hz) {
            return StartReception::Rejected { reason: LossReason::BelowSensitivity };
        }

        let slot_id = self.next_slot_id;
        self.next_slot_id += 1;

        let mut slot = ReceptionSlot {
            slot_id,
            node: packet.node,
            packet: packet.id,
            frequency_hz: packet.frequency_hz,
            bandwidth_hz: packet.bandwidth_hz,
            spreading_factor: packet.spreading_factor,
            start_time: packet.start_time,
            end_time: packet.end_time,
            rssi_dbm,
            noise_dbm: packet.noise_dbm,
            cs_begin: capture::capture_window_begin(
                packet.start_time,
                packet.spreading_factor,
                packet.bandwidth_hz,
                preamble_symbols,
            ),
            interference_mw: 0.0,
            lost: None,
        };

        for other in &mut self.slots {
            if other.end_time <= now {
                continue;
            }
            if other.frequency_hz != slot.frequency_hz || other.bandwidth_hz != slot.bandwidth_hz {
                continue;
            }

            // Same carrier, overlapping in time: both accumulate the other's
            // power for SNIR purposes whatever the capture outcome is.
            other.interference_mw += phy::dbm_to_mw(slot.rssi_dbm);
            slot.interference_mw += phy::dbm_to_mw(other.rssi_dbm);

            let overlap_end = other.end_time.min(slot.end_time);

            // Existing signal as interferer against the new one.
            if overlap_end >= slot.cs_begin
                && !capture::survives_interference(
                    slot.rssi_dbm,
                    slot.spreading_factor,
                    other.rssi_dbm,
                    other.spreading_factor,
                )
            {
                slot.lost = Some(LossReason::Captured);
            }

            // New signal as interferer against the existing one.
            if overlap_end >= other.cs_begin
                && other.lost.is_none()
                && !capture::survives_interference(
                    other.rssi_dbm,
                    other.spreading_factor,
                    slot.rssi_dbm,
                    slot.spreading_factor,
                )
            {
                other.lost = Some(LossReason::Captured);
            }
        }

        self.slots.push(slot);
        StartReception::Started { slot_id }
    }

    /// Resolve a slot at its packet's end time.
    ///
    /// The slot stays in the table until pruned past `end_time`, so a
    /// still-running co-channel transmission keeps seeing its energy.
    pub fn end_reception(&mut self, slot_id: u64) -> Option<Reception> {
        let slot = self.slots.iter().find(|s| s.slot_id == slot_id)?;

        let snir_db = compute_snir(slot.rssi_dbm, slot.noise_dbm, slot.interference_mw);
        let threshold = phy::required_snr_db(slot.spreading_factor);

        let (success, reason) = match slot.lost {
            Some(reason) => (false, Some(reason)),
            None if snir_db < threshold => (false, Some(LossReason::BelowSnirThreshold)),
            None => (true, None),
        };

        Some(Reception {
            rssi_dbm: slot.rssi_dbm,
            snir_db,
            spreading_factor: slot.spreading_factor,
            frequency_hz: slot.frequency_hz,
            success,
            reason,
        })
    }

    /// Whether the slot saw any co-channel energy while live.
    pub fn slot_had_interference(&self, slot_id: u64) -> bool {
        self.slots
            .iter()
            .find(|s| s.slot_id == slot_id)
            .map(|s| s.interference_mw > 0.0)
            .unwrap_or(false)
    }

    /// Whether a reserved downlink transmission covers instant `t`.
    pub fn is_transmitting(&self, t: f64) -> bool {
        self.reservations.iter().any(|(s, e)| *s <= t && t < *e)
    }

    /// Whether the transmitter is free over the whole `[start, start+duration)`.
    pub fn free_for(&self, start: f64, duration: f64) -> bool {
        let end = start + duration;
        !self.reservations.iter().any(|(s, e)| *s < end && start < *e)
    }

    /// Earliest start at or after `t` where a transmission of `duration`
    /// fits between the existing reservations.
    pub fn next_free_interval(&self, t: f64, duration: f64) -> f64 {
        let mut start = t;
        for (s, e) in &self.reservations {
            if start + duration <= *s {
                break;
            }
            if start < *e {
                start = *e;
            }
        }
        start
    }

    /// Reserve the transmitter for a downlink over `[start, end)`.
    pub fn reserve_downlink(&mut self, start: f64, end: f64) {
        let at = self
            .reservations
            .iter()
            .position(|(s, _)| *s > start)
            .unwrap_or(self.reservations.len());
        self.reservations.insert(at, (start, end));
    }

    /// Drop slots whose transmission ended strictly before `now`, along
    /// with stale downlink reservations.
    pub fn prune(&mut self, now: f64) {
        self.slots.retain(|s| s.end_time >= now);
        self.reservations.retain(|(_, e)| *e >= now);
    }

    #[cfg(test)]
    pub(crate) fn live_slots(&self) -> usize {
        self.slots.len()
    }
}

/// SNIR in dB: signal power against the memoized noise floor plus the
/// accumulated same-(freq, bw) interference, combined in the linear domain.
pub fn compute_snir(rssi_dbm: f64, noise_dbm: f64, interference_mw: f64) -> f64 {
    let denominator_mw = phy::dbm_to_mw(noise_dbm) + interference_mw;
    rssi_dbm - phy::mw_to_dbm(denominator_mw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phy::{LoraModulation, airtime};
    use crate::types::Direction;

    fn packet(id: usize, node: usize, sf: u8, freq: u32, start: f64) -> Packet {
        let modulation = LoraModulation::new(sf, 125_000);
        let t_air = airtime(&modulation, 33);
        Packet {
            id,
            direction: Direction::Uplink,
            node,
            frequency_hz: freq,
            bandwidth_hz: 125_000,
            spreading_factor: sf,
            coding_rate: 1,
            payload_len: 33,
            start_time: start,
            airtime: t_air,
            end_time: start + t_air,
            tx_power_dbm: 14.0,
            noise_dbm: phy::noise_floor_dbm(125_000),
            fcnt: 0,
            frame_hash: 0,
            adr_ack_req: false,
            receptions: Vec::new(),
        }
    }

    fn started(outcome: StartReception) -> u64 {
        match outcome {
            StartReception::Started { slot_id } => slot_id,
            StartReception::Rejected { reason } => panic!("rejected: {reason:?}"),
        }
    }

    #[test]
    fn clean_reception_succeeds() {
        let mut gw = Gateway::new(0, Position::default());
        let p = packet(0, 0, 7, 868_100_000, 0.0);
        let slot = started(gw.start_reception(&p, -100.0, 8.0));
        let rx = gw.end_reception(slot).unwrap();
        assert!(rx.success);
        // No interference: SNIR is RSSI minus the noise floor.
        assert!((rx.snir_db - (-100.0 - p.noise_dbm)).abs() < 1e-9);
    }

    #[test]
    fn rejects_below_energy_detection_then_sensitivity() {
        let mut gw = Gateway::new(0, Position::default());
        let p = packet(0, 0, 7, 868_100_000, 0.0);

        // Energy detection is checked first when configured.
        gw.energy_detection_dbm = phy::DEFAULT_ENERGY_DETECTION_DBM;
        match gw.start_reception(&p, -95.0, 8.0) {
            StartReception::Rejected { reason } => {
                assert_eq!(reason, LossReason::BelowEnergyDetection)
            }
            _ => panic!("expected rejection"),
        }

        // Below SF7 sensitivity (-124) but above the ED threshold.
        gw.energy_detection_dbm = -130.0;
        match gw.start_reception(&p, -125.0, 8.0) {
            StartReception::Rejected { reason } => {
                assert_eq!(reason, LossReason::BelowSensitivity)
            }
            _ => panic!("expected rejection"),
        }
    }

    #[test]
    fn sf7_survives_sf9_interferer_within_margin() {
        let mut gw = Gateway::new(0, Position::default());
        gw.energy_detection_dbm = -120.0;
        let p1 = packet(0, 0, 7, 868_100_000, 0.0);
        let p2 = packet(1, 1, 9, 868_100_000, 0.01);

        let s1 = started(gw.start_reception(&p1, -97.0, 8.0));
        let s2 = started(gw.start_reception(&p2, -90.0, 8.0));

        // -97 - (-90) = -7 >= NON_ORTH_DELTA[SF7][SF9] = -9: still decoded.
        let rx1 = gw.end_reception(s1).unwrap();
        assert_ne!(rx1.reason, Some(LossReason::Captured));

        // The SF9 signal towers over the SF7 one and survives as well.
        let rx2 = gw.end_reception(s2).unwrap();
        assert_ne!(rx2.reason, Some(LossReason::Captured));
    }

    #[test]
    fn weaker_co_sf_signal_is_captured() {
        let mut gw = Gateway::new(0, Position::default());
        gw.energy_detection_dbm = -120.0;
        let p1 = packet(0, 0, 9, 868_100_000, 0.0);
        let p2 = packet(1, 1, 9, 868_100_000, 0.05);

        let s1 = started(gw.start_reception(&p1, -105.0, 8.0));
        let s2 = started(gw.start_reception(&p2, -95.0, 8.0));

        let rx1 = gw.end_reception(s1).unwrap();
        assert!(!rx1.success);
        assert_eq!(rx1.reason, Some(LossReason::Captured));

        let rx2 = gw.end_reception(s2).unwrap();
        assert_eq!(rx2.reason, None);
    }

    #[test]
    fn distinct_carriers_do_not_interfere() {
        let mut gw = Gateway::new(0, Position::default());
        gw.energy_detection_dbm = -120.0;
        let p1 = packet(0, 0, 7, 868_100_000, 0.0);
        let p2 = packet(1, 1, 7, 868_300_000, 0.0);

        let s1 = started(gw.start_reception(&p1, -110.0, 8.0));
        let s2 = started(gw.start_reception(&p2, -80.0, 8.0));

        let rx1 = gw.end_reception(s1).unwrap();
        let rx2 = gw.end_reception(s2).unwrap();
        assert!(rx1.success && rx2.success);
        // Zero cross-channel contribution: SNIR equals RSSI - noise.
        assert!((rx1.snir_db - (-110.0 - p1.noise_dbm)).abs() < 1e-9);
        assert!((rx2.snir_db - (-80.0 - p2.noise_dbm)).abs() < 1e-9);
    }

    #[test]
    fn interferer_ending_before_capture_window_is_ignored() {
        let mut gw = Gateway::new(0, Position::default());
        gw.energy_detection_dbm = -120.0;

        // Signal starts at t=1.0; its capture window opens at
        // 1.0 + 2*Ts(SF12) = 1.065536.
        let signal = packet(0, 0, 12, 868_100_000, 1.0);

        // Strong interferer that ends inside the first two preamble symbols
        // of the signal.
        let mut interferer = packet(1, 1, 12, 868_100_000, 0.0);
        interferer.end_time = 1.02;
        interferer.airtime = interferer.end_time - interferer.start_time;

        let si = started(gw.start_reception(&interferer, -60.0, 8.0));
        let ss = started(gw.start_reception(&signal, -110.0, 8.0));
        let _ = si;

        let rx = gw.end_reception(ss).unwrap();
        assert_ne!(rx.reason, Some(LossReason::Captured));
    }

    #[test]
    fn lost_slot_is_held_until_end_time() {
        let mut gw = Gateway::new(0, Position::default());
        gw.energy_detection_dbm = -120.0;
        let p1 = packet(0, 0, 9, 868_100_000, 0.0);
        let p2 = packet(1, 1, 9, 868_100_000, 0.01);

        let _s1 = started(gw.start_reception(&p1, -110.0, 8.0));
        let _s2 = started(gw.start_reception(&p2, -90.0, 8.0));
        assert_eq!(gw.live_slots(), 2);

        // Pruning inside the overlap keeps both, lost or not.
        gw.prune(p1.end_time.min(p2.end_time) - 1e-6);
        assert_eq!(gw.live_slots(), 2);

        gw.prune(p2.end_time + 1.0);
        assert_eq!(gw.live_slots(), 0);
    }

    #[test]
    fn busy_gateway_rejects_new_receptions() {
        let mut gw = Gateway::new(0, Position::default());
        gw.reserve_downlink(1.0, 5.0);
        let p = packet(0, 0, 7, 868_100_000, 2.0);
        match gw.start_reception(&p, -60.0, 8.0) {
            StartReception::Rejected { reason } => assert_eq!(reason, LossReason::GatewayBusy),
            _ => panic!("expected busy rejection"),
        }
    }

    #[test]
    fn reservations_drive_free_interval_search() {
        let mut gw = Gateway::new(0, Position::default());
        gw.reserve_downlink(10.0, 12.0);
        gw.reserve_downlink(13.0, 15.0);

        assert!(gw.free_for(8.0, 2.0));
        assert!(!gw.free_for(9.0, 2.0));
        assert!(gw.free_for(12.0, 1.0));
        assert!(!gw.free_for(11.9, 1.0));

        // 2-second transmission does not fit in the [12, 13) gap.
        assert_eq!(gw.next_free_interval(10.5, 2.0), 15.0);
        // A 1-second one does.
        assert_eq!(gw.next_free_interval(10.5, 1.0), 12.0);
        // Free from the start.
        assert_eq!(gw.next_free_interval(2.0, 5.0), 2.0);
    }
}
