//! End-device state.
//!
//! A node owns its MAC counters, ADR client state, duty-cycle accounting,
//! battery, energy counters and the bookkeeping of its last transmission.
//! All stochastic draws (arrival intervals, waypoints) happen in the
//! simulator against the dedicated RNG streams; the node itself is plain
//! deterministic state.

use std::collections::VecDeque;

use crate::crypto::SessionKeys;
use crate::energy::EnergyBreakdown;
use crate::mobility::MobilityState;
use crate::types::{DeviceClass, NodeId, Position};

/// Margin added after a deferred transmission so the radio has settled.
pub const TX_BACKPRESSURE_EPSILON_S: f64 = 1e-6;

/// Server-issued link parameters, the payload of a LinkADRReq.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkAdrReq {
    pub spreading_factor: u8,
    pub tx_power_dbm: f64,
    pub channel_mask: Vec<bool>,
    pub nb_trans: u8,
}

/// Per-band duty-cycle accountant.
///
/// Uses the regulatory waiting-time model: after a transmission of length
/// `T` on a band capped at fraction `c`, the band is silent until
/// `end + T*(1/c - 1)`. A sliding window of past emissions is kept so the
/// aggregate constraint can be verified over any observation interval.
#[derive(Debug, Clone, Default)]
pub struct DutyCycleAccountant {
    /// Cap as a fraction; `None` disables enforcement.
    pub cap: Option<f64>,
    /// `not_before[band]`: earliest permitted next TX start per band.
    not_before: Vec<f64>,
    /// Recent (band, start, airtime) records, oldest first.
    window: VecDeque<(u8, f64, f64)>,
}

/// How long emission records are retained for window verification.
const DUTY_WINDOW_RETENTION_S: f64 = 3600.0;

impl DutyCycleAccountant {
    pub fn new(cap: Option<f64>) -> Self {
        Self { cap, not_before: Vec::new(), window: VecDeque::new() }
    }

    /// Earliest instant a transmission may start on `band` at or after `t`.
    pub fn earliest_tx(&self, band: u8, t: f64) -> f64 {
        match self.not_before.get(band as usize) {
            Some(not_before) => t.max(*not_before),
            None => t,
        }
    }

    /// Record an emission and advance the band's off time.
    pub fn record_tx(&mut self, band: u8, start: f64, airtime: f64) {
        if let Some(cap) = self.cap {
            let idx = band as usize;
            if self.not_before.len() <= idx {
                self.not_before.resize(idx + 1, 0.0);
            }
            self.not_before[idx] = start + airtime + airtime * (1.0 / cap - 1.0);
        }
        self.window.push_back((band, start, airtime));
        while let Some((_, s, a)) = self.window.front() {
            if s + a < start - DUTY_WINDOW_RETENTION_S {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    /// Total airtime emitted on `band` within `[now - observation, now]`.
    pub fn airtime_in_window(&self, band: u8, observation: f64, now: f64) -> f64 {
        let from = now - observation;
        self.window
            .iter()
            .filter(|(b, _, _)| *b == band)
            .map(|(_, s, a)| {
                let begin = s.max(from);
                let end = (s + a).min(now);
                (end - begin).max(0.0)
            })
            .sum()
    }
}

/// ADR backoff client state, driven once per uplink.
#[derive(Debug, Clone)]
pub struct AdrClient {
    pub enabled: bool,
    pub ack_cnt: u32,
    pub ack_limit: u32,
    pub ack_delay: u32,
}

impl AdrClient {
    pub fn new(enabled: bool) -> Self {
        // LoRaWAN defaults: ADR_ACK_LIMIT 64, ADR_ACK_DELAY 32.
        Self { enabled, ack_cnt: 0, ack_limit: 64, ack_delay: 32 }
    }

    /// True when the next uplink must set ADRACKReq.
    pub fn needs_ack_req(&self) -> bool {
        self.enabled && self.ack_cnt >= self.ack_limit
    }

    /// True when the current uplink should also escalate (one step per
    /// `ack_delay` uplinks past the limit).
    pub fn should_escalate(&self) -> bool {
        self.enabled
            && self.ack_cnt >= self.ack_limit + self.ack_delay
            && (self.ack_cnt - self.ack_limit) % self.ack_delay == 0
    }
}

/// Class-B beaconing state.
#[derive(Debug, Clone)]
pub struct ClassBState {
    /// Time of the last beacon this node actually demodulated.
    pub beacon_reference: f64,
    /// Whether any beacon has been received yet.
    pub synchronized: bool,
    /// Relative clock error applied to ping-slot times.
    pub clock_drift: f64,
}

/// A LoRaWAN end-device.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub position: Position,
    pub class: DeviceClass,

    pub spreading_factor: u8,
    pub bandwidth_hz: u32,
    pub tx_power_dbm: f64,
    pub channel_mask: Vec<bool>,
    pub nb_trans: u8,

    pub fcnt_up: u32,
    pub fcnt_down: u32,
    pub adr: AdrClient,
    pub session: SessionKeys,

    /// Remaining battery energy; `None` models an unconstrained supply.
    pub battery_j: Option<f64>,
    pub energy: EnergyBreakdown,
    /// Simulated seconds spent outside the sleep state, for the final
    /// sleep-energy settlement.
    pub active_time_s: f64,

    pub duty: DutyCycleAccountant,
    pub mobility: MobilityState,

    pub last_tx_time: f64,
    pub last_tx_end: f64,
    pub in_flight: bool,

    /// Next Poisson arrival; the drawn sample survives backpressure.
    pub next_arrival: f64,
    pub packets_sent: u64,
    pub packets_delivered: u64,
    pub payload_bytes: usize,
    /// Round-robin cursor into the channel plan.
    pub channel_cursor: usize,

    pub class_b: Option<ClassBState>,
    /// Whether the radio is currently open for downlinks (class A windows,
    /// class B ping slots; class C outside of its own uplinks).
    pub listening: bool,
    /// A downlink aimed at this node is being demodulated right now.
    pub rx_in_progress: bool,
    /// Battery exhaustion has already been surfaced in the metrics.
    pub depleted_reported: bool,
}

impl Node {
    pub fn new(id: NodeId, position: Position, class: DeviceClass, session: SessionKeys) -> Self {
        Self {
            id,
            position,
            class,
            spreading_factor: 12,
            bandwidth_hz: 125_000,
            tx_power_dbm: 14.0,
            channel_mask: Vec::new(),
            nb_trans: 1,
            fcnt_up: 0,
            fcnt_down: 0,
            adr: AdrClient::new(false),
            session,
            battery_j: None,
            energy: EnergyBreakdown::default(),
            active_time_s: 0.0,
            duty: DutyCycleAccountant::default(),
            mobility: MobilityState::fixed(),
            last_tx_time: 0.0,
            last_tx_end: 0.0,
            in_flight: false,
            next_arrival: 0.0,
            packets_sent: 0,
            packets_delivered: 0,
            payload_bytes: 20,
            channel_cursor: 0,
            class_b: None,
            listening: matches!(class, DeviceClass::C),
            rx_in_progress: false,
            depleted_reported: false,
        }
    }

    /// Whether the node can still transmit at all.
    pub fn can_transmit(&self) -> bool {
        self.battery_j.map(|j| j > 0.0).unwrap_or(true)
    }

    /// Book `joules` of consumption and debit the battery.
    pub fn spend_energy(&mut self, state: crate::energy::RadioState, joules: f64, duration_s: f64) {
        self.energy.add(state, joules);
        if !matches!(state, crate::energy::RadioState::Sleep) {
            self.active_time_s += duration_s;
        }
        if let Some(remaining) = &mut self.battery_j {
            *remaining = (*remaining - joules).max(0.0);
        }
    }

    /// Resolve the actual start time for an arrival drawn at `arrival`.
    ///
    /// The sample itself is never discarded: backpressure only postpones
    /// the start to just past the in-flight transmission, and duty cycle
    /// may push it further. This keeps the inter-arrival distribution
    /// exponential under load.
    pub fn resolve_tx_start(&self, arrival: f64, band: u8) -> f64 {
        let mut start = arrival;
        if self.in_flight || self.last_tx_end > arrival {
            start = start.max(self.last_tx_end + TX_BACKPRESSURE_EPSILON_S);
        }
        self.duty.earliest_tx(band, start)
    }

    /// Apply a LinkADRReq delivered in a downlink.
    pub fn apply_link_adr(&mut self, req: &LinkAdrReq) {
        self.spreading_factor = req.spreading_factor;
        self.tx_power_dbm = req.tx_power_dbm;
        if !req.channel_mask.is_empty() {
            self.channel_mask = req.channel_mask.clone();
        }
        self.nb_trans = req.nb_trans.max(1);
    }

    /// MAC bookkeeping common to every uplink.
    pub fn on_uplink_sent(&mut self) {
        self.fcnt_up = self.fcnt_up.wrapping_add(1);
        if self.adr.enabled {
            self.adr.ack_cnt += 1;
        }
        self.packets_sent += 1;
    }

    /// Any downlink resets the ADR backoff.
    pub fn on_downlink_received(&mut self) {
        self.fcnt_down = self.fcnt_down.wrapping_add(1);
        self.adr.ack_cnt = 0;
    }

    /// One ADR backoff escalation step: first raise power to the regional
    /// maximum, then walk the spreading factor back up toward SF12.
    pub fn escalate_adr_backoff(&mut self, max_tx_power_dbm: f64) {
        if self.tx_power_dbm < max_tx_power_dbm {
            self.tx_power_dbm = max_tx_power_dbm;
        } else if self.spreading_factor < 12 {
            self.spreading_factor += 1;
        }
    }
}
