//! Scenario configuration.
//!
//! Scenarios are declarative: node and gateway placement, channel plan,
//! traffic model, device class, ADR flags, environment preset, seed and
//! run limits. Files are JSON or TOML (chosen by extension) feeding the
//! same serde structures, plus a compatibility reader for the reference
//! simulator's OMNeT++ `.ini` descriptions.

use std::path::Path;

use serde::Deserialize;

use crate::energy::EnergyProfile;
use crate::error::{Result, SimulationError};
use crate::mobility::MobilityModel;
use crate::phy::{PathLossModel, PerModel};
use crate::region::{ChannelDef, ChannelPolicy, Region};
use crate::server::AdrMethod;
use crate::types::{DeviceClass, Position};

/// Mean packet interval assumed when a reference `.ini` does not specify
/// `timeToNextPacket`.
pub const DEFAULT_MEAN_INTERVAL_S: f64 = 100.0;

fn default_seed() -> u64 {
    1
}
fn default_max_time() -> f64 {
    86_400.0
}
fn default_payload() -> usize {
    20
}
fn default_rx_delay() -> f64 {
    1.0
}
fn default_network_latency() -> f64 {
    0.010
}
fn default_processing_delay() -> f64 {
    1.2
}
fn default_beacon_interval() -> f64 {
    128.0
}
fn default_ping_slot_interval() -> f64 {
    1.0
}
fn default_class_c_rx_interval() -> f64 {
    1.0
}
fn default_initial_sf() -> u8 {
    12
}
fn default_tx_power() -> f64 {
    14.0
}
fn default_preamble_symbols() -> f64 {
    8.0
}

/// Named propagation environments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    /// Log-normal model with the reference calibration.
    #[default]
    Reference,
    /// Denser clutter: higher exponent and shadowing deviation.
    Urban,
    /// Oulu measurement fit with a modest mast antenna.
    RuralLongRange,
    /// Oulu fit with a high-gain installation for multi-km cells.
    VeryLongRange,
}

impl Environment {
    pub fn path_loss_model(self) -> PathLossModel {
        match self {
            Environment::Reference => PathLossModel::default(),
            Environment::Urban => PathLossModel::LogNormal {
                pl0_db: 127.41,
                d0_m: 40.0,
                gamma: 2.7,
                sigma_db: 6.0,
            },
            Environment::RuralLongRange => PathLossModel::Oulu {
                b: 128.95,
                n: 2.32,
                d0_m: 1000.0,
                antenna_gain_db: 8.0,
            },
            Environment::VeryLongRange => PathLossModel::Oulu {
                b: 128.95,
                n: 2.0,
                d0_m: 1000.0,
                antenna_gain_db: 12.0,
            },
        }
    }
}

/// Node placement: either a generated population or explicit positions.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum NodePopulation {
    /// `count` nodes placed uniformly at random in a square of side
    /// `area_m` centered on the origin.
    Generated { count: usize, area_m: f64 },
    /// Explicit coordinates.
    Explicit { positions: Vec<Position> },
}

impl NodePopulation {
    pub fn count(&self) -> usize {
        match self {
            NodePopulation::Generated { count, .. } => *count,
            NodePopulation::Explicit { positions } => positions.len(),
        }
    }
}

/// Gateway placement and radio front-end.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub position: Position,
    #[serde(default)]
    pub antenna_gain_db: f64,
    #[serde(default)]
    pub cable_loss_db: f64,
    /// Override of the default energy-detection threshold.
    #[serde(default)]
    pub energy_detection_dbm: Option<f64>,
}

/// Uplink traffic model.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrafficModel {
    /// Poisson process: `Exp(1/mean_interval_s)` inter-arrival times.
    Random {
        mean_interval_s: f64,
        /// Mean of the first arrival draw; defaults to `mean_interval_s`.
        #[serde(default)]
        first_interval_s: Option<f64>,
    },
    /// Fixed-period traffic.
    Periodic { interval_s: f64 },
}

impl Default for TrafficModel {
    fn default() -> Self {
        TrafficModel::Random { mean_interval_s: DEFAULT_MEAN_INTERVAL_S, first_interval_s: None }
    }
}

/// ADR switches of a scenario.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct AdrConfig {
    /// Device-side backoff machinery.
    #[serde(default)]
    pub node: bool,
    /// Server-side rate assignment.
    #[serde(default)]
    pub server: bool,
    #[serde(default)]
    pub method: AdrMethod,
    #[serde(default = "default_device_margin")]
    pub device_margin_db: f64,
}

fn default_device_margin() -> f64 {
    10.0
}

impl Default for AdrConfig {
    fn default() -> Self {
        Self { node: false, server: false, method: AdrMethod::Avg, device_margin_db: 10.0 }
    }
}

/// Class-B timing knobs.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ClassBConfig {
    #[serde(default = "default_beacon_interval")]
    pub beacon_interval_s: f64,
    #[serde(default = "default_ping_slot_interval")]
    pub ping_slot_interval_s: f64,
    /// Probability a node misses any given beacon.
    #[serde(default)]
    pub beacon_loss_probability: f64,
    /// Relative clock error applied to ping-slot timing.
    #[serde(default)]
    pub clock_drift: f64,
}

impl Default for ClassBConfig {
    fn default() -> Self {
        Self {
            beacon_interval_s: default_beacon_interval(),
            ping_slot_interval_s: default_ping_slot_interval(),
            beacon_loss_probability: 0.0,
            clock_drift: 0.0,
        }
    }
}

/// Full declarative description of one run.
#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default)]
    pub region: Region,
    #[serde(default)]
    pub environment: Environment,
    /// Explicit path-loss override; wins over `environment`.
    #[serde(default)]
    pub path_loss: Option<PathLossModel>,

    pub nodes: NodePopulation,
    pub gateways: Vec<GatewayConfig>,

    /// Channel plan override; defaults to the region's plan.
    #[serde(default)]
    pub channels: Option<Vec<ChannelDef>>,
    #[serde(default)]
    pub channel_policy: ChannelPolicy,

    #[serde(default)]
    pub traffic: TrafficModel,
    #[serde(default)]
    pub device_class: DeviceClass,
    #[serde(default = "default_initial_sf")]
    pub initial_sf: u8,
    #[serde(default = "default_tx_power")]
    pub initial_tx_power_dbm: f64,
    #[serde(default = "default_payload")]
    pub payload_bytes: usize,
    #[serde(default = "default_preamble_symbols")]
    pub preamble_symbols: f64,

    #[serde(default)]
    pub adr: AdrConfig,
    #[serde(default)]
    pub per_model: PerModel,
    /// Calibrated-against-the-reference mode; selects the logistic PER
    /// model by default and flags any other choice.
    #[serde(default = "default_true")]
    pub reference_mode: bool,
    #[serde(default)]
    pub processing_gain: bool,

    #[serde(default)]
    pub mobility: MobilityModel,

    #[serde(default = "default_max_time")]
    pub max_time_s: f64,
    #[serde(default)]
    pub packets_per_node: Option<u64>,
    /// Duty-cycle override; defaults to the region's regulatory figure.
    #[serde(default)]
    pub duty_cycle: Option<f64>,

    #[serde(default = "default_rx_delay")]
    pub rx_delay_s: f64,
    #[serde(default = "default_network_latency")]
    pub network_latency_s: f64,
    #[serde(default = "default_processing_delay")]
    pub processing_delay_s: f64,
    #[serde(default)]
    pub class_b: ClassBConfig,
    #[serde(default = "default_class_c_rx_interval")]
    pub class_c_rx_interval_s: f64,

    #[serde(default)]
    pub energy: Option<EnergyProfile>,
    /// Initial battery charge per node; `None` is an unconstrained supply.
    #[serde(default)]
    pub battery_j: Option<f64>,
}

fn default_true() -> bool {
    true
}

impl Scenario {
    /// Load a scenario from disk, dispatching on the file extension:
    /// `.json`, `.toml`, or `.ini` (reference compatibility).
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| SimulationError::ScenarioRead {
            path: path.display().to_string(),
            source,
        })?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let scenario = match ext {
            "json" => Self::from_json_str(&content, path)?,
            "toml" => Self::from_toml_str(&content, path)?,
            "ini" => Self::from_ini_str(&content)?,
            other => {
                return Err(SimulationError::Config(format!(
                    "unsupported scenario extension '{other}' (expected json, toml or ini)"
                )));
            }
        };
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn from_json_str(content: &str, path: &Path) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| SimulationError::ScenarioParse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    pub fn from_toml_str(content: &str, path: &Path) -> Result<Self> {
        toml::from_str(content).map_err(|e| SimulationError::ScenarioParse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Extract a scenario from a reference `.ini` description.
    ///
    /// Only the keys the reference scenarios actually vary are read: node
    /// and gateway positions, node/gateway counts, `timeToNextPacket` and
    /// the simulated-time limit. `timeToNextPacket` falls back to the
    /// reference default of 100 s when absent.
    pub fn from_ini_str(content: &str) -> Result<Self> {
        let mut node_positions: Vec<(usize, f64, f64)> = Vec::new();
        let mut gw_positions: Vec<(usize, f64, f64)> = Vec::new();
        let mut number_of_nodes: Option<usize> = None;
        let mut mean_interval: Option<f64> = None;
        let mut max_time: Option<f64> = None;

        for raw in content.lines() {
            let line = strip_ini_comment(raw).trim();
            if line.is_empty() || line.starts_with('[') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim();

            if key == "sim-time-limit" {
                max_time = parse_time_value(value);
            } else if key.ends_with("timeToNextPacket") {
                mean_interval = parse_interval_value(value);
            } else if key.ends_with("numberOfNodes") {
                number_of_nodes = value.parse().ok();
            } else if let Some(idx) = bracket_index(key, "loRaNodes[") {
                if key.ends_with("initialX") {
                    if let Some(x) = parse_scalar_with_unit(value) {
                        upsert_coord(&mut node_positions, idx, x, true);
                    }
                } else if key.ends_with("initialY") {
                    if let Some(y) = parse_scalar_with_unit(value) {
                        upsert_coord(&mut node_positions, idx, y, false);
                    }
                }
            } else if let Some(idx) = bracket_index(key, "loRaGW[").or_else(|| bracket_index(key, "loRaGWs[")) {
                if key.ends_with("initialX") {
                    if let Some(x) = parse_scalar_with_unit(value) {
                        upsert_coord(&mut gw_positions, idx, x, true);
                    }
                } else if key.ends_with("initialY") {
                    if let Some(y) = parse_scalar_with_unit(value) {
                        upsert_coord(&mut gw_positions, idx, y, false);
                    }
                }
            }
        }

        if gw_positions.is_empty() {
            return Err(SimulationError::Config(
                "reference scenario defines no gateway positions".into(),
            ));
        }

        node_positions.sort_by_key(|(idx, _, _)| *idx);
        gw_positions.sort_by_key(|(idx, _, _)| *idx);

        let mut positions: Vec<Position> =
            node_positions.iter().map(|(_, x, y)| Position::new(*x, *y, 0.0)).collect();
        // Indexed positions may undershoot numberOfNodes; pad at the origin
        // like the reference does for unplaced nodes.
        if let Some(n) = number_of_nodes {
            while positions.len() < n {
                positions.push(Position::default());
            }
        }
        if positions.is_empty() {
            return Err(SimulationError::Config(
                "reference scenario defines no nodes".into(),
            ));
        }

        let gateways = gw_positions
            .iter()
            .map(|(_, x, y)| GatewayConfig {
                position: Position::new(*x, *y, 0.0),
                antenna_gain_db: 0.0,
                cable_loss_db: 0.0,
                energy_detection_dbm: None,
            })
            .collect();

        Ok(Scenario {
            name: None,
            seed: default_seed(),
            region: Region::Eu868,
            environment: Environment::Reference,
            path_loss: None,
            nodes: NodePopulation::Explicit { positions },
            gateways,
            channels: None,
            channel_policy: ChannelPolicy::default(),
            traffic: TrafficModel::Random {
                mean_interval_s: mean_interval.unwrap_or(DEFAULT_MEAN_INTERVAL_S),
                first_interval_s: None,
            },
            device_class: DeviceClass::A,
            initial_sf: default_initial_sf(),
            initial_tx_power_dbm: default_tx_power(),
            payload_bytes: default_payload(),
            preamble_symbols: default_preamble_symbols(),
            adr: AdrConfig::default(),
            per_model: PerModel::Logistic,
            reference_mode: true,
            processing_gain: false,
            mobility: MobilityModel::Static,
            max_time_s: max_time.unwrap_or_else(default_max_time),
            packets_per_node: None,
            duty_cycle: None,
            rx_delay_s: default_rx_delay(),
            network_latency_s: default_network_latency(),
            processing_delay_s: default_processing_delay(),
            class_b: ClassBConfig::default(),
            class_c_rx_interval_s: default_class_c_rx_interval(),
            energy: None,
            battery_j: None,
        })
    }

    /// The channel plan this scenario runs on.
    pub fn channel_plan(&self) -> Vec<ChannelDef> {
        self.channels.clone().unwrap_or_else(|| self.region.params().uplink_channels)
    }

    /// The propagation model, preferring an explicit override.
    pub fn resolved_path_loss(&self) -> PathLossModel {
        self.path_loss.clone().unwrap_or_else(|| self.environment.path_loss_model())
    }

    /// Effective duty-cycle cap, scenario override first.
    pub fn resolved_duty_cycle(&self) -> Option<f64> {
        self.duty_cycle.or(self.region.params().duty_cycle)
    }

    /// Startup validation; every rejection here is fatal.
    pub fn validate(&self) -> Result<()> {
        if self.nodes.count() == 0 {
            return Err(SimulationError::Config("scenario has no nodes".into()));
        }
        if self.gateways.is_empty() {
            return Err(SimulationError::Config("scenario has no gateways".into()));
        }
        let plan = self.channel_plan();
        if plan.is_empty() {
            return Err(SimulationError::Config("channel plan is empty".into()));
        }
        for ch in &plan {
            if ch.frequency_hz == 0 || ch.bandwidth_hz == 0 {
                return Err(SimulationError::Config(format!(
                    "invalid channel {} Hz / {} Hz in plan",
                    ch.frequency_hz, ch.bandwidth_hz
                )));
            }
        }
        if !(7..=12).contains(&self.initial_sf) {
            return Err(SimulationError::UnknownSpreadingFactor(self.initial_sf));
        }
        if let Some(duty) = self.duty_cycle {
            if !(0.0..=1.0).contains(&duty) || duty == 0.0 {
                return Err(SimulationError::Config(format!(
                    "duty cycle {duty} outside (0, 1]"
                )));
            }
        }
        if self.payload_bytes == 0 || self.payload_bytes > 242 {
            return Err(SimulationError::Config(format!(
                "payload of {} bytes outside 1..=242",
                self.payload_bytes
            )));
        }
        if self.max_time_s <= 0.0 {
            return Err(SimulationError::Config("max_time_s must be positive".into()));
        }
        match self.traffic {
            TrafficModel::Random { mean_interval_s, first_interval_s } => {
                if mean_interval_s <= 0.0 {
                    return Err(SimulationError::Config(
                        "mean_interval_s must be positive".into(),
                    ));
                }
                if let Some(first) = first_interval_s {
                    if first <= 0.0 {
                        return Err(SimulationError::Config(
                            "first_interval_s must be positive".into(),
                        ));
                    }
                }
            }
            TrafficModel::Periodic { interval_s } => {
                if interval_s <= 0.0 {
                    return Err(SimulationError::Config("interval_s must be positive".into()));
                }
            }
        }
        Ok(())
    }
}

fn strip_ini_comment(line: &str) -> &str {
    let cut = line.find('#').unwrap_or(line.len());
    let cut2 = line.find("//").unwrap_or(line.len());
    &line[..cut.min(cut2)]
}

/// Index inside `prefix[<idx>]`, if present and numeric (wildcards are
/// skipped).
fn bracket_index(key: &str, prefix: &str) -> Option<usize> {
    let start = key.find(prefix)? + prefix.len();
    let rest = &key[start..];
    let end = rest.find(']')?;
    rest[..end].parse().ok()
}

/// Parse `100m`, `12.5`, `-3m` style values.
fn parse_scalar_with_unit(value: &str) -> Option<f64> {
    let trimmed = value.trim().trim_end_matches(|c: char| c.is_alphabetic());
    trimmed.trim().parse().ok()
}

/// Parse `exponential(100s)`, `100s` or a bare number as a mean interval.
fn parse_interval_value(value: &str) -> Option<f64> {
    let inner = value
        .strip_prefix("exponential(")
        .and_then(|v| v.strip_suffix(')'))
        .unwrap_or(value);
    parse_time_value(inner)
}

/// Parse an OMNeT++ time literal: `86400s`, `1d`, `2h`, `500ms` or bare
/// seconds.
fn parse_time_value(value: &str) -> Option<f64> {
    let v = value.trim();
    if let Some(ms) = v.strip_suffix("ms") {
        return ms.trim().parse::<f64>().ok().map(|x| x / 1000.0);
    }
    if let Some(s) = v.strip_suffix('s') {
        return s.trim().parse().ok();
    }
    if let Some(h) = v.strip_suffix('h') {
        return h.trim().parse::<f64>().ok().map(|x| x * 3600.0);
    }
    if let Some(d) = v.strip_suffix('d') {
        return d.trim().parse::<f64>().ok().map(|x| x * 86_400.0);
    }
    v.parse().ok()
}

fn upsert_coord(list: &mut Vec<(usize, f64, f64)>, idx: usize, value: f64, is_x: bool) {
    if let Some(entry) = list.iter_mut().find(|(i, _, _)| *i == idx) {
        if is_x {
            entry.1 = value;
        } else {
            entry.2 = value;
        }
    } else if is_x {
        list.push((idx, value, 0.0));
    } else {
        list.push((idx, 0.0, value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_json() -> &'static str {
        r#"{
            "nodes": { "count": 4, "area_m": 1000.0 },
            "gateways": [ { "position": { "x": 0.0, "y": 0.0 } } ]
        }"#
    }

    #[test]
    fn json_scenario_fills_defaults() {
        let s = Scenario::from_json_str(minimal_json(), Path::new("mem.json")).unwrap();
        s.validate().unwrap();
        assert_eq!(s.seed, 1);
        assert_eq!(s.region, Region::Eu868);
        assert_eq!(s.initial_sf, 12);
        assert!(s.reference_mode);
        assert!((s.network_latency_s - 0.010).abs() < 1e-12);
        assert!((s.processing_delay_s - 1.2).abs() < 1e-12);
        assert_eq!(s.channel_plan().len(), 3);
        match s.traffic {
            TrafficModel::Random { mean_interval_s, .. } => {
                assert_eq!(mean_interval_s, DEFAULT_MEAN_INTERVAL_S)
            }
            _ => panic!("default traffic should be random"),
        }
    }

    #[test]
    fn toml_scenario_parses() {
        let toml_src = r#"
            seed = 9
            device_class = "C"

            [nodes]
            count = 2
            area_m = 500.0

            [[gateways]]
            position = { x = 10.0, y = 20.0 }

            [traffic]
            type = "periodic"
            interval_s = 60.0
        "#;
        let s = Scenario::from_toml_str(toml_src, Path::new("mem.toml")).unwrap();
        s.validate().unwrap();
        assert_eq!(s.seed, 9);
        assert_eq!(s.device_class, DeviceClass::C);
        assert!(matches!(s.traffic, TrafficModel::Periodic { interval_s } if interval_s == 60.0));
    }

    #[test]
    fn ini_extracts_positions_and_interval() {
        let ini = r#"
            [General]
            network = LoRaNetworkTest
            sim-time-limit = 1d
            **.numberOfNodes = 3
            **.numberOfGateways = 1
            **.loRaNodes[0].**.initialX = 100m  # east field
            **.loRaNodes[0].**.initialY = 120m
            **.loRaNodes[1].**.initialX = 250m
            **.loRaNodes[1].**.initialY = 40m
            **.loRaGW[0].**.initialX = 0m
            **.loRaGW[0].**.initialY = 0m
            **.timeToNextPacket = exponential(1000s)
        "#;
        let s = Scenario::from_ini_str(ini).unwrap();
        s.validate().unwrap();
        assert_eq!(s.nodes.count(), 3); // two placed + one padded
        match &s.nodes {
            NodePopulation::Explicit { positions } => {
                assert_eq!(positions[0], Position::new(100.0, 120.0, 0.0));
                assert_eq!(positions[1], Position::new(250.0, 40.0, 0.0));
            }
            _ => panic!("ini scenarios are explicit"),
        }
        assert_eq!(s.gateways.len(), 1);
        assert_eq!(s.max_time_s, 86_400.0);
        assert!(matches!(
            s.traffic,
            TrafficModel::Random { mean_interval_s, .. } if mean_interval_s == 1000.0
        ));
    }

    #[test]
    fn ini_defaults_interval_to_hundred_seconds() {
        let ini = r#"
            **.loRaNodes[0].**.initialX = 10m
            **.loRaNodes[0].**.initialY = 10m
            **.loRaGW[0].**.initialX = 0m
            **.loRaGW[0].**.initialY = 0m
        "#;
        let s = Scenario::from_ini_str(ini).unwrap();
        assert!(matches!(
            s.traffic,
            TrafficModel::Random { mean_interval_s, .. }
                if mean_interval_s == DEFAULT_MEAN_INTERVAL_S
        ));
    }

    #[test]
    fn validation_rejects_broken_plans() {
        let mut s = Scenario::from_json_str(minimal_json(), Path::new("mem.json")).unwrap();
        s.channels = Some(vec![]);
        assert!(matches!(s.validate(), Err(SimulationError::Config(_))));

        let mut s = Scenario::from_json_str(minimal_json(), Path::new("mem.json")).unwrap();
        s.channels = Some(vec![ChannelDef { frequency_hz: 0, bandwidth_hz: 125_000, duty_cycle_band: 0 }]);
        assert!(matches!(s.validate(), Err(SimulationError::Config(_))));

        let mut s = Scenario::from_json_str(minimal_json(), Path::new("mem.json")).unwrap();
        s.initial_sf = 5;
        assert!(matches!(
            s.validate(),
            Err(SimulationError::UnknownSpreadingFactor(5))
        ));

        let mut s = Scenario::from_json_str(minimal_json(), Path::new("mem.json")).unwrap();
        s.duty_cycle = Some(0.0);
        assert!(s.validate().is_err());

        // A non-positive first-arrival mean must be rejected here, not
        // blow up inside the arrival sampler later.
        let mut s = Scenario::from_json_str(minimal_json(), Path::new("mem.json")).unwrap();
        s.traffic = TrafficModel::Random { mean_interval_s: 100.0, first_interval_s: Some(-5.0) };
        assert!(matches!(s.validate(), Err(SimulationError::Config(_))));

        let mut s = Scenario::from_json_str(minimal_json(), Path::new("mem.json")).unwrap();
        s.traffic = TrafficModel::Random { mean_interval_s: 100.0, first_interval_s: Some(0.0) };
        assert!(matches!(s.validate(), Err(SimulationError::Config(_))));
    }

    #[test]
    fn environment_presets_resolve_to_models() {
        assert_eq!(Environment::Reference.path_loss_model(), PathLossModel::default());
        assert!(matches!(
            Environment::RuralLongRange.path_loss_model(),
            PathLossModel::Oulu { .. }
        ));
    }

    #[test]
    fn time_values_parse_all_units() {
        assert_eq!(parse_time_value("86400s"), Some(86_400.0));
        assert_eq!(parse_time_value("1d"), Some(86_400.0));
        assert_eq!(parse_time_value("2h"), Some(7_200.0));
        assert_eq!(parse_time_value("500ms"), Some(0.5));
        assert_eq!(parse_time_value("42"), Some(42.0));
    }
}
