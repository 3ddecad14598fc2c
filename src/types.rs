//! Type definitions shared across the simulation.
//!
//! Contains the entity identifiers, packet/frame representation, scheduler
//! event kinds and the event-trace record emitted for every observable
//! outcome of a run.

use serde::{Deserialize, Serialize};

/// Index into the simulator's dense node vector.
pub type NodeId = usize;
/// Index into the simulator's dense gateway vector.
pub type GatewayId = usize;
/// Index into the simulator's packet arena.
pub type PacketId = usize;

/// LoRaWAN device class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
pub enum DeviceClass {
    #[default]
    A,
    B,
    C,
}

/// A 3D position in meters.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize, Default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Euclidean distance to another position, in meters.
    pub fn distance(&self, other: &Position) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// Direction of a frame on the radio medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Direction {
    Uplink,
    Downlink,
}

/// A LoRa frame in flight.
///
/// Airtime is computed exactly once when the frame is created; `end_time`
/// is formed by a single addition so that `end_time - start_time` matches
/// the stored airtime bit-exactly for the lifetime of the packet.
#[derive(Debug, Clone)]
pub struct Packet {
    pub id: PacketId,
    pub direction: Direction,
    /// Transmitting node (uplink) or destination node (downlink).
    pub node: NodeId,
    pub frequency_hz: u32,
    pub bandwidth_hz: u32,
    pub spreading_factor: u8,
    /// Coding rate index 1..=4, denoting 4/5..4/8.
    pub coding_rate: u32,
    /// Full frame length in bytes, MAC header and MIC included.
    pub payload_len: usize,
    pub start_time: f64,
    pub airtime: f64,
    pub end_time: f64,
    /// Effective transmit power after antenna gain and cable loss.
    pub tx_power_dbm: f64,
    /// Noise floor sampled once at frame creation and reused for every
    /// decision concerning this packet.
    pub noise_dbm: f64,
    /// Uplink frame counter at the time of transmission.
    pub fcnt: u32,
    /// Hash over the frame content, used for server-side deduplication.
    pub frame_hash: u64,
    /// ADRACKReq bit: the device is asking for any downlink.
    pub adr_ack_req: bool,
    /// Per-gateway reception bookkeeping filled in at TX_START.
    pub receptions: Vec<ReceptionRef>,
}

/// Link between an uplink packet and the gateway slot tracking it.
#[derive(Debug, Clone, Copy)]
pub struct ReceptionRef {
    pub gateway: GatewayId,
    pub slot_id: u64,
}

/// Class-A receive window selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RxWindow {
    Rx1,
    Rx2,
}

/// Scheduler event kinds.
#[derive(Debug, Clone)]
pub enum EventKind {
    TxStart { node: NodeId },
    TxEnd { node: NodeId, packet: PacketId },
    RxWindowOpen { node: NodeId, window: RxWindow },
    RxWindowClose { node: NodeId, window: RxWindow },
    Beacon,
    PingSlot { node: NodeId },
    ClassCPoll { node: NodeId },
    NodeWake { node: NodeId },
    DownlinkStart { gateway: GatewayId, node: NodeId, packet: PacketId },
    DownlinkEnd { gateway: GatewayId, node: NodeId, packet: PacketId },
}

/// One line of the per-event output stream.
///
/// Carries enough to reconstruct PDR, per-SF breakdowns, per-gateway
/// statistics, collision counts and airtime utilization offline.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TraceRecord {
    pub time: f64,
    pub kind: TraceKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<NodeId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sf: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub freq_hz: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rssi_dbm: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snir_db: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
}

/// Outcome category of a trace record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceKind {
    TxStart,
    TxEnd,
    GatewayRxStart,
    GatewayRxEnd,
    ServerUplink,
    DownlinkScheduled,
    DownlinkStart,
    DownlinkEnd,
    DownlinkMissed,
    Beacon,
    PingSlot,
    AdrCommand,
    DutyCycleDeferral,
    BatteryDepleted,
}
