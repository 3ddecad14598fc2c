//! Regional channel plans and data-rate tables.
//!
//! Presets cover the default uplink channels, the DR to (SF, BW) mapping,
//! RX2 parameters, TX power bounds and regulatory duty-cycle figures of
//! each supported region. Scenario files may override the channel list.

use serde::{Deserialize, Serialize};

/// Supported LoRaWAN regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
pub enum Region {
    #[default]
    #[serde(rename = "EU868")]
    Eu868,
    #[serde(rename = "US915")]
    Us915,
    #[serde(rename = "AU915")]
    Au915,
    #[serde(rename = "AS923")]
    As923,
    #[serde(rename = "IN865")]
    In865,
    #[serde(rename = "KR920")]
    Kr920,
}

/// One uplink channel of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct ChannelDef {
    pub frequency_hz: u32,
    pub bandwidth_hz: u32,
    /// Regulatory sub-band the channel belongs to, for duty-cycle
    /// accounting.
    #[serde(default)]
    pub duty_cycle_band: u8,
}

/// Channel assignment policy of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChannelPolicy {
    #[default]
    RoundRobin,
    Random,
}

/// Resolved parameters of a region.
#[derive(Debug, Clone)]
pub struct RegionParams {
    pub uplink_channels: Vec<ChannelDef>,
    pub rx2_frequency_hz: u32,
    pub rx2_data_rate: u8,
    pub max_tx_power_dbm: f64,
    pub min_tx_power_dbm: f64,
    /// Regulatory duty cycle as a fraction, when the region imposes one.
    pub duty_cycle: Option<f64>,
}

impl Region {
    pub fn params(self) -> RegionParams {
        match self {
            Region::Eu868 => RegionParams {
                uplink_channels: vec![
                    ChannelDef { frequency_hz: 868_100_000, bandwidth_hz: 125_000, duty_cycle_band: 1 },
                    ChannelDef { frequency_hz: 868_300_000, bandwidth_hz: 125_000, duty_cycle_band: 1 },
                    ChannelDef { frequency_hz: 868_500_000, bandwidth_hz: 125_000, duty_cycle_band: 1 },
                ],
                rx2_frequency_hz: 869_525_000,
                rx2_data_rate: 0,
                max_tx_power_dbm: 14.0,
                min_tx_power_dbm: 2.0,
                duty_cycle: Some(0.01),
            },
            Region::Us915 => RegionParams {
                uplink_channels: (0..8u32)
                    .map(|i| ChannelDef {
                        frequency_hz: 902_300_000 + i * 200_000,
                        bandwidth_hz: 125_000,
                        duty_cycle_band: 0,
                    })
                    .collect(),
                rx2_frequency_hz: 923_300_000,
                rx2_data_rate: 8,
                max_tx_power_dbm: 20.0,
                min_tx_power_dbm: 2.0,
                duty_cycle: None,
            },
            Region::Au915 => RegionParams {
                uplink_channels: (0..8u32)
                    .map(|i| ChannelDef {
                        frequency_hz: 915_200_000 + i * 200_000,
                        bandwidth_hz: 125_000,
                        duty_cycle_band: 0,
                    })
                    .collect(),
                rx2_frequency_hz: 923_300_000,
                rx2_data_rate: 8,
                max_tx_power_dbm: 20.0,
                min_tx_power_dbm: 2.0,
                duty_cycle: None,
            },
            Region::As923 => RegionParams {
                uplink_channels: vec![
                    ChannelDef { frequency_hz: 923_200_000, bandwidth_hz: 125_000, duty_cycle_band: 1 },
                    ChannelDef { frequency_hz: 923_400_000, bandwidth_hz: 125_000, duty_cycle_band: 1 },
                ],
                rx2_frequency_hz: 923_200_000,
                rx2_data_rate: 2,
                max_tx_power_dbm: 16.0,
                min_tx_power_dbm: 2.0,
                duty_cycle: Some(0.01),
            },
            Region::In865 => RegionParams {
                uplink_channels: vec![
                    ChannelDef { frequency_hz: 865_062_500, bandwidth_hz: 125_000, duty_cycle_band: 1 },
                    ChannelDef { frequency_hz: 865_402_500, bandwidth_hz: 125_000, duty_cycle_band: 1 },
                    ChannelDef { frequency_hz: 865_985_000, bandwidth_hz: 125_000, duty_cycle_band: 1 },
                ],
                rx2_frequency_hz: 866_550_000,
                rx2_data_rate: 2,
                max_tx_power_dbm: 20.0,
                min_tx_power_dbm: 2.0,
                duty_cycle: None,
            },
            Region::Kr920 => RegionParams {
                uplink_channels: vec![
                    ChannelDef { frequency_hz: 922_100_000, bandwidth_hz: 125_000, duty_cycle_band: 1 },
                    ChannelDef { frequency_hz: 922_300_000, bandwidth_hz: 125_000, duty_cycle_band: 1 },
                    ChannelDef { frequency_hz: 922_500_000, bandwidth_hz: 125_000, duty_cycle_band: 1 },
                ],
                rx2_frequency_hz: 921_900_000,
                rx2_data_rate: 0,
                max_tx_power_dbm: 14.0,
                min_tx_power_dbm: 2.0,
                duty_cycle: Some(0.01),
            },
        }
    }

    /// Map a data-rate index to (SF, BW) for uplinks.
    pub fn dr_to_sf_bw(self, dr: u8) -> Option<(u8, u32)> {
        match self {
            Region::Eu868 | Region::As923 | Region::In865 | Region::Kr920 => match dr {
                0 => Some((12, 125_000)),
                1 => Some((11, 125_000)),
                2 => Some((10, 125_000)),
                3 => Some((9, 125_000)),
                4 => Some((8, 125_000)),
                5 => Some((7, 125_000)),
                6 => Some((7, 250_000)),
                _ => None,
            },
            Region::Us915 | Region::Au915 => match dr {
                0 => Some((10, 125_000)),
                1 => Some((9, 125_000)),
                2 => Some((8, 125_000)),
                3 => Some((7, 125_000)),
                8 => Some((12, 500_000)),
                9 => Some((11, 500_000)),
                10 => Some((10, 500_000)),
                11 => Some((9, 500_000)),
                12 => Some((8, 500_000)),
                13 => Some((7, 500_000)),
                _ => None,
            },
        }
    }

    /// Inverse of [`Region::dr_to_sf_bw`].
    pub fn sf_bw_to_dr(self, sf: u8, bw: u32) -> Option<u8> {
        (0..16).find(|dr| self.dr_to_sf_bw(*dr) == Some((sf, bw)))
    }

    /// Downlink data rate of the RX1 window for an uplink data rate.
    ///
    /// Offset zero everywhere except the fixed uplink/downlink split of the
    /// US/AU plans, where RX1 lands on the 500 kHz downlink rates.
    pub fn rx1_data_rate(self, uplink_dr: u8) -> u8 {
        match self {
            Region::Us915 | Region::Au915 => (uplink_dr + 10).min(13),
            _ => uplink_dr,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eu868_default_plan_has_three_channels() {
        let params = Region::Eu868.params();
        assert_eq!(params.uplink_channels.len(), 3);
        assert_eq!(params.uplink_channels[0].frequency_hz, 868_100_000);
        assert_eq!(params.duty_cycle, Some(0.01));
    }

    #[test]
    fn dr_mapping_roundtrips() {
        for region in [Region::Eu868, Region::Us915, Region::As923, Region::Kr920] {
            for dr in 0..14 {
                if let Some((sf, bw)) = region.dr_to_sf_bw(dr) {
                    assert_eq!(region.sf_bw_to_dr(sf, bw), Some(dr));
                }
            }
        }
    }

    #[test]
    fn eu868_rx1_keeps_uplink_dr() {
        assert_eq!(Region::Eu868.rx1_data_rate(5), 5);
        assert_eq!(Region::Us915.rx1_data_rate(0), 10);
    }

    #[test]
    fn rx2_parameters_are_region_specific() {
        assert_eq!(Region::Eu868.params().rx2_frequency_hz, 869_525_000);
        assert_eq!(Region::Eu868.params().rx2_data_rate, 0);
        assert_eq!(Region::Us915.params().rx2_data_rate, 8);
    }
}
