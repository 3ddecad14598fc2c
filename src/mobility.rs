//! Node mobility models.
//!
//! Two models: fixed positions, and a smooth random-waypoint walk driven
//! by the mobility RNG stream. Positions are advanced lazily: the
//! simulator asks for the position at the current simulated time and the
//! model replays whole legs as needed, so no periodic update events are
//! required for stationary scenarios.

use rand::Rng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::types::Position;

/// Mobility model selection in a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize, Default)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum MobilityModel {
    #[default]
    Static,
    RandomWaypoint {
        speed_mps: f64,
        #[serde(default)]
        pause_s: f64,
    },
}

/// Per-node mobility state.
#[derive(Debug, Clone)]
pub enum MobilityState {
    Fixed,
    Waypoint {
        speed_mps: f64,
        pause_s: f64,
        /// Square world half-extent around the origin, meters.
        bound_m: f64,
        leg_start_time: f64,
        leg_start: Position,
        target: Position,
        /// Instant the current leg (travel plus pause) completes.
        leg_end_time: f64,
        /// Travel-only duration of the leg.
        travel_s: f64,
    },
}

impl MobilityState {
    pub fn fixed() -> Self {
        MobilityState::Fixed
    }

    pub fn from_model(model: MobilityModel, origin: Position, bound_m: f64) -> Self {
        match model {
            MobilityModel::Static => MobilityState::Fixed,
            MobilityModel::RandomWaypoint { speed_mps, pause_s } => MobilityState::Waypoint {
                speed_mps: speed_mps.max(0.1),
                pause_s,
                bound_m,
                leg_start_time: 0.0,
                leg_start: origin,
                target: origin,
                leg_end_time: 0.0,
                travel_s: 0.0,
            },
        }
    }

    /// Position at simulated time `t`, advancing legs as needed.
    pub fn position_at(&mut self, t: f64, home: Position, rng: &mut StdRng) -> Position {
        match self {
            MobilityState::Fixed => home,
            MobilityState::Waypoint {
                speed_mps,
                pause_s,
                bound_m,
                leg_start_time,
                leg_start,
                target,
                leg_end_time,
                travel_s,
            } => {
                // Replay completed legs up to t.
                while t >= *leg_end_time {
                    *leg_start = *target;
                    *leg_start_time = *leg_end_time;
                    let next = Position::new(
                        rng.gen_range(-*bound_m..*bound_m),
                        rng.gen_range(-*bound_m..*bound_m),
                        leg_start.z,
                    );
                    let distance = leg_start.distance(&next);
                    *travel_s = distance / *speed_mps;
                    *leg_end_time = *leg_start_time + *travel_s + *pause_s;
                    *target = next;
                }

                let elapsed = t - *leg_start_time;
                if *travel_s <= 0.0 || elapsed >= *travel_s {
                    *target
                } else {
                    let frac = elapsed / *travel_s;
                    Position::new(
                        leg_start.x + (target.x - leg_start.x) * frac,
                        leg_start.y + (target.y - leg_start.y) * frac,
                        leg_start.z,
                    )
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn static_model_never_moves() {
        let mut rng = StdRng::seed_from_u64(5);
        let home = Position::new(10.0, 20.0, 0.0);
        let mut state = MobilityState::fixed();
        assert_eq!(state.position_at(0.0, home, &mut rng), home);
        assert_eq!(state.position_at(1e6, home, &mut rng), home);
    }

    #[test]
    fn waypoint_walk_stays_in_bounds_and_moves() {
        let mut rng = StdRng::seed_from_u64(5);
        let home = Position::new(0.0, 0.0, 0.0);
        let model = MobilityModel::RandomWaypoint { speed_mps: 5.0, pause_s: 0.0 };
        let mut state = MobilityState::from_model(model, home, 500.0);

        let mut moved = false;
        let mut last = home;
        for step in 1..200 {
            let p = state.position_at(step as f64 * 10.0, home, &mut rng);
            assert!(p.x.abs() <= 500.0 && p.y.abs() <= 500.0);
            if p.distance(&last) > 0.0 {
                moved = true;
            }
            last = p;
        }
        assert!(moved);
    }

    #[test]
    fn waypoint_walk_is_reproducible_per_seed() {
        let home = Position::default();
        let model = MobilityModel::RandomWaypoint { speed_mps: 3.0, pause_s: 1.0 };

        let mut a = MobilityState::from_model(model, home, 100.0);
        let mut b = MobilityState::from_model(model, home, 100.0);
        let mut rng_a = StdRng::seed_from_u64(9);
        let mut rng_b = StdRng::seed_from_u64(9);

        for step in 1..50 {
            let t = step as f64 * 7.0;
            assert_eq!(a.position_at(t, home, &mut rng_a), b.position_at(t, home, &mut rng_b));
        }
    }
}
