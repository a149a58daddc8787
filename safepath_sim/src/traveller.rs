//! Ground truth traveller for simulation.
//!
//! The Traveller is the "God's eye view" of the user:
//! - True position along the planned polyline
//! - Kinematics (constant speed, optional stall point)
//! - GPS fixes generated from the truth with seeded noise

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use safepath_core::geodesy::{equatorial_degrees, haversine_distance};
use safepath_env::Coordinate;

/// A simulated person walking or riding along a route.
pub struct Traveller {
    /// Planned polyline
    route: Vec<Coordinate>,

    /// Cumulative distance at each vertex (meters)
    cumulative_m: Vec<f64>,

    /// Ground speed (m/s)
    speed_mps: f64,

    /// Distance at which the traveller stops moving, if any
    stall_at_m: Option<f64>,

    /// Distance covered so far (meters)
    travelled_m: f64,

    /// Current simulation time (seconds)
    current_time: f64,

    /// RNG for GPS noise
    gps_rng: ChaCha8Rng,

    /// Horizontal GPS error, per axis (meters)
    gps_noise: Option<Normal<f64>>,
}

impl Traveller {
    /// Creates a traveller at the start of `route`.
    ///
    /// Note: The physics seed should be derived separately from the context
    /// seed so that scripted user actions don't affect the trajectory.
    pub fn new(route: Vec<Coordinate>, speed_kmh: f64, physics_seed: u64) -> Self {
        let mut cumulative_m = Vec::with_capacity(route.len());
        let mut total = 0.0;
        for (i, point) in route.iter().enumerate() {
            if i > 0 {
                total += haversine_distance(route[i - 1], *point);
            }
            cumulative_m.push(total);
        }

        Self {
            route,
            cumulative_m,
            speed_mps: (speed_kmh / 3.6).max(0.0),
            stall_at_m: None,
            travelled_m: 0.0,
            current_time: 0.0,
            gps_rng: ChaCha8Rng::seed_from_u64(physics_seed),
            gps_noise: Normal::new(0.0, 5.0).ok(), // 5 m noise by default
        }
    }

    /// Stops the traveller after `distance_m` meters.
    pub fn stall_at(mut self, distance_m: f64) -> Self {
        self.stall_at_m = Some(distance_m.max(0.0));
        self
    }

    /// Sets the GPS noise standard deviation. Invalid values disable noise.
    pub fn with_gps_noise(mut self, std_dev_m: f64) -> Self {
        self.gps_noise = Normal::new(0.0, std_dev_m).ok();
        self
    }

    /// Total route length in meters.
    pub fn route_length(&self) -> f64 {
        self.cumulative_m.last().copied().unwrap_or(0.0)
    }

    /// Distance covered so far.
    pub fn travelled(&self) -> f64 {
        self.travelled_m
    }

    /// Current simulation time in seconds.
    pub fn time(&self) -> f64 {
        self.current_time
    }

    /// True once the traveller stands on the last vertex.
    pub fn has_arrived(&self) -> bool {
        self.travelled_m >= self.route_length()
    }

    /// Advances kinematics by dt seconds.
    pub fn step(&mut self, dt: f64) {
        self.current_time += dt;

        let limit = match self.stall_at_m {
            Some(stall) => stall.min(self.route_length()),
            None => self.route_length(),
        };
        self.travelled_m = (self.travelled_m + self.speed_mps * dt).min(limit);
    }

    /// Ground truth position, interpolated along the current segment.
    pub fn true_position(&self) -> Option<Coordinate> {
        let first = *self.route.first()?;

        // Index of the first vertex beyond the travelled distance
        let next = self
            .cumulative_m
            .iter()
            .position(|&d| d > self.travelled_m);
        let Some(next) = next.filter(|&i| i > 0) else {
            return Some(if self.travelled_m <= 0.0 {
                first
            } else {
                *self.route.last()?
            });
        };

        let from = self.route[next - 1];
        let to = self.route[next];
        let segment = self.cumulative_m[next] - self.cumulative_m[next - 1];
        let t = (self.travelled_m - self.cumulative_m[next - 1]) / segment;

        Some(Coordinate::new(
            from.latitude + (to.latitude - from.latitude) * t,
            from.longitude + (to.longitude - from.longitude) * t,
        ))
    }

    /// A GPS fix: the true position plus independent north/east noise.
    pub fn observe(&mut self) -> Option<Coordinate> {
        let truth = self.true_position()?;
        let Some(noise) = self.gps_noise else {
            return Some(truth);
        };

        let north_m = noise.sample(&mut self.gps_rng);
        let east_m = noise.sample(&mut self.gps_rng);
        let lat_scale = truth.latitude.to_radians().cos().max(1e-6);

        Some(Coordinate::new(
            truth.latitude + equatorial_degrees(north_m),
            truth.longitude + equatorial_degrees(east_m) / lat_scale,
        ))
    }
}
