//! Core simulation engine for the dotsim crowd model.
//!
//! A population of autonomous 2D dots steers toward assigned targets,
//! collides with each other and the world boundary, and passes a stochastic
//! illness scalar between dots that drift close enough to touch. The world
//! advances through a fixed-timestep [`DotWorld::step`] pipeline and exposes
//! its state to renderers and exporters through [`DotWorld::snapshot`].

use dotsim_index::{BroadPhase, DotBounds, SweepPruneIndex};
use ordered_float::OrderedFloat;
use rand::{rngs::SmallRng, Rng, RngCore, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};
use thiserror::Error;

/// 2D vector value type used for positions, velocities, and accelerations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };

    /// Construct a new vector.
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Squared Euclidean length.
    #[must_use]
    pub fn sqr_magnitude(self) -> f32 {
        self.x * self.x + self.y * self.y
    }

    /// Euclidean length.
    #[must_use]
    pub fn magnitude(self) -> f32 {
        self.sqr_magnitude().sqrt()
    }

    /// Unit vector in the same direction. The zero vector normalizes to
    /// itself rather than producing NaN components.
    #[must_use]
    pub fn normalized(self) -> Self {
        let magnitude = self.magnitude();
        if magnitude == 0.0 {
            Self::ZERO
        } else {
            self * (1.0 / magnitude)
        }
    }

    /// Returns the vector unchanged when its length is within `max_length`,
    /// otherwise rescaled to exactly `max_length` with direction preserved.
    #[must_use]
    pub fn clamp_magnitude(self, max_length: f32) -> Self {
        let sqr = self.sqr_magnitude();
        if sqr > max_length * max_length {
            self * (max_length / sqr.sqrt())
        } else {
            self
        }
    }

    /// Dot product.
    #[must_use]
    pub fn dot(self, other: Self) -> f32 {
        self.x * other.x + self.y * other.y
    }

    /// Distance to another point.
    #[must_use]
    pub fn distance(self, other: Self) -> f32 {
        (other - self).magnitude()
    }
}

impl Add for Vec2 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl AddAssign for Vec2 {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for Vec2 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl SubAssign for Vec2 {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl Mul<f32> for Vec2 {
    type Output = Self;

    fn mul(self, rhs: f32) -> Self {
        Self::new(self.x * rhs, self.y * rhs)
    }
}

impl Neg for Vec2 {
    type Output = Self;

    fn neg(self) -> Self {
        Self::new(-self.x, -self.y)
    }
}

/// Stable dot identifier assigned in creation order and never reused.
///
/// Identifiers are dense: a dot's id doubles as its index in the world's
/// dot list.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
#[serde(transparent)]
pub struct DotId(pub u32);

impl DotId {
    /// Index into the world's dot list.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// High level simulation clock (ticks processed since boot).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tick(pub u64);

impl Tick {
    /// Returns the next sequential tick.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Resets the tick counter back to zero.
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }
}

/// A point a dot steers toward.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub position: Vec2,
}

impl Target {
    /// Target at an explicit position.
    #[must_use]
    pub const fn at(position: Vec2) -> Self {
        Self { position }
    }

    /// Target at a uniformly random position inside the world square.
    #[must_use]
    pub fn random(rng: &mut dyn RngCore, extent: f32) -> Self {
        Self::at(Vec2::new(rng.gen::<f32>() * extent, rng.gen::<f32>() * extent))
    }

    /// Re-randomize the position uniformly within the inset sub-region of the
    /// world square, keeping the target reachable without touching the
    /// boundary.
    pub fn refresh(&mut self, rng: &mut dyn RngCore, extent: f32, inset: f32) {
        let span = 1.0 - 2.0 * inset;
        self.position = Vec2::new(
            (rng.gen::<f32>() * span + inset) * extent,
            (rng.gen::<f32>() * span + inset) * extent,
        );
    }
}

/// Which target a dot is currently steering toward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetRef {
    /// The dot's own private target.
    Private,
    /// The world-wide shared target.
    Shared,
    /// An entry of the fixed waypoint ring.
    Waypoint(usize),
}

/// A single simulated dot.
///
/// Kinematic parameters are fixed at creation (`max_speed` may be overridden
/// wholesale through [`DotWorld::set_speed`]). The illness scalar is private:
/// every write goes through [`Dot::set_illness`] / [`Dot::add_illness`], which
/// clamp into `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dot {
    pub id: DotId,
    pub position: Vec2,
    pub velocity: Vec2,
    pub radius: f32,
    pub max_speed: f32,
    pub steer_strength: f32,
    pub ill_radius: f32,
    illness: f32,
    pub target: TargetRef,
    pub private_target: Target,
    pub waypoint_cursor: usize,
    pub subset: [usize; 2],
    pub subset_step: usize,
    #[serde(skip)]
    pub trail: VecDeque<Vec2>,
}

impl Dot {
    /// Sample a freshly randomized dot matching the configured spawn ranges.
    #[must_use]
    pub fn spawn(id: DotId, config: &DotConfig, rng: &mut dyn RngCore) -> Self {
        let extent = config.world_extent;
        let mut dot = Self {
            id,
            position: Vec2::new(rng.gen::<f32>() * extent, rng.gen::<f32>() * extent),
            velocity: Vec2::new(
                (rng.gen::<f32>() - 0.5) * 0.5,
                (rng.gen::<f32>() - 0.5) * 0.5,
            ),
            radius: config.radius,
            max_speed: rng.gen::<f32>() * config.max_speed,
            steer_strength: rng
                .gen_range(config.steer_strength_min..config.steer_strength_max),
            ill_radius: config.ill_radius,
            illness: 0.0,
            target: TargetRef::Private,
            private_target: Target::random(rng, extent),
            waypoint_cursor: 0,
            subset: [0, 0],
            subset_step: 0,
            trail: VecDeque::new(),
        };
        // Starting illness is quantized to hundredths.
        dot.set_illness((rng.gen::<f32>() * 100.0).round() / 100.0);
        dot
    }

    /// Current illness in `[0, 1]`.
    #[must_use]
    pub fn illness(&self) -> f32 {
        self.illness
    }

    /// Overwrite illness, clamping into `[0, 1]`.
    pub fn set_illness(&mut self, value: f32) {
        self.illness = value.clamp(0.0, 1.0);
    }

    /// Adjust illness by a signed delta, clamping into `[0, 1]`.
    pub fn add_illness(&mut self, delta: f32) {
        self.set_illness(self.illness + delta);
    }
}

/// Target-reassignment policy applied when a dot arrives at its target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    /// No steering at all; dots drift and collide.
    #[default]
    Idle,
    /// Each arrival re-randomizes the dot's private target.
    PerAgentRandom,
    /// All dots chase one shared target; each arrival moves it for everyone.
    SharedTarget,
    /// Each arrival picks a uniformly random waypoint from the ring.
    RandomWaypoint,
    /// Each arrival advances to the next waypoint around the ring.
    SequentialWaypoint,
    /// Each dot alternates between its two subset waypoints; subsets re-roll
    /// on a fixed tick interval.
    SequentialSubsetWaypoint,
}

impl Mode {
    /// Number of variants; mode indices are always taken modulo this.
    pub const COUNT: usize = 6;

    /// Map any index onto a valid mode. Out-of-range values wrap around, so
    /// an invalid mode is impossible by construction.
    #[must_use]
    pub fn from_index(value: usize) -> Self {
        match value % Self::COUNT {
            0 => Self::Idle,
            1 => Self::PerAgentRandom,
            2 => Self::SharedTarget,
            3 => Self::RandomWaypoint,
            4 => Self::SequentialWaypoint,
            _ => Self::SequentialSubsetWaypoint,
        }
    }
}

/// Errors raised while constructing a world.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorldError {
    /// Indicates configuration values that cannot be used.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Simulation configuration. All tunables live here so a run is fully
/// described by one value plus the RNG seed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DotConfig {
    /// Number of dots spawned at construction.
    pub dot_count: usize,
    /// Fixed timestep in seconds.
    pub dt: f32,
    /// Initial target-assignment mode index (taken modulo the mode count).
    pub mode: usize,
    /// Upper bound of the uniform per-dot max-speed draw.
    pub max_speed: f32,
    /// Number of waypoint ring entries.
    pub waypoint_count: usize,
    /// Side length of the square world.
    pub world_extent: f32,
    /// Collision radius of every dot.
    pub radius: f32,
    /// Contagion radius of every dot.
    pub ill_radius: f32,
    /// Arrival threshold: a dot arrives when edge-to-target distance drops
    /// below this.
    pub accuracy: f32,
    /// Lower bound of the uniform steer-strength draw.
    pub steer_strength_min: f32,
    /// Upper bound of the uniform steer-strength draw.
    pub steer_strength_max: f32,
    /// Illness transfer coefficient per contact evaluation.
    pub contagion_rate: f32,
    /// Illness lost by every dot each tick.
    pub illness_decay: f32,
    /// Interval (ticks) between waypoint-subset re-rolls.
    pub subset_refresh_interval: u32,
    /// Whether wall containment inverts the velocity component it clamps.
    pub wall_bounce: bool,
    /// Fractional inset applied when re-randomizing targets.
    pub target_inset: f32,
    /// Trail samples retained per dot for renderers. 0 disables trails.
    pub trail_capacity: usize,
    /// Maximum number of recent tick summaries retained in-memory.
    pub history_capacity: usize,
    /// Optional RNG seed for reproducible runs.
    pub rng_seed: Option<u64>,
}

impl Default for DotConfig {
    fn default() -> Self {
        Self {
            dot_count: 10,
            dt: 1.0 / 60.0,
            mode: 0,
            max_speed: 0.5,
            waypoint_count: 7,
            world_extent: 1.0,
            radius: 0.02,
            ill_radius: 0.04,
            accuracy: 0.025,
            steer_strength_min: 2.0,
            steer_strength_max: 4.0,
            contagion_rate: 0.01,
            illness_decay: 0.001,
            subset_refresh_interval: 600,
            wall_bounce: true,
            target_inset: 0.1,
            trail_capacity: 0,
            history_capacity: 256,
            rng_seed: None,
        }
    }
}

impl DotConfig {
    /// Validates the configuration before any tick runs.
    fn validate(&self) -> Result<(), WorldError> {
        if !(self.dt.is_finite() && self.dt > 0.0) {
            return Err(WorldError::InvalidConfig("dt must be positive"));
        }
        if !(self.world_extent.is_finite() && self.world_extent > 0.0) {
            return Err(WorldError::InvalidConfig("world_extent must be positive"));
        }
        if !(self.radius.is_finite() && self.radius > 0.0) {
            return Err(WorldError::InvalidConfig("radius must be positive"));
        }
        if self.radius * 2.0 > self.world_extent {
            return Err(WorldError::InvalidConfig(
                "dot diameter must fit inside the world",
            ));
        }
        if !(self.ill_radius.is_finite() && self.ill_radius > 0.0) {
            return Err(WorldError::InvalidConfig("ill_radius must be positive"));
        }
        if !(self.accuracy.is_finite() && self.accuracy > 0.0) {
            return Err(WorldError::InvalidConfig("accuracy must be positive"));
        }
        if !(self.max_speed.is_finite() && self.max_speed >= 0.0) {
            return Err(WorldError::InvalidConfig("max_speed must be non-negative"));
        }
        if !(self.steer_strength_min > 0.0
            && self.steer_strength_max > self.steer_strength_min)
        {
            return Err(WorldError::InvalidConfig(
                "steer_strength bounds must be positive and ordered",
            ));
        }
        if !(0.0..=1.0).contains(&self.contagion_rate) {
            return Err(WorldError::InvalidConfig(
                "contagion_rate must be in [0, 1]",
            ));
        }
        if !(self.illness_decay.is_finite() && self.illness_decay >= 0.0) {
            return Err(WorldError::InvalidConfig(
                "illness_decay must be non-negative",
            ));
        }
        if self.subset_refresh_interval == 0 {
            return Err(WorldError::InvalidConfig(
                "subset_refresh_interval must be non-zero",
            ));
        }
        if !(0.0..0.5).contains(&self.target_inset) {
            return Err(WorldError::InvalidConfig(
                "target_inset must be in [0, 0.5)",
            ));
        }
        if self.history_capacity == 0 {
            return Err(WorldError::InvalidConfig(
                "history_capacity must be non-zero",
            ));
        }
        Ok(())
    }

    /// Returns the configured RNG, seeding from entropy if no seed is set.
    fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => {
                let seed: u64 = rand::random();
                SmallRng::seed_from_u64(seed)
            }
        }
    }
}

/// Events emitted after processing a world tick.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TickEvents {
    pub tick: Tick,
    pub subsets_rerolled: bool,
    pub contact_candidates: usize,
}

/// Per-tick aggregate retained in the in-memory history ring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickSummary {
    pub tick: Tick,
    pub dot_count: usize,
    pub average_illness: f32,
    pub max_illness: f32,
    pub contact_candidates: usize,
}

/// Public per-dot state exported each tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointSnapshot {
    pub id: DotId,
    pub radius: f32,
    pub x: f32,
    pub y: f32,
    pub illness: f32,
}

/// Mode-dependent target visualization data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetView {
    /// Nothing to draw (idle or per-dot private targets).
    None,
    /// The single shared target.
    Shared(Vec2),
    /// The full waypoint ring.
    Ring(Vec<Vec2>),
}

/// Ordered snapshot of the whole population plus target visualization data.
///
/// The `{count, points}` shape is the compatibility boundary consumed by
/// renderers and exporters; keep field names stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub count: usize,
    pub points: Vec<PointSnapshot>,
    pub targets: TargetView,
}

/// Narrow-phase circle-circle resolution for the ordered pair `(a, b)`.
///
/// Only `a` moves: it is pushed out along the contact normal and receives a
/// velocity correction scaled by both participants' steer strength standing
/// in for inverse mass. Coincident centers have no defined normal and are
/// skipped. Not momentum-conserving; iteration order shapes the exact
/// resting configuration.
fn resolve_collision(dots: &mut [Dot], a: usize, b: usize) {
    let other_position = dots[b].position;
    let other_velocity = dots[b].velocity;
    let other_radius = dots[b].radius;
    let other_steer = dots[b].steer_strength;

    let dot = &mut dots[a];
    let delta = other_position - dot.position;
    let dist = delta.magnitude();
    if dist >= dot.radius + other_radius || dist == 0.0 {
        return;
    }
    let normal = delta * (1.0 / dist);
    let midpoint = (dot.position + other_position) * 0.5;
    dot.position = midpoint - normal * dot.radius;

    let relative = (dot.velocity - other_velocity).dot(normal);
    let impulse = 2.0 * relative / (dot.steer_strength + other_steer);
    dot.velocity -= normal * (impulse * dot.steer_strength * 0.5);
}

/// Contagion evaluation for the ordered pair `(a, b)`: when the dots sit
/// within contact range and `b` carries illness, `a` picks up a jittered
/// share of their combined illness.
fn spread_illness(dots: &mut [Dot], a: usize, b: usize, rate: f32, rng: &mut dyn RngCore) {
    let other_position = dots[b].position;
    let other_ill_radius = dots[b].ill_radius;
    let other_illness = dots[b].illness();

    let dot = &mut dots[a];
    if dot.position.distance(other_position) >= dot.ill_radius + other_ill_radius {
        return;
    }
    if other_illness <= 0.0 {
        return;
    }
    let jitter: f32 = rng.gen();
    dot.add_illness((dot.illness() + other_illness) * rate * jitter);
}

/// Draw a two-of-N waypoint subset. Entries are distinct whenever the ring
/// has at least two waypoints.
fn sample_subset(rng: &mut dyn RngCore, ring_len: usize) -> [usize; 2] {
    if ring_len < 2 {
        return [0, 0];
    }
    let first = rng.gen_range(0..ring_len);
    let mut second = rng.gen_range(0..ring_len - 1);
    if second >= first {
        second += 1;
    }
    [first, second]
}

/// Aggregate world state owning the full population and all targets.
///
/// Single-threaded, synchronous, fixed-timestep: within one tick dots are
/// updated sequentially in id order, and later dots read the already-mutated
/// state of earlier dots. That ordering is part of the contract: the
/// contagion accumulation is order-dependent, so reordering changes results.
pub struct DotWorld {
    config: DotConfig,
    mode: Mode,
    tick: Tick,
    rng: SmallRng,
    dots: Vec<Dot>,
    waypoints: Vec<Target>,
    shared_target: Target,
    index: SweepPruneIndex,
    bounds_scratch: Vec<DotBounds>,
    pair_scratch: Vec<usize>,
    history: VecDeque<TickSummary>,
}

impl fmt::Debug for DotWorld {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DotWorld")
            .field("config", &self.config)
            .field("mode", &self.mode)
            .field("tick", &self.tick)
            .field("dot_count", &self.dots.len())
            .finish()
    }
}

impl DotWorld {
    /// Instantiate a new world using the supplied configuration.
    ///
    /// Fails fast on invalid configuration; after this, `step()` never
    /// returns an error.
    pub fn new(config: DotConfig) -> Result<Self, WorldError> {
        config.validate()?;
        let mut rng = config.seeded_rng();
        let mode = Mode::from_index(config.mode);

        let waypoints = Self::waypoint_ring(config.waypoint_count, config.world_extent);
        let shared_target = Target::random(&mut rng, config.world_extent);

        let mut dots = Vec::with_capacity(config.dot_count);
        for id in 0..config.dot_count {
            let mut dot = Dot::spawn(DotId(id as u32), &config, &mut rng);
            dot.subset = sample_subset(&mut rng, waypoints.len());
            dot.target = Self::initial_target(mode, &dot, &waypoints, &mut rng);
            if let TargetRef::Waypoint(pick) = dot.target {
                dot.waypoint_cursor = pick;
            }
            dots.push(dot);
        }

        let history_capacity = config.history_capacity;
        Ok(Self {
            config,
            mode,
            tick: Tick::zero(),
            rng,
            dots,
            waypoints,
            shared_target,
            index: SweepPruneIndex::new(),
            bounds_scratch: Vec::new(),
            pair_scratch: Vec::new(),
            history: VecDeque::with_capacity(history_capacity),
        })
    }

    /// Waypoint positions evenly spaced on the circle inscribed in the world
    /// square, computed once at init.
    fn waypoint_ring(count: usize, extent: f32) -> Vec<Target> {
        let center = Vec2::new(extent * 0.5, extent * 0.5);
        let ring_radius = extent * 0.5;
        (0..count)
            .map(|slot| {
                let angle = std::f32::consts::TAU * slot as f32 / count as f32;
                Target::at(center + Vec2::new(angle.cos(), angle.sin()) * ring_radius)
            })
            .collect()
    }

    /// First target a dot chases. Waypoint modes enter the ring immediately;
    /// the remaining modes start on the dot's private target and hand over
    /// on first arrival.
    fn initial_target(
        mode: Mode,
        dot: &Dot,
        waypoints: &[Target],
        rng: &mut dyn RngCore,
    ) -> TargetRef {
        if waypoints.is_empty() {
            return TargetRef::Private;
        }
        match mode {
            Mode::Idle | Mode::PerAgentRandom | Mode::SharedTarget => TargetRef::Private,
            Mode::RandomWaypoint => TargetRef::Waypoint(rng.gen_range(0..waypoints.len())),
            Mode::SequentialWaypoint => TargetRef::Waypoint(0),
            Mode::SequentialSubsetWaypoint => TargetRef::Waypoint(dot.subset[0]),
        }
    }

    fn target_position(&self, idx: usize) -> Vec2 {
        let dot = &self.dots[idx];
        match dot.target {
            TargetRef::Private => dot.private_target.position,
            TargetRef::Shared => self.shared_target.position,
            TargetRef::Waypoint(slot) => self
                .waypoints
                .get(slot)
                .map_or(dot.private_target.position, |t| t.position),
        }
    }

    /// Apply the active mode's reassignment policy to a dot that arrived at
    /// its target. Mode switches only change what happens here, never the
    /// target a dot is already holding.
    fn reassign_target(&mut self, idx: usize) {
        let extent = self.config.world_extent;
        let inset = self.config.target_inset;
        match self.mode {
            Mode::Idle => {}
            Mode::PerAgentRandom => {
                self.dots[idx]
                    .private_target
                    .refresh(&mut self.rng, extent, inset);
                self.dots[idx].target = TargetRef::Private;
            }
            Mode::SharedTarget => {
                self.dots[idx].target = TargetRef::Shared;
                self.shared_target.refresh(&mut self.rng, extent, inset);
            }
            Mode::RandomWaypoint => {
                if self.waypoints.is_empty() {
                    return;
                }
                let pick = self.rng.gen_range(0..self.waypoints.len());
                let dot = &mut self.dots[idx];
                dot.waypoint_cursor = pick;
                dot.target = TargetRef::Waypoint(pick);
            }
            Mode::SequentialWaypoint => {
                if self.waypoints.is_empty() {
                    return;
                }
                let ring_len = self.waypoints.len();
                let dot = &mut self.dots[idx];
                let current = match dot.target {
                    TargetRef::Waypoint(slot) => slot,
                    _ => dot.waypoint_cursor,
                };
                let next = (current + 1) % ring_len;
                dot.waypoint_cursor = next;
                dot.target = TargetRef::Waypoint(next);
            }
            Mode::SequentialSubsetWaypoint => {
                if self.waypoints.is_empty() {
                    return;
                }
                let ring_len = self.waypoints.len();
                let dot = &mut self.dots[idx];
                dot.subset_step = (dot.subset_step + 1) % 2;
                let pick = dot.subset[dot.subset_step].min(ring_len - 1);
                dot.waypoint_cursor = pick;
                dot.target = TargetRef::Waypoint(pick);
            }
        }
    }

    /// Re-roll every dot's two-waypoint subset on the configured interval.
    fn stage_subset_refresh(&mut self, next_tick: Tick) -> bool {
        if self.mode != Mode::SequentialSubsetWaypoint {
            return false;
        }
        if !next_tick
            .0
            .is_multiple_of(self.config.subset_refresh_interval as u64)
        {
            return false;
        }
        let ring_len = self.waypoints.len();
        for dot in &mut self.dots {
            dot.subset = sample_subset(&mut self.rng, ring_len);
        }
        true
    }

    /// Arrival evaluation, reassignment, and proportional pursuit steering,
    /// per dot in id order. Skipped entirely while idle.
    fn stage_steering(&mut self) {
        if self.mode == Mode::Idle {
            return;
        }
        let dt = self.config.dt;
        let accuracy = self.config.accuracy;
        for idx in 0..self.dots.len() {
            let distance = {
                let dot = &self.dots[idx];
                dot.position.distance(self.target_position(idx)) - dot.radius
            };
            if distance < accuracy {
                self.reassign_target(idx);
            }

            let target_position = self.target_position(idx);
            let dot = &mut self.dots[idx];
            let desired_direction = (target_position - dot.position).normalized();
            let desired_velocity = desired_direction * dot.max_speed;
            let steer = (desired_velocity - dot.velocity) * dot.steer_strength;
            let acceleration = steer.clamp_magnitude(dot.steer_strength);
            dot.velocity += acceleration * dt;
        }
    }

    fn stage_illness_decay(&mut self) {
        let decay = self.config.illness_decay;
        for dot in &mut self.dots {
            dot.add_illness(-decay);
        }
    }

    fn stage_integration(&mut self) {
        let dt = self.config.dt;
        let trail_capacity = self.config.trail_capacity;
        for dot in &mut self.dots {
            dot.position += dot.velocity * dt;
            if trail_capacity > 0 {
                dot.trail.push_back(dot.position);
                while dot.trail.len() > trail_capacity {
                    dot.trail.pop_front();
                }
            }
        }
    }

    /// Elastic-reflection boundary: clamp the offending axis to keep the dot
    /// inside the world and, unless disabled, invert that axis's velocity.
    fn stage_walls(&mut self) {
        let extent = self.config.world_extent;
        let bounce = self.config.wall_bounce;
        for dot in &mut self.dots {
            if dot.position.x - dot.radius < 0.0 {
                dot.position.x = dot.radius;
                if bounce {
                    dot.velocity.x = -dot.velocity.x;
                }
            }
            if dot.position.y - dot.radius < 0.0 {
                dot.position.y = dot.radius;
                if bounce {
                    dot.velocity.y = -dot.velocity.y;
                }
            }
            if dot.position.x + dot.radius > extent {
                dot.position.x = extent - dot.radius;
                if bounce {
                    dot.velocity.x = -dot.velocity.x;
                }
            }
            if dot.position.y + dot.radius > extent {
                dot.position.y = extent - dot.radius;
                if bounce {
                    dot.velocity.y = -dot.velocity.y;
                }
            }
        }
    }

    /// Broad-phase rebuild over post-movement positions, then collision
    /// resolution and contagion over every ordered candidate pair.
    ///
    /// Bounds use the larger of the two interaction radii so the candidate
    /// set stays a conservative superset for both consumers. The pair loop
    /// runs candidates in ascending id order, inner loop likewise; contagion
    /// accumulation is order-dependent, so this traversal must not change.
    fn stage_contacts(&mut self) -> usize {
        if self.dots.len() < 2 {
            return 0;
        }
        self.bounds_scratch.clear();
        self.bounds_scratch.extend(self.dots.iter().map(|dot| {
            DotBounds::around(
                dot.position.x,
                dot.position.y,
                dot.radius.max(dot.ill_radius),
            )
        }));
        if self.index.rebuild(&self.bounds_scratch).is_err() {
            return 0;
        }
        self.pair_scratch.clear();
        self.pair_scratch.extend_from_slice(self.index.candidates());

        let rate = self.config.contagion_rate;
        for &a in &self.pair_scratch {
            for &b in &self.pair_scratch {
                if a == b {
                    continue;
                }
                resolve_collision(&mut self.dots, a, b);
                spread_illness(&mut self.dots, a, b, rate, &mut self.rng);
            }
        }
        self.pair_scratch.len()
    }

    fn stage_summary(&mut self, next_tick: Tick, contact_candidates: usize) {
        let dot_count = self.dots.len();
        let total_illness: f32 = self.dots.iter().map(|dot| dot.illness()).sum();
        let average_illness = if dot_count > 0 {
            total_illness / dot_count as f32
        } else {
            0.0
        };
        let max_illness = self
            .dots
            .iter()
            .map(|dot| OrderedFloat(dot.illness()))
            .max()
            .map_or(0.0, OrderedFloat::into_inner);

        if self.history.len() >= self.config.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(TickSummary {
            tick: next_tick,
            dot_count,
            average_illness,
            max_illness,
            contact_candidates,
        });
    }

    /// Execute one fixed-timestep tick pipeline, returning emitted events.
    ///
    /// Always runs to completion; no externally visible partial state exists
    /// during execution.
    pub fn step(&mut self) -> TickEvents {
        let next_tick = self.tick.next();
        let subsets_rerolled = self.stage_subset_refresh(next_tick);
        self.stage_steering();
        self.stage_illness_decay();
        self.stage_integration();
        self.stage_walls();
        let contact_candidates = self.stage_contacts();
        self.stage_summary(next_tick, contact_candidates);
        self.tick = next_tick;
        TickEvents {
            tick: self.tick,
            subsets_rerolled,
            contact_candidates,
        }
    }

    /// Ordered snapshot of public per-dot state plus target visualization
    /// data for the active mode.
    #[must_use]
    pub fn snapshot(&self) -> WorldSnapshot {
        let points: Vec<PointSnapshot> = self
            .dots
            .par_iter()
            .map(|dot| PointSnapshot {
                id: dot.id,
                radius: dot.radius,
                x: dot.position.x,
                y: dot.position.y,
                illness: dot.illness(),
            })
            .collect();
        let targets = match self.mode {
            Mode::Idle | Mode::PerAgentRandom => TargetView::None,
            Mode::SharedTarget => TargetView::Shared(self.shared_target.position),
            Mode::RandomWaypoint
            | Mode::SequentialWaypoint
            | Mode::SequentialSubsetWaypoint => {
                TargetView::Ring(self.waypoints.iter().map(|t| t.position).collect())
            }
        };
        WorldSnapshot {
            count: points.len(),
            points,
            targets,
        }
    }

    /// Set the active mode from any index; values wrap modulo the mode
    /// count. Only future reassignments are affected.
    pub fn set_mode(&mut self, value: usize) {
        self.mode = Mode::from_index(value);
    }

    /// Override every dot's max speed.
    pub fn set_speed(&mut self, value: f32) {
        for dot in &mut self.dots {
            dot.max_speed = value;
        }
    }

    /// Re-randomize every waypoint ring entry within the inset sub-region.
    pub fn refresh_targets(&mut self) {
        let extent = self.config.world_extent;
        let inset = self.config.target_inset;
        for target in &mut self.waypoints {
            target.refresh(&mut self.rng, extent, inset);
        }
    }

    /// Returns an immutable reference to configuration.
    #[must_use]
    pub fn config(&self) -> &DotConfig {
        &self.config
    }

    /// Currently active mode.
    #[must_use]
    pub const fn mode(&self) -> Mode {
        self.mode
    }

    /// Current simulation tick.
    #[must_use]
    pub const fn tick(&self) -> Tick {
        self.tick
    }

    /// Number of live dots.
    #[must_use]
    pub fn dot_count(&self) -> usize {
        self.dots.len()
    }

    /// Read-only access to the population, ordered by id.
    #[must_use]
    pub fn dots(&self) -> &[Dot] {
        &self.dots
    }

    /// Mutable access to the population (for scenario setup and drivers).
    #[must_use]
    pub fn dots_mut(&mut self) -> &mut [Dot] {
        &mut self.dots
    }

    /// The fixed waypoint ring.
    #[must_use]
    pub fn waypoints(&self) -> &[Target] {
        &self.waypoints
    }

    /// The shared target chased in shared-target mode.
    #[must_use]
    pub const fn shared_target(&self) -> &Target {
        &self.shared_target
    }

    /// Iterate over retained tick summaries.
    pub fn history(&self) -> impl Iterator<Item = &TickSummary> {
        self.history.iter()
    }

    /// Borrow the world RNG mutably for deterministic sampling.
    #[must_use]
    pub fn rng(&mut self) -> &mut SmallRng {
        &mut self.rng
    }
}
