use std::collections::HashMap;

use ahash::RandomState;

// Geodesy constants shared with the NonLinLoc grid format for
// compatibility with grids produced by its tools.
pub const ERAD: f64 = 6378.135; // WGS-72 equatorial radius (km)
pub const FLATTENING: f64 = 1.0 / 298.26; // Earth flattening (WGS '72)
pub const C111: f64 = 10000.0 / 90.0; // kilometers per degree
pub const MAP_TRANS_SDC_DRLT: f64 = 0.99330647;

pub const DEG2RAD: f64 = std::f64::consts::PI / 180.0;
pub const RAD2DEG: f64 = 180.0 / std::f64::consts::PI;

/// Weight of the travel-time-shift constraint rows appended to the
/// double-difference system when `tt_constraint` is enabled.
pub const TT_CONSTRAINT_WEIGHT: f64 = 0.1;

/// Upper bound for the a-priori weight of synthesised (theoretical) phases.
pub const THEORETICAL_WEIGHT_CAP: f64 = 0.5;

/// Minimum number of peers required to synthesise a theoretical phase.
pub const THEORETICAL_MIN_PEERS: usize = 3;

// type def
pub type Degree = f64;
pub type Kilometer = f64;
pub type Seconds = f64;
pub type KmPerSec = f64;

/// Numeric identifier of an event inside a catalog
pub type EventId = u32;

/// A station identifier is the `net.sta.loc` prefix of a stream id,
/// without the component code.
pub type StationId = String;

/// Hash map keyed with the ahash state, for hot-path lookups where
/// iteration order does not matter.
pub type FastMap<K, V> = HashMap<K, V, RandomState>;
