use serde::{Deserialize, Serialize};

/// Coordinates beyond this are garbage left over from malformed drawings
/// (1e20 comfortably exceeds any real-world extent in meters).
const COORD_LIMIT: f64 = 1e20;

/// Layer extent as `[min_x, min_y, max_x, max_y]`.
///
/// The producer side leaves the field unconstrained (it may be absent);
/// consumers must call [`Bbox::is_geographic`] before using a box for any
/// view-fitting operation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bbox(pub [f64; 4]);

impl Bbox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self([min_x, min_y, max_x, max_y])
    }

    pub fn min_x(&self) -> f64 {
        self.0[0]
    }

    pub fn min_y(&self) -> f64 {
        self.0[1]
    }

    pub fn max_x(&self) -> f64 {
        self.0[2]
    }

    pub fn max_y(&self) -> f64 {
        self.0[3]
    }

    /// True when every coordinate is finite and within ±1e20 and the Y
    /// values lie within [-90, 90]. Invalid boxes must be rejected rather
    /// than passed to a geographic display.
    pub fn is_geographic(&self) -> bool {
        if !self.0.iter().all(|c| c.is_finite() && c.abs() <= COORD_LIMIT) {
            return false;
        }
        (-90.0..=90.0).contains(&self.min_y()) && (-90.0..=90.0).contains(&self.max_y())
    }
}
