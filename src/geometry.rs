// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Coordinates, block ranges and sliding-window geometry.
//!
//! Volume coordinates are given as `x,y,z` on the command line while dense
//! blocks are indexed `[z, y, x]`. Window sizes and steps are expressed in
//! array axis order, so `(64, 64, 64)` means 64 voxels along every axis of
//! the dense block.

use std::fmt;
use std::str::FromStr;

use crate::error::{Result, SegmentationError};

/// Shape of a dense 3D array, in array axis order.
pub type Shape3 = [usize; 3];

/// Default U-Net input size.
pub const DEFAULT_INPUT_SIZE: Shape3 = [64, 64, 64];

/// Default stride between window origins.
pub const DEFAULT_STEP: Shape3 = [24, 24, 24];

/// Parse a comma separated triple such as `"10,20,30"`.
///
/// # Errors
///
/// Returns a message if there are not exactly three components or any
/// component fails to parse.
pub fn parse_triple<T: FromStr>(s: &str) -> std::result::Result<[T; 3], String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    if parts.len() != 3 {
        return Err(format!("expected three comma separated values, got '{s}'"));
    }

    let mut values = Vec::with_capacity(3);
    for part in parts {
        let value = part
            .parse::<T>()
            .map_err(|_| format!("invalid integer '{part}' in '{s}'"))?;
        values.push(value);
    }

    values
        .try_into()
        .map_err(|_| format!("expected three comma separated values, got '{s}'"))
}

/// A corner of a block in volume coordinates `(x, y, z)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coord3(pub [u64; 3]);

impl FromStr for Coord3 {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        parse_triple(s).map(Self)
    }
}

impl fmt::Display for Coord3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.0[0], self.0[1], self.0[2])
    }
}

/// A window size or step given on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent3(pub Shape3);

impl FromStr for Extent3 {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        parse_triple(s).map(Self)
    }
}

impl Extent3 {
    /// The extent in array axis order `[z, y, x]`.
    #[must_use]
    pub const fn zyx(self) -> Shape3 {
        [self.0[2], self.0[1], self.0[0]]
    }
}

/// Axis-aligned box `[start, end)` within a chunked volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    /// Inclusive start corner `(x, y, z)`.
    pub start: Coord3,
    /// Exclusive end corner `(x, y, z)`.
    pub end: Coord3,
}

impl BlockRange {
    /// Create a range, checking `start <= end` on every axis.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentationError::GeometryError`] if any start component
    /// exceeds the matching end component.
    pub fn new(start: Coord3, end: Coord3) -> Result<Self> {
        if start.0.iter().zip(end.0.iter()).any(|(s, e)| s > e) {
            return Err(SegmentationError::GeometryError(format!(
                "start ({start}) must not exceed end ({end})"
            )));
        }
        Ok(Self { start, end })
    }

    /// Extent along `(x, y, z)`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn size_xyz(&self) -> [usize; 3] {
        std::array::from_fn(|i| (self.end.0[i] - self.start.0[i]) as usize)
    }

    /// Shape of the dense block for this range, `[z, y, x]`.
    #[must_use]
    pub fn shape(&self) -> Shape3 {
        let [x, y, z] = self.size_xyz();
        [z, y, x]
    }

    /// Number of voxels in the range.
    #[must_use]
    pub fn len(&self) -> usize {
        self.size_xyz().iter().product()
    }

    /// Whether the range contains no voxels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for BlockRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] -> [{}]", self.start, self.end)
    }
}

/// Sliding-window geometry: the model's fixed input size and the stride
/// between window origins.
///
/// Only the central `step`-sized part of each window's prediction is kept,
/// so every axis needs an even `input_size - step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowGeometry {
    input_size: Shape3,
    step: Shape3,
}

impl Default for WindowGeometry {
    fn default() -> Self {
        Self {
            input_size: DEFAULT_INPUT_SIZE,
            step: DEFAULT_STEP,
        }
    }
}

impl WindowGeometry {
    /// Create and validate a window geometry.
    ///
    /// # Errors
    ///
    /// Returns [`SegmentationError::GeometryError`] when a step is zero,
    /// exceeds the input size, or leaves an odd `input_size - step`.
    pub fn new(input_size: Shape3, step: Shape3) -> Result<Self> {
        for axis in 0..3 {
            let (size, stride) = (input_size[axis], step[axis]);
            if stride == 0 {
                return Err(SegmentationError::GeometryError(format!(
                    "step must be positive on every axis, got {step:?}"
                )));
            }
            if stride > size {
                return Err(SegmentationError::GeometryError(format!(
                    "step {step:?} exceeds input size {input_size:?} on axis {axis}"
                )));
            }
            if (size - stride) % 2 != 0 {
                return Err(SegmentationError::GeometryError(format!(
                    "input size minus step must be even, got {size} - {stride} on axis {axis}"
                )));
            }
        }
        Ok(Self { input_size, step })
    }

    /// Model input size per axis.
    #[must_use]
    pub const fn input_size(&self) -> Shape3 {
        self.input_size
    }

    /// Stride between window origins per axis.
    #[must_use]
    pub const fn step(&self) -> Shape3 {
        self.step
    }

    /// Border discarded from each window's prediction, `(input_size - step) / 2`.
    #[must_use]
    pub fn gap(&self) -> Shape3 {
        std::array::from_fn(|i| (self.input_size[i] - self.step[i]) / 2)
    }

    /// Shape of the padded array for an unpadded block: `shape + gap + input_size`.
    #[must_use]
    pub fn padded_shape(&self, shape: Shape3) -> Shape3 {
        let gap = self.gap();
        std::array::from_fn(|i| shape[i] + gap[i] + self.input_size[i])
    }

    /// Number of windows visited along each axis of a padded array.
    ///
    /// Origins run from 0 in steps of `step`, strictly below
    /// `padded - input_size`.
    #[must_use]
    pub fn windows_per_axis(&self, padded: Shape3) -> Shape3 {
        std::array::from_fn(|i| {
            padded[i]
                .saturating_sub(self.input_size[i])
                .div_ceil(self.step[i])
        })
    }

    /// Total number of windows for a padded array.
    #[must_use]
    pub fn num_windows(&self, padded: Shape3) -> usize {
        self.windows_per_axis(padded).iter().product()
    }

    /// Window origins over a padded array; first axis outermost.
    pub fn window_origins(&self, padded: Shape3) -> impl Iterator<Item = Shape3> + use<> {
        let [n0, n1, n2] = self.windows_per_axis(padded);
        let step = self.step;
        (0..n0).flat_map(move |i| {
            (0..n1).flat_map(move |j| {
                (0..n2).map(move |k| [i * step[0], j * step[1], k * step[2]])
            })
        })
    }
}
