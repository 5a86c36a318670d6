// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Hardware device support and abstraction.
use std::fmt;
use std::str::FromStr;

/// Hardware device for inference.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Device {
    /// CPU (Central Processing Unit).
    #[default]
    Cpu,
    /// CUDA for NVIDIA GPUs.
    /// The argument specifies the device index (e.g., 0 for the first GPU).
    Cuda(usize),
    /// `TensorRT` for NVIDIA GPUs.
    /// The argument specifies the device index.
    TensorRt(usize),
    /// `CoreML` (Apple Core Machine Learning).
    CoreMl,
}

impl Device {
    /// Cargo feature that enables this device's execution provider.
    #[must_use]
    pub const fn feature(&self) -> Option<&'static str> {
        match self {
            Self::Cpu => None,
            Self::Cuda(_) => Some("cuda"),
            Self::TensorRt(_) => Some("tensorrt"),
            Self::CoreMl => Some("coreml"),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda(i) => write!(f, "cuda:{i}"),
            Self::TensorRt(i) => write!(f, "tensorrt:{i}"),
            Self::CoreMl => write!(f, "coreml"),
        }
    }
}

impl FromStr for Device {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.to_lowercase();
        match s.as_str() {
            "cpu" => Ok(Self::Cpu),
            "coreml" | "mps" => Ok(Self::CoreMl),
            _ => {
                if let Some(rest) = s.strip_prefix("cuda") {
                    parse_device_index(rest).map(Self::Cuda)
                } else if let Some(rest) = s.strip_prefix("tensorrt") {
                    parse_device_index(rest).map(Self::TensorRt)
                } else {
                    Err(format!("Unknown device: {s}"))
                }
            }
        }
    }
}

/// Parse a device index suffix such as `""`, `":0"` or `":1"`.
fn parse_device_index(s: &str) -> Result<usize, String> {
    if s.is_empty() {
        return Ok(0);
    }
    s.strip_prefix(':')
        .and_then(|index_str| index_str.parse::<usize>().ok())
        .ok_or_else(|| format!("Invalid device index: {s}"))
}
