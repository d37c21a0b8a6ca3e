use std::{fmt, str::FromStr};

use bytemuck::Pod;

use crate::error::EngineErr;

/// The element types a shared weight region can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DType {
    Float64,
    Int32,
}

impl DType {
    /// Returns the size in bytes of a single element.
    pub fn size(self) -> usize {
        match self {
            DType::Float64 => size_of::<f64>(),
            DType::Int32 => size_of::<i32>(),
        }
    }

    /// Returns the canonical name of this type.
    pub fn name(self) -> &'static str {
        match self {
            DType::Float64 => "float64",
            DType::Int32 => "int32",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DType {
    type Err = EngineErr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "float64" | "f64" | "double" => Ok(DType::Float64),
            "int32" | "i32" | "int" => Ok(DType::Int32),
            other => Err(EngineErr::UnsupportedType {
                dtype: other.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for DType {
    type Error = EngineErr;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DType> for String {
    fn from(value: DType) -> Self {
        value.name().to_string()
    }
}

/// A numeric type that can live in a shared weight region.
///
/// Only `f64` and `i32` implement it. Scores are always accumulated in `f64`,
/// which holds every `i32` exactly.
pub trait Element: Pod + Send + Sync + 'static {
    const DTYPE: DType;

    fn to_f64(self) -> f64;
}

impl Element for f64 {
    const DTYPE: DType = DType::Float64;

    #[inline]
    fn to_f64(self) -> f64 {
        self
    }
}

impl Element for i32 {
    const DTYPE: DType = DType::Int32;

    #[inline]
    fn to_f64(self) -> f64 {
        f64::from(self)
    }
}
