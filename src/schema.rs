//! Series identifiers and the per-measurement schema registry.

use std::{collections::HashMap, fmt, str::FromStr};

use crate::format::{codec::CompressionKind, FormatError};

/// Value type stored by a series.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataType {
    /// One byte per value.
    Boolean,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// IEEE-754 single precision.
    Float,
    /// IEEE-754 double precision.
    Double,
    /// Length-prefixed byte string.
    Text,
}

impl DataType {
    /// On-disk discriminant.
    pub const fn as_u8(self) -> u8 {
        match self {
            DataType::Boolean => 0,
            DataType::Int32 => 1,
            DataType::Int64 => 2,
            DataType::Float => 3,
            DataType::Double => 4,
            DataType::Text => 5,
        }
    }

    /// Encoded width of one value, `None` for variable-width types.
    pub const fn fixed_width(self) -> Option<usize> {
        match self {
            DataType::Boolean => Some(1),
            DataType::Int32 | DataType::Float => Some(4),
            DataType::Int64 | DataType::Double => Some(8),
            DataType::Text => None,
        }
    }
}

impl TryFrom<u8> for DataType {
    type Error = FormatError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(DataType::Boolean),
            1 => Ok(DataType::Int32),
            2 => Ok(DataType::Int64),
            3 => Ok(DataType::Float),
            4 => Ok(DataType::Double),
            5 => Ok(DataType::Text),
            _ => Err(FormatError::Corrupt("unknown data type")),
        }
    }
}

/// Timestamp column encoding used inside page bodies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Encoding {
    /// Fixed 8-byte little-endian timestamps.
    #[default]
    Plain,
    /// First timestamp verbatim, then zig-zag LEB128 deltas.
    Delta,
}

impl Encoding {
    /// On-disk discriminant.
    pub const fn as_u8(self) -> u8 {
        match self {
            Encoding::Plain => 0,
            Encoding::Delta => 1,
        }
    }
}

impl TryFrom<u8> for Encoding {
    type Error = FormatError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Encoding::Plain),
            1 => Ok(Encoding::Delta),
            _ => Err(FormatError::Corrupt("unknown encoding")),
        }
    }
}

/// Immutable description of how a measurement is stored.
///
/// Schemas are keyed by measurement, so every device carrying the same
/// measurement shares one schema (and one chunk encoder, see
/// [`MergeResource::chunk_encoder`](crate::compaction::MergeResource::chunk_encoder)).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesSchema {
    measurement: String,
    data_type: DataType,
    encoding: Encoding,
    compression: CompressionKind,
}

impl SeriesSchema {
    /// Create a schema with plain encoding and no compression.
    pub fn new(measurement: impl Into<String>, data_type: DataType) -> Self {
        Self {
            measurement: measurement.into(),
            data_type,
            encoding: Encoding::default(),
            compression: CompressionKind::default(),
        }
    }

    /// Choose the timestamp encoding.
    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Choose the page codec.
    pub fn with_compression(mut self, compression: CompressionKind) -> Self {
        self.compression = compression;
        self
    }

    /// Measurement identifier.
    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    /// Value type.
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Timestamp encoding.
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Page codec.
    pub fn compression(&self) -> CompressionKind {
        self.compression
    }
}

/// Full name of one time series: `device.measurement`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesPath {
    device: String,
    measurement: String,
}

impl SeriesPath {
    /// Build a path from its two components.
    pub fn new(device: impl Into<String>, measurement: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            measurement: measurement.into(),
        }
    }

    /// Device component.
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Measurement component.
    pub fn measurement(&self) -> &str {
        &self.measurement
    }
}

impl fmt::Display for SeriesPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.device, self.measurement)
    }
}

/// Error returned when a series path string has no measurement component.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid series path `{0}`")]
pub struct InvalidSeriesPath(pub String);

impl FromStr for SeriesPath {
    type Err = InvalidSeriesPath;

    /// The measurement is the last dot-separated component; everything before
    /// it is the device.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.rsplit_once('.') {
            Some((device, measurement)) if !device.is_empty() && !measurement.is_empty() => {
                Ok(SeriesPath::new(device, measurement))
            }
            _ => Err(InvalidSeriesPath(s.to_string())),
        }
    }
}

/// Measurement-keyed schema lookup table.
#[derive(Clone, Debug, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, SeriesSchema>,
}

impl SchemaRegistry {
    /// Merge a batch of schemas; later entries for the same measurement win.
    pub fn register<I>(&mut self, schemas: I)
    where
        I: IntoIterator<Item = SeriesSchema>,
    {
        for schema in schemas {
            self.schemas.insert(schema.measurement().to_string(), schema);
        }
    }

    /// Look up the schema of a measurement.
    pub fn get(&self, measurement: &str) -> Option<&SeriesSchema> {
        self.schemas.get(measurement)
    }

    /// Number of registered measurements.
    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    /// Returns `true` when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Drop every registered schema.
    pub fn clear(&mut self) {
        self.schemas.clear();
    }
}
