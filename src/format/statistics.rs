//! Typed values and aggregate statistics carried by pages and chunks.

use super::{put_bytes, ByteReader, FormatError};
use crate::schema::DataType;

/// Bytes reserved for one text bound when estimating header sizes.
pub const TEXT_STATISTIC_ESTIMATE: usize = 64;

/// A single data point value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// Boolean value.
    Boolean(bool),
    /// 32-bit integer value.
    Int32(i32),
    /// 64-bit integer value.
    Int64(i64),
    /// Single precision value.
    Float(f32),
    /// Double precision value.
    Double(f64),
    /// Raw bytes.
    Text(Vec<u8>),
}

impl Value {
    /// Type of this value.
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Boolean(_) => DataType::Boolean,
            Value::Int32(_) => DataType::Int32,
            Value::Int64(_) => DataType::Int64,
            Value::Float(_) => DataType::Float,
            Value::Double(_) => DataType::Double,
            Value::Text(_) => DataType::Text,
        }
    }

    /// Append the plain little-endian encoding.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        match self {
            Value::Boolean(v) => buf.push(u8::from(*v)),
            Value::Int32(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Value::Int64(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Value::Float(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Value::Double(v) => buf.extend_from_slice(&v.to_le_bytes()),
            Value::Text(v) => put_bytes(buf, v),
        }
    }

    /// Decode a value of `data_type` from its plain encoding.
    pub fn decode_from(
        reader: &mut ByteReader<'_>,
        data_type: DataType,
    ) -> Result<Self, FormatError> {
        Ok(match data_type {
            DataType::Boolean => match reader.u8()? {
                0 => Value::Boolean(false),
                1 => Value::Boolean(true),
                _ => return Err(FormatError::Corrupt("invalid boolean byte")),
            },
            DataType::Int32 => Value::Int32(reader.i32()?),
            DataType::Int64 => Value::Int64(reader.i64()?),
            DataType::Float => Value::Float(reader.f32()?),
            DataType::Double => Value::Double(reader.f64()?),
            DataType::Text => Value::Text(reader.bytes()?.to_vec()),
        })
    }

    /// Size of the plain encoding.
    pub fn encoded_len(&self) -> usize {
        match self {
            Value::Text(v) => 4 + v.len(),
            other => other.data_type().fixed_width().unwrap_or(0),
        }
    }

    fn as_f64(&self) -> f64 {
        match self {
            Value::Boolean(v) => f64::from(u8::from(*v)),
            Value::Int32(v) => f64::from(*v),
            Value::Int64(v) => *v as f64,
            Value::Float(v) => f64::from(*v),
            Value::Double(v) => *v,
            Value::Text(_) => 0.0,
        }
    }

    fn less_than(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Boolean(a), Value::Boolean(b)) => a < b,
            (Value::Int32(a), Value::Int32(b)) => a < b,
            (Value::Int64(a), Value::Int64(b)) => a < b,
            (Value::Float(a), Value::Float(b)) => a < b,
            (Value::Double(a), Value::Double(b)) => a < b,
            (Value::Text(a), Value::Text(b)) => a < b,
            _ => false,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
struct Bounds {
    min: Value,
    max: Value,
    first: Value,
    last: Value,
    sum: f64,
}

/// Aggregates over the values of one page or chunk.
///
/// Values are expected in time order: `first` is the earliest value seen and
/// `last` the latest. `sum` is kept for numeric types and stays `0` for text.
#[derive(Clone, Debug, PartialEq)]
pub struct Statistics {
    data_type: DataType,
    bounds: Option<Bounds>,
}

impl Statistics {
    /// Empty statistics for `data_type`.
    pub fn new(data_type: DataType) -> Self {
        Self {
            data_type,
            bounds: None,
        }
    }

    /// Type the statistics describe.
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Returns `true` when no value was recorded.
    pub fn is_empty(&self) -> bool {
        self.bounds.is_none()
    }

    /// Smallest value.
    pub fn min(&self) -> Option<&Value> {
        self.bounds.as_ref().map(|b| &b.min)
    }

    /// Largest value.
    pub fn max(&self) -> Option<&Value> {
        self.bounds.as_ref().map(|b| &b.max)
    }

    /// Earliest value.
    pub fn first(&self) -> Option<&Value> {
        self.bounds.as_ref().map(|b| &b.first)
    }

    /// Latest value.
    pub fn last(&self) -> Option<&Value> {
        self.bounds.as_ref().map(|b| &b.last)
    }

    /// Sum of numeric values.
    pub fn sum(&self) -> f64 {
        self.bounds.as_ref().map_or(0.0, |b| b.sum)
    }

    /// Record one value. Values of another type are rejected.
    pub fn update(&mut self, value: &Value) -> Result<(), FormatError> {
        if value.data_type() != self.data_type {
            return Err(FormatError::Corrupt("statistics value type mismatch"));
        }
        match &mut self.bounds {
            None => {
                self.bounds = Some(Bounds {
                    min: value.clone(),
                    max: value.clone(),
                    first: value.clone(),
                    last: value.clone(),
                    sum: value.as_f64(),
                });
            }
            Some(bounds) => {
                if value.less_than(&bounds.min) {
                    bounds.min = value.clone();
                }
                if bounds.max.less_than(value) {
                    bounds.max = value.clone();
                }
                bounds.last = value.clone();
                bounds.sum += value.as_f64();
            }
        }
        Ok(())
    }

    /// Fold statistics of a later page into these.
    pub fn merge(&mut self, later: &Statistics) -> Result<(), FormatError> {
        if later.data_type != self.data_type {
            return Err(FormatError::Corrupt("statistics type mismatch on merge"));
        }
        let Some(other) = &later.bounds else {
            return Ok(());
        };
        match &mut self.bounds {
            None => self.bounds = Some(other.clone()),
            Some(bounds) => {
                if other.min.less_than(&bounds.min) {
                    bounds.min = other.min.clone();
                }
                if bounds.max.less_than(&other.max) {
                    bounds.max = other.max.clone();
                }
                bounds.last = other.last.clone();
                bounds.sum += other.sum;
            }
        }
        Ok(())
    }

    /// Forget every recorded value.
    pub fn clear(&mut self) {
        self.bounds = None;
    }

    /// Append the serialized form.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        match &self.bounds {
            None => buf.push(1),
            Some(bounds) => {
                buf.push(0);
                bounds.min.encode_into(buf);
                bounds.max.encode_into(buf);
                bounds.first.encode_into(buf);
                bounds.last.encode_into(buf);
                buf.extend_from_slice(&bounds.sum.to_le_bytes());
            }
        }
    }

    /// Decode statistics of `data_type`.
    pub fn decode_from(
        reader: &mut ByteReader<'_>,
        data_type: DataType,
    ) -> Result<Self, FormatError> {
        let bounds = match reader.u8()? {
            1 => None,
            0 => Some(Bounds {
                min: Value::decode_from(reader, data_type)?,
                max: Value::decode_from(reader, data_type)?,
                first: Value::decode_from(reader, data_type)?,
                last: Value::decode_from(reader, data_type)?,
                sum: reader.f64()?,
            }),
            _ => return Err(FormatError::Corrupt("invalid statistics flag")),
        };
        Ok(Self { data_type, bounds })
    }

    /// Exact serialized size.
    pub fn serialized_size(&self) -> usize {
        1 + self.bounds.as_ref().map_or(0, |b| {
            b.min.encoded_len()
                + b.max.encoded_len()
                + b.first.encoded_len()
                + b.last.encoded_len()
                + 8
        })
    }

    /// Upper estimate of the serialized size for `data_type`; text bounds are
    /// assumed to be at most [`TEXT_STATISTIC_ESTIMATE`] bytes long.
    pub fn max_serialized_size(data_type: DataType) -> usize {
        let value = data_type
            .fixed_width()
            .unwrap_or(4 + TEXT_STATISTIC_ESTIMATE);
        1 + 4 * value + 8
    }
}
