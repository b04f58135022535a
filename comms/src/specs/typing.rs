use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// The status code every worker reply carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Code {
    Ok,
    GetParametersNotImplemented,
    FitNotImplemented,
    EvaluateNotImplemented,
    GradientsNotImplemented,
    ContributionsNotImplemented,
    Failed,
}

/// The status of a worker reply, a code plus a human readable message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub code: Code,
    #[serde(default)]
    pub message: String,
}

impl Status {
    /// Creates a successful status.
    ///
    /// # Returns
    /// A new `Status` with the `Ok` code and an empty message.
    pub fn ok() -> Self {
        Self {
            code: Code::Ok,
            message: String::new(),
        }
    }

    /// Creates a status for a failed reply.
    ///
    /// # Arguments
    /// * `code` - The failure code.
    /// * `message` - What went wrong on the worker's side.
    ///
    /// # Returns
    /// A new `Status` instance.
    pub fn failed(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Whether this status reports a successful call.
    pub fn is_ok(&self) -> bool {
        self.code == Code::Ok
    }
}

/// A scalar metric value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
}

impl Scalar {
    /// Returns this scalar as a float if it holds a number.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Scalar::Int(v) => Some(v as f64),
            Scalar::Float(v) => Some(v),
            _ => None,
        }
    }
}

/// Named metrics reported by workers or produced by aggregation.
pub type Metrics = HashMap<String, Scalar>;

/// Configuration values sent along an instruction.
pub type Config = HashMap<String, Scalar>;

/// An opaque set of tensors plus the tag describing how to read them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Parameters {
    pub tensors: Vec<Vec<u8>>,
    pub tensor_type: String,
}

impl Parameters {
    /// The tag for tensors stored as little endian `f32` values.
    pub const F32_LE: &'static str = "f32_le";

    /// Creates a new `Parameters`.
    ///
    /// # Arguments
    /// * `tensors` - The raw tensors.
    /// * `tensor_type` - The encoding tag of `tensors`.
    ///
    /// # Returns
    /// A new `Parameters` instance.
    pub fn new(tensors: Vec<Vec<u8>>, tensor_type: impl Into<String>) -> Self {
        Self {
            tensors,
            tensor_type: tensor_type.into(),
        }
    }

    /// Encodes a list of `f32` tensors as little endian bytes.
    ///
    /// # Arguments
    /// * `tensors` - The tensors to encode.
    ///
    /// # Returns
    /// A new `Parameters` tagged as `F32_LE`.
    pub fn from_f32(tensors: &[Vec<f32>]) -> Self {
        let tensors = tensors
            .iter()
            .map(|t| t.iter().flat_map(|v| v.to_le_bytes()).collect())
            .collect();

        Self::new(tensors, Self::F32_LE)
    }

    /// Decodes the tensors back into `f32` values.
    ///
    /// # Returns
    /// The decoded tensors or `None` if the tag isn't `F32_LE` or a tensor has a ragged length.
    pub fn to_f32(&self) -> Option<Vec<Vec<f32>>> {
        if self.tensor_type != Self::F32_LE {
            return None;
        }

        self.tensors
            .iter()
            .map(|bytes| {
                if bytes.len() % size_of::<f32>() != 0 {
                    return None;
                }

                let values = bytes
                    .chunks_exact(size_of::<f32>())
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect();

                Some(values)
            })
            .collect()
    }

    /// Whether these parameters hold no tensors at all.
    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }
}
