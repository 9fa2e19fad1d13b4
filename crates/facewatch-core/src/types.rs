use crate::identifier::Identifier;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DescriptorError {
    #[error("descriptor is empty")]
    Empty,
    #[error("descriptor value at index {0} is not finite")]
    NonFinite(usize),
}

/// Face descriptor vector (512-dimensional for FaceNet-512).
///
/// Immutable once built: the values can be read but never modified in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct Descriptor {
    values: Vec<f32>,
}

impl Descriptor {
    /// Build a descriptor, rejecting empty vectors and NaN/infinite values.
    pub fn new(values: Vec<f32>) -> Result<Self, DescriptorError> {
        if values.is_empty() {
            return Err(DescriptorError::Empty);
        }
        if let Some(idx) = values.iter().position(|v| !v.is_finite()) {
            return Err(DescriptorError::NonFinite(idx));
        }
        Ok(Self { values })
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Euclidean (L2) distance to another descriptor.
    ///
    /// Callers must check that both descriptors have the same dimension;
    /// the matcher does so before calling this.
    pub fn euclidean_distance(&self, other: &Descriptor) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Little-endian `f32` encoding used by the on-disk store.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }
}

impl TryFrom<Vec<f32>> for Descriptor {
    type Error = DescriptorError;

    fn try_from(values: Vec<f32>) -> Result<Self, Self::Error> {
        Self::new(values)
    }
}

impl From<Descriptor> for Vec<f32> {
    fn from(descriptor: Descriptor) -> Self {
        descriptor.values
    }
}

/// One enrolled identity: its identifier and the latest descriptor written for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub identifier: Identifier,
    pub descriptor: Descriptor,
    /// RFC 3339 UTC timestamp of the last write.
    pub updated_at: String,
}

/// Result of matching a probe descriptor against the gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Identifier of the nearest record, set only when it is within the threshold.
    pub identifier: Option<Identifier>,
    /// Distance to the nearest record; `None` for an empty gallery.
    pub distance: Option<f32>,
}

impl MatchResult {
    pub fn unknown(distance: Option<f32>) -> Self {
        Self {
            matched: false,
            identifier: None,
            distance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_rejects_empty() {
        assert_eq!(Descriptor::new(vec![]), Err(DescriptorError::Empty));
    }

    #[test]
    fn test_descriptor_rejects_nan() {
        assert_eq!(
            Descriptor::new(vec![0.0, f32::NAN, 1.0]),
            Err(DescriptorError::NonFinite(1))
        );
        assert_eq!(
            Descriptor::new(vec![f32::INFINITY]),
            Err(DescriptorError::NonFinite(0))
        );
    }

    #[test]
    fn test_euclidean_distance() {
        let a = Descriptor::new(vec![0.0, 0.0, 0.0]).unwrap();
        let b = Descriptor::new(vec![1.0, 1.0, 1.0]).unwrap();
        assert!((a.euclidean_distance(&b) - 3f32.sqrt()).abs() < 1e-6);
        assert_eq!(a.euclidean_distance(&a), 0.0);
    }

    #[test]
    fn test_le_bytes_layout() {
        let d = Descriptor::new(vec![1.0, -2.5]).unwrap();
        let bytes = d.to_le_bytes();
        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[..4], &1.0f32.to_le_bytes());
        assert_eq!(&bytes[4..], &(-2.5f32).to_le_bytes());
    }

    #[test]
    fn test_descriptor_serde_validates() {
        let ok: Descriptor = serde_json::from_str("[0.5, 1.5]").unwrap();
        assert_eq!(ok.values(), &[0.5, 1.5]);
        assert!(serde_json::from_str::<Descriptor>("[]").is_err());
    }
}
