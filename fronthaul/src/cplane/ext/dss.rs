//! Dynamic Spectrum Sharing (extension type 9)

use bytes::{BufMut, BytesMut};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};

use super::ensure_len;
use crate::FhError;

/// Longest DSS pattern in slots
pub const MAX_DSS_PERIOD: usize = 15;

/// Radio access technology of a DSS slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, FromPrimitive, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Technology {
    Lte = 0,
    #[default]
    Nr = 1,
}

pub(crate) fn write_body(buf: &mut BytesMut, tech: Technology) -> Result<(), FhError> {
    buf.put_u8(tech as u8);
    buf.put_u8(0);
    Ok(())
}

pub(crate) fn parse_body(body: &[u8]) -> Result<Technology, FhError> {
    ensure_len(body, 1, "extension 9")?;
    Technology::from_u8(body[0]).ok_or_else(|| FhError::InvalidPacket(format!("DSS technology {}", body[0])))
}

/// Technology per slot, repeating every `period` slots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Technology>", into = "Vec<Technology>")]
pub struct DssPattern {
    pattern: Vec<Technology>,
}

impl DssPattern {
    /// Build a pattern of 1 to 15 slots
    pub fn new(pattern: Vec<Technology>) -> Result<Self, FhError> {
        if pattern.is_empty() || pattern.len() > MAX_DSS_PERIOD {
            return Err(FhError::InvalidParam(format!("DSS period {} not in 1..={}", pattern.len(), MAX_DSS_PERIOD)));
        }
        Ok(Self { pattern })
    }

    /// Pattern length in slots
    pub fn period(&self) -> usize {
        self.pattern.len()
    }

    /// Technology expected in slot `tti`
    pub fn technology(&self, tti: u32) -> Technology {
        self.pattern[tti as usize % self.pattern.len()]
    }
}

impl TryFrom<Vec<Technology>> for DssPattern {
    type Error = FhError;

    fn try_from(pattern: Vec<Technology>) -> Result<Self, Self::Error> {
        Self::new(pattern)
    }
}

impl From<DssPattern> for Vec<Technology> {
    fn from(pattern: DssPattern) -> Self {
        pattern.pattern
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    
    #[test]
    fn test_pattern_lookup() {
        let pattern = DssPattern::new(vec![Technology::Nr, Technology::Lte, Technology::Lte]).unwrap();
        assert_eq!(pattern.period(), 3);
        assert_eq!(pattern.technology(0), Technology::Nr);
        assert_eq!(pattern.technology(4), Technology::Lte);
        assert_eq!(pattern.technology(6), Technology::Nr);
    }
    
    #[test]
    fn test_pattern_bounds() {
        assert!(DssPattern::new(Vec::new()).is_err());
        assert!(DssPattern::new(vec![Technology::Nr; 16]).is_err());
    }
    
    #[test]
    fn test_unknown_technology() {
        assert!(matches!(parse_body(&[2, 0]), Err(FhError::InvalidPacket(_))));
    }
}
