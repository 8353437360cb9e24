use core::fmt::Display;

use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

/// Highest value a `Percentage` can represent.
const PERCENTAGE_MAX: u8 = 100;

/// Represents a whole 0-100% value, as reported by the water level sensor.
///
/// ```
/// use common::physical::Percentage;
/// let percent = Percentage::try_from(57u8).expect("Failed to get Percentage representation");
/// assert_eq!(percent.value(), 57);
/// ```
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Percentage {
    value: u8,
}

/// Represents errors in creating or using the `Percentage` type.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PercentageError {
    /// The `Percentage` was trying to be created with a value above 100.
    #[error("Value outside of valid state space representation!")]
    OutOfValidStateSpace,
}

impl Percentage {
    /// Build a percentage, clamping anything above 100.
    pub const fn saturating(value: u8) -> Self {
        if value > PERCENTAGE_MAX {
            Self {
                value: PERCENTAGE_MAX,
            }
        } else {
            Self { value }
        }
    }

    /// Get the underlying percentage value.
    pub fn value(&self) -> u8 {
        self.value
    }
}

impl TryFrom<u8> for Percentage {
    type Error = PercentageError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if value > PERCENTAGE_MAX {
            return Err(PercentageError::OutOfValidStateSpace);
        }
        Ok(Self { value })
    }
}

impl TryFrom<i64> for Percentage {
    type Error = PercentageError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        let value = u8::try_from(value).map_err(|_| PercentageError::OutOfValidStateSpace)?;
        Self::try_from(value)
    }
}

impl From<Percentage> for u8 {
    fn from(value: Percentage) -> Self {
        value.value
    }
}

impl Display for Percentage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "<Percentage: {}%>", self.value)
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    #[test]
    fn test_creation_within_range() {
        for raw in 0..=100u8 {
            let percent =
                Percentage::try_from(raw).expect("Failed to get valid Percentage representation.");
            assert_eq!(percent.value(), raw);
        }

        assert!(Percentage::try_from(101u8).is_err());
        assert!(Percentage::try_from(255u8).is_err());
    }

    #[test]
    fn test_creation_from_wide_integers() {
        assert_eq!(
            Percentage::try_from(42i64).map(|p| p.value()),
            Ok(42u8)
        );
        assert!(Percentage::try_from(-1i64).is_err());
        assert!(Percentage::try_from(101i64).is_err());
        assert!(Percentage::try_from(i64::MAX).is_err());
    }

    #[test]
    fn test_saturating_clamps() {
        assert_eq!(Percentage::saturating(57).value(), 57);
        assert_eq!(Percentage::saturating(100).value(), 100);
        assert_eq!(Percentage::saturating(250).value(), 100);
    }
}
