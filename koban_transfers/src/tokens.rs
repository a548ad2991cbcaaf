// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use crate::error::{Result, TransferError};
use serde::{Deserialize, Serialize};
use std::{
    fmt::{self, Display, Formatter},
    str::FromStr,
};

/// The conversion from whole koban to raw value
const TOKEN_TO_RAW_POWER_OF_10_CONVERSION: u32 = 9;

/// The conversion from whole koban to raw value
const TOKEN_TO_RAW_CONVERSION: u64 = 1_000_000_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
/// An amount of koban, stored as nanos. 10^9 nanos = 1 koban.
///
/// All balance arithmetic happens on the raw integer value so repeated
/// transfers cannot drift the way floating point accumulation would.
pub struct Tokens(u64);

impl Tokens {
    /// Type safe representation of zero Tokens.
    pub const fn zero() -> Self {
        Self(0)
    }

    /// Returns whether it's a representation of zero Tokens.
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// New value from a number of nanos.
    pub const fn from_nanos(value: u64) -> Self {
        Self(value)
    }

    /// New value from a number of whole koban, `None` on overflow.
    pub fn from_whole(value: u64) -> Option<Self> {
        value.checked_mul(TOKEN_TO_RAW_CONVERSION).map(Self)
    }

    /// Total Tokens expressed in number of nanos.
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// Computes `self + rhs`, returning `None` if overflow occurred.
    pub fn checked_add(self, rhs: Tokens) -> Option<Tokens> {
        self.0.checked_add(rhs.0).map(Self::from_nanos)
    }

    /// Computes `self - rhs`, returning `None` if overflow occurred.
    pub fn checked_sub(self, rhs: Tokens) -> Option<Tokens> {
        self.0.checked_sub(rhs.0).map(Self::from_nanos)
    }
}

impl FromStr for Tokens {
    type Err = TransferError;

    fn from_str(value_str: &str) -> Result<Self> {
        let mut itr = value_str.splitn(2, '.');
        let converted_units = {
            let units = itr
                .next()
                .and_then(|s| s.parse::<u64>().ok())
                .ok_or_else(|| {
                    TransferError::FailedToParseTokens("Can't parse token units".to_string())
                })?;

            units
                .checked_mul(TOKEN_TO_RAW_CONVERSION)
                .ok_or(TransferError::ExcessiveTokenValue)?
        };

        let remainder = {
            let remainder_str = itr.next().unwrap_or_default().trim_end_matches('0');

            if remainder_str.is_empty() {
                0
            } else {
                let parsed_remainder = remainder_str.parse::<u64>().map_err(|_| {
                    TransferError::FailedToParseTokens("Can't parse token remainder".to_string())
                })?;

                let remainder_conversion = TOKEN_TO_RAW_POWER_OF_10_CONVERSION
                    .checked_sub(remainder_str.len() as u32)
                    .ok_or(TransferError::LossOfTokenPrecision)?;
                parsed_remainder * 10_u64.pow(remainder_conversion)
            }
        };

        let total = converted_units
            .checked_add(remainder)
            .ok_or(TransferError::ExcessiveTokenValue)?;

        Ok(Self::from_nanos(total))
    }
}

impl Display for Tokens {
    fn fmt(&self, formatter: &mut Formatter) -> fmt::Result {
        let unit = self.0 / TOKEN_TO_RAW_CONVERSION;
        let remainder = self.0 % TOKEN_TO_RAW_CONVERSION;
        write!(formatter, "{unit}.{remainder:09}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_str() -> Result<()> {
        assert_eq!(Tokens(0), Tokens::from_str("0")?);
        assert_eq!(Tokens(0), Tokens::from_str("0.")?);
        assert_eq!(Tokens(0), Tokens::from_str("0.0")?);
        assert_eq!(Tokens(1), Tokens::from_str("0.000000001")?);
        assert_eq!(Tokens(1_000_000_000), Tokens::from_str("1")?);
        assert_eq!(Tokens(1_000_000_000), Tokens::from_str("1.")?);
        assert_eq!(Tokens(1_000_000_000), Tokens::from_str("1.0")?);
        assert_eq!(Tokens(1_000_000_001), Tokens::from_str("1.000000001")?);
        assert_eq!(Tokens(1_100_000_000), Tokens::from_str("1.1")?);
        assert_eq!(Tokens(1_100_000_001), Tokens::from_str("1.100000001")?);
        assert_eq!(Tokens(10_000_000_000), Tokens::from_str("10")?);
        assert_eq!(
            Tokens(4_294_967_295_000_000_000),
            Tokens::from_str("4294967295")?
        );
        assert_eq!(
            Tokens(4_294_967_295_999_999_999),
            Tokens::from_str("4294967295.999999999")?,
        );
        assert_eq!(
            Tokens(4_294_967_295_999_999_999),
            Tokens::from_str("4294967295.9999999990000")?,
        );

        assert_eq!(
            Err(TransferError::FailedToParseTokens(
                "Can't parse token units".to_string()
            )),
            Tokens::from_str("a")
        );
        assert_eq!(
            Err(TransferError::FailedToParseTokens(
                "Can't parse token remainder".to_string()
            )),
            Tokens::from_str("0.a")
        );
        assert_eq!(
            Err(TransferError::LossOfTokenPrecision),
            Tokens::from_str("0.0000000009")
        );
        assert_eq!(
            Err(TransferError::ExcessiveTokenValue),
            Tokens::from_str("18446744074")
        );
        Ok(())
    }

    #[test]
    fn display() {
        assert_eq!("0.000000000", format!("{}", Tokens(0)));
        assert_eq!("0.000000001", format!("{}", Tokens(1)));
        assert_eq!("0.000000010", format!("{}", Tokens(10)));
        assert_eq!("1.000000000", format!("{}", Tokens(1_000_000_000)));
        assert_eq!("1.000000001", format!("{}", Tokens(1_000_000_001)));
        assert_eq!("4.200000000", format!("{}", Tokens(4_200_000_000)));
    }

    #[test]
    fn from_whole() {
        assert_eq!(Tokens::from_whole(0), Some(Tokens(0)));
        assert_eq!(Tokens::from_whole(10), Some(Tokens(10_000_000_000)));
        assert_eq!(Tokens::from_whole(u64::MAX), None);
    }

    #[test]
    fn checked_arithmetic() {
        let ten = Tokens::from_nanos(10);
        let four = Tokens::from_nanos(4);

        assert_eq!(ten.checked_sub(four), Some(Tokens::from_nanos(6)));
        assert_eq!(four.checked_sub(ten), None);
        assert_eq!(ten.checked_add(four), Some(Tokens::from_nanos(14)));
        assert_eq!(Tokens::from_nanos(u64::MAX).checked_add(four), None);
    }
}
