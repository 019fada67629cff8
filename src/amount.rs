use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const WEI_PER_SATOSHI: u128 = 10_000_000_000;

/// Exact RBTC amount in wei. Decodes from JSON integers or decimal strings, never floats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Wei(u128);

impl Wei {
    pub const ZERO: Wei = Wei(0);

    pub const fn new(value: u128) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u128 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Wei) -> Option<Wei> {
        self.0.checked_add(other.0).map(Wei)
    }

    pub fn saturating_add(self, other: Wei) -> Wei {
        Wei(self.0.saturating_add(other.0))
    }

    pub fn from_satoshis(sats: u64) -> Wei {
        Wei(u128::from(sats) * WEI_PER_SATOSHI)
    }

    /// Satoshis needed to cover this amount, rounding up any sub-satoshi remainder.
    pub fn to_satoshis_ceil(self) -> Option<u64> {
        let sats = self.0.div_ceil(WEI_PER_SATOSHI);
        u64::try_from(sats).ok()
    }

    pub fn to_satoshis_floor(self) -> u64 {
        u64::try_from(self.0 / WEI_PER_SATOSHI).unwrap_or(u64::MAX)
    }

    pub fn to_word(self) -> [u8; 32] {
        let mut word = [0u8; 32];
        word[16..].copy_from_slice(&self.0.to_be_bytes());
        word
    }
}

impl fmt::Display for Wei {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid wei amount {0:?}")]
pub struct ParseWeiError(String);

impl FromStr for Wei {
    type Err = ParseWeiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParseWeiError(s.to_string()));
        }
        s.parse::<u128>()
            .map(Wei)
            .map_err(|_| ParseWeiError(s.to_string()))
    }
}

impl From<u64> for Wei {
    fn from(value: u64) -> Self {
        Wei(u128::from(value))
    }
}

impl Serialize for Wei {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Wei {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct WeiVisitor;

        impl Visitor<'_> for WeiVisitor {
            type Value = Wei;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a non-negative integer or a decimal string")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Wei, E> {
                Ok(Wei::from(v))
            }

            fn visit_u128<E: de::Error>(self, v: u128) -> Result<Wei, E> {
                Ok(Wei(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Wei, E> {
                u64::try_from(v)
                    .map(Wei::from)
                    .map_err(|_| E::custom(format!("negative amount {v}")))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Wei, E> {
                Err(E::custom(format!(
                    "floating point amount {v} cannot represent an exact wei value"
                )))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Wei, E> {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(WeiVisitor)
    }
}

/// `deserialize_with` helper for optional integer fields that providers may send either as JSON
/// integers or as decimal strings.
pub(crate) fn opt_int_or_string<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<i128>,
{
    struct OptionVisitor<T>(PhantomData<T>);

    impl<'de, T: TryFrom<i128>> Visitor<'de> for OptionVisitor<T> {
        type Value = Option<T>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("an integer, a decimal string or null")
        }

        fn visit_none<E: de::Error>(self) -> Result<Option<T>, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Option<T>, E> {
            Ok(None)
        }

        fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Option<T>, D::Error> {
            deserializer
                .deserialize_any(IntVisitor(PhantomData))
                .map(Some)
        }
    }

    struct IntVisitor<T>(PhantomData<T>);

    impl<T: TryFrom<i128>> IntVisitor<T> {
        fn convert<E: de::Error>(value: i128) -> Result<T, E> {
            T::try_from(value).map_err(|_| E::custom(format!("integer {value} out of range")))
        }
    }

    impl<T: TryFrom<i128>> Visitor<'_> for IntVisitor<T> {
        type Value = T;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("an integer or a decimal string")
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<T, E> {
            Self::convert(i128::from(v))
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<T, E> {
            Self::convert(i128::from(v))
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<T, E> {
            Err(E::custom(format!("floating point value {v} is not an integer")))
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<T, E> {
            let digits = v.strip_prefix('-').unwrap_or(v);
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return Err(E::custom(format!("invalid integer string {v:?}")));
            }
            let value = v
                .parse::<i128>()
                .map_err(|_| E::custom(format!("integer string {v:?} out of range")))?;
            Self::convert(value)
        }
    }

    deserializer.deserialize_option(OptionVisitor(PhantomData))
}
