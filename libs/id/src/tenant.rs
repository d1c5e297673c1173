//! Tenant IDs and the runtime identity derived from them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::IdError;

/// Prefix shared by every tenant runtime unit.
pub const UNIT_NAME_PREFIX: &str = "chatbot_";

/// Largest tenant ID accepted.
///
/// Keeps `808{id}` within `u64`.
pub const MAX_TENANT_ID: i64 = 999_999_999_999_999;

/// Registry-assigned tenant identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TenantId(i64);

impl TenantId {
    /// Creates a tenant ID, validating its range.
    pub fn new(value: i64) -> Result<Self, IdError> {
        if !(1..=MAX_TENANT_ID).contains(&value) {
            return Err(IdError::OutOfRange {
                value,
                max: MAX_TENANT_ID,
            });
        }
        Ok(Self(value))
    }

    /// Returns the raw integer value.
    #[must_use]
    pub const fn get(&self) -> i64 {
        self.0
    }

    /// Parses the canonical decimal form (no sign, no leading zeros).
    pub fn parse(s: &str) -> Result<Self, IdError> {
        if s.is_empty() {
            return Err(IdError::Empty);
        }
        if !s.bytes().all(|b| b.is_ascii_digit()) || s.starts_with('0') {
            return Err(IdError::InvalidNumber(s.to_string()));
        }
        let value: i64 = s
            .parse()
            .map_err(|_| IdError::InvalidNumber(s.to_string()))?;
        Self::new(value)
    }

    /// Name of the runtime unit owned by this tenant.
    #[must_use]
    pub fn unit_name(&self) -> UnitName {
        UnitName(*self)
    }

    /// Expected port: the decimal concatenation `808{id}`.
    #[must_use]
    pub fn expected_port(&self) -> u64 {
        let id = self.0 as u64;
        let mut scale = 10u64;
        while scale <= id {
            scale *= 10;
        }
        808 * scale + id
    }

    /// The expected port as a host binding, if it fits the TCP port range.
    #[must_use]
    pub fn host_port(&self) -> Option<u16> {
        u16::try_from(self.expected_port()).ok()
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TenantId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<i64> for TenantId {
    type Error = IdError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl Serialize for TenantId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.0)
    }
}

impl<'de> Deserialize<'de> for TenantId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = i64::deserialize(deserializer)?;
        Self::new(value).map_err(serde::de::Error::custom)
    }
}

/// Name of a tenant runtime unit, always `chatbot_{tenant_id}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnitName(TenantId);

impl UnitName {
    /// Parses a unit name, rejecting anything that is not exactly
    /// `chatbot_{canonical id}`.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        if s.is_empty() {
            return Err(IdError::Empty);
        }
        let Some(id) = s.strip_prefix(UNIT_NAME_PREFIX) else {
            return Err(IdError::InvalidPrefix {
                expected: UNIT_NAME_PREFIX,
                actual: s.to_string(),
            });
        };
        TenantId::parse(id).map(Self)
    }

    /// The tenant that owns this unit.
    #[must_use]
    pub const fn tenant_id(&self) -> TenantId {
        self.0
    }
}

impl fmt::Display for UnitName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", UNIT_NAME_PREFIX, self.0)
    }
}

impl FromStr for UnitName {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for UnitName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for UnitName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}
