use std::fmt;
use std::str::FromStr;

use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};

use crate::constants::ROOM_CODE_LEN;
use crate::error::RoomCodeError;

// Device identity = opaque string, stable per local installation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct DeviceId(pub String);

impl DeviceId {
    /// Generate a fresh device id of the form `dev-<9 alphanumerics>`.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let suffix: String = (0..9)
            .map(|_| (rng.sample(Alphanumeric) as char).to_ascii_lowercase())
            .collect();
        Self(format!("dev-{suffix}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Truncated form for log fields. Remote ids are opaque strings, so the
    /// cut lands on a character boundary rather than a byte offset.
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(12) {
            Some((idx, _)) => &self.0[..idx],
            None => &self.0,
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A device as seen by the rest of the room. The display name is
/// self-reported and untrusted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Device {
    pub id: DeviceId,
    pub display_name: String,
}

/// Room rendezvous namespace, identified by a short numeric code.
///
/// Validation happens at parse time: a `RoomId` always holds exactly
/// `ROOM_CODE_LEN` ASCII digits, so no network call is ever made with a
/// malformed code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for RoomId {
    type Err = RoomCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != ROOM_CODE_LEN || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(RoomCodeError::InvalidCode);
        }
        Ok(Self(s.to_string()))
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role of the local device within a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// First claimant of the room; relay hub of the star topology.
    Host,
    /// Any later joiner; connects only to the host.
    Guest,
}

impl Role {
    pub fn is_host(self) -> bool {
        matches!(self, Role::Host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_id_format() {
        let id = DeviceId::generate();
        assert!(id.as_str().starts_with("dev-"));
        assert_eq!(id.as_str().len(), 13);
    }

    #[test]
    fn test_device_ids_are_unique() {
        let a = DeviceId::generate();
        let b = DeviceId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_short_truncates_on_char_boundary() {
        let ascii = DeviceId::from("dev-abcdefghijkl");
        assert_eq!(ascii.short(), "dev-abcdefgh");

        // Ids arrive from remote peers; multibyte content must not panic.
        let multibyte = DeviceId::from("dev-设备设备设备");
        let short = multibyte.short();
        assert!(multibyte.as_str().starts_with(short));
        assert!(short.chars().count() <= 12);

        let small = DeviceId::from("dev-a");
        assert_eq!(small.short(), "dev-a");
    }

    #[test]
    fn test_room_code_valid() {
        let room: RoomId = "042".parse().unwrap();
        assert_eq!(room.as_str(), "042");
    }

    #[test]
    fn test_room_code_rejected() {
        assert_eq!("12".parse::<RoomId>(), Err(RoomCodeError::InvalidCode));
        assert_eq!("1234".parse::<RoomId>(), Err(RoomCodeError::InvalidCode));
        assert_eq!("12a".parse::<RoomId>(), Err(RoomCodeError::InvalidCode));
        assert_eq!("".parse::<RoomId>(), Err(RoomCodeError::InvalidCode));
    }
}
