use std::time::Duration;

use crate::error::ConfigError;
use crate::net::protocol::{
    FRAGMENT_SIZE, MAX_DATAGRAM_SIZE, MAX_ENTITIES, MAX_FRAGMENTS, MAX_MSG_LEN,
};
use crate::net::{FRAGMENT_OVERHEAD, MAX_STRING_LEN};
use crate::snapshot::max_snapshot_bytes;

// reliable batch header, message type bytes, end marker and one
// string-bearing control message (download header or refusal)
const CONTROL_RESERVE: usize = MAX_STRING_LEN + 64;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub max_clients: usize,
    pub ring_capacity: usize,
    pub reliable_capacity: usize,
    /// Wire bytes of unacknowledged reliable commands per connection.
    pub reliable_bytes: usize,
    /// Entities sent per snapshot; the lowest numbers win when a client can
    /// see more.
    pub max_snapshot_entities: usize,
    pub download_window: usize,
    pub download_block_size: usize,
    pub max_download_bytes: u64,
    pub max_datagram: usize,
    pub fragment_size: usize,
    pub max_message: usize,
    pub timeout: Duration,
    pub zombie_quarantine: Duration,
    pub challenge_expiry: Duration,
    pub max_challenges: usize,
    /// Bytes per second granted when a client asks for less than `min_rate`
    /// or does not say.
    pub default_rate: u32,
    pub min_rate: u32,
    pub max_rate: u32,
    pub snapshot_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_clients: 32,
            ring_capacity: 32,
            reliable_capacity: 128,
            reliable_bytes: 4096,
            max_snapshot_entities: 256,
            download_window: 8,
            download_block_size: 1024,
            max_download_bytes: 64 * 1024 * 1024,
            max_datagram: MAX_DATAGRAM_SIZE,
            fragment_size: FRAGMENT_SIZE,
            max_message: MAX_MSG_LEN,
            timeout: Duration::from_secs(30),
            zombie_quarantine: Duration::from_secs(2),
            challenge_expiry: Duration::from_secs(10),
            max_challenges: 1024,
            default_rate: 25_000,
            min_rate: 1_000,
            max_rate: 100_000,
            snapshot_interval: Duration::from_millis(50),
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let nonzero = [
            ("max_clients", self.max_clients),
            ("ring_capacity", self.ring_capacity),
            ("reliable_capacity", self.reliable_capacity),
            ("reliable_bytes", self.reliable_bytes),
            ("download_window", self.download_window),
            ("download_block_size", self.download_block_size),
            ("max_datagram", self.max_datagram),
            ("fragment_size", self.fragment_size),
            ("max_message", self.max_message),
            ("max_challenges", self.max_challenges),
        ];
        if let Some((field, _)) = nonzero.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Zero { field });
        }
        if self.default_rate == 0 || self.max_rate == 0 {
            return Err(ConfigError::Zero { field: "rate" });
        }

        if self.fragment_size + FRAGMENT_OVERHEAD > self.max_datagram {
            return Err(ConfigError::FragmentSize {
                fragment: self.fragment_size,
                datagram: self.max_datagram,
            });
        }

        // every snapshot tick must fit one logical message
        let frame_bytes = max_snapshot_bytes(self.max_snapshot_entities)
            .saturating_add(self.reliable_bytes)
            .saturating_add(CONTROL_RESERVE);
        let limits = [
            ("max_clients", self.max_clients, u16::MAX as usize),
            ("max_message", self.max_message, self.fragment_size * MAX_FRAGMENTS),
            ("download_block_size", self.download_block_size, u16::MAX as usize),
            // a block must fit a logical message with room left for a snapshot
            ("download_block_size", self.download_block_size, self.max_message / 2),
            ("min_rate", self.min_rate as usize, self.max_rate as usize),
            ("max_snapshot_entities", self.max_snapshot_entities, MAX_ENTITIES),
            ("max_message", frame_bytes, self.max_message),
        ];
        for (field, value, max) in limits {
            if value > max {
                return Err(ConfigError::TooLarge { field, value, max });
            }
        }

        // the transfer header carries the size in 32 bits
        if self.max_download_bytes > u32::MAX as u64 {
            return Err(ConfigError::TooLarge {
                field: "max_download_bytes",
                value: usize::try_from(self.max_download_bytes).unwrap_or(usize::MAX),
                max: u32::MAX as usize,
            });
        }
        Ok(())
    }

    /// Clamps a client-requested rate into the configured bounds.
    pub fn clamp_rate(&self, requested: u32) -> u32 {
        if requested == 0 {
            return self.default_rate;
        }
        requested.clamp(self.min_rate, self.max_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert_eq!(SessionConfig::default().validate(), Ok(()));
    }

    #[test]
    fn rejects_bad_values() {
        let config = SessionConfig {
            ring_capacity: 0,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::Zero {
                field: "ring_capacity"
            })
        );

        let config = SessionConfig {
            fragment_size: 1400,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::FragmentSize { .. })
        ));

        let config = SessionConfig {
            download_block_size: 70_000,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::TooLarge { .. })));
    }

    #[test]
    fn worst_case_frame_must_fit_a_message() {
        let config = SessionConfig {
            max_snapshot_entities: 1024,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::TooLarge {
                field: "max_message",
                ..
            })
        ));

        let config = SessionConfig {
            reliable_bytes: 12_000,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = SessionConfig {
            max_snapshot_entities: 64,
            reliable_bytes: 8192,
            ..Default::default()
        };
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn download_limit_fits_the_size_field() {
        let config = SessionConfig {
            max_download_bytes: u32::MAX as u64,
            ..Default::default()
        };
        assert_eq!(config.validate(), Ok(()));

        let config = SessionConfig {
            max_download_bytes: 5 * 1024 * 1024 * 1024,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::TooLarge {
                field: "max_download_bytes",
                max,
                ..
            }) if max == u32::MAX as usize
        ));
    }

    #[test]
    fn rate_is_clamped() {
        let config = SessionConfig::default();
        assert_eq!(config.clamp_rate(0), 25_000);
        assert_eq!(config.clamp_rate(10), 1_000);
        assert_eq!(config.clamp_rate(1_000_000), 100_000);
    }
}
