//! Remote control of a running acquisition instance over its HTTP endpoint.
//!
//! The acquisition software exposes a small REST surface on port 37497;
//! this client only drives the acquisition state machine (idle, acquiring,
//! recording) and reports the current mode. It holds no state of its own.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ControlError, Result};

pub const CONTROL_PORT: u16 = 37497;

/// The acquisition state machine's externally visible modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionMode {
    Idle,
    Acquire,
    Record,
}

impl AcquisitionMode {
    fn as_str(&self) -> &'static str {
        match self {
            AcquisitionMode::Idle => "IDLE",
            AcquisitionMode::Acquire => "ACQUIRE",
            AcquisitionMode::Record => "RECORD",
        }
    }

    fn parse(mode: &str) -> Result<Self, ControlError> {
        match mode {
            "IDLE" => Ok(AcquisitionMode::Idle),
            "ACQUIRE" => Ok(AcquisitionMode::Acquire),
            "RECORD" => Ok(AcquisitionMode::Record),
            other => Err(ControlError::UnknownMode(other.to_string())),
        }
    }
}

impl std::fmt::Display for AcquisitionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StatusBody {
    mode: String,
}

/// Blocking client for the acquisition control endpoint.
#[derive(Debug)]
pub struct ControlClient {
    base: String,
    client: reqwest::blocking::Client,
}

impl ControlClient {
    /// `address` is a host name or IP; the well-known control port is
    /// appended.
    pub fn new(address: &str) -> Self {
        Self {
            base: format!("http://{address}:{CONTROL_PORT}"),
            client: reqwest::blocking::Client::new(),
        }
    }

    /// Current acquisition mode.
    pub fn status(&self) -> Result<AcquisitionMode> {
        let body: StatusBody = self
            .client
            .get(format!("{}/api/status", self.base))
            .send()
            .map_err(ControlError::Http)?
            .error_for_status()
            .map_err(ControlError::Http)?
            .json()
            .map_err(ControlError::Http)?;
        Ok(AcquisitionMode::parse(&body.mode)?)
    }

    /// Request a mode transition and return the mode the endpoint settled
    /// on.
    pub fn set_mode(&self, mode: AcquisitionMode) -> Result<AcquisitionMode> {
        debug!(%mode, "requesting acquisition mode");
        let body: StatusBody = self
            .client
            .put(format!("{}/api/status", self.base))
            .json(&StatusBody {
                mode: mode.as_str().to_string(),
            })
            .send()
            .map_err(ControlError::Http)?
            .error_for_status()
            .map_err(ControlError::Http)?
            .json()
            .map_err(ControlError::Http)?;
        Ok(AcquisitionMode::parse(&body.mode)?)
    }

    /// Start acquisition without recording.
    pub fn start(&self) -> Result<AcquisitionMode> {
        self.set_mode(AcquisitionMode::Acquire)
    }

    /// Start recording (implies acquisition).
    pub fn record(&self) -> Result<AcquisitionMode> {
        self.set_mode(AcquisitionMode::Record)
    }

    /// Stop acquisition and recording.
    pub fn stop(&self) -> Result<AcquisitionMode> {
        self.set_mode(AcquisitionMode::Idle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modes_round_trip_through_wire_names() {
        for mode in [
            AcquisitionMode::Idle,
            AcquisitionMode::Acquire,
            AcquisitionMode::Record,
        ] {
            assert_eq!(AcquisitionMode::parse(mode.as_str()).unwrap(), mode);
        }
        assert!(AcquisitionMode::parse("PAUSED").is_err());
    }
}
