//! Error types for Pixie-16 driver operations

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Pixie-16 operations
pub type Result<T> = std::result::Result<T, PixieError>;

/// Stage of an FPGA load that ran out of attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStage {
    /// The device never reported a cleared configuration
    Clear,
    /// The device never reported done after the image was streamed
    Programming,
}

impl std::fmt::Display for LoadStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Clear => write!(f, "clear"),
            Self::Programming => write!(f, "programming"),
        }
    }
}

/// Errors that can occur during Pixie-16 operations
#[derive(Debug, Error)]
pub enum PixieError {
    /// Register window not found at the expected path
    #[error("Device not found: {path}")]
    DeviceNotFound {
        /// Path that was checked
        path: PathBuf,
    },

    /// I/O error during device communication
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },

    /// Register access outside the mapped window
    #[error("Register access out of bounds: offset={offset:#x}, limit={limit:#x}")]
    OutOfBounds {
        /// Offset that was accessed
        offset: usize,
        /// Size of the mapped window
        limit: usize,
    },

    /// A bounded poll never saw its target state
    #[error("Hardware timeout: {what} not ready after {polls} polls")]
    HardwareTimeout {
        /// What was being waited on
        what: String,
        /// Number of polls made
        polls: usize,
    },

    /// An FPGA load used every attempt it was given
    #[error("fpga-{fpga} {stage} failure after {attempts} attempts")]
    FirmwareLoadFailure {
        /// FPGA target name
        fpga: String,
        /// Attempts made
        attempts: usize,
        /// Stage of the last failed attempt
        stage: LoadStage,
    },

    /// Malformed image, unsupported board, or inconsistent layout
    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration {
        /// Reason for failure
        reason: String,
    },

    /// Value outside what the hardware accepts
    #[error("Invalid value: {reason}")]
    InvalidValue {
        /// Reason for failure
        reason: String,
    },

    /// Item accessor not supported by the concrete fixture
    #[error("Invalid fixture op: {item}")]
    InvalidItem {
        /// Item or operation name
        item: String,
    },

    /// Module initialisation step failed
    #[error("Module initialize failure: {reason}")]
    ModuleInitialize {
        /// Reason for failure
        reason: String,
    },

    /// Operation needs a fixture tree and the module has none
    #[error("Module has no fixtures")]
    NoFixture,
}

impl PixieError {
    /// Create a device not found error
    pub fn device_not_found(path: impl Into<PathBuf>) -> Self {
        Self::DeviceNotFound { path: path.into() }
    }

    /// Create a hardware timeout error
    pub fn hardware_timeout(what: impl Into<String>, polls: usize) -> Self {
        Self::HardwareTimeout {
            what: what.into(),
            polls,
        }
    }

    /// Create a firmware load failure
    pub fn firmware_load_failure(fpga: impl Into<String>, attempts: usize, stage: LoadStage) -> Self {
        Self::FirmwareLoadFailure {
            fpga: fpga.into(),
            attempts,
            stage,
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_configuration(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            reason: reason.into(),
        }
    }

    /// Create an invalid value error
    pub fn invalid_value(reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            reason: reason.into(),
        }
    }

    /// Create an invalid item error
    pub fn invalid_item(item: impl Into<String>) -> Self {
        Self::InvalidItem { item: item.into() }
    }

    /// Create a module initialize error
    pub fn module_initialize(reason: impl Into<String>) -> Self {
        Self::ModuleInitialize {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_failure_names_fpga_and_attempts() {
        let err = PixieError::firmware_load_failure("fippi-1-2", 10, LoadStage::Programming);
        assert_eq!(err.to_string(), "fpga-fippi-1-2 programming failure after 10 attempts");
    }

    #[test]
    fn timeout_message() {
        let err = PixieError::hardware_timeout("csr: EXT FIFO", 1000);
        assert_eq!(err.to_string(), "Hardware timeout: csr: EXT FIFO not ready after 1000 polls");
    }
}
