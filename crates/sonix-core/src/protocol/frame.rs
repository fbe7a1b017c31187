//! Command and response frames.

use std::fmt;

use thiserror::Error;

use super::codec::{pack, unpack};
use super::constants::{EXPECTED_STATUS, REPORT_SIZE};

/// Handshake step a response belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Initialize,
    Prepare,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Initialize => write!(f, "initialize"),
            Step::Prepare => write!(f, "prepare"),
        }
    }
}

/// Which response word disagreed with the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MismatchField {
    Command,
    Status,
}

impl fmt::Display for MismatchField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MismatchField::Command => write!(f, "cmd"),
            MismatchField::Status => write!(f, "status"),
        }
    }
}

/// The bootloader answered with something other than the expected echo.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Failed to {step}: response {field} is {actual:#010x}, expected {expected:#010x}")]
pub struct ProtocolMismatch {
    pub step: Step,
    pub field: MismatchField,
    pub expected: u32,
    pub actual: u32,
}

/// Command word followed by argument words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    command: u32,
    args: Vec<u32>,
}

impl CommandFrame {
    pub fn new(command: u32) -> Self {
        Self {
            command,
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, word: u32) -> Self {
        self.args.push(word);
        self
    }

    pub fn command(&self) -> u32 {
        self.command
    }

    /// Unpadded wire bytes; the transport pads to report size.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut words = Vec::with_capacity(1 + self.args.len());
        words.push(self.command);
        words.extend_from_slice(&self.args);
        pack(&words)
    }
}

/// One full-size report read back from the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    words: Vec<u32>,
}

impl ResponseFrame {
    /// Interpret a report as words. Callers guarantee `REPORT_SIZE` bytes.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() != REPORT_SIZE {
            return None;
        }
        unpack(data).ok().map(|words| Self { words })
    }

    /// Echoed command word.
    pub fn command(&self) -> u32 {
        self.words[0]
    }

    pub fn status(&self) -> u32 {
        self.words[1]
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// Check the echo and status of a handshake response.
    pub fn expect(&self, step: Step, command: u32) -> Result<(), ProtocolMismatch> {
        if self.command() != command {
            return Err(ProtocolMismatch {
                step,
                field: MismatchField::Command,
                expected: command,
                actual: self.command(),
            });
        }
        if self.status() != EXPECTED_STATUS {
            return Err(ProtocolMismatch {
                step,
                field: MismatchField::Status,
                expected: EXPECTED_STATUS,
                actual: self.status(),
            });
        }
        Ok(())
    }
}
