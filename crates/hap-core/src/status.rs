//! Per-characteristic HAP status codes.
//!
//! These appear as the integer `status` member of characteristic objects in
//! `/characteristics` responses. `0` is success; everything else is one of
//! the negative codes defined by the protocol.

use serde::{Deserialize, Serialize};

/// Status of a single characteristic operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum HapStatus {
    Success,
    NotPermitted,
    ResourceBusy,
    CannotNow,
    OutOfResources,
    OperationTimedOut,
    ResourceDoesNotExist,
    InvalidValue,
    InsufficientAuthorization,
    InvalidPreparedWriteId,
}

impl HapStatus {
    /// The wire integer for this status.
    pub fn code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::NotPermitted => -70401,
            Self::ResourceBusy => -70402,
            Self::CannotNow => -70403,
            Self::OutOfResources => -70404,
            Self::OperationTimedOut => -70405,
            Self::ResourceDoesNotExist => -70406,
            Self::InvalidValue => -70407,
            Self::InsufficientAuthorization => -70408,
            Self::InvalidPreparedWriteId => -70410,
        }
    }

    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

impl From<HapStatus> for i32 {
    fn from(status: HapStatus) -> Self {
        status.code()
    }
}

impl TryFrom<i32> for HapStatus {
    type Error = String;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Success),
            -70401 => Ok(Self::NotPermitted),
            -70402 => Ok(Self::ResourceBusy),
            -70403 => Ok(Self::CannotNow),
            -70404 => Ok(Self::OutOfResources),
            -70405 => Ok(Self::OperationTimedOut),
            -70406 => Ok(Self::ResourceDoesNotExist),
            -70407 => Ok(Self::InvalidValue),
            -70408 => Ok(Self::InsufficientAuthorization),
            -70410 => Ok(Self::InvalidPreparedWriteId),
            other => Err(format!("unknown HAP status code {other}")),
        }
    }
}
