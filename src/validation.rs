//! Field validators used by [`crate::config::CaptureConfig::validate`].
//!
//! Each validator takes the dotted name of the configuration field it checks so the
//! resulting message points straight at the offending key.

use std::net::IpAddr;
use std::ops::RangeInclusive;

use crate::error::CaptureError;

fn invalid(field: &str, reason: impl std::fmt::Display) -> CaptureError {
    CaptureError::Configuration(format!("{field}: {reason}"))
}

/// Validates that a TCP port is usable for listening.
///
/// Port 0 asks the OS for an ephemeral port, which a digitizer cannot be told about in
/// advance, so it is only accepted when `allow_ephemeral` is set (tests).
pub fn is_valid_port(field: &str, port: u16, allow_ephemeral: bool) -> Result<(), CaptureError> {
    if port > 0 || allow_ephemeral {
        Ok(())
    } else {
        Err(invalid(field, "port number must be greater than 0"))
    }
}

/// Validates that a string is an IPv4 or IPv6 address.
pub fn is_valid_ip(field: &str, ip: &str) -> Result<(), CaptureError> {
    ip.parse::<IpAddr>()
        .map(|_| ())
        .map_err(|_| invalid(field, format!("'{ip}' is not a valid IP address")))
}

/// Validates that a string can be used as a file system path.
pub fn is_valid_path(field: &str, path: &str) -> Result<(), CaptureError> {
    if path.is_empty() {
        return Err(invalid(field, "path cannot be empty"));
    }
    if path.contains('\0') {
        return Err(invalid(field, "path cannot contain null bytes"));
    }
    Ok(())
}

/// Validates that a value lies within an inclusive range.
pub fn is_in_range<T>(field: &str, value: T, range: RangeInclusive<T>) -> Result<(), CaptureError>
where
    T: PartialOrd + std::fmt::Debug,
{
    if range.contains(&value) {
        Ok(())
    } else {
        Err(invalid(
            field,
            format!(
                "{value:?} is outside {:?}..={:?}",
                range.start(),
                range.end()
            ),
        ))
    }
}

/// Validates that a string is not empty.
pub fn is_not_empty(field: &str, value: &str) -> Result<(), CaptureError> {
    if value.trim().is_empty() {
        Err(invalid(field, "value cannot be empty"))
    } else {
        Ok(())
    }
}

/// Validates that a string is one of an allowed set of names.
pub fn is_one_of(field: &str, value: &str, allowed: &[&str]) -> Result<(), CaptureError> {
    if allowed.contains(&value) {
        Ok(())
    } else {
        Err(invalid(
            field,
            format!("'{value}' must be one of: {}", allowed.join(", ")),
        ))
    }
}
