//! Human readable byte sizes (`100kb`, `1mb`, `512`)

use crate::ConfigError;

const KB: usize = 1024;

/// Parse a size such as `100kb` into bytes. Units are binary (1kb = 1024).
pub fn parse_byte_size(field: &str, raw: &str) -> Result<usize, ConfigError> {
    let value = raw.trim().to_ascii_lowercase();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, unit) = value.split_at(split);

    if digits.is_empty() {
        return Err(ConfigError::invalid(field, format!("'{}' is not a byte size", raw)));
    }

    let amount: usize = digits
        .parse()
        .map_err(|_| ConfigError::invalid(field, format!("'{}' is out of range", raw)))?;

    let multiplier = match unit.trim() {
        "" | "b" => 1,
        "kb" | "k" => KB,
        "mb" | "m" => KB * KB,
        "gb" | "g" => KB * KB * KB,
        other => {
            return Err(ConfigError::invalid(field, format!("unknown size unit '{}'", other)));
        }
    };

    amount
        .checked_mul(multiplier)
        .ok_or_else(|| ConfigError::invalid(field, format!("'{}' is out of range", raw)))
}
