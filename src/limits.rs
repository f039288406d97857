//! Hard bounds on input sizes. Exceeding any of them is `EngineError::LimitExceeded`.

/// One year.
pub const MAX_DURATION_MINUTES: i64 = 366 * 24 * 60;

/// 1970-01-01T00:00:00Z, in unix seconds.
pub const MIN_VALID_TIMESTAMP_SECS: i64 = 0;

/// 9999-12-31T23:59:59Z, in unix seconds.
pub const MAX_VALID_TIMESTAMP_SECS: i64 = 253_402_300_799;

pub const MAX_RESERVATIONS_PER_DEVICE: usize = 100_000;

/// Largest WAL payload accepted on write or replay. A length prefix above it
/// is read as a torn tail.
pub const MAX_WAL_RECORD_BYTES: usize = 64 * 1024;
