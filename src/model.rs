use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::EngineError;

pub type ReservationId = Ulid;
pub type DeviceId = i64;
pub type UserId = i64;
pub type TestId = i64;
pub type GroupId = i64;

/// Every instant is stored in UTC.
pub type Timestamp = DateTime<Utc>;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl Span {
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Span of `minutes` starting at `start`. `None` if the end is not representable.
    pub fn from_minutes(start: Timestamp, minutes: i64) -> Option<Self> {
        let delta = TimeDelta::try_minutes(minutes)?;
        let end = start.checked_add_signed(delta)?;
        (start < end).then_some(Self { start, end })
    }

    pub fn duration(&self) -> TimeDelta {
        self.end - self.start
    }

    /// Whole minutes; reservations are always built from whole minutes.
    pub fn duration_minutes(&self) -> i64 {
        self.duration().num_minutes()
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Timestamp) -> bool {
        self.start <= t && t < self.end
    }
}

/// A booked device interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub device_id: DeviceId,
    pub user_id: UserId,
    pub test_id: TestId,
    pub span: Span,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Reservation {
    pub fn start_time(&self) -> Timestamp {
        self.span.start
    }

    pub fn end_time(&self) -> Timestamp {
        self.span.end
    }

    pub fn duration_minutes(&self) -> i64 {
        self.span.duration_minutes()
    }

    pub fn to_record(&self) -> ReservationRecord {
        ReservationRecord {
            id: self.id.to_string(),
            device_id: self.device_id,
            user_id: self.user_id,
            test_id: self.test_id,
            start_time: self.span.start.to_rfc3339(),
            end_time: self.span.end.to_rfc3339(),
            duration: self.span.duration().num_seconds() as f64 / 60.0,
            created_at: self.created_at.to_rfc3339(),
            updated_at: self.updated_at.to_rfc3339(),
        }
    }
}

/// Serialized shape handed to API consumers. `duration` is in minutes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReservationRecord {
    pub id: String,
    pub device_id: DeviceId,
    pub user_id: UserId,
    pub test_id: TestId,
    pub start_time: String,
    pub end_time: String,
    pub duration: f64,
    pub created_at: String,
    pub updated_at: String,
}

/// All reservations of one device, sorted by `span.start`.
#[derive(Debug, Clone)]
pub struct DeviceSchedule {
    pub device_id: DeviceId,
    pub reservations: Vec<Reservation>,
}

impl DeviceSchedule {
    pub fn new(device_id: DeviceId) -> Self {
        Self {
            device_id,
            reservations: Vec::new(),
        }
    }

    /// Insert maintaining sort order by span.start.
    pub fn insert(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .binary_search_by_key(&reservation.span.start, |r| r.span.start)
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove(&mut self, id: ReservationId) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    pub fn get(&self, id: ReservationId) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    /// Reservations whose span overlaps the query window.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.span.start < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.span.end > query.start)
    }

    /// The interval store query: overlap with `query`, minus `exclude`.
    pub fn find_overlapping(&self, query: &Span, exclude: Option<ReservationId>) -> Vec<Reservation> {
        self.overlapping(query)
            .filter(|r| Some(r.id) != exclude)
            .cloned()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.reservations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.reservations.len()
    }
}

/// WAL record format. Flat, one variant per mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ReservationCreated {
        reservation: Reservation,
    },
    ReservationUpdated {
        id: ReservationId,
        device_id: DeviceId,
        span: Span,
        updated_at: Timestamp,
    },
    ReservationDeleted {
        id: ReservationId,
        device_id: DeviceId,
    },
}

impl Event {
    pub fn device_id(&self) -> DeviceId {
        match self {
            Event::ReservationCreated { reservation } => reservation.device_id,
            Event::ReservationUpdated { device_id, .. }
            | Event::ReservationDeleted { device_id, .. } => *device_id,
        }
    }
}

/// Partial update. Absent fields keep their current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReservationPatch {
    pub start_time: Option<Timestamp>,
    pub duration_minutes: Option<i64>,
}

impl ReservationPatch {
    pub fn is_empty(&self) -> bool {
        self.start_time.is_none() && self.duration_minutes.is_none()
    }
}

/// List filters, combined with AND. `from_time`/`to_time` bound `start_time` inclusively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationFilter {
    pub device_id: Option<DeviceId>,
    pub user_id: Option<UserId>,
    pub test_id: Option<TestId>,
    pub from_time: Option<Timestamp>,
    pub to_time: Option<Timestamp>,
    pub group_id: Option<GroupId>,
}

impl ReservationFilter {
    pub fn device(device_id: DeviceId) -> Self {
        Self {
            device_id: Some(device_id),
            ..Self::default()
        }
    }

    /// Build a filter from raw query-string pairs. Unknown keys are ignored,
    /// empty values count as absent.
    pub fn from_query_pairs<'a, I>(pairs: I) -> Result<Self, EngineError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut filter = Self::default();
        for (key, value) in pairs {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            match key {
                "device_id" => filter.device_id = Some(parse_id(key, value)?),
                "user_id" => filter.user_id = Some(parse_id(key, value)?),
                "test_id" => filter.test_id = Some(parse_id(key, value)?),
                "group_id" => filter.group_id = Some(parse_id(key, value)?),
                "from_time" => filter.from_time = Some(parse_timestamp(value)?),
                "to_time" => filter.to_time = Some(parse_timestamp(value)?),
                _ => {}
            }
        }
        filter.validate()?;
        Ok(filter)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if let (Some(from), Some(to)) = (self.from_time, self.to_time)
            && from > to
        {
            return Err(EngineError::Validation(format!(
                "from_time {} is after to_time {}",
                from.to_rfc3339(),
                to.to_rfc3339()
            )));
        }
        Ok(())
    }

    /// Every filter except `group_id`, which needs the test directory.
    pub fn matches(&self, r: &Reservation) -> bool {
        self.device_id.is_none_or(|d| r.device_id == d)
            && self.user_id.is_none_or(|u| r.user_id == u)
            && self.test_id.is_none_or(|t| r.test_id == t)
            && self.from_time.is_none_or(|from| r.span.start >= from)
            && self.to_time.is_none_or(|to| r.span.start <= to)
    }
}

fn parse_id(key: &str, value: &str) -> Result<i64, EngineError> {
    value
        .parse()
        .map_err(|_| EngineError::Validation(format!("{key}: expected an integer, got {value:?}")))
}

/// Parse an ISO-8601 timestamp. Offsets are normalized to UTC; a timestamp
/// without an offset is taken as UTC.
pub fn parse_timestamp(s: &str) -> Result<Timestamp, EngineError> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(naive.and_utc());
        }
    }
    Err(EngineError::Validation(format!("invalid ISO-8601 timestamp: {s:?}")))
}
