use std::collections::HashSet;
use std::time::Instant;

use crate::model::*;
use crate::observability::{record_operation, Operation};

use super::conflict::{self, ConflictCheck};
use super::{Engine, EngineError};

impl Engine {
    pub async fn get(&self, id: ReservationId) -> Result<Reservation, EngineError> {
        let started = Instant::now();
        let result = self.get_inner(id).await;
        record_operation(Operation::Get, started, &result);
        result
    }

    async fn get_inner(&self, id: ReservationId) -> Result<Reservation, EngineError> {
        let schedule = self
            .store
            .device_for_reservation(&id)
            .and_then(|device_id| self.store.get_schedule(device_id))
            .ok_or(EngineError::NotFound(id))?;
        let guard = schedule.read().await;
        guard.get(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Every reservation matching all set filters, ordered by `(start_time, id)`.
    pub async fn list(&self, filter: &ReservationFilter) -> Result<Vec<Reservation>, EngineError> {
        let started = Instant::now();
        let result = self.list_inner(filter).await;
        record_operation(Operation::List, started, &result);
        result
    }

    async fn list_inner(&self, filter: &ReservationFilter) -> Result<Vec<Reservation>, EngineError> {
        filter.validate()?;

        let group_tests: Option<HashSet<TestId>> = match filter.group_id {
            Some(group_id) => Some(
                self.directory
                    .tests_in_group(group_id)
                    .await
                    .map_err(|e| EngineError::Directory(e.to_string()))?
                    .into_iter()
                    .collect(),
            ),
            None => None,
        };
        if group_tests.as_ref().is_some_and(HashSet::is_empty) {
            return Ok(Vec::new());
        }

        let device_ids = match filter.device_id {
            Some(device_id) => vec![device_id],
            None => self.store.device_ids(),
        };

        let mut out = Vec::new();
        for device_id in device_ids {
            let Some(schedule) = self.store.get_schedule(device_id) else {
                continue;
            };
            let guard = schedule.read().await;
            // Sorted by start: skip everything before `from_time`.
            let first = match filter.from_time {
                Some(from) => guard.reservations.partition_point(|r| r.span.start < from),
                None => 0,
            };
            out.extend(
                guard.reservations[first..]
                    .iter()
                    .take_while(|r| filter.to_time.is_none_or(|to| r.span.start <= to))
                    .filter(|r| filter.matches(r))
                    .filter(|r| group_tests.as_ref().is_none_or(|t| t.contains(&r.test_id)))
                    .cloned(),
            );
        }
        out.sort_by_key(|r| (r.span.start, r.id));
        Ok(out)
    }

    /// Would `[start_time, start_time + duration_minutes)` collide on `device_id`?
    pub async fn check_conflict(
        &self,
        device_id: DeviceId,
        start_time: Timestamp,
        duration_minutes: i64,
        exclude: Option<ReservationId>,
    ) -> Result<ConflictCheck, EngineError> {
        let started = Instant::now();
        let result = match self.store.get_schedule(device_id) {
            Some(schedule) => {
                let guard = schedule.read().await;
                conflict::check(&guard, start_time, duration_minutes, exclude)
            }
            None => conflict::check_empty(start_time, duration_minutes),
        };
        record_operation(Operation::CheckConflict, started, &result);
        result
    }

    /// One device's reservations in start order.
    pub async fn device_reservations(&self, device_id: DeviceId) -> Vec<Reservation> {
        match self.store.get_schedule(device_id) {
            Some(schedule) => schedule.read().await.reservations.clone(),
            None => Vec::new(),
        }
    }

    pub fn reservation_count(&self) -> usize {
        self.store.reservation_count()
    }
}
