use std::time::Instant;

use chrono::Utc;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{self, record_operation, Operation};

use super::conflict::{candidate_span, ensure_free};
use super::{Engine, EngineError, WalCommand};

impl Engine {
    /// Reserve `device_id` for `[start_time, start_time + duration_minutes)`.
    pub async fn create(
        &self,
        device_id: DeviceId,
        user_id: UserId,
        test_id: TestId,
        start_time: Timestamp,
        duration_minutes: i64,
    ) -> Result<Reservation, EngineError> {
        let started = Instant::now();
        let result = self
            .create_inner(device_id, user_id, test_id, start_time, duration_minutes)
            .await;
        record_operation(Operation::Create, started, &result);
        result
    }

    async fn create_inner(
        &self,
        device_id: DeviceId,
        user_id: UserId,
        test_id: TestId,
        start_time: Timestamp,
        duration_minutes: i64,
    ) -> Result<Reservation, EngineError> {
        let span = candidate_span(start_time, duration_minutes)?;

        let _gate = self.compaction_gate.read().await;
        let schedule = self.store.get_or_create_schedule(device_id);
        // Held through check, WAL append and apply.
        let guard = schedule.write_owned().await;
        if guard.len() >= MAX_RESERVATIONS_PER_DEVICE {
            return Err(EngineError::LimitExceeded("too many reservations on device"));
        }
        if let Err(e) = ensure_free(&guard, &span, None) {
            warn!("create rejected: {e}");
            return Err(e);
        }

        let now = Utc::now();
        let reservation = Reservation {
            id: Ulid::new(),
            device_id,
            user_id,
            test_id,
            span,
            created_at: now,
            updated_at: now,
        };
        let event = Event::ReservationCreated {
            reservation: reservation.clone(),
        };
        self.persist_and_apply(guard, event).await?;
        self.record_active();
        debug!(
            "reservation {} created on device {device_id} [{}, {})",
            reservation.id,
            span.start.to_rfc3339(),
            span.end.to_rfc3339()
        );
        Ok(reservation)
    }

    /// Move or resize a reservation. Absent patch fields keep their value;
    /// the reservation never conflicts with itself.
    pub async fn update(
        &self,
        id: ReservationId,
        patch: ReservationPatch,
    ) -> Result<Reservation, EngineError> {
        let started = Instant::now();
        let result = self.update_inner(id, patch).await;
        record_operation(Operation::Update, started, &result);
        result
    }

    async fn update_inner(
        &self,
        id: ReservationId,
        patch: ReservationPatch,
    ) -> Result<Reservation, EngineError> {
        let _gate = self.compaction_gate.read().await;
        let guard = self.resolve_reservation_write(&id).await?;
        let current = guard.get(id).cloned().ok_or(EngineError::NotFound(id))?;
        if patch.is_empty() {
            return Ok(current);
        }

        let start = patch.start_time.unwrap_or(current.span.start);
        let duration = patch
            .duration_minutes
            .unwrap_or_else(|| current.duration_minutes());
        let span = candidate_span(start, duration)?;
        if let Err(e) = ensure_free(&guard, &span, Some(id)) {
            warn!("update of {id} rejected: {e}");
            return Err(e);
        }

        let event = Event::ReservationUpdated {
            id,
            device_id: current.device_id,
            span,
            updated_at: Utc::now(),
        };
        let guard = self.persist_and_apply(guard, event).await?;
        debug!("reservation {id} moved to [{}, {})", span.start.to_rfc3339(), span.end.to_rfc3339());
        guard.get(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Remove a reservation permanently and return it.
    pub async fn delete(&self, id: ReservationId) -> Result<Reservation, EngineError> {
        let started = Instant::now();
        let result = self.delete_inner(id).await;
        record_operation(Operation::Delete, started, &result);
        result
    }

    async fn delete_inner(&self, id: ReservationId) -> Result<Reservation, EngineError> {
        let _gate = self.compaction_gate.read().await;
        let guard = self.resolve_reservation_write(&id).await?;
        let removed = guard.get(id).cloned().ok_or(EngineError::NotFound(id))?;
        let event = Event::ReservationDeleted {
            id,
            device_id: removed.device_id,
        };
        self.persist_and_apply(guard, event).await?;
        self.record_active();
        debug!("reservation {id} deleted from device {}", removed.device_id);
        Ok(removed)
    }

    /// Delete every reservation held by `user_id`. Returns how many went.
    pub async fn purge_user(&self, user_id: UserId) -> Result<usize, EngineError> {
        let started = Instant::now();
        let result = self.purge_where(|r| r.user_id == user_id).await;
        record_operation(Operation::PurgeUser, started, &result);
        result
    }

    /// Delete every reservation made for `test_id`. Returns how many went.
    pub async fn purge_test(&self, test_id: TestId) -> Result<usize, EngineError> {
        let started = Instant::now();
        let result = self.purge_where(|r| r.test_id == test_id).await;
        record_operation(Operation::PurgeTest, started, &result);
        result
    }

    async fn purge_where(
        &self,
        doomed: impl Fn(&Reservation) -> bool,
    ) -> Result<usize, EngineError> {
        let _gate = self.compaction_gate.read().await;
        let mut purged = 0;
        for device_id in self.store.device_ids() {
            let Some(schedule) = self.store.get_schedule(device_id) else {
                continue;
            };
            let mut guard = schedule.write_owned().await;
            let ids: Vec<ReservationId> = guard
                .reservations
                .iter()
                .filter(|r| doomed(*r))
                .map(|r| r.id)
                .collect();
            for id in ids {
                let event = Event::ReservationDeleted { id, device_id };
                guard = self.persist_and_apply(guard, event).await?;
                purged += 1;
            }
        }
        self.record_active();
        if purged > 0 {
            debug!("purged {purged} reservations");
        }
        Ok(purged)
    }

    /// Rewrite the WAL as one `ReservationCreated` per live reservation.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let started = Instant::now();
        let result = self.compact_wal_inner().await;
        record_operation(Operation::Compact, started, &result);
        result
    }

    async fn compact_wal_inner(&self) -> Result<(), EngineError> {
        // Exclusive: no mutation can append between snapshot and swap.
        let _gate = self.compaction_gate.write().await;

        let mut events = Vec::with_capacity(self.store.reservation_count());
        for device_id in self.store.device_ids() {
            if let Some(schedule) = self.store.get_schedule(device_id) {
                let guard = schedule.read().await;
                events.extend(
                    guard
                        .reservations
                        .iter()
                        .cloned()
                        .map(|reservation| Event::ReservationCreated { reservation }),
                );
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    fn record_active(&self) {
        metrics::gauge!(observability::RESERVATIONS_ACTIVE)
            .set(self.store.reservation_count() as f64);
    }
}
