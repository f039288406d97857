use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::model::*;

use super::SharedSchedule;

/// Per-device schedules plus a reservation → device index.
///
/// The schedule lock is the unit of consistency: a reader sees a whole device
/// at one point in time, and a writer that checks and then mutates under the
/// same guard cannot interleave with another writer on that device.
pub struct ReservationStore {
    devices: DashMap<DeviceId, SharedSchedule>,
    reservation_to_device: DashMap<ReservationId, DeviceId>,
}

impl Default for ReservationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ReservationStore {
    pub fn new() -> Self {
        Self {
            devices: DashMap::new(),
            reservation_to_device: DashMap::new(),
        }
    }

    // ── Devices ──────────────────────────────────────────────

    pub fn get_schedule(&self, device_id: DeviceId) -> Option<SharedSchedule> {
        self.devices.get(&device_id).map(|e| e.value().clone())
    }

    pub fn get_or_create_schedule(&self, device_id: DeviceId) -> SharedSchedule {
        self.devices
            .entry(device_id)
            .or_insert_with(|| Arc::new(RwLock::new(DeviceSchedule::new(device_id))))
            .value()
            .clone()
    }

    pub fn device_ids(&self) -> Vec<DeviceId> {
        let mut ids: Vec<DeviceId> = self.devices.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    // ── Reservation index ────────────────────────────────────

    pub fn device_for_reservation(&self, id: &ReservationId) -> Option<DeviceId> {
        self.reservation_to_device.get(id).map(|e| *e.value())
    }

    pub fn reservation_count(&self) -> usize {
        self.reservation_to_device.len()
    }

    // ── Query contract ───────────────────────────────────────

    /// Every reservation on `device_id` with `start < span.end && end > span.start`,
    /// except `exclude`. Unknown devices have no reservations.
    pub async fn find_overlapping(
        &self,
        device_id: DeviceId,
        span: &Span,
        exclude: Option<ReservationId>,
    ) -> Vec<Reservation> {
        match self.get_schedule(device_id) {
            Some(schedule) => schedule.read().await.find_overlapping(span, exclude),
            None => Vec::new(),
        }
    }

    // ── Event application ────────────────────────────────────

    /// Apply an event to a schedule (no locking; caller holds the write lock).
    pub fn apply_event(&self, schedule: &mut DeviceSchedule, event: &Event) {
        match event {
            Event::ReservationCreated { reservation } => {
                schedule.insert(reservation.clone());
                self.reservation_to_device
                    .insert(reservation.id, reservation.device_id);
            }
            Event::ReservationUpdated {
                id,
                span,
                updated_at,
                ..
            } => {
                if let Some(mut reservation) = schedule.remove(*id) {
                    reservation.span = *span;
                    reservation.updated_at = *updated_at;
                    schedule.insert(reservation);
                }
            }
            Event::ReservationDeleted { id, .. } => {
                schedule.remove(*id);
                self.reservation_to_device.remove(id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use ulid::Ulid;

    fn created(device_id: DeviceId, hour: u32) -> Reservation {
        let start = Utc.with_ymd_and_hms(2024, 3, 4, hour, 0, 0).unwrap();
        Reservation {
            id: Ulid::new(),
            device_id,
            user_id: 1,
            test_id: 1,
            span: Span::from_minutes(start, 60).unwrap(),
            created_at: start,
            updated_at: start,
        }
    }

    #[tokio::test]
    async fn apply_create_update_delete() {
        let store = ReservationStore::new();
        let r = created(7, 9);
        let id = r.id;
        let schedule = store.get_or_create_schedule(7);
        let mut guard = schedule.write().await;

        store.apply_event(&mut guard, &Event::ReservationCreated { reservation: r.clone() });
        assert_eq!(store.device_for_reservation(&id), Some(7));
        assert_eq!(store.reservation_count(), 1);

        let moved = created(7, 14).span;
        store.apply_event(
            &mut guard,
            &Event::ReservationUpdated { id, device_id: 7, span: moved, updated_at: moved.start },
        );
        assert_eq!(guard.get(id).map(|r| r.span), Some(moved));

        store.apply_event(&mut guard, &Event::ReservationDeleted { id, device_id: 7 });
        assert!(guard.is_empty());
        assert_eq!(store.device_for_reservation(&id), None);
    }

    #[tokio::test]
    async fn find_overlapping_unknown_device_is_empty() {
        let store = ReservationStore::new();
        let span = created(1, 9).span;
        assert!(store.find_overlapping(99, &span, None).await.is_empty());
    }

    #[tokio::test]
    async fn find_overlapping_is_per_device() {
        let store = ReservationStore::new();
        for device_id in [1, 2] {
            let schedule = store.get_or_create_schedule(device_id);
            let mut guard = schedule.write().await;
            store.apply_event(
                &mut guard,
                &Event::ReservationCreated { reservation: created(device_id, 9) },
            );
        }
        let span = created(1, 9).span;
        let hits = store.find_overlapping(1, &span, None).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].device_id, 1);
        assert_eq!(store.device_ids(), vec![1, 2]);
    }
}
