use chrono::{DateTime, Utc};
use rand::RngCore;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::broadcast::{LiveEvent, LiveUpdateBus, Subscription};
use crate::clock::Clock;

use super::record::{
    validate_assignee, validate_image_path, validate_location, validate_message, AlertError,
    AlertOrigin, AlertRecord, AlertRef, AlertStatus, AlertUpdate, NewAlert,
    DEFAULT_ALERT_MESSAGE, DEFAULT_LOCATION,
};

/// Ordered in-memory alert list shared by the loop and request handlers.
///
/// One mutex guards the list and the id sequence. Events are published while
/// it is held, so a subscriber's snapshot and its later events never overlap
/// or leave gaps.
pub struct AlertStore {
    records: Mutex<Vec<AlertRecord>>,
    bus: LiveUpdateBus,
    clock: Arc<dyn Clock>,
}

impl AlertStore {
    pub fn new(bus: LiveUpdateBus, clock: Arc<dyn Clock>) -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            bus,
            clock,
        }
    }

    /// Append a detection alert stamped `at` and publish `alert`.
    pub fn create_alert(
        &self,
        message: &str,
        location: &str,
        at: DateTime<Utc>,
    ) -> Result<AlertRecord, AlertError> {
        validate_message(message)?;
        validate_location(location)?;

        let mut records = self.lock()?;
        let record = AlertRecord {
            id: records.len() as u64 + 1,
            uid: generate_uid(),
            timestamp: at,
            message: message.to_string(),
            location: location.to_string(),
            status: AlertStatus::Pending,
            origin: AlertOrigin::Detection,
            assigned_to: None,
            image_path: None,
            is_rural: None,
        };
        records.push(record.clone());
        self.bus.publish(LiveEvent::Alert(record.clone()));
        Ok(record)
    }

    /// Append a manual report stamped now and publish `new_alert`.
    pub fn create_manual_alert(&self, new: NewAlert) -> Result<AlertRecord, AlertError> {
        let message = new
            .message
            .unwrap_or_else(|| DEFAULT_ALERT_MESSAGE.to_string());
        let location = new.location.unwrap_or_else(|| DEFAULT_LOCATION.to_string());
        validate_message(&message)?;
        validate_location(&location)?;
        if let Some(assignee) = &new.assigned_to {
            validate_assignee(assignee)?;
        }
        if let Some(path) = &new.image_path {
            validate_image_path(path)?;
        }

        let mut records = self.lock()?;
        let record = AlertRecord {
            id: records.len() as u64 + 1,
            uid: generate_uid(),
            timestamp: self.clock.now(),
            message,
            location,
            status: AlertStatus::Pending,
            origin: AlertOrigin::Manual,
            assigned_to: new.assigned_to,
            image_path: new.image_path,
            is_rural: new.is_rural,
        };
        records.push(record.clone());
        self.bus.publish(LiveEvent::NewAlert(record.clone()));
        Ok(record)
    }

    /// Apply the present fields of `update` and publish `alert_update`.
    ///
    /// An update with no fields still publishes the unchanged record. An
    /// unknown reference changes nothing and publishes nothing.
    pub fn update_status(
        &self,
        alert: &AlertRef,
        update: AlertUpdate,
    ) -> Result<AlertRecord, AlertError> {
        if let Some(assignee) = &update.assigned_to {
            validate_assignee(assignee)?;
        }

        let mut records = self.lock()?;
        let record = records
            .iter_mut()
            .find(|r| matches_ref(r, alert))
            .ok_or_else(|| AlertError::NotFound(alert.clone()))?;
        if let Some(status) = update.status {
            record.status = status;
        }
        if let Some(assignee) = update.assigned_to {
            record.assigned_to = Some(assignee);
        }
        let updated = record.clone();
        self.bus.publish(LiveEvent::AlertUpdate(updated.clone()));
        Ok(updated)
    }

    /// All alerts in creation order.
    pub fn list(&self) -> Vec<AlertRecord> {
        self.records
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn get(&self, alert: &AlertRef) -> Option<AlertRecord> {
        self.records
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .find(|r| matches_ref(r, alert))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Subscribe to live events, starting with an `alerts` snapshot.
    pub fn subscribe(&self) -> Subscription {
        let records = self.records.lock().unwrap_or_else(|p| p.into_inner());
        self.bus.subscribe_with_snapshot(records.clone())
    }

    pub fn bus(&self) -> &LiveUpdateBus {
        &self.bus
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<AlertRecord>>, AlertError> {
        self.records
            .lock()
            .map_err(|_| AlertError::Unavailable("alert store lock poisoned".to_string()))
    }
}

fn matches_ref(record: &AlertRecord, alert: &AlertRef) -> bool {
    match alert {
        AlertRef::Seq(id) => record.id == *id,
        AlertRef::Uid(uid) => record.uid == *uid,
    }
}

fn generate_uid() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    fn store() -> AlertStore {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        AlertStore::new(LiveUpdateBus::new(), Arc::new(ManualClock::new(start)))
    }

    fn auto(store: &AlertStore) -> AlertRecord {
        store
            .create_alert(DEFAULT_ALERT_MESSAGE, DEFAULT_LOCATION, Utc::now())
            .unwrap()
    }

    #[test]
    fn ids_count_up_from_one() {
        let store = store();
        let ids: Vec<u64> = (0..3).map(|_| auto(&store).id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(store.len(), 3);

        let uids: std::collections::HashSet<String> =
            store.list().into_iter().map(|r| r.uid).collect();
        assert_eq!(uids.len(), 3);
    }

    #[test]
    fn new_alerts_are_pending_and_broadcast() {
        let store = store();
        let sub = store.bus().subscribe();
        let record = auto(&store);
        assert_eq!(record.status, AlertStatus::Pending);
        assert_eq!(record.origin, AlertOrigin::Detection);
        assert_eq!(sub.drain(), vec![LiveEvent::Alert(record)]);
    }

    #[test]
    fn update_touches_only_requested_fields() -> Result<(), AlertError> {
        let store = store();
        let before = auto(&store);
        let sub = store.bus().subscribe();

        let after = store.update_status(&AlertRef::Seq(1), AlertUpdate::status(AlertStatus::Resolved))?;
        assert_eq!(after.status, AlertStatus::Resolved);
        assert_eq!(
            AlertRecord {
                status: AlertStatus::Resolved,
                ..before.clone()
            },
            after
        );

        let assigned = store.update_status(
            &AlertRef::Uid(before.uid.clone()),
            AlertUpdate {
                status: None,
                assigned_to: Some("crew 2".to_string()),
            },
        )?;
        assert_eq!(assigned.status, AlertStatus::Resolved);
        assert_eq!(assigned.assigned_to.as_deref(), Some("crew 2"));

        let names: Vec<&str> = sub.drain().iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["alert_update", "alert_update"]);
        Ok(())
    }

    #[test]
    fn empty_update_returns_record_unchanged() -> Result<(), AlertError> {
        let store = store();
        let before = auto(&store);
        let sub = store.bus().subscribe();

        let after = store.update_status(&AlertRef::Seq(1), AlertUpdate::default())?;
        assert_eq!(after, before);
        assert_eq!(store.list(), vec![before.clone()]);
        assert_eq!(sub.drain(), vec![LiveEvent::AlertUpdate(before)]);
        Ok(())
    }

    #[test]
    fn concurrent_creates_get_gap_free_ids() {
        const THREADS: u64 = 4;
        const PER_THREAD: u64 = 25;
        let store = store();
        let sub = store.bus().subscribe();

        std::thread::scope(|scope| {
            for worker in 0..THREADS {
                let store = &store;
                scope.spawn(move || {
                    for i in 0..PER_THREAD {
                        if (worker + i) % 2 == 0 {
                            auto(store);
                        } else {
                            store.create_manual_alert(NewAlert::default()).unwrap();
                        }
                    }
                });
            }
        });

        let total = THREADS * PER_THREAD;
        let listed: Vec<u64> = store.list().iter().map(|r| r.id).collect();
        assert_eq!(listed, (1..=total).collect::<Vec<u64>>());

        let published: Vec<u64> = sub
            .drain()
            .iter()
            .map(|event| match event {
                LiveEvent::Alert(record) | LiveEvent::NewAlert(record) => record.id,
                other => panic!("unexpected {}", other.name()),
            })
            .collect();
        assert_eq!(published, listed);

        let manual = store
            .list()
            .iter()
            .filter(|r| r.origin == AlertOrigin::Manual)
            .count() as u64;
        assert_eq!(manual, total / 2);
    }

    #[test]
    fn unknown_alert_is_not_found_and_silent() {
        let store = store();
        auto(&store);
        let before = store.list();
        let sub = store.bus().subscribe();

        let err = store
            .update_status(&AlertRef::Seq(42), AlertUpdate::status(AlertStatus::Resolved))
            .unwrap_err();
        assert_eq!(err, AlertError::NotFound(AlertRef::Seq(42)));
        assert_eq!(store.list(), before);
        assert!(sub.drain().is_empty());
    }

    #[test]
    fn manual_alerts_use_clock_and_validate() -> Result<(), AlertError> {
        let store = store();
        let record = store.create_manual_alert(NewAlert {
            message: Some("Overflowing bin near gate".to_string()),
            location: Some("Rural road 9".to_string()),
            image_path: Some("uploads/bin.jpg".to_string()),
            is_rural: Some(true),
            ..NewAlert::default()
        })?;
        assert_eq!(record.origin, AlertOrigin::Manual);
        assert_eq!(record.display_timestamp(), "2024-05-01 12:00:00");
        assert_eq!(record.is_rural, Some(true));

        let bad = store.create_manual_alert(NewAlert {
            location: Some("<b>".to_string()),
            ..NewAlert::default()
        });
        assert!(matches!(bad, Err(AlertError::Invalid(_))));
        assert_eq!(store.len(), 1);
        Ok(())
    }

    #[test]
    fn subscribe_starts_with_snapshot() {
        let store = store();
        auto(&store);
        auto(&store);
        let sub = store.subscribe();
        auto(&store);

        let events = sub.drain();
        match &events[0] {
            LiveEvent::Alerts(list) => assert_eq!(list.len(), 2),
            other => panic!("expected snapshot, got {}", other.name()),
        }
        assert_eq!(events[1].name(), "alert");
        assert_eq!(events.len(), 2);
    }
}
