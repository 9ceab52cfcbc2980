use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_overlap, validate_interval};
use super::{Engine, EngineError};

/// Fields of a slot edit. `None` keeps the current value.
#[derive(Debug, Clone, Default)]
pub struct SlotPatch {
    pub weekday: Option<Weekday>,
    pub start: Option<TimeOfDay>,
    pub end: Option<TimeOfDay>,
    pub capacity: Option<u32>,
}

impl Engine {
    pub async fn create_slot(
        &self,
        id: Ulid,
        provider: Ulid,
        weekday: Weekday,
        start: TimeOfDay,
        end: TimeOfDay,
        capacity: u32,
    ) -> Result<TimeSlot, EngineError> {
        metrics::counter!(crate::observability::OPS_TOTAL, "op" => "create_slot").increment(1);
        validate_interval(start, end)?;
        if capacity == 0 {
            return Err(EngineError::Validation("capacity must be at least 1"));
        }
        if capacity > MAX_SLOT_CAPACITY {
            return Err(EngineError::LimitExceeded("slot capacity too large"));
        }

        let book = self.book_or_create(provider);
        let mut guard = book.write().await;
        if guard.slots.len() >= MAX_SLOTS_PER_PROVIDER {
            return Err(EngineError::LimitExceeded("too many slots for provider"));
        }
        if guard.slots.contains_key(&id) {
            return Err(EngineError::Conflict(id));
        }
        check_no_overlap(&guard, weekday, start, end, None)?;

        let event = Event::SlotCreated {
            id,
            provider,
            weekday,
            start,
            end,
            capacity,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(guard.slots[&id].clone())
    }

    pub async fn update_slot(
        &self,
        id: Ulid,
        requester_provider: Ulid,
        patch: SlotPatch,
    ) -> Result<TimeSlot, EngineError> {
        metrics::counter!(crate::observability::OPS_TOTAL, "op" => "update_slot").increment(1);
        let (provider, mut guard) = self.resolve_slot_write(&id).await?;
        if provider != requester_provider {
            return Err(EngineError::Authorization(id));
        }
        let current = guard.slots.get(&id).ok_or(EngineError::NotFound(id))?;

        let weekday = patch.weekday.unwrap_or(current.weekday);
        let start = patch.start.unwrap_or(current.start);
        let end = patch.end.unwrap_or(current.end);
        let capacity = patch.capacity.unwrap_or(current.capacity);

        validate_interval(start, end)?;
        if capacity == 0 {
            return Err(EngineError::Validation("capacity must be at least 1"));
        }
        if capacity > MAX_SLOT_CAPACITY {
            return Err(EngineError::LimitExceeded("slot capacity too large"));
        }
        // Re-run the overlap rule against all *other* slots.
        check_no_overlap(&guard, weekday, start, end, Some(id))?;

        let event = Event::SlotUpdated {
            id,
            provider,
            weekday,
            start,
            end,
            capacity,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(guard.slots[&id].clone())
    }

    /// Ownership-checked hard delete. Does not cascade to bound appointments:
    /// an appointment left pointing at a deleted slot simply fails with
    /// NotFound if it is later accepted.
    pub async fn delete_slot(&self, id: Ulid, requester_provider: Ulid) -> Result<(), EngineError> {
        metrics::counter!(crate::observability::OPS_TOTAL, "op" => "delete_slot").increment(1);
        let (provider, mut guard) = self.resolve_slot_write(&id).await?;
        if provider != requester_provider {
            return Err(EngineError::Authorization(id));
        }

        let event = Event::SlotDeleted { id, provider };
        self.persist_and_apply(&mut guard, &event).await
    }
}
