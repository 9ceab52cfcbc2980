use dashmap::mapref::entry::Entry;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::notify::{NotificationIntent, NotificationKind};

use super::{Engine, EngineError};

fn validate_requester(requester: &Requester) -> Result<(), EngineError> {
    if requester.name.trim().is_empty() {
        return Err(EngineError::Validation("requester name is required"));
    }
    if requester.email.trim().is_empty() {
        return Err(EngineError::Validation("requester email is required"));
    }
    let field_lens = [
        Some(requester.name.len()),
        Some(requester.email.len()),
        requester.phone.as_ref().map(String::len),
        requester.major.as_ref().map(String::len),
    ];
    if field_lens.into_iter().flatten().any(|l| l > MAX_FIELD_LEN) {
        return Err(EngineError::LimitExceeded("requester field too long"));
    }
    Ok(())
}

fn intent_for(ap: &Appointment, kind: NotificationKind, provider_name: &str) -> NotificationIntent {
    NotificationIntent {
        appointment: ap.id,
        kind,
        recipient: ap.requester.email.clone(),
        requester_name: ap.requester.name.clone(),
        provider_name: provider_name.to_string(),
        weekday: ap.weekday,
        start: ap.start,
        end: ap.end,
    }
}

impl Engine {
    /// Create a new appointment request against a slot. Status starts at
    /// `pending` and no seat is debited.
    ///
    /// A requester with a student number may hold at most one pending
    /// appointment system-wide; the claim is taken with an atomic
    /// insert-if-absent before anything is written, so two concurrent
    /// creations cannot both slip through.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_appointment(
        &self,
        id: Ulid,
        slot: Ulid,
        requester: Requester,
        kind: RequesterKind,
        education_level: Option<String>,
        notes: Option<String>,
    ) -> Result<Appointment, EngineError> {
        metrics::counter!(crate::observability::OPS_TOTAL, "op" => "create_appointment")
            .increment(1);
        validate_requester(&requester)?;
        if education_level.as_ref().is_some_and(|l| l.len() > MAX_FIELD_LEN) {
            return Err(EngineError::LimitExceeded("education level too long"));
        }
        if notes.as_ref().is_some_and(|n| n.len() > MAX_NOTES_LEN) {
            return Err(EngineError::LimitExceeded("notes too long"));
        }

        // Reserve the system-wide pending claim first. Released again on any
        // failure below.
        if let Some(number) = requester.number {
            match self.pending_by_requester.entry(number) {
                Entry::Occupied(held) => return Err(EngineError::Conflict(*held.get())),
                Entry::Vacant(vacant) => {
                    vacant.insert(id);
                }
            }
        }

        let result = self.create_appointment_inner(id, slot, &requester, kind, education_level, notes).await;
        if result.is_err()
            && let Some(number) = requester.number {
                self.pending_by_requester.remove_if(&number, |_, held| *held == id);
            }
        result
    }

    async fn create_appointment_inner(
        &self,
        id: Ulid,
        slot: Ulid,
        requester: &Requester,
        kind: RequesterKind,
        education_level: Option<String>,
        notes: Option<String>,
    ) -> Result<Appointment, EngineError> {
        let (provider, mut guard) = self.resolve_slot_write(&slot).await?;
        if !guard.slots.contains_key(&slot) {
            return Err(EngineError::NotFound(slot));
        }
        if guard.appointments.len() >= MAX_APPOINTMENTS_PER_PROVIDER {
            return Err(EngineError::LimitExceeded("too many appointments for provider"));
        }
        if guard.appointments.contains_key(&id) {
            return Err(EngineError::Conflict(id));
        }

        let event = Event::AppointmentCreated {
            id,
            provider,
            slot,
            requester: requester.clone(),
            kind,
            education_level,
            notes,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(guard.appointments[&id].clone())
    }

    /// Transition an appointment out of `pending`.
    ///
    /// `accepted` debits one seat from the *currently bound* slot and fails
    /// with `SlotFull` when none is left. `rejected` persists the status and
    /// nothing else — a previously accepted appointment's seat is NOT
    /// restored here; only a move reconciles seats. Re-entry to `pending` is
    /// not a supported transition.
    pub async fn set_status(
        &self,
        id: Ulid,
        requester_provider: Ulid,
        provider_name: &str,
        next: Status,
    ) -> Result<Appointment, EngineError> {
        metrics::counter!(crate::observability::OPS_TOTAL, "op" => "set_status").increment(1);
        if next == Status::Pending {
            return Err(EngineError::Validation("cannot transition back to pending"));
        }
        let (provider, mut guard) = self.resolve_appointment_write(&id).await?;
        if provider != requester_provider {
            return Err(EngineError::Authorization(id));
        }
        let ap = guard.appointments.get(&id).ok_or(EngineError::NotFound(id))?;

        if next == Status::Accepted {
            let slot = guard
                .slots
                .get(&ap.slot)
                .ok_or(EngineError::NotFound(ap.slot))?;
            if !slot.is_available() {
                metrics::counter!(crate::observability::SLOT_FULL_TOTAL).increment(1);
                return Err(EngineError::SlotFull(slot.id));
            }
        }

        let event = Event::StatusChanged {
            id,
            provider,
            status: next,
        };
        self.persist_and_apply(&mut guard, &event).await?;

        let updated = guard.appointments[&id].clone();
        drop(guard);

        let kind = match next {
            Status::Accepted => NotificationKind::StatusAccepted,
            _ => NotificationKind::StatusRejected,
        };
        self.notify.send(provider, intent_for(&updated, kind, provider_name));
        Ok(updated)
    }

    /// Relocate one appointment to another slot of the same provider,
    /// reconciling seats on both ends, and force it to `accepted`.
    ///
    /// Seat policy: the origin is credited only if the appointment actually
    /// held a seat there (prior status `accepted`) and the destination
    /// differs; the destination is debited unless this is a no-op
    /// re-confirmation of an already-accepted same-slot appointment. Both
    /// sides commit under one provider lock and one WAL record.
    pub async fn move_appointment(
        &self,
        id: Ulid,
        requester_provider: Ulid,
        provider_name: &str,
        to_slot: Ulid,
    ) -> Result<Appointment, EngineError> {
        metrics::counter!(crate::observability::OPS_TOTAL, "op" => "move_appointment").increment(1);
        let (provider, mut guard) = self.resolve_appointment_write(&id).await?;
        if provider != requester_provider {
            return Err(EngineError::Authorization(id));
        }
        let ap = guard.appointments.get(&id).ok_or(EngineError::NotFound(id))?;

        match self.provider_for_slot(&to_slot) {
            None => return Err(EngineError::NotFound(to_slot)),
            Some(owner) if owner != provider => {
                return Err(EngineError::Authorization(to_slot));
            }
            Some(_) => {}
        }
        let dest = guard
            .slots
            .get(&to_slot)
            .ok_or(EngineError::NotFound(to_slot))?;

        let same_slot = ap.slot == to_slot;
        let needs_capacity = !(same_slot && ap.status == Status::Accepted);
        if needs_capacity && !dest.is_available() {
            metrics::counter!(crate::observability::SLOT_FULL_TOTAL).increment(1);
            return Err(EngineError::SlotFull(to_slot));
        }

        let event = Event::AppointmentMoved {
            id,
            provider,
            to_slot,
        };
        self.persist_and_apply(&mut guard, &event).await?;

        let updated = guard.appointments[&id].clone();
        drop(guard);

        self.notify.send(
            provider,
            intent_for(&updated, NotificationKind::MovedAndAccepted, provider_name),
        );
        Ok(updated)
    }

    /// Ownership-checked delete. An accepted appointment's seat is NOT
    /// re-credited to its slot.
    pub async fn delete_appointment(
        &self,
        id: Ulid,
        requester_provider: Ulid,
    ) -> Result<(), EngineError> {
        metrics::counter!(crate::observability::OPS_TOTAL, "op" => "delete_appointment")
            .increment(1);
        let (provider, mut guard) = self.resolve_appointment_write(&id).await?;
        if provider != requester_provider {
            return Err(EngineError::Authorization(id));
        }

        let event = Event::AppointmentDeleted { id, provider };
        self.persist_and_apply(&mut guard, &event).await
    }
}
