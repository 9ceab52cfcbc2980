use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    pub async fn get_slot(&self, id: Ulid) -> Result<TimeSlot, EngineError> {
        let provider = self.provider_for_slot(&id).ok_or(EngineError::NotFound(id))?;
        let book = self
            .get_book(&provider)
            .ok_or(EngineError::NotFound(provider))?;
        let guard = book.read().await;
        guard.slots.get(&id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// All of a provider's slots, ordered by weekday then start time.
    pub async fn list_slots(&self, provider: Ulid) -> Vec<TimeSlot> {
        let Some(book) = self.get_book(&provider) else {
            return Vec::new();
        };
        let guard = book.read().await;
        let mut slots: Vec<TimeSlot> = guard.slots.values().cloned().collect();
        slots.sort_by_key(|s| (s.weekday, s.start, s.id));
        slots
    }

    /// Slots that still have a seat to give, same ordering as `list_slots`.
    pub async fn list_available(&self, provider: Ulid) -> Vec<TimeSlot> {
        let mut slots = self.list_slots(provider).await;
        slots.retain(TimeSlot::is_available);
        slots
    }

    pub async fn get_appointment(&self, id: Ulid) -> Result<Appointment, EngineError> {
        let provider = self
            .provider_for_appointment(&id)
            .ok_or(EngineError::NotFound(id))?;
        let book = self
            .get_book(&provider)
            .ok_or(EngineError::NotFound(provider))?;
        let guard = book.read().await;
        guard
            .appointments
            .get(&id)
            .cloned()
            .ok_or(EngineError::NotFound(id))
    }

    /// A provider's appointments in chronological order (weekday, then the
    /// snapshot start time, then id for a stable tiebreak).
    pub async fn list_appointments(&self, provider: Ulid) -> Vec<Appointment> {
        let Some(book) = self.get_book(&provider) else {
            return Vec::new();
        };
        let guard = book.read().await;
        let mut appointments: Vec<Appointment> = guard.appointments.values().cloned().collect();
        appointments.sort_by_key(|a| (a.weekday, a.start, a.id));
        appointments
    }

    /// Appointment counts per status for one provider.
    pub async fn booking_stats(&self, provider: Ulid) -> BookingStats {
        let Some(book) = self.get_book(&provider) else {
            return BookingStats::default();
        };
        let guard = book.read().await;
        let mut stats = BookingStats::default();
        for ap in guard.appointments.values() {
            stats.total += 1;
            match ap.status {
                Status::Pending => stats.pending += 1,
                Status::Accepted => stats.accepted += 1,
                Status::Rejected => stats.rejected += 1,
            }
        }
        stats
    }
}
