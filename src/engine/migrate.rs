use std::collections::HashMap;

use ulid::Ulid;

use crate::limits::MAX_SLOTS_PER_PROVIDER;
use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    /// Bulk-relocate every appointment anchored to `from`'s slots onto the
    /// equivalent (same start/end) slots of `to`, creating missing
    /// destination slots when `create_missing`.
    ///
    /// The whole migration is planned first and committed as one WAL record
    /// under the provider's write lock: either every creation and rebinding
    /// lands, or none does. Rebinding does not touch statuses or seat
    /// counters — created destination slots start fresh with the source
    /// slot's configured capacity.
    pub async fn migrate_day(
        &self,
        provider: Ulid,
        from: Weekday,
        to: Weekday,
        create_missing: bool,
    ) -> Result<MigrationReport, EngineError> {
        metrics::counter!(crate::observability::OPS_TOTAL, "op" => "migrate_day").increment(1);
        if from == to {
            return Err(EngineError::Validation("source and target day are the same"));
        }

        let book = self
            .get_book(&provider)
            .ok_or(EngineError::NotFound(provider))?;
        let mut guard = book.write_owned().await;

        let mut sources: Vec<(Ulid, TimeOfDay, TimeOfDay, u32)> = guard
            .slots_on(from)
            .map(|s| (s.id, s.start, s.end, s.capacity))
            .collect();
        if sources.is_empty() {
            return Ok(MigrationReport::default());
        }
        sources.sort_by_key(|&(_, start, _, _)| start);

        let targets: HashMap<(TimeOfDay, TimeOfDay), Ulid> = guard
            .slots_on(to)
            .map(|s| ((s.start, s.end), s.id))
            .collect();

        // Plan phase: nothing is mutated until the whole day resolves.
        let mut created: Vec<SlotSpec> = Vec::new();
        let mut rebound: Vec<(Ulid, Ulid)> = Vec::new();
        let mut skipped = 0usize;

        for (source_id, start, end, capacity) in sources {
            let dest_id = match targets.get(&(start, end)) {
                Some(&existing) => existing,
                None if create_missing => {
                    // Source slots are mutually non-overlapping, so planned
                    // creations can only collide with existing target-day
                    // slots at *different* boundaries.
                    for slot in guard.slots_on(to) {
                        if slot.overlaps(to, start, end) {
                            return Err(EngineError::Conflict(slot.id));
                        }
                    }
                    let id = Ulid::new();
                    created.push(SlotSpec {
                        id,
                        weekday: to,
                        start,
                        end,
                        capacity,
                    });
                    id
                }
                None => {
                    skipped += guard.appointments_on_slot(source_id).count();
                    continue;
                }
            };
            rebound.extend(
                guard
                    .appointments_on_slot(source_id)
                    .map(|ap| (ap.id, dest_id)),
            );
        }

        if guard.slots.len() + created.len() > MAX_SLOTS_PER_PROVIDER {
            return Err(EngineError::LimitExceeded("too many slots for provider"));
        }

        let report = MigrationReport {
            moved: rebound.len(),
            skipped,
            created_slots: created.len(),
        };

        // Commit phase: one record, all-or-nothing.
        if !created.is_empty() || !rebound.is_empty() {
            let event = Event::DayMigrated {
                provider,
                created,
                rebound,
            };
            self.persist_and_apply(&mut guard, &event).await?;
        }

        tracing::info!(
            provider = %provider,
            from = %from,
            to = %to,
            moved = report.moved,
            skipped = report.skipped,
            created = report.created_slots,
            "day migration committed"
        );
        Ok(report)
    }
}
