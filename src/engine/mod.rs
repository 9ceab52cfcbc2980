mod appointments;
mod conflict;
mod error;
mod migrate;
mod queries;
mod slots;

pub use error::EngineError;
pub use slots::SlotPatch;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedProviderBook = Arc<RwLock<ProviderBook>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Cap on appends committed per fsync.
const MAX_COMMIT_BATCH: usize = 512;

/// Background task owning the WAL. Appends are group-committed: the first
/// append opens a batch window, everything already queued joins it (up to
/// `MAX_COMMIT_BATCH`), and the whole batch gets one fsync before the
/// callers are answered. Compaction and counter reads run between batches.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    let mut batch: Vec<PendingAppend> = Vec::new();
    while let Some(cmd) = rx.recv().await {
        let mut deferred = None;
        match cmd {
            WalCommand::Append { event, response } => {
                batch.push((event, response));
                while batch.len() < MAX_COMMIT_BATCH {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }
                commit_batch(&mut wal, &mut batch);
            }
            other => deferred = Some(other),
        }
        if let Some(cmd) = deferred {
            run_control(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let mut outcome: io::Result<()> = Ok(());
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            outcome = Err(e);
            break;
        }
    }
    // Flush even when an append failed, so partially buffered bytes don't
    // leak into the next batch (these callers are all told this one failed).
    let flushed = wal.flush_sync();
    if outcome.is_ok() {
        outcome = flushed;
    }
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, tx) in batch.drain(..) {
        let _ = tx.send(match &outcome {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        });
    }
}

fn run_control(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched above"),
    }
}

/// The Booking Engine.
///
/// One `ProviderBook` behind a write lock per provider; every mutation is
/// WAL-appended before it is applied in memory, and multi-record operations
/// (move, day migration) execute entirely under one provider lock.
pub struct Engine {
    pub(super) books: DashMap<Ulid, SharedProviderBook>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: slot id → owning provider.
    pub(super) slot_to_provider: DashMap<Ulid, Ulid>,
    /// Reverse lookup: appointment id → owning provider.
    pub(super) appointment_to_provider: DashMap<Ulid, Ulid>,
    /// System-wide uniqueness: requester number → their one pending
    /// appointment. Insert-if-absent guards concurrent creations.
    pub(super) pending_by_requester: DashMap<u64, Ulid>,
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            books: DashMap::new(),
            wal_tx,
            notify,
            slot_to_provider: DashMap::new(),
            appointment_to_provider: DashMap::new(),
            pending_by_requester: DashMap::new(),
        };

        // Replay events — we're the sole owner of these Arcs, so try_write
        // always succeeds instantly (no contention). Never use blocking_write
        // here because this may run inside an async context.
        for event in &events {
            let book = engine.book_or_create(event.provider());
            let mut guard = book.try_write().expect("replay: uncontended write");
            engine.apply_to_book(&mut guard, event);
        }

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Wal(e.to_string()))
    }

    pub fn get_book(&self, provider: &Ulid) -> Option<SharedProviderBook> {
        self.books.get(provider).map(|e| e.value().clone())
    }

    /// Get or lazily create the book for a provider.
    pub(super) fn book_or_create(&self, provider: Ulid) -> SharedProviderBook {
        let book = self
            .books
            .entry(provider)
            .or_insert_with(|| Arc::new(RwLock::new(ProviderBook::new(provider))))
            .value()
            .clone();
        metrics::gauge!(crate::observability::PROVIDERS_ACTIVE).set(self.books.len() as f64);
        book
    }

    pub fn provider_for_slot(&self, slot: &Ulid) -> Option<Ulid> {
        self.slot_to_provider.get(slot).map(|e| *e.value())
    }

    pub fn provider_for_appointment(&self, appointment: &Ulid) -> Option<Ulid> {
        self.appointment_to_provider.get(appointment).map(|e| *e.value())
    }

    /// WAL-append + apply in one call. The event is durable before the
    /// in-memory state changes.
    pub(super) async fn persist_and_apply(
        &self,
        book: &mut ProviderBook,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.apply_to_book(book, event);
        Ok(())
    }

    /// Lookup appointment → provider, get the book, acquire the write lock.
    pub(super) async fn resolve_appointment_write(
        &self,
        appointment: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<ProviderBook>), EngineError> {
        let provider = self
            .provider_for_appointment(appointment)
            .ok_or(EngineError::NotFound(*appointment))?;
        let book = self
            .get_book(&provider)
            .ok_or(EngineError::NotFound(provider))?;
        let guard = book.write_owned().await;
        Ok((provider, guard))
    }

    /// Lookup slot → provider, get the book, acquire the write lock.
    pub(super) async fn resolve_slot_write(
        &self,
        slot: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<ProviderBook>), EngineError> {
        let provider = self
            .provider_for_slot(slot)
            .ok_or(EngineError::NotFound(*slot))?;
        let book = self
            .get_book(&provider)
            .ok_or(EngineError::NotFound(provider))?;
        let guard = book.write_owned().await;
        Ok((provider, guard))
    }

    /// Apply an event to a provider's book (caller holds the write lock).
    ///
    /// All seat arithmetic lives here so that live mutation and WAL replay
    /// go through the same code path. Live callers validate before the WAL
    /// append; application itself never fails.
    pub(super) fn apply_to_book(&self, book: &mut ProviderBook, event: &Event) {
        match event {
            Event::SlotCreated {
                id,
                provider,
                weekday,
                start,
                end,
                capacity,
            } => {
                book.slots
                    .insert(*id, TimeSlot::new(*id, *provider, *weekday, *start, *end, *capacity));
                self.slot_to_provider.insert(*id, *provider);
            }
            Event::SlotUpdated {
                id,
                weekday,
                start,
                end,
                capacity,
                ..
            } => {
                if let Some(slot) = book.slots.get_mut(id) {
                    // A capacity change preserves seats already debited.
                    let taken = slot.capacity.saturating_sub(slot.remaining);
                    slot.weekday = *weekday;
                    slot.start = *start;
                    slot.end = *end;
                    slot.capacity = *capacity;
                    slot.remaining = capacity.saturating_sub(taken);
                    slot.is_booked = slot.remaining == 0;
                }
            }
            Event::SlotDeleted { id, .. } => {
                book.slots.remove(id);
                self.slot_to_provider.remove(id);
            }
            Event::AppointmentCreated {
                id,
                provider,
                slot,
                requester,
                kind,
                education_level,
                notes,
            } => {
                // Snapshot the bound slot's times; the slot was verified to
                // exist before the event was written.
                let Some(bound) = book.slots.get(slot) else {
                    return;
                };
                let appointment = Appointment {
                    id: *id,
                    provider: *provider,
                    slot: *slot,
                    requester: requester.clone(),
                    kind: *kind,
                    education_level: education_level.clone(),
                    notes: notes.clone(),
                    status: Status::Pending,
                    weekday: bound.weekday,
                    start: bound.start,
                    end: bound.end,
                };
                if let Some(number) = requester.number {
                    self.pending_by_requester.insert(number, *id);
                }
                book.appointments.insert(*id, appointment);
                self.appointment_to_provider.insert(*id, *provider);
            }
            Event::StatusChanged { id, status, .. } => {
                let Some(ap) = book.appointments.get_mut(id) else {
                    return;
                };
                let was_pending = ap.status == Status::Pending;
                ap.status = *status;
                if *status == Status::Accepted
                    && let Some(slot) = book.slots.get_mut(&ap.slot) {
                        slot.debit_seat();
                    }
                if was_pending && *status != Status::Pending {
                    self.release_pending_claim(id, ap.requester.number);
                }
            }
            Event::AppointmentMoved { id, to_slot, .. } => {
                let Some(dest) = book.slots.get(to_slot) else {
                    return;
                };
                let (dest_weekday, dest_start, dest_end) = (dest.weekday, dest.start, dest.end);
                let Some(ap) = book.appointments.get_mut(id) else {
                    return;
                };
                let same_slot = ap.slot == *to_slot;
                let was_accepted = ap.status == Status::Accepted;
                let was_pending = ap.status == Status::Pending;
                let origin = ap.slot;

                // Credit the origin iff a seat was held there and we leave it.
                if was_accepted && !same_slot
                    && let Some(from) = book.slots.get_mut(&origin) {
                        from.credit_seat();
                    }
                // Debit the destination unless this is a no-op re-confirmation
                // of an already-accepted same-slot appointment.
                if !(same_slot && was_accepted)
                    && let Some(to) = book.slots.get_mut(to_slot) {
                        to.debit_seat();
                    }

                let Some(ap) = book.appointments.get_mut(id) else {
                    return;
                };
                ap.slot = *to_slot;
                ap.weekday = dest_weekday;
                ap.start = dest_start;
                ap.end = dest_end;
                ap.status = Status::Accepted;
                if was_pending {
                    self.release_pending_claim(id, ap.requester.number);
                }
            }
            Event::AppointmentDeleted { id, .. } => {
                if let Some(ap) = book.appointments.remove(id) {
                    if ap.status == Status::Pending {
                        self.release_pending_claim(id, ap.requester.number);
                    }
                    self.appointment_to_provider.remove(id);
                }
            }
            Event::SlotRestored { slot } => {
                self.slot_to_provider.insert(slot.id, slot.provider);
                book.slots.insert(slot.id, slot.clone());
            }
            Event::AppointmentRestored { appointment } => {
                self.appointment_to_provider
                    .insert(appointment.id, appointment.provider);
                if appointment.status == Status::Pending
                    && let Some(number) = appointment.requester.number {
                        self.pending_by_requester.insert(number, appointment.id);
                    }
                book.appointments.insert(appointment.id, appointment.clone());
            }
            Event::DayMigrated { created, rebound, .. } => {
                for spec in created {
                    let slot = TimeSlot::new(
                        spec.id,
                        book.id,
                        spec.weekday,
                        spec.start,
                        spec.end,
                        spec.capacity,
                    );
                    self.slot_to_provider.insert(spec.id, book.id);
                    book.slots.insert(spec.id, slot);
                }
                for (appointment_id, dest_id) in rebound {
                    let Some(dest) = book.slots.get(dest_id) else {
                        continue;
                    };
                    let (weekday, start, end) = (dest.weekday, dest.start, dest.end);
                    if let Some(ap) = book.appointments.get_mut(appointment_id) {
                        // Rebind only: statuses and seat counters stay as-is.
                        ap.slot = *dest_id;
                        ap.weekday = weekday;
                        ap.start = start;
                        ap.end = end;
                    }
                }
            }
        }
    }

    /// Drop the system-wide pending claim held by `appointment`, if any.
    fn release_pending_claim(&self, appointment: &Ulid, number: Option<u64>) {
        if let Some(number) = number {
            self.pending_by_requester
                .remove_if(&number, |_, held| held == appointment);
        }
    }

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        let providers: Vec<Ulid> = self.books.iter().map(|e| *e.key()).collect();
        for provider in providers {
            let Some(book) = self.get_book(&provider) else {
                continue;
            };
            let guard = book.read().await;

            // Snapshot records, not fine-grained events: they carry drifted
            // seat counters and orphaned bindings verbatim.
            for slot in guard.slots.values() {
                events.push(Event::SlotRestored { slot: slot.clone() });
            }
            for ap in guard.appointments.values() {
                events.push(Event::AppointmentRestored {
                    appointment: ap.clone(),
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Wal(e.to_string()))
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
}
