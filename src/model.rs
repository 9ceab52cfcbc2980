use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Working days only — slots never land on weekends and never cross midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
}

impl Weekday {
    pub const ALL: [Weekday; 5] = [
        Weekday::Monday,
        Weekday::Tuesday,
        Weekday::Wednesday,
        Weekday::Thursday,
        Weekday::Friday,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Weekday::Monday => "monday",
            Weekday::Tuesday => "tuesday",
            Weekday::Wednesday => "wednesday",
            Weekday::Thursday => "thursday",
            Weekday::Friday => "friday",
        }
    }
}

impl fmt::Display for Weekday {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidWeekday;

impl FromStr for Weekday {
    type Err = InvalidWeekday;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "monday" => Ok(Weekday::Monday),
            "tuesday" => Ok(Weekday::Tuesday),
            "wednesday" => Ok(Weekday::Wednesday),
            "thursday" => Ok(Weekday::Thursday),
            "friday" => Ok(Weekday::Friday),
            _ => Err(InvalidWeekday),
        }
    }
}

/// Minute of day, parsed from and rendered as a zero-padded `HH:MM` string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeOfDay(u16);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTime;

impl TimeOfDay {
    pub fn from_minutes(minutes: u16) -> Option<Self> {
        (minutes < 24 * 60).then_some(Self(minutes))
    }

    pub fn minutes(&self) -> u16 {
        self.0
    }
}

impl FromStr for TimeOfDay {
    type Err = InvalidTime;

    /// Strict `HH:MM`, both components zero-padded, 00:00–23:59.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() != 5 || bytes[2] != b':' {
            return Err(InvalidTime);
        }
        if !bytes.iter().enumerate().all(|(i, b)| i == 2 || b.is_ascii_digit()) {
            return Err(InvalidTime);
        }
        let hours: u16 = s[..2].parse().map_err(|_| InvalidTime)?;
        let mins: u16 = s[3..].parse().map_err(|_| InvalidTime)?;
        if hours > 23 || mins > 59 {
            return Err(InvalidTime);
        }
        Ok(Self(hours * 60 + mins))
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

/// A bookable interval on one weekday for one provider, with finite seats.
///
/// `remaining` counts seats still open; `is_booked` mirrors `remaining == 0`
/// after every committed mutation. A move credit may push `remaining` above
/// `capacity` — the counter is not clamped on the way up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub id: Ulid,
    pub provider: Ulid,
    pub weekday: Weekday,
    pub start: TimeOfDay,
    pub end: TimeOfDay,
    pub capacity: u32,
    pub remaining: u32,
    pub is_booked: bool,
}

impl TimeSlot {
    pub fn new(
        id: Ulid,
        provider: Ulid,
        weekday: Weekday,
        start: TimeOfDay,
        end: TimeOfDay,
        capacity: u32,
    ) -> Self {
        debug_assert!(start < end, "slot start must be before end");
        Self {
            id,
            provider,
            weekday,
            start,
            end,
            capacity,
            remaining: capacity,
            is_booked: false,
        }
    }

    /// Half-open interval overlap on the same weekday.
    pub fn overlaps(&self, weekday: Weekday, start: TimeOfDay, end: TimeOfDay) -> bool {
        self.weekday == weekday && self.start < end && start < self.end
    }

    pub fn is_available(&self) -> bool {
        !self.is_booked && self.remaining > 0
    }

    /// Consume one seat. Caller must have checked `is_available()`.
    pub fn debit_seat(&mut self) {
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            self.is_booked = true;
        }
    }

    /// Return one seat (unclamped — see struct doc).
    pub fn credit_seat(&mut self) {
        self.remaining += 1;
        self.is_booked = false;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Pending,
    Accepted,
    Rejected,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Accepted => "accepted",
            Status::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequesterKind {
    Visitor,
    Student,
}

/// Identity fields of the party requesting an appointment. `number` is the
/// student number; visitors usually have none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    pub name: String,
    pub number: Option<u64>,
    pub email: String,
    pub phone: Option<String>,
    pub major: Option<String>,
}

/// One appointment request, bound to exactly one slot at a time.
///
/// `weekday`/`start`/`end` are snapshots copied from the bound slot at
/// creation and refreshed only by a move — never derived live, so they
/// intentionally reflect the slot "as of last move".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub provider: Ulid,
    pub slot: Ulid,
    pub requester: Requester,
    pub kind: RequesterKind,
    pub education_level: Option<String>,
    pub notes: Option<String>,
    pub status: Status,
    pub weekday: Weekday,
    pub start: TimeOfDay,
    pub end: TimeOfDay,
}

/// One provider's slots and appointments. All mutations touching a provider
/// go through a single write lock on this struct, which is what makes
/// two-slot moves and whole-day migrations atomic.
#[derive(Debug)]
pub struct ProviderBook {
    pub id: Ulid,
    pub slots: HashMap<Ulid, TimeSlot>,
    pub appointments: HashMap<Ulid, Appointment>,
}

impl ProviderBook {
    pub fn new(id: Ulid) -> Self {
        Self {
            id,
            slots: HashMap::new(),
            appointments: HashMap::new(),
        }
    }

    pub fn slots_on(&self, weekday: Weekday) -> impl Iterator<Item = &TimeSlot> {
        self.slots.values().filter(move |s| s.weekday == weekday)
    }

    pub fn appointments_on_slot(&self, slot: Ulid) -> impl Iterator<Item = &Appointment> {
        self.appointments.values().filter(move |a| a.slot == slot)
    }
}

/// Shape of a slot created implicitly by a day migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSpec {
    pub id: Ulid,
    pub weekday: Weekday,
    pub start: TimeOfDay,
    pub end: TimeOfDay,
    pub capacity: u32,
}

/// The event types — flat, no nesting. This is the WAL record format.
///
/// Seat arithmetic happens in event application, so replaying the log
/// reconstructs seat counters exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    SlotCreated {
        id: Ulid,
        provider: Ulid,
        weekday: Weekday,
        start: TimeOfDay,
        end: TimeOfDay,
        capacity: u32,
    },
    SlotUpdated {
        id: Ulid,
        provider: Ulid,
        weekday: Weekday,
        start: TimeOfDay,
        end: TimeOfDay,
        capacity: u32,
    },
    SlotDeleted {
        id: Ulid,
        provider: Ulid,
    },
    AppointmentCreated {
        id: Ulid,
        provider: Ulid,
        slot: Ulid,
        requester: Requester,
        kind: RequesterKind,
        education_level: Option<String>,
        notes: Option<String>,
    },
    StatusChanged {
        id: Ulid,
        provider: Ulid,
        status: Status,
    },
    AppointmentMoved {
        id: Ulid,
        provider: Ulid,
        to_slot: Ulid,
    },
    AppointmentDeleted {
        id: Ulid,
        provider: Ulid,
    },
    /// One whole-day migration, committed as a single record: destination
    /// slots to create plus `(appointment, destination slot)` rebindings.
    DayMigrated {
        provider: Ulid,
        created: Vec<SlotSpec>,
        rebound: Vec<(Ulid, Ulid)>,
    },
    /// Full-fidelity snapshot records, written only by WAL compaction.
    /// Fine-grained events cannot reproduce drifted seat counters or
    /// orphaned slot bindings, so compaction dumps whole records instead.
    SlotRestored {
        slot: TimeSlot,
    },
    AppointmentRestored {
        appointment: Appointment,
    },
}

impl Event {
    /// The provider whose book this event mutates.
    pub fn provider(&self) -> Ulid {
        match self {
            Event::SlotCreated { provider, .. }
            | Event::SlotUpdated { provider, .. }
            | Event::SlotDeleted { provider, .. }
            | Event::AppointmentCreated { provider, .. }
            | Event::StatusChanged { provider, .. }
            | Event::AppointmentMoved { provider, .. }
            | Event::AppointmentDeleted { provider, .. }
            | Event::DayMigrated { provider, .. } => *provider,
            Event::SlotRestored { slot } => slot.provider,
            Event::AppointmentRestored { appointment } => appointment.provider,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MigrationReport {
    pub moved: usize,
    pub skipped: usize,
    pub created_slots: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BookingStats {
    pub total: usize,
    pub accepted: usize,
    pub pending: usize,
    pub rejected: usize,
}
