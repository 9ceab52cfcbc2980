//! Hard input limits. These guard the engine against pathological input,
//! not against honest load.

/// Max slots a single provider may hold.
pub const MAX_SLOTS_PER_PROVIDER: usize = 5_000;

/// Max appointments a single provider may hold.
pub const MAX_APPOINTMENTS_PER_PROVIDER: usize = 50_000;

/// Max seats a single slot may be created with.
pub const MAX_SLOT_CAPACITY: u32 = 1_000;

/// Max length of requester name / email / phone / major / education level.
pub const MAX_FIELD_LEN: usize = 200;

/// Max length of free-text notes.
pub const MAX_NOTES_LEN: usize = 2_000;
