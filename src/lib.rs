//! bookd — a capacity-safe booking engine.
//!
//! Providers publish weekly time slots with a finite number of seats;
//! requesters file appointment requests against them. The engine owns the
//! pending → accepted/rejected lifecycle, single-appointment relocation with
//! seat reconciliation, and transactional whole-day migration, and never
//! oversells a slot under concurrent acceptances.
//!
//! State lives in memory behind per-provider locks and is made durable by an
//! append-only WAL; status decisions emit notification intents on a
//! broadcast hub for an embedding mailer to deliver.

pub mod engine;
pub mod limits;
pub mod maintenance;
pub mod model;
pub mod notify;
pub mod observability;
pub mod wal;
