//! SQLite persistence for rollcall: enrolled descriptors and attendance.

pub mod sqlite;

pub use sqlite::{AttendanceEntry, IdentitySummary, SqliteStore};
