//! Attendance sheets: building a roster for a session from enrollments and
//! saved records, editing it in memory, and saving it back.

pub mod commit;
pub mod reconcile;
pub mod roster;

pub use commit::*;
pub use reconcile::*;
pub use roster::*;
