pub mod backup;
pub mod restore;
pub mod schedule;
pub mod snapshots;
