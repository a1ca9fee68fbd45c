//! Background tasks running beside the reconcile loop

pub mod cleanup;

pub use cleanup::{CleanupConfig, ReservationCleaner};
