pub mod exec;
pub mod keys;
pub mod node;
pub mod orchestrate;
pub mod transfer;
pub mod verify;
pub mod wire;

/// The exponential-backoff-with-jitter schedule §4.4.5 mandates for PVC
/// sync (base 5s, factor 2, jitter 0.1, max 5 steps) -- the teacher-style
/// `Default` impl already matches the spec's numbers.
pub fn retry_schedule() -> crate::util::backoff::PvcRetrySchedule {
    crate::util::backoff::PvcRetrySchedule::default()
}
