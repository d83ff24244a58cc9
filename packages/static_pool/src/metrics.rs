use nm::{Event, Magnitude};

use crate::StoreError;

const RESERVED_BYTES_BUCKETS: &[Magnitude] = &[16, 64, 256, 1024, 4096, 16384, 65536];

thread_local! {
    static RESERVED_BYTES: Event = Event::builder()
        .name("static_pool_reserved_bytes")
        .histogram(RESERVED_BYTES_BUCKETS)
        .build();

    static RELEASED: Event = Event::builder()
        .name("static_pool_released")
        .build();

    static EXHAUSTED: Event = Event::builder()
        .name("static_pool_exhausted")
        .build();

    static MISUSE: Event = Event::builder()
        .name("static_pool_misuse")
        .build();
}

pub(crate) fn observe_reserved(length: usize) {
    RESERVED_BYTES.with(|e| e.observe(length));
}

pub(crate) fn observe_released() {
    RELEASED.with(Event::observe_once);
}

/// Records a failed operation. Errors that are neither transient nor misuse are not counted,
/// they describe requests that could never succeed and are visible to the caller anyway.
pub(crate) fn observe_failure(error: &StoreError) {
    if error.is_transient() {
        EXHAUSTED.with(Event::observe_once);
    } else if error.is_misuse() {
        MISUSE.with(Event::observe_once);
    }
}
