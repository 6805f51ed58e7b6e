//! Timestamps are used only for *ordering* against `last_reimaging` —
//! any monotonic clock suffices, and the kernel never reads wall-clock time
//! itself. Keeping the kernel a pure `(world, ledger, action, now) ->
//! (world', ledger', result)` transformer (rather than reaching for
//! `SystemTime::now()` internally) is what makes branch-selection
//! reproducible under a fixed RNG seed: callers pass the current
//! episode step count as `now`.
pub type Timestamp = u64;
