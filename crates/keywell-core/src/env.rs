//! Environment abstraction for deterministic testing.
//!
//! Decouples pool and session logic from system resources (time, randomness).
//! Enables deterministic tests with a virtual clock and seeded RNG, and
//! production use with real system resources.

use std::time::Duration;

/// Abstract environment providing time, randomness, and async primitives.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// - `now()` never goes backwards
/// - `random_bytes()` uses cryptographically secure entropy in production
/// - Methods are infallible except in exceptional circumstances (e.g., OS
///   entropy exhaustion, incorrect simulation setup)
pub trait Environment: Clone + Send + Sync + 'static {
    /// The specific instant type used by this environment.
    ///
    /// Production environments use `std::time::Instant`, while test
    /// environments use virtual time.
    type Instant: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>;

    /// Current time (monotonic).
    ///
    /// # Invariants
    ///
    /// - This method MUST return values that never decrease within a single
    ///   execution context. Subsequent calls must return times >= previous
    ///   calls.
    fn now(&self) -> Self::Instant;

    /// Sleeps for the specified duration.
    ///
    /// This is the ONLY async method in the trait, and it should only be used
    /// by driver code (not pool or session logic).
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fills the provided buffer with random bytes.
    ///
    /// # Invariants
    ///
    /// - Given the same RNG seed, this produces the same sequence of bytes
    /// - Uses cryptographically secure RNG
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Seconds since the Unix epoch.
    ///
    /// Wall-clock time for audit records; not monotonic, not used for
    /// timeouts.
    fn wall_clock_secs(&self) -> u64;

    /// Generates a random `u64`.
    ///
    /// This is a convenience method for common use cases like generating
    /// exchange ids or request ids.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }

    /// Generates a random `u128`.
    ///
    /// Useful for key ids or stream ids.
    fn random_u128(&self) -> u128 {
        let mut bytes = [0u8; 16];
        self.random_bytes(&mut bytes);
        u128::from_be_bytes(bytes)
    }
}

pub mod test_utils {
    //! Deterministic environment for tests.
    //!
    //! `MockEnv` provides a virtual clock that advances only on demand and a
    //! seeded ChaCha RNG, so every run of a test observes the same byte
    //! sequence and the same timings.

    #![allow(clippy::disallowed_types, reason = "Synchronous state shared with cloned handles only")]

    use std::{
        sync::{Arc, Mutex},
        time::Duration,
    };

    use rand::{RngCore, SeedableRng, rngs::OsRng};
    use rand_chacha::ChaCha20Rng;

    use super::Environment;

    /// Virtual instant measured from the mock clock's origin.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
    pub struct MockInstant(Duration);

    impl std::ops::Sub for MockInstant {
        type Output = Duration;

        fn sub(self, rhs: Self) -> Duration {
            self.0.saturating_sub(rhs.0)
        }
    }

    enum MockRng {
        /// Reproducible sequence from a fixed seed
        Seeded(ChaCha20Rng),
        /// Real OS entropy, for tests that need crypto-valid randomness
        /// without caring about reproducibility
        Os,
    }

    struct Inner {
        rng: MockRng,
        clock: Duration,
        wall_clock: u64,
    }

    /// Deterministic [`Environment`] for tests.
    ///
    /// Time is virtual: `now()` only moves when [`MockEnv::advance`] is
    /// called, and `sleep` advances the clock by the requested duration and
    /// resolves immediately.
    #[derive(Clone)]
    pub struct MockEnv {
        inner: Arc<Mutex<Inner>>,
    }

    impl MockEnv {
        /// Mock environment with a fixed default seed.
        #[must_use]
        pub fn new() -> Self {
            Self::with_seed(0)
        }

        /// Mock environment with a caller-chosen RNG seed.
        #[must_use]
        pub fn with_seed(seed: u64) -> Self {
            Self {
                inner: Arc::new(Mutex::new(Inner {
                    rng: MockRng::Seeded(ChaCha20Rng::seed_from_u64(seed)),
                    clock: Duration::ZERO,
                    wall_clock: 0,
                })),
            }
        }

        /// Mock environment backed by OS entropy.
        ///
        /// Time stays virtual; only the byte stream is non-reproducible.
        #[must_use]
        pub fn with_crypto_rng() -> Self {
            Self {
                inner: Arc::new(Mutex::new(Inner {
                    rng: MockRng::Os,
                    clock: Duration::ZERO,
                    wall_clock: 0,
                })),
            }
        }

        /// Move the virtual clock forward.
        pub fn advance(&self, duration: Duration) {
            let mut inner = self.lock();
            inner.clock += duration;
            inner.wall_clock += duration.as_secs();
        }

        /// Pin the wall clock to a specific Unix timestamp.
        pub fn set_wall_clock(&self, secs: u64) {
            self.lock().wall_clock = secs;
        }

        #[allow(clippy::expect_used)]
        fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
            self.inner.lock().expect("invariant: mock environment lock is never poisoned")
        }
    }

    impl Default for MockEnv {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Environment for MockEnv {
        type Instant = MockInstant;

        fn now(&self) -> Self::Instant {
            MockInstant(self.lock().clock)
        }

        fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
            // Advance on first poll, not on construction, so an unpolled
            // timeout arm does not move the clock
            let env = self.clone();
            async move { env.advance(duration) }
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            match &mut self.lock().rng {
                MockRng::Seeded(rng) => rng.fill_bytes(buffer),
                MockRng::Os => OsRng.fill_bytes(buffer),
            }
        }

        fn wall_clock_secs(&self) -> u64 {
            self.lock().wall_clock
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn same_seed_same_byte_sequence() {
            let env1 = MockEnv::with_seed(42);
            let env2 = MockEnv::with_seed(42);

            let mut bytes1 = [0u8; 32];
            let mut bytes2 = [0u8; 32];
            env1.random_bytes(&mut bytes1);
            env2.random_bytes(&mut bytes2);

            assert_eq!(bytes1, bytes2);
        }

        #[test]
        fn different_seeds_differ() {
            let env1 = MockEnv::with_seed(1);
            let env2 = MockEnv::with_seed(2);

            assert_ne!(env1.random_u128(), env2.random_u128());
        }

        #[test]
        fn clock_only_moves_on_advance() {
            let env = MockEnv::new();

            let t1 = env.now();
            let t2 = env.now();
            assert_eq!(t1, t2);

            env.advance(Duration::from_secs(5));
            let t3 = env.now();
            assert_eq!(t3 - t1, Duration::from_secs(5));
        }

        #[test]
        fn sleep_advances_virtual_time() {
            use std::future::Future;

            let env = MockEnv::new();
            let start = env.now();

            // Resolve without a runtime: one poll completes the sleep
            let mut sleep = std::pin::pin!(env.sleep(Duration::from_secs(30)));
            let mut cx = std::task::Context::from_waker(std::task::Waker::noop());
            assert!(sleep.as_mut().poll(&mut cx).is_ready());

            assert_eq!(env.now() - start, Duration::from_secs(30));
        }

        #[test]
        fn unpolled_sleep_leaves_clock_alone() {
            let env = MockEnv::new();
            let start = env.now();

            drop(env.sleep(Duration::from_secs(30)));

            assert_eq!(env.now(), start);
        }

        #[test]
        fn wall_clock_tracks_advances() {
            let env = MockEnv::new();
            env.set_wall_clock(1_700_000_000);
            env.advance(Duration::from_secs(90));

            assert_eq!(env.wall_clock_secs(), 1_700_000_090);
        }

        #[test]
        fn clones_share_state() {
            let env = MockEnv::with_seed(7);
            let clone = env.clone();

            let from_original = env.random_u64();
            let from_clone = clone.random_u64();

            // A shared RNG never repeats across clones
            assert_ne!(from_original, from_clone);
        }
    }
}
