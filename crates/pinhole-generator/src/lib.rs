pub mod random;
pub mod seq;

use pinhole_core::ShortKey;

pub use random::RandomGenerator;
pub use seq::SeqGenerator;

/// Trait for generating short keys.
///
/// Implementations are pure generators that don't interact with storage.
/// A generated key is only a candidate: the storage engine's uniqueness check
/// is authoritative and callers retry on conflict.
pub trait Generator: Send + Sync + 'static {
    type Output: Into<ShortKey>;
    /// Generates a candidate short key.
    fn generate(&self) -> Self::Output;
}
