use crate::Generator;
use pinhole_core::ShortKey;
use rand::distributions::Alphanumeric;
use rand::Rng;
use typed_builder::TypedBuilder;

/// Length of generated keys unless configured otherwise.
pub const DEFAULT_KEY_LENGTH: usize = 8;

/// Produces random keys drawn uniformly from `[A-Za-z0-9]`.
///
/// Backed by `rand::thread_rng`, a CSPRNG that is seeded from the OS and
/// periodically reseeded, so back-to-back calls never replay a sequence.
#[derive(Debug, Clone, Copy, TypedBuilder)]
pub struct RandomGenerator {
    #[builder(default = DEFAULT_KEY_LENGTH)]
    length: usize,
}

impl RandomGenerator {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn with_length(length: usize) -> Self {
        Self::builder().length(length).build()
    }

    pub fn length(&self) -> usize {
        self.length
    }
}

impl Default for RandomGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Generates a random alphanumeric string of `length` characters.
pub fn random_key(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

impl Generator for RandomGenerator {
    type Output = ShortKey;

    fn generate(&self) -> Self::Output {
        ShortKey::new_unchecked(random_key(self.length))
    }
}
