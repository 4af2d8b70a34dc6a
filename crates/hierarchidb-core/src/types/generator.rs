use crate::types::ulid::{Ulid, UlidError};
use rand_chacha::{
    ChaCha8Rng,
    rand_core::{RngCore, SeedableRng},
};

///
/// IdGenerator
///
/// Monotonic ULID generation; increments within the same millisecond so key
/// order is maintained even when the clock stalls or steps backwards.
///
/// hacked from <https://github.com/dylanhart/ulid-rs/blob/master/src/generator.rs>
/// as the ulid crate doesn't support a no-std generator
///

pub struct IdGenerator {
    previous: Ulid,
    rng: ChaCha8Rng,
}

impl IdGenerator {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            previous: Ulid::nil(),
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Generate the next id for the given clock reading.
    pub fn generate(&mut self, now_ms: u64) -> Result<Ulid, UlidError> {
        let last_ts = self.previous.timestamp_ms();

        // maybe time went backward, or it is the same ms.
        // increment instead of generating a new random so that it is monotonic
        if now_ms <= last_ts && !self.previous.is_nil() {
            if let Some(next) = self.previous.increment() {
                self.previous = next;

                return Ok(self.previous);
            }

            return Err(UlidError::GeneratorOverflow);
        }

        let rand = u128::from(self.rng.next_u64()) << 64 | u128::from(self.rng.next_u64());
        let ulid = Ulid::from_parts(now_ms, rand);

        self.previous = ulid;

        Ok(ulid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_is_monotonic_within_one_millisecond() {
        let mut g = IdGenerator::new(7);
        let a = g.generate(10).unwrap();
        let b = g.generate(10).unwrap();
        let c = g.generate(9).unwrap();

        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn fresh_millisecond_takes_new_timestamp() {
        let mut g = IdGenerator::new(7);
        let a = g.generate(10).unwrap();
        let b = g.generate(11).unwrap();

        assert!(a < b);
        assert_eq!(b.timestamp_ms(), 11);
    }
}
