use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{domain::IdentifierId, errors::Error, Result};

/// Upper bound on random draws per requested id, so a range with few
/// acceptable leading digits still terminates.
const MAX_DRAWS_PER_ID: usize = 64;

/// Inclusive numeric range for candidate ids.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IdRange {
    pub min: i64,
    pub max: i64,
}

impl IdRange {
    pub fn new(min: i64, max: i64) -> Result<Self> {
        let range = Self { min, max };
        range.validate()?;
        Ok(range)
    }

    pub fn validate(&self) -> Result<()> {
        if self.min <= 0 {
            return Err(Error::Config(format!(
                "id range minimum must be positive, got {}",
                self.min
            )));
        }
        if self.min > self.max {
            return Err(Error::Config(format!(
                "id range minimum {} exceeds maximum {}",
                self.min, self.max
            )));
        }
        Ok(())
    }
}

/// Produces pseudo-random candidate ids. Draws from an OS-seeded source,
/// so repeated calls with the same arguments give different samples.
#[derive(Clone, Debug)]
pub struct IdentifierGenerator {
    leading_digits: Vec<u8>,
}

impl IdentifierGenerator {
    /// An empty `leading_digits` list accepts every leading digit.
    pub fn new(leading_digits: Vec<u8>) -> Self {
        Self { leading_digits }
    }

    /// Lazily yields up to `count` ids within `range` whose leading digit is acceptable.
    pub fn generate(&self, count: usize, range: IdRange) -> Candidates<'_> {
        Candidates {
            generator: self,
            rng: StdRng::from_rng(&mut rand::rng()),
            range,
            remaining: count,
            draws_left: count.saturating_mul(MAX_DRAWS_PER_ID),
        }
    }

    fn accepts(&self, id: IdentifierId) -> bool {
        self.leading_digits.is_empty() || self.leading_digits.contains(&id.leading_digit())
    }
}

pub struct Candidates<'a> {
    generator: &'a IdentifierGenerator,
    rng: StdRng,
    range: IdRange,
    remaining: usize,
    draws_left: usize,
}

impl Iterator for Candidates<'_> {
    type Item = IdentifierId;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 || self.range.min > self.range.max {
            return None;
        }
        while self.draws_left > 0 {
            self.draws_left -= 1;
            let id = IdentifierId(self.rng.random_range(self.range.min..=self.range.max));
            if self.generator.accepts(id) {
                self.remaining -= 1;
                return Some(id);
            }
        }
        None
    }
}
