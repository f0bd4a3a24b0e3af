//! MaxStartups style load shedding

use rand::Rng;
use std::fmt;
use std::str::FromStr;

use super::error::DaemonError;
use crate::config::StartupsPolicy;

/// Limit on concurrent unauthenticated connections, `start:rate:full`.
///
/// Below `start` every connection is accepted. From `start` on, new
/// connections are shed with a probability rising linearly from `rate`
/// percent to 100 percent at `full`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartupsLimit {
    pub start: usize,
    pub rate: u32,
    pub full: usize,
}

impl StartupsLimit {
    pub fn new(start: usize, rate: u32, full: usize) -> Self {
        Self { start, rate, full }
    }

    /// Shedding probability in percent for `unauthenticated` in-flight connections
    pub fn drop_probability(&self, unauthenticated: usize) -> u32 {
        if unauthenticated < self.start {
            return 0;
        }
        if unauthenticated >= self.full {
            return 100;
        }

        let span = (self.full - self.start) as u64;
        let over = (unauthenticated - self.start) as u64;
        let p = self.rate as u64 + (100 - self.rate as u64) * over / span;
        p.min(100) as u32
    }

    /// Roll the dice for one new connection
    pub fn should_drop<R: Rng + ?Sized>(&self, unauthenticated: usize, rng: &mut R) -> bool {
        match self.drop_probability(unauthenticated) {
            0 => false,
            p if p >= 100 => true,
            p => rng.gen_range(0..100) < p,
        }
    }
}

impl Default for StartupsLimit {
    fn default() -> Self {
        Self::new(10, 30, 100)
    }
}

impl FromStr for StartupsLimit {
    type Err = DaemonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| DaemonError::InvalidStartups {
            value: s.to_string(),
            reason: reason.to_string(),
        };

        let parts: Vec<&str> = s.trim().split(':').collect();
        let number = |p: &str| p.trim().parse::<usize>().map_err(|_| invalid("not a number"));

        let limit = match parts.as_slice() {
            [n] => {
                let n = number(n)?;
                Self::new(n, 100, n)
            }
            [start, rate, full] => {
                let rate = number(rate)?;
                if !(1..=100).contains(&rate) {
                    return Err(invalid("rate must be between 1 and 100"));
                }
                Self::new(number(start)?, rate as u32, number(full)?)
            }
            _ => return Err(invalid("expected N or start:rate:full")),
        };

        if limit.start == 0 {
            return Err(invalid("start must be at least 1"));
        }
        if limit.full < limit.start {
            return Err(invalid("full must not be below start"));
        }

        Ok(limit)
    }
}

impl fmt::Display for StartupsLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.start, self.rate, self.full)
    }
}

/// What to do with the next pending connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Accept and pass on to access control
    Accept,
    /// Accept and close at once
    Drop,
    /// Leave it queued and retry after a pause
    Delay,
}

/// Limit plus the configured reaction to it
#[derive(Debug, Clone, Copy)]
pub struct Throttle {
    pub limit: StartupsLimit,
    pub policy: StartupsPolicy,
}

impl Throttle {
    pub fn new(limit: StartupsLimit, policy: StartupsPolicy) -> Self {
        Self { limit, policy }
    }

    pub fn decide<R: Rng + ?Sized>(&self, unauthenticated: usize, rng: &mut R) -> Admission {
        if !self.limit.should_drop(unauthenticated, rng) {
            return Admission::Accept;
        }
        match self.policy {
            StartupsPolicy::Drop => Admission::Drop,
            StartupsPolicy::Delay => Admission::Delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_parse() {
        assert_eq!("10:30:100".parse::<StartupsLimit>().unwrap(), StartupsLimit::new(10, 30, 100));
        assert_eq!("5".parse::<StartupsLimit>().unwrap(), StartupsLimit::new(5, 100, 5));
        assert!("10:30".parse::<StartupsLimit>().is_err());
        assert!("10:0:100".parse::<StartupsLimit>().is_err());
        assert!("10:101:100".parse::<StartupsLimit>().is_err());
        assert!("100:30:10".parse::<StartupsLimit>().is_err());
        assert!("0".parse::<StartupsLimit>().is_err());
        assert!("x:30:100".parse::<StartupsLimit>().is_err());
    }

    #[test]
    fn test_probability_curve() {
        let limit = StartupsLimit::new(10, 30, 100);
        assert_eq!(limit.drop_probability(0), 0);
        assert_eq!(limit.drop_probability(9), 0);
        assert_eq!(limit.drop_probability(10), 30);
        assert_eq!(limit.drop_probability(55), 65);
        assert_eq!(limit.drop_probability(100), 100);
        assert_eq!(limit.drop_probability(1000), 100);
    }

    #[test]
    fn test_single_number_is_hard_limit() {
        let limit: StartupsLimit = "3".parse().unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        assert!(!limit.should_drop(2, &mut rng));
        assert!(limit.should_drop(3, &mut rng));
    }

    #[test]
    fn test_policy_decides_reaction() {
        let mut rng = StdRng::seed_from_u64(1);
        let limit = StartupsLimit::new(1, 100, 1);

        let drop = Throttle::new(limit, StartupsPolicy::Drop);
        assert_eq!(drop.decide(0, &mut rng), Admission::Accept);
        assert_eq!(drop.decide(1, &mut rng), Admission::Drop);

        let delay = Throttle::new(limit, StartupsPolicy::Delay);
        assert_eq!(delay.decide(1, &mut rng), Admission::Delay);
    }

    proptest! {
        #[test]
        fn prop_probability_is_monotonic(start in 1usize..50, extra in 0usize..50, rate in 1u32..=100, n in 0usize..200) {
            let limit = StartupsLimit::new(start, rate, start + extra);
            let p = limit.drop_probability(n);
            prop_assert!(p <= 100);
            prop_assert!(limit.drop_probability(n + 1) >= p);
        }
    }
}
