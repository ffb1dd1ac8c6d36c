use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashSet;
use fake::faker::name::en::{FirstName, LastName};
use fake::Fake;
use rand::seq::SliceRandom;
use rand::Rng;

const LOWERCASE: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const UPPERCASE: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const NUMBERS: &[u8] = b"0123456789";
const SPECIAL: &[u8] = b"!@#$%^&*";

/// Source of candidate addresses, passwords and display names. No network access.
pub trait CandidateGenerator: Send + Sync {
    /// A fresh address on `domain` that is not in `used`. The address is added to `used`.
    fn email(&self, domain: &str, used: &DashSet<String>) -> String;

    fn password(&self) -> String;

    fn display_name(&self) -> String;
}

#[derive(Debug, Clone)]
pub struct RandomCandidateGenerator {
    local_part_length: usize,
    password_length: usize,
}

impl Default for RandomCandidateGenerator {
    fn default() -> Self {
        Self::new(10, 12)
    }
}

impl RandomCandidateGenerator {
    pub fn new(local_part_length: usize, password_length: usize) -> Self {
        Self {
            local_part_length: local_part_length.max(1),
            // one of each character class at minimum
            password_length: password_length.max(8),
        }
    }
}

impl CandidateGenerator for RandomCandidateGenerator {
    fn email(&self, domain: &str, used: &DashSet<String>) -> String {
        let domain = domain.trim_start_matches('@');
        let mut rng = rand::thread_rng();
        loop {
            let millis = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis())
                .unwrap_or_default();
            let local: String = (0..self.local_part_length)
                .map(|_| {
                    let pool = if rng.gen_bool(26.0 / 36.0) { LOWERCASE } else { NUMBERS };
                    pool[rng.gen_range(0..pool.len())] as char
                })
                .collect();
            let address = format!("{}{}@{}", local, millis % 10_000, domain);
            // insert is the uniqueness check, so concurrent callers never share an address
            if used.insert(address.clone()) {
                return address;
            }
        }
    }

    fn password(&self) -> String {
        let mut rng = rand::thread_rng();
        let mut chars: Vec<u8> = Vec::with_capacity(self.password_length);

        for pool in [LOWERCASE, UPPERCASE, NUMBERS, SPECIAL] {
            chars.push(pool[rng.gen_range(0..pool.len())]);
        }

        let all: Vec<u8> = [LOWERCASE, UPPERCASE, NUMBERS, SPECIAL].concat();
        while chars.len() < self.password_length {
            chars.push(all[rng.gen_range(0..all.len())]);
        }

        chars.shuffle(&mut rng);
        chars.into_iter().map(char::from).collect()
    }

    fn display_name(&self) -> String {
        let first: String = FirstName().fake();
        let last: String = LastName().fake();
        format!("{} {}", first, last)
    }
}
