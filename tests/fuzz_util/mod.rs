#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone, Copy)]
pub struct FuzzParams {
    pub seed: u64,
    pub steps: usize,
    pub key_space: u64,
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok()?.trim().parse::<u64>().ok()
}

fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name).ok()?.trim().parse::<usize>().ok()
}

fn mix_seed(mut seed: u64, tag: &str) -> u64 {
    // each test gets its own deterministic stream
    for (i, b) in tag.as_bytes().iter().enumerate() {
        seed ^= (*b as u64) << ((i % 8) * 8);
        seed = seed.rotate_left(13).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    }
    seed
}

pub fn params(test_tag: &str, default_steps: usize, default_key_space: u64) -> FuzzParams {
    let base_seed = env_u64("SCAVENGER_FUZZ_SEED").unwrap_or(0x5CA7_E46E_0C0F_FEE5);
    let steps = env_usize("SCAVENGER_FUZZ_STEPS").unwrap_or(default_steps);
    let key_space = env_u64("SCAVENGER_FUZZ_KEY_SPACE").unwrap_or(default_key_space);

    FuzzParams {
        seed: mix_seed(base_seed, test_tag),
        steps,
        key_space: key_space.max(1),
    }
}

pub fn rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Stream name drawn from `key_space` streams spread over a few categories.
pub fn choose_stream(rng: &mut StdRng, key_space: u64) -> String {
    let n = rng.gen_range(0..key_space);
    let category = (b'a' + (n % 4) as u8) as char;
    format!("{category}-{n}")
}
