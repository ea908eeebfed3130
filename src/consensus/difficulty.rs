//! Difficulty retargeting and the proof-of-work predicate
//!
//! Every algorithm here is consensus-critical: a single diverging digit
//! forks the chain. The chain has gone through five retarget algorithms,
//! selected by hard-fork version:
//!
//! * v1 - the classic CryptoNote windowed average with outlier cut
//! * v2 - LWMA, the only variant computed in floating point
//! * v3 - LWMA-2, integer arithmetic with per-step clamping
//! * v4 - LWMA-4, tempering and jump rules plus digit cleanup
//! * v5 - LWMA-1, the parameterised successor used from v12 onward
//!
//! v2 reproduces the reference build's IEEE-754 double operations in their
//! original order; do not reorder or "simplify" the arithmetic.

use crate::constants::{
    DIFFICULTY_CUT, DIFFICULTY_GUESS, DIFFICULTY_HEIGHT, DIFFICULTY_MINIMUM,
    DIFFICULTY_TARGET_V2, DIFFICULTY_WINDOW, DIFFICULTY_WINDOW_V2,
};
use crate::crypto::Hash;

/// Difficulty value; v1 stays within 64 bits, later eras may use up to 128
pub type Difficulty = u128;

/// 64x64 -> 128 multiply, returned as (low, high) words
#[inline]
fn mul64(a: u64, b: u64) -> (u64, u64) {
    let product = a as u128 * b as u128;
    (product as u64, (product >> 64) as u64)
}

/// Would `a + b` carry?
#[inline]
fn cadd(a: u64, b: u64) -> bool {
    a.wrapping_add(b) < a
}

/// Would `a + b + carry` carry?
#[inline]
fn cadc(a: u64, b: u64, carry: bool) -> bool {
    let sum = a.wrapping_add(b);
    sum < a || (carry && sum == u64::MAX)
}

/// The hash as four little-endian words, word 3 most significant
fn hash_words(hash: &Hash) -> [u64; 4] {
    let mut words = [0u64; 4];
    for (i, word) in words.iter_mut().enumerate() {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&hash.0[i * 8..i * 8 + 8]);
        *word = u64::from_le_bytes(bytes);
    }
    words
}

/// Check a proof-of-work hash against a difficulty target
///
/// Interprets the hash as a 256-bit little-endian integer H and accepts iff
/// the product `H * difficulty` fits in 256 bits, which is equivalent to
/// `H <= floor((2^256 - 1) / difficulty)`. A difficulty of zero is undefined
/// and rejected outright; a difficulty of one accepts every hash.
pub fn check_hash(hash: &Hash, difficulty: Difficulty) -> bool {
    if difficulty == 0 {
        return false;
    }
    let w = hash_words(hash);
    match u64::try_from(difficulty) {
        Ok(d) => {
            // Check the highest word first; this already fails for almost
            // every random hash.
            let (top, high) = mul64(w[3], d);
            if high != 0 {
                return false;
            }
            let (_, mut cur) = mul64(w[0], d);
            let (low, high) = mul64(w[1], d);
            let mut carry = cadd(cur, low);
            cur = high;
            let (low, high) = mul64(w[2], d);
            carry = cadc(cur, low, carry);
            carry = cadc(high, top, carry);
            !carry
        }
        Err(_) => {
            // 4x2 limb schoolbook multiply into a 384-bit accumulator; the
            // product fits 256 bits iff the two top limbs stay zero.
            let d = [difficulty as u64, (difficulty >> 64) as u64];
            let mut acc = [0u64; 6];
            for i in 0..4 {
                let mut carry: u128 = 0;
                for j in 0..2 {
                    let sum = acc[i + j] as u128 + w[i] as u128 * d[j] as u128 + carry;
                    acc[i + j] = sum as u64;
                    carry = sum >> 64;
                }
                let mut k = i + 2;
                while carry != 0 && k < 6 {
                    let sum = acc[k] as u128 + carry;
                    acc[k] = sum as u64;
                    carry = sum >> 64;
                    k += 1;
                }
            }
            acc[4] == 0 && acc[5] == 0
        }
    }
}

/// Classic CryptoNote retarget (hard fork v7 era)
///
/// Sorts the timestamp window, trims `DIFFICULTY_CUT` outliers from each
/// tail and targets `target_seconds` over the remaining span. Returns 0 when
/// the intermediate `work * target` exceeds 64 bits, which block validation
/// treats as "difficulty overhead" and rejects.
pub fn next_difficulty(
    timestamps: &[u64],
    cumulative_difficulties: &[Difficulty],
    target_seconds: u64,
) -> Difficulty {
    let length = timestamps
        .len()
        .min(cumulative_difficulties.len())
        .min(DIFFICULTY_WINDOW);
    if length <= 1 {
        return 1;
    }

    let mut timestamps: Vec<u64> = timestamps[..length].to_vec();
    timestamps.sort_unstable();
    let cumulative_difficulties = &cumulative_difficulties[..length];

    let kept = DIFFICULTY_WINDOW - 2 * DIFFICULTY_CUT;
    let (cut_begin, cut_end) = if length <= kept {
        (0, length)
    } else {
        let begin = (length - kept + 1) / 2;
        (begin, begin + kept)
    };

    let mut time_span = timestamps[cut_end - 1] - timestamps[cut_begin];
    if time_span == 0 {
        time_span = 1;
    }
    let total_work = cumulative_difficulties[cut_end - 1] - cumulative_difficulties[cut_begin];
    debug_assert!(total_work > 0);

    let product = match total_work.checked_mul(target_seconds as u128) {
        Some(p) => p,
        None => return 0,
    };
    if product >> 64 != 0 {
        return 0;
    }
    let low = product as u64;
    let (rounded, overflow) = low.overflowing_add(time_span - 1);
    if overflow {
        return 0;
    }
    (rounded / time_span) as Difficulty
}

/// LWMA retarget (hard fork v8)
///
/// `next_difficulty = harmonic_mean(D) * T / LWMA(solvetimes)`, computed in
/// doubles exactly as the reference build does. Solvetimes may be negative
/// and are clamped to +-7T; the result is floored towards zero on the final
/// cast.
pub fn next_difficulty_v2(
    timestamps: &[u64],
    cumulative_difficulties: &[Difficulty],
    target_seconds: u64,
) -> Difficulty {
    let t = target_seconds as i64;
    let mut n = DIFFICULTY_WINDOW_V2;

    // A difficulty of 1 for the first 3 blocks at the start of the chain,
    // then a shrunken window until N+1 blocks exist.
    if timestamps.len() < 4 {
        return 1;
    } else if timestamps.len() < n + 1 {
        n = timestamps.len() - 1;
    }
    let timestamps = &timestamps[..n + 1];
    let cumulative_difficulties = &cumulative_difficulties[..n + 1];

    // adjust targets the average solvetime to within ~0.1% for this N
    let adjust = 0.998;
    // k normalizes the LWMA sum to a standard LWMA
    let k = (n * (n + 1) / 2) as f64;

    let mut lwma = 0f64;
    let mut sum_inverse_d = 0f64;
    for i in 1..=n {
        let solve_time = (timestamps[i] as i64 - timestamps[i - 1] as i64).clamp(-7 * t, 7 * t);
        let difficulty = cumulative_difficulties[i] - cumulative_difficulties[i - 1];
        lwma += (solve_time * i as i64) as f64 / k;
        sum_inverse_d += 1.0 / difficulty as f64;
    }
    let harmonic_mean_d = n as f64 / sum_inverse_d;

    // Keep the LWMA sane in case something unforeseen occurs
    if (lwma.round() as i64) < t / 20 {
        lwma = (t / 20) as f64;
    }

    (harmonic_mean_d * t as f64 / lwma * adjust) as Difficulty
}

/// LWMA-2 retarget (hard fork v10)
///
/// Integer-only variant with solvetimes clamped to `[-4T, 6T]`, a 67%..150%
/// band around the previous difficulty and a 108% kick when the last three
/// solvetimes sum below 0.8T. Callers must supply exactly N+1 consecutive
/// entries.
pub fn next_difficulty_v3(timestamps: &[u64], cumulative_difficulties: &[Difficulty]) -> Difficulty {
    let t = DIFFICULTY_TARGET_V2 as i128;
    let n = DIFFICULTY_WINDOW_V2;
    debug_assert!(timestamps.len() == cumulative_difficulties.len());
    debug_assert!(timestamps.len() == n + 1);

    let mut l: i128 = 0;
    let mut sum_3_st: i128 = 0;
    for i in 1..=n {
        let st = (timestamps[i] as i128 - timestamps[i - 1] as i128).clamp(-4 * t, 6 * t);
        l += st * i as i128;
        if i > n - 3 {
            sum_3_st += st;
        }
    }

    let mut next_d = ((cumulative_difficulties[n] - cumulative_difficulties[0]) as i128
        * t
        * (n as i128 + 1)
        * 99)
        / (100 * 2 * l);

    let prev_d = (cumulative_difficulties[n] - cumulative_difficulties[n - 1]) as i128;
    next_d = next_d.clamp((prev_d * 67) / 100, (prev_d * 150) / 100);

    if sum_3_st < (8 * t) / 10 {
        next_d = next_d.max((prev_d * 108) / 100);
    }

    if next_d < DIFFICULTY_MINIMUM as i128 {
        DIFFICULTY_MINIMUM as Difficulty
    } else {
        next_d as Difficulty
    }
}

/// LWMA-4 retarget (hard fork v11)
///
/// Rebuilds a monotonic timestamp sequence, tempers long solvetimes that
/// follow bursts of fast ones, floors the weighted sum at `N^2*T/20`, bumps
/// the result after suspiciously fast recent blocks, then rounds away the
/// insignificant digits and encodes the average of the last ten solvetimes
/// into the low three. Callers must supply exactly N+1 consecutive entries.
pub fn next_difficulty_v4(
    timestamps: &[u64],
    cumulative_difficulties: &[Difficulty],
    height: u64,
) -> Difficulty {
    let t = DIFFICULTY_TARGET_V2 as u128;
    let n = DIFFICULTY_WINDOW_V2;
    debug_assert!(timestamps.len() == cumulative_difficulties.len());
    debug_assert!(timestamps.len() == n + 1);

    if height >= DIFFICULTY_HEIGHT && height <= DIFFICULTY_HEIGHT + 1 {
        return DIFFICULTY_GUESS as Difficulty;
    }

    // Safely convert out-of-sequence timestamps into >= 0 solvetimes
    let mut ts = vec![0u64; n + 1];
    ts[0] = timestamps[0];
    for i in 1..=n {
        ts[i] = timestamps[i].max(ts[i - 1]);
    }

    let mut l: u128 = 0;
    for i in 1..=n {
        let gap = (ts[i] - ts[i - 1]) as u128;
        // Temper long solvetime drops if they were preceded by 3 or 6 fast
        // solves; otherwise cap the drop a long solvetime causes at 5T.
        let st = if i > 4 && gap > 5 * t && ((ts[i - 1] - ts[i - 4]) as u128) < (14 * t) / 10 {
            2 * t
        } else if i > 7 && gap > 5 * t && ((ts[i - 1] - ts[i - 7]) as u128) < 4 * t {
            2 * t
        } else {
            gap.min(5 * t)
        };
        l += st * i as u128;
    }
    let nn = n as u128;
    if l < nn * nn * t / 20 {
        l = nn * nn * t / 20;
    }
    let avg_d = (cumulative_difficulties[n] - cumulative_difficulties[0]) / nn;

    // Prevent round-off error for small D and overflow for large D
    let mut next_d = if avg_d > 2_000_000 * nn * nn * t {
        (avg_d / (200 * l)) * (nn * (nn + 1) * t * 97)
    } else {
        (avg_d * nn * (nn + 1) * t * 97) / (200 * l)
    };

    let prev_d = cumulative_difficulties[n] - cumulative_difficulties[n - 1];

    // 10% jump rule after suspiciously fast recent blocks
    if ((ts[n] - ts[n - 1]) as u128) < (2 * t) / 10
        || ((ts[n] - ts[n - 2]) as u128) < (5 * t) / 10
        || ((ts[n] - ts[n - 3]) as u128) < (8 * t) / 10
    {
        next_d = next_d.max(((prev_d * 110) / 100).min((105 * avg_d) / 100));
    }

    // Make all insignificant digits zero for easy reading
    let mut i: u128 = 1_000_000_000;
    while i > 1 {
        if next_d > i * 100 {
            next_d = ((next_d + i / 2) / i) * i;
            break;
        }
        i /= 10;
    }
    // Make the least 3 digits equal the average of the past 10 solvetimes
    if next_d > 100_000 {
        next_d = ((next_d + 500) / 1000) * 1000 + 999.min(((ts[n] - ts[n - 10]) as u128) / 10);
    }

    next_d.max(DIFFICULTY_MINIMUM as Difficulty)
}

/// LWMA-1 retarget (hard fork v12 onward), parameterised on target and window
///
/// Like v4 but with a simpler monotonic solvetime walk capped at 6T and a 99%
/// adjustment factor. Returns the seed difficulty while the window refills
/// after the reset at `DIFFICULTY_HEIGHT`. Callers must supply exactly
/// `window + 1` consecutive entries.
pub fn next_difficulty_v5(
    timestamps: &[u64],
    cumulative_difficulties: &[Difficulty],
    target_seconds: u64,
    window: u64,
    height: u64,
) -> Difficulty {
    let t = target_seconds as u128;
    let n = window as usize;
    debug_assert!(timestamps.len() == cumulative_difficulties.len());
    debug_assert!(timestamps.len() == n + 1);

    if height >= DIFFICULTY_HEIGHT && height < DIFFICULTY_HEIGHT + window {
        return DIFFICULTY_GUESS as Difficulty;
    }

    let mut l: u128 = 0;
    let mut previous = timestamps[0].wrapping_sub(target_seconds);
    for i in 1..=n {
        let this = if timestamps[i] > previous {
            timestamps[i]
        } else {
            previous + 1
        };
        l += ((this - previous) as u128).min(6 * t) * i as u128;
        previous = this;
    }
    let nn = n as u128;
    if l < nn * nn * t / 20 {
        l = nn * nn * t / 20;
    }
    let avg_d = (cumulative_difficulties[n] - cumulative_difficulties[0]) / nn;

    let mut next_d = if avg_d > 2_000_000 * nn * nn * t {
        (avg_d / (200 * l)) * (nn * (nn + 1) * t * 99)
    } else {
        (avg_d * nn * (nn + 1) * t * 99) / (200 * l)
    };

    let mut i: u128 = 1_000_000_000;
    while i > 1 {
        if next_d > i * 100 {
            next_d = ((next_d + i / 2) / i) * i;
            break;
        }
        i /= 10;
    }
    if next_d > 100_000 {
        next_d = ((next_d + 500) / 1000) * 1000
            + 999.min((timestamps[n].wrapping_sub(timestamps[n - 10]) as u128) / 10);
    }

    next_d.max(DIFFICULTY_MINIMUM as Difficulty)
}
