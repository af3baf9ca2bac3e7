//! SpamSum context-triggered piecewise hash (ssdeep-compatible digest
//! string `blocksize:hash1:hash2`).

const ROLLING_WINDOW:  usize = 7;
const MIN_BLOCKSIZE:   u64   = 3;
const HASH_PRIME:      u32   = 0x0100_0193;
const HASH_INIT:       u32   = 0x2802_1967;
const NUM_BLOCKHASHES: usize = 31;
const SPAMSUM_LENGTH:  usize = 64;

const B64: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

#[inline]
fn block_size(index: usize) -> u64 {
    MIN_BLOCKSIZE << index
}

#[inline]
fn sum_hash(c: u8, h: u32) -> u32 {
    h.wrapping_mul(HASH_PRIME) ^ c as u32
}

#[derive(Debug, Clone, Default)]
struct RollState {
    window: [u8; ROLLING_WINDOW],
    h1:     u32,
    h2:     u32,
    h3:     u32,
    n:      usize,
}

impl RollState {
    fn roll(&mut self, c: u8) {
        self.h2 = self.h2.wrapping_sub(self.h1);
        self.h2 = self.h2.wrapping_add((ROLLING_WINDOW as u32).wrapping_mul(c as u32));
        self.h1 = self.h1.wrapping_add(c as u32);
        self.h1 = self.h1.wrapping_sub(self.window[self.n] as u32);
        self.window[self.n] = c;
        self.n = (self.n + 1) % ROLLING_WINDOW;
        self.h3 = (self.h3 << 5) ^ c as u32;
    }

    fn sum(&self) -> u32 {
        self.h1.wrapping_add(self.h2).wrapping_add(self.h3)
    }
}

#[derive(Debug, Clone, Copy)]
struct BlockHash {
    h:           u32,
    half_h:      u32,
    /// `digest[dlen]` holds the pending trailing character, 0 when none.
    digest:      [u8; SPAMSUM_LENGTH],
    half_digest: u8,
    dlen:        usize,
}

impl BlockHash {
    const fn fresh() -> Self {
        Self { h: HASH_INIT, half_h: HASH_INIT, digest: [0; SPAMSUM_LENGTH], half_digest: 0, dlen: 0 }
    }
}

/// Streaming SpamSum context.
#[derive(Debug, Clone)]
pub struct SpamSum {
    bh:         [BlockHash; NUM_BLOCKHASHES],
    bh_start:   usize,
    bh_end:     usize,
    roll:       RollState,
    total_size: u64,
}

impl Default for SpamSum {
    fn default() -> Self {
        Self::new()
    }
}

impl SpamSum {
    pub fn new() -> Self {
        Self {
            bh:         [BlockHash::fresh(); NUM_BLOCKHASHES],
            bh_start:   0,
            bh_end:     1,
            roll:       RollState::default(),
            total_size: 0,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.total_size += data.len() as u64;
        for &c in data {
            self.step(c);
        }
    }

    fn try_fork(&mut self) {
        if self.bh_end >= NUM_BLOCKHASHES {
            return;
        }
        let prev = self.bh[self.bh_end - 1];
        let next = &mut self.bh[self.bh_end];
        next.h           = prev.h;
        next.half_h      = prev.half_h;
        next.digest[0]   = 0;
        next.half_digest = 0;
        next.dlen        = 0;
        self.bh_end += 1;
    }

    fn try_reduce(&mut self) {
        if self.bh_end - self.bh_start < 2 {
            return;
        }
        if block_size(self.bh_start) * SPAMSUM_LENGTH as u64 >= self.total_size {
            return;
        }
        if self.bh[self.bh_start + 1].dlen < SPAMSUM_LENGTH / 2 {
            return;
        }
        self.bh_start += 1;
    }

    fn step(&mut self, c: u8) {
        self.roll.roll(c);
        let h = self.roll.sum() as u64;

        for bh in &mut self.bh[self.bh_start..self.bh_end] {
            bh.h      = sum_hash(c, bh.h);
            bh.half_h = sum_hash(c, bh.half_h);
        }

        let mut i = self.bh_start;
        while i < self.bh_end {
            if h % block_size(i) != block_size(i) - 1 {
                break;
            }
            if self.bh[i].dlen == 0 {
                self.try_fork();
            }
            let bh = &mut self.bh[i];
            bh.digest[bh.dlen] = B64[(bh.h % 64) as usize];
            bh.half_digest     = B64[(bh.half_h % 64) as usize];
            if bh.dlen < SPAMSUM_LENGTH - 1 {
                bh.dlen += 1;
                bh.digest[bh.dlen] = 0;
                bh.h = HASH_INIT;
                if bh.dlen < SPAMSUM_LENGTH / 2 {
                    bh.half_h      = HASH_INIT;
                    bh.half_digest = 0;
                }
            } else {
                self.try_reduce();
            }
            i += 1;
        }
    }

    /// Render the digest string.  The context stays usable.
    pub fn finalize(&self) -> String {
        let h = self.roll.sum();
        let mut bi = self.bh_start;

        while block_size(bi) * (SPAMSUM_LENGTH as u64) < self.total_size {
            bi += 1;
            if bi >= NUM_BLOCKHASHES {
                bi = NUM_BLOCKHASHES - 1;
                break;
            }
        }
        while bi >= self.bh_end {
            bi -= 1;
        }
        while bi > self.bh_start && self.bh[bi].dlen < SPAMSUM_LENGTH / 2 {
            bi -= 1;
        }

        let mut out = format!("{}:", block_size(bi));
        let first = &self.bh[bi];
        out.extend(first.digest[..first.dlen].iter().map(|&b| b as char));
        if h != 0 {
            out.push(B64[(first.h % 64) as usize] as char);
        } else if first.digest[first.dlen] != 0 {
            out.push(first.digest[first.dlen] as char);
        }
        out.push(':');

        if bi < self.bh_end - 1 {
            let second = &self.bh[bi + 1];
            let len = second.dlen.min(SPAMSUM_LENGTH / 2 - 1);
            out.extend(second.digest[..len].iter().map(|&b| b as char));
            if h != 0 {
                out.push(B64[(second.half_h % 64) as usize] as char);
            } else if second.half_digest != 0 {
                out.push(second.half_digest as char);
            }
        } else if h != 0 {
            let c = if bi == 0 { first.h } else { first.half_h };
            out.push(B64[(c % 64) as usize] as char);
        }
        out
    }
}

/// One-shot SpamSum of `data`.
pub fn spamsum(data: &[u8]) -> String {
    let mut ctx = SpamSum::new();
    ctx.update(data);
    ctx.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input() {
        assert_eq!(spamsum(&[]), "3::");
    }

    #[test]
    fn digest_shape() {
        let data: Vec<u8> = (0..200_000u32).map(|i| (i.wrapping_mul(2_654_435_761) >> 13) as u8).collect();
        let digest = spamsum(&data);
        let parts: Vec<&str> = digest.split(':').collect();
        assert_eq!(parts.len(), 3);
        let bs: u64 = parts[0].parse().unwrap();
        assert_eq!(bs % 3, 0);
        assert!(parts[1].len() <= SPAMSUM_LENGTH);
        assert!(parts[2].len() <= SPAMSUM_LENGTH / 2);
        assert!(parts[1].bytes().all(|b| B64.contains(&b)));
    }

    #[test]
    fn streaming_matches_one_shot() {
        let data: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8 ^ (i >> 7) as u8).collect();
        let mut ctx = SpamSum::new();
        for chunk in data.chunks(2048) {
            ctx.update(chunk);
        }
        assert_eq!(ctx.finalize(), spamsum(&data));
    }

    #[test]
    fn different_inputs_differ() {
        let a: Vec<u8> = (0..40_000u32).map(|i| (i * 7 % 256) as u8).collect();
        let b: Vec<u8> = (0..40_000u32).map(|i| (i * 13 % 253) as u8).collect();
        assert_ne!(spamsum(&a), spamsum(&b));
    }
}
