use std::fmt;

use serde::{Deserialize, Serialize};

/// 256-bit little-endian integer used as a proof-of-work search cursor.
///
/// Limb 0 is the least significant; `inc()` carries upward. The 32-byte wire
/// form (`to_bytes`) fills the second half of the 64-byte connection prelude.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Uint256(pub [u64; 4]);

impl Uint256 {
    pub fn new(a: u64, b: u64, c: u64, d: u64) -> Self {
        Uint256([a, b, c, d])
    }

    /// Increment by one, carrying across limbs. Wraps at 2^256.
    pub fn inc(&mut self) {
        for limb in self.0.iter_mut() {
            let (v, overflow) = limb.overflowing_add(1);
            *limb = v;
            if !overflow {
                return;
            }
        }
    }

    /// Little-endian 32-byte form.
    pub fn to_bytes(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        for (i, limb) in self.0.iter().enumerate() {
            out[i * 8..(i + 1) * 8].copy_from_slice(&limb.to_le_bytes());
        }
        out
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        let mut limbs = [0u64; 4];
        for (i, limb) in limbs.iter_mut().enumerate() {
            let mut chunk = [0u8; 8];
            chunk.copy_from_slice(&bytes[i * 8..(i + 1) * 8]);
            *limb = u64::from_le_bytes(chunk);
        }
        Uint256(limbs)
    }
}

impl From<u64> for Uint256 {
    fn from(v: u64) -> Self {
        Uint256([v, 0, 0, 0])
    }
}

impl fmt::Debug for Uint256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Uint256({:#x}, {:#x}, {:#x}, {:#x})",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}
