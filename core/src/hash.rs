//! Keccak256 helpers shared by the Merkle tree and cheque codec.

use alloy_rlp::{BufMut, Decodable, Encodable};
use serde::{Deserialize, Serialize};
use tiny_keccak::{Hasher, Keccak};

/// A bare 32-byte digest, used for leaf/node hashes, lottery ids and the
/// Merkle root.
pub type Hash32 = [u8; 32];

/// Compute keccak256. Matches Solidity's `keccak256()` opcode — note that
/// `tiny_keccak::Keccak` is the original Keccak-256, not NIST SHA3-256.
pub fn keccak256(data: &[u8]) -> Hash32 {
    let mut hasher = Keccak::v256();
    hasher.update(data);
    let mut out = [0u8; 32];
    hasher.finalize(&mut out);
    out
}

/// Hash two 32-byte nodes in sibling order: `keccak256(min(a,b) || max(a,b))`.
///
/// Ordering by value (rather than by left/right position) means a Merkle
/// proof never needs to carry direction bits — the verifier derives them
/// from which side sorts lower at each step.
pub fn hash_pair(a: &Hash32, b: &Hash32) -> Hash32 {
    let (left, right) = if a <= b { (a, b) } else { (b, a) };
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(left);
    buf[32..].copy_from_slice(right);
    keccak256(&buf)
}

/// A wire-friendly wrapper around [`Hash32`] with RLP and serde support.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Digest(pub Hash32);

impl Encodable for Digest {
    fn encode(&self, out: &mut dyn BufMut) {
        self.0.as_slice().encode(out)
    }

    fn length(&self) -> usize {
        self.0.as_slice().length()
    }
}

impl Decodable for Digest {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let bytes = alloy_rlp::Bytes::decode(buf)?;
        let arr: Hash32 = bytes
            .as_ref()
            .try_into()
            .map_err(|_| alloy_rlp::Error::UnexpectedLength)?;
        Ok(Digest(arr))
    }
}

impl std::fmt::Debug for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl From<Hash32> for Digest {
    fn from(h: Hash32) -> Self {
        Digest(h)
    }
}

impl From<Digest> for Hash32 {
    fn from(d: Digest) -> Self {
        d.0
    }
}

