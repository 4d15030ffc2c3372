//! Cheque codec and validator (spec §4.B).
//!
//! A cheque is a signed, off-chain authorization letting one payee claim an
//! entire lottery deposit if a future block hash lands inside the payee's
//! signed sub-interval. Fields carried on the wire are minimal; everything
//! else (`lottery_id`, `lower_limit`, `upper_limit`, `signed_range`) is
//! re-derived deterministically by [`Cheque::derive`].

use crate::error::{LotteryError, Result};
use crate::hash::{keccak256, Hash32};
use crate::merkle::{fold_witness, Witness};
use alloy_rlp::{BufMut, Decodable, Encodable, Header};
use k256::ecdsa::{RecoveryId, Signature as K256Signature, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

pub type Address = [u8; 20];

/// Marks `signed_range` as never having been set — "never used" — so the
/// cumulative-payment arithmetic stays uniformly monotone after first use
/// without an `Option` wrapper per cheque.
pub const SENTINEL_RANGE: u64 = u64::MAX;

/// Fields re-derived from the wire fields; never transmitted directly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DerivedFields {
    pub merkle_root: Hash32,
    pub lottery_id: Hash32,
    pub lower_limit: u64,
    pub upper_limit: u64,
    /// `SENTINEL_RANGE` if `reveal_range` is unset.
    pub signed_range: u64,
}

/// A signed cheque, plus payee-side annotations that never leave the wire
/// encoding's scope of the drawer/drawee pair that holds it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Cheque {
    pub witness: Witness,
    pub contract_addr: Address,
    /// Empty (unused) or exactly 4 bytes: big-endian u32 upper limit.
    pub reveal_range: Vec<u8>,
    pub salt: u64,
    pub receiver_salt: u64,
    pub sig: [u8; 65],
    pub reveal_number: u64,
    pub amount: u64,

    #[serde(skip)]
    cached_signer: OnceLock<Address>,
}

impl PartialEq for Cheque {
    fn eq(&self, other: &Self) -> bool {
        self.witness == other.witness
            && self.contract_addr == other.contract_addr
            && self.reveal_range == other.reveal_range
            && self.salt == other.salt
            && self.receiver_salt == other.receiver_salt
            && self.sig == other.sig
            && self.reveal_number == other.reveal_number
            && self.amount == other.amount
    }
}

impl Cheque {
    pub fn new(
        witness: Witness,
        contract_addr: Address,
        salt: u64,
        receiver_salt: u64,
        reveal_number: u64,
    ) -> Self {
        Cheque {
            witness,
            contract_addr,
            reveal_range: Vec::new(),
            salt,
            receiver_salt,
            sig: [0u8; 65],
            reveal_number,
            amount: 0,
            cached_signer: OnceLock::new(),
        }
    }

    /// Re-derive `merkle_root`, `lottery_id`, `lower_limit`, `upper_limit`
    /// and `signed_range` from the wire fields (spec §3).
    pub fn derive(&self) -> Result<DerivedFields> {
        if !(self.reveal_range.is_empty() || self.reveal_range.len() == 4) {
            return Err(LotteryError::InvalidEntry);
        }
        let (merkle_root, position) = fold_witness(&self.witness)?;

        let level_below_root = (self.witness.len() as u32).saturating_sub(1);
        let shift = 32u32.saturating_sub(level_below_root);
        let slot_width: u64 = if shift >= 64 { 0 } else { 1u64 << shift };
        let lower_limit = position.saturating_mul(slot_width);
        let upper_limit = lower_limit.saturating_add(slot_width).saturating_sub(1);

        let mut lottery_id_preimage = Vec::with_capacity(32 + 8);
        lottery_id_preimage.extend_from_slice(&merkle_root);
        lottery_id_preimage.extend_from_slice(&self.salt.to_be_bytes());
        let lottery_id = keccak256(&lottery_id_preimage);

        let signed_range = if self.reveal_range.is_empty() {
            SENTINEL_RANGE
        } else {
            let mut buf = [0u8; 4];
            buf.copy_from_slice(&self.reveal_range);
            u32::from_be_bytes(buf) as u64
        };

        Ok(DerivedFields {
            merkle_root,
            lottery_id,
            lower_limit,
            upper_limit,
            signed_range,
        })
    }

    /// `keccak256(0x19 || 0x00 || contract_addr || lottery_id || reveal_range_bytes)`
    /// — an EIP-191 version-0x00 ("validator") digest.
    pub fn sign_hash(&self, lottery_id: Hash32) -> Hash32 {
        let mut preimage = Vec::with_capacity(2 + 20 + 32 + self.reveal_range.len());
        preimage.push(0x19);
        preimage.push(0x00);
        preimage.extend_from_slice(&self.contract_addr);
        preimage.extend_from_slice(&lottery_id);
        preimage.extend_from_slice(&self.reveal_range);
        keccak256(&preimage)
    }

    /// Attach a signature produced over [`Cheque::sign_hash`]. `v` must be 27/28.
    pub fn set_signature(&mut self, sig: [u8; 65]) {
        self.sig = sig;
        self.cached_signer = OnceLock::new();
    }

    /// Recover and cache the signer address via secp256k1 ECDSA recovery.
    pub fn signer(&self, lottery_id: Hash32) -> Result<Address> {
        if let Some(cached) = self.cached_signer.get() {
            return Ok(*cached);
        }
        let digest = self.sign_hash(lottery_id);
        let recovered = recover_signer(&self.sig, &digest)?;
        let _ = self.cached_signer.set(recovered);
        Ok(recovered)
    }

    /// Validate this cheque against the expected drawer, receiver and
    /// contract (spec §4.B "Validation (payee side)").
    pub fn validate(
        &self,
        expected_contract: Address,
        expected_drawer: Address,
        receiver_addr: Address,
    ) -> Result<DerivedFields> {
        if self.contract_addr != expected_contract {
            return Err(LotteryError::UnsolicitedCheque);
        }
        let derived = self.derive()?;
        let signer = self.signer(derived.lottery_id)?;
        if signer != expected_drawer {
            return Err(LotteryError::InvalidSignature);
        }
        let mut receiver_preimage = Vec::with_capacity(20 + 8);
        receiver_preimage.extend_from_slice(&receiver_addr);
        receiver_preimage.extend_from_slice(&self.receiver_salt.to_be_bytes());
        if keccak256(&receiver_preimage) != self.witness[0] {
            return Err(LotteryError::InvalidReceiver);
        }
        if derived.signed_range != SENTINEL_RANGE
            && !(derived.lower_limit <= derived.signed_range && derived.signed_range <= derived.upper_limit)
        {
            return Err(LotteryError::InvalidEntry);
        }
        Ok(derived)
    }

    /// Winner check: the reveal block hash's low 4 bytes, read big-endian,
    /// must fall within `[lower_limit, signed_range]`.
    pub fn reveal(&self, block_hash: Hash32, derived: &DerivedFields) -> bool {
        if derived.signed_range == SENTINEL_RANGE {
            return false;
        }
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&block_hash[28..32]);
        let h32 = u32::from_be_bytes(buf) as u64;
        derived.lower_limit <= h32 && h32 <= derived.signed_range
    }
}

/// Cumulative bump: compute the new `reveal_range` bytes and the amount this
/// bump pays off, rejecting non-monotone or zero-diff bumps (spec §4.B/§8.5).
pub fn bump_signed_range(
    stored: Option<&DerivedFields>,
    lower_limit: u64,
    upper_limit: u64,
    assigned: u64,
    want_amount: u64,
) -> Result<(u64, u64)> {
    let interval_width = upper_limit - lower_limit + 1;
    let current = stored.map(|d| d.signed_range).unwrap_or(SENTINEL_RANGE);

    let diff_range = ((want_amount as u128) * (interval_width as u128)).div_ceil(assigned as u128);
    let diff_range = diff_range.min(u64::MAX as u128) as u64;

    let new_signed_range = if current == SENTINEL_RANGE {
        lower_limit.saturating_add(diff_range).saturating_sub(1)
    } else {
        current.saturating_add(diff_range)
    };

    if new_signed_range > upper_limit {
        return Err(LotteryError::NotEnoughDeposit);
    }
    if diff_range == 0 {
        return Err(LotteryError::InvalidPayment);
    }

    let paid = paid_fraction(new_signed_range, lower_limit, upper_limit, assigned)
        - stored.map(|d| paid_fraction(d.signed_range, lower_limit, upper_limit, assigned)).unwrap_or(0);

    Ok((new_signed_range, paid))
}

/// Validate and accept an incoming cumulative bump on the payee side:
/// `new.signed_range` must strictly exceed the stored value.
pub fn accept_cumulative_bump(
    stored: Option<&DerivedFields>,
    new: &DerivedFields,
) -> Result<u64> {
    let current = stored.map(|d| d.signed_range).unwrap_or(SENTINEL_RANGE);
    if new.signed_range == SENTINEL_RANGE {
        return Err(LotteryError::InvalidPayment);
    }
    if current != SENTINEL_RANGE && new.signed_range <= current {
        return Err(LotteryError::StaleCheque);
    }
    Ok(new.signed_range)
}

/// Fraction of `assigned` paid off by a cheque with the given `signed_range`,
/// expressed as a whole-number amount: `(signed_range - lower + 1) / width * assigned`.
pub fn paid_fraction(signed_range: u64, lower_limit: u64, upper_limit: u64, assigned: u64) -> u64 {
    if signed_range == SENTINEL_RANGE {
        return 0;
    }
    let width = (upper_limit - lower_limit + 1) as u128;
    let paid_units = (signed_range - lower_limit + 1) as u128;
    ((paid_units * assigned as u128) / width) as u64
}

/// Deposit assigned to a leaf whose witness has `witness_len` elements:
/// `amount >> (witness_len - 1)`.
pub fn assigned_deposit(lottery_amount: u64, witness_len: usize) -> u64 {
    lottery_amount >> (witness_len.saturating_sub(1))
}

fn recover_signer(sig: &[u8; 65], digest: &Hash32) -> Result<Address> {
    let mut v = sig[64];
    if v >= 27 {
        v -= 27;
    }
    let recovery_id = RecoveryId::from_byte(v).ok_or(LotteryError::InvalidSignature)?;
    let signature =
        K256Signature::from_slice(&sig[..64]).map_err(|_| LotteryError::InvalidSignature)?;
    let verifying_key = VerifyingKey::recover_from_prehash(digest, &signature, recovery_id)
        .map_err(|_| LotteryError::InvalidSignature)?;
    Ok(address_from_verifying_key(&verifying_key))
}

/// Ethereum-style address derivation: the low 20 bytes of `keccak256(pubkey)`.
pub fn address_from_verifying_key(key: &VerifyingKey) -> Address {
    let uncompressed = key.to_encoded_point(false);
    let pubkey_bytes = &uncompressed.as_bytes()[1..]; // strip the 0x04 prefix
    let hash = keccak256(pubkey_bytes);
    let mut addr = [0u8; 20];
    addr.copy_from_slice(&hash[12..32]);
    addr
}

// ---------------------------------------------------------------------------
// Wire encoding (spec §6): a self-describing RLP list.
// ---------------------------------------------------------------------------

impl Encodable for Cheque {
    fn encode(&self, out: &mut dyn BufMut) {
        let witness_bytes: Vec<&[u8]> = self.witness.iter().map(|h| h.as_slice()).collect();
        let payload_length = witness_bytes.length()
            + self.contract_addr.as_slice().length()
            + self.reveal_range.as_slice().length()
            + self.salt.length()
            + self.receiver_salt.length()
            + self.sig.as_slice().length()
            + self.reveal_number.length()
            + self.amount.length();
        Header { list: true, payload_length }.encode(out);
        witness_bytes.encode(out);
        self.contract_addr.as_slice().encode(out);
        self.reveal_range.as_slice().encode(out);
        self.salt.encode(out);
        self.receiver_salt.encode(out);
        self.sig.as_slice().encode(out);
        self.reveal_number.encode(out);
        self.amount.encode(out);
    }

    fn length(&self) -> usize {
        let witness_bytes: Vec<&[u8]> = self.witness.iter().map(|h| h.as_slice()).collect();
        let payload_length = witness_bytes.length()
            + self.contract_addr.as_slice().length()
            + self.reveal_range.as_slice().length()
            + self.salt.length()
            + self.receiver_salt.length()
            + self.sig.as_slice().length()
            + self.reveal_number.length()
            + self.amount.length();
        Header { list: true, payload_length }.length() + payload_length
    }
}

impl Decodable for Cheque {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let header = Header::decode(buf)?;
        if !header.list {
            return Err(alloy_rlp::Error::UnexpectedString);
        }
        let mut payload = &buf[..header.payload_length];
        *buf = &buf[header.payload_length..];

        let witness_bytes: Vec<alloy_rlp::Bytes> = Decodable::decode(&mut payload)?;
        let witness = witness_bytes
            .into_iter()
            .map(|b| -> alloy_rlp::Result<Hash32> {
                b.as_ref().try_into().map_err(|_| alloy_rlp::Error::UnexpectedLength)
            })
            .collect::<alloy_rlp::Result<Vec<_>>>()?;

        let contract_addr_bytes: alloy_rlp::Bytes = Decodable::decode(&mut payload)?;
        let contract_addr: Address = contract_addr_bytes
            .as_ref()
            .try_into()
            .map_err(|_| alloy_rlp::Error::UnexpectedLength)?;

        let reveal_range_bytes: alloy_rlp::Bytes = Decodable::decode(&mut payload)?;
        // Decoders must treat a zero-length blob as "unused", not as 0x00000000.
        let reveal_range = if reveal_range_bytes.is_empty() {
            Vec::new()
        } else {
            reveal_range_bytes.to_vec()
        };

        let salt: u64 = Decodable::decode(&mut payload)?;
        let receiver_salt: u64 = Decodable::decode(&mut payload)?;

        let sig_bytes: alloy_rlp::Bytes = Decodable::decode(&mut payload)?;
        let sig: [u8; 65] = sig_bytes
            .as_ref()
            .try_into()
            .map_err(|_| alloy_rlp::Error::UnexpectedLength)?;

        let reveal_number: u64 = Decodable::decode(&mut payload)?;
        let amount: u64 = Decodable::decode(&mut payload)?;

        Ok(Cheque {
            witness,
            contract_addr,
            reveal_range,
            salt,
            receiver_salt,
            sig,
            reveal_number,
            amount,
            cached_signer: OnceLock::new(),
        })
    }
}

/// Decode a cheque from the wire and immediately run the full derive pass,
/// as required by spec §6 ("run the full derive_fields pass before
/// returning to the user").
pub fn decode_cheque(mut bytes: &[u8]) -> Result<(Cheque, DerivedFields)> {
    let cheque = Cheque::decode(&mut bytes)?;
    let derived = cheque.derive()?;
    Ok((cheque, derived))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::ecdsa::{signature::hazmat::PrehashSigner, SigningKey};

    fn test_signer() -> (SigningKey, Address) {
        let signing_key = SigningKey::from_slice(&[0x11u8; 32]).unwrap();
        let verifying_key = VerifyingKey::from(&signing_key);
        (signing_key, address_from_verifying_key(&verifying_key))
    }

    fn sign_raw(signing_key: &SigningKey, digest: &Hash32) -> [u8; 65] {
        let (sig, recid): (K256Signature, RecoveryId) = signing_key.sign_prehash(digest).unwrap();
        let mut out = [0u8; 65];
        out[..64].copy_from_slice(&sig.to_bytes());
        out[64] = recid.to_byte() + 27;
        out
    }

    fn sample_cheque(contract_addr: Address, receiver_addr: Address) -> (Cheque, u64, u64) {
        let receiver_salt = 7u64;
        let leaf_preimage = [receiver_addr.as_slice(), &receiver_salt.to_be_bytes()].concat();
        let leaf = keccak256(&leaf_preimage);
        let sibling = keccak256(b"sibling");
        let witness = vec![leaf, sibling];
        let cheque = Cheque::new(witness, contract_addr, 42, receiver_salt, 1_000);
        let derived = cheque.derive().unwrap();
        (cheque, derived.lower_limit, derived.upper_limit)
    }

    #[test]
    fn signer_recovery_round_trips() {
        let (signing_key, addr) = test_signer();
        let contract_addr = [0x22u8; 20];
        let (mut cheque, _, _) = sample_cheque(contract_addr, [0x33u8; 20]);
        let lottery_id = cheque.derive().unwrap().lottery_id;
        let digest = cheque.sign_hash(lottery_id);
        cheque.set_signature(sign_raw(&signing_key, &digest));
        assert_eq!(cheque.signer(lottery_id).unwrap(), addr);
        // Cached path returns the same value.
        assert_eq!(cheque.signer(lottery_id).unwrap(), addr);
    }

    #[test]
    fn wire_round_trip_preserves_derived_fields() {
        let contract_addr = [0x22u8; 20];
        let (mut cheque, lower, _upper) = sample_cheque(contract_addr, [0x33u8; 20]);
        cheque.reveal_range = (lower as u32).to_be_bytes().to_vec();
        cheque.amount = 9000;

        let mut buf = Vec::new();
        cheque.encode(&mut buf);
        let (decoded, derived) = decode_cheque(&buf).unwrap();
        assert_eq!(decoded, cheque);
        assert_eq!(derived, cheque.derive().unwrap());
    }

    #[test]
    fn stale_bump_is_rejected() {
        let contract_addr = [0x22u8; 20];
        let (cheque, lower, upper) = sample_cheque(contract_addr, [0x33u8; 20]);
        let mut stored = cheque.derive().unwrap();
        stored.signed_range = lower + 100;

        let mut stale = stored;
        stale.signed_range = lower + 50;
        assert!(matches!(
            accept_cumulative_bump(Some(&stored), &stale),
            Err(LotteryError::StaleCheque)
        ));

        let mut ahead = stored;
        ahead.signed_range = upper; // valid progression
        assert_eq!(accept_cumulative_bump(Some(&stored), &ahead).unwrap(), upper);
    }

    #[test]
    fn reveal_matches_signed_range_window() {
        let contract_addr = [0x22u8; 20];
        let (cheque, lower, _upper) = sample_cheque(contract_addr, [0x33u8; 20]);
        let mut derived = cheque.derive().unwrap();
        derived.signed_range = lower + 10;

        let mut hash = [0u8; 32];
        hash[28..].copy_from_slice(&(lower as u32).to_be_bytes());
        assert!(cheque.reveal(hash, &derived));

        hash[28..].copy_from_slice(&((lower + 11) as u32).to_be_bytes());
        assert!(!cheque.reveal(hash, &derived));
    }
}
