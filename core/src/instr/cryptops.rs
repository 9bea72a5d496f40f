use blake2::Blake2b512;
use blst::min_pk::{AggregateSignature, PublicKey, Signature};
use blst::BLST_ERROR;
use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use sha2::{Digest, Sha256, Sha512};
use sha3::{Keccak256, Keccak512};

use crate::cell::OwnedCellSlice;
use crate::dispatch::{mkfixed, mksimple, OpcodeTable};
use crate::error::{VmError, VmResult};
use crate::gas::price;
use crate::num::Int257;
use crate::stack::StackValue;
use crate::vm::VmState;

/// Domain separation tag of the basic BLS signature scheme the `BLS_*`
/// opcodes verify against.
const BLS_DST: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_NUL_";

fn exec_hashcu(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let cell = st.stack.pop_cell()?;
    st.stack
        .push_int(Int257::from_unsigned_bytes(&cell.repr_hash()));
    Ok(None)
}

fn exec_hashsu(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let slice = st.stack.pop_slice()?;
    st.register_cell_create()?;
    let hash = slice.slice_hash()?;
    st.stack.push_int(Int257::from_unsigned_bytes(&hash));
    Ok(None)
}

fn exec_sha256u(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let bytes = slice_bytes(st)?;
    let digest = Sha256::digest(&bytes);
    st.stack.push_int(Int257::from_unsigned_bytes(&digest));
    Ok(None)
}

/// Pops a slice whose remaining data is byte-aligned.
fn slice_bytes(st: &mut VmState) -> VmResult<Vec<u8>> {
    let mut slice = st.stack.pop_slice()?;
    let bits = slice.remaining_bits();
    if bits % 8 != 0 {
        return Err(VmError::cell_und("data is not byte-aligned"));
    }
    Ok(slice.fetch_bytes(bits / 8)?)
}

fn value_bytes(st: &mut VmState, value: StackValue) -> VmResult<Vec<u8>> {
    match value {
        StackValue::Slice(mut slice) => {
            let bits = slice.remaining_bits();
            if bits % 8 != 0 {
                return Err(VmError::cell_und("data is not byte-aligned"));
            }
            Ok(slice.fetch_bytes(bits / 8)?)
        }
        StackValue::Builder(builder) => {
            if builder.bits() % 8 != 0 {
                return Err(VmError::cell_und("data is not byte-aligned"));
            }
            Ok(builder.data().to_vec())
        }
        StackValue::Bytes(bytes) => Ok(bytes),
        other => Err(VmError::type_chk(format!(
            "expected a slice, builder or bytes, got {}",
            other.type_name()
        ))),
    }
}

#[derive(Debug, Clone, Copy)]
enum HashAlgo {
    Sha256,
    Sha512,
    Blake2b,
    Keccak256,
    Keccak512,
}

impl HashAlgo {
    fn from_id(id: u32) -> VmResult<Self> {
        match id {
            0 => Ok(HashAlgo::Sha256),
            1 => Ok(HashAlgo::Sha512),
            2 => Ok(HashAlgo::Blake2b),
            3 => Ok(HashAlgo::Keccak256),
            4 => Ok(HashAlgo::Keccak512),
            other => Err(VmError::range_chk(format!("unknown hash algorithm {other}"))),
        }
    }

    fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            HashAlgo::Sha256 => Sha256::digest(data).to_vec(),
            HashAlgo::Sha512 => Sha512::digest(data).to_vec(),
            HashAlgo::Blake2b => Blake2b512::digest(data).to_vec(),
            HashAlgo::Keccak256 => Keccak256::digest(data).to_vec(),
            HashAlgo::Keccak512 => Keccak512::digest(data).to_vec(),
        }
    }
}

/// `HASHEXT algo`: hashes the concatenation of `n` chunks taken from the
/// stack. The `A` form appends the digest to a builder found under the
/// chunks instead of pushing integers.
fn exec_hashext(st: &mut VmState, opc: u32, append: bool) -> VmResult<Option<i32>> {
    let algo = HashAlgo::from_id(opc & 0xFF)?;
    let count = st.stack.pop_smallint_range(255)? as usize;
    let chunks = st.stack.pop_many(count)?;
    let mut data = Vec::new();
    for chunk in chunks {
        data.extend_from_slice(&value_bytes(st, chunk)?);
    }
    st.consume_gas(data.len() as i64 * price::HASH_EXT_ENTRY)?;
    let digest = algo.digest(&data);

    if append {
        let builder = st.stack.pop_builder()?;
        let mut fork = super::cellops::builder_mut(builder);
        fork.store_bytes(&digest)?;
        st.stack.push_builder(fork);
    } else if digest.len() <= 32 {
        st.stack.push_int(Int257::from_unsigned_bytes(&digest));
    } else {
        let (hi, lo) = digest.split_at(32);
        st.stack.push_int(Int257::from_unsigned_bytes(hi));
        st.stack.push_int(Int257::from_unsigned_bytes(lo));
    }
    Ok(None)
}

/// `CHKSIGNU`: Ed25519 check of a signature over a 256-bit hash.
/// `CHKSIGNS` checks over arbitrary byte-aligned data instead.
fn exec_chksign(st: &mut VmState, from_slice: bool) -> VmResult<Option<i32>> {
    let key = st.stack.pop_finite()?;
    let signature_slice = st.stack.pop_slice()?;
    let data: Vec<u8> = if from_slice {
        let mut slice = st.stack.pop_slice()?;
        let bits = slice.remaining_bits();
        if bits % 8 != 0 {
            return Err(VmError::cell_und("signed data is not byte-aligned"));
        }
        slice.fetch_bytes(bits / 8)?
    } else {
        let hash = st.stack.pop_finite()?;
        hash.to_unsigned_bytes(32)
            .ok_or_else(|| VmError::range_chk("hash must fit 256 unsigned bits"))?
    };
    st.register_chksgn_call()?;

    let key_bytes = key
        .to_unsigned_bytes(32)
        .ok_or_else(|| VmError::range_chk("public key must fit 256 unsigned bits"))?;
    let mut sig = signature_slice.clone();
    if sig.remaining_bits() < 512 {
        return Err(VmError::cell_und("signature must be 512 bits"));
    }
    let sig_bytes = sig.fetch_bytes(64)?;

    let valid = nacl::sign::verify(&sig_bytes, &data, &key_bytes).unwrap_or(false);
    st.stack.push_bool(valid);
    Ok(None)
}

/// `ECRECOVER`: recovers a secp256k1 public key from a prehashed message
/// and an (r, s, v) signature; pushes `h x1 x2 -1` or `0`.
fn exec_ecrecover(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    st.consume_gas(price::ECRECOVER)?;
    let s = st.stack.pop_finite()?;
    let r = st.stack.pop_finite()?;
    let v = st.stack.pop_smallint_range(3)? as u8;
    let hash = st.stack.pop_finite()?;

    let recovered = (|| {
        let hash_bytes = hash.to_unsigned_bytes(32)?;
        let mut sig_bytes = r.to_unsigned_bytes(32)?;
        sig_bytes.extend_from_slice(&s.to_unsigned_bytes(32)?);
        let signature = EcdsaSignature::from_slice(&sig_bytes).ok()?;
        let recovery_id = RecoveryId::from_byte(v)?;
        let key = VerifyingKey::recover_from_prehash(&hash_bytes, &signature, recovery_id).ok()?;
        let point = key.to_encoded_point(false);
        let bytes = point.as_bytes();
        // Uncompressed SEC1: 0x04 || x(32) || y(32).
        let h = bytes[0] as i64;
        let x1 = Int257::from_unsigned_bytes(&bytes[1..33]);
        let x2 = Int257::from_unsigned_bytes(&bytes[33..65]);
        Some((h, x1, x2))
    })();

    match recovered {
        Some((h, x1, x2)) => {
            st.stack.push_int(h);
            st.stack.push_int(x1);
            st.stack.push_int(x2);
            st.stack.push_bool(true);
        }
        None => st.stack.push_bool(false),
    }
    Ok(None)
}

fn pop_bls_pubkey(st: &mut VmState) -> VmResult<PublicKey> {
    let bytes = pop_sized_bytes(st, 48)?;
    PublicKey::from_bytes(&bytes).map_err(|_| VmError::cell_und("malformed BLS public key"))
}

fn pop_bls_signature(st: &mut VmState) -> VmResult<Signature> {
    let bytes = pop_sized_bytes(st, 96)?;
    Signature::from_bytes(&bytes).map_err(|_| VmError::cell_und("malformed BLS signature"))
}

fn pop_sized_bytes(st: &mut VmState, len: usize) -> VmResult<Vec<u8>> {
    let mut slice = st.stack.pop_slice()?;
    if slice.remaining_bits() < len * 8 {
        return Err(VmError::cell_und(format!("expected {len} bytes")));
    }
    Ok(slice.fetch_bytes(len)?)
}

fn pop_message_bytes(st: &mut VmState) -> VmResult<Vec<u8>> {
    slice_bytes(st)
}

fn exec_bls_verify(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    st.consume_gas(price::BLS_VERIFY)?;
    let sig = pop_bls_signature(st)?;
    let msg = pop_message_bytes(st)?;
    let pk = pop_bls_pubkey(st)?;
    let ok = sig.verify(true, &msg, BLS_DST, &[], &pk, true) == BLST_ERROR::BLST_SUCCESS;
    st.stack.push_bool(ok);
    Ok(None)
}

fn exec_bls_aggregate(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let count = st.stack.pop_smallint_range(255)? as usize;
    if count == 0 {
        return Err(VmError::range_chk("cannot aggregate zero signatures"));
    }
    st.consume_gas(
        price::BLS_AGGREGATE_BASE + count as i64 * price::BLS_AGGREGATE_ELEMENT,
    )?;
    let mut signatures = Vec::with_capacity(count);
    for _ in 0..count {
        signatures.push(pop_bls_signature(st)?);
    }
    let refs: Vec<&Signature> = signatures.iter().collect();
    let aggregate = AggregateSignature::aggregate(&refs, true)
        .map_err(|_| VmError::cell_und("signature aggregation failed"))?;
    let bytes = aggregate.to_signature().to_bytes();
    push_bytes_as_slice(st, &bytes)?;
    Ok(None)
}

fn exec_bls_fast_aggregate_verify(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let sig = pop_bls_signature(st)?;
    let msg = pop_message_bytes(st)?;
    let count = st.stack.pop_smallint_range(255)? as usize;
    st.consume_gas(
        price::BLS_FAST_AGGREGATE_VERIFY_BASE
            + count as i64 * price::BLS_FAST_AGGREGATE_VERIFY_ELEMENT,
    )?;
    let mut keys = Vec::with_capacity(count);
    for _ in 0..count {
        keys.push(pop_bls_pubkey(st)?);
    }
    let refs: Vec<&PublicKey> = keys.iter().collect();
    let ok = !refs.is_empty()
        && sig.fast_aggregate_verify(true, &msg, BLS_DST, &refs) == BLST_ERROR::BLST_SUCCESS;
    st.stack.push_bool(ok);
    Ok(None)
}

fn exec_bls_aggregate_verify(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let sig = pop_bls_signature(st)?;
    let count = st.stack.pop_smallint_range(255)? as usize;
    st.consume_gas(
        price::BLS_AGGREGATE_VERIFY_BASE + count as i64 * price::BLS_AGGREGATE_VERIFY_ELEMENT,
    )?;
    let mut keys = Vec::with_capacity(count);
    let mut messages = Vec::with_capacity(count);
    for _ in 0..count {
        let msg = pop_message_bytes(st)?;
        let pk = pop_bls_pubkey(st)?;
        keys.push(pk);
        messages.push(msg);
    }
    let key_refs: Vec<&PublicKey> = keys.iter().collect();
    let msg_refs: Vec<&[u8]> = messages.iter().map(|m| m.as_slice()).collect();
    let ok = !key_refs.is_empty()
        && sig.aggregate_verify(true, &msg_refs, BLS_DST, &key_refs, true)
            == BLST_ERROR::BLST_SUCCESS;
    st.stack.push_bool(ok);
    Ok(None)
}

fn exec_bls_pubkey_check(st: &mut VmState, _: u32) -> VmResult<Option<i32>> {
    let bytes = pop_sized_bytes(st, 48)?;
    let ok = PublicKey::key_validate(&bytes).is_ok();
    st.stack.push_bool(ok);
    Ok(None)
}

fn push_bytes_as_slice(st: &mut VmState, bytes: &[u8]) -> VmResult<()> {
    let mut builder = crate::cell::CellBuilder::new();
    builder.store_bytes(bytes)?;
    st.register_cell_create()?;
    let cell = builder.build()?.to_arc();
    st.stack.push_slice(OwnedCellSlice::new(cell)?);
    Ok(())
}

pub fn register(t: &mut OpcodeTable) {
    t.insert(mksimple(0xF900, 16, "HASHCU", exec_hashcu));
    t.insert(mksimple(0xF901, 16, "HASHSU", exec_hashsu));
    t.insert(mksimple(0xF902, 16, "SHA256U", exec_sha256u));
    t.insert(mkfixed(0xF904, 16, 8, "HASHEXT", |st, opc| {
        exec_hashext(st, opc, false)
    })
    .with_version(4));
    t.insert(mkfixed(0xF906, 16, 8, "HASHEXTA", |st, opc| {
        exec_hashext(st, opc, true)
    })
    .with_version(4));
    t.insert(mksimple(0xF910, 16, "CHKSIGNU", |st, _| {
        exec_chksign(st, false)
    }));
    t.insert(mksimple(0xF911, 16, "CHKSIGNS", |st, _| exec_chksign(st, true)));
    t.insert(mksimple(0xF912, 16, "ECRECOVER", exec_ecrecover).with_version(4));

    t.insert(mksimple(0xF930, 16, "BLS_VERIFY", exec_bls_verify).with_version(4));
    t.insert(mksimple(0xF931, 16, "BLS_AGGREGATE", exec_bls_aggregate).with_version(4));
    t.insert(
        mksimple(0xF932, 16, "BLS_FASTAGGREGATEVERIFY", exec_bls_fast_aggregate_verify)
            .with_version(4),
    );
    t.insert(
        mksimple(0xF933, 16, "BLS_AGGREGATEVERIFY", exec_bls_aggregate_verify).with_version(4),
    );
    t.insert(mksimple(0xF934, 16, "BLS_PUBKEYCHK", exec_bls_pubkey_check).with_version(4));
}
