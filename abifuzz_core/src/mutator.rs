//! Type-directed mutation strategies, one per ABI value variant.
//!
//! Every mutator knows a canonical minimal seed value and a set of
//! perturbation strategies that respect the type's domain bounds. Boundary
//! cases re-route to a complementary strategy (subtracting at zero becomes an
//! addition) instead of clamping, so mutation never yields an out-of-range
//! value and never loops.

use crate::abi::{AbiType, AbiValue, AccountRef, Method};
use crate::executor::{AccountFunder, BackendError};
use rand::Rng;
use rand_core::RngCore;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MutatorError {
    #[error("value shape does not match the declared parameter type: {0}")]
    TypeMismatch(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Per-call context handed to every mutation. Carries the known-account pool,
/// the acting account, and the funding hook needed by the currency-transfer
/// mutator.
pub struct MutationCtx<'a> {
    pub accounts: &'a [AccountRef],
    pub sender: &'a AccountRef,
    pub funder: &'a mut dyn AccountFunder,
}

/// A mutation strategy for one ABI value variant.
///
/// `seed` is pure; `mutate` may touch the backend (the currency-transfer
/// mutator queries and tops up balances), which is why it returns a `Result`.
pub trait ValueMutator {
    fn seed(&self, accounts: &[AccountRef]) -> AbiValue;

    fn mutate(
        &self,
        value: &AbiValue,
        rng: &mut dyn RngCore,
        ctx: &mut MutationCtx<'_>,
    ) -> Result<AbiValue, MutatorError>;
}

fn mismatch(expected: &str, got: &AbiValue) -> MutatorError {
    MutatorError::TypeMismatch(format!("expected {expected}, got {got}"))
}

/// Unsigned integers bounded to `[0, 2^bits - 1]`. Declared widths beyond 128
/// bits are capped: mutation explores the low 128 bits, which is also the
/// conservative fallback for any type the factory cannot map more precisely.
pub struct UintMutator {
    bits: u32,
    max: u128,
}

impl UintMutator {
    pub fn new(bits: u16) -> Self {
        let bits = u32::from(bits).min(128);
        let max = if bits == 128 {
            u128::MAX
        } else {
            (1u128 << bits) - 1
        };
        Self { bits, max }
    }

    fn perturb(&self, value: u128, rng: &mut dyn RngCore) -> u128 {
        match rng.random_range(0..8u32) {
            0 => self.add(value, rng),
            1 => self.subtract(value, rng),
            2 => self.multiply(value, rng),
            3 => self.divide(value, rng),
            4 => self.bitwise_and(value, rng),
            5 => self.bitwise_or(value, rng),
            6 => self.bitwise_xor(value, rng),
            _ => self.flip_bit(value, rng),
        }
    }

    fn add(&self, value: u128, rng: &mut dyn RngCore) -> u128 {
        if value == self.max {
            return self.subtract(value, rng);
        }
        value + rng.random_range(1..=self.max - value)
    }

    fn subtract(&self, value: u128, rng: &mut dyn RngCore) -> u128 {
        if value == 0 {
            return self.add(value, rng);
        }
        value - rng.random_range(1..=value)
    }

    fn multiply(&self, value: u128, rng: &mut dyn RngCore) -> u128 {
        if value == 0 {
            return self.add(value, rng);
        }
        if value == self.max {
            return self.divide(value, rng);
        }
        value * rng.random_range(1..=self.max / value)
    }

    fn divide(&self, value: u128, rng: &mut dyn RngCore) -> u128 {
        if value == 0 {
            return self.add(value, rng);
        }
        value / rng.random_range(1..=value)
    }

    fn bitwise_and(&self, value: u128, rng: &mut dyn RngCore) -> u128 {
        if value == 0 {
            return self.add(value, rng);
        }
        value & rng.random_range(0..=self.max)
    }

    fn bitwise_or(&self, value: u128, rng: &mut dyn RngCore) -> u128 {
        value | rng.random_range(0..=self.max)
    }

    fn bitwise_xor(&self, value: u128, rng: &mut dyn RngCore) -> u128 {
        value ^ rng.random_range(0..=self.max)
    }

    fn flip_bit(&self, value: u128, rng: &mut dyn RngCore) -> u128 {
        value ^ (1u128 << rng.random_range(0..self.bits))
    }
}

impl ValueMutator for UintMutator {
    fn seed(&self, _accounts: &[AccountRef]) -> AbiValue {
        AbiValue::Uint(0)
    }

    fn mutate(
        &self,
        value: &AbiValue,
        rng: &mut dyn RngCore,
        _ctx: &mut MutationCtx<'_>,
    ) -> Result<AbiValue, MutatorError> {
        match value {
            AbiValue::Uint(v) => Ok(AbiValue::Uint(self.perturb(*v, rng))),
            other => Err(mismatch("uint", other)),
        }
    }
}

/// Fixed-point values, mutated through their scaled integer representation.
pub struct FixedMutator {
    inner: UintMutator,
    precision: u8,
}

impl FixedMutator {
    pub fn new(bits: u16, precision: u8) -> Self {
        Self {
            inner: UintMutator::new(bits),
            precision,
        }
    }
}

impl ValueMutator for FixedMutator {
    fn seed(&self, _accounts: &[AccountRef]) -> AbiValue {
        AbiValue::Ufixed {
            scaled: 0,
            precision: self.precision,
        }
    }

    fn mutate(
        &self,
        value: &AbiValue,
        rng: &mut dyn RngCore,
        _ctx: &mut MutationCtx<'_>,
    ) -> Result<AbiValue, MutatorError> {
        match value {
            AbiValue::Ufixed { scaled, .. } => Ok(AbiValue::Ufixed {
                scaled: self.inner.perturb(*scaled, rng),
                precision: self.precision,
            }),
            other => Err(mismatch("ufixed", other)),
        }
    }
}

/// Single bytes, an 8-bit specialization of the integer mutator.
pub struct ByteMutator {
    inner: UintMutator,
}

impl ByteMutator {
    pub fn new() -> Self {
        Self {
            inner: UintMutator::new(8),
        }
    }
}

impl Default for ByteMutator {
    fn default() -> Self {
        Self::new()
    }
}

impl ValueMutator for ByteMutator {
    fn seed(&self, _accounts: &[AccountRef]) -> AbiValue {
        AbiValue::Byte(0)
    }

    fn mutate(
        &self,
        value: &AbiValue,
        rng: &mut dyn RngCore,
        _ctx: &mut MutationCtx<'_>,
    ) -> Result<AbiValue, MutatorError> {
        match value {
            AbiValue::Byte(v) => Ok(AbiValue::Byte(
                self.inner.perturb(u128::from(*v), rng) as u8,
            )),
            other => Err(mismatch("byte", other)),
        }
    }
}

pub struct BoolMutator;

impl ValueMutator for BoolMutator {
    fn seed(&self, _accounts: &[AccountRef]) -> AbiValue {
        AbiValue::Bool(false)
    }

    fn mutate(
        &self,
        value: &AbiValue,
        _rng: &mut dyn RngCore,
        _ctx: &mut MutationCtx<'_>,
    ) -> Result<AbiValue, MutatorError> {
        match value {
            AbiValue::Bool(v) => Ok(AbiValue::Bool(!v)),
            other => Err(mismatch("bool", other)),
        }
    }
}

const DEFAULT_MAX_STRING_LEN: usize = 256;

/// Strings up to a fixed maximum length: delete, insert, or replace one
/// character, with symmetric fallback at the empty and full boundaries.
pub struct StringMutator {
    max: usize,
}

impl StringMutator {
    pub fn new(max: usize) -> Self {
        Self { max }
    }

    fn remove_char(&self, chars: &mut Vec<char>, rng: &mut dyn RngCore) {
        if chars.is_empty() {
            return self.add_char(chars, rng);
        }
        let index = rng.random_range(0..chars.len());
        chars.remove(index);
    }

    fn add_char(&self, chars: &mut Vec<char>, rng: &mut dyn RngCore) {
        if chars.len() >= self.max {
            return self.remove_char(chars, rng);
        }
        let index = rng.random_range(0..=chars.len());
        chars.insert(index, char::from(rng.random_range(0u8..=255)));
    }

    fn flip_char(&self, chars: &mut Vec<char>, rng: &mut dyn RngCore) {
        if chars.is_empty() {
            return self.add_char(chars, rng);
        }
        let index = rng.random_range(0..chars.len());
        chars[index] = char::from(rng.random_range(0u8..=255));
    }
}

impl Default for StringMutator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_STRING_LEN)
    }
}

impl ValueMutator for StringMutator {
    fn seed(&self, _accounts: &[AccountRef]) -> AbiValue {
        AbiValue::String(String::new())
    }

    fn mutate(
        &self,
        value: &AbiValue,
        rng: &mut dyn RngCore,
        _ctx: &mut MutationCtx<'_>,
    ) -> Result<AbiValue, MutatorError> {
        let AbiValue::String(s) = value else {
            return Err(mismatch("string", value));
        };
        let mut chars: Vec<char> = s.chars().collect();
        match rng.random_range(0..3u32) {
            0 => self.remove_char(&mut chars, rng),
            1 => self.add_char(&mut chars, rng),
            _ => self.flip_char(&mut chars, rng),
        }
        Ok(AbiValue::String(chars.into_iter().collect()))
    }
}

/// Serialized-size budget shared by all dynamic arrays.
const ARRAY_BYTE_BUDGET: usize = 2048;
/// Estimated element size when the child type has no static packed length.
const DYNAMIC_ELEM_ESTIMATE: usize = 64;

/// Dynamic arrays: insert a freshly seeded element, remove an element, or
/// replace one via the child mutator. The element count is capped so the
/// packed value stays within the serialization budget.
pub struct DynArrayMutator {
    child: Box<dyn ValueMutator>,
    max: usize,
}

impl DynArrayMutator {
    pub fn new(child_ty: &AbiType) -> Self {
        let elem_len = child_ty
            .packed_byte_len()
            .unwrap_or(DYNAMIC_ELEM_ESTIMATE);
        Self {
            child: mutator_for(child_ty),
            max: (ARRAY_BYTE_BUDGET / elem_len).max(1),
        }
    }

    fn apply(
        &self,
        strategy: u32,
        elems: &[AbiValue],
        rng: &mut dyn RngCore,
        ctx: &mut MutationCtx<'_>,
    ) -> Result<Vec<AbiValue>, MutatorError> {
        match strategy {
            0 => {
                if elems.len() >= self.max {
                    return self.apply(1, elems, rng, ctx);
                }
                let mut out = elems.to_vec();
                let index = rng.random_range(0..=elems.len());
                out.insert(index, self.child.seed(ctx.accounts));
                Ok(out)
            }
            1 => {
                if elems.is_empty() {
                    return self.apply(0, elems, rng, ctx);
                }
                let mut out = elems.to_vec();
                out.remove(rng.random_range(0..elems.len()));
                Ok(out)
            }
            _ => {
                if elems.is_empty() {
                    return self.apply(0, elems, rng, ctx);
                }
                let index = rng.random_range(0..elems.len());
                let mut out = elems.to_vec();
                out[index] = self.child.mutate(&elems[index], rng, ctx)?;
                Ok(out)
            }
        }
    }
}

impl ValueMutator for DynArrayMutator {
    fn seed(&self, _accounts: &[AccountRef]) -> AbiValue {
        AbiValue::Array(Vec::new())
    }

    fn mutate(
        &self,
        value: &AbiValue,
        rng: &mut dyn RngCore,
        ctx: &mut MutationCtx<'_>,
    ) -> Result<AbiValue, MutatorError> {
        let AbiValue::Array(elems) = value else {
            return Err(mismatch("array", value));
        };
        let strategy = rng.random_range(0..3u32);
        Ok(AbiValue::Array(self.apply(strategy, elems, rng, ctx)?))
    }
}

/// Static arrays keep their declared length; only element replacement applies.
pub struct StaticArrayMutator {
    child: Box<dyn ValueMutator>,
    len: usize,
}

impl StaticArrayMutator {
    pub fn new(child_ty: &AbiType, len: usize) -> Self {
        Self {
            child: mutator_for(child_ty),
            len,
        }
    }
}

impl ValueMutator for StaticArrayMutator {
    fn seed(&self, accounts: &[AccountRef]) -> AbiValue {
        AbiValue::Array((0..self.len).map(|_| self.child.seed(accounts)).collect())
    }

    fn mutate(
        &self,
        value: &AbiValue,
        rng: &mut dyn RngCore,
        ctx: &mut MutationCtx<'_>,
    ) -> Result<AbiValue, MutatorError> {
        let AbiValue::Array(elems) = value else {
            return Err(mismatch("array", value));
        };
        if elems.is_empty() {
            return Ok(value.clone());
        }
        let index = rng.random_range(0..elems.len());
        let mut out = elems.to_vec();
        out[index] = self.child.mutate(&elems[index], rng, ctx)?;
        Ok(AbiValue::Array(out))
    }
}

/// Tuples mutate element-wise: every slot is perturbed by its own child
/// mutator, preserving arity and per-slot type.
pub struct TupleMutator {
    children: Vec<Box<dyn ValueMutator>>,
}

impl TupleMutator {
    pub fn new(elem_types: &[AbiType]) -> Self {
        Self {
            children: elem_types.iter().map(mutator_for).collect(),
        }
    }
}

impl ValueMutator for TupleMutator {
    fn seed(&self, accounts: &[AccountRef]) -> AbiValue {
        AbiValue::Tuple(self.children.iter().map(|c| c.seed(accounts)).collect())
    }

    fn mutate(
        &self,
        value: &AbiValue,
        rng: &mut dyn RngCore,
        ctx: &mut MutationCtx<'_>,
    ) -> Result<AbiValue, MutatorError> {
        let AbiValue::Tuple(elems) = value else {
            return Err(mismatch("tuple", value));
        };
        if elems.len() != self.children.len() {
            return Err(mismatch("tuple of matching arity", value));
        }
        let mut out = Vec::with_capacity(elems.len());
        for (child, elem) in self.children.iter().zip(elems) {
            out.push(child.mutate(elem, rng, ctx)?);
        }
        Ok(AbiValue::Tuple(out))
    }
}

/// Minimum spendable balance below which the sender gets topped up, and the
/// reserve kept out of the sampled amount.
const LOW_BALANCE_FLOOR: u64 = 1000;

/// Currency transfers are not perturbed; the amount is resampled against the
/// acting account's live spendable balance. This is the one mutator with a
/// side effect: it may trigger an external funding call.
pub struct PaymentMutator;

impl ValueMutator for PaymentMutator {
    fn seed(&self, _accounts: &[AccountRef]) -> AbiValue {
        AbiValue::Payment { amount: 0 }
    }

    fn mutate(
        &self,
        value: &AbiValue,
        rng: &mut dyn RngCore,
        ctx: &mut MutationCtx<'_>,
    ) -> Result<AbiValue, MutatorError> {
        if !matches!(value, AbiValue::Payment { .. }) {
            return Err(mismatch("payment", value));
        }
        let mut spendable = ctx.funder.spendable_balance(ctx.sender)?;
        if spendable < LOW_BALANCE_FLOOR {
            ctx.funder.fund_if_low(ctx.sender)?;
            spendable = ctx.funder.spendable_balance(ctx.sender)?;
        }
        let cap = spendable.saturating_sub(LOW_BALANCE_FLOOR) / 10;
        Ok(AbiValue::Payment {
            amount: rng.random_range(0..=cap),
        })
    }
}

/// Account references resolve to the externally managed known-account pool;
/// mutation reselects uniformly within that pool.
pub struct AccountMutator;

impl ValueMutator for AccountMutator {
    fn seed(&self, accounts: &[AccountRef]) -> AbiValue {
        AbiValue::Account(
            accounts
                .first()
                .cloned()
                .unwrap_or_else(|| AccountRef(String::new())),
        )
    }

    fn mutate(
        &self,
        value: &AbiValue,
        rng: &mut dyn RngCore,
        ctx: &mut MutationCtx<'_>,
    ) -> Result<AbiValue, MutatorError> {
        if !matches!(value, AbiValue::Account(_)) {
            return Err(mismatch("account", value));
        }
        if ctx.accounts.is_empty() {
            return Ok(value.clone());
        }
        let index = rng.random_range(0..ctx.accounts.len());
        Ok(AbiValue::Account(ctx.accounts[index].clone()))
    }
}

/// Maps an ABI type to its mutation strategy. Total over the closed type
/// enum; adding a variant forces an explicit decision here.
pub fn mutator_for(ty: &AbiType) -> Box<dyn ValueMutator> {
    match ty {
        AbiType::Uint { bits } => Box::new(UintMutator::new(*bits)),
        AbiType::Ufixed { bits, precision } => Box::new(FixedMutator::new(*bits, *precision)),
        AbiType::Bool => Box::new(BoolMutator),
        AbiType::Byte => Box::new(ByteMutator::new()),
        AbiType::String => Box::new(StringMutator::default()),
        AbiType::DynamicArray(child) => Box::new(DynArrayMutator::new(child)),
        AbiType::StaticArray(child, len) => Box::new(StaticArrayMutator::new(child, *len)),
        AbiType::Tuple(elems) => Box::new(TupleMutator::new(elems)),
        AbiType::Payment => Box::new(PaymentMutator),
        AbiType::Account => Box::new(AccountMutator),
    }
}

/// One mutator per declared parameter of a target method.
pub struct MethodMutator {
    mutators: Vec<Box<dyn ValueMutator>>,
}

impl MethodMutator {
    pub fn new(method: &Method) -> Self {
        Self {
            mutators: method.params.iter().map(|p| mutator_for(&p.ty)).collect(),
        }
    }

    pub fn arity(&self) -> usize {
        self.mutators.len()
    }

    /// Canonical minimal argument list: zeros, empty strings, empty arrays.
    pub fn seed_args(&self, accounts: &[AccountRef]) -> Vec<AbiValue> {
        self.mutators.iter().map(|m| m.seed(accounts)).collect()
    }

    /// Copy-on-mutate: perturbs one randomly chosen field and returns a fresh
    /// argument list. Stacking several mutations is the caller's job.
    pub fn mutate_one(
        &self,
        args: &[AbiValue],
        rng: &mut dyn RngCore,
        ctx: &mut MutationCtx<'_>,
    ) -> Result<Vec<AbiValue>, MutatorError> {
        if args.is_empty() {
            return Ok(Vec::new());
        }
        let index = rng.random_range(0..args.len());
        let mut out = args.to_vec();
        out[index] = self.mutators[index].mutate(&args[index], rng, ctx)?;
        Ok(out)
    }
}
