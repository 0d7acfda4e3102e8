// 1.0: all the primitives live here. nothing in the engine works without these types.
// IDs, denoms, prices, timestamps. each is a newtype so the compiler catches type mixups.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

// 32-byte hashes travel as lowercase hex in serialized state
mod hex32 {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let text = String::deserialize(d)?;
        let raw = hex::decode(&text).map_err(D::Error::custom)?;
        raw.try_into()
            .map_err(|_| D::Error::custom("expected 32 bytes of hex"))
    }
}

fn digest_bytes(hasher: Sha256) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Content-derived market identifier. Two launches with the same ticker,
/// denoms, oracle pair and expiry collide on purpose.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MarketId(#[serde(with = "hex32")] pub [u8; 32]);

impl MarketId {
    pub fn derive(parts: &[&str]) -> Self {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        Self(digest_bytes(hasher))
    }
}

impl fmt::Display for MarketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for MarketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // short form keeps logs readable
        write!(f, "MarketId(0x{})", hex::encode(&self.0[..6]))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubaccountId(pub u64);

impl fmt::Display for SubaccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Order hash, derived from the owner and its per-subaccount nonce.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrderHash(#[serde(with = "hex32")] pub [u8; 32]);

impl OrderHash {
    pub fn derive(subaccount: SubaccountId, nonce: u64) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(subaccount.0.to_be_bytes());
        hasher.update(nonce.to_be_bytes());
        Self(digest_bytes(hasher))
    }
}

impl fmt::Display for OrderHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for OrderHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OrderHash(0x{})", hex::encode(&self.0[..6]))
    }
}

// 1.1: token denomination ("usdt", "inj", "peggy0x...").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Denom(pub String);

impl Denom {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Denom {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for Denom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Buy = long exposure / receives base. Sell = short exposure / gives base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn sign(&self) -> Decimal {
        match self {
            Side::Buy => dec!(1),
            Side::Sell => dec!(-1),
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn is_buy(&self) -> bool {
        matches!(self, Side::Buy)
    }

    /// Does a resting order at `resting` cross an incoming `limit` on this side?
    pub fn crosses(&self, limit: Price, resting: Price) -> bool {
        match self {
            Side::Buy => resting <= limit,
            Side::Sell => resting >= limit,
        }
    }
}

// 1.2: price in quote currency per unit of base. must be positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Price(Decimal);

impl Price {
    #[must_use]
    pub fn new(value: Decimal) -> Option<Self> {
        if value > Decimal::ZERO {
            Some(Self(value))
        } else {
            None
        }
    }

    pub fn new_unchecked(value: Decimal) -> Self {
        debug_assert!(value > Decimal::ZERO);
        Self(value)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// 1.3: block time in unix seconds. the only clock the engine ever reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn from_secs(secs: i64) -> Self {
        Self(secs)
    }

    pub fn as_secs(&self) -> i64 {
        self.0
    }

    pub fn plus_secs(&self, secs: i64) -> Self {
        Self(self.0 + secs)
    }

    /// Whole seconds from `self` up to `later`, never negative.
    pub fn secs_until(&self, later: Timestamp) -> Decimal {
        Decimal::from((later.0 - self.0).max(0))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match chrono::DateTime::from_timestamp(self.0, 0) {
            Some(dt) => write!(f, "{}", dt.to_rfc3339()),
            None => write!(f, "{}s", self.0),
        }
    }
}

// 1.4: block context handed to every transition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub height: u64,
    pub time: Timestamp,
}

/// True when `value` is a positive whole multiple of `tick`.
pub fn is_tick_aligned(value: Decimal, tick: Decimal) -> bool {
    if value <= Decimal::ZERO || tick <= Decimal::ZERO {
        return false;
    }
    (value % tick).is_zero()
}
