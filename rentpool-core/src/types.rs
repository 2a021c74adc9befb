use crate::error::PoolError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Fee rates are expressed in basis points of this denominator.
pub const BPS_DENOMINATOR: u64 = 10_000;

/// Participant identity on the host ledger.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(address: impl Into<String>) -> Result<Self, PoolError> {
        let address = address.into();
        if address.is_empty() || address.chars().any(char::is_whitespace) {
            return Err(PoolError::InvalidAddress(address));
        }
        Ok(Self(address))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl FromStr for Address {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Native value units. All arithmetic on pooled value goes through the checked helpers,
/// which also refuse results above [`Amount::MAX`].
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Amount(u64);

impl Amount {
    pub const ZERO: Amount = Amount(0);
    /// Largest amount a ledger column can hold.
    pub const MAX: Amount = Amount(i64::MAX as u64);

    pub const fn from_units(units: u64) -> Self {
        Self(units)
    }

    pub const fn to_units(self) -> u64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn is_storable(self) -> bool {
        self <= Amount::MAX
    }

    pub fn checked_add(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_add(rhs.0).map(Amount).filter(|a| a.is_storable())
    }

    pub fn checked_sub(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_sub(rhs.0).map(Amount)
    }

    pub fn checked_mul(self, factor: u64) -> Option<Amount> {
        self.0.checked_mul(factor).map(Amount).filter(|a| a.is_storable())
    }

    pub fn checked_sum<I: IntoIterator<Item = Amount>>(amounts: I) -> Option<Amount> {
        amounts
            .into_iter()
            .try_fold(Amount::ZERO, |total, a| total.checked_add(a))
    }

    /// Integer quotient; zero divisor yields zero.
    pub fn split(self, parts: u64) -> Amount {
        if parts == 0 {
            return Amount::ZERO;
        }
        Amount(self.0 / parts)
    }

    /// `self * bps / 10_000`, rounded down. `bps` above the denominator is clamped.
    pub fn bps(self, bps: u16) -> Amount {
        let bps = u64::from(bps).min(BPS_DENOMINATOR);
        let scaled = u128::from(self.0) * u128::from(bps) / u128::from(BPS_DENOMINATOR);
        // scaled <= self.0 so the narrowing is lossless
        Amount(scaled as u64)
    }

    /// The part left after deducting a `bps` fee.
    pub fn net_of_bps(self, bps: u16) -> Amount {
        let fee_free = BPS_DENOMINATOR.saturating_sub(u64::from(bps)) as u16;
        self.bps(fee_free)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} units", self.0)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RoundId(pub u64);

impl RoundId {
    pub const FIRST: RoundId = RoundId(1);

    pub fn next(self) -> RoundId {
        RoundId(self.0 + 1)
    }
}

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TicketId(pub u64);

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Correlation handle for one outstanding randomness request.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RequestHandle(pub Uuid);

impl RequestHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for RequestHandle {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| PoolError::config(format!("Invalid request handle '{}': {}", s, e)))
    }
}

impl fmt::Display for RequestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Round lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundState {
    Open,
    AwaitingRandomness,
    Break,
    Closed,
}

impl RoundState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoundState::Open => "open",
            RoundState::AwaitingRandomness => "awaiting_randomness",
            RoundState::Break => "break",
            RoundState::Closed => "closed",
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, RoundState::Closed)
    }
}

impl FromStr for RoundState {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(RoundState::Open),
            "awaiting_randomness" => Ok(RoundState::AwaitingRandomness),
            "break" => Ok(RoundState::Break),
            "closed" => Ok(RoundState::Closed),
            other => Err(PoolError::corrupt("rounds", format!("unknown state '{}'", other))),
        }
    }
}

impl fmt::Display for RoundState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an address entered a ticket into a round. Drives claim branching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DepositorRelation {
    Owner,
    Borrower,
    Whitelisted,
    NewDepositor,
}

impl DepositorRelation {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepositorRelation::Owner => "owner",
            DepositorRelation::Borrower => "borrower",
            DepositorRelation::Whitelisted => "whitelisted",
            DepositorRelation::NewDepositor => "new_depositor",
        }
    }
}

impl FromStr for DepositorRelation {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner" => Ok(DepositorRelation::Owner),
            "borrower" => Ok(DepositorRelation::Borrower),
            "whitelisted" => Ok(DepositorRelation::Whitelisted),
            "new_depositor" => Ok(DepositorRelation::NewDepositor),
            other => Err(PoolError::corrupt(
                "round_deposits",
                format!("unknown relation '{}'", other),
            )),
        }
    }
}

impl fmt::Display for DepositorRelation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestStatus {
    Pending,
    Fulfilled,
    Abandoned,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Fulfilled => "fulfilled",
            RequestStatus::Abandoned => "abandoned",
        }
    }
}

impl FromStr for RequestStatus {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RequestStatus::Pending),
            "fulfilled" => Ok(RequestStatus::Fulfilled),
            "abandoned" => Ok(RequestStatus::Abandoned),
            other => Err(PoolError::corrupt(
                "randomness_requests",
                format!("unknown status '{}'", other),
            )),
        }
    }
}

/// How a winning ticket's entitlement was released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettlementKind {
    /// Depositor took the full entitlement.
    Claimed,
    /// Borrower took the rent-fee-net part, owner was credited the rest.
    BorrowerSplit,
    /// Nobody claimed during the break; the owner was credited everything at close.
    CreditedAtClose,
}

impl SettlementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementKind::Claimed => "claimed",
            SettlementKind::BorrowerSplit => "borrower_split",
            SettlementKind::CreditedAtClose => "credited_at_close",
        }
    }
}

impl FromStr for SettlementKind {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "claimed" => Ok(SettlementKind::Claimed),
            "borrower_split" => Ok(SettlementKind::BorrowerSplit),
            "credited_at_close" => Ok(SettlementKind::CreditedAtClose),
            other => Err(PoolError::corrupt(
                "settlements",
                format!("unknown settlement kind '{}'", other),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bps_math() {
        let pot = Amount::from_units(15_000);
        assert_eq!(pot.bps(5_000), Amount::from_units(7_500));
        assert_eq!(pot.net_of_bps(1_000), Amount::from_units(13_500));
        assert_eq!(pot.net_of_bps(0), pot);
        assert_eq!(pot.net_of_bps(10_000), Amount::ZERO);
        assert_eq!(Amount::from_units(7).bps(5_000), Amount::from_units(3));
    }

    #[test]
    fn test_checked_math_stays_storable() {
        let half = Amount::from_units(u64::MAX / 2 + 1);
        assert!(!half.is_storable());
        assert_eq!(half.checked_add(half), None);
        assert_eq!(Amount::MAX.checked_add(Amount::from_units(1)), None);
        assert_eq!(Amount::ZERO.checked_add(half), None);
        assert_eq!(Amount::MAX.checked_mul(2), None);
        assert_eq!(Amount::checked_sum([Amount::MAX, Amount::from_units(1)]), None);
        assert_eq!(
            Amount::checked_sum([Amount::from_units(2), Amount::from_units(3)]),
            Some(Amount::from_units(5))
        );
    }

    #[test]
    fn test_address_rejects_blank() {
        assert!(Address::new("").is_err());
        assert!(Address::new("has space").is_err());
        assert_eq!(Address::new("alice").unwrap().as_str(), "alice");
    }

    #[test]
    fn test_enum_strings_round_trip() {
        for state in [
            RoundState::Open,
            RoundState::AwaitingRandomness,
            RoundState::Break,
            RoundState::Closed,
        ] {
            assert_eq!(state.as_str().parse::<RoundState>().unwrap(), state);
        }
        assert!("bogus".parse::<DepositorRelation>().is_err());
    }
}
