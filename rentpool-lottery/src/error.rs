use chrono::{DateTime, Utc};
use rentpool_core::{Address, RequestHandle, RoundId, RoundState, TicketId};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LotteryError>;

/// Coarse failure classes callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Authorization,
    StateTransition,
    InvalidInput,
    Eligibility,
    Transfer,
    Collaborator,
    Storage,
    Internal,
}

#[derive(Error, Debug)]
pub enum LotteryError {
    #[error("Pool core error: {0}")]
    Core(#[from] rentpool_core::PoolError),

    #[error("{caller} is not allowed to {operation}")]
    Unauthorized {
        caller: Address,
        operation: &'static str,
    },

    #[error("{0} is not the configured randomness operator")]
    UnauthorizedOperator(Address),

    #[error("Cannot start round: round {round} is still {state}")]
    RoundStillActive { round: RoundId, state: RoundState },

    #[error("No round has been started")]
    NoRound,

    #[error("Round {round} is {actual}, expected {expected}")]
    WrongState {
        round: RoundId,
        expected: RoundState,
        actual: RoundState,
    },

    #[error("Round not open")]
    NotOpen,

    #[error("Too early: allowed from {ready_at}")]
    TooEarly { ready_at: DateTime<Utc> },

    #[error("Cannot break round {0}: nobody has deposited")]
    NoDeposits(RoundId),

    #[error("Round {0} already has an outstanding randomness request")]
    RequestOutstanding(RoundId),

    #[error("Nothing is claimable while round {round} is {state}")]
    NotClaimable { round: RoundId, state: RoundState },

    #[error("Invalid round {0} or winners no longer available")]
    InvalidOrTooLate(RoundId),

    #[error("Invalid ticket id {0}")]
    InvalidTicket(TicketId),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Cannot rent your own ticket {0}")]
    CannotRentOwnTicket(TicketId),

    #[error("Ticket {0} deposited already")]
    DepositedAlready(TicketId),

    #[error("Ticket {0} rented already")]
    AlreadyRented(TicketId),

    #[error("Cannot enter, ticket {0} is rented to another address")]
    RentedToOther(TicketId),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Malformed proof: {0}")]
    MalformedProof(String),

    #[error("Unknown randomness request {0}")]
    UnknownRequest(RequestHandle),

    #[error("Randomness request {0} was already consumed")]
    RequestConsumed(RequestHandle),

    #[error("Expected {expected} random values, got {got}")]
    RandomnessCountMismatch { expected: u32, got: usize },

    #[error("Borrower but not winner")]
    BorrowerNotWinner,

    #[error("Borrower cannot claim outside the break period")]
    BorrowerWindowElapsed,

    #[error("Borrower of winning ticket {0} has not claimed yet")]
    OwnerMustWaitForBorrower(TicketId),

    #[error("Already claimed this round")]
    AlreadyClaimed,

    #[error("Nothing to claim")]
    NothingToClaim,

    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    #[error("Randomness provider unavailable: {0}")]
    RandomnessUnavailable(String),

    #[error("Mutation attempted while a transfer or randomness request is in flight")]
    Reentrant,

    #[error("Arithmetic overflow computing {0}")]
    Overflow(&'static str),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LotteryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LotteryError::Unauthorized { .. } | LotteryError::UnauthorizedOperator(_) => {
                ErrorKind::Authorization
            }

            LotteryError::RoundStillActive { .. }
            | LotteryError::NoRound
            | LotteryError::WrongState { .. }
            | LotteryError::NotOpen
            | LotteryError::TooEarly { .. }
            | LotteryError::NoDeposits(_)
            | LotteryError::RequestOutstanding(_)
            | LotteryError::NotClaimable { .. }
            | LotteryError::InvalidOrTooLate(_)
            | LotteryError::Reentrant => ErrorKind::StateTransition,

            LotteryError::InvalidTicket(_)
            | LotteryError::InvalidAmount(_)
            | LotteryError::CannotRentOwnTicket(_)
            | LotteryError::DepositedAlready(_)
            | LotteryError::AlreadyRented(_)
            | LotteryError::RentedToOther(_)
            | LotteryError::InvalidParameter(_)
            | LotteryError::MalformedProof(_)
            | LotteryError::UnknownRequest(_)
            | LotteryError::RequestConsumed(_)
            | LotteryError::RandomnessCountMismatch { .. } => ErrorKind::InvalidInput,

            LotteryError::BorrowerNotWinner
            | LotteryError::BorrowerWindowElapsed
            | LotteryError::OwnerMustWaitForBorrower(_)
            | LotteryError::AlreadyClaimed
            | LotteryError::NothingToClaim => ErrorKind::Eligibility,

            LotteryError::TransferFailed(_) => ErrorKind::Transfer,
            LotteryError::RandomnessUnavailable(_) => ErrorKind::Collaborator,
            LotteryError::Core(_) => ErrorKind::Storage,
            LotteryError::Overflow(_) | LotteryError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn unauthorized(caller: &Address, operation: &'static str) -> Self {
        Self::Unauthorized {
            caller: caller.clone(),
            operation,
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
