//! Round-based lottery with rentable tickets
//!
//! Participants deposit to enter a round, a verifiable randomness provider picks winners,
//! and pot shares are settled through claims. Idle tickets can be rented for a fixed fee:
//! the renter plays under the ticket and splits any winnings with its owner.

pub mod admin;
pub mod clock;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod payout;
pub mod randomness;
pub mod round;
pub mod service;
pub mod treasury;
pub mod whitelist;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::Lottery;
pub use error::{ErrorKind, LotteryError, Result};
pub use ledger::{DepositReceipt, RentReceipt, TicketInfo};
pub use payout::ClaimReceipt;
pub use randomness::RandomnessProvider;
pub use round::DrawRequest;
pub use service::LotteryService;
pub use treasury::{Transfer, TransferReason, Treasury};
pub use whitelist::{MerkleTree, WhitelistVerifier};
