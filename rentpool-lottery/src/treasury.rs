use crate::Result;
use async_trait::async_trait;
use rentpool_core::{Address, Amount, RoundId, TicketId};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferReason {
    Rent { round: RoundId, ticket: TicketId },
    Claim { round: RoundId },
    ProtocolFees,
}

impl fmt::Display for TransferReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferReason::Rent { round, ticket } => {
                write!(f, "rent of ticket {} for round {}", ticket, round)
            }
            TransferReason::Claim { round } => write!(f, "claim in round {}", round),
            TransferReason::ProtocolFees => write!(f, "protocol fees"),
        }
    }
}

/// An outgoing value movement requested by the lottery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub recipient: Address,
    pub amount: Amount,
    pub reason: TransferReason,
}

impl Transfer {
    pub fn memo(&self) -> String {
        self.reason.to_string()
    }
}

/// Moves value out of the pool. A failed transfer makes the operation that issued it
/// fail as a whole.
#[async_trait]
pub trait Treasury: Send + Sync {
    async fn transfer(&self, transfer: &Transfer) -> Result<()>;
}
