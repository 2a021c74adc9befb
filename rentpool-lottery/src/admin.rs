use crate::{LotteryError, Result};
use rentpool_core::{AdminConfig, Amount, BPS_DENOMINATOR};

pub const MAX_WINNER_COUNT: u32 = 500;

/// Validated setters for the admin-tunable parameters. Rounds that already requested their
/// break keep the values they snapshotted.
pub struct AdminSettings<'a> {
    config: &'a mut AdminConfig,
}

impl<'a> AdminSettings<'a> {
    pub fn new(config: &'a mut AdminConfig) -> Self {
        Self { config }
    }

    pub fn set_winner_count(&mut self, count: u32) -> Result<()> {
        if !(1..=MAX_WINNER_COUNT).contains(&count) {
            return Err(LotteryError::InvalidParameter(format!(
                "winner count must be between 1 and {}, got {}",
                MAX_WINNER_COUNT, count
            )));
        }
        self.config.winner_count = count;
        tracing::info!("Winner count set to {}", count);
        Ok(())
    }

    pub fn set_protocol_fee(&mut self, bps: u16) -> Result<()> {
        check_bps("protocol fee", bps)?;
        self.config.protocol_fee_bps = bps;
        tracing::info!("Protocol fee set to {} bps", bps);
        Ok(())
    }

    pub fn set_rent_fee(&mut self, bps: u16) -> Result<()> {
        check_bps("rent fee", bps)?;
        self.config.rent_fee_bps = bps;
        tracing::info!("Rent fee set to {} bps", bps);
        Ok(())
    }

    pub fn set_rent_amount(&mut self, amount: Amount) -> Result<()> {
        if amount.is_zero() {
            return Err(LotteryError::InvalidParameter(
                "rent amount must be positive".to_string(),
            ));
        }
        if !amount.is_storable() {
            return Err(LotteryError::InvalidParameter(format!(
                "rent amount must be at most {}",
                Amount::MAX
            )));
        }
        self.config.rent_amount = amount;
        tracing::info!("Rent amount set to {}", amount);
        Ok(())
    }
}

fn check_bps(name: &str, bps: u16) -> Result<()> {
    if u64::from(bps) > BPS_DENOMINATOR {
        return Err(LotteryError::InvalidParameter(format!(
            "{} must be at most {} bps, got {}",
            name, BPS_DENOMINATOR, bps
        )));
    }
    Ok(())
}
