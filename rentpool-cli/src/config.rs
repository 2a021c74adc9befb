use rentpool_core::Address;
use rentpool_lottery::{LotteryError, Result};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct CliConfig {
    pub data_dir: PathBuf,
    pub caller: Option<String>,
}

impl CliConfig {
    pub fn new(data_dir: Option<PathBuf>, caller: Option<String>) -> Self {
        Self {
            data_dir: data_dir.unwrap_or_else(|| {
                dirs::data_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("rentpool")
            }),
            caller,
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("rentpool.db")
    }

    /// Address the command acts as.
    pub fn caller(&self) -> Result<Address> {
        let caller = self.caller.as_deref().ok_or_else(|| {
            LotteryError::InvalidParameter("this command needs --caller <address>".to_string())
        })?;
        Ok(caller.parse()?)
    }
}
