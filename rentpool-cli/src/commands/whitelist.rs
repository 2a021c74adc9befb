use crate::config::CliConfig;
use clap::Subcommand;
use comfy_table::{presets::UTF8_FULL, Table};
use rentpool_core::Address;
use rentpool_lottery::whitelist::{parse_proof, MerkleTree};
use rentpool_lottery::{LotteryError, LotteryService, Result};

#[derive(Subcommand)]
pub enum WhitelistCommands {
    /// Compute the merkle root of a member list
    Root {
        /// Member addresses
        #[arg(required = true)]
        members: Vec<String>,
    },
    /// Print the proof for one member of a list
    Proof {
        /// Address to prove
        address: String,
        /// Full member list the root was built from
        #[arg(short, long, num_args = 1.., required = true)]
        members: Vec<String>,
    },
    /// Add an address to the whitelist with its proof (admin)
    Verify {
        address: String,
        /// Hex-encoded proof nodes, leaf to root
        proof: Vec<String>,
    },
    /// List whitelisted addresses
    List,
}

impl WhitelistCommands {
    /// Commands that work without an initialized pool.
    pub fn is_offline(&self) -> bool {
        matches!(self, WhitelistCommands::Root { .. } | WhitelistCommands::Proof { .. })
    }
}

fn parse_members(members: &[String]) -> Result<Vec<Address>> {
    members
        .iter()
        .map(|m| m.parse::<Address>().map_err(LotteryError::from))
        .collect()
}

pub fn handle_whitelist_offline(cmd: WhitelistCommands) -> Result<()> {
    match cmd {
        WhitelistCommands::Root { members } => {
            let members = parse_members(&members)?;
            let tree = MerkleTree::new(&members);
            println!("{}", hex::encode(tree.root()));
        }

        WhitelistCommands::Proof { address, members } => {
            let address: Address = address.parse()?;
            let tree = MerkleTree::new(&parse_members(&members)?);
            let proof = tree.proof(&address).ok_or_else(|| {
                LotteryError::InvalidParameter(format!("{} is not in the member list", address))
            })?;
            let nodes: Vec<String> = proof.iter().map(hex::encode).collect();
            println!("{}", nodes.join(" "));
        }

        WhitelistCommands::Verify { .. } | WhitelistCommands::List => {
            return Err(LotteryError::internal("command needs an open pool"));
        }
    }

    Ok(())
}

pub async fn handle_whitelist_command(
    cmd: WhitelistCommands,
    service: &LotteryService,
    config: &CliConfig,
) -> Result<()> {
    match cmd {
        WhitelistCommands::Verify { address, proof } => {
            let address: Address = address.parse()?;
            let proof = parse_proof(&proof)?;
            if service
                .verify_whitelist(&config.caller()?, &proof, &address)
                .await?
            {
                println!("{} added to the whitelist", address);
            } else if service.is_whitelisted(&address) {
                println!("{} is already whitelisted", address);
            } else {
                println!("Proof rejected, {} not added", address);
            }
        }

        WhitelistCommands::List => {
            let count = service.whitelist_len();
            if count == 0 {
                println!("Whitelist is empty.");
                return Ok(());
            }

            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_header(vec!["#", "Address"]);
            for index in 0..count {
                if let Some(member) = service.whitelist_member(index) {
                    table.add_row(vec![index.to_string(), member.to_string()]);
                }
            }
            println!("{}", table);
        }

        offline => handle_whitelist_offline(offline)?,
    }

    Ok(())
}
