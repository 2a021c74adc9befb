pub mod admin;
pub mod init;
pub mod participant;
pub mod round;
pub mod whitelist;

pub use admin::{handle_admin_command, AdminCommands};
pub use init::{handle_init, InitArgs};
pub use participant::{
    handle_balance, handle_claim, handle_deliver, handle_deposit, handle_rent,
    handle_ticket_command, TicketCommands,
};
pub use round::{handle_round_command, RoundCommands};
pub use whitelist::{handle_whitelist_command, handle_whitelist_offline, WhitelistCommands};
