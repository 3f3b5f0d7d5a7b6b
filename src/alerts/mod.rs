//! Alert policy and multi-channel distribution

pub mod distributor;
pub mod email;
pub mod policy;

pub use distributor::{AlertDistributor, DispatchResult};
pub use email::{EmailSender, LogMailer, SmtpMailer};
