//! Authentication to the bastion.
//!
//! Each method is an [`AuthStrategy`]; an [`AuthChain`] tries them in order
//! and [`AuthChainBuilder`] assembles the chain from configured credentials.
//!
//! # Available Strategies
//!
//! - [`KeyAuth`]: Private key, parsed when the chain is built
//! - [`AgentAuth`]: SSH agent via `SSH_AUTH_SOCK`
//! - [`PasswordAuth`]: Password

mod agent;
mod builder;
mod chain;
mod key;
mod password;
mod traits;

pub use agent::AgentAuth;
pub use builder::AuthChainBuilder;
pub use chain::AuthChain;
pub use key::KeyAuth;
pub use password::PasswordAuth;
pub use traits::AuthStrategy;
