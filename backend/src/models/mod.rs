pub mod account;
pub mod credential;

pub use account::{Account, NewAccount};
pub use credential::{token_lifetime, DeviceDescriptor, RefreshCredentialRecord, MAX_TTL_SECS};
