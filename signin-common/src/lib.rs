//! Sign-in Common Types
//!
//! Wire types shared by the sign-in backend and its clients.

pub mod envelope;
pub mod signin;

pub use envelope::ErrorEnvelope;
pub use signin::{SignInRequest, TokenResponse, UserDto, BEARER};
