pub mod health;
pub mod signin;
