pub mod client_ip;
pub mod password;

pub use client_ip::{client_ip, user_agent};
pub use password::{check_strength, PasswordHasher};
