pub mod controller;
pub mod provider;
pub mod session;
pub mod transfer;
