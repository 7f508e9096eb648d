pub mod audit;
pub mod auth_state;
pub mod offline;
pub mod security;
pub mod session;
pub mod token;
