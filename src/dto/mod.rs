pub mod health;
pub mod lobby;
pub mod sse;
pub mod validation;
