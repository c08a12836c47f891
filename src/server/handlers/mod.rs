pub mod health;
pub mod index;
pub mod search;
pub mod synthesis;
