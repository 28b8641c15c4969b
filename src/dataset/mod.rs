pub mod error;
pub mod historical;
pub mod series;
