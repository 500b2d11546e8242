pub mod embedding;
pub mod identity;
pub mod attendance;
pub mod recognition;
