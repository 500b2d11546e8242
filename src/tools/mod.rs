pub mod clock;
pub mod detection;
pub mod image_tools;
pub mod log;
pub mod match_index;
pub mod matcher;
pub mod prototypes;
pub mod recognition;
