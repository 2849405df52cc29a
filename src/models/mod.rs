pub mod analysis;
pub mod job;
pub mod recording;
pub mod upload;
