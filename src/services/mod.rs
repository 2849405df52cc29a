pub mod analysis;
pub mod capture;
pub mod dispatcher;
pub mod fusion;
pub mod inference;
pub mod persistence;
pub mod process;
pub mod queue;
pub mod recorder;
pub mod recording;
pub mod retry;
pub mod storage;
pub mod upload_queue;
pub mod uploader;
