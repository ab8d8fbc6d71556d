pub mod credentials;
pub mod encryption;
pub mod imai;
pub mod job_store;
pub mod poller;
pub mod queue;
pub mod rehost;
pub mod resolver;
pub mod signature;
pub mod status_client;
pub mod storage;
pub mod submission;
pub mod webhook;
