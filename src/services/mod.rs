pub mod conversion;
pub mod dispatcher;
pub mod poller;
pub mod post_policy;
pub mod queue;
pub mod storage;
pub mod upload_service;
pub mod worker;
