//! PostgreSQL adapter for the vectorsync embedding-pipeline engine: schema
//! installation, work-queue enqueuing, and the worker claim/process loop.

pub mod admin;
pub mod ddl;
pub mod enqueue;
pub mod installer;
pub mod rows;
pub mod worker;

pub use enqueue::enqueue_pending;
pub use installer::{destroy, get_config, install};
pub use rows::WorkQueueRow;
pub use worker::Worker;
