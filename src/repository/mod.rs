//! Repository Pattern Implementation
//!
//! This module provides abstract interfaces for data access, allowing the
//! session to run against SQLite in production and memory in tests.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Repository Traits               │
//! │  Schema · Documents · Enquiry · Uploads │
//! └──────────────┬──────────────────────────┘
//!                │
//!        ┌───────┴────────┐
//!        │                │
//! ┌──────▼──────┐  ┌──────▼──────┐
//! │SqliteStore  │  │MemoryStore  │
//! │             │  │             │
//! │- rusqlite   │  │- tests      │
//! │- one txn    │  │- failure    │
//! │  per commit │  │  injection  │
//! └─────────────┘  └─────────────┘
//! ```

pub mod factory;
pub mod memory;
pub mod sqlite;
pub mod traits;

// Re-export main types
pub use factory::{Backend, RepositoryFactory};
pub use memory::{FailurePlan, MemoryStore};
pub use sqlite::SqliteStore;
pub use traits::{
    DocumentRepository, EnquiryRepository, SchemaAdmin, SchemaRepository, SessionStore, UploadLog,
};
