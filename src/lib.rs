//! Configurable pipeline engine for CRM enquiries
//!
//! Administrators define pipelines of ordered stages, each holding ordered,
//! typed fields. Every enquiry sits at one stage of one pipeline and keeps a
//! sparse value document per stage. A [`PipelineSession`] drives viewing,
//! editing, and committing those documents for one enquiry.
//!
//! ```no_run
//! use enquiry_pipeline::{EngineConfig, EnquiryId, RepositoryFactory};
//!
//! # async fn run() -> enquiry_pipeline::CrmResult<()> {
//! let backend = RepositoryFactory::create(&EngineConfig::load("engine.json")?)?;
//! let mut session = backend.open_session(EnquiryId(42)).await?;
//! session.begin_edit()?;
//! session.commit().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod files;
pub mod logger;
pub mod model;
pub mod notice;
pub mod registry;
pub mod repository;
pub mod resolver;
pub mod session;

pub use config::{CommitScope, ConcurrencyMode, EngineConfig, EngineConfigBuilder, SessionConfig};
pub use error::{CrmError, CrmResult, ErrorKind};
pub use events::{EventEmitter, SessionEvent};
pub use files::{BlobStore, FileReferenceResolver, FsBlobStore, MemoryBlobStore};
pub use model::{
    EnquiryId, EnquiryPointer, Field, FieldId, FieldType, FieldValue, Pipeline, PipelineId, Stage,
    StageDocument, StageId, ValueMap,
};
pub use notice::{Notice, NoticeLog, Severity};
pub use registry::{render_fields, FieldRegistry, RenderedField, RenderedValue};
pub use repository::{Backend, MemoryStore, RepositoryFactory, SqliteStore};
pub use resolver::{resolve_stage, ActiveStage};
pub use session::{PipelineSession, SessionHandle, SessionState, SessionView};
