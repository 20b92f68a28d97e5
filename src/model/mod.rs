//! Domain types shared by the stores and the session

pub mod document;
pub mod enquiry;
pub mod ids;
pub mod schema;
pub mod upload;

pub use document::{
    decode_values, encode_values, CommitBatch, CommitEntry, DocumentKey, FieldValue,
    StageDocument, StageDocuments, ValueMap,
};
pub use enquiry::EnquiryPointer;
pub use ids::{EnquiryId, FieldId, PipelineId, StageId};
pub use schema::{Field, FieldType, Pipeline, Stage};
pub use upload::UploadedFile;
