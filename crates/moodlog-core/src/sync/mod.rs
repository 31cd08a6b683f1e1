//! Multi-device sync: reconciliation engine, attachment uploader, scheduler
//! and the remote mirror they talk to.

mod attachments;
mod engine;
pub mod http;
pub mod memory;
pub mod protocol;
mod remote;
mod report;
mod scheduler;
mod store;


pub use attachments::AttachmentUploader;
pub use engine::{decide_push, push_candidates, PushAction, SyncEngine};
pub use http::HttpMirror;
pub use memory::MemoryMirror;
pub use protocol::{
    AttachmentFingerprint, DeleteOutcome, DeleteRequest, EntryChange, EntryPayload,
    RemoteAttachment, RemoteRow, RowDecodeError, WriteOutcome,
};
pub use remote::{PulledChanges, RemoteError, RemoteMirror, RemoteResult};
pub use report::{AttachmentReport, SyncIssue, SyncPhase, SyncReport};
pub use scheduler::{SyncJob, SyncScheduler, SyncTrigger};
pub use store::{LocalStore, SyncMetadataStore};
