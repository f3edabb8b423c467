//! Stream supervisor (C6 + C7): on-demand ingest pipelines per channel
//! and the schedule-driven recorder.

pub mod ingest;
pub mod recorder;

pub use ingest::{Hook, IngestSupervisor};
pub use recorder::{read_upload_state, Recorder, RecorderCmd, RecorderEvent, Recording, UploadState};
