pub mod assigner;
pub mod job;
pub mod registry;
pub mod resolver;
pub mod store;

pub use job::{Assignment, Job, JobStatus, JobSummary, SubmissionAck, Task, TaskRef, TaskStatus};
pub use registry::{ClientRecord, ClientRegistry, ClientReport, ClientTrust, TrustClient};
pub use store::JobStore;
