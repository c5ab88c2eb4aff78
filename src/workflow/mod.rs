pub mod coalescer;
pub mod submission_ctx;
pub mod submission_flow;

pub use coalescer::{DispatchTarget, RequestCoalescer};
pub use submission_ctx::SubmissionCtx;
pub use submission_flow::{BranchOutput, ResultSink, SubmissionFlow};
