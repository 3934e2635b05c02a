//! Cross-thread screenshot requests and the render-thread capture path.

pub mod naming;
pub mod request;
pub mod service;

pub use request::{
    RejectReason, RequestQueue, ScreenshotRequest, ScreenshotRequester, SubmitOutcome,
};
pub use service::{CaptureOutcome, ScreenshotService};
