//! Real-time capture, annotation and MJPEG fan-out.
//!
//! One [`capture::CaptureLoop`] thread publishes annotated frames into a
//! [`shared::SharedFrameState`]; any number of [`stream::StreamEncoder`]s and
//! [`query::DetectionQuery`] handles read from it. The
//! [`controller::StreamController`] starts and stops the loop.

pub mod annotate;
pub mod camera;
pub mod capture;
pub mod controller;
pub mod mjpeg;
pub mod query;
pub mod shared;
pub mod stream;
