//! Mirage HUD frame capture.
//!
//! Pulls frames off the GPU without stalling the render loop and turns
//! screenshot requests from any thread into JPEG files written by the render
//! thread.

pub mod capture;
pub mod config;
pub mod encoder;
pub mod notify;
pub mod screenshot;
