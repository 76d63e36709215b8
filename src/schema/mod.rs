//! ergo.landmark_frame.v1 schema
//!
//! This module defines the model-agnostic input schema for landmark frames
//! and the adapters that turn records into `LandmarkFrame`s.

mod adapter;
mod frame_record;

pub use adapter::*;
pub use frame_record::*;
