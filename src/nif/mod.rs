// src/nif/mod.rs

pub mod animation_helpers;
pub mod blend_interpolator;
pub mod controller_manager;
pub mod controller_sequence;
pub mod error;
pub mod interpolator;
pub mod key_track;
pub mod skeleton;
pub mod types;
