//! # hmdcast: head-mounted camera frame caster
//!
//! Renders a synthetic world camera and streams every captured frame to
//! pub/sub subscribers as `hmd_streaming.world` messages, using the
//! `hmdcast-core` pipeline.
//!
//! ## Modes
//!
//! - **Cast** (default): run the capture/publish service in the foreground.
//! - **Subscribe** (`--subscribe <address>`): print received frames as JSON.
//! - **Generate config** (`--gen-config [path]`): write the default TOML.

pub mod camera;
pub mod config;
pub mod dump;
pub mod service;
