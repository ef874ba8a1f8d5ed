//! # Domain Models
//!
//! This crate contains pure domain types with minimal dependencies (`serde`, `bitflags`).
//! Keep it lean: no I/O, networking, or heavy logic—just data and simple helpers.

pub mod config;
pub mod constants;
mod id;
mod parcel;

pub use id::{ParcelId, UserId};
pub use parcel::{LocationPoint, Parcel, ParcelStatus, StatusSet};
