//! Platform backends.
//!
//! `NativeEngine` names the best backend for the compilation target.

mod generic;

#[cfg(any(target_os = "linux", target_os = "android"))]
mod linux;

pub use generic::GenericEngine;

#[cfg(any(target_os = "linux", target_os = "android"))]
pub use linux::InotifyEngine;

#[cfg(any(target_os = "linux", target_os = "android"))]
pub type NativeEngine = InotifyEngine;

#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub type NativeEngine = GenericEngine;
