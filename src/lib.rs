//! Detect and fill the fields of a recurring sign-up form from a saved
//! profile.
//!
//! [`autofill`] holds the engine; it talks to documents only through the
//! [`dom::Dom`] capability, implemented for a Chromium tab and for an
//! in-memory tree. [`store`] persists the profile and settings, and [`cli`]
//! wires everything to a browser.

pub mod autofill;
pub mod browser;
pub mod cli;
pub mod config;
pub mod dom;
pub mod store;
