//! Pipeline stages for downloading a flipbook and assembling its PDF.
//!
//! Each submodule implements exactly one step, so each can be tested on its
//! own and swapped (e.g. a different manifest decoder) without touching the
//! others.
//!
//! ## Data Flow
//!
//! ```text
//! resolve ──▶ input ──▶ metadata ──▶ manifest ──▶ tasks ──▶ download ──▶ assemble
//! (share URL) (html/config) (title)   (decode)    (names)   (retry)      (lopdf)
//! ```
//!
//! 1. [`resolve`]  — share link → canonical reader base URL
//! 2. [`input`]    — fetch the reader page and the `htmlConfig` object
//! 3. [`metadata`] — scrape title/description and locate the config script
//! 4. [`manifest`] — turn `fliphtml5_pages` into a list of entries; runs the
//!    DeString decoder in `spawn_blocking` when the list is obfuscated
//! 5. [`tasks`]    — entries → (index, URL, safe `NNN_leaf` name)
//! 6. [`download`] — bounded-concurrency fetch with [`retry`] policy and
//!    atomic rename
//! 7. [`assemble`] — ordered images → one PDF; runs in `spawn_blocking`

pub mod assemble;
pub mod download;
pub mod input;
pub mod manifest;
pub mod metadata;
pub mod resolve;
pub mod retry;
pub mod tasks;
