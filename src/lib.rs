//! rv6: a small multi-core process lifecycle and scheduler core, extracted
//! from Unix Version 6 post-modernized in Rust and RISC-V. Per-CPU
//! multi-queue scheduling with work-stealing replaces the original's
//! single global run queue.

#![cfg_attr(not(test), no_std)]
//
// # Tries to deny all lints (`rustc -W help`).
#![deny(absolute_paths_not_starting_with_crate)]
#![deny(anonymous_parameters)]
#![deny(deprecated_in_future)]
#![deny(elided_lifetimes_in_paths)]
#![deny(explicit_outlives_requirements)]
#![deny(keyword_idents)]
#![deny(macro_use_extern_crate)]
#![deny(missing_debug_implementations)]
#![deny(non_ascii_idents)]
#![deny(rust_2018_idioms)]
#![deny(trivial_numeric_casts)]
#![deny(unaligned_references)]
#![deny(unsafe_op_in_unsafe_fn)]
#![deny(unused_extern_crates)]
#![deny(unused_import_braces)]
#![deny(unused_qualifications)]
#![deny(variant_size_differences)]
#![allow(dead_code)] // TODO(https://github.com/kaist-cp/rv6/issues/120)
#![allow(clippy::missing_safety_doc)]
#![cfg_attr(not(test), feature(llvm_asm))]

mod arch;
mod console;
mod cpu;
mod kernel;
mod list;
mod lock;
mod page;
mod panic;
mod param;
mod printf;
mod proc;
mod sync;
mod syscall;
mod utils;
mod vm;
