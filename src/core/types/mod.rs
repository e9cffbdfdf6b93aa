// src/core/types/mod.rs

//! Domain types shared by every cache backend: source-image identifiers,
//! variant operation lists, and image metadata.

pub mod identifier;
pub mod info;
pub mod operation_list;
pub mod stat;

pub use identifier::Identifier;
pub use info::{Info, SubImage};
pub use operation_list::{Format, Operation, OperationList};
pub use stat::StatResult;
