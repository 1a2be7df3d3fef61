#![doc = include_str!("../README.md")]

pub use crate::ast::Root;
pub use crate::btr::{BinaryTypeReader, Callbacks};
pub use crate::error::Error;
pub use crate::ir::{FieldArena, FieldId, FieldNode, FieldValue, Trace, TypeArena};
pub use crate::iterator::{Advance, EventNotification, Notification, NotificationIterator};
pub use crate::medium::{AsyncReadMedium, Medium, MediumStatus, ReadMedium, SliceMedium};
pub use crate::visitor::build_trace;

pub mod ast;
pub mod btr;
pub mod error;
pub mod ir;
pub mod iterator;
pub mod medium;
pub mod path;
pub mod resolver;
pub mod visitor;
