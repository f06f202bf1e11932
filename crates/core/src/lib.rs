#![forbid(unsafe_code)]

pub mod block;
pub mod catalog;
pub mod change;
pub mod ids;
pub mod position;

pub use block::{content_hash, Attr, Block, Ref};
pub use catalog::{BlockType, RelationType, SchemaInfo};
pub use change::{
    BlockDiff, Change, ChangeOp, Conflict, ConflictKind, Diff, RefDiff, Resolution,
    ResolutionChoice, SessionStatus, StructuralDep, UserType,
};
