//! Translation of analyzed functions into stack code

mod backend;
mod ops;
mod translator;

pub use backend::{
    Backend, CompiledFunction, FrameLayout, OpBuffer, ParamBinding, SlotInfo, SlotKind,
    TextBackend,
};
pub use ops::{
    Compare, Direct, DoubleOp, Label, LongOp, Op, PlacePath, PlaceRoot, PlaceStep, ReadMode, Repr,
    ScopeKind, VarRef,
};
pub use translator::{translate, CallResolver, NamedCalls, Translation};
