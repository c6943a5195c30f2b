//! Query layers to executable form: a backend-neutral IR, null-safety guards, and the
//! in-memory and PostgreSQL backends.

pub mod in_memory;
pub mod ir;
pub mod ir_builder;
pub mod null_safety;
pub mod queryable;
pub mod sql;

pub use in_memory::{Evaluator, ObjectSource};
pub use ir::{MemberPath, Operand, OrderByPlan, OrderKind, Predicate, SortKey};
pub use ir_builder::IrBuilder;
pub use null_safety::NullSafetyRewriter;
pub use queryable::{CompiledQuery, CompiledRelationship, CompiledSelectors, QueryableBuilder};
pub use sql::{read_rows, SqlQueryBuilder};
