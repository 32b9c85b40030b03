//! Request filter and sort text to parameterized AQL.

pub mod compiler;
pub mod lexer;
pub mod sort;

pub use compiler::{
    compile, skip_for, BindVars, CompiledQuery, FilterClause, Predicate, QueryBuilder, QueryPlan,
    Terminal,
};
pub use lexer::{scan, scan_where, FilterToken, Literal, Operator, Separator};
pub use sort::{parse_sort, SortKey};
