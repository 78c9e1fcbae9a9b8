// layoutc — tensor layout and element-type inference
//
// Library root. Leaf modules first; `pipeline::judge_graph` is the entry point.

pub mod catalogue;
pub mod config;
pub mod diag;
pub mod dtype;
pub mod dtype_match;
pub mod format_match;
pub mod graph;
pub mod graph_index;
pub mod id;
pub mod judge;
pub mod layout;
pub mod pipeline;
pub mod precision;
pub mod shape;
pub mod subgraph;
