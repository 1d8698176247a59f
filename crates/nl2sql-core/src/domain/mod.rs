//! Core data model: the types every other module in the crate builds on.

pub mod chunk;
pub mod dag;
pub mod datasource;
pub mod plan;
pub mod schema;
pub mod state;
pub mod subquery;
pub mod user;

pub use chunk::{build_chunks, Chunk};
pub use dag::{Edge, ExecutionDAG, LogicalNode, NodeKind, RelationSchema};
pub use datasource::{AdapterRequest, Capability, CapabilitySet, Datasource, RequestLimits, ResultFrame};
pub use plan::{BinaryOp, Expr, JoinKind, PlanModel, QueryType, SortDir, UnaryOp};
pub use schema::{ColumnContract, ColumnMetadata, ForeignKey, SchemaContract, SchemaMetadata, SchemaSnapshot, SchemaVersion, TableContract};
pub use state::{ArtifactRef, GraphState, ResolvedDatasource, ResolverResponse, StateUpdate, SubgraphExecutionState, SubgraphOutput, SubgraphStatus};
pub use subquery::{CombineGroup, CombineOp, DecomposerResponse, PostCombineOp, PostOp, SubQuery};
pub use user::UserContext;
