//! Execution Module - database side of the pipeline
//!
//! - `ExecutionOutcome` / `RowSet` for the text protocol gateways speak
//! - `ClickHouseEngine`, the production `ExecutionGateway`

pub mod clickhouse_engine;
pub mod result;

pub use clickhouse_engine::ClickHouseEngine;
pub use result::{ExecutionOutcome, RowSet, EXECUTION_ERROR_SENTINEL, NO_DATA_MESSAGE, SUCCESS_PREFIX};
