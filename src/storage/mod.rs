// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
pub mod fs_sink;
pub mod http_sink;
pub mod result_sink;
pub mod working_area;

// Re-export main types for convenience
pub use fs_sink::FsResultSink;
pub use http_sink::HttpResultSink;
pub use result_sink::{connect_result_sink, MemoryResultSink, ResultSink, ResultSinkStats};
pub use working_area::{JobWorkspace, WorkingArea};
