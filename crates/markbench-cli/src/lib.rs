// Copyright 2025 markbench Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # markbench CLI
//!
//! Command-line interface for the markbench aggregation service.
//!
//! ## Key Commands
//!
//! - `markbench serve`: Run the aggregation server
//! - `markbench get`: Render a text on a running server (one JSON record per line)
//! - `markbench cipher`: Encrypt or decrypt registry URLs
//!
//! The `cipher` command's logic lives in [`cipher_tool`] so it can be tested
//! without spawning the binary.

pub mod cipher_tool;
