// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Binary serialization format constants for the HLL family.
//!
//! Every serialized sketch is a `u32` length prefix followed by a header
//! and a body; the prefix counts everything after itself. The TTL header
//! is `[block_size:u32][precision:u8][is_sparse:u8][is_static:u8]`; the
//! plain-HLL header inserts `[total_insertions:u32][n_entries:u32]`
//! after `block_size`.
//!
//! Dense HLL-TTL bodies come in two forms. The **static** form writes the
//! full `m x Z` expiry matrix in row-major order. The **dynamic** form
//! writes, for each row with at least one occupied cell,
//! `(row:u32, n_nonzero:u32, (rank:u8, expiry:u32)*)`; pruning relies on
//! the dense invariant that no cell above `top[row]` is occupied.

/// Size of the HLL-TTL header that follows the length prefix.
pub const TTL_HEADER_SIZE: usize = 7;

/// Size of the plain-HLL header that follows the length prefix.
pub const PLAIN_HEADER_SIZE: usize = 15;

/// `is_sparse` flag: sparse body.
pub const SPARSE_FORM: u8 = 1;

/// `is_sparse` flag: dense body.
pub const DENSE_FORM: u8 = 0;

/// `is_static` flag: full-matrix dense body.
pub const STATIC_FORM: u8 = 1;

/// `is_static` flag: run-length dense body.
pub const DYNAMIC_FORM: u8 = 0;

/// Bytes per sparse record: `hash:u64` + `expiry:u32`.
pub const SPARSE_ENTRY_SIZE: usize = 12;

/// Bytes per dynamic-form cell: `rank:u8` + `expiry:u32`.
pub const DYNAMIC_CELL_SIZE: usize = 5;

/// Bytes per dynamic-form row prelude: `row:u32` + `n_nonzero:u32`.
pub const DYNAMIC_ROW_PRELUDE_SIZE: usize = 8;
