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

//! # cachesketch
//!
//! Cache-sizing analytics from access traces with per-object expiry (TTL):
//! **working-set size** (WSS) and **miss-ratio curves** (MRC), each in an
//! exact variant and several sketched variants. Every variant is TTL-aware:
//! an object stops contributing to WSS/MRC once its absolute eviction
//! timestamp passes.
//!
//! This crate is the online estimation core. It consumes immutable request
//! batches produced by a trace reader and maintains the statistics; it is
//! not a cache, does not simulate replacement policies, and leaves plotting,
//! CSV post-processing, and orchestration to its callers.
//!
//! # Estimators
//!
//! - [`wss`]: exact working-set calculator and a geometric bank of
//!   [`hll`] sketches grouped by power-of-two block-size class.
//! - [`mrc::OlkenMrc`]: exact stack distances from an order-statistic tree.
//! - [`mrc::ShardsFixedRateMrc`] / [`mrc::ShardsFixedSizeMrc`]: spatially
//!   sampled stack distances with constant-rate and bounded-sample
//!   operation.
//! - [`mrc::CounterStacksMrc`]: an approximate count matrix over a bounded
//!   bank of TTL-aware HyperLogLogs.
//!
//! # TTL semantics
//!
//! All estimators share one clock convention: an object whose
//! `eviction_time <= now` is dead at `now`. Eviction is idempotent and
//! time-monotone, so replaying a trace in timestamp order never resurrects
//! an expired object.

#![deny(missing_docs)]

pub mod codec;
pub mod config;
pub mod error;
pub mod hash;
pub mod hll;
pub mod index;
pub mod mrc;
pub mod trace;
pub mod wss;
