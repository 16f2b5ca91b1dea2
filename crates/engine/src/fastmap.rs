// SPDX-FileCopyrightText: 2026 capa-rs contributors
//
// SPDX-License-Identifier: Apache-2.0

//! `FastMap` and `FastSet` types for efficient key-value storage.
//!
//! Feature lookups dominate rule evaluation, so the feature index uses the
//! std collections backed by the rapidhash algorithm. The API is exactly
//! that of `HashMap`/`HashSet`; only the hasher differs.

pub type FastMap<K, V> = rapidhash::RapidHashMap<K, V>;
pub type FastSet<T> = rapidhash::RapidHashSet<T>;
