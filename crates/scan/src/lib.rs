// SPDX-FileCopyrightText: 2026 capa-rs contributors
//
// SPDX-License-Identifier: Apache-2.0

//! # capa-scan
//!
//! The scoped match driver. It walks the program structure reported by a
//! [`FeatureExtractor`] — functions, their basic blocks, their
//! instructions — and weaves extracted features and rule matches across
//! scopes:
//!
//! 1. per basic block: instruction and block features are indexed, basic
//!    block rules are matched, and each match is promoted into the
//!    enclosing function's feature set as a `match(...)` feature;
//! 2. per function: function, block, and instruction features accumulate,
//!    function rules are matched at the function's address;
//! 3. file: file features (possibly without addresses) are merged with
//!    `match(...)` promotions from every function and basic block match,
//!    and file rules are matched at address 0.
//!
//! Matching is deterministic. The `RuleSet` is read-only and may be shared
//! across jobs; per-function matching is independent, which is what
//! [`find_capabilities_parallel`] exploits.

pub mod cancel;
pub mod extractor;

use capa_engine::{Address, FastMap, Feature, FeatureSet};
use capa_rules::{match_scope, MatchResults, RuleSet};

pub use cancel::CancelToken;
pub use extractor::{
    ExtractError, FeatureExtractor, HasAddress, ScanError, UnsupportedFormatError,
};

/// Everything found in one program: matches keyed by rule name, feature
/// count statistics, and the library functions that were recognized and
/// skipped. `incomplete` is set when a cancellation cut the run short.
#[derive(Debug)]
pub struct Capabilities<'r> {
    pub matches: MatchResults<'r>,
    pub feature_counts: FeatureCounts,
    pub library_functions: FastMap<Address, String>,
    pub incomplete: bool,
}

#[derive(Debug, Default)]
pub struct FeatureCounts {
    pub file: usize,
    pub functions: FastMap<Address, usize>,
}

/// The matches produced within a single function.
#[derive(Debug)]
pub struct FunctionCapabilities<'r> {
    pub function_matches: MatchResults<'r>,
    pub basic_block_matches: MatchResults<'r>,
    pub feature_count: usize,
}

/// Match basic block and function rules within one function.
///
/// Basic block features and instruction features accumulate into both the
/// block's and the function's feature sets; every basic block match is
/// promoted into the function's features before function rules run.
pub fn find_function_capabilities<'r, E: FeatureExtractor>(
    ruleset: &'r RuleSet,
    extractor: &E,
    function: &E::Function,
) -> Result<FunctionCapabilities<'r>, ScanError> {
    let function_address = function.address();
    let mut function_features = FeatureSet::default();
    let mut basic_block_matches = MatchResults::default();

    for (feature, va) in extractor
        .function_features(function)
        .map_err(|source| ScanError::Function {
            function: function_address,
            source,
        })?
    {
        function_features.entry(feature).or_default().insert(va);
    }

    for basic_block in &extractor.basic_blocks(function) {
        let block_address = basic_block.address();
        let block_error = |source| ScanError::BasicBlock {
            function: function_address,
            basic_block: block_address,
            source,
        };
        let mut block_features = FeatureSet::default();

        for (feature, va) in extractor
            .basic_block_features(function, basic_block)
            .map_err(block_error)?
        {
            block_features
                .entry(feature.clone())
                .or_default()
                .insert(va);
            function_features.entry(feature).or_default().insert(va);
        }

        for instruction in &extractor.instructions(function, basic_block) {
            for (feature, va) in extractor
                .instruction_features(function, basic_block, instruction)
                .map_err(block_error)?
            {
                block_features
                    .entry(feature.clone())
                    .or_default()
                    .insert(va);
                function_features.entry(feature).or_default().insert(va);
            }
        }

        let matches = match_scope(
            &ruleset.basic_block_rules,
            &mut block_features,
            block_address,
        );
        for (name, results) in matches {
            let promoted = function_features
                .entry(Feature::matched_rule(name.as_str()))
                .or_default();
            for (va, _) in &results {
                promoted.insert(*va);
            }
            basic_block_matches
                .entry(name)
                .or_default()
                .extend(results);
        }
    }

    let function_matches = match_scope(
        &ruleset.function_rules,
        &mut function_features,
        function_address,
    );
    Ok(FunctionCapabilities {
        function_matches,
        basic_block_matches,
        feature_count: function_features.len(),
    })
}

/// Match file rules against the file's features merged with the
/// `match(...)` promotions collected at lower scopes.
///
/// File features may lack an address; they are still indexed, with an
/// empty location set. Matches are keyed at address 0.
pub fn find_file_capabilities<'r, E: FeatureExtractor>(
    ruleset: &'r RuleSet,
    extractor: &E,
    function_features: FeatureSet,
) -> Result<(MatchResults<'r>, usize), ScanError> {
    let mut file_features = FeatureSet::default();
    for (feature, va) in extractor
        .file_features()
        .map_err(|source| ScanError::File { source })?
    {
        let locations = file_features.entry(feature).or_default();
        if let Some(va) = va {
            locations.insert(va);
        }
    }
    log::debug!("analyzed file and extracted {} features", file_features.len());

    for (feature, locations) in function_features {
        file_features.entry(feature).or_default().extend(locations);
    }

    let matches = match_scope(&ruleset.file_rules, &mut file_features, 0x0);
    Ok((matches, file_features.len()))
}

/// Run the full scoped pipeline over every function reported by the
/// extractor, then the file pass.
pub fn find_capabilities<'r, E: FeatureExtractor>(
    ruleset: &'r RuleSet,
    extractor: &E,
    cancel: Option<&CancelToken>,
) -> Result<Capabilities<'r>, ScanError> {
    let mut all_function_matches = MatchResults::default();
    let mut all_basic_block_matches = MatchResults::default();
    let mut feature_counts = FeatureCounts::default();
    let mut library_functions = FastMap::default();
    let mut incomplete = false;

    for function in &extractor.functions() {
        if cancel.is_some_and(CancelToken::is_cancelled) {
            incomplete = true;
            break;
        }
        let address = function.address();
        if let Some(name) = library_function_name(extractor, address) {
            library_functions.insert(address, name);
            continue;
        }

        let found = find_function_capabilities(ruleset, extractor, function)?;
        log::debug!(
            "analyzed function {address:#x} and extracted {} features",
            found.feature_count
        );
        feature_counts.functions.insert(address, found.feature_count);
        merge(&mut all_function_matches, found.function_matches);
        merge(&mut all_basic_block_matches, found.basic_block_matches);
    }

    finish_with_file_pass(
        ruleset,
        extractor,
        cancel,
        all_function_matches,
        all_basic_block_matches,
        feature_counts,
        library_functions,
        incomplete,
    )
}

/// Like [`find_capabilities`], but fans per-function matching out over a
/// rayon worker pool. Per-worker partial results merge in input order, so
/// the outcome is identical to the sequential driver. Evaluation within a
/// scope stays sequential — later rules may reference earlier rules'
/// matches — so parallelism is across functions only.
pub fn find_capabilities_parallel<'r, E>(
    ruleset: &'r RuleSet,
    extractor: &E,
    cancel: Option<&CancelToken>,
) -> Result<Capabilities<'r>, ScanError>
where
    E: FeatureExtractor + Sync,
    E::Function: Sync,
{
    use rayon::prelude::*;

    let functions = extractor.functions();
    let mut library_functions = FastMap::default();
    let mut worklist = Vec::with_capacity(functions.len());
    for function in &functions {
        let address = function.address();
        if let Some(name) = library_function_name(extractor, address) {
            library_functions.insert(address, name);
        } else {
            worklist.push(function);
        }
    }

    let per_function: Vec<Option<Result<(Address, FunctionCapabilities<'r>), ScanError>>> =
        worklist
            .par_iter()
            .map(|function| {
                if cancel.is_some_and(CancelToken::is_cancelled) {
                    return None;
                }
                Some(
                    find_function_capabilities(ruleset, extractor, function)
                        .map(|found| (function.address(), found)),
                )
            })
            .collect();

    let mut all_function_matches = MatchResults::default();
    let mut all_basic_block_matches = MatchResults::default();
    let mut feature_counts = FeatureCounts::default();
    let mut incomplete = false;
    for outcome in per_function {
        match outcome {
            None => incomplete = true,
            Some(Err(e)) => return Err(e),
            Some(Ok((address, found))) => {
                feature_counts.functions.insert(address, found.feature_count);
                merge(&mut all_function_matches, found.function_matches);
                merge(&mut all_basic_block_matches, found.basic_block_matches);
            }
        }
    }

    finish_with_file_pass(
        ruleset,
        extractor,
        cancel,
        all_function_matches,
        all_basic_block_matches,
        feature_counts,
        library_functions,
        incomplete,
    )
}

fn library_function_name<E: FeatureExtractor>(
    extractor: &E,
    address: Address,
) -> Option<String> {
    if !extractor.is_library_function(address) {
        return None;
    }
    let name = extractor.function_name(address).unwrap_or_default();
    log::debug!("skipping library function {address:#x} ({name})");
    Some(name)
}

#[allow(clippy::too_many_arguments)]
fn finish_with_file_pass<'r, E: FeatureExtractor>(
    ruleset: &'r RuleSet,
    extractor: &E,
    cancel: Option<&CancelToken>,
    all_function_matches: MatchResults<'r>,
    all_basic_block_matches: MatchResults<'r>,
    mut feature_counts: FeatureCounts,
    library_functions: FastMap<Address, String>,
    mut incomplete: bool,
) -> Result<Capabilities<'r>, ScanError> {
    let mut matches = MatchResults::default();

    if incomplete || cancel.is_some_and(CancelToken::is_cancelled) {
        incomplete = true;
    } else {
        // features capturing the rule matches within function and basic
        // block scopes: matched rule -> the addresses at which it matched
        let mut promoted = FeatureSet::default();
        for (name, results) in all_function_matches
            .iter()
            .chain(all_basic_block_matches.iter())
        {
            let locations = promoted
                .entry(Feature::matched_rule(name.as_str()))
                .or_default();
            locations.extend(results.iter().map(|(va, _)| *va));
        }

        let (file_matches, file_feature_count) =
            find_file_capabilities(ruleset, extractor, promoted)?;
        feature_counts.file = file_feature_count;
        merge(&mut matches, file_matches);
    }

    // each rule exists in exactly one scope, so these merge without overlap
    merge(&mut matches, all_basic_block_matches);
    merge(&mut matches, all_function_matches);

    Ok(Capabilities {
        matches,
        feature_counts,
        library_functions,
        incomplete,
    })
}

fn merge<'r>(into: &mut MatchResults<'r>, from: MatchResults<'r>) {
    for (name, mut results) in from {
        into.entry(name).or_default().append(&mut results);
    }
}
