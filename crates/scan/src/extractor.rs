// SPDX-FileCopyrightText: 2026 capa-rs contributors
//
// SPDX-License-Identifier: Apache-2.0

//! The feature extractor boundary.
//!
//! Feature extraction backends (disassemblers, PE/ELF parsers, shellcode
//! workspaces) live outside this workspace; the driver consumes them
//! through [`FeatureExtractor`]. Handles for functions, basic blocks, and
//! instructions are opaque to the driver beyond their canonical address.

use capa_engine::{Address, Feature};
use thiserror::Error;

/// Whatever an extractor backend reports when it fails.
pub type ExtractError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Raised by extractor implementations handed an input they cannot parse.
#[derive(Debug, Error)]
#[error("unsupported file format: {0}")]
pub struct UnsupportedFormatError(pub String);

/// Anything with a canonical integer address.
pub trait HasAddress {
    fn address(&self) -> Address;
}

impl HasAddress for Address {
    fn address(&self) -> Address {
        *self
    }
}

/// A source of extracted features at the three scopes the engine matches.
///
/// `functions`, `basic_blocks`, and `instructions` enumerate program
/// structure; the `*_features` methods report the features observed there.
/// File features may lack an address — the driver still indexes them, with
/// an empty location set.
pub trait FeatureExtractor {
    type Function: HasAddress;
    type BasicBlock: HasAddress;
    type Instruction: HasAddress;

    /// The preferred load address of the program.
    fn base_address(&self) -> Address;

    fn file_features(&self) -> Result<Vec<(Feature, Option<Address>)>, ExtractError>;

    fn functions(&self) -> Vec<Self::Function>;

    /// Library functions (for example, recognized via FLIRT signatures
    /// upstream) are recorded and skipped: their capabilities belong to the
    /// library, not the program.
    fn is_library_function(&self, address: Address) -> bool;

    fn function_name(&self, address: Address) -> Option<String>;

    fn function_features(
        &self,
        function: &Self::Function,
    ) -> Result<Vec<(Feature, Address)>, ExtractError>;

    fn basic_blocks(&self, function: &Self::Function) -> Vec<Self::BasicBlock>;

    fn basic_block_features(
        &self,
        function: &Self::Function,
        basic_block: &Self::BasicBlock,
    ) -> Result<Vec<(Feature, Address)>, ExtractError>;

    fn instructions(
        &self,
        function: &Self::Function,
        basic_block: &Self::BasicBlock,
    ) -> Vec<Self::Instruction>;

    fn instruction_features(
        &self,
        function: &Self::Function,
        basic_block: &Self::BasicBlock,
        instruction: &Self::Instruction,
    ) -> Result<Vec<(Feature, Address)>, ExtractError>;
}

/// An extractor failure, annotated with the program location the driver
/// was working on.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("failed to extract file features")]
    File {
        #[source]
        source: ExtractError,
    },
    #[error("failed to extract features from function {function:#x}")]
    Function {
        function: Address,
        #[source]
        source: ExtractError,
    },
    #[error("failed to extract features from basic block {basic_block:#x} of function {function:#x}")]
    BasicBlock {
        function: Address,
        basic_block: Address,
        #[source]
        source: ExtractError,
    },
}
