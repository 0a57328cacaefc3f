// Copyright The GridServe Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors for recipe loading and validation.

use thiserror::Error;

/// Errors that can occur while loading or validating configuration.
#[derive(Error, Debug)]
pub enum Error {
    /// No recipe file exists for the requested name.
    #[error("Recipe not found: '{name}'")]
    RecipeNotFound {
        /// The name as given by the caller (bare or `category/name`).
        name: String,
    },

    /// The recipe file could not be read from disk.
    #[error("Failed to read recipe '{path}': {source}")]
    RecipeIo {
        /// Path of the recipe file.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The recipe file is not valid YAML or does not match the schema.
    #[error("Failed to parse recipe '{path}': {source}")]
    RecipeParse {
        /// Path of the recipe file.
        path: String,
        /// Underlying deserialization error.
        #[source]
        source: serde_yaml::Error,
    },

    /// The recipe parsed but violates a semantic invariant.
    #[error("Invalid recipe '{name}': {reason}")]
    RecipeInvalid {
        /// Canonical recipe name.
        name: String,
        /// Human-readable description of the violated invariant.
        reason: String,
    },

    /// A required environment variable is missing or malformed.
    #[error("Invalid environment: {reason}")]
    Environment {
        /// What was missing or malformed.
        reason: String,
    },
}
