// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::path::{Path, PathBuf};

use crate::errors::{PlcError, Result};

/// Resolve a configuration path argument to an existing absolute file.
///
/// Relative paths are taken against the current working directory; a path
/// that cannot be canonicalized (missing file, dangling link) is a
/// configuration error naming the resolved location.
pub fn resolve_config_path(rel: &str) -> Result<PathBuf> {
    let p = Path::new(rel);

    let abs = if p.is_absolute() {
        p.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|e| {
                PlcError::ConfigValidation(format!("cannot get current working dir: {e}"))
            })?
            .join(p)
    };

    abs.canonicalize().map_err(|e| {
        PlcError::ConfigValidation(format!("configuration file {abs:?} is not readable: {e}"))
    })
}
