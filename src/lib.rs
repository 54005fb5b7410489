// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

pub mod assembly;
pub mod cfg;
pub mod client;
pub mod device;
pub mod errors;
pub mod models;
pub mod orchestrator;
pub mod runtime;
pub mod session;
pub mod webapi;
