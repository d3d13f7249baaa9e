// SPDX-FileCopyrightText: 2025 TriliTech <contact@trili.tech>
//
// SPDX-License-Identifier: MIT

mod format;
pub mod run;

pub use format::format;
pub use run::run;
