//-
// Copyright (c) 2024, Jason Lingle
//
// This file is part of Spfcheck.
//
// Spfcheck is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Spfcheck is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Spfcheck. If not, see <http://www.gnu.org/licenses/>.

//! Sender Policy Framework (RFC 7208) evaluation.

pub mod addr;
pub mod eval;
pub mod macros;
pub mod record;
pub mod syntax;

pub use addr::{eval_qualifier, match_address};
pub use eval::{check_host, SpfResult};
pub use macros::{expand, MacroContext};
pub use record::retrieve;
pub use syntax::{parse_record, Directive, Mechanism, Modifier, Qualifier, Term};
