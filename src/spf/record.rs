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

use log::{debug, warn};

use super::eval::SpfResult;
use super::syntax::VERSION;
use crate::support::dns::Resolver;

/// Fetches the SPF record published at `domain`.
///
/// On success, returns the full text of the one TXT record which is either
/// exactly `v=spf1` or starts with `v=spf1 ` (case-insensitively).
/// Otherwise, returns the result evaluation must conclude with:
///
/// - `TempError` if the TXT query failed.
/// - `None` if there is no such record.
/// - `PermError` if there is more than one.
pub fn retrieve<R: Resolver + ?Sized>(
    resolver: &R,
    domain: &str,
) -> Result<String, SpfResult> {
    let records = match resolver.query_txt(domain) {
        Ok(records) => records,
        Err(e) => {
            debug!("TXT lookup for {domain} failed: {e}");
            return Err(SpfResult::TempError);
        },
    };

    let mut spf_records = records.into_iter().filter(|r| is_spf_record(r));
    let Some(record) = spf_records.next() else {
        debug!("{domain} has no SPF record");
        return Err(SpfResult::None);
    };

    if spf_records.next().is_some() {
        warn!("{domain} publishes multiple SPF records");
        return Err(SpfResult::PermError);
    }

    debug!("SPF record for {domain}: {record}");
    Ok(record)
}

fn is_spf_record(txt: &str) -> bool {
    let Some(prefix) = txt.get(..VERSION.len()) else {
        return false;
    };

    prefix.eq_ignore_ascii_case(VERSION)
        && matches!(txt.as_bytes().get(VERSION.len()), None | Some(b' '))
}
