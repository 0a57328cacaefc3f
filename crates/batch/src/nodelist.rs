// Copyright The GridServe Authors
// SPDX-License-Identifier: Apache-2.0

//! Compact node-list expansion.
//!
//! The scheduler reports allocations in a compact syntax: a bare host
//! name, a comma-separated list, or a bracketed range such as
//! `mel[2001-2003]`. Ranges preserve the zero-padding of their start
//! token, so `mel[001-003]` expands to `mel001`, `mel002`, `mel003`.

/// Expands a compact node list into individual host names.
///
/// Pure function; unknown syntax degrades to returning the raw token.
pub fn parse_node_list(node_list: &str) -> Vec<String> {
    let trimmed = node_list.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let mut nodes = Vec::new();
    for part in split_top_level(trimmed) {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        match (part.find('['), part.find(']')) {
            (Some(open), Some(close)) if open < close => {
                let prefix = &part[..open];
                let inner = &part[open + 1..close];
                for spec in inner.split(',') {
                    expand_range(prefix, spec.trim(), &mut nodes);
                }
            }
            _ => nodes.push(part.to_string()),
        }
    }
    nodes
}

/// Splits on commas that are not inside brackets, so
/// `a[1,3-4],b2` yields `a[1,3-4]` and `b2`.
fn split_top_level(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

fn expand_range(prefix: &str, spec: &str, out: &mut Vec<String>) {
    if let Some((lo, hi)) = spec.split_once('-') {
        let width = lo.len();
        if let (Ok(lo_n), Ok(hi_n)) = (lo.parse::<u64>(), hi.parse::<u64>()) {
            for n in lo_n..=hi_n {
                out.push(format!("{prefix}{n:0width$}"));
            }
            return;
        }
    }
    if !spec.is_empty() {
        out.push(format!("{prefix}{spec}"));
    }
}
