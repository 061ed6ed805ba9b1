//! Hosts-file parsing for the static name table.

use std::collections::HashMap;

use crate::address::Address;
use crate::error::{NetError, Result};

/// Parse hosts-file text into a name table.
///
/// Format per line: `address name1 [name2 ...]`, `#` starts a comment, blank
/// lines are skipped. A name appearing on several lines accumulates all of
/// their addresses. Any malformed line fails the whole parse, so a partially
/// applied table can never exist.
pub fn parse_hosts(text: &str) -> Result<HashMap<String, Vec<Address>>> {
    let mut table: HashMap<String, Vec<Address>> = HashMap::new();

    for (index, raw) in text.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or_default().trim();
        if line.is_empty() {
            continue;
        }

        let mut fields = line.split_whitespace();
        let Some(address_text) = fields.next() else {
            continue;
        };
        let address = Address::parse(address_text, None, None)
            .map_err(|e| NetError::Parse(format!("hosts line {}: {e}", index + 1)))?;

        let mut named = false;
        for name in fields {
            named = true;
            table
                .entry(name.to_ascii_lowercase())
                .or_default()
                .push(address);
        }
        if !named {
            return Err(NetError::Parse(format!(
                "hosts line {}: address without names",
                index + 1
            )));
        }
    }

    Ok(table)
}
