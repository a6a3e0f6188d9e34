// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Line-oriented registry configuration: build a registry from a text file,
// and dump one back out in the same shape. The format is INI-like:
//
//   [main]
//   max_serverinfo_nums = 10
//   max_typeinfo_nums = 100
//   version = 1
//
//   [server]
//   server_nums=2
//   s0=1:100:5          sid : queue key : queue tag
//   s1=2:200:6
//
//   [type]
//   type_nums=1
//   t0=42:2             message type : sid
//
// Version 2 drops the numbered keys and the count lines: every line in
// [server] / [type] is one record, however it is keyed, with no entry limit
// beyond the registry capacities.
//
// Parsing is a thin collaborator over the registry operations; malformed
// record lines are skipped with a warning rather than failing the import.

use std::fmt::Write as _;
use std::path::Path;

use tracing::warn;

use crate::error::{BusError, Result};
use crate::registry::Registry;

/// Create the registry file at `registry_path` from the configuration text
/// at `config_path`, replaying every server and type record into it.
pub fn import(registry_path: &Path, config_path: &Path) -> Result<Registry> {
    let text = std::fs::read_to_string(config_path).map_err(BusError::Transport)?;
    let doc = IniDoc::parse(&text);

    let max_servers = doc.get_usize("main", "max_serverinfo_nums", 10)?;
    let max_types = doc.get_usize("main", "max_typeinfo_nums", 100)?;
    let version = doc.get_usize("main", "version", 1)?;

    Registry::create(registry_path, max_servers, max_types)?;
    let mut registry = Registry::open(registry_path)?;

    match version {
        1 => import_numbered(&doc, &mut registry),
        2 => import_listed(&doc, &mut registry),
        _ => return Err(BusError::InvalidParameter("unsupported config version")),
    }
    Ok(registry)
}

/// Version 1: `sN` / `tN` keys scanned in order, bounded by the count lines.
/// The scan stops at the first missing index.
fn import_numbered(doc: &IniDoc, registry: &mut Registry) {
    let server_nums = doc.get_usize("server", "server_nums", 99).unwrap_or(99);
    for i in 0..server_nums {
        let Some(value) = doc.get("server", &format!("s{i}")) else {
            break;
        };
        add_server_line(registry, value);
    }

    let type_nums = doc.get_usize("type", "type_nums", 99).unwrap_or(99);
    for i in 0..type_nums {
        let Some(value) = doc.get("type", &format!("t{i}")) else {
            break;
        };
        add_type_line(registry, value);
    }
}

/// Version 2: every entry in the section is a record, in file order.
fn import_listed(doc: &IniDoc, registry: &mut Registry) {
    for (_, value) in doc.section("server") {
        add_server_line(registry, value);
    }
    for (_, value) in doc.section("type") {
        add_type_line(registry, value);
    }
}

fn add_server_line(registry: &mut Registry, value: &str) {
    let Some((sid, key, tag)) = parse_server_line(value) else {
        warn!(line = value, "skipping malformed server entry");
        return;
    };
    if let Err(err) = registry.add_server(sid, key, tag) {
        warn!(sid, %err, "skipping server entry");
    }
}

fn add_type_line(registry: &mut Registry, value: &str) {
    let Some((msg_type, sid)) = parse_type_line(value) else {
        warn!(line = value, "skipping malformed type entry");
        return;
    };
    if let Err(err) = registry.add_type(msg_type, sid) {
        warn!(msg_type, sid, %err, "skipping type entry");
    }
}

/// `sid:queue_key:queue_tag`, all decimal.
fn parse_server_line(value: &str) -> Option<(u32, i32, u32)> {
    let mut it = value.split(':');
    let sid = it.next()?.trim().parse().ok()?;
    let key = it.next()?.trim().parse().ok()?;
    let tag = it.next()?.trim().parse().ok()?;
    it.next().is_none().then_some((sid, key, tag))
}

/// `msg_type:sid`, both decimal.
fn parse_type_line(value: &str) -> Option<(u32, u32)> {
    let mut it = value.split(':');
    let msg_type = it.next()?.trim().parse().ok()?;
    let sid = it.next()?.trim().parse().ok()?;
    it.next().is_none().then_some((msg_type, sid))
}

/// Dump the live registry back out in the numbered (version 1) shape, so the
/// output can be re-imported as-is.
pub fn export(registry: &Registry, path: &Path) -> Result<()> {
    let mut out = String::new();
    let _ = writeln!(out, "# registry configuration");
    let _ = writeln!(out, "[main]");
    let _ = writeln!(out, "max_serverinfo_nums = {}", registry.max_servers());
    let _ = writeln!(out, "max_typeinfo_nums = {}", registry.max_types());
    let _ = writeln!(out);

    let _ = writeln!(out, "# sN = sid : queue key : queue tag");
    let _ = writeln!(out, "[server]");
    let _ = writeln!(out, "server_nums={}", registry.server_count());
    for (i, r) in registry.servers().enumerate() {
        let _ = writeln!(out, "s{i}={}:{}:{}", r.sid, r.queue_key, r.queue_tag);
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "# tN = message type : sid");
    let _ = writeln!(out, "[type]");
    let _ = writeln!(out, "type_nums={}", registry.type_count());
    for (i, t) in registry.types().enumerate() {
        let sid = registry
            .server_by_index(t.server_index as usize)
            .map(|r| r.sid)
            .unwrap_or(0);
        let _ = writeln!(out, "t{i}={}:{sid}", t.msg_type);
    }

    std::fs::write(path, out).map_err(BusError::Transport)
}

// ---------------------------------------------------------------------------
// Minimal INI reader
// ---------------------------------------------------------------------------

/// Parsed `key=value` entries with their section, in file order. Unknown
/// constructs are skipped with a warning.
struct IniDoc {
    entries: Vec<(String, String, String)>,
}

impl IniDoc {
    fn parse(text: &str) -> Self {
        let mut entries = Vec::new();
        let mut section = String::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
                section = name.trim().to_string();
                continue;
            }
            match line.split_once('=') {
                Some((key, value)) => entries.push((
                    section.clone(),
                    key.trim().to_string(),
                    value.trim().to_string(),
                )),
                None => warn!(line, "skipping unparseable config line"),
            }
        }
        Self { entries }
    }

    fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(s, k, _)| s == section && k == key)
            .map(|(_, _, v)| v.as_str())
    }

    /// Integer lookup with a default when the key is absent. A present but
    /// non-numeric value fails the import.
    fn get_usize(&self, section: &str, key: &str, default: usize) -> Result<usize> {
        match self.get(section, key) {
            None => Ok(default),
            Some(v) => v
                .parse()
                .map_err(|_| BusError::InvalidParameter("non-numeric config value")),
        }
    }

    fn section<'a>(&'a self, name: &'a str) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        self.entries
            .iter()
            .filter(move |(s, _, _)| s == name)
            .map(|(_, k, v)| (k.as_str(), v.as_str()))
    }
}
