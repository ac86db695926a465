//! Report files
//!
//! Every run writes into its own work directory,
//! `<data-dir>/keyscope-YYYYmmdd-HHMMSS`. Reports read the final state of
//! the accumulators, except the memory CSV and the JSON-lines export, which
//! stream one row per record while ingesting.

use crate::analysis::flame::FlameNode;
use crate::analysis::prefix::PrefixEntry;
use crate::analysis::Accumulator;
use crate::error::{ConfigError, ScopeError};
use crate::record::KeyRecord;
use chrono::{DateTime, Local, SecondsFormat};
use humansize::{format_size, BINARY};
use std::borrow::Cow;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// Prefix of work directory names
pub const WORK_DIR_PREFIX: &str = "keyscope";

pub const BIGKEY_HEADER: [&str; 6] = [
    "database",
    "key",
    "type",
    "size",
    "size_readable",
    "element_count",
];

pub const MEMORY_HEADER: [&str; 8] = [
    "database",
    "key",
    "type",
    "size",
    "size_readable",
    "element_count",
    "encoding",
    "expiration",
];

pub const PREFIX_HEADER: [&str; 5] = ["database", "prefix", "size", "size_readable", "key_count"];

/// Size formatted with binary units, e.g. `1.50 KiB`
pub fn readable_size(bytes: u64) -> String {
    format_size(bytes, BINARY)
}

/// Name of the work directory for a run started at `started`
pub fn work_dir_name(started: DateTime<Local>) -> String {
    format!("{WORK_DIR_PREFIX}-{}", started.format("%Y%m%d-%H%M%S"))
}

/// Create a fresh work directory under `data_dir`
///
/// If two runs start within the same second the later one gets a numeric
/// suffix.
pub fn create_work_dir(data_dir: &Path, started: DateTime<Local>) -> Result<PathBuf, ScopeError> {
    if !data_dir.is_dir() {
        return Err(ConfigError::InvalidDataDir {
            path: data_dir.to_path_buf(),
            reason: "not a directory".into(),
        }
        .into());
    }
    let base = work_dir_name(started);
    let mut dir = data_dir.join(&base);
    let mut n = 1;
    while dir.exists() {
        dir = data_dir.join(format!("{base}-{n}"));
        n += 1;
    }
    fs::create_dir(&dir)?;
    info!(dir = %dir.display(), "Work directory created");
    Ok(dir)
}

/// Output file name derived from a source name
///
/// Snapshot files keep their stem (`dump.jsonl` gives `dump-memory.csv`);
/// node names are sanitized whole so each node gets its own file.
pub fn source_file_name(source: &str, suffix: &str) -> String {
    let path = Path::new(source);
    let base = match path.file_stem() {
        Some(stem) if path.is_file() => stem.to_string_lossy().into_owned(),
        _ => source.to_string(),
    };
    let safe: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{safe}{suffix}")
}

fn csv_field(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

/// Minimal CSV writer with RFC 4180 quoting
pub struct CsvWriter<W: Write> {
    out: W,
}

impl<W: Write> CsvWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn write_row<S: AsRef<str>>(&mut self, fields: &[S]) -> io::Result<()> {
        for (i, field) in fields.iter().enumerate() {
            if i > 0 {
                self.out.write_all(b",")?;
            }
            self.out.write_all(csv_field(field.as_ref()).as_bytes())?;
        }
        self.out.write_all(b"\n")
    }

    pub fn into_inner(mut self) -> io::Result<W> {
        self.out.flush()?;
        Ok(self.out)
    }
}

fn expiration_field(record: &KeyRecord) -> String {
    record
        .expiration
        .map(|at| at.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default()
}

/// Largest keys, in the order given
pub fn write_bigkey_csv<W: Write>(out: W, records: &[KeyRecord]) -> io::Result<W> {
    let mut csv = CsvWriter::new(out);
    csv.write_row(&BIGKEY_HEADER)?;
    for r in records {
        csv.write_row(&[
            r.database.to_string(),
            r.key.clone(),
            r.key_type.to_string(),
            r.size_bytes.to_string(),
            readable_size(r.size_bytes),
            r.element_count.to_string(),
        ])?;
    }
    csv.into_inner()
}

/// Largest prefixes, in the order given
pub fn write_prefix_csv<W: Write>(out: W, entries: &[PrefixEntry]) -> io::Result<W> {
    let mut csv = CsvWriter::new(out);
    csv.write_row(&PREFIX_HEADER)?;
    for e in entries {
        csv.write_row(&[
            e.database.to_string(),
            e.prefix.clone(),
            e.size.to_string(),
            readable_size(e.size),
            e.key_count.to_string(),
        ])?;
    }
    csv.into_inner()
}

/// Flame graph tree as JSON
pub fn write_flame_json<W: Write>(mut out: W, tree: &FlameNode) -> io::Result<W> {
    serde_json::to_writer(&mut out, tree)?;
    out.flush()?;
    Ok(out)
}

/// Self-contained page that renders the flame tree as an icicle chart
///
/// The tree is embedded as JSON, so the page works offline.
pub fn write_flame_html<W: Write>(mut out: W, tree: &FlameNode) -> io::Result<W> {
    // `</` would end the script element early
    let json = serde_json::to_string(tree)?.replace("</", "<\\/");
    out.write_all(FLAME_HTML_HEAD.as_bytes())?;
    out.write_all(json.as_bytes())?;
    out.write_all(FLAME_HTML_TAIL.as_bytes())?;
    out.flush()?;
    Ok(out)
}

const FLAME_HTML_HEAD: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>keyscope flame graph</title>
<style>
body { font: 12px monospace; margin: 16px; }
.node { box-sizing: border-box; overflow: hidden; white-space: nowrap; }
.bar { height: 18px; line-height: 18px; padding: 0 4px; border: 1px solid #fff;
       background: #e8743b; color: #222; cursor: pointer; }
.bar:hover { background: #f2a35e; }
.row { display: flex; }
</style>
</head>
<body>
<div id="path"></div>
<div id="chart"></div>
<script id="tree" type="application/json">"#;

const FLAME_HTML_TAIL: &str = r#"</script>
<script>
const tree = JSON.parse(document.getElementById("tree").textContent);
function units(n) {
  const u = ["B", "KiB", "MiB", "GiB", "TiB"];
  let i = 0;
  while (n >= 1024 && i < u.length - 1) { n /= 1024; i++; }
  return n.toFixed(i ? 2 : 0) + " " + u[i];
}
function render(node, trail) {
  document.getElementById("path").textContent = trail.join(" / ") + " (" + units(node.value) + ")";
  const chart = document.getElementById("chart");
  chart.replaceChildren(build(node, node.value, trail));
}
function build(node, total, trail) {
  const el = document.createElement("div");
  el.className = "node";
  el.style.width = (total ? 100 * node.value / total : 0) + "%";
  const bar = document.createElement("div");
  bar.className = "bar";
  bar.textContent = node.name + " " + units(node.value);
  bar.title = bar.textContent;
  const path = trail.concat(trail[trail.length - 1] === node.name ? [] : [node.name]);
  bar.onclick = () => render(node, path);
  el.appendChild(bar);
  const row = document.createElement("div");
  row.className = "row";
  for (const child of node.children || []) {
    row.appendChild(build(child, node.value, path));
  }
  el.appendChild(row);
  return el;
}
render(tree, [tree.name]);
</script>
</body>
</html>
"#;

/// Streams one memory CSV row per accepted record
///
/// Write errors are held until [`MemoryCsvWriter::finish`], since
/// accumulators cannot fail mid-ingest.
pub struct MemoryCsvWriter<W: Write> {
    csv: CsvWriter<W>,
    rows: u64,
    error: Option<io::Error>,
}

impl<W: Write> MemoryCsvWriter<W> {
    pub fn new(out: W) -> io::Result<Self> {
        let mut csv = CsvWriter::new(out);
        csv.write_row(&MEMORY_HEADER)?;
        Ok(Self {
            csv,
            rows: 0,
            error: None,
        })
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn finish(self) -> io::Result<W> {
        if let Some(e) = self.error {
            return Err(e);
        }
        self.csv.into_inner()
    }
}

impl<W: Write> Accumulator for MemoryCsvWriter<W> {
    fn accept(&mut self, r: &KeyRecord) {
        if self.error.is_some() {
            return;
        }
        let row = [
            r.database.to_string(),
            r.key.clone(),
            r.key_type.to_string(),
            r.size_bytes.to_string(),
            readable_size(r.size_bytes),
            r.element_count.to_string(),
            r.encoding.clone(),
            expiration_field(r),
        ];
        match self.csv.write_row(&row) {
            Ok(()) => self.rows += 1,
            Err(e) => self.error = Some(e),
        }
    }
}

/// Streams records as JSON lines, readable by `JsonLinesSource`
pub struct JsonLinesWriter<W: Write> {
    out: W,
    rows: u64,
    error: Option<io::Error>,
}

impl<W: Write> JsonLinesWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            rows: 0,
            error: None,
        }
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn finish(mut self) -> io::Result<W> {
        if let Some(e) = self.error {
            return Err(e);
        }
        self.out.flush()?;
        Ok(self.out)
    }
}

impl<W: Write> Accumulator for JsonLinesWriter<W> {
    fn accept(&mut self, record: &KeyRecord) {
        if self.error.is_some() {
            return;
        }
        let written = serde_json::to_writer(&mut self.out, record)
            .map_err(io::Error::from)
            .and_then(|_| self.out.write_all(b"\n"));
        match written {
            Ok(()) => self.rows += 1,
            Err(e) => self.error = Some(e),
        }
    }
}

/// Buffered file in the work directory
pub fn create_report(dir: &Path, name: &str) -> io::Result<BufWriter<File>> {
    Ok(BufWriter::new(File::create(dir.join(name))?))
}
