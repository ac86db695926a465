//! JSON-lines snapshot exports
//!
//! One [`KeyRecord`] JSON object per line. Blank lines are skipped. The
//! source stops at the first malformed line.

use crate::error::DecodeError;
use crate::record::{KeyRecord, RecordSource};
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

/// Lazy reader over one export file
pub struct JsonLinesSource {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    line_no: u64,
    finished: bool,
}

impl JsonLinesSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DecodeError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| DecodeError::Io {
            file: path.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            path,
            lines: BufReader::new(file).lines(),
            line_no: 0,
            finished: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn fail(&mut self, err: DecodeError) -> Option<Result<KeyRecord, DecodeError>> {
        self.finished = true;
        Some(Err(err))
    }
}

impl Iterator for JsonLinesSource {
    type Item = Result<KeyRecord, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        loop {
            let line = match self.lines.next() {
                None => {
                    self.finished = true;
                    return None;
                }
                Some(Err(e)) => {
                    let err = DecodeError::Io {
                        file: self.path.clone(),
                        reason: e.to_string(),
                    };
                    return self.fail(err);
                }
                Some(Ok(line)) => line,
            };
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            return match serde_json::from_str::<KeyRecord>(&line) {
                Ok(record) => Some(Ok(record)),
                Err(e) => {
                    let err = DecodeError::Malformed {
                        file: self.path.clone(),
                        line: self.line_no,
                        reason: e.to_string(),
                    };
                    self.fail(err)
                }
            };
        }
    }
}

impl RecordSource for JsonLinesSource {
    fn name(&self) -> String {
        self.path.display().to_string()
    }
}
