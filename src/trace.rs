//! Allocation trace files.
//!
//! One request per line:
//!
//! ```text
//! # comment
//! a <id> <bytes>          allocate
//! f <id>                  free
//! r <id> <bytes>          reallocate
//! c <id> <count> <bytes>  zero-allocate
//! ```
use std::{fs, path::Path, str::FromStr};

/// A single trace request. Ids name allocations and may be reused once freed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    /// `a <id> <bytes>`
    Allocate { id: usize, size: usize },
    /// `f <id>`
    Free { id: usize },
    /// `r <id> <bytes>`
    Reallocate { id: usize, size: usize },
    /// `c <id> <count> <bytes>`
    ZeroAllocate { id: usize, count: usize, size: usize },
}

impl Request {
    /// The id this request operates on.
    pub fn id(&self) -> usize {
        match *self {
            Request::Allocate { id, .. }
            | Request::Free { id }
            | Request::Reallocate { id, .. }
            | Request::ZeroAllocate { id, .. } => id,
        }
    }
}

/// Why a trace could not be loaded. Lines are numbered from 1.
#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    /// The trace file could not be read.
    #[error("failed to read trace: {0}")]
    Io(#[from] std::io::Error),
    /// A line starts with an unknown letter.
    #[error("line {line}: unknown request {op:?}")]
    UnknownRequest { line: usize, op: String },
    /// A request has the wrong number of arguments.
    #[error("line {line}: expected {expected} arguments, found {found}")]
    ArgumentCount {
        line: usize,
        expected: usize,
        found: usize,
    },
    /// An argument is not a non-negative integer.
    #[error("line {line}: invalid number {value:?}")]
    InvalidNumber { line: usize, value: String },
}

/// A parsed trace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Trace {
    /// Name used in reports, usually the file path.
    pub name: String,
    /// Requests in trace order.
    pub requests: Vec<Request>,
}

impl Trace {
    /// Parses the trace text in `src`. `name` is only used for reporting.
    pub fn parse(name: &str, src: &str) -> Result<Self, TraceError> {
        let mut requests = Vec::new();
        for (index, line) in src.lines().enumerate() {
            let line_no = index + 1;
            let line = match line.find('#') {
                Some(start) => &line[..start],
                None => line,
            };
            let mut words = line.split_whitespace();
            let Some(op) = words.next() else {
                continue;
            };
            let args = words
                .map(|word| parse_number(line_no, word))
                .collect::<Result<Vec<_>, _>>()?;

            let expected = match op {
                "a" | "r" => 2,
                "f" => 1,
                "c" => 3,
                _ => {
                    return Err(TraceError::UnknownRequest {
                        line: line_no,
                        op: op.to_string(),
                    })
                }
            };
            if args.len() != expected {
                return Err(TraceError::ArgumentCount {
                    line: line_no,
                    expected,
                    found: args.len(),
                });
            }

            requests.push(match op {
                "a" => Request::Allocate {
                    id: args[0],
                    size: args[1],
                },
                "r" => Request::Reallocate {
                    id: args[0],
                    size: args[1],
                },
                "f" => Request::Free { id: args[0] },
                _ => Request::ZeroAllocate {
                    id: args[0],
                    count: args[1],
                    size: args[2],
                },
            });
        }
        Ok(Self {
            name: name.to_string(),
            requests,
        })
    }

    /// Reads and parses the trace file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TraceError> {
        let path = path.as_ref();
        let src = fs::read_to_string(path)?;
        Self::parse(&path.display().to_string(), &src)
    }

    /// One past the highest id used, the number of slots replay needs.
    pub fn id_count(&self) -> usize {
        self.requests
            .iter()
            .map(|req| req.id() + 1)
            .max()
            .unwrap_or(0)
    }
}

fn parse_number(line: usize, word: &str) -> Result<usize, TraceError> {
    usize::from_str(word).map_err(|_| TraceError::InvalidNumber {
        line,
        value: word.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let trace = Trace::parse(
            "inline",
            "# header\n\na 0 100\nr 0 200  # grow\nc 1 4 8\n\tf 0\nf 1\n",
        )
        .unwrap();
        assert_eq!(
            trace.requests,
            vec![
                Request::Allocate { id: 0, size: 100 },
                Request::Reallocate { id: 0, size: 200 },
                Request::ZeroAllocate {
                    id: 1,
                    count: 4,
                    size: 8
                },
                Request::Free { id: 0 },
                Request::Free { id: 1 },
            ]
        );
        assert_eq!(trace.id_count(), 2);
    }

    #[test]
    fn test_empty() {
        let trace = Trace::parse("empty", "# nothing\n\n").unwrap();
        assert!(trace.requests.is_empty());
        assert_eq!(trace.id_count(), 0);
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            Trace::parse("bad", "a 0 8\nx 1\n"),
            Err(TraceError::UnknownRequest { line: 2, .. })
        ));
        assert!(matches!(
            Trace::parse("bad", "f 0 8\n"),
            Err(TraceError::ArgumentCount {
                line: 1,
                expected: 1,
                found: 2
            })
        ));
        assert!(matches!(
            Trace::parse("bad", "\n\na 0 -4\n"),
            Err(TraceError::InvalidNumber { line: 3, .. })
        ));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            Trace::load("traces/does-not-exist.rep"),
            Err(TraceError::Io(_))
        ));
    }
}
