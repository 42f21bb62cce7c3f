//! Parser for allocation trace files.
//!
//! A trace starts with four numbers: the suggested heap size, the number of block ids, the number
//! of operations and a weight. They are followed by one operation per line:
//!
//! ```text
//! a <id> <bytes>    allocate
//! r <id> <bytes>    reallocate
//! f <id>            free
//! ```

use anyhow::{anyhow, bail, Context, Result};

/// Upper bound on the operations reserved up front from the header, the rest grows on demand.
const MAX_RESERVED_OPS: usize = 1 << 16;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Op {
    Allocate { id: usize, size: u64 },
    Reallocate { id: usize, size: u64 },
    Free { id: usize },
}

impl Op {
    pub fn id(&self) -> usize {
        match *self {
            Op::Allocate { id, .. } | Op::Reallocate { id, .. } | Op::Free { id } => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trace {
    /// Heap size suggested by the author of the trace, only informative.
    pub suggested_heap_size: u64,
    /// Ids used by the operations are all below this.
    pub num_ids: usize,
    pub weight: u64,
    pub ops: Vec<Op>,
}

impl Trace {
    pub fn parse(content: &str) -> Result<Self> {
        let mut tokens = content.split_whitespace();
        let mut header = |name: &str| -> Result<u64> {
            let token = tokens
                .next()
                .ok_or_else(|| anyhow!("Missing {} in the trace header", name))?;
            token
                .parse()
                .with_context(|| format!("Invalid {} '{}'", name, token))
        };

        let suggested_heap_size = header("heap size")?;
        let num_ids = header("number of ids")? as usize;
        let num_ops = header("number of operations")? as usize;
        let weight = header("weight")?;

        let mut ops = Vec::with_capacity(num_ops.min(MAX_RESERVED_OPS));
        while let Some(kind) = tokens.next() {
            let index = ops.len();
            let mut number = |name: &str| -> Result<u64> {
                let token = tokens
                    .next()
                    .ok_or_else(|| anyhow!("Operation {}: missing {}", index, name))?;
                token
                    .parse()
                    .with_context(|| format!("Operation {}: invalid {} '{}'", index, name, token))
            };

            let op = match kind {
                "a" => Op::Allocate {
                    id: number("id")? as usize,
                    size: number("size")?,
                },
                "r" => Op::Reallocate {
                    id: number("id")? as usize,
                    size: number("size")?,
                },
                "f" => Op::Free {
                    id: number("id")? as usize,
                },
                kind => bail!("Operation {}: unknown kind '{}'", index, kind),
            };

            if op.id() >= num_ids {
                bail!(
                    "Operation {}: id {} out of range, the trace declares {} ids",
                    index,
                    op.id(),
                    num_ids
                );
            }

            ops.push(op);
        }

        if ops.len() != num_ops {
            bail!(
                "The trace declares {} operations but contains {}",
                num_ops,
                ops.len()
            );
        }

        Ok(Self {
            suggested_heap_size,
            num_ids,
            weight,
            ops,
        })
    }
}
